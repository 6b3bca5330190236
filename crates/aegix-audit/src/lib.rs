pub mod log;

pub use log::{AuditLog, AuditRecordMeta};

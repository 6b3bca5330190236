pub mod ledger;

pub use ledger::{BudgetLedger, Reservation};

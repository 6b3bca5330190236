pub mod db;
pub mod lock_registry;
pub mod vault;

pub use db::VaultDb;
pub use lock_registry::LockRegistry;
pub use vault::KeyVault;

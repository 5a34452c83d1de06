pub mod authz;
pub mod catalog;
pub mod comments;
pub mod config;
pub mod db;
pub mod errors;
pub mod events;
pub mod hierarchy;
pub mod models;
pub mod permission_store;
pub mod sharing;
pub mod storage;
pub mod users;
pub mod utils;
pub mod vault;
pub mod versioning;

// Re-export commonly used items for tests and callers
pub use authz::{Action, AuthorizationEngine, Decision, Target};
pub use config::Config;
pub use errors::{AppError, AppResult};
pub use vault::Vault;

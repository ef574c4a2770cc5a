pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use error::TokenwatchError;
pub use store::{ConfigStore, Persistence, PgConfigStore, PgPersistence};
pub use types::*;

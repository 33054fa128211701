pub mod api;
pub mod checkout;
pub mod config;
pub mod db;
pub mod identity;

pub use db::DbPool;

use config::Config;
use identity::TokenKeys;

/// Shared, read-only state handed to every handler
pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub keys: TokenKeys,
}

impl AppState {
    pub fn new(config: Config, db: DbPool, keys: TokenKeys) -> Self {
        Self { config, db, keys }
    }
}

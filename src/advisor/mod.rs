//! Advisor bot - persona conversations backed by OpenRouter and a conversation store.

pub mod analytics;
pub mod engine;
pub mod export;
pub mod sqlite;
pub mod store;
pub mod summary;
pub mod supabase;
pub mod telegram;

pub use engine::{AdvisorConfig, AdvisorEngine};
pub use store::{Store, StoreError, UserProfile};
pub use telegram::TelegramClient;

use std::path::Path;

use crate::config::Config;

/// Open the configured backend: Supabase when credentials are set, else SQLite under `data_dir`.
pub fn open_store(config: &Config) -> Result<Store, StoreError> {
    match &config.supabase {
        Some(supabase) => Ok(Store::Supabase(supabase::SupabaseStore::new(supabase)?)),
        None => open_sqlite(&config.sqlite_path()),
    }
}

fn open_sqlite(path: &Path) -> Result<Store, StoreError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(StoreError::Io)?;
    }
    Ok(Store::Sqlite(sqlite::SqliteStore::open(path)?))
}

//! wgsync Common Library
//!
//! Shared error types, IPv4 address math and the subnet/client registry.

pub mod address;
pub mod db;
pub mod error;
pub mod registry;
pub mod types;

// Re-export commonly used types
pub use db::Database;
pub use error::{Error, Result};
pub use registry::Registry;
pub use types::*;

/// wgsync version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default store path
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".wgsync")
}

/// Default registry database path
pub fn default_db_path() -> std::path::PathBuf {
    default_store_path().join("registry.db")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}

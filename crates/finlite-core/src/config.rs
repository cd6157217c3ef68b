//! Environment-driven application settings
//!
//! The settings record is built once at the composition root and passed by
//! value to whatever needs it (rule loading, database opening). There is no
//! global configuration state.

use std::path::PathBuf;

/// Application settings resolved from environment variables.
///
/// Recognized variables and their defaults:
/// - `DATA_DIR` — application data directory (default `~/.finlite`)
/// - `DATABASE_FILENAME` — SQLite file name inside the data dir (`finlite.db`)
/// - `DEFAULT_CURRENCY` — ISO 4217 code used when statements omit one (`USD`)
/// - `LOG_LEVEL` — log filter handed to the front end (`INFO`)
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub database_filename: String,
    pub default_currency: String,
    pub log_level: String,
}

impl Settings {
    /// Build settings from the process environment, falling back to defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("DATA_DIR").map(PathBuf::from).unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".finlite")
        });

        Self {
            data_dir,
            database_filename: std::env::var("DATABASE_FILENAME")
                .unwrap_or_else(|_| "finlite.db".to_string()),
            default_currency: std::env::var("DEFAULT_CURRENCY")
                .unwrap_or_else(|_| "USD".to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
        }
    }

    /// Full path to the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Full path to the classification rules document.
    pub fn rules_path(&self) -> PathBuf {
        self.data_dir.join("category_map.json")
    }

    /// Create the data directory if it does not exist yet.
    pub fn ensure_data_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_env()
    }
}

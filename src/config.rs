use std::path::PathBuf;

use rocket::serde::Deserialize;

/// Which backend keeps the expense records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(crate = "rocket::serde", rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    File,
}

/// Application settings read from Rocket's figment (`Rocket.toml`, `ROCKET_*`).
#[derive(Debug, Clone, Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct AppConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub storage: StorageBackend,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: i64,
    #[serde(default = "default_min_password_len")]
    pub min_password_len: usize,
    #[serde(default = "default_currency")]
    pub currency: String,
}

impl AppConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("expenses.sqlite")
    }

    pub fn expense_files_dir(&self) -> PathBuf {
        self.data_dir.join("expenses")
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_max_sessions() -> i64 {
    5
}

fn default_min_password_len() -> usize {
    6
}

fn default_currency() -> String {
    "₹".to_string()
}

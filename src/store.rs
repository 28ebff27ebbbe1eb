use std::sync::Arc;

use tracing::info;

use crate::config::{AppConfig, StorageBackend};
use crate::db::{DbPool, SqliteExpenses};
use crate::error::Result;
use crate::flatfile::FlatFileExpenses;
use crate::models::{Expense, ExpenseFilter, NewExpense};

/// Persistence for expense records. Every operation is scoped to one owner.
pub trait ExpenseStore: Send + Sync {
    /// Stores a record and returns its id.
    fn append(&self, owner: i64, expense: &NewExpense) -> Result<i64>;

    /// Records matching `filter`, most recent first.
    fn list(&self, owner: i64, filter: &ExpenseFilter) -> Result<Vec<Expense>>;

    /// Returns `false` when no record with `id` belongs to `owner`.
    fn delete(&self, owner: i64, id: i64) -> Result<bool>;

    /// Removes every record of `owner` and returns how many were removed.
    fn clear(&self, owner: i64) -> Result<usize>;
}

pub type SharedStore = Arc<dyn ExpenseStore>;

pub fn open(config: &AppConfig, pool: &DbPool) -> Result<SharedStore> {
    let store: SharedStore = match config.storage {
        StorageBackend::Sqlite => Arc::new(SqliteExpenses::new(pool.clone())),
        StorageBackend::File => {
            let dir = config.expense_files_dir();
            std::fs::create_dir_all(&dir)?;
            Arc::new(FlatFileExpenses::new(dir))
        }
    };
    info!("expense storage: {:?}", config.storage);
    Ok(store)
}

use std::path::Path;

use chrono::{NaiveDateTime, NaiveTime};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Result, params};

use crate::error;
use crate::models::{
    Category, DEFAULT_CATEGORIES, Expense, ExpenseFilter, NewExpense, Profile, User,
};
use crate::store::ExpenseStore;

pub type DbPool = Pool<SqliteConnectionManager>;

pub fn init_db(path: &Path) -> error::Result<DbPool> {
    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
    });
    let pool = Pool::new(manager)?;
    run_migrations(&*pool.get()?)?;
    Ok(pool)
}

/// A pool over a single in-memory connection, so every checkout sees the same data.
#[cfg(test)]
pub fn init_memory_db() -> DbPool {
    let manager = SqliteConnectionManager::memory().with_init(|conn| {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
    });
    let pool = Pool::builder().max_size(1).build(manager).unwrap();
    run_migrations(&pool.get().unwrap()).unwrap();
    pool
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            token TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            icon TEXT NOT NULL,
            UNIQUE(user_id, name),
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS expenses (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            category TEXT NOT NULL,
            amount REAL NOT NULL CHECK(amount >= 0),
            spent_at TEXT NOT NULL,
            note TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        );
        ",
    )
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

pub fn email_taken(conn: &Connection, email: &str) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1)",
        params![email],
        |row| row.get::<_, i64>(0),
    )
    .map(|value| value == 1)
}

pub fn username_taken(conn: &Connection, username: &str) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1)",
        params![username],
        |row| row.get::<_, i64>(0),
    )
    .map(|value| value == 1)
}

/// Inserts the user and seeds the default categories in one transaction.
pub fn create_user(
    conn: &mut Connection,
    username: &str,
    email: &str,
    password_hash: &str,
    created_at: &str,
) -> Result<i64> {
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO users (username, email, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![username, email, password_hash, created_at],
    )?;
    let user_id = tx.last_insert_rowid();
    for (name, icon) in DEFAULT_CATEGORIES {
        tx.execute(
            "INSERT INTO categories (user_id, name, icon) VALUES (?1, ?2, ?3)",
            params![user_id, name, icon],
        )?;
    }
    tx.commit()?;
    Ok(user_id)
}

/// Id, username and password hash of the account registered under `email`.
pub fn user_credentials(conn: &Connection, email: &str) -> Result<Option<(i64, String, String)>> {
    conn.query_row(
        "SELECT id, username, password_hash FROM users WHERE email = ?1",
        params![email],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )
    .optional()
}

pub fn password_hash(conn: &Connection, user_id: i64) -> Result<Option<String>> {
    conn.query_row(
        "SELECT password_hash FROM users WHERE id = ?1",
        params![user_id],
        |row| row.get(0),
    )
    .optional()
}

pub fn update_password(conn: &Connection, user_id: i64, password_hash: &str) -> Result<()> {
    conn.execute(
        "UPDATE users SET password_hash = ?1 WHERE id = ?2",
        params![password_hash, user_id],
    )?;
    Ok(())
}

pub fn profile(conn: &Connection, user_id: i64) -> Result<Option<Profile>> {
    conn.query_row(
        "SELECT id, username, email, created_at FROM users WHERE id = ?1",
        params![user_id],
        |row| {
            Ok(Profile {
                id: row.get(0)?,
                username: row.get(1)?,
                email: row.get(2)?,
                created_at: row.get(3)?,
            })
        },
    )
    .optional()
}

pub fn create_session(conn: &Connection, user_id: i64, token: &str, created_at: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO sessions (user_id, token, created_at) VALUES (?1, ?2, ?3)",
        params![user_id, token, created_at],
    )?;
    Ok(())
}

pub fn user_by_session(conn: &Connection, token: &str) -> Result<Option<User>> {
    conn.query_row(
        "
        SELECT u.id, u.username, u.email
        FROM sessions s
        JOIN users u ON s.user_id = u.id
        WHERE s.token = ?1
        ",
        params![token],
        |row| {
            Ok(User {
                id: row.get(0)?,
                username: row.get(1)?,
                email: row.get(2)?,
            })
        },
    )
    .optional()
}

pub fn delete_session(conn: &Connection, token: &str) -> Result<()> {
    conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(())
}

pub fn session_count(conn: &Connection, user_id: i64) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM sessions WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )
}

pub fn delete_sessions_for_user(conn: &Connection, user_id: i64) -> Result<()> {
    conn.execute("DELETE FROM sessions WHERE user_id = ?1", params![user_id])?;
    Ok(())
}

pub fn prune_sessions(conn: &Connection, user_id: i64, keep: i64) -> Result<()> {
    conn.execute(
        "
        DELETE FROM sessions
        WHERE user_id = ?1
          AND id NOT IN (
            SELECT id
            FROM sessions
            WHERE user_id = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT ?2
          )
        ",
        params![user_id, keep],
    )?;
    Ok(())
}

pub fn list_categories(conn: &Connection, user_id: i64) -> Result<Vec<Category>> {
    let mut stmt = conn.prepare(
        "
        SELECT id, user_id, name, icon
        FROM categories
        WHERE user_id = ?1
        ORDER BY id
        ",
    )?;
    let rows = stmt.query_map(params![user_id], |row| {
        Ok(Category {
            id: row.get(0)?,
            owner: row.get(1)?,
            name: row.get(2)?,
            icon: row.get(3)?,
        })
    })?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Returns `false` when the owner already has a category with this name.
pub fn insert_category(conn: &Connection, user_id: i64, name: &str, icon: &str) -> Result<bool> {
    match conn.execute(
        "INSERT INTO categories (user_id, name, icon) VALUES (?1, ?2, ?3)",
        params![user_id, name, icon],
    ) {
        Ok(_) => Ok(true),
        Err(e) if is_constraint_violation(&e) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Expenses that reference the category by name are left untouched.
pub fn delete_category(conn: &Connection, user_id: i64, name: &str) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM categories WHERE user_id = ?1 AND name = ?2",
        params![user_id, name],
    )?;
    Ok(removed > 0)
}

pub fn category_count(conn: &Connection, user_id: i64) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM categories WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )
}

/// Expense records kept in the `expenses` table.
pub struct SqliteExpenses {
    pool: DbPool,
}

impl SqliteExpenses {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl ExpenseStore for SqliteExpenses {
    fn append(&self, owner: i64, expense: &NewExpense) -> error::Result<i64> {
        let conn = self.pool.get()?;
        conn.execute(
            "
            INSERT INTO expenses (user_id, category, amount, spent_at, note)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![
                owner,
                expense.category,
                expense.amount,
                expense.spent_at,
                expense.note
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn list(&self, owner: i64, filter: &ExpenseFilter) -> error::Result<Vec<Expense>> {
        let conn = self.pool.get()?;
        let from: Option<NaiveDateTime> = filter.start.map(|day| day.and_time(NaiveTime::MIN));
        let until: Option<NaiveDateTime> = filter
            .end
            .and_then(|day| day.succ_opt())
            .map(|day| day.and_time(NaiveTime::MIN));

        let mut stmt = conn.prepare(
            "
            SELECT id, user_id, category, amount, spent_at, note
            FROM expenses
            WHERE user_id = ?1
              AND (?2 IS NULL OR spent_at >= ?2)
              AND (?3 IS NULL OR spent_at < ?3)
            ORDER BY spent_at DESC, id DESC
            ",
        )?;
        let rows = stmt.query_map(params![owner, from, until], |row| {
            Ok(Expense {
                id: row.get(0)?,
                owner: row.get(1)?,
                category: row.get(2)?,
                amount: row.get(3)?,
                spent_at: row.get(4)?,
                note: row.get(5)?,
            })
        })?;

        // SQLite's lower() only folds ASCII, so category matching stays in Rust.
        let mut out = Vec::new();
        for row in rows {
            let expense = row?;
            if filter.matches(&expense) {
                out.push(expense);
            }
        }
        Ok(out)
    }

    fn delete(&self, owner: i64, id: i64) -> error::Result<bool> {
        let conn = self.pool.get()?;
        let removed = conn.execute(
            "DELETE FROM expenses WHERE id = ?1 AND user_id = ?2",
            params![id, owner],
        )?;
        Ok(removed > 0)
    }

    fn clear(&self, owner: i64) -> error::Result<usize> {
        let conn = self.pool.get()?;
        Ok(conn.execute("DELETE FROM expenses WHERE user_id = ?1", params![owner])?)
    }
}

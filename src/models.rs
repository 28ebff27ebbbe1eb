use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

/// Timestamp layout used for display, CSV export and the flat-file store.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Categories every new account starts with.
pub const DEFAULT_CATEGORIES: [(&str, &str); 5] = [
    ("Food", "🍔"),
    ("Entertainment", "🎭"),
    ("Shopping", "🛍️"),
    ("Bills", "📑"),
    ("Other", "💼"),
];

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Category {
    pub id: i64,
    pub owner: i64,
    pub name: String,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Expense {
    pub id: i64,
    pub owner: i64,
    pub category: String,
    pub amount: f64,
    pub spent_at: NaiveDateTime,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewExpense {
    pub category: String,
    pub amount: f64,
    pub spent_at: NaiveDateTime,
    pub note: Option<String>,
}

/// Narrows an expense listing. Both dates are inclusive calendar days.
#[derive(Debug, Clone, Default)]
pub struct ExpenseFilter {
    pub category: Option<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl ExpenseFilter {
    pub fn matches(&self, expense: &Expense) -> bool {
        if let Some(needle) = &self.category {
            if !expense
                .category
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }
        let day = expense.spent_at.date();
        if self.start.is_some_and(|start| day < start) {
            return false;
        }
        if self.end.is_some_and(|end| day > end) {
            return false;
        }
        true
    }
}

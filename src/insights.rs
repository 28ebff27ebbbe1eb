//! Spending aggregates and threshold-based advice over one owner's expenses.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::Expense;

/// Largest acceptable share of total spend per category.
pub const THRESHOLDS: [(&str, f64); 5] = [
    ("Food", 0.30),
    ("Entertainment", 0.15),
    ("Shopping", 0.20),
    ("Bills", 0.25),
    ("Other", 0.10),
];

pub const SAVINGS_RATE: f64 = 0.20;

pub fn threshold_for(category: &str) -> Option<f64> {
    THRESHOLDS
        .iter()
        .find(|(name, _)| *name == category)
        .map(|(_, limit)| *limit)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightKind {
    Warning,
    Success,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insight {
    pub kind: InsightKind,
    pub category: String,
    pub share: f64,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Insights {
    pub total: f64,
    pub category_totals: BTreeMap<String, f64>,
    /// Keyed by `YYYY-MM`, so iteration is chronological.
    pub monthly_totals: BTreeMap<String, f64>,
    pub max_expense: f64,
    pub highest_category: Option<String>,
    pub messages: Vec<Insight>,
    pub savings_recommendation: f64,
}

pub fn summarize(expenses: &[Expense]) -> Insights {
    let mut insights = Insights::default();

    for expense in expenses {
        insights.total += expense.amount;
        *insights
            .category_totals
            .entry(expense.category.clone())
            .or_insert(0.0) += expense.amount;
        *insights
            .monthly_totals
            .entry(expense.spent_at.format("%Y-%m").to_string())
            .or_insert(0.0) += expense.amount;

        if expense.amount > insights.max_expense {
            insights.max_expense = expense.amount;
            insights.highest_category = Some(expense.category.clone());
        }
    }

    if insights.total > 0.0 {
        insights.messages = insights
            .category_totals
            .iter()
            .map(|(category, spent)| assess(category, spent / insights.total))
            .collect();
    }
    insights.savings_recommendation = insights.total * SAVINGS_RATE;
    insights
}

fn assess(category: &str, share: f64) -> Insight {
    let percent = share * 100.0;
    let (kind, message) = match threshold_for(category) {
        Some(limit) if share > limit => (
            InsightKind::Warning,
            format!(
                "You are overspending on {category} ({percent:.1}% of total). Consider reducing it!"
            ),
        ),
        Some(_) => (
            InsightKind::Success,
            format!("Good job! Your {category} spending is within limits ({percent:.1}%)."),
        ),
        None => (
            InsightKind::Info,
            format!("Your spending on {category} is {percent:.1}% of total expenses."),
        ),
    };
    Insight {
        kind,
        category: category.to_string(),
        share,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn expense(category: &str, amount: f64, month: u32) -> Expense {
        Expense {
            id: 0,
            owner: 1,
            category: category.to_string(),
            amount,
            spent_at: NaiveDate::from_ymd_opt(2024, month, 15)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
            note: None,
        }
    }

    fn kind_of(insights: &Insights, category: &str) -> InsightKind {
        insights
            .messages
            .iter()
            .find(|m| m.category == category)
            .map(|m| m.kind)
            .unwrap()
    }

    #[test]
    fn overspending_on_food_and_bills() {
        let insights = summarize(&[expense("Food", 300.0, 1), expense("Bills", 200.0, 1)]);
        assert_eq!(insights.total, 500.0);
        assert_eq!(kind_of(&insights, "Food"), InsightKind::Warning);
        assert_eq!(kind_of(&insights, "Bills"), InsightKind::Warning);
        let food = insights.messages.iter().find(|m| m.category == "Food").unwrap();
        assert_eq!(
            food.message,
            "You are overspending on Food (60.0% of total). Consider reducing it!"
        );
    }

    #[test]
    fn category_totals_add_up_to_total() {
        let expenses = [
            expense("Food", 12.34, 1),
            expense("Food", 0.1, 2),
            expense("Travel", 0.2, 2),
            expense("Bills", 99.99, 3),
            expense("Shopping", 7.0, 3),
        ];
        let insights = summarize(&expenses);
        let summed: f64 = insights.category_totals.values().sum();
        assert!((summed - insights.total).abs() < 1e-9);
        let monthly: f64 = insights.monthly_totals.values().sum();
        assert!((monthly - insights.total).abs() < 1e-9);
    }

    #[test]
    fn share_equal_to_threshold_is_within_limits() {
        // Food is exactly 30% of 100.
        let insights = summarize(&[expense("Food", 30.0, 1), expense("Other", 70.0, 1)]);
        assert_eq!(kind_of(&insights, "Food"), InsightKind::Success);
        assert_eq!(kind_of(&insights, "Other"), InsightKind::Warning);
    }

    #[test]
    fn categories_outside_the_table_are_informational() {
        let insights = summarize(&[expense("Travel", 25.0, 1), expense("Bills", 75.0, 1)]);
        assert_eq!(kind_of(&insights, "Travel"), InsightKind::Info);
        let travel = insights.messages.iter().find(|m| m.category == "Travel").unwrap();
        assert_eq!(travel.message, "Your spending on Travel is 25.0% of total expenses.");
        assert_eq!(insights.messages.len(), 2);
    }

    #[test]
    fn thresholds_match_names_exactly() {
        assert_eq!(threshold_for("Food"), Some(0.30));
        assert_eq!(threshold_for("Entertainment"), Some(0.15));
        assert_eq!(threshold_for("food"), None);
    }

    #[test]
    fn first_largest_expense_wins_ties() {
        let insights = summarize(&[
            expense("Shopping", 40.0, 1),
            expense("Food", 90.0, 1),
            expense("Bills", 90.0, 2),
        ]);
        assert_eq!(insights.max_expense, 90.0);
        assert_eq!(insights.highest_category.as_deref(), Some("Food"));
    }

    #[test]
    fn months_are_grouped_chronologically() {
        let insights = summarize(&[
            expense("Food", 5.0, 3),
            expense("Food", 1.0, 1),
            expense("Bills", 2.0, 3),
        ]);
        let months = insights.monthly_totals.into_iter().collect::<Vec<_>>();
        assert_eq!(
            months,
            [("2024-01".to_string(), 1.0), ("2024-03".to_string(), 7.0)]
        );
    }

    #[test]
    fn savings_is_a_fifth_of_total() {
        let insights = summarize(&[expense("Food", 123.45, 1), expense("Bills", 10.0, 2)]);
        assert_eq!(insights.savings_recommendation, 0.2 * insights.total);
    }

    #[test]
    fn no_expenses_means_no_advice() {
        let insights = summarize(&[]);
        assert_eq!(insights.total, 0.0);
        assert!(insights.category_totals.is_empty());
        assert!(insights.monthly_totals.is_empty());
        assert!(insights.messages.is_empty());
        assert_eq!(insights.highest_category, None);
        assert_eq!(insights.savings_recommendation, 0.0);
    }

    #[test]
    fn zero_amounts_produce_no_messages() {
        let insights = summarize(&[expense("Food", 0.0, 1)]);
        assert_eq!(insights.category_totals.get("Food"), Some(&0.0));
        assert!(insights.messages.is_empty());
        assert_eq!(insights.highest_category, None);
    }
}

use chrono::NaiveDate;
use getset::{CopyGetters, Getters};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::key::MerchantKey;

/// Where a transaction's category came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// The input file already carried a category.
    Preset,
    /// A configured transaction-type rule.
    TypeRule,
    /// A learned rule from the store.
    Rule,
    /// Chosen by the user when asked.
    Manual,
    /// Changed by the user during review.
    Corrected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub category: String,
    pub origin: Origin,
}

/// A single row of the statement. Only the category and the person change
/// after loading.
#[derive(Debug, Clone, PartialEq, Getters, CopyGetters)]
pub struct Transaction {
    #[getset(get_copy = "pub")]
    date: NaiveDate,
    #[getset(get_copy = "pub")]
    amount: Decimal,
    #[getset(get = "pub")]
    description: String,
    #[getset(get = "pub")]
    detail: Option<String>,
    #[getset(get = "pub")]
    kind: Option<String>,
    #[getset(get = "pub")]
    key: Option<MerchantKey>,
    #[getset(get = "pub")]
    person: Option<String>,

    assignment: Option<Assignment>,
}

impl Transaction {
    pub fn new(date: NaiveDate, amount: Decimal, description: impl Into<String>) -> Transaction {
        let description = description.into();
        Transaction {
            date,
            amount,
            key: MerchantKey::normalize(&description),
            description,
            detail: None,
            kind: None,
            person: None,
            assignment: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Transaction {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Transaction {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_person(mut self, person: impl Into<String>) -> Transaction {
        self.set_person(person);
        self
    }

    pub(crate) fn set_person(&mut self, person: impl Into<String>) {
        self.person = Some(person.into());
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Transaction {
        self.assign(category, Origin::Preset);
        self
    }

    pub fn category(&self) -> Option<&str> {
        self.assignment.as_ref().map(|assignment| assignment.category.as_str())
    }

    pub fn origin(&self) -> Option<Origin> {
        self.assignment.as_ref().map(|assignment| assignment.origin)
    }

    pub fn is_categorized(&self) -> bool {
        self.assignment.is_some()
    }

    pub(crate) fn assign(&mut self, category: impl Into<String>, origin: Origin) {
        self.assignment = Some(Assignment {
            category: category.into(),
            origin,
        });
    }

    /// `description - detail` when the detail says something, else the description.
    pub fn display_name(&self) -> String {
        match self.detail.as_deref().map(str::trim) {
            Some(detail) if !is_placeholder(detail) => format!("{} - {}", self.description, detail),
            _ => self.description.clone(),
        }
    }
}

// Exports fill empty cells with these.
fn is_placeholder(value: &str) -> bool {
    matches!(value, "" | "/" | "-" | "无" | "nan" | "None")
}

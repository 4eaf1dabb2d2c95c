use std::io;
use std::path::PathBuf;

use enum_dispatch::enum_dispatch;
use thiserror::Error;

pub mod categorizer;
pub mod key;
pub mod prompter;
pub mod rule_store;
pub mod transaction;


use key::MerchantKey;
use prompter::{ConsolePrompter, ScriptedPrompter};
use transaction::Transaction;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access rule store {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("rule store {path} is corrupt: {source}")]
    Corrupt { path: PathBuf, source: serde_json::Error },
    #[error("rule store {path} has unsupported version {version}")]
    UnsupportedVersion { path: PathBuf, version: u32 },
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("input closed before a choice was made")]
    InputClosed,
    #[error("{0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum CategorizeError {
    #[error("categorization stopped by the user after {processed} transactions")]
    Aborted { processed: usize },
    #[error("row {0} does not exist")]
    UnknownRow(usize),
    #[error("category name is empty")]
    EmptyCategory,
    #[error("{0}")]
    Prompt(#[from] PromptError),
}

/// Answer to a request for a category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Category(String),
    /// Leave the transaction uncategorized and move on.
    Skip,
    /// Stop categorizing altogether.
    Quit,
}

/// A learned rule offered as a hint for a transaction that has no exact match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub category: String,
    pub similar_to: MerchantKey,
}

/// Everything the user needs to decide on one transaction.
pub struct CategoryRequest<'a> {
    pub position: usize,
    pub total: usize,
    pub transaction: &'a Transaction,
    pub suggestions: &'a [Suggestion],
    pub categories: &'a [String],
}

/// Change the category of row `row` (zero-based) during review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub row: usize,
    pub category: String,
}

/// How transactions are attributed to people.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersonMode {
    /// Every transaction belongs to the same person.
    Fixed(String),
    /// The user picks a person for each transaction.
    PerTransaction,
}

/// Source of category decisions. Blocks until the user answers.
#[enum_dispatch]
pub trait CategoryPrompter {
    fn request_category(&mut self, request: &CategoryRequest) -> Result<Decision, PromptError>;

    /// Returns `None` once the user has nothing left to change.
    fn request_revision(&mut self, transactions: &[Transaction]) -> Result<Option<Revision>, PromptError>;

    /// Picks where the statement came from. `sources` is never empty.
    fn select_source(&mut self, sources: &[String]) -> Result<String, PromptError>;

    /// `people` has at least two entries.
    fn select_person_mode(&mut self, people: &[String]) -> Result<PersonMode, PromptError>;

    fn request_person(&mut self, transaction: &Transaction, people: &[String]) -> Result<String, PromptError>;
}

#[enum_dispatch(CategoryPrompter)]
pub enum Prompter {
    ConsolePrompter,
    ScriptedPrompter,
}

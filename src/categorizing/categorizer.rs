use chrono::Utc;
use log::{debug, info, warn};

use super::rule_store::{HistoryEntry, RuleStore};
use super::transaction::{Origin, Transaction};
use super::{CategorizeError, CategoryPrompter, CategoryRequest, Decision, PersonMode, Revision, Suggestion};
use crate::config::CategoryConfig;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Stats {
    pub total: usize,
    pub preset: usize,
    pub type_rule: usize,
    pub rule_hits: usize,
    pub manual: usize,
    pub skipped: usize,
    pub corrected: usize,
}

impl Stats {
    /// Transactions that needed no input from the user.
    pub fn automatic(&self) -> usize {
        self.preset + self.type_rule + self.rule_hits
    }
}

/// Assigns categories from the rule store and learns new rules from the
/// user's answers.
pub struct Categorizer<'a> {
    store: &'a mut RuleStore,
    config: &'a CategoryConfig,
    categories: Vec<String>,
    person_mode: Option<PersonMode>,
    progress_interval: usize,
    stats: Stats,
}

impl<'a> Categorizer<'a> {
    pub fn new(store: &'a mut RuleStore, config: &'a CategoryConfig) -> Categorizer<'a> {
        let mut categories = config.base.clone();
        for category in store.categories() {
            if !categories.iter().any(|known| known == category) {
                categories.push(category.to_string());
            }
        }

        Categorizer {
            store,
            config,
            categories,
            person_mode: None,
            progress_interval: 0,
            stats: Stats::default(),
        }
    }

    /// Log progress every `interval` transactions; 0 disables it.
    pub fn with_progress_interval(mut self, interval: usize) -> Categorizer<'a> {
        self.progress_interval = interval;
        self
    }

    /// Attribute every transaction to a person while categorizing. `None`
    /// leaves the person empty.
    pub fn with_person_mode(mut self, mode: Option<PersonMode>) -> Categorizer<'a> {
        self.person_mode = mode;
        self
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Categories offered to the user, growing as new ones are chosen.
    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    /// Categorizes `transactions` in order. Transactions that no rule covers
    /// are handed to `prompter`, and its answer becomes a rule for the next
    /// transaction with the same merchant key.
    pub fn categorize<P: CategoryPrompter>(
        &mut self,
        transactions: &mut [Transaction],
        prompter: &mut P,
    ) -> Result<(), CategorizeError> {
        let total = transactions.len();
        info!("categorizing {} transactions", total);

        for (index, tx) in transactions.iter_mut().enumerate() {
            if self.progress_interval > 0 && index > 0 && index % self.progress_interval == 0 {
                info!("progress {}/{}", index, total);
            }
            self.stats.total += 1;
            self.attribute(tx, prompter)?;

            if self.keep_preset(tx) || self.apply_type_rule(tx) || self.apply_rule(tx) {
                continue;
            }

            let suggestions = self.suggestions_for(tx);
            let decision = prompter.request_category(&CategoryRequest {
                position: index + 1,
                total,
                transaction: tx,
                suggestions: &suggestions,
                categories: &self.categories,
            })?;

            match decision {
                Decision::Category(category) => {
                    let category = category.trim();
                    if category.is_empty() {
                        return Err(CategorizeError::EmptyCategory);
                    }
                    self.learn(tx, category.to_string(), Origin::Manual);
                    self.stats.manual += 1;
                },
                Decision::Skip => {
                    debug!("skipped {:?}", tx.description());
                    self.stats.skipped += 1;
                },
                Decision::Quit => return Err(CategorizeError::Aborted { processed: index }),
            }
        }

        info!(
            "categorized {} transactions: {} automatic, {} manual, {} skipped",
            self.stats.total,
            self.stats.automatic(),
            self.stats.manual,
            self.stats.skipped
        );
        Ok(())
    }

    /// Lets the user change assigned categories until they are done. Returns
    /// the number of rows that changed.
    pub fn review<P: CategoryPrompter>(
        &mut self,
        transactions: &mut [Transaction],
        prompter: &mut P,
    ) -> Result<usize, CategorizeError> {
        let mut changed = 0;
        while let Some(revision) = prompter.request_revision(transactions)? {
            match self.correct(transactions, revision) {
                Ok(rows) => changed += rows,
                Err(err) => warn!("ignoring revision: {}", err),
            }
        }
        Ok(changed)
    }

    /// Overrides the category of one row and the rule for its merchant. Rows
    /// that were filled in by that same rule follow the new category.
    pub fn correct(&mut self, transactions: &mut [Transaction], revision: Revision) -> Result<usize, CategorizeError> {
        let category = revision.category.trim();
        if category.is_empty() {
            return Err(CategorizeError::EmptyCategory);
        }

        let tx = transactions
            .get_mut(revision.row)
            .ok_or(CategorizeError::UnknownRow(revision.row))?;
        if tx.category() == Some(category) {
            return Ok(0);
        }

        let key = tx.key().clone();
        self.learn(tx, category.to_string(), Origin::Corrected);
        self.stats.corrected += 1;

        let mut changed = 1;
        if let Some(key) = key {
            for other in transactions.iter_mut() {
                if other.origin() == Some(Origin::Rule) && other.key().as_ref() == Some(&key) {
                    other.assign(category, Origin::Rule);
                    changed += 1;
                }
            }
        }

        Ok(changed)
    }

    fn attribute<P: CategoryPrompter>(&self, tx: &mut Transaction, prompter: &mut P) -> Result<(), CategorizeError> {
        match &self.person_mode {
            Some(PersonMode::Fixed(person)) => tx.set_person(person.clone()),
            Some(PersonMode::PerTransaction) if !self.config.people.is_empty() => {
                let person = prompter.request_person(tx, &self.config.people)?;
                tx.set_person(person);
            },
            _ => {},
        }
        Ok(())
    }

    fn keep_preset(&mut self, tx: &Transaction) -> bool {
        let Some(category) = tx.category() else {
            return false;
        };

        // A category already in the file is the user's own, but an older
        // export must not overwrite a rule learned since.
        if let Some(key) = tx.key() {
            if self.store.lookup(key).is_none() {
                self.store.upsert(key.clone(), category);
            }
        }
        self.remember_category(category);
        self.stats.preset += 1;
        true
    }

    fn apply_type_rule(&mut self, tx: &mut Transaction) -> bool {
        let Some(kind) = tx.kind().as_deref() else {
            return false;
        };

        let matched = self
            .config
            .type_rules
            .iter()
            .find(|(pattern, _)| !pattern.is_empty() && kind.contains(pattern.as_str()));

        match matched {
            Some((pattern, category)) => {
                debug!("type rule {:?} matched {:?}", pattern, kind);
                tx.assign(category.clone(), Origin::TypeRule);
                self.stats.type_rule += 1;
                true
            },
            None => false,
        }
    }

    fn apply_rule(&mut self, tx: &mut Transaction) -> bool {
        let Some(key) = tx.key().clone() else {
            return false;
        };

        match self.store.lookup(&key).map(str::to_string) {
            Some(category) => {
                debug!("rule {:?} -> {:?}", key.as_str(), category);
                tx.assign(category, Origin::Rule);
                self.store.record_hit(&key);
                self.stats.rule_hits += 1;
                true
            },
            None => false,
        }
    }

    fn suggestions_for(&self, tx: &Transaction) -> Vec<Suggestion> {
        let Some(key) = tx.key() else {
            return Vec::new();
        };

        self.store
            .suggest(key)
            .into_iter()
            .map(|(similar_to, rule)| Suggestion {
                category: rule.category.clone(),
                similar_to: similar_to.clone(),
            })
            .collect()
    }

    fn learn(&mut self, tx: &mut Transaction, category: String, origin: Origin) {
        match tx.key() {
            Some(key) => {
                if let Some(previous) = self.store.upsert(key.clone(), category.clone()) {
                    debug!("rule {:?} changed from {:?} to {:?}", key.as_str(), previous, category);
                }
                self.store.record_decision(HistoryEntry {
                    key: key.to_string(),
                    description: tx.description().clone(),
                    category: category.clone(),
                    amount: tx.amount(),
                    date: tx.date(),
                    origin,
                    recorded_at: Utc::now(),
                });
            },
            None => debug!("no merchant key for {:?}, nothing learned", tx.description()),
        }

        self.remember_category(&category);
        tx.assign(category, origin);
    }

    fn remember_category(&mut self, category: &str) {
        if !self.categories.iter().any(|known| known == category) {
            self.categories.push(category.to_string());
        }
    }
}


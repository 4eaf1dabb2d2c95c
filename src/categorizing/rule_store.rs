use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::io;
use std::ops::Bound;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::key::MerchantKey;
use super::transaction::Origin;
use super::StoreError;
use crate::config::Limits;
use crate::persist::write_atomic;

const FORMAT_VERSION: u32 = 1;
const SUGGESTION_PREFIX: usize = 3;
const MAX_SUGGESTIONS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub category: String,
    /// Times the rule categorized a transaction on its own.
    #[serde(default)]
    pub hits: u64,
    pub updated_at: DateTime<Utc>,
}

/// One decision made by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub key: String,
    pub description: String,
    pub category: String,
    pub amount: Decimal,
    pub date: NaiveDate,
    pub origin: Origin,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct StoreFileRef<'a> {
    version: u32,
    saved_at: DateTime<Utc>,
    rules: BTreeMap<&'a str, &'a Rule>,
    history: &'a VecDeque<HistoryEntry>,
}

#[derive(Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    rules: BTreeMap<String, Rule>,
    #[serde(default)]
    history: VecDeque<HistoryEntry>,
}

/// Learned merchant rules plus the recent decision history, persisted as one
/// JSON file.
#[derive(Debug)]
pub struct RuleStore {
    path: Option<PathBuf>,
    limits: Limits,
    rules: BTreeMap<MerchantKey, Rule>,
    history: VecDeque<HistoryEntry>,
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|name| name.to_os_string()).unwrap_or_default();
    name.push(".corrupt");
    path.with_file_name(name)
}

impl RuleStore {
    /// A store that lives only in memory; `save` is a no-op.
    pub fn new(limits: Limits) -> RuleStore {
        RuleStore {
            path: None,
            limits,
            rules: BTreeMap::new(),
            history: VecDeque::new(),
        }
    }

    fn empty_at(path: &Path, limits: Limits) -> RuleStore {
        RuleStore {
            path: Some(path.to_path_buf()),
            ..RuleStore::new(limits)
        }
    }

    /// Reads the store at `path`. A file that does not exist yet is an empty store.
    pub fn load(path: &Path, limits: Limits) -> Result<RuleStore, StoreError> {
        if !path.exists() {
            info!("no rule store at {}, starting empty", path.display());
            return Ok(RuleStore::empty_at(path, limits));
        }

        let content = fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: StoreFile = serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;

        if file.version > FORMAT_VERSION {
            return Err(StoreError::UnsupportedVersion {
                path: path.to_path_buf(),
                version: file.version,
            });
        }

        let mut store = RuleStore::empty_at(path, limits);
        for (raw_key, rule) in file.rules {
            let Some(key) = MerchantKey::normalize(&raw_key) else {
                debug!("dropping rule with empty key {:?}", raw_key);
                continue;
            };
            store.merge_loaded(key, rule);
        }
        store.history = file.history;
        store.trim_history();

        info!("loaded {} rules from {}", store.rules.len(), path.display());
        Ok(store)
    }

    /// Like [`RuleStore::load`], but an unreadable or corrupt file is logged and
    /// replaced by an empty store. A file that could not be parsed is first
    /// moved to `<name>.corrupt` so the next save does not destroy it.
    pub fn load_or_default(path: &Path, limits: Limits) -> RuleStore {
        match RuleStore::load(path, limits) {
            Ok(store) => store,
            Err(err) => {
                warn!("{}, starting with an empty rule store", err);
                if matches!(err, StoreError::Corrupt { .. } | StoreError::UnsupportedVersion { .. }) {
                    let backup = corrupt_path(path);
                    match fs::rename(path, &backup) {
                        Ok(()) => warn!("moved unreadable rule store to {}", backup.display()),
                        Err(err) => warn!("failed to move {} aside: {}", path.display(), err),
                    }
                }
                RuleStore::empty_at(path, limits)
            },
        }
    }

    // Two stored keys can collapse into one after normalization. The most
    // recently saved rule wins.
    fn merge_loaded(&mut self, key: MerchantKey, rule: Rule) {
        match self.rules.get(&key) {
            Some(existing) if existing.updated_at > rule.updated_at => {
                debug!("keeping newer rule for {}", key);
            },
            _ => {
                self.rules.insert(key, rule);
            },
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn lookup(&self, key: &MerchantKey) -> Option<&str> {
        self.rules.get(key).map(|rule| rule.category.as_str())
    }

    pub fn rule(&self, key: &MerchantKey) -> Option<&Rule> {
        self.rules.get(key)
    }

    /// Sets the category for `key`, returning the one it replaced.
    pub fn upsert(&mut self, key: MerchantKey, category: impl Into<String>) -> Option<String> {
        let category = category.into();
        let now = Utc::now();

        match self.rules.get_mut(&key) {
            Some(rule) => {
                let previous = std::mem::replace(&mut rule.category, category);
                rule.updated_at = now;
                Some(previous)
            },
            None => {
                self.rules.insert(
                    key,
                    Rule {
                        category,
                        hits: 0,
                        updated_at: now,
                    },
                );
                None
            },
        }
    }

    pub fn record_hit(&mut self, key: &MerchantKey) {
        if let Some(rule) = self.rules.get_mut(key) {
            rule.hits += 1;
        }
    }

    /// Rules whose key shares a prefix with `key` and where one key contains the
    /// other. At most one suggestion per category.
    pub fn suggest(&self, key: &MerchantKey) -> Vec<(&MerchantKey, &Rule)> {
        let prefix = key.prefix(SUGGESTION_PREFIX);
        let mut seen = BTreeSet::new();

        self.rules
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|&(candidate, _)| candidate.as_str().starts_with(prefix))
            .filter(|&(candidate, _)| candidate != key)
            .filter(|&(candidate, _)| candidate.as_str().contains(key.as_str()) || key.as_str().contains(candidate.as_str()))
            .filter(|&(_, rule)| seen.insert(rule.category.as_str()))
            .take(MAX_SUGGESTIONS)
            .collect()
    }

    /// Every category some rule points to.
    pub fn categories(&self) -> BTreeSet<&str> {
        self.rules.values().map(|rule| rule.category.as_str()).collect()
    }

    pub fn record_decision(&mut self, entry: HistoryEntry) {
        self.history.push_back(entry);
        self.trim_history();
    }

    fn trim_history(&mut self) {
        while self.history.len() > self.limits.max_history {
            self.history.pop_front();
        }
    }

    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MerchantKey, &Rule)> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    // Least used first, then oldest.
    fn evict_overflow(&mut self) {
        let overflow = self.rules.len().saturating_sub(self.limits.max_rules);
        if overflow == 0 {
            return;
        }

        let mut ranked: Vec<(&MerchantKey, &Rule)> = self.rules.iter().collect();
        ranked.sort_by_key(|(_, rule)| (rule.hits, rule.updated_at));
        let evicted: Vec<MerchantKey> = ranked.into_iter().take(overflow).map(|(key, _)| key.clone()).collect();

        for key in &evicted {
            self.rules.remove(key);
        }
        warn!("rule store over capacity, evicted {} least used rules", evicted.len());
    }

    /// Writes the store to its file, replacing the previous version atomically.
    pub fn save(&mut self) -> Result<(), StoreError> {
        self.evict_overflow();

        let Some(path) = self.path.clone() else {
            debug!("in-memory rule store, nothing to save");
            return Ok(());
        };

        let file = StoreFileRef {
            version: FORMAT_VERSION,
            saved_at: Utc::now(),
            rules: self.rules.iter().map(|(key, rule)| (key.as_str(), rule)).collect(),
            history: &self.history,
        };

        write_atomic(&path, |writer| serde_json::to_writer_pretty(writer, &file).map_err(io::Error::from))
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;

        info!("saved {} rules to {}", self.rules.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::*;

    fn key(description: &str) -> MerchantKey {
        MerchantKey::normalize(description).unwrap()
    }

    fn history_entry(description: &str, category: &str) -> HistoryEntry {
        HistoryEntry {
            key: key(description).to_string(),
            description: description.to_string(),
            category: category.to_string(),
            amount: dec!(-1),
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            origin: Origin::Manual,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_upsert_and_lookup() {
        let mut store = RuleStore::new(Limits::default());

        assert_eq!(store.lookup(&key("Starbucks")), None);
        assert_eq!(store.upsert(key("Starbucks"), "Dining"), None);
        assert_eq!(store.lookup(&key("STARBUCKS #0001")), Some("Dining"));

        assert_eq!(store.upsert(key("starbucks"), "Coffee"), Some("Dining".to_string()));
        assert_eq!(store.lookup(&key("Starbucks")), Some("Coffee"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_upsert_keeps_hits() {
        let mut store = RuleStore::new(Limits::default());
        store.upsert(key("Shell"), "Transport");
        store.record_hit(&key("Shell"));
        store.record_hit(&key("Shell"));
        store.upsert(key("Shell"), "Car");

        let rule = store.rule(&key("Shell")).unwrap();
        assert_eq!(rule.hits, 2);
        assert_eq!(rule.category, "Car");
    }

    #[test]
    fn test_save_and_load_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("rules.json");

        let mut store = RuleStore::load(&path, Limits::default())?;
        assert!(store.is_empty());
        store.upsert(key("Starbucks"), "Dining");
        store.upsert(key("Shell Station"), "Transport");
        store.upsert(key("美团外卖"), "餐饮");
        store.record_hit(&key("Shell Station"));
        store.record_decision(history_entry("Starbucks", "Dining"));
        store.save()?;

        let loaded = RuleStore::load(&path, Limits::default())?;
        let expected: Vec<(&MerchantKey, &Rule)> = store.iter().collect();
        let actual: Vec<(&MerchantKey, &Rule)> = loaded.iter().collect();
        assert_eq!(actual, expected);
        assert_eq!(loaded.history().count(), 1);

        Ok(())
    }

    #[test]
    fn test_missing_file_is_empty() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = RuleStore::load(&dir.path().join("rules.json"), Limits::default())?;

        assert!(store.is_empty());
        assert_eq!(store.path(), Some(dir.path().join("rules.json").as_path()));

        Ok(())
    }

    #[test]
    fn test_corrupt_file_recovers_as_empty() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("rules.json");
        fs::write(&path, "{\"version\": 1, \"rules\": [")?;

        assert!(matches!(
            RuleStore::load(&path, Limits::default()),
            Err(StoreError::Corrupt { .. })
        ));

        let mut store = RuleStore::load_or_default(&path, Limits::default());
        assert!(store.is_empty());

        // The recovered store still writes back to the same place.
        store.upsert(key("Shell"), "Transport");
        store.save()?;
        assert_eq!(RuleStore::load(&path, Limits::default())?.len(), 1);

        Ok(())
    }

    #[test]
    fn test_corrupt_file_is_kept_aside() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("rules.json");
        let broken = "{\"version\": 1, \"rules\": {\"starbucks\": ";
        fs::write(&path, broken)?;

        let mut store = RuleStore::load_or_default(&path, Limits::default());
        store.upsert(key("Shell"), "Transport");
        store.save()?;

        assert_eq!(fs::read_to_string(dir.path().join("rules.json.corrupt"))?, broken);
        assert_eq!(RuleStore::load(&path, Limits::default())?.lookup(&key("shell")), Some("Transport"));

        Ok(())
    }

    #[test]
    fn test_future_version_is_kept_aside() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("rules.json");
        fs::write(&path, r#"{"version": 7, "rules": {}}"#)?;

        let store = RuleStore::load_or_default(&path, Limits::default());

        assert!(store.is_empty());
        assert!(!path.exists());
        assert!(dir.path().join("rules.json.corrupt").exists());

        Ok(())
    }

    #[test]
    fn test_future_version_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("rules.json");
        fs::write(&path, r#"{"version": 7, "rules": {}}"#)?;

        assert!(matches!(
            RuleStore::load(&path, Limits::default()),
            Err(StoreError::UnsupportedVersion { version: 7, .. })
        ));

        Ok(())
    }

    #[test]
    fn test_load_renormalizes_and_prefers_newest() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("rules.json");
        fs::write(
            &path,
            r##"{
                "version": 1,
                "rules": {
                    "STARBUCKS #1234": { "category": "Coffee", "hits": 9, "updated_at": "2024-01-01T00:00:00Z" },
                    "starbucks": { "category": "Dining", "hits": 1, "updated_at": "2024-06-01T00:00:00Z" },
                    "Shell": { "category": "Transport", "updated_at": "2023-01-01T00:00:00Z" },
                    "#99999": { "category": "Nothing", "updated_at": "2023-01-01T00:00:00Z" }
                }
            }"##,
        )?;

        let store = RuleStore::load(&path, Limits::default())?;
        assert_eq!(store.len(), 2);
        assert_eq!(store.lookup(&key("starbucks")), Some("Dining"));
        assert_eq!(store.lookup(&key("shell")), Some("Transport"));
        assert_eq!(store.rule(&key("shell")).unwrap().hits, 0);

        Ok(())
    }

    #[test]
    fn test_suggest_similar_keys() {
        let mut store = RuleStore::new(Limits::default());
        store.upsert(key("Starbucks"), "Dining");
        store.upsert(key("Starbucks Reserve"), "Dining");
        store.upsert(key("Star Market"), "Groceries");
        store.upsert(key("Shell"), "Transport");

        let suggestions: Vec<(String, String)> = store
            .suggest(&key("Starbucks Airport"))
            .into_iter()
            .map(|(key, rule)| (key.to_string(), rule.category.clone()))
            .collect();

        assert_eq!(suggestions, vec![("starbucks".to_string(), "Dining".to_string())]);
        assert!(store.suggest(&key("Walmart")).is_empty());
    }

    #[test]
    fn test_categories() {
        let mut store = RuleStore::new(Limits::default());
        store.upsert(key("a shop"), "Shopping");
        store.upsert(key("b shop"), "Shopping");
        store.upsert(key("cafe"), "Dining");

        assert_eq!(store.categories().into_iter().collect::<Vec<_>>(), vec!["Dining", "Shopping"]);
    }

    #[test]
    fn test_capacity_evicts_least_used() -> Result<()> {
        let limits = Limits {
            max_rules: 2,
            max_history: 1,
        };
        let mut store = RuleStore::new(limits);
        store.upsert(key("alpha"), "A");
        store.upsert(key("beta"), "B");
        store.upsert(key("gamma"), "C");
        store.record_hit(&key("alpha"));
        store.record_hit(&key("gamma"));
        store.save()?;

        assert_eq!(store.len(), 2);
        assert_eq!(store.lookup(&key("beta")), None);

        store.record_decision(history_entry("alpha", "A"));
        store.record_decision(history_entry("gamma", "C"));
        let history: Vec<&str> = store.history().map(|entry| entry.category.as_str()).collect();
        assert_eq!(history, vec!["C"]);

        Ok(())
    }

    #[test]
    fn test_save_in_memory_is_noop() -> Result<()> {
        let mut store = RuleStore::new(Limits::default());
        store.upsert(key("alpha"), "A");
        store.save()?;
        assert_eq!(store.path(), None);

        Ok(())
    }
}

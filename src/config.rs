use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_FILE: &str = "billsort.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid config {path}: {source}")]
    Invalid { path: PathBuf, source: serde_json::Error },
}

/// Run configuration. Every section falls back to its defaults, so a config
/// file only needs the values it changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub files: FileConfig,
    pub limits: Limits,
    pub categories: CategoryConfig,
    pub columns: ColumnConfig,
    pub display: DisplayConfig,
    pub integration: Option<IntegrationConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub input: PathBuf,
    pub rules: PathBuf,
    pub output_dir: PathBuf,
    pub output_prefix: String,
}

impl Default for FileConfig {
    fn default() -> Self {
        FileConfig {
            input: PathBuf::from("transactions.csv"),
            rules: PathBuf::from("rules.json"),
            output_dir: PathBuf::from("."),
            output_prefix: "categorized".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_rules: usize,
    pub max_history: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_rules: 50_000,
            max_history: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryConfig {
    /// Always offered in the menu, before anything learned.
    pub base: Vec<String>,
    /// Transaction-type substring to category, checked before the learned rules.
    pub type_rules: BTreeMap<String, String>,
    /// Label written to the `Source` column of the export. When empty, the
    /// user picks one of `sources` at the start of the run.
    pub source: String,
    pub sources: Vec<String>,
    /// People a transaction can be attributed to, written to the `Person`
    /// column. Empty turns attribution off.
    pub people: Vec<String>,
}

impl Default for CategoryConfig {
    fn default() -> Self {
        let base = [
            "Dining",
            "Groceries",
            "Transport",
            "Housing",
            "Utilities",
            "Shopping",
            "Entertainment",
            "Health",
            "Education",
            "Travel",
            "Gifts",
            "Salary",
            "Investment",
            "Other",
        ];

        // WeChat marks person-to-person money with these transaction types.
        let type_rules = ["转账", "微信红包", "收付款"]
            .iter()
            .map(|kind| (kind.to_string(), "Gifts".to_string()))
            .collect();

        CategoryConfig {
            base: base.iter().map(|name| name.to_string()).collect(),
            type_rules,
            source: String::new(),
            sources: names(&["WeChat", "Alipay", "Bank", "Cash", "Other"]),
            people: names(&["Me", "Partner", "Household"]),
        }
    }
}

/// Accepted header names for each logical column, compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnConfig {
    pub date: Vec<String>,
    pub description: Vec<String>,
    pub amount: Vec<String>,
    pub category: Vec<String>,
    pub kind: Vec<String>,
    pub direction: Vec<String>,
    pub detail: Vec<String>,
}

fn names(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

impl Default for ColumnConfig {
    fn default() -> Self {
        ColumnConfig {
            date: names(&["date", "transaction date", "posted date", "交易时间"]),
            description: names(&["description", "counterparty", "merchant", "payee", "交易对方"]),
            amount: names(&["amount", "金额(元)", "金额"]),
            category: names(&["category", "分类"]),
            kind: names(&["type", "transaction type", "交易类型"]),
            direction: names(&["direction", "debit/credit", "收/支"]),
            detail: names(&["detail", "memo", "product", "商品"]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub preview_count: usize,
    pub progress_interval: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        DisplayConfig {
            preview_count: 5,
            progress_interval: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationConfig {
    pub endpoint: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

impl Config {
    pub fn from_json(json: &str) -> Result<Config, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn read(path: &Path) -> Result<Config, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Config::from_json(&content).map_err(|source| ConfigError::Invalid {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reads `billsort.json` from `dir`. A missing file gives the defaults, so
    /// does a broken one, with a warning.
    pub fn load(dir: &Path) -> Config {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Config::default();
        }

        match Config::read(&path) {
            Ok(config) => {
                info!("loaded config from {}", path.display());
                config
            },
            Err(err) => {
                warn!("{}, using defaults", err);
                Config::default()
            },
        }
    }

    pub fn input_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.files.input)
    }

    pub fn rules_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.files.rules)
    }

    pub fn output_dir(&self, dir: &Path) -> PathBuf {
        dir.join(&self.files.output_dir)
    }
}

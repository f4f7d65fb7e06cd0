use anyhow::Result;
use jsonschema::{validator_for, Validator};
use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    Delete,
    Truncate,
    Persist,
    Memory,
    #[default]
    Wal,
    Off,
}

impl JournalMode {
    pub fn as_pragma(self) -> &'static str {
        match self {
            JournalMode::Delete => "DELETE",
            JournalMode::Truncate => "TRUNCATE",
            JournalMode::Persist => "PERSIST",
            JournalMode::Memory => "MEMORY",
            JournalMode::Wal => "WAL",
            JournalMode::Off => "OFF",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s.trim().to_ascii_lowercase().as_str() {
            "delete" => JournalMode::Delete,
            "truncate" => JournalMode::Truncate,
            "persist" => JournalMode::Persist,
            "memory" => JournalMode::Memory,
            "wal" => JournalMode::Wal,
            "off" => JournalMode::Off,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Synchronous {
    Off,
    #[default]
    Normal,
    Full,
    Extra,
}

impl Synchronous {
    pub fn as_pragma(self) -> &'static str {
        match self {
            Synchronous::Off => "OFF",
            Synchronous::Normal => "NORMAL",
            Synchronous::Full => "FULL",
            Synchronous::Extra => "EXTRA",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s.trim().to_ascii_lowercase().as_str() {
            "off" => Synchronous::Off,
            "normal" => Synchronous::Normal,
            "full" => Synchronous::Full,
            "extra" => Synchronous::Extra,
            _ => return None,
        })
    }
}

/// Connection settings for a store file.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Keep the SQLite handle open between operations. When false every
    /// operation opens and closes its own connection.
    pub keep_alive: bool,
    /// How long a statement waits on a locked database, in milliseconds.
    pub busy_timeout_ms: u64,
    pub journal_mode: JournalMode,
    pub synchronous: Synchronous,
    /// Enforce `execution_id` references to `executions(id)`.
    pub foreign_keys: bool,
    /// SQLite `cache_size`; negative values are KiB.
    pub cache_pages: Option<i64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            keep_alive: true,
            busy_timeout_ms: 5000,
            journal_mode: JournalMode::Wal,
            synchronous: Synchronous::Normal,
            foreign_keys: true,
            cache_pages: None,
        }
    }
}

pub const ENV_KEEP_ALIVE: &str = "RUNLOG_KEEP_ALIVE";
pub const ENV_BUSY_MS: &str = "RUNLOG_SQLITE_BUSY_MS";
pub const ENV_JOURNAL: &str = "RUNLOG_SQLITE_JOURNAL";
pub const ENV_SYNC: &str = "RUNLOG_SQLITE_SYNC";
pub const ENV_FOREIGN_KEYS: &str = "RUNLOG_SQLITE_FOREIGN_KEYS";
pub const ENV_CACHE_PAGES: &str = "RUNLOG_SQLITE_CACHE_PAGES";

/// Every environment variable [`StoreConfig::with_env_overrides`] reads.
pub const ENV_KEYS: &[&str] = &[
    ENV_KEEP_ALIVE,
    ENV_BUSY_MS,
    ENV_JOURNAL,
    ENV_SYNC,
    ENV_FOREIGN_KEYS,
    ENV_CACHE_PAGES,
];

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .and_then(|value| match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "on" | "yes" => Some(true),
            "0" | "false" | "off" | "no" => Some(false),
            _ => None,
        })
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl StoreConfig {
    /// Defaults overlaid with `RUNLOG_*` environment overrides.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_flag(ENV_KEEP_ALIVE) {
            self.keep_alive = v;
        }
        if let Some(ms) = env_parse::<u64>(ENV_BUSY_MS) {
            self.busy_timeout_ms = ms;
        }
        if let Some(mode) = std::env::var(ENV_JOURNAL)
            .ok()
            .and_then(|s| JournalMode::parse(&s))
        {
            self.journal_mode = mode;
        }
        if let Some(sync) = std::env::var(ENV_SYNC)
            .ok()
            .and_then(|s| Synchronous::parse(&s))
        {
            self.synchronous = sync;
        }
        if let Some(v) = env_flag(ENV_FOREIGN_KEYS) {
            self.foreign_keys = v;
        }
        if let Some(pages) = env_parse::<i64>(ENV_CACHE_PAGES) {
            self.cache_pages = Some(pages);
        }
        self
    }
}

static CONFIG_SCHEMA: Lazy<Validator> = Lazy::new(|| {
    let schema = schemars::schema_for!(StoreConfig);
    let schema_value = serde_json::to_value(&schema).expect("schema value");
    validator_for(&schema_value).expect("valid schema")
});

/// Returns the JSON schema describing [`StoreConfig`].
///
/// # Panics
///
/// Panics if schema generation fails; this indicates a programming error.
pub fn config_schema_json() -> serde_json::Value {
    let schema = schemars::schema_for!(StoreConfig);
    serde_json::to_value(&schema).expect("schema json")
}

/// Parse and validate a TOML config, then apply environment overrides.
pub fn parse_config(content: &str) -> Result<StoreConfig> {
    let raw: toml::Table = toml::from_str(content)?;
    let json_value = serde_json::to_value(&raw)?;
    let validation_errors: Vec<_> = CONFIG_SCHEMA
        .iter_errors(&json_value)
        .map(|e| e.to_string())
        .collect();
    if !validation_errors.is_empty() {
        return Err(anyhow::anyhow!(validation_errors.join(", ")));
    }
    let cfg: StoreConfig = toml::from_str(content)?;
    Ok(cfg.with_env_overrides())
}

pub fn load_config(path: &str) -> Result<StoreConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

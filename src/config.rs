//! Configuration set handling.
//!
//! dbman is driven by a flat key-value configuration set. Keys are matched
//! case-insensitively (`Repo.URI` and `repo.uri` are the same key), values
//! are always strings. The set can be saved to and loaded from a JSON file
//! and overridden from `OX_DBM_*` environment variables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::{DbmanError, Result};

/// The application version the database should be at
pub const APP_VERSION: &str = "AppVersion";
/// Root of the release content (http(s) URI or filesystem path)
pub const REPO_URI: &str = "Repo.URI";
pub const REPO_USERNAME: &str = "Repo.Username";
pub const REPO_PASSWORD: &str = "Repo.Password";
/// Provider name: `_name` for a native provider, otherwise a plugin
pub const DB_PROVIDER: &str = "Db.Provider";
pub const DB_NAME: &str = "Db.Name";
pub const DB_HOST: &str = "Db.Host";
pub const DB_PORT: &str = "Db.Port";
pub const DB_USERNAME: &str = "Db.Username";
pub const DB_PASSWORD: &str = "Db.Password";
pub const DB_ADMIN_USERNAME: &str = "Db.AdminUsername";
pub const DB_ADMIN_PASSWORD: &str = "Db.AdminPassword";
/// Directory holding `dbman-db-*` plugin executables
pub const PLUGINS_DIR: &str = "Plugins";

/// Prefix of environment variables overriding configuration keys
pub const ENV_PREFIX: &str = "OX_DBM_";

/// Keys known to dbman, used for environment binding
pub const STANDARD_KEYS: &[&str] = &[
    APP_VERSION,
    REPO_URI,
    REPO_USERNAME,
    REPO_PASSWORD,
    DB_PROVIDER,
    DB_NAME,
    DB_HOST,
    DB_PORT,
    DB_USERNAME,
    DB_PASSWORD,
    DB_ADMIN_USERNAME,
    DB_ADMIN_PASSWORD,
    PLUGINS_DIR,
];

/// Flat, case-insensitive configuration set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct Config {
    values: BTreeMap<String, String>,
}

impl Config {
    /// Create an empty configuration set
    pub fn empty() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }

    /// Get a value, or an empty string if the key is not set
    pub fn get(&self, key: &str) -> &str {
        self.values
            .get(&key.to_lowercase())
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Get a value only if it is set and non-empty
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        let value = self.get(key);
        (!value.is_empty()).then_some(value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(&key.to_lowercase())
    }

    /// Set a value, warning when the key is not one of the standard keys
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        if !STANDARD_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key)) {
            tracing::warn!(
                "The key '{}' is not standard, I am adding it to the configuration set",
                key
            );
        }
        self.values.insert(key.to_lowercase(), value.into());
    }

    /// Builder-style `set`
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Iterate over `(lowercase key, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Load a configuration set from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).map_err(|e| {
            DbmanError::config(format!(
                "Failed to read configuration from {:?}: {}",
                path.as_ref(),
                e
            ))
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            DbmanError::config(format!("Failed to parse configuration JSON: {}", e))
        })?;
        Ok(config)
    }

    /// Save the configuration set to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).map_err(|e| {
            DbmanError::config(format!(
                "Failed to write configuration to {:?}: {}",
                path.as_ref(),
                e
            ))
        })?;
        Ok(())
    }

    /// Override standard keys from `OX_DBM_*` environment variables
    /// (`Repo.URI` is read from `OX_DBM_REPO_URI`)
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(std::env::vars());
    }

    /// Same as `apply_env_overrides` over an explicit variable list
    pub fn apply_overrides_from<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let env: BTreeMap<String, String> = vars.into_iter().collect();
        for key in STANDARD_KEYS {
            let var = format!("{}{}", ENV_PREFIX, key.replace('.', "_").to_uppercase());
            if let Some(value) = env.get(&var) {
                tracing::debug!("Configuration key '{}' overridden by {}", key, var);
                self.values.insert(key.to_lowercase(), value.clone());
            }
        }
    }

    /// Serialize the whole set as the JSON payload sent to a provider's setup
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a configuration set received as JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Render `key = value` lines, hiding anything that looks like a password
    pub fn masked(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.values {
            if key.contains("password") {
                out.push_str(&format!("{} = ???????\n", key));
            } else {
                out.push_str(&format!("{} = {}\n", key, value));
            }
        }
        out
    }
}

impl Default for Config {
    fn default() -> Self {
        let values = [
            (APP_VERSION, "0.0.1"),
            (REPO_URI, ""),
            (REPO_USERNAME, ""),
            (REPO_PASSWORD, ""),
            (DB_PROVIDER, "_memory"),
            (DB_NAME, "dbman"),
            (DB_HOST, "localhost"),
            (DB_PORT, "5432"),
            (DB_USERNAME, "dbman"),
            (DB_PASSWORD, ""),
            (DB_ADMIN_USERNAME, "postgres"),
            (DB_ADMIN_PASSWORD, ""),
            (PLUGINS_DIR, ""),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_lowercase(), v.to_string()))
        .collect();
        Self { values }
    }
}

impl From<BTreeMap<String, String>> for Config {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self {
            values: map
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect(),
        }
    }
}

impl From<Config> for BTreeMap<String, String> {
    fn from(config: Config) -> Self {
        config.values
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

//! Provider selection from `Db.Provider`
//!
//! Names starting with `_` select a provider built into dbman. Any other
//! name `x` launches the plugin executable `dbman-db-x` from the `Plugins`
//! folder, or from the folder of the running executable when unset.

use std::path::PathBuf;

use super::DatabaseProvider;
use super::host::{PluginClient, default_plugins_dir};
use super::memory::MemoryProvider;
use super::plugin::PluginDecorator;
use crate::config::{Config, DB_PROVIDER, PLUGINS_DIR};
use crate::error::{DbmanError, Result};

/// Built-in providers, without the leading `_`
pub const NATIVE_PROVIDERS: &[&str] = &["memory"];

pub fn load_provider(config: &Config) -> Result<Box<dyn DatabaseProvider>> {
    let name = config.get(DB_PROVIDER).trim();
    if name.is_empty() {
        return Err(DbmanError::config("Db.Provider is not defined"));
    }
    if let Some(native) = name.strip_prefix('_') {
        tracing::debug!("Using native provider '{}'", native);
        return match native {
            "memory" => Ok(Box::new(PluginDecorator::new(MemoryProvider::default()))),
            other => Err(DbmanError::config(format!(
                "'{}' is not a native provider, available: {}",
                other,
                NATIVE_PROVIDERS.join(", ")
            ))),
        };
    }
    let dir = config
        .get_non_empty(PLUGINS_DIR)
        .map(PathBuf::from)
        .unwrap_or_else(default_plugins_dir);
    Ok(Box::new(PluginClient::launch(name, &dir)?))
}

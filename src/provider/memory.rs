//! In-memory reference provider
//!
//! Keeps the version ledger and the list of applied scripts in memory. It
//! serves as the native `_memory` provider and, through the
//! `dbman-db-memory` binary, as an out-of-process plugin.
//!
//! A script whose content starts with `FAIL` fails. Every query answers
//! with the version history.

use std::fmt::Write as _;

use anyhow::bail;

use super::plugin::{DatabasePlugin, PluginLog};
use super::types::{ServerInfo, Table, VersionEntry};
use crate::config::{Config, DB_NAME};
use crate::manifest::{Command, Query};

#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    config: Option<Config>,
    ledger: Vec<VersionEntry>,
    /// `command/script` names in the order they were applied
    applied: Vec<String>,
}

impl MemoryProvider {
    pub fn ledger(&self) -> &[VersionEntry] {
        &self.ledger
    }

    pub fn applied(&self) -> &[String] {
        &self.applied
    }

    fn database(&self) -> &str {
        self.config
            .as_ref()
            .and_then(|c| c.get_non_empty(DB_NAME))
            .unwrap_or("memory")
    }
}

impl DatabasePlugin for MemoryProvider {
    fn setup(&mut self, config: Config) -> anyhow::Result<()> {
        tracing::debug!("memory provider configured for database '{}'", config.get(DB_NAME));
        self.config = Some(config);
        Ok(())
    }

    fn get_version(&mut self) -> anyhow::Result<Option<VersionEntry>> {
        Ok(self.ledger.iter().max_by_key(|v| v.time).cloned())
    }

    fn set_version(&mut self, version: VersionEntry) -> anyhow::Result<()> {
        if version.app_version.is_empty() {
            bail!("a version entry needs an application version");
        }
        self.ledger.push(version);
        Ok(())
    }

    fn run_command(&mut self, command: &Command, log: &mut PluginLog) -> anyhow::Result<()> {
        let mode = command.mode;
        let _ = writeln!(
            log,
            "? I am connecting to {} as {}",
            if mode.use_db { self.database() } else { "the server" },
            if mode.as_admin { "admin" } else { "user" },
        );

        let mut applied = Vec::new();
        for script in &command.scripts {
            let id = format!("{}/{}", command.name, script.name);
            let _ = writeln!(log, "? I am executing script '{}'", script.name);
            if script.content.trim_start().starts_with("FAIL") {
                if mode.transactional {
                    let _ = writeln!(log, "!!! rolling back command '{}'", command.name);
                } else {
                    self.applied.append(&mut applied);
                }
                return Err(anyhow::anyhow!("{}", script.content.trim())
                    .context(format!("script '{}' failed", script.name)));
            }
            applied.push(id);
        }
        self.applied.append(&mut applied);
        Ok(())
    }

    fn run_query(&mut self, query: &Query) -> anyhow::Result<Table> {
        tracing::debug!("memory provider answering query '{}'", query.name);
        let mut table = Table::new(
            ["appVersion", "dbVersion", "description", "source", "time"]
                .iter()
                .map(|h| h.to_string())
                .collect(),
        );
        for entry in &self.ledger {
            table.push_row(vec![
                entry.app_version.clone(),
                entry.db_version.clone(),
                entry.description.clone(),
                entry.source.clone(),
                entry.time.to_rfc3339(),
            ]);
        }
        Ok(table)
    }

    fn get_info(&mut self) -> anyhow::Result<ServerInfo> {
        Ok(ServerInfo {
            database: format!("dbman memory provider {}", env!("CARGO_PKG_VERSION")),
            operating_system: std::env::consts::OS.to_string(),
            compiler: "rustc".to_string(),
            processor_bits: usize::BITS.to_string(),
        })
    }
}

//! Typed provider interface for plugin authors
//!
//! Implement [`DatabasePlugin`] with ordinary Rust types and wrap it in a
//! [`PluginDecorator`]. The decorator decodes the JSON arguments, calls the
//! plugin and packs results, log lines and errors into envelopes.

use std::fmt;

use super::DatabaseProvider;
use super::envelope::{Parameter, RESULT};
use super::types::{ServerInfo, Table, VersionEntry};
use crate::config::Config;
use crate::error::Result;
use crate::manifest::{Command, Query};

/// Free text log lines produced while running a command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginLog {
    lines: Vec<String>,
}

impl PluginLog {
    pub fn line(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl fmt::Write for PluginLog {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.lines.extend(s.lines().map(str::to_string));
        Ok(())
    }
}

/// A database provider written against typed values
pub trait DatabasePlugin: Send {
    fn setup(&mut self, config: Config) -> anyhow::Result<()>;

    /// The latest ledger entry, `None` on a database never deployed
    fn get_version(&mut self) -> anyhow::Result<Option<VersionEntry>>;

    fn set_version(&mut self, version: VersionEntry) -> anyhow::Result<()>;

    /// Run every script of `command`. Log lines written to `log` reach the
    /// caller even when the command fails.
    fn run_command(&mut self, command: &Command, log: &mut PluginLog) -> anyhow::Result<()>;

    fn run_query(&mut self, query: &Query) -> anyhow::Result<Table>;

    fn get_info(&mut self) -> anyhow::Result<ServerInfo>;
}

/// Adapts a [`DatabasePlugin`] to the string [`DatabaseProvider`] contract.
///
/// Every method returns `Ok`; undecodable arguments and plugin failures are
/// reported in the envelope.
pub struct PluginDecorator<P> {
    plugin: P,
}

impl<P: DatabasePlugin> PluginDecorator<P> {
    pub fn new(plugin: P) -> Self {
        Self { plugin }
    }

    pub fn inner(&self) -> &P {
        &self.plugin
    }
}

fn fail(mut output: Parameter, err: impl fmt::Display) -> Result<String> {
    output.set_error(err.to_string());
    Ok(output.to_json())
}

/// `{:#}` keeps the whole anyhow context chain on one line
fn fail_chain(output: Parameter, err: anyhow::Error) -> Result<String> {
    fail(output, format!("{:#}", err))
}

impl<P: DatabasePlugin> DatabaseProvider for PluginDecorator<P> {
    fn setup(&mut self, config: &str) -> Result<String> {
        let output = Parameter::new();
        let config = match Config::from_json(config) {
            Ok(config) => config,
            Err(e) => return fail(output, e),
        };
        match self.plugin.setup(config) {
            Ok(()) => Ok(output.to_json()),
            Err(e) => fail_chain(output, e),
        }
    }

    fn get_version(&mut self) -> Result<String> {
        let mut output = Parameter::new();
        match self.plugin.get_version() {
            Ok(Some(version)) => output.set(RESULT, &version)?,
            Ok(None) => output.set(RESULT, &serde_json::json!({}))?,
            Err(e) => return fail_chain(output, e),
        }
        Ok(output.to_json())
    }

    fn set_version(&mut self, version: &str) -> Result<String> {
        let mut output = Parameter::new();
        let version: VersionEntry = match serde_json::from_str(version) {
            Ok(v) => v,
            Err(e) => return fail(output, e),
        };
        output.set(RESULT, &version)?;
        match self.plugin.set_version(version) {
            Ok(()) => Ok(output.to_json()),
            Err(e) => fail_chain(output, e),
        }
    }

    fn run_command(&mut self, command: &str) -> Result<String> {
        let mut output = Parameter::new();
        let command = match Command::from_json(command) {
            Ok(c) => c,
            Err(e) => return fail(output, e),
        };
        let mut log = PluginLog::default();
        let result = self.plugin.run_command(&command, &mut log);
        for line in log.lines() {
            output.log(line);
        }
        match result {
            Ok(()) => Ok(output.to_json()),
            Err(e) => fail_chain(output, e),
        }
    }

    fn run_query(&mut self, query: &str) -> Result<String> {
        let mut output = Parameter::new();
        let query = match Query::from_json(query) {
            Ok(q) => q,
            Err(e) => return fail(output, e),
        };
        match self.plugin.run_query(&query) {
            Ok(table) => {
                output.set(RESULT, &table)?;
                Ok(output.to_json())
            }
            Err(e) => fail_chain(output, e),
        }
    }

    fn get_info(&mut self) -> Result<String> {
        let mut output = Parameter::new();
        match self.plugin.get_info() {
            Ok(info) => {
                output.set(RESULT, &info)?;
                Ok(output.to_json())
            }
            Err(e) => fail_chain(output, e),
        }
    }
}

//! Database providers
//!
//! dbman never talks to a database directly. Every database technology is a
//! provider implementing six operations, each taking and returning JSON
//! strings so that host and provider can be compiled separately:
//!
//! | Operation     | Argument       | `result` of the envelope |
//! |---------------|----------------|--------------------------|
//! | `setup`       | configuration  | none                     |
//! | `getVersion`  | none           | latest ledger entry, or empty |
//! | `setVersion`  | ledger entry   | the stored entry         |
//! | `runCommand`  | command        | none, log lines          |
//! | `runQuery`    | query          | table                    |
//! | `getInfo`     | none           | server information       |
//!
//! An `Err` from these methods is a transport failure (the provider could
//! not be reached or answered garbage). Backend failures such as SQL errors
//! come back as `Ok` with an envelope whose `error` is set.
//!
//! Within a transactional command a provider runs all scripts in one
//! transaction and rolls back on any failure. Within a non-transactional
//! command the scripts that already ran stay applied when a later one fails.

pub mod envelope;
pub mod host;
pub mod loader;
pub mod memory;
pub mod plugin;
pub mod rpc;
pub mod serve;
pub mod types;

use crate::error::Result;

pub use envelope::Parameter;
pub use host::PluginClient;
pub use loader::load_provider;
pub use memory::MemoryProvider;
pub use plugin::{DatabasePlugin, PluginDecorator, PluginLog};
pub use serve::serve_plugin;
pub use types::{ServerInfo, Table, VersionEntry};

/// The string contract between dbman and a database provider
pub trait DatabaseProvider: Send {
    fn setup(&mut self, config: &str) -> Result<String>;
    fn get_version(&mut self) -> Result<String>;
    fn set_version(&mut self, version: &str) -> Result<String>;
    fn run_command(&mut self, command: &str) -> Result<String>;
    fn run_query(&mut self, query: &str) -> Result<String>;
    fn get_info(&mut self) -> Result<String>;
}

impl<T: DatabaseProvider + ?Sized> DatabaseProvider for Box<T> {
    fn setup(&mut self, config: &str) -> Result<String> {
        (**self).setup(config)
    }

    fn get_version(&mut self) -> Result<String> {
        (**self).get_version()
    }

    fn set_version(&mut self, version: &str) -> Result<String> {
        (**self).set_version(version)
    }

    fn run_command(&mut self, command: &str) -> Result<String> {
        (**self).run_command(command)
    }

    fn run_query(&mut self, query: &str) -> Result<String> {
        (**self).run_query(query)
    }

    fn get_info(&mut self) -> Result<String> {
        (**self).get_info()
    }
}

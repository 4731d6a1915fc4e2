//! Release manifests
//!
//! Every release in the plan publishes a `manifest.json` describing the
//! commands that can run against the database, the `create` and `deploy`
//! actions, the upgrade phases and the named queries.
//!
//! Manifest entries are *specs*: they name script files but carry no script
//! content. Resolution turns a [`CommandSpec`] into a [`Command`] and a
//! [`QuerySpec`] into a [`Query`], which are what providers receive.
//!
//! ```json
//! {
//!   "dbVersion": "2",
//!   "dbProvider": "pgsql",
//!   "commandsPath": "cmd",
//!   "commands": [
//!     {
//!       "name": "create-db",
//!       "transactional": false,
//!       "asAdmin": true,
//!       "useDb": false,
//!       "scripts": [
//!         { "name": "db", "file": "db.sql",
//!           "vars": [ { "name": "DB_NAME", "fromConf": "Db.Name" } ] }
//!       ]
//!     }
//!   ],
//!   "create": { "commands": ["create-db"] },
//!   "deploy": { "commands": ["deploy-schema"] },
//!   "upgrade": { "prepare": "drop-fx", "alter": "alter-2", "deploy": "deploy-fx" },
//!   "queries": [ { "name": "db-version", "file": "version.sql" } ]
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{DbmanError, Result};

/// A merge variable declared by a script or query.
///
/// Only one source is expected to be populated. When several are, the first
/// non-empty value wins in the order conf, value, input, context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Var {
    /// Placeholder name, merged as `{{name}}`
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Configuration key to read the value from
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub from_conf: String,
    /// Literal value
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub from_value: String,
    /// Name of a caller supplied input parameter
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub from_input: String,
    /// `appVersion`, `dbVersion` or `description` of the release being applied
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub from_context: String,
}

impl Var {
    pub fn from_conf(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            from_conf: key.into(),
            ..Default::default()
        }
    }

    pub fn from_value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            from_value: value.into(),
            ..Default::default()
        }
    }

    pub fn from_input(name: impl Into<String>, param: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            from_input: param.into(),
            ..Default::default()
        }
    }

    pub fn from_context(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            from_context: field.into(),
            ..Default::default()
        }
    }
}

/// A script file reference, before its content has been fetched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptSpec {
    pub name: String,
    pub file: String,
    #[serde(default)]
    pub vars: Vec<Var>,
}

/// A script with its fetched and merged content
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedScript {
    pub name: String,
    pub file: String,
    pub content: String,
}

/// Connection and transaction options shared by specs and resolved commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandMode {
    /// Run all scripts in one transaction, rolled back entirely on failure.
    /// Without it, scripts that already ran stay applied when a later one fails.
    #[serde(default)]
    pub transactional: bool,
    /// Connect with the admin credentials
    #[serde(default)]
    pub as_admin: bool,
    /// Connect to the managed database rather than to the server
    #[serde(default)]
    pub use_db: bool,
}

/// A named batch of scripts run over one connection, as declared in a manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub mode: CommandMode,
    #[serde(default)]
    pub scripts: Vec<ScriptSpec>,
}

/// A command ready to be sent to a provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub mode: CommandMode,
    #[serde(default)]
    pub scripts: Vec<ResolvedScript>,
}

impl Command {
    /// A command that runs no scripts, used to probe the provider connection
    pub fn probe(name: impl Into<String>, mode: CommandMode) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            mode,
            scripts: Vec::new(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A named query as declared in a manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vars: Vec<Var>,
}

/// A query ready to be sent to a provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub content: String,
}

impl Query {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Name and description of a query, for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySummary {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// A list of command names run as a unit (`create`, `deploy`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub commands: Vec<String>,
}

/// The commands run at each upgrade phase. An empty name means "no command".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upgrade {
    #[serde(default)]
    pub description: String,
    /// Retires objects of the installed release
    #[serde(default)]
    pub prepare: String,
    /// Schema delta from the previous release
    #[serde(default)]
    pub alter: String,
    /// Re-creates release specific objects for the final version
    #[serde(default)]
    pub deploy: String,
}

/// The manifest of one release
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub db_version: String,
    #[serde(default)]
    pub description: String,
    /// Folder of command scripts, relative to the release folder
    #[serde(default)]
    pub commands_path: String,
    /// Folder of query scripts, relative to the release folder
    #[serde(default)]
    pub queries_path: String,
    #[serde(default)]
    pub db_provider: String,
    #[serde(default)]
    pub commands: Vec<CommandSpec>,
    #[serde(default)]
    pub create: Action,
    #[serde(default)]
    pub deploy: Action,
    #[serde(default)]
    pub upgrade: Upgrade,
    #[serde(default)]
    pub queries: Vec<QuerySpec>,
}

impl Manifest {
    /// Parse a manifest from its JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            DbmanError::config(format!("the release manifest is not in the right format: {}", e))
        })
    }

    /// Resolve command names to commands, keeping the order of `names`.
    /// Names with no matching command are skipped.
    pub fn get_commands(&self, names: &[String]) -> Vec<&CommandSpec> {
        names
            .iter()
            .flat_map(|name| self.commands.iter().filter(move |c| &c.name == name))
            .collect()
    }

    pub fn get_command(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.iter().find(|c| c.name == name)
    }

    pub fn get_query(&self, name: &str) -> Option<&QuerySpec> {
        self.queries.iter().find(|q| q.name == name)
    }

    /// Queries without file and variable details
    pub fn queries_summary(&self) -> Vec<QuerySummary> {
        self.queries
            .iter()
            .map(|q| QuerySummary {
                name: q.name.clone(),
                description: q.description.clone(),
            })
            .collect()
    }
}

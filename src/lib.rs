//! dbman library
//!
//! Creates, deploys and upgrades databases from a release plan published
//! over http(s) or a local folder. Database access is delegated to
//! providers, built in or launched as plugin processes.

pub mod cli;
pub mod config;
pub mod error;
pub mod manifest;
pub mod merge;
pub mod orchestrator;
pub mod plan;
pub mod process_guard;
pub mod provider;
pub mod source;

// Re-export main types for convenience
pub use config::Config;
pub use error::{DbmanError, ErrorKind, Result};
pub use manifest::{Command, CommandMode, CommandSpec, Manifest, Query, QuerySpec, Var};
pub use merge::{MergeContext, MergeSources, merge};
pub use orchestrator::{DbMan, OperationFailure, OperationResult, Report, RunLog};
pub use plan::{Plan, ReleaseEntry, UpgradeWindow};
pub use process_guard::{ChildRegistry, CommandProcessGroup};
pub use provider::{DatabasePlugin, DatabaseProvider, Parameter, VersionEntry};
pub use source::{ScriptSource, SourceRoot};

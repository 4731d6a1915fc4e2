use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// dbman - database release lifecycle manager
#[derive(Parser)]
#[command(name = "dbman")]
#[command(about = "Creates, deploys and upgrades databases from a published release plan")]
#[command(version)]
pub struct Cli {
    /// Configuration set to load (JSON object of key/value strings).
    ///
    /// Without it the built-in defaults are used. `OX_DBM_*` environment
    /// variables and `--set` are applied on top, in that order.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override a configuration key, e.g. `--set AppVersion=2.0`
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value, global = true)]
    pub overrides: Vec<(String, String)>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the database objects of AppVersion on an empty database
    Create,
    /// Deploy the schema of AppVersion on an empty database and record its version
    Deploy,
    /// Upgrade the database from its installed version to AppVersion
    Upgrade,
    /// Run a query of the AppVersion release
    Query {
        /// Query name as declared in the release manifest
        name: String,
        /// Query input, e.g. `--param schema=public`
        #[arg(short, long = "param", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        params: Vec<(String, String)>,
        /// Output format of the result table
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// Check the content source and the database connection
    Check,
    /// Show the release plan
    Plan,
    /// Show database server information
    Info,
    /// List the queries of the AppVersion release
    Queries,
    /// Show the effective configuration set (passwords masked)
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Csv,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("'{}' is not in KEY=VALUE form", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("'{}' has an empty key", s));
    }
    Ok((key.to_string(), value.to_string()))
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}

impl Commands {
    /// Query inputs as a map, later duplicates winning
    pub fn query_inputs(params: &[(String, String)]) -> BTreeMap<String, String> {
        params.iter().cloned().collect()
    }
}

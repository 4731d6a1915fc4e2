//! dbman - main entry point
//!
//! Builds the configuration set, runs exactly one operation and exits 1 on
//! failure with `kind: message` on stderr.

use std::process::ExitCode;

use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use dbman::cli::{Cli, Commands, OutputFormat};
use dbman::orchestrator::{OperationResult, Report};
use dbman::{Config, DbMan, DbmanError, process_guard};

/// Logs go to stderr so that stdout only carries results
fn init_logger() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> dbman::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            debug!("Loading configuration from {:?}", path);
            Config::load_from_file(path)?
        }
        None => Config::default(),
    };
    config.apply_env_overrides();
    for (key, value) in &cli.overrides {
        config.set(key, value.as_str());
    }
    Ok(config)
}

fn print_report(report: &Report) {
    print!("{}", report.log);
    println!("? elapsed: {:.2?}", report.elapsed);
}

fn finish(result: OperationResult) -> dbman::Result<()> {
    match result {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(failure) => {
            print_report(&failure.report);
            Err(failure.error)
        }
    }
}

fn run(cli: Cli) -> dbman::Result<()> {
    let config = load_config(&cli)?;

    // Commands not needing a database provider
    match &cli.command {
        Commands::Config => {
            print!("{}", config.masked());
            return Ok(());
        }
        Commands::Plan => {
            let source = dbman::ScriptSource::from_config(&config)?;
            println!("{}", serde_json::to_string_pretty(&source.fetch_plan()?)?);
            return Ok(());
        }
        Commands::Queries => {
            let source = dbman::ScriptSource::from_config(&config)?;
            let (_, manifest) = source.fetch_manifest(config.get(dbman::config::APP_VERSION))?;
            println!("{}", serde_json::to_string_pretty(&manifest.queries_summary())?);
            return Ok(());
        }
        _ => {}
    }

    let mut manager = DbMan::from_config(config)?;
    match cli.command {
        Commands::Create => finish(manager.create()),
        Commands::Deploy => finish(manager.deploy()),
        Commands::Upgrade => finish(manager.upgrade()),
        Commands::Query { name, params, format } => {
            let table = manager.query(&name, &Commands::query_inputs(&params))?;
            match format {
                OutputFormat::Json => println!("{}", table.as_json()?),
                OutputFormat::Csv => println!("{}", table.as_csv()),
            }
            Ok(())
        }
        Commands::Check => {
            let results = manager.check();
            for (check, outcome) in &results {
                println!("{}: {}", check, outcome);
            }
            if results.values().any(|outcome| outcome != "OK") {
                return Err(DbmanError::config("the readiness check failed"));
            }
            Ok(())
        }
        Commands::Info => {
            let info = manager.db_info()?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }
        Commands::Config | Commands::Plan | Commands::Queries => Ok(()),
    }
}

fn main() -> ExitCode {
    init_logger();

    // Plugin processes are terminated if we receive SIGINT/SIGTERM/SIGHUP
    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }

    let cli = Cli::parse_args();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", e.kind(), e);
            ExitCode::FAILURE
        }
    }
}

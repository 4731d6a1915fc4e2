// Orchestrator tests against a recording provider
//
// The provider runs in process and keeps its state behind a shared handle,
// so a test can build several DbMan instances (one per AppVersion) over the
// same "database".

mod common;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::bail;

use dbman::config::{APP_VERSION, DB_NAME, DB_PROVIDER, REPO_URI};
use dbman::orchestrator::{CHECK_DATABASE, CHECK_SOURCE};
use dbman::provider::{PluginDecorator, PluginLog, ServerInfo, Table};
use dbman::{Command, Config, DatabasePlugin, DbMan, DbmanError, Query, VersionEntry};

#[derive(Debug, Default)]
struct State {
    /// Names of the commands received, in order
    commands: Vec<String>,
    /// Script bodies received, in order
    scripts: Vec<String>,
    ledger: Vec<VersionEntry>,
    queries: Vec<String>,
    fail_command: Option<String>,
    fail_setup: bool,
    /// No version table yet, as on a database never deployed
    fail_version: bool,
}

#[derive(Clone, Default)]
struct Recorder {
    state: Arc<Mutex<State>>,
}

impl Recorder {
    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }
}

impl DatabasePlugin for Recorder {
    fn setup(&mut self, _config: Config) -> anyhow::Result<()> {
        if self.state().fail_setup {
            bail!("password authentication failed");
        }
        Ok(())
    }

    fn get_version(&mut self) -> anyhow::Result<Option<VersionEntry>> {
        let state = self.state();
        if state.fail_version {
            bail!("relation \"version\" does not exist");
        }
        Ok(state.ledger.last().cloned())
    }

    fn set_version(&mut self, version: VersionEntry) -> anyhow::Result<()> {
        self.state().ledger.push(version);
        Ok(())
    }

    fn run_command(&mut self, command: &Command, log: &mut PluginLog) -> anyhow::Result<()> {
        let mut state = self.state();
        log.line(format!("running {}", command.name));
        if state.fail_command.as_deref() == Some(command.name.as_str()) {
            bail!("relation \"orders\" already exists");
        }
        state.commands.push(command.name.clone());
        state
            .scripts
            .extend(command.scripts.iter().map(|s| s.content.clone()));
        Ok(())
    }

    fn run_query(&mut self, query: &Query) -> anyhow::Result<Table> {
        self.state().queries.push(query.content.clone());
        let mut table = Table::new(vec!["sql".to_string()]);
        table.push_row(vec![query.content.clone()]);
        Ok(table)
    }

    fn get_info(&mut self) -> anyhow::Result<ServerInfo> {
        Ok(ServerInfo {
            database: "recorder 1.0".to_string(),
            ..Default::default()
        })
    }
}

fn config(root: &std::path::Path, app_version: &str) -> Config {
    Config::empty()
        .with(REPO_URI, root.to_str().unwrap())
        .with(DB_PROVIDER, "_memory")
        .with(DB_NAME, "orders")
        .with(APP_VERSION, app_version)
}

fn dbman(config: Config, recorder: &Recorder) -> DbMan {
    DbMan::new(config, Box::new(PluginDecorator::new(recorder.clone()))).unwrap()
}

fn versions(ledger: &[VersionEntry]) -> Vec<(&str, &str)> {
    ledger
        .iter()
        .map(|v| (v.app_version.as_str(), v.db_version.as_str()))
        .collect()
}

// ============================================================================
// Create and deploy
// ============================================================================

#[test]
fn test_create_runs_create_commands_without_ledger_entry() {
    let root = common::content_root();
    let recorder = Recorder::default();
    let report = dbman(config(root.path(), "1.0"), &recorder).create().unwrap();

    assert_eq!(report.executed, vec!["r1/create-db-1"]);
    assert!(report.ledger.is_empty());
    let state = recorder.state();
    assert_eq!(state.scripts, vec!["CREATE DATABASE orders;"]);
    assert!(state.ledger.is_empty());
    assert!(
        report
            .log
            .lines()
            .iter()
            .any(|l| l == "? the execution of the command 'create-db-1' has succeeded")
    );
}

#[test]
fn test_deploy_records_first_version() {
    let root = common::content_root();
    let recorder = Recorder::default();
    let report = dbman(config(root.path(), "2.0"), &recorder).deploy().unwrap();

    assert_eq!(report.executed, vec!["r2/deploy-2"]);
    assert_eq!(recorder.state().scripts, vec!["-- schema for 2.0"]);
    assert_eq!(versions(&recorder.state().ledger), vec![("2.0", "2")]);

    let entry = &report.ledger[0];
    assert_eq!(entry.description, "Created database version 2");
    assert_eq!(entry.source, root.path().to_str().unwrap());
}

#[test]
fn test_deploy_refused_on_existing_version() {
    let root = common::content_root();
    let recorder = Recorder::default();
    recorder
        .state()
        .ledger
        .push(VersionEntry::now("1.0", "1", "seed", "test"));

    let failure = dbman(config(root.path(), "2.0"), &recorder)
        .deploy()
        .unwrap_err();
    match failure.error {
        DbmanError::AlreadyExists {
            app_version,
            db_version,
        } => {
            assert_eq!(app_version, "1.0");
            assert_eq!(db_version, "1");
        }
        other => panic!("expected AlreadyExists, got {:?}", other),
    }
    assert!(recorder.state().commands.is_empty());
    assert_eq!(recorder.state().ledger.len(), 1);
}

#[test]
fn test_create_refused_on_existing_version() {
    let root = common::content_root();
    let recorder = Recorder::default();
    recorder
        .state()
        .ledger
        .push(VersionEntry::now("1.0", "1", "seed", "test"));

    let failure = dbman(config(root.path(), "1.0"), &recorder)
        .create()
        .unwrap_err();
    assert!(matches!(failure.error, DbmanError::AlreadyExists { .. }));
    assert!(recorder.state().commands.is_empty());
}

#[test]
fn test_suspicious_config_value_blocks_the_command() {
    let root = common::content_root();
    let recorder = Recorder::default();
    let config = config(root.path(), "1.0").with(DB_NAME, "orders; DROP DATABASE prod");

    let failure = dbman(config, &recorder).create().unwrap_err();
    match failure.error {
        DbmanError::SuspiciousVariableValue { name } => assert_eq!(name, "DB_NAME"),
        other => panic!("expected SuspiciousVariableValue, got {:?}", other),
    }
    assert!(recorder.state().commands.is_empty());
    assert!(failure.report.executed.is_empty());
}

#[test]
fn test_unknown_app_version_is_not_found() {
    let root = common::content_root();
    let recorder = Recorder::default();
    let failure = dbman(config(root.path(), "9.9"), &recorder)
        .deploy()
        .unwrap_err();
    assert!(matches!(failure.error, DbmanError::NotFound(_)));
}

#[test]
fn test_failed_deploy_command_writes_no_version() {
    let root = common::content_root();
    let recorder = Recorder::default();
    recorder.state().fail_command = Some("deploy-1".to_string());

    let failure = dbman(config(root.path(), "1.0"), &recorder)
        .deploy()
        .unwrap_err();
    match &failure.error {
        DbmanError::ProviderDomain(msg) => assert!(msg.contains("already exists")),
        other => panic!("expected ProviderDomain, got {:?}", other),
    }
    assert!(recorder.state().ledger.is_empty());
    // provider log lines are kept even on failure
    assert!(failure.report.log.lines().iter().any(|l| l == "running deploy-1"));
    assert!(
        failure
            .report
            .log
            .lines()
            .iter()
            .any(|l| l.starts_with("!!! the execution of the command 'deploy-1' has failed"))
    );
}

#[test]
fn test_provider_mismatch_is_only_a_warning() {
    let root = common::content_root();
    let recorder = Recorder::default();
    let config = config(root.path(), "1.0").with(DB_PROVIDER, "pgsql");
    let report = dbman(config, &recorder).create().unwrap();
    assert!(
        report
            .log
            .lines()
            .iter()
            .any(|l| l.contains("expects provider 'memory'"))
    );
}

// ============================================================================
// Upgrade
// ============================================================================

#[test]
fn test_upgrade_across_three_releases() {
    let root = common::content_root();
    let recorder = Recorder::default();
    dbman(config(root.path(), "1.0"), &recorder).deploy().unwrap();

    let report = dbman(config(root.path(), "3.0"), &recorder)
        .upgrade()
        .unwrap();

    assert_eq!(
        report.executed,
        vec!["r1/prepare-1", "r2/alter-2", "r3/alter-3", "r3/deploy-3"]
    );
    assert_eq!(versions(&report.ledger), vec![("2.0", "2"), ("3.0", "3")]);
    assert_eq!(report.ledger[0].description, "Schema update to database version 2");
    assert_eq!(
        report.ledger[1].description,
        "Upgraded database from application version 1.0 to 3.0"
    );
    assert_eq!(
        versions(&recorder.state().ledger),
        vec![("1.0", "1"), ("2.0", "2"), ("3.0", "3")]
    );
}

#[test]
fn test_upgrade_single_step() {
    let root = common::content_root();
    let recorder = Recorder::default();
    dbman(config(root.path(), "1.0"), &recorder).deploy().unwrap();

    let report = dbman(config(root.path(), "2.0"), &recorder)
        .upgrade()
        .unwrap();
    assert_eq!(
        report.executed,
        vec!["r1/prepare-1", "r2/alter-2", "r2/deploy-2"]
    );
    assert_eq!(versions(&report.ledger), vec![("2.0", "2")]);
}

#[test]
fn test_upgrade_to_installed_version_is_a_no_op() {
    let root = common::content_root();
    let recorder = Recorder::default();
    dbman(config(root.path(), "2.0"), &recorder).deploy().unwrap();
    let commands_before = recorder.state().commands.len();

    let report = dbman(config(root.path(), "2.0"), &recorder)
        .upgrade()
        .unwrap();
    assert!(report.executed.is_empty());
    assert!(report.ledger.is_empty());
    assert_eq!(recorder.state().commands.len(), commands_before);
    assert_eq!(recorder.state().ledger.len(), 1);
}

#[test]
fn test_upgrade_requires_a_version() {
    let root = common::content_root();
    let recorder = Recorder::default();
    let failure = dbman(config(root.path(), "2.0"), &recorder)
        .upgrade()
        .unwrap_err();
    assert!(matches!(failure.error, DbmanError::NotInitialized));
    assert!(recorder.state().commands.is_empty());
}

#[test]
fn test_upgrade_of_database_without_version_table_is_not_initialized() {
    let root = common::content_root();
    let recorder = Recorder::default();
    recorder.state().fail_version = true;
    let failure = dbman(config(root.path(), "2.0"), &recorder)
        .upgrade()
        .unwrap_err();
    assert!(
        matches!(failure.error, DbmanError::NotInitialized),
        "got {:?}",
        failure.error
    );
    assert!(recorder.state().commands.is_empty());
    assert!(
        failure
            .report
            .log
            .lines()
            .iter()
            .any(|l| l.contains("relation \"version\" does not exist"))
    );
}

#[test]
fn test_downgrade_is_refused() {
    let root = common::content_root();
    let recorder = Recorder::default();
    dbman(config(root.path(), "3.0"), &recorder).deploy().unwrap();

    let failure = dbman(config(root.path(), "1.0"), &recorder)
        .upgrade()
        .unwrap_err();
    match failure.error {
        DbmanError::InvalidUpgradePath { current, target } => {
            assert_eq!(current, "3.0");
            assert_eq!(target, "1.0");
        }
        other => panic!("expected InvalidUpgradePath, got {:?}", other),
    }
    assert_eq!(recorder.state().commands, vec!["deploy-3"]);
}

#[test]
fn test_upgrade_from_version_missing_in_plan_is_refused() {
    let root = common::content_root();
    let recorder = Recorder::default();
    recorder
        .state()
        .ledger
        .push(VersionEntry::now("0.5", "0", "legacy", "test"));

    let failure = dbman(config(root.path(), "2.0"), &recorder)
        .upgrade()
        .unwrap_err();
    assert!(matches!(failure.error, DbmanError::InvalidUpgradePath { .. }));
    assert!(recorder.state().commands.is_empty());
}

#[test]
fn test_failed_upgrade_resumes_from_last_recorded_version() {
    let root = common::content_root();
    let recorder = Recorder::default();
    dbman(config(root.path(), "1.0"), &recorder).deploy().unwrap();
    recorder.state().fail_command = Some("alter-3".to_string());

    let failure = dbman(config(root.path(), "3.0"), &recorder)
        .upgrade()
        .unwrap_err();
    assert!(matches!(failure.error, DbmanError::ProviderDomain(_)));
    assert_eq!(failure.report.executed, vec!["r1/prepare-1", "r2/alter-2"]);
    assert_eq!(versions(&failure.report.ledger), vec![("2.0", "2")]);

    recorder.state().fail_command = None;
    let report = dbman(config(root.path(), "3.0"), &recorder)
        .upgrade()
        .unwrap();
    assert_eq!(
        report.executed,
        vec!["r2/prepare-2", "r3/alter-3", "r3/deploy-3"]
    );
    assert_eq!(
        versions(&recorder.state().ledger),
        vec![("1.0", "1"), ("2.0", "2"), ("3.0", "3")]
    );
}

// ============================================================================
// Query, check and info
// ============================================================================

#[test]
fn test_query_merges_inputs() {
    let root = common::content_root();
    let recorder = Recorder::default();
    let mut dbman = dbman(config(root.path(), "1.0"), &recorder);

    let inputs = BTreeMap::from([("limit".to_string(), "10".to_string())]);
    let table = dbman.query("history", &inputs).unwrap();
    assert_eq!(table.header, vec!["sql"]);
    assert_eq!(table.rows, vec![vec!["SELECT * FROM version LIMIT 10"]]);
}

#[test]
fn test_query_rejects_suspicious_input() {
    let root = common::content_root();
    let recorder = Recorder::default();
    let mut dbman = dbman(config(root.path(), "1.0"), &recorder);

    let inputs = BTreeMap::from([("limit".to_string(), "1; DELETE FROM version".to_string())]);
    let err = dbman.query("history", &inputs).unwrap_err();
    assert!(matches!(err, DbmanError::SuspiciousVariableValue { .. }));
    assert!(recorder.state().queries.is_empty());
}

#[test]
fn test_unknown_query_is_not_found() {
    let root = common::content_root();
    let recorder = Recorder::default();
    let mut dbman = dbman(config(root.path(), "1.0"), &recorder);
    let err = dbman.query("nope", &BTreeMap::new()).unwrap_err();
    assert!(matches!(err, DbmanError::NotFound(_)));
}

#[test]
fn test_queries_listing() {
    let root = common::content_root();
    let recorder = Recorder::default();
    let dbman = dbman(config(root.path(), "1.0"), &recorder);
    let queries = dbman.queries().unwrap();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].name, "history");
    assert_eq!(queries[0].description, "Version history");
}

#[test]
fn test_check_reports_source_and_database() {
    let root = common::content_root();
    let recorder = Recorder::default();
    let mut dbman = dbman(config(root.path(), "1.0"), &recorder);

    let results = dbman.check();
    assert_eq!(results.get(CHECK_SOURCE).map(String::as_str), Some("OK"));
    assert_eq!(results.get(CHECK_DATABASE).map(String::as_str), Some("OK"));
    // the connection check runs a command with no scripts
    assert_eq!(recorder.state().commands, vec!["test connection"]);
    assert!(recorder.state().scripts.is_empty());
    assert!(dbman.check_ready().is_ok());
}

#[test]
fn test_check_with_unreachable_source() {
    let root = common::content_root();
    let missing = root.path().join("nowhere");
    let recorder = Recorder::default();
    let config = config(root.path(), "1.0").with(REPO_URI, missing.to_str().unwrap());
    let mut dbman = dbman(config, &recorder);

    let results = dbman.check();
    assert!(results[CHECK_SOURCE].starts_with("FAILED: "));
    assert_eq!(results[CHECK_DATABASE], "OK");
    assert!(matches!(
        dbman.check_ready(),
        Err(DbmanError::SourceUnreachable { .. })
    ));
}

#[test]
fn test_check_without_repo_uri_still_checks_the_database() {
    let root = common::content_root();
    let recorder = Recorder::default();
    let config = config(root.path(), "1.0").with(REPO_URI, "");
    let mut dbman = dbman(config, &recorder);

    let results = dbman.check();
    assert!(results[CHECK_SOURCE].starts_with("FAILED: "));
    assert_eq!(results[CHECK_DATABASE], "OK");
    assert_eq!(recorder.state().commands, vec!["test connection"]);
    assert!(matches!(dbman.check_ready(), Err(DbmanError::Config(_))));

    // operations needing content fail, the database stays reachable
    assert!(matches!(
        dbman.create().unwrap_err().error,
        DbmanError::Config(_)
    ));
    assert_eq!(dbman.db_info().unwrap().database, "recorder 1.0");
}

#[test]
fn test_db_info_and_release_plan() {
    let root = common::content_root();
    let recorder = Recorder::default();
    let mut dbman = dbman(config(root.path(), "1.0"), &recorder);

    assert_eq!(dbman.db_info().unwrap().database, "recorder 1.0");
    let plan = dbman.release_plan().unwrap();
    assert_eq!(plan.releases.len(), 3);
    let (release, manifest) = dbman.release_info("2.0").unwrap();
    assert_eq!(release.path, "r2");
    assert_eq!(manifest.db_version, "2");
}

#[test]
fn test_setup_failure_aborts_construction() {
    let root = common::content_root();
    let recorder = Recorder::default();
    recorder.state().fail_setup = true;
    let result = DbMan::new(
        config(root.path(), "1.0"),
        Box::new(PluginDecorator::new(recorder.clone())),
    );
    match result {
        Err(DbmanError::ProviderDomain(msg)) => assert!(msg.contains("authentication")),
        Err(other) => panic!("expected ProviderDomain, got {:?}", other),
        Ok(_) => panic!("expected setup to fail"),
    }
}

#[test]
fn test_native_memory_provider_from_config() {
    let root = common::content_root();
    let mut dbman = DbMan::from_config(config(root.path(), "1.0")).unwrap();
    dbman.deploy().unwrap();
    let current = dbman.current_version().unwrap().unwrap();
    assert_eq!(current.app_version, "1.0");
    assert!(matches!(
        dbman.deploy().unwrap_err().error,
        DbmanError::AlreadyExists { .. }
    ));
}

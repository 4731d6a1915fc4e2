//! The dbman orchestrator
//!
//! [`DbMan`] ties the content source and a database provider together and
//! runs the lifecycle operations:
//!
//! - **create**: runs the manifest's `create` commands on a database with no
//!   version yet. Writes no ledger entry.
//! - **deploy**: runs the `deploy` commands on a database with no version yet,
//!   then records the first ledger entry.
//! - **upgrade**: walks the release plan from the installed release to the
//!   configured one, running `prepare` on the installed release, `alter` on
//!   every later release and `deploy` on the target, recording a ledger entry
//!   after each release.
//! - **query**: runs a named query of the configured release.
//! - **check**: probes the content source and the database connection.
//!
//! Operations run strictly in order and stop at the first failure. Work
//! already committed (scripts, ledger entries) stays in place, so running
//! the same operation again resumes from the last recorded version.
//! Nothing here prevents two processes from running operations against the
//! same database at once.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::{APP_VERSION, Config, DB_NAME, DB_PROVIDER};
use crate::error::{DbmanError, Result};
use crate::manifest::{Command, CommandMode, CommandSpec, Manifest, QuerySummary};
use crate::merge::MergeContext;
use crate::plan::{Plan, ReleaseEntry};
use crate::provider::{
    DatabaseProvider, Parameter, ServerInfo, Table, VersionEntry, load_provider,
};
use crate::source::ScriptSource;

/// Name of the check probing the content source
pub const CHECK_SOURCE: &str = "scripts uri";
/// Name of the check probing the database connection
pub const CHECK_DATABASE: &str = "db connection";

/// Human readable narration of an operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunLog {
    lines: Vec<String>,
}

impl RunLog {
    /// Record a line of the operation's own narration
    pub fn info(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!("{}", line);
        self.lines.push(line);
    }

    /// Record log text returned by the provider
    pub fn provider(&mut self, text: &str) {
        for line in text.lines().filter(|l| !l.is_empty()) {
            tracing::debug!(target: "dbman::provider", "{}", line);
            self.lines.push(line.to_string());
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl fmt::Display for RunLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

/// What an operation did, successful or not
#[derive(Debug, Clone, Default)]
pub struct Report {
    pub log: RunLog,
    pub elapsed: Duration,
    /// `{release path}/{command}` for every command that ran successfully, in order
    pub executed: Vec<String>,
    /// Ledger entries written by this operation
    pub ledger: Vec<VersionEntry>,
}

/// A failed operation, with everything it did before failing
#[derive(Debug, Error)]
#[error("{error}")]
pub struct OperationFailure {
    #[source]
    pub error: DbmanError,
    pub report: Report,
}

pub type OperationResult = std::result::Result<Report, OperationFailure>;

/// In-flight state of one operation
struct Run {
    started: Instant,
    report: Report,
}

impl Run {
    fn start() -> Self {
        Self {
            started: Instant::now(),
            report: Report::default(),
        }
    }

    fn log(&mut self, line: impl Into<String>) {
        self.report.log.info(line);
    }

    fn finish(mut self, result: Result<()>) -> OperationResult {
        self.report.elapsed = self.started.elapsed();
        match result {
            Ok(()) => Ok(self.report),
            Err(error) => {
                self.report.log.info(format!("!!! {}", error));
                Err(OperationFailure {
                    error,
                    report: self.report,
                })
            }
        }
    }
}

/// Runs lifecycle operations for the configured database
pub struct DbMan {
    config: Config,
    /// `None` until `Repo.URI` is set; fetching then fails but the
    /// database side stays usable
    source: Option<ScriptSource>,
    provider: Box<dyn DatabaseProvider>,
}

impl DbMan {
    /// Use `provider` for the database. The whole configuration is sent to
    /// the provider's `setup`; an error there aborts construction.
    pub fn new(config: Config, mut provider: Box<dyn DatabaseProvider>) -> Result<Self> {
        let source = match ScriptSource::from_config(&config) {
            Ok(source) => Some(source),
            Err(e) => {
                tracing::warn!("Release content is not available: {}", e);
                None
            }
        };
        let setup = Parameter::from_json(&provider.setup(&config.to_json()?)?)?;
        for line in setup.log_text().lines() {
            tracing::info!("{}", line);
        }
        setup.into_checked()?;
        Ok(Self {
            config,
            source,
            provider,
        })
    }

    /// Load the provider named by `Db.Provider`, then [`DbMan::new`]
    pub fn from_config(config: Config) -> Result<Self> {
        let provider = load_provider(&config)?;
        Self::new(config, provider)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Give the provider back, e.g. to reuse a plugin process with another
    /// configuration
    pub fn into_provider(self) -> Box<dyn DatabaseProvider> {
        self.provider
    }

    fn target_version(&self) -> String {
        self.config.get(APP_VERSION).to_string()
    }

    fn source(&self) -> Result<&ScriptSource> {
        self.source
            .as_ref()
            .ok_or_else(|| DbmanError::config("the Repo.URI is not defined"))
    }

    /// Content root without credentials, recorded as the ledger source
    fn source_name(&self) -> String {
        self.source
            .as_ref()
            .map(|source| source.root().display())
            .unwrap_or_default()
    }

    // ========================================================================
    // Provider calls
    // ========================================================================

    /// The installed version. A backend failure is a `ProviderDomain` error.
    pub fn current_version(&mut self) -> Result<Option<VersionEntry>> {
        let envelope = Parameter::from_json(&self.provider.get_version()?)?.into_checked()?;
        VersionEntry::from_result(envelope.result()?)
    }

    fn record_version(&mut self, run: &mut Run, entry: VersionEntry) -> Result<()> {
        let payload = serde_json::to_string(&entry)?;
        let envelope = Parameter::from_json(&self.provider.set_version(&payload)?)?;
        run.report.log.provider(envelope.log_text());
        envelope.into_checked()?;
        run.log(format!(
            "? I have recorded database version {} for application version {}",
            entry.db_version, entry.app_version
        ));
        run.report.ledger.push(entry);
        Ok(())
    }

    /// Fail when the database already has a version. A backend error while
    /// reading the version is taken as "no version yet".
    fn ensure_not_deployed(&mut self, run: &mut Run) -> Result<()> {
        run.log(format!(
            "? I am checking that the database '{}' does not already exist",
            self.config.get(DB_NAME)
        ));
        match self.current_version() {
            Ok(Some(v)) => Err(DbmanError::AlreadyExists {
                app_version: v.app_version,
                db_version: v.db_version,
            }),
            Ok(None) => Ok(()),
            Err(DbmanError::ProviderDomain(msg)) => {
                run.log(format!("? I could not read a database version ({}), assuming none", msg));
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // ========================================================================
    // Command execution
    // ========================================================================

    fn check_provider(&self, run: &mut Run, manifest: &Manifest) {
        let configured = self.config.get(DB_PROVIDER);
        let configured = configured.strip_prefix('_').unwrap_or(configured);
        if !manifest.db_provider.is_empty() && manifest.db_provider != configured {
            run.log(format!(
                "!!! the release manifest expects provider '{}' but '{}' is configured",
                manifest.db_provider, configured
            ));
        }
    }

    /// Hydrate, send and check one command
    fn run_command(
        &mut self,
        run: &mut Run,
        release: &ReleaseEntry,
        manifest: &Manifest,
        spec: &CommandSpec,
        context: &MergeContext,
    ) -> Result<()> {
        let command =
            self.source()?
                .hydrate_command_at(release, &manifest.commands_path, spec, context)?;
        run.log(format!("? I have started execution of the command '{}'", command.name));

        let envelope = Parameter::from_json(&self.provider.run_command(&command.to_json()?)?)?;
        run.report.log.provider(envelope.log_text());
        if let Some(error) = envelope.error() {
            run.log(format!(
                "!!! the execution of the command '{}' has failed: {}",
                command.name, error
            ));
            return Err(DbmanError::domain(error));
        }
        run.log(format!(
            "? the execution of the command '{}' has succeeded",
            command.name
        ));
        run.report
            .executed
            .push(format!("{}/{}", release.path, command.name));
        Ok(())
    }

    /// Run the named commands in order, stopping at the first failure
    fn run_commands(
        &mut self,
        run: &mut Run,
        release: &ReleaseEntry,
        manifest: &Manifest,
        names: &[String],
    ) -> Result<()> {
        let context = release_context(release, manifest);
        for spec in manifest.get_commands(names) {
            self.run_command(run, release, manifest, spec, &context)?;
        }
        Ok(())
    }

    /// Run a single upgrade phase command, if the manifest declares one
    fn run_phase(
        &mut self,
        run: &mut Run,
        release: &ReleaseEntry,
        manifest: &Manifest,
        phase: &str,
        name: &str,
    ) -> Result<()> {
        if name.is_empty() {
            run.log(format!(
                "? release {} declares no {} command, skipping",
                release.app_version, phase
            ));
            return Ok(());
        }
        let Some(spec) = manifest.get_command(name) else {
            run.log(format!(
                "!!! the {} command '{}' is not defined in the manifest of release {}, skipping",
                phase, name, release.app_version
            ));
            return Ok(());
        };
        let context = release_context(release, manifest);
        self.run_command(run, release, manifest, spec, &context)
    }

    // ========================================================================
    // Operations
    // ========================================================================

    pub fn create(&mut self) -> OperationResult {
        let mut run = Run::start();
        let result = self.create_steps(&mut run);
        run.finish(result)
    }

    fn create_steps(&mut self, run: &mut Run) -> Result<()> {
        self.ensure_not_deployed(run)?;
        let app_version = self.target_version();
        run.log(format!(
            "? I am retrieving the release manifest for application version '{}'",
            app_version
        ));
        let (release, manifest) = self.source()?.fetch_manifest(&app_version)?;
        self.check_provider(run, &manifest);
        let names = manifest.create.commands.clone();
        self.run_commands(run, &release, &manifest, &names)
    }

    pub fn deploy(&mut self) -> OperationResult {
        let mut run = Run::start();
        let result = self.deploy_steps(&mut run);
        run.finish(result)
    }

    fn deploy_steps(&mut self, run: &mut Run) -> Result<()> {
        self.ensure_not_deployed(run)?;
        let app_version = self.target_version();
        run.log(format!(
            "? I am retrieving the release manifest for application version '{}'",
            app_version
        ));
        let (release, manifest) = self.source()?.fetch_manifest(&app_version)?;
        self.check_provider(run, &manifest);
        let names = manifest.deploy.commands.clone();
        self.run_commands(run, &release, &manifest, &names)?;

        let entry = VersionEntry::now(
            &app_version,
            &manifest.db_version,
            format!("Created database version {}", manifest.db_version),
            self.source_name(),
        );
        self.record_version(run, entry).inspect_err(|_| {
            run.log("!!! the deploy commands have been applied but the database version could not be recorded");
        })
    }

    pub fn upgrade(&mut self) -> OperationResult {
        let mut run = Run::start();
        let result = self.upgrade_steps(&mut run);
        run.finish(result)
    }

    fn upgrade_steps(&mut self, run: &mut Run) -> Result<()> {
        let target = self.target_version();
        // a database never deployed may not even have a ledger to read
        let installed = match self.current_version() {
            Ok(Some(installed)) => installed,
            Ok(None) => return Err(DbmanError::NotInitialized),
            Err(DbmanError::ProviderDomain(msg)) => {
                run.log(format!("!!! I could not read the database version: {}", msg));
                return Err(DbmanError::NotInitialized);
            }
            Err(e) => return Err(e),
        };
        if installed.app_version == target {
            run.log(format!(
                "? the database is already at application version {}, there is nothing to upgrade",
                target
            ));
            return Ok(());
        }

        let plan = self.source()?.fetch_plan()?;
        let window = plan.upgrade_window(&installed.app_version, &target);
        if !window.is_forward() {
            return Err(DbmanError::InvalidUpgradePath {
                current: installed.app_version,
                target,
            });
        }
        run.log(format!(
            "? I am upgrading the database from application version {} to {} ({} release(s))",
            installed.app_version,
            target,
            window.target - window.current
        ));

        for position in window.current..=window.target {
            let release = plan
                .release_at(position)
                .cloned()
                .ok_or_else(|| DbmanError::not_found(format!("release at plan position {}", position)))?;
            let manifest = self.source()?.manifest_for(&release)?;
            self.check_provider(run, &manifest);

            if position == window.current {
                self.run_phase(run, &release, &manifest, "prepare", &manifest.upgrade.prepare)?;
                continue;
            }
            self.run_phase(run, &release, &manifest, "alter", &manifest.upgrade.alter)?;

            let description = if position == window.target {
                self.run_phase(run, &release, &manifest, "deploy", &manifest.upgrade.deploy)?;
                format!(
                    "Upgraded database from application version {} to {}",
                    installed.app_version, release.app_version
                )
            } else {
                format!("Schema update to database version {}", manifest.db_version)
            };
            let entry = VersionEntry::now(
                &release.app_version,
                &manifest.db_version,
                description,
                self.source_name(),
            );
            self.record_version(run, entry)?;
        }
        Ok(())
    }

    /// Run a named query of the configured release with caller inputs
    pub fn query(&mut self, name: &str, inputs: &BTreeMap<String, String>) -> Result<Table> {
        let (release, manifest) = self.source()?.fetch_manifest(&self.target_version())?;
        let spec = manifest.get_query(name).ok_or_else(|| {
            DbmanError::not_found(format!(
                "query '{}' in the manifest of application version {}",
                name, release.app_version
            ))
        })?;
        let context = release_context(&release, &manifest);
        let query =
            self.source()?
                .hydrate_query_at(&release, &manifest.queries_path, spec, inputs, &context)?;
        let envelope = Parameter::from_json(&self.provider.run_query(&query.to_json()?)?)?;
        for line in envelope.log_text().lines() {
            tracing::info!("{}", line);
        }
        let envelope = envelope.into_checked()?;
        Ok(envelope.result::<Table>()?.unwrap_or_default())
    }

    fn probe_source(&self) -> Result<()> {
        self.source()?.fetch_plan().map(|_| ())
    }

    fn probe_database(&mut self) -> Result<()> {
        let probe = Command::probe(
            "test connection",
            CommandMode {
                transactional: false,
                as_admin: true,
                use_db: false,
            },
        );
        let envelope = Parameter::from_json(&self.provider.run_command(&probe.to_json()?)?)?;
        envelope.into_checked().map(|_| ())
    }

    fn run_checks(&mut self) -> Vec<(&'static str, Result<()>)> {
        vec![
            (CHECK_SOURCE, self.probe_source()),
            (CHECK_DATABASE, self.probe_database()),
        ]
    }

    /// Probe the content source and the database. Each check reports `OK`
    /// or `FAILED: <reason>`; one failing check does not stop the others.
    pub fn check(&mut self) -> BTreeMap<String, String> {
        self.run_checks()
            .into_iter()
            .map(|(name, outcome)| {
                let outcome = match outcome {
                    Ok(()) => "OK".to_string(),
                    Err(e) => {
                        tracing::warn!("!!! check '{}' failed: {}", name, e);
                        format!("FAILED: {}", e)
                    }
                };
                (name.to_string(), outcome)
            })
            .collect()
    }

    /// Fail with the error of the first failing check
    pub fn check_ready(&mut self) -> Result<()> {
        self.run_checks()
            .into_iter()
            .map(|(_, outcome)| outcome)
            .collect::<Result<Vec<_>>>()
            .map(|_| ())
    }

    /// Database server details from the provider
    pub fn db_info(&mut self) -> Result<ServerInfo> {
        let envelope = Parameter::from_json(&self.provider.get_info()?)?.into_checked()?;
        envelope
            .result()?
            .ok_or_else(|| DbmanError::transport("the database plugin did not return a result"))
    }

    pub fn release_plan(&self) -> Result<Plan> {
        self.source()?.fetch_plan()
    }

    pub fn release_info(&self, app_version: &str) -> Result<(ReleaseEntry, Manifest)> {
        self.source()?.fetch_manifest(app_version)
    }

    /// Queries available in the configured release
    pub fn queries(&self) -> Result<Vec<QuerySummary>> {
        let (_, manifest) = self.source()?.fetch_manifest(&self.target_version())?;
        Ok(manifest.queries_summary())
    }
}

fn release_context(release: &ReleaseEntry, manifest: &Manifest) -> MergeContext {
    MergeContext::new(
        &release.app_version,
        &manifest.db_version,
        &manifest.description,
    )
}

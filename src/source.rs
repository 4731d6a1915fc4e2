//! Release content source
//!
//! Fetches the release plan, release manifests and script bodies from the
//! configured `Repo.URI`. The root is either an http(s) origin or a local
//! folder (optionally written as `file://...`), laid out as:
//!
//! ```text
//! {root}/plan.json
//! {root}/{release path}/manifest.json
//! {root}/{release path}/{commands or queries path}/{script file}
//! ```
//!
//! Nothing is cached: each call reads the source again.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{Config, REPO_PASSWORD, REPO_URI, REPO_USERNAME};
use crate::error::{DbmanError, Result};
use crate::manifest::{Command, CommandSpec, Manifest, Query, QuerySpec, ResolvedScript};
use crate::merge::{MergeContext, MergeSources, merge};
use crate::plan::{Plan, ReleaseEntry};

/// Upper bound for a single http fetch
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Where release content lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRoot {
    /// http(s) origin; `base` may carry `user:pass@` credentials
    Http { base: String, display: String },
    /// Local folder
    Local { path: PathBuf },
}

impl SourceRoot {
    /// Parse a `Repo.URI` value, embedding credentials when both are set
    pub fn parse(uri: &str, username: &str, password: &str) -> Result<Self> {
        let uri = uri.trim().trim_end_matches('/');
        if uri.is_empty() {
            return Err(DbmanError::config("the Repo.URI is not defined"));
        }
        let lower = uri.to_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Ok(Self::Http {
                base: embed_credentials(uri, username, password),
                display: uri.to_string(),
            });
        }
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        Ok(Self::Local {
            path: PathBuf::from(path),
        })
    }

    /// The root as it can be shown to a user (never includes credentials)
    pub fn display(&self) -> String {
        match self {
            Self::Http { display, .. } => display.clone(),
            Self::Local { path } => path.display().to_string(),
        }
    }
}

/// Put `user:pass@` in the authority of `uri`.
///
/// Some git hosts answer credentialed anonymous GETs with errors when the
/// credentials travel as headers, so they go in the URI instead.
pub fn embed_credentials(uri: &str, username: &str, password: &str) -> String {
    if username.is_empty() || password.is_empty() {
        return uri.to_string();
    }
    match uri.split_once("//") {
        Some((scheme, rest)) => format!("{}//{}:{}@{}", scheme, username, password, rest),
        None => uri.to_string(),
    }
}

fn join_segments(segments: &[&str]) -> Vec<String> {
    segments
        .iter()
        .map(|s| s.trim_matches('/'))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Reads plans, manifests and scripts from a [`SourceRoot`]
pub struct ScriptSource {
    root: SourceRoot,
    config: Config,
    agent: ureq::Agent,
}

impl ScriptSource {
    /// Build a source from `Repo.URI`, `Repo.Username` and `Repo.Password`.
    /// The configuration is kept to resolve `fromConf` variables.
    pub fn from_config(config: &Config) -> Result<Self> {
        let root = SourceRoot::parse(
            config.get(REPO_URI),
            config.get(REPO_USERNAME),
            config.get(REPO_PASSWORD),
        )?;
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(HTTP_TIMEOUT))
            .build()
            .into();
        Ok(Self {
            root,
            config: config.clone(),
            agent,
        })
    }

    pub fn root(&self) -> &SourceRoot {
        &self.root
    }

    /// Read the text at `segments` below the root
    fn fetch_text(&self, segments: &[&str]) -> Result<String> {
        let parts = join_segments(segments);
        match &self.root {
            SourceRoot::Http { base, display } => {
                let shown = format!("{}/{}", display, parts.join("/"));
                let uri = format!("{}/{}", base, parts.join("/"));
                tracing::debug!("GET {}", shown);
                self.http_get(&uri, &shown)
            }
            SourceRoot::Local { path } => {
                if !path.is_dir() {
                    return Err(DbmanError::SourceUnreachable {
                        uri: path.display().to_string(),
                        reason: "the folder does not exist".to_string(),
                    });
                }
                let file = parts.iter().fold(path.clone(), |p, s| p.join(s));
                tracing::debug!("reading {}", file.display());
                fs::read_to_string(&file).map_err(|e| {
                    let shown = file.display().to_string();
                    match e.kind() {
                        io::ErrorKind::NotFound => {
                            DbmanError::not_found(format!("I cannot find '{}'", shown))
                        }
                        io::ErrorKind::PermissionDenied => DbmanError::Forbidden(format!(
                            "I do not have permission to read '{}'",
                            shown
                        )),
                        _ => DbmanError::SourceUnreachable {
                            uri: shown,
                            reason: e.to_string(),
                        },
                    }
                })
            }
        }
    }

    fn http_get(&self, uri: &str, shown: &str) -> Result<String> {
        let mut response = self.agent.get(uri).call().map_err(|e| match e {
            ureq::Error::StatusCode(401) | ureq::Error::StatusCode(403) => DbmanError::Forbidden(
                format!("I do not have permission to get the content at '{}'", shown),
            ),
            ureq::Error::StatusCode(404) => {
                DbmanError::not_found(format!("I cannot find content at '{}'", shown))
            }
            ureq::Error::StatusCode(408) | ureq::Error::Timeout(_) => DbmanError::Timeout(
                format!("'{}' is not responding", shown),
            ),
            ureq::Error::StatusCode(code) if code >= 500 => DbmanError::ServerError(format!(
                "'{}' responded with status {}",
                shown, code
            )),
            ureq::Error::StatusCode(code) => DbmanError::SourceUnreachable {
                uri: shown.to_string(),
                reason: format!("unexpected status {}", code),
            },
            other => DbmanError::SourceUnreachable {
                uri: shown.to_string(),
                reason: other.to_string(),
            },
        })?;
        response
            .body_mut()
            .read_to_string()
            .map_err(|e| DbmanError::SourceUnreachable {
                uri: shown.to_string(),
                reason: format!("cannot read response body: {}", e),
            })
    }

    /// Fetch `{root}/plan.json`
    pub fn fetch_plan(&self) -> Result<Plan> {
        let text = self.fetch_text(&["plan.json"])?;
        Plan::from_json(&text)
    }

    /// Fetch the manifest of the release for `app_version`
    pub fn fetch_manifest(&self, app_version: &str) -> Result<(ReleaseEntry, Manifest)> {
        let plan = self.fetch_plan()?;
        let release = plan.release_for(app_version)?.clone();
        let manifest = self.manifest_for(&release)?;
        Ok((release, manifest))
    }

    /// Fetch `{root}/{release.path}/manifest.json`
    pub fn manifest_for(&self, release: &ReleaseEntry) -> Result<Manifest> {
        let text = self.fetch_text(&[&release.path, "manifest.json"])?;
        Manifest::from_json(&text)
    }

    /// Fetch and merge every script of `spec`, looking the release up by
    /// application version
    pub fn hydrate_command(&self, app_version: &str, sub_path: &str, spec: &CommandSpec) -> Result<Command> {
        let plan = self.fetch_plan()?;
        let release = plan.release_for(app_version)?;
        let context = MergeContext::new(&release.app_version, &release.db_version, "");
        self.hydrate_command_at(release, sub_path, spec, &context)
    }

    /// Fetch and merge every script of `spec` from a known release.
    /// Stops at the first script that cannot be fetched or merged.
    pub fn hydrate_command_at(
        &self,
        release: &ReleaseEntry,
        sub_path: &str,
        spec: &CommandSpec,
        context: &MergeContext,
    ) -> Result<Command> {
        let inputs = BTreeMap::new();
        let sources = MergeSources {
            config: &self.config,
            inputs: &inputs,
            context,
        };
        let scripts = spec
            .scripts
            .iter()
            .map(|script| {
                let content = self.fetch_text(&[&release.path, sub_path, &script.file])?;
                Ok(ResolvedScript {
                    name: script.name.clone(),
                    file: script.file.clone(),
                    content: merge(&content, &script.vars, &sources)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Command {
            name: spec.name.clone(),
            description: spec.description.clone(),
            mode: spec.mode,
            scripts,
        })
    }

    /// Fetch and merge a query, looking the release up by application version
    pub fn hydrate_query(
        &self,
        app_version: &str,
        sub_path: &str,
        spec: &QuerySpec,
        inputs: &BTreeMap<String, String>,
    ) -> Result<Query> {
        let plan = self.fetch_plan()?;
        let release = plan.release_for(app_version)?;
        let context = MergeContext::new(&release.app_version, &release.db_version, "");
        self.hydrate_query_at(release, sub_path, spec, inputs, &context)
    }

    pub fn hydrate_query_at(
        &self,
        release: &ReleaseEntry,
        sub_path: &str,
        spec: &QuerySpec,
        inputs: &BTreeMap<String, String>,
        context: &MergeContext,
    ) -> Result<Query> {
        let content = self.fetch_text(&[&release.path, sub_path, &spec.file])?;
        let sources = MergeSources {
            config: &self.config,
            inputs,
            context,
        };
        Ok(Query {
            name: spec.name.clone(),
            description: spec.description.clone(),
            content: merge(&content, &spec.vars, &sources)?,
        })
    }
}

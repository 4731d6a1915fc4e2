//! Variable merging for scripts and queries
//!
//! Script bodies contain `{{NAME}}` placeholders. Each declared [`Var`] is
//! resolved to a value and every occurrence of its placeholder is replaced
//! literally. Values are never quoted or escaped, so any value containing
//! whitespace is refused before it can reach the script.

use std::collections::BTreeMap;

use crate::config::Config;
use crate::error::{DbmanError, Result};
use crate::manifest::Var;

/// Values a `fromContext` var can read: the release being applied
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeContext {
    pub app_version: String,
    pub db_version: String,
    pub description: String,
}

impl MergeContext {
    pub fn new(
        app_version: impl Into<String>,
        db_version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            app_version: app_version.into(),
            db_version: db_version.into(),
            description: description.into(),
        }
    }

    fn lookup(&self, field: &str) -> &str {
        match field {
            "appVersion" => &self.app_version,
            "dbVersion" => &self.db_version,
            "description" => &self.description,
            _ => "",
        }
    }
}

/// Everything a var can be resolved from
#[derive(Debug, Clone, Copy)]
pub struct MergeSources<'a> {
    pub config: &'a Config,
    pub inputs: &'a BTreeMap<String, String>,
    pub context: &'a MergeContext,
}

impl<'a> MergeSources<'a> {
    /// Resolve a var: configuration, then literal value, then input
    /// parameter, then context. The first non-empty value wins.
    pub fn resolve<'v>(&self, var: &'v Var) -> Option<&'v str>
    where
        'a: 'v,
    {
        let conf = (!var.from_conf.is_empty()).then(|| self.config.get(&var.from_conf));
        let value = Some(var.from_value.as_str());
        let input = (!var.from_input.is_empty())
            .then(|| self.inputs.get(&var.from_input).map(String::as_str))
            .flatten();
        let context =
            (!var.from_context.is_empty()).then(|| self.context.lookup(&var.from_context));

        [conf, value, input, context]
            .into_iter()
            .flatten()
            .find(|v| !v.is_empty())
    }
}

/// True when a value would change the shape of the script it is merged into
pub fn is_suspicious(value: &str) -> bool {
    value.chars().any(char::is_whitespace)
}

/// Merge `vars` into `content`.
///
/// Every resolved value goes through [`is_suspicious`] before any
/// replacement happens. A var with no value leaves its placeholder untouched.
/// Placeholders are replaced in a single scan of `content`, so a merged value
/// is never read again as a placeholder.
pub fn merge(content: &str, vars: &[Var], sources: &MergeSources<'_>) -> Result<String> {
    let mut values: BTreeMap<&str, &str> = BTreeMap::new();
    for var in vars {
        let Some(value) = sources.resolve(var) else {
            tracing::debug!("No value for variable '{}', leaving it unmerged", var.name);
            continue;
        };
        if is_suspicious(value) {
            return Err(DbmanError::SuspiciousVariableValue {
                name: var.name.clone(),
            });
        }
        // first declaration wins
        values.entry(var.name.as_str()).or_insert(value);
    }

    let mut merged = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(start) = rest.find("{{") {
        merged.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => match values.get(&after[..end]) {
                Some(value) => {
                    merged.push_str(value);
                    rest = &after[end + 2..];
                }
                None => {
                    merged.push('{');
                    rest = &rest[start + 1..];
                }
            },
            None => {
                merged.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    merged.push_str(rest);
    Ok(merged)
}

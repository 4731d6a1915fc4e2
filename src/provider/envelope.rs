//! Parameter envelope
//!
//! Every provider call answers with an envelope, even on success:
//!
//! ```json
//! { "result": { ... }, "log": "line 1\nline 2\n", "error": "relation does not exist" }
//! ```
//!
//! Named values sit at the top level next to `log` and `error`. An `error`
//! key means the backend failed (a domain error). A payload that is not an
//! envelope at all is a transport failure.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DbmanError, Result};

/// Key of the main value of a call
pub const RESULT: &str = "result";

/// Result values, log buffer and optional error of one provider call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    #[serde(flatten)]
    values: Map<String, Value>,
    #[serde(default)]
    log: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Parameter {
    pub fn new() -> Self {
        Self::default()
    }

    /// An envelope carrying only an error
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Store a named value
    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        self.values.insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Decode the `result` value. `None` when it is missing or null.
    pub fn result<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match self.values.get(RESULT) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|e| {
                DbmanError::transport(format!("the provider returned an unexpected result: {}", e))
            }),
        }
    }

    /// Append a line to the log buffer
    pub fn log(&mut self, line: &str) {
        self.log.push_str(line);
        if !line.ends_with('\n') {
            self.log.push('\n');
        }
    }

    pub fn log_text(&self) -> &str {
        &self.log
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Turn an embedded error into a `ProviderDomain` error
    pub fn into_checked(self) -> Result<Self> {
        match self.error {
            Some(message) => Err(DbmanError::domain(message)),
            None => Ok(self),
        }
    }

    pub fn to_json(&self) -> String {
        // a map of strings and json values always serializes
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"log":"","error":"cannot serialize envelope: {}"}}"#, e)
        })
    }

    /// Parse an envelope; anything that is not a JSON object is a transport failure
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            DbmanError::transport(format!("the provider returned a malformed envelope: {}", e))
        })
    }
}

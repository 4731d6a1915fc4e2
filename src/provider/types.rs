//! Values exchanged with providers: ledger entries, query tables and
//! server information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DbmanError, Result};

/// One entry of the database version ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionEntry {
    pub app_version: String,
    pub db_version: String,
    #[serde(default)]
    pub description: String,
    /// Where the release content came from
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub time: DateTime<Utc>,
}

impl VersionEntry {
    /// A new entry stamped with the current time
    pub fn now(
        app_version: impl Into<String>,
        db_version: impl Into<String>,
        description: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            app_version: app_version.into(),
            db_version: db_version.into(),
            description: description.into(),
            source: source.into(),
            time: Utc::now(),
        }
    }

    /// Decode a `getVersion` result. Providers answer "no version yet"
    /// with null, an empty object or an entry without application version.
    pub fn from_result(value: Option<serde_json::Value>) -> Result<Option<Self>> {
        let Some(value) = value else {
            return Ok(None);
        };
        if value.is_null() || value.as_object().is_some_and(|o| o.is_empty()) {
            return Ok(None);
        }
        let entry: VersionEntry = serde_json::from_value(value).map_err(|e| {
            DbmanError::transport(format!(
                "the provider returned an unexpected version: {}",
                e
            ))
        })?;
        Ok((!entry.app_version.is_empty()).then_some(entry))
    }
}

/// Rows and columns returned by a query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    #[serde(default)]
    pub header: Vec<String>,
    #[serde(default, rename = "row")]
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(header: Vec<String>) -> Self {
        Self {
            header,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn as_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Comma separated header and rows, without a trailing newline
    pub fn as_csv(&self) -> String {
        std::iter::once(&self.header)
            .chain(self.rows.iter())
            .map(|row| row.iter().map(|field| csv_field(field)).collect::<Vec<_>>().join(","))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Quote a field holding a separator, quote or line break; inner quotes double
fn csv_field(field: &str) -> std::borrow::Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\"")).into()
    } else {
        field.into()
    }
}

/// Database server details reported by `getInfo`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub database: String,
    #[serde(default)]
    pub operating_system: String,
    #[serde(default)]
    pub compiler: String,
    #[serde(default)]
    pub processor_bits: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_version_entry_wire_format() {
        let entry = VersionEntry::now("1.0", "1", "Created database version 1", "/srv/releases");
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["appVersion"], "1.0");
        assert_eq!(value["dbVersion"], "1");
        assert!(value["time"].is_string());
    }

    #[test]
    fn test_empty_version_results() {
        assert_eq!(VersionEntry::from_result(None).unwrap(), None);
        assert_eq!(VersionEntry::from_result(Some(json!(null))).unwrap(), None);
        assert_eq!(VersionEntry::from_result(Some(json!({}))).unwrap(), None);
        assert_eq!(
            VersionEntry::from_result(Some(json!({
                "appVersion": "", "dbVersion": "", "time": "2024-01-01T00:00:00Z"
            })))
            .unwrap(),
            None
        );
    }

    #[test]
    fn test_version_result_decodes() {
        let entry = VersionEntry::from_result(Some(json!({
            "appVersion": "1.0", "dbVersion": "1", "description": "d",
            "source": "s", "time": "2024-01-01T00:00:00Z"
        })))
        .unwrap()
        .unwrap();
        assert_eq!(entry.db_version, "1");
    }

    #[test]
    fn test_table_wire_keys_and_csv() {
        let mut table = Table::new(vec!["app".into(), "db".into()]);
        table.push_row(vec!["1.0".into(), "1".into()]);
        table.push_row(vec!["2.0".into(), "2".into()]);

        let value = serde_json::to_value(&table).unwrap();
        assert_eq!(value["header"][0], "app");
        assert_eq!(value["row"][1][0], "2.0");

        assert_eq!(table.as_csv(), "app,db\n1.0,1\n2.0,2");
    }

    #[test]
    fn test_csv_quotes_fields_that_need_it() {
        let mut table = Table::new(vec!["app".into(), "description".into()]);
        table.push_row(vec!["1.0".into(), "schema, then data".into()]);
        table.push_row(vec!["2.0".into(), "the \"big\" one".into()]);
        table.push_row(vec!["3.0".into(), "two\nlines".into()]);

        assert_eq!(
            table.as_csv(),
            "app,description\n1.0,\"schema, then data\"\n2.0,\"the \"\"big\"\" one\"\n3.0,\"two\nlines\""
        );
    }

    #[test]
    fn test_server_info_wire_format() {
        let info: ServerInfo = serde_json::from_value(json!({
            "database": "PostgreSQL 15", "operatingSystem": "linux",
            "compiler": "gcc", "processorBits": "64"
        }))
        .unwrap();
        assert_eq!(info.operating_system, "linux");
    }
}

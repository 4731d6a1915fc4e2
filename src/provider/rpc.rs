//! Wire protocol between the host and a plugin process
//!
//! The host starts the plugin with `DBMAN_DB_PROVIDER=dbman-db-<name>` in its
//! environment. The plugin checks the cookie and writes one handshake line
//! to stdout:
//!
//! ```text
//! 1|dbman-db-<name>
//! ```
//!
//! After that both sides exchange one JSON frame per line: requests on the
//! plugin's stdin, responses on its stdout. Plugin logs go to stderr.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use std::time::Duration;
use strum::Display;

use crate::error::{DbmanError, Result};

/// Version of this wire protocol
pub const PROTOCOL_VERSION: u32 = 1;

/// Environment variable carrying the magic cookie
pub const COOKIE_KEY: &str = "DBMAN_DB_PROVIDER";

/// How long the host waits for the handshake line
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Magic cookie expected from the plugin for provider `name`
pub fn cookie_value(name: &str) -> String {
    format!("dbman-db-{}", name)
}

/// Executable file name of the plugin for provider `name`
pub fn executable_name(name: &str) -> String {
    format!("dbman-db-{}", name)
}

pub fn handshake_line(cookie: &str) -> String {
    format!("{}|{}", PROTOCOL_VERSION, cookie)
}

/// Check a handshake line against the expected cookie
pub fn verify_handshake(line: &str, expected_cookie: &str) -> Result<()> {
    let (version, cookie) = line
        .trim_end()
        .split_once('|')
        .ok_or_else(|| DbmanError::handshake(format!("unrecognised handshake '{}'", line.trim_end())))?;
    let version: u32 = version
        .parse()
        .map_err(|_| DbmanError::handshake(format!("invalid protocol version '{}'", version)))?;
    if version != PROTOCOL_VERSION {
        return Err(DbmanError::handshake(format!(
            "protocol version {} is not supported, expected {}",
            version, PROTOCOL_VERSION
        )));
    }
    if cookie != expected_cookie {
        return Err(DbmanError::handshake(format!(
            "magic cookie '{}' does not match '{}'",
            cookie, expected_cookie
        )));
    }
    Ok(())
}

/// Provider operations callable over the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Method {
    Setup,
    GetVersion,
    SetVersion,
    RunCommand,
    RunQuery,
    GetInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    pub method: Method,
    /// JSON argument of the call, empty for calls without one
    #[serde(default)]
    pub payload: String,
}

/// Either the envelope returned by the provider or a fault raised by the
/// plugin's request loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}

impl RpcResponse {
    pub fn ok(id: u64, payload: String) -> Self {
        Self {
            id,
            payload: Some(payload),
            fault: None,
        }
    }

    pub fn fault(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            payload: None,
            fault: Some(message.into()),
        }
    }
}

/// Write one frame and flush
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, frame: &T) -> std::io::Result<()> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    writer.write_all(line.as_bytes())?;
    writer.flush()
}

/// Read one frame. `Ok(None)` at end of stream.
pub fn read_frame<R: BufRead, T: DeserializeOwned>(reader: &mut R) -> Result<Option<T>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    serde_json::from_str(&line)
        .map(Some)
        .map_err(|e| DbmanError::transport(format!("malformed frame: {}", e)))
}

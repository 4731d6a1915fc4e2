//! Host side of the plugin protocol
//!
//! [`PluginClient`] launches a plugin executable, completes the handshake and
//! then forwards every [`DatabaseProvider`] call as a blocking round-trip.
//! The client owns the child process and stops it exactly once, either on
//! [`PluginClient::shutdown`] or when dropped.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use super::DatabaseProvider;
use super::rpc::{
    self, COOKIE_KEY, HANDSHAKE_TIMEOUT, Method, RpcRequest, RpcResponse, cookie_value,
    verify_handshake,
};
use crate::error::{DbmanError, Result};
use crate::process_guard::{self, ChildRegistry, CommandProcessGroup};

/// Time a plugin gets to exit after its stdin is closed
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// A running plugin process speaking the dbman wire protocol
pub struct PluginClient {
    name: String,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    lines: Receiver<std::io::Result<String>>,
    next_id: u64,
}

impl PluginClient {
    /// Launch `dbman-db-<name>` from `plugins_dir`
    pub fn launch(name: &str, plugins_dir: &Path) -> Result<Self> {
        let path = plugins_dir.join(rpc::executable_name(name));
        Self::launch_executable(name, &path, HANDSHAKE_TIMEOUT)
    }

    /// Launch a plugin executable and complete the handshake within `timeout`.
    ///
    /// A wrong protocol version or cookie stops the child before any call
    /// is made.
    pub fn launch_executable(name: &str, path: &Path, timeout: Duration) -> Result<Self> {
        if !path.is_file() {
            return Err(DbmanError::handshake(format!(
                "I cannot find the plugin '{}' at {}",
                name,
                path.display()
            )));
        }
        let cookie = cookie_value(name);
        tracing::info!("? I am launching the database plugin {}", path.display());

        let mut child = Command::new(path)
            .env(COOKIE_KEY, &cookie)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .in_new_process_group()
            .spawn()
            .map_err(|e| {
                DbmanError::handshake(format!("I cannot start {}: {}", path.display(), e))
            })?;

        let pid = child.id();
        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.register(pid);
        }

        let stdin = child.stdin.take();
        let lines = match child.stdout.take() {
            Some(stdout) => spawn_line_reader(stdout),
            None => {
                let (_, rx) = mpsc::channel();
                rx
            }
        };

        let mut client = Self {
            name: name.to_string(),
            child: Some(child),
            stdin,
            lines,
            next_id: 0,
        };

        if let Err(e) = client.handshake(&cookie, timeout) {
            tracing::error!("!!! plugin '{}' failed to start: {}", name, e);
            client.shutdown();
            return Err(e);
        }
        tracing::debug!("Plugin '{}' is ready (PID {})", name, pid);
        Ok(client)
    }

    fn handshake(&mut self, cookie: &str, timeout: Duration) -> Result<()> {
        match self.lines.recv_timeout(timeout) {
            Ok(Ok(line)) => verify_handshake(&line, cookie),
            Ok(Err(e)) => Err(DbmanError::handshake(format!(
                "cannot read the handshake: {}",
                e
            ))),
            Err(RecvTimeoutError::Timeout) => Err(DbmanError::ProviderTimeout(format!(
                "plugin '{}' did not complete the handshake within {:?}",
                self.name, timeout
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(DbmanError::handshake(format!(
                "plugin '{}' exited before completing the handshake",
                self.name
            ))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// PID of the plugin while it runs
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// One blocking round-trip. Returns the envelope JSON.
    fn call(&mut self, method: Method, payload: &str) -> Result<String> {
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            DbmanError::transport(format!("plugin '{}' has been shut down", self.name))
        })?;
        self.next_id += 1;
        let id = self.next_id;
        let request = RpcRequest {
            id,
            method,
            payload: payload.to_string(),
        };
        rpc::write_frame(stdin, &request).map_err(|e| {
            DbmanError::transport(format!("cannot send {} to plugin '{}': {}", method, self.name, e))
        })?;

        let line = match self.lines.recv() {
            Ok(Ok(line)) => line,
            Ok(Err(e)) => {
                return Err(DbmanError::transport(format!(
                    "cannot read the {} response: {}",
                    method, e
                )));
            }
            Err(_) => {
                return Err(DbmanError::transport(format!(
                    "plugin '{}' exited during {}",
                    self.name, method
                )));
            }
        };
        let response: RpcResponse = serde_json::from_str(&line).map_err(|e| {
            DbmanError::transport(format!("malformed {} response: {}", method, e))
        })?;
        if response.id != id {
            return Err(DbmanError::transport(format!(
                "response id {} does not match request id {}",
                response.id, id
            )));
        }
        match (response.payload, response.fault) {
            (_, Some(fault)) => Err(DbmanError::transport(fault)),
            (Some(payload), None) => Ok(payload),
            (None, None) => Err(DbmanError::transport(format!(
                "empty {} response from plugin '{}'",
                method, self.name
            ))),
        }
    }

    /// Stop the plugin. Safe to call more than once.
    pub fn shutdown(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        // closing stdin ends the plugin's request loop
        drop(self.stdin.take());
        let pid = child.id();

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        let exited = loop {
            match child.try_wait() {
                Ok(Some(_)) => break true,
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(50)),
                _ => break false,
            }
        };
        if !exited {
            process_guard::terminate(pid, SHUTDOWN_GRACE);
        }
        let _ = child.wait();

        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.unregister(pid);
        }
        tracing::debug!("Plugin '{}' (PID {}) stopped", self.name, pid);
    }
}

fn spawn_line_reader<R: std::io::Read + Send + 'static>(stream: R) -> Receiver<std::io::Result<String>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in BufReader::new(stream).lines() {
            let failed = line.is_err();
            if tx.send(line).is_err() || failed {
                break;
            }
        }
    });
    rx
}

impl DatabaseProvider for PluginClient {
    fn setup(&mut self, config: &str) -> Result<String> {
        self.call(Method::Setup, config)
    }

    fn get_version(&mut self) -> Result<String> {
        self.call(Method::GetVersion, "")
    }

    fn set_version(&mut self, version: &str) -> Result<String> {
        self.call(Method::SetVersion, version)
    }

    fn run_command(&mut self, command: &str) -> Result<String> {
        self.call(Method::RunCommand, command)
    }

    fn run_query(&mut self, query: &str) -> Result<String> {
        self.call(Method::RunQuery, query)
    }

    fn get_info(&mut self) -> Result<String> {
        self.call(Method::GetInfo, "")
    }
}

impl Drop for PluginClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Directory searched for plugins when `Plugins` is not configured:
/// the folder of the running executable
pub fn default_plugins_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

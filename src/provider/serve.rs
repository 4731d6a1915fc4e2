//! Plugin side of the wire protocol
//!
//! A plugin binary is a few lines:
//!
//! ```no_run
//! use dbman::provider::{MemoryProvider, serve_plugin};
//!
//! fn main() -> anyhow::Result<()> {
//!     serve_plugin("memory", MemoryProvider::default())
//! }
//! ```

use std::io::{self, BufRead, Write};

use super::DatabaseProvider;
use super::plugin::{DatabasePlugin, PluginDecorator};
use super::rpc::{self, COOKIE_KEY, Method, RpcRequest, RpcResponse, cookie_value, handshake_line};
use crate::error::{DbmanError, Result};

/// Serve `plugin` as provider `name` over stdin/stdout.
///
/// Exits the process with status 1 when it was not launched by dbman
/// (missing or wrong magic cookie).
pub fn serve_plugin<P: DatabasePlugin>(name: &str, plugin: P) -> anyhow::Result<()> {
    // stdout carries the protocol, so logs go to stderr only
    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();

    let cookie = cookie_value(name);
    if std::env::var(COOKIE_KEY).ok().as_deref() != Some(cookie.as_str()) {
        eprintln!(
            "This binary is a dbman database plugin and is not meant to be executed directly.\n\
             It is launched by dbman when Db.Provider is set to '{}'.",
            name
        );
        std::process::exit(1);
    }

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut provider = PluginDecorator::new(plugin);
    serve_connection(&cookie, &mut provider, stdin.lock(), stdout.lock())?;
    Ok(())
}

/// Write the handshake, then answer requests until the reader is closed
pub fn serve_connection<D, R, W>(cookie: &str, provider: &mut D, mut reader: R, mut writer: W) -> Result<()>
where
    D: DatabaseProvider + ?Sized,
    R: BufRead,
    W: Write,
{
    writeln!(writer, "{}", handshake_line(cookie))?;
    writer.flush()?;

    loop {
        let response = match rpc::read_frame::<_, RpcRequest>(&mut reader) {
            Ok(None) => break,
            Ok(Some(request)) => {
                tracing::debug!("Handling {} (request {})", request.method, request.id);
                dispatch(provider, &request)
            }
            Err(DbmanError::Io(e)) => return Err(e.into()),
            Err(e) => RpcResponse::fault(0, e.to_string()),
        };
        rpc::write_frame(&mut writer, &response)?;
    }
    tracing::debug!("Request stream closed, plugin stopping");
    Ok(())
}

fn dispatch<D: DatabaseProvider + ?Sized>(provider: &mut D, request: &RpcRequest) -> RpcResponse {
    let payload = &request.payload;
    let result = match request.method {
        Method::Setup => provider.setup(payload),
        Method::GetVersion => provider.get_version(),
        Method::SetVersion => provider.set_version(payload),
        Method::RunCommand => provider.run_command(payload),
        Method::RunQuery => provider.run_query(payload),
        Method::GetInfo => provider.get_info(),
    };
    match result {
        Ok(envelope) => RpcResponse::ok(request.id, envelope),
        Err(e) => RpcResponse::fault(request.id, e.to_string()),
    }
}

//! The in-memory provider served as a dbman plugin
//!
//! Set `Db.Provider` to `memory` to have dbman launch this binary. The
//! ledger lives as long as the plugin process does.

use dbman::provider::{MemoryProvider, serve_plugin};

fn main() -> anyhow::Result<()> {
    serve_plugin("memory", MemoryProvider::default())
}

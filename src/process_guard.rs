//! Lifecycle management for provider plugin processes
//!
//! Plugins are separate executables owned by the host. They must not outlive
//! it, whether dbman exits normally, fails, or is killed by a signal.
//!
//! - Every plugin runs in its own process group with a parent-death signal
//! - Plugin PIDs are tracked in a global registry
//! - SIGINT, SIGTERM and SIGHUP terminate every registered plugin
//! - Termination sends SIGTERM to the group, then SIGKILL after a grace period

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Grace period given to plugins when the host is signalled
const SIGNAL_GRACE: Duration = Duration::from_secs(3);

/// Registry of running plugin processes
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: HashSet<u32>,
    /// Set once the signal handler started tearing everything down
    cleanup_initiated: bool,
}

impl ChildRegistry {
    /// The process-wide registry
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        tracing::debug!("Registered plugin process PID {}", pid);
    }

    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        tracing::debug!("Unregistered plugin process PID {}", pid);
    }

    pub fn count(&self) -> usize {
        self.pids.len()
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.pids.contains(&pid)
    }

    /// Terminate every registered plugin. Runs at most once per registry.
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if self.cleanup_initiated {
            tracing::debug!("Plugin cleanup already initiated, skipping");
            return;
        }
        self.cleanup_initiated = true;

        if self.pids.is_empty() {
            return;
        }
        tracing::info!("Terminating {} plugin process(es)...", self.pids.len());

        let pids: Vec<u32> = self.pids.drain().collect();
        for &pid in &pids {
            signal_group_or_process(pid, Signal::SIGTERM);
        }
        if !wait_until_dead(&pids, grace_period) {
            for &pid in pids.iter().filter(|&&pid| is_process_alive(pid)) {
                tracing::warn!("Plugin process {} did not stop, sending SIGKILL", pid);
                signal_group_or_process(pid, Signal::SIGKILL);
            }
        }
        tracing::info!("Plugin process cleanup complete");
    }
}

/// Stop one plugin process: SIGTERM to its group, SIGKILL after `grace_period`.
///
/// The caller still has to reap the child.
pub fn terminate(pid: u32, grace_period: Duration) {
    if !is_process_alive(pid) {
        return;
    }
    signal_group_or_process(pid, Signal::SIGTERM);
    if !wait_until_dead(&[pid], grace_period) {
        tracing::warn!("Plugin process {} did not stop, sending SIGKILL", pid);
        signal_group_or_process(pid, Signal::SIGKILL);
    }
}

fn wait_until_dead(pids: &[u32], grace_period: Duration) -> bool {
    let start = Instant::now();
    loop {
        if pids.iter().all(|&pid| !is_process_alive(pid)) {
            return true;
        }
        if start.elapsed() >= grace_period {
            return false;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Signal the process group led by `pid`, falling back to the process alone
fn signal_group_or_process(pid: u32, sig: Signal) {
    if let Err(e) = send_signal_to_group(pid, sig) {
        tracing::debug!("Cannot send {} to process group {}: {}", sig, pid, e);
        if let Err(e) = send_signal(pid, sig) {
            tracing::debug!("Cannot send {} to PID {}: {}", sig, pid, e);
        }
    }
}

fn send_signal(pid: u32, sig: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(pid as i32), sig)
}

/// Negative PID addresses the whole group
fn send_signal_to_group(pgid: u32, sig: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-(pgid as i32)), sig)
}

/// Alive means present and not a zombie
fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }
    // field 3 of /proc/<pid>/stat is the state
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        if let Some(state) = stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
        {
            return !matches!(state, "Z" | "X");
        }
    }
    true
}

/// Install SIGINT, SIGTERM and SIGHUP handlers that stop every plugin and
/// exit with `128 + signal`. Call once at program start.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;
    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            tracing::info!("Received signal {}, stopping plugins...", sig);
            if let Ok(mut registry) = ChildRegistry::global().lock() {
                registry.terminate_all(SIGNAL_GRACE);
            }
            std::process::exit(128 + sig);
        }
    });
    Ok(())
}

/// Run a `std::process::Command` in its own process group
pub trait CommandProcessGroup {
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: the closure only calls async-signal-safe functions
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;
                // the plugin dies with the host
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        self
    }
}

//! Child process lifecycle for provisioning commands
//!
//! Package installs and service reloads run as child processes. If the
//! operator aborts the installer (Ctrl+C, SIGTERM, closed SSH session) those
//! children must not keep mutating the host unattended, so:
//!
//! - every child is spawned in its own process group with a parent-death signal
//! - running child PIDs are tracked in a global registry
//! - on SIGINT/SIGTERM/SIGHUP the registry signals each group, SIGTERM first,
//!   SIGKILL after a grace period

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Registry of running child process groups
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: HashSet<u32>,
    terminating: bool,
}

impl ChildRegistry {
    /// Process-wide registry shared by every `SystemRunner`
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        log::debug!("Tracking child process group {}", pid);
    }

    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        log::debug!("Child process group {} finished", pid);
    }

    pub fn count(&self) -> usize {
        self.pids.len()
    }

    /// Signal every tracked group: SIGTERM, wait up to `grace`, then SIGKILL.
    /// Runs at most once per registry.
    pub fn terminate_all(&mut self, grace: Duration) {
        if self.terminating {
            return;
        }
        self.terminating = true;

        if self.pids.is_empty() {
            return;
        }

        let targets: Vec<u32> = self.pids.iter().copied().collect();
        log::warn!("Stopping {} running provisioning command(s)", targets.len());

        for &pid in &targets {
            if signal_group(pid, Signal::SIGTERM).is_err() {
                let _ = signal_pid(pid, Signal::SIGTERM);
            }
        }

        let started = Instant::now();
        while started.elapsed() < grace {
            if targets.iter().all(|&pid| !is_alive(pid)) {
                self.pids.clear();
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        for &pid in targets.iter().filter(|&&pid| is_alive(pid)) {
            log::warn!("Process group {} ignored SIGTERM, sending SIGKILL", pid);
            if signal_group(pid, Signal::SIGKILL).is_err() {
                let _ = signal_pid(pid, Signal::SIGKILL);
            }
        }
        self.pids.clear();
    }
}

fn signal_pid(pid: u32, sig: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(pid as i32), sig)
}

/// Negative PID addresses the whole group (apt-get and its dpkg children)
fn signal_group(pgid: u32, sig: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-(pgid as i32)), sig)
}

/// Zombies count as dead
fn is_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .split_whitespace()
            .nth(2)
            .map(|state| !matches!(state, "Z" | "X"))
            .unwrap_or(true),
        Err(_) => true,
    }
}

/// Install SIGINT/SIGTERM/SIGHUP handlers that stop tracked children and
/// exit with `128 + signal`. Call once from `main`.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            log::error!("Installation interrupted by signal {}", sig);
            if let Ok(mut registry) = ChildRegistry::global().lock() {
                registry.terminate_all(Duration::from_secs(3));
            }
            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Extension trait for `std::process::Command` to spawn into a fresh process group
pub trait CommandProcessGroup {
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: the closure only calls async-signal-safe setpgid/prctl.
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        self
    }
}

//! Background services: queue workers under supervisor and the scheduler
//! cron entry.
//!
//! Both collaborators render a config file and only touch the host when the
//! rendered content differs from what is already on disk, so calling them
//! twice leaves the same end state as calling them once. A file whose
//! follow-up commands fail is rolled back, so the next run tries again.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::command_runner::{CommandRunner, CommandSpec};
use crate::types::PackageFlavor;

/// What `write_if_changed` did to a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChange {
    Created,
    Updated,
    Unchanged,
}

impl FileChange {
    pub fn changed(&self) -> bool {
        !matches!(self, FileChange::Unchanged)
    }
}

/// Write `content` to `path` unless it already holds exactly that content.
///
/// In dry-run mode nothing is written; the returned value still reports
/// what would have happened.
pub fn write_if_changed(path: &Path, content: &str, dry_run: bool) -> Result<FileChange> {
    let change = match fs::read_to_string(path) {
        Ok(current) if current == content => return Ok(FileChange::Unchanged),
        Ok(_) => FileChange::Updated,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => FileChange::Created,
        Err(e) => return Err(e).with_context(|| format!("Failed to read {:?}", path)),
    };

    if dry_run {
        log::info!("[dry-run] would write {:?} ({:?})", path, change);
        return Ok(change);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {:?}", parent))?;
    }
    fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))?;
    log::info!("{:?} {:?}", change, path);
    Ok(change)
}

/// Write `content` to `path` and, when that changed the file, run `apply`.
///
/// If `apply` fails the previous content is restored (or the new file
/// removed) before the error is returned. A rejected file never stays on
/// disk looking `Unchanged` to the next run.
pub fn write_and_apply<F>(path: &Path, content: &str, dry_run: bool, apply: F) -> Result<FileChange>
where
    F: FnOnce() -> Result<()>,
{
    let previous = match fs::read_to_string(path) {
        Ok(current) => Some(current),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e).with_context(|| format!("Failed to read {:?}", path)),
    };

    let change = write_if_changed(path, content, dry_run)?;
    if !change.changed() {
        return Ok(change);
    }

    if let Err(e) = apply() {
        if !dry_run {
            let restored = match &previous {
                Some(old) => fs::write(path, old),
                None => fs::remove_file(path),
            };
            match restored {
                Ok(()) => log::warn!("Rolled back {:?} after failure", path),
                Err(re) => log::error!("Could not roll back {:?}: {}", path, re),
            }
        }
        return Err(e);
    }
    Ok(change)
}

// ============================================================================
// Supervisor
// ============================================================================

/// Service supervisor collaborator.
pub trait Supervisor {
    fn setup(&mut self) -> Result<()>;
}

/// Queue workers managed by supervisord.
pub struct SupervisorWorkers {
    runner: Rc<dyn CommandRunner>,
    flavor: PackageFlavor,
    conf_dir: PathBuf,
    app_path: PathBuf,
    user: String,
    workers: u8,
}

impl SupervisorWorkers {
    pub const PROGRAM: &'static str = "prodstack-worker";

    pub fn new(
        runner: Rc<dyn CommandRunner>,
        flavor: PackageFlavor,
        app_path: impl Into<PathBuf>,
        user: impl Into<String>,
        workers: u8,
    ) -> Self {
        Self {
            runner,
            flavor,
            conf_dir: PathBuf::from(Self::default_conf_dir(flavor)),
            app_path: app_path.into(),
            user: user.into(),
            workers,
        }
    }

    /// Put program files somewhere other than the distribution's include dir
    pub fn with_conf_dir(mut self, conf_dir: impl Into<PathBuf>) -> Self {
        self.conf_dir = conf_dir.into();
        self
    }

    /// Directory the packaged supervisord.conf includes
    pub fn default_conf_dir(flavor: PackageFlavor) -> &'static str {
        match flavor {
            PackageFlavor::Apt => "/etc/supervisor/conf.d",
            PackageFlavor::Dnf => "/etc/supervisord.d",
        }
    }

    pub fn service_name(flavor: PackageFlavor) -> &'static str {
        match flavor {
            PackageFlavor::Apt => "supervisor",
            PackageFlavor::Dnf => "supervisord",
        }
    }

    pub fn conf_path(&self) -> PathBuf {
        // Fedora/RHEL only include *.ini
        let ext = match self.flavor {
            PackageFlavor::Apt => "conf",
            PackageFlavor::Dnf => "ini",
        };
        self.conf_dir.join(format!("{}.{}", Self::PROGRAM, ext))
    }

    pub fn render(&self) -> String {
        let app = self.app_path.display();
        format!(
            "[program:{program}]\n\
             process_name=%(program_name)s_%(process_num)02d\n\
             command=php {app}/artisan queue:work --sleep=3 --tries=3 --max-time=3600\n\
             directory={app}\n\
             autostart=true\n\
             autorestart=true\n\
             stopasgroup=true\n\
             killasgroup=true\n\
             user={user}\n\
             numprocs={workers}\n\
             redirect_stderr=true\n\
             stdout_logfile={app}/storage/logs/worker.log\n\
             stopwaitsecs=3600\n",
            program = Self::PROGRAM,
            app = app,
            user = self.user,
            workers = self.workers,
        )
    }
}

impl Supervisor for SupervisorWorkers {
    fn setup(&mut self) -> Result<()> {
        let service = Self::service_name(self.flavor);
        let change = write_and_apply(&self.conf_path(), &self.render(), self.runner.is_dry_run(), || {
            for args in [
                &["systemctl", "enable", "--now", service][..],
                &["supervisorctl", "reread"],
                &["supervisorctl", "update"],
            ] {
                self.runner
                    .run_checked(&CommandSpec::new(args[0]).args(args[1..].iter().copied()))
                    .context("Failed to reload supervisor")?;
            }
            Ok(())
        })?;
        if !change.changed() {
            log::info!("Supervisor program already up to date");
        }
        Ok(())
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Scheduled task collaborator.
pub trait Scheduler {
    fn install(&mut self) -> Result<()>;
}

/// Per-minute framework scheduler entry in `/etc/cron.d`.
pub struct CronScheduler {
    runner: Rc<dyn CommandRunner>,
    cron_path: PathBuf,
    app_path: PathBuf,
    user: String,
}

impl CronScheduler {
    pub fn new(
        runner: Rc<dyn CommandRunner>,
        cron_path: impl Into<PathBuf>,
        app_path: impl Into<PathBuf>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            cron_path: cron_path.into(),
            app_path: app_path.into(),
            user: user.into(),
        }
    }

    pub fn render(&self) -> String {
        format!(
            "# Managed by prodstack\n\
             SHELL=/bin/sh\n\
             * * * * * {} cd {} && php artisan schedule:run >> /dev/null 2>&1\n",
            self.user,
            self.app_path.display()
        )
    }
}

impl Scheduler for CronScheduler {
    fn install(&mut self) -> Result<()> {
        let change = write_if_changed(&self.cron_path, &self.render(), self.runner.is_dry_run())?;
        if change.changed() {
            log::info!("Scheduler entry written to {:?}", self.cron_path);
        }
        Ok(())
    }
}

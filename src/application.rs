//! Application installer collaborator
//!
//! `ComposerApp` deploys a Composer-managed PHP application from git:
//! clone (or fast-forward an existing checkout), install production
//! dependencies, then write database settings into `.env` and run the
//! framework's migration and cache commands as the application user.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::command_runner::{CommandRunner, CommandSpec};
use crate::database::Credentials;

const ENV_FILE_MODE: u32 = 0o640;

/// Application installer collaborator.
pub trait ApplicationInstaller {
    fn set_path(&mut self, path: &Path);

    /// Fetch the code and install its dependencies
    fn install(&mut self) -> Result<()>;

    /// Point the application at the database and prepare it to serve
    fn configure(&mut self, credentials: &Credentials) -> Result<()>;
}

pub struct ComposerApp {
    runner: Rc<dyn CommandRunner>,
    path: PathBuf,
    repository: String,
    branch: String,
    user: String,
}

impl ComposerApp {
    pub fn new(
        runner: Rc<dyn CommandRunner>,
        repository: impl Into<String>,
        branch: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            path: PathBuf::new(),
            repository: repository.into(),
            branch: branch.into(),
            user: user.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_path(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            anyhow::bail!("Application path not set");
        }
        Ok(())
    }

    fn fetch_source(&self) -> Result<()> {
        if self.path.join(".git").is_dir() {
            // The checkout belongs to the app user after the first install;
            // git refuses to operate on it as root
            log::info!("Updating existing checkout at {:?}", self.path);
            self.runner
                .run_checked(
                    &self
                        .as_user("git")
                        .args(["pull", "--ff-only", "origin"])
                        .arg(&self.branch),
                )
                .context("Failed to update application source")?;
        } else {
            log::info!("Cloning {} ({}) into {:?}", self.repository, self.branch, self.path);
            self.runner
                .run_checked(
                    &CommandSpec::new("git")
                        .args(["clone", "--branch"])
                        .arg(&self.branch)
                        .arg(&self.repository)
                        .arg(self.path.to_string_lossy()),
                )
                .context("Failed to clone application source")?;
        }
        Ok(())
    }

    /// `program` run as the application user inside the checkout
    fn as_user(&self, program: &str) -> CommandSpec {
        CommandSpec::new("runuser")
            .args(["-u", self.user.as_str(), "--", program])
            .current_dir(&self.path)
    }

    /// `php artisan <args>` as the application user
    fn artisan(&self, args: &[&str]) -> Result<()> {
        self.runner
            .run_checked(&self.as_user("php").arg("artisan").args(args.iter().copied()))
            .map(|_| ())
    }

    fn write_env(&self, credentials: &Credentials) -> Result<()> {
        let env_path = self.path.join(".env");
        if self.runner.is_dry_run() {
            log::info!("[dry-run] would update database settings in {:?}", env_path);
            return Ok(());
        }

        let existing = match fs::read_to_string(&env_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {:?}", env_path)),
        };

        let merged = merge_env(
            &existing,
            &[
                ("DB_DATABASE", credentials.database.as_str()),
                ("DB_USERNAME", credentials.username.as_str()),
                ("DB_PASSWORD", credentials.password.as_str()),
            ],
        );
        if merged != existing {
            fs::write(&env_path, merged).with_context(|| format!("Failed to write {:?}", env_path))?;
        }

        // Holds DB_PASSWORD: readable by the app user's group only
        fs::set_permissions(&env_path, fs::Permissions::from_mode(ENV_FILE_MODE))
            .with_context(|| format!("Failed to restrict {:?}", env_path))?;
        self.runner
            .run_checked(
                &CommandSpec::new("chown")
                    .arg(format!("{0}:{0}", self.user))
                    .arg(env_path.to_string_lossy()),
            )
            .context("Failed to set .env ownership")?;
        Ok(())
    }
}

impl ApplicationInstaller for ComposerApp {
    fn set_path(&mut self, path: &Path) {
        self.path = path.to_path_buf();
    }

    fn install(&mut self) -> Result<()> {
        self.ensure_path()?;
        self.fetch_source()?;

        self.runner
            .run_checked(
                &CommandSpec::new("composer")
                    .args(["install", "--no-dev", "--optimize-autoloader", "--no-interaction"])
                    .env("COMPOSER_ALLOW_SUPERUSER", "1")
                    .current_dir(&self.path),
            )
            .context("Failed to install application dependencies")?;

        let env = self.path.join(".env");
        let example = self.path.join(".env.example");
        if !env.exists() && example.exists() && !self.runner.is_dry_run() {
            fs::copy(&example, &env).with_context(|| format!("Failed to create {:?}", env))?;
        }

        self.runner
            .run_checked(
                &CommandSpec::new("chown")
                    .arg("-R")
                    .arg(format!("{0}:{0}", self.user))
                    .arg(self.path.to_string_lossy()),
            )
            .context("Failed to set application ownership")?;
        Ok(())
    }

    fn configure(&mut self, credentials: &Credentials) -> Result<()> {
        self.ensure_path()?;
        self.write_env(credentials)?;
        self.artisan(&["migrate", "--force"])
            .context("Failed to run database migrations")?;
        self.artisan(&["config:cache"])
            .context("Failed to cache application configuration")?;
        Ok(())
    }
}

/// Set `KEY=value` lines in dotenv text, replacing existing keys in place and
/// appending new ones. Unrelated lines are kept as they are.
pub fn merge_env(existing: &str, updates: &[(&str, &str)]) -> String {
    let mut lines: Vec<String> = existing.lines().map(str::to_string).collect();

    for (key, value) in updates {
        let rendered = format!("{}={}", key, quote_env_value(value));
        let prefix = format!("{}=", key);
        match lines.iter_mut().find(|l| l.trim_start().starts_with(&prefix)) {
            Some(line) => *line = rendered,
            None => lines.push(rendered),
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn quote_env_value(value: &str) -> String {
    let plain = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "_-./:@".contains(c));
    if plain && !value.is_empty() {
        value.to_string()
    } else {
        let escaped = value
            .replace('\\', "\\\\")
            .replace('"', "\\\"")
            .replace('$', "\\$");
        format!("\"{}\"", escaped)
    }
}

//! Database engine collaborator
//!
//! `DatabaseEngine` is the surface the credential negotiator drives:
//! detect, install, baseline-configure, create an application account, test a
//! login, and persist the verified credentials. `MariaDbEngine` implements it
//! with the `mysql` client tools; administrative SQL runs over the root unix
//! socket, application logins pass the password through `MYSQL_PWD` so it
//! never appears in argv.

use anyhow::{Context, Result};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, DirBuilder, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::command_runner::{CommandRunner, CommandSpec};
use crate::package_manager::PackageManager;
use crate::types::PackageFlavor;

/// Length of generated database passwords
pub const GENERATED_PASSWORD_LEN: usize = 24;

/// Database login triple.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub database: String,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            database: database.into(),
        }
    }

    /// Fresh credentials with a random alphanumeric password
    pub fn generate(username: &str, database: &str) -> Self {
        Self::new(username, generate_password(GENERATED_PASSWORD_LEN), database)
    }
}

// Keep passwords out of logs and panic messages
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

pub fn generate_password(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// On-disk credentials record (JSON, mode 0600).
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
    dry_run: bool,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>, dry_run: bool) -> Self {
        Self {
            path: path.into(),
            dry_run,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, credentials: &Credentials) -> Result<()> {
        if self.dry_run {
            log::info!("[dry-run] would save credentials to {:?}", self.path);
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }

        let json = serde_json::to_string_pretty(credentials)
            .context("Failed to serialize credentials")?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&self.path)
            .with_context(|| format!("Failed to open {:?}", self.path))?;
        file.write_all(json.as_bytes())
            .with_context(|| format!("Failed to write credentials to {:?}", self.path))?;

        log::info!("Credentials saved to {:?}", self.path);
        Ok(())
    }

    pub fn load(&self) -> Result<Credentials> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read credentials from {:?}", self.path))?;
        serde_json::from_str(&content).context("Failed to parse credentials record")
    }
}

/// Database engine collaborator.
pub trait DatabaseEngine {
    /// Engine installed and answering on this host
    fn is_installed(&self) -> bool;

    /// Install and start the engine
    fn install(&mut self) -> Result<()>;

    /// Apply the fixed baseline configuration to a fresh install
    fn configure(&mut self) -> Result<()>;

    /// Create the database and account described by `credentials`
    fn create_credentials(&mut self, credentials: &Credentials) -> Result<()>;

    fn set_credentials(&mut self, credentials: Credentials);

    /// Try a live login with the current credentials
    fn test_credentials(&self) -> bool;

    /// Persist the current credentials
    fn save_credentials(&self) -> Result<()>;

    fn get_credentials(&self) -> Option<Credentials>;
}

/// MariaDB server managed through the mysql client tools.
pub struct MariaDbEngine {
    runner: Rc<dyn CommandRunner>,
    packages: Rc<dyn PackageManager>,
    flavor: PackageFlavor,
    store: CredentialStore,
    credentials: Option<Credentials>,
    installed_this_run: bool,
}

impl MariaDbEngine {
    pub fn new(
        runner: Rc<dyn CommandRunner>,
        packages: Rc<dyn PackageManager>,
        flavor: PackageFlavor,
        store: CredentialStore,
    ) -> Self {
        Self {
            runner,
            packages,
            flavor,
            store,
            credentials: None,
            installed_this_run: false,
        }
    }

    fn server_package(&self) -> &'static str {
        match self.flavor {
            PackageFlavor::Apt => "mariadb-server",
            PackageFlavor::Dnf => "mariadb-server",
        }
    }

    /// Run SQL as the database root user over the unix socket
    fn admin_sql(&self, sql: &str) -> Result<()> {
        self.runner
            .run_checked(&CommandSpec::new("mysql").arg("--user=root").stdin(sql))
            .map(|_| ())
    }
}

impl DatabaseEngine for MariaDbEngine {
    fn is_installed(&self) -> bool {
        self.runner
            .probe(&CommandSpec::new("mysqladmin").args(["--silent", "ping"]).read_only())
    }

    fn install(&mut self) -> Result<()> {
        self.packages
            .install_package(self.server_package())
            .context("Failed to install database server")?;
        self.runner
            .run_checked(&CommandSpec::new("systemctl").args(["enable", "--now", "mariadb"]))
            .context("Failed to start database server")?;
        self.installed_this_run = true;
        Ok(())
    }

    fn configure(&mut self) -> Result<()> {
        log::info!("Applying baseline database configuration");
        self.admin_sql(BASELINE_SQL)
            .context("Failed to apply baseline database configuration")
    }

    fn create_credentials(&mut self, credentials: &Credentials) -> Result<()> {
        log::info!(
            "Creating database '{}' for user '{}'",
            credentials.database,
            credentials.username
        );
        self.admin_sql(&account_sql(credentials))
            .context("Failed to create application database account")
    }

    fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = Some(credentials);
    }

    fn test_credentials(&self) -> bool {
        let Some(creds) = &self.credentials else {
            return false;
        };

        // a server installed during a dry run does not exist
        if self.runner.is_dry_run() && self.installed_this_run {
            log::info!("[dry-run] assuming generated credentials connect");
            return true;
        }

        self.runner.probe(
            &CommandSpec::new("mysql")
                .arg(format!("--user={}", creds.username))
                .arg(format!("--database={}", creds.database))
                .args(["--execute", "SELECT 1"])
                .env("MYSQL_PWD", &creds.password)
                .read_only(),
        )
    }

    fn save_credentials(&self) -> Result<()> {
        let creds = self
            .credentials
            .as_ref()
            .context("No credentials to save")?;
        self.store.save(creds)
    }

    fn get_credentials(&self) -> Option<Credentials> {
        self.credentials.clone()
    }
}

const BASELINE_SQL: &str = "\
DELETE FROM mysql.global_priv WHERE User='';
DELETE FROM mysql.global_priv WHERE User='root' AND Host NOT IN ('localhost', '127.0.0.1', '::1');
DROP DATABASE IF EXISTS test;
FLUSH PRIVILEGES;
";

/// Identifiers are validated to `[A-Za-z0-9_]` before reaching here; the
/// password is escaped as a SQL string literal.
fn account_sql(credentials: &Credentials) -> String {
    let password = credentials.password.replace('\\', "\\\\").replace('\'', "\\'");
    format!(
        "CREATE DATABASE IF NOT EXISTS `{db}` CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci;\n\
         CREATE USER IF NOT EXISTS '{user}'@'localhost' IDENTIFIED BY '{pw}';\n\
         ALTER USER '{user}'@'localhost' IDENTIFIED BY '{pw}';\n\
         GRANT ALL PRIVILEGES ON `{db}`.* TO '{user}'@'localhost';\n\
         FLUSH PRIVILEGES;\n",
        db = credentials.database,
        user = credentials.username,
        pw = password,
    )
}

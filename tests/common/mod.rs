//! Shared test doubles
//!
//! Every mock appends `"<collaborator>.<operation>"` to one shared call log so
//! tests can assert the exact cross-collaborator call order.

#![allow(dead_code)]

use anyhow::{Result, bail};
use std::cell::RefCell;
use std::collections::HashSet;
use std::path::Path;
use std::rc::Rc;

use prodstack::application::ApplicationInstaller;
use prodstack::database::{CredentialStore, Credentials, DatabaseEngine};
use prodstack::orchestrator::Collaborators;
use prodstack::package_manager::PackageManager;
use prodstack::requirements::HostProbe;
use prodstack::services::{Scheduler, Supervisor};
use prodstack::types::WebServer;
use prodstack::webserver::{BackendRegistry, WebServerInstaller};

pub type CallLog = Rc<RefCell<Vec<String>>>;

pub fn call_log() -> CallLog {
    Rc::new(RefCell::new(Vec::new()))
}

/// Calls whose name starts with one of `prefixes`
pub fn calls_matching(log: &CallLog, prefixes: &[&str]) -> Vec<String> {
    log.borrow()
        .iter()
        .filter(|c| prefixes.iter().any(|p| c.starts_with(p)))
        .cloned()
        .collect()
}

// ============================================================================
// Probe
// ============================================================================

/// Host probe reporting everything present except `missing`
#[derive(Default)]
pub struct MockProbe {
    pub missing: HashSet<String>,
    pub root: bool,
}

impl MockProbe {
    pub fn satisfied() -> Self {
        Self {
            missing: HashSet::new(),
            root: true,
        }
    }

    pub fn missing(items: &[&str]) -> Self {
        Self {
            missing: items.iter().map(|s| s.to_string()).collect(),
            root: true,
        }
    }

    fn has(&self, name: &str) -> bool {
        !self.missing.contains(name)
    }
}

impl HostProbe for MockProbe {
    fn has_software(&self, name: &str) -> bool {
        self.has(name)
    }
    fn has_os_package(&self, name: &str) -> bool {
        self.has(name)
    }
    fn is_writable(&self, path: &Path) -> bool {
        self.has(&path.display().to_string())
    }
    fn has_command(&self, name: &str) -> bool {
        self.has(name)
    }
    fn is_root(&self) -> bool {
        self.root
    }
}

// ============================================================================
// Package manager
// ============================================================================

pub struct MockPackages {
    pub log: CallLog,
    pub installed: RefCell<HashSet<String>>,
    /// Group whose install fails
    pub failing_group: Option<String>,
}

impl MockPackages {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            installed: RefCell::new(HashSet::new()),
            failing_group: None,
        }
    }
}

impl PackageManager for MockPackages {
    fn install_package_group(&self, group: &str) -> Result<()> {
        self.log.borrow_mut().push(format!("packages.group:{}", group));
        if self.failing_group.as_deref() == Some(group) {
            bail!("E: Unable to locate package group {}", group);
        }
        Ok(())
    }

    fn install_packages(&self, names: &[String]) -> Result<()> {
        let mut installed = self.installed.borrow_mut();
        for name in names {
            if installed.insert(name.clone()) {
                self.log.borrow_mut().push(format!("packages.install:{}", name));
            }
        }
        Ok(())
    }

    fn update_system(&self) -> Result<()> {
        self.log.borrow_mut().push("packages.update".to_string());
        Ok(())
    }

    fn is_installed(&self, name: &str) -> bool {
        self.installed.borrow().contains(name)
    }
}

// ============================================================================
// Database
// ============================================================================

/// Database double. Accepts logins whose password equals `accepted_password`.
pub struct MockDatabase {
    pub log: CallLog,
    pub installed: bool,
    pub accepted_password: Option<String>,
    pub current: Option<Credentials>,
    /// Every credential value that passed `test_credentials`
    pub verified: Rc<RefCell<Vec<Credentials>>>,
    pub saved: Rc<RefCell<Vec<Credentials>>>,
}

impl MockDatabase {
    pub fn existing(log: CallLog, password: &str) -> Self {
        Self {
            log,
            installed: true,
            accepted_password: Some(password.to_string()),
            current: None,
            verified: Rc::default(),
            saved: Rc::default(),
        }
    }

    pub fn fresh(log: CallLog) -> Self {
        Self {
            installed: false,
            accepted_password: None,
            ..Self::existing(log, "")
        }
    }
}

impl DatabaseEngine for MockDatabase {
    fn is_installed(&self) -> bool {
        self.log.borrow_mut().push("database.is_installed".to_string());
        self.installed
    }

    fn install(&mut self) -> Result<()> {
        self.log.borrow_mut().push("database.install".to_string());
        self.installed = true;
        Ok(())
    }

    fn configure(&mut self) -> Result<()> {
        self.log.borrow_mut().push("database.configure".to_string());
        Ok(())
    }

    fn create_credentials(&mut self, credentials: &Credentials) -> Result<()> {
        self.log.borrow_mut().push("database.create".to_string());
        self.accepted_password = Some(credentials.password.clone());
        Ok(())
    }

    fn set_credentials(&mut self, credentials: Credentials) {
        self.current = Some(credentials);
    }

    fn test_credentials(&self) -> bool {
        self.log.borrow_mut().push("database.test".to_string());
        let ok = match (&self.current, &self.accepted_password) {
            (Some(c), Some(pw)) => &c.password == pw,
            _ => false,
        };
        if ok {
            if let Some(c) = &self.current {
                self.verified.borrow_mut().push(c.clone());
            }
        }
        ok
    }

    fn save_credentials(&self) -> Result<()> {
        self.log.borrow_mut().push("database.save".to_string());
        match &self.current {
            Some(c) => {
                self.saved.borrow_mut().push(c.clone());
                Ok(())
            }
            None => bail!("nothing to save"),
        }
    }

    fn get_credentials(&self) -> Option<Credentials> {
        self.current.clone()
    }
}

// ============================================================================
// Application, supervisor, scheduler
// ============================================================================

pub struct MockApplication {
    pub log: CallLog,
}

impl ApplicationInstaller for MockApplication {
    fn set_path(&mut self, path: &Path) {
        self.log.borrow_mut().push(format!("app.set_path:{}", path.display()));
    }
    fn install(&mut self) -> Result<()> {
        self.log.borrow_mut().push("app.install".to_string());
        Ok(())
    }
    fn configure(&mut self, credentials: &Credentials) -> Result<()> {
        self.log
            .borrow_mut()
            .push(format!("app.configure:{}", credentials.username));
        Ok(())
    }
}

pub struct MockSupervisor {
    pub log: CallLog,
}

impl Supervisor for MockSupervisor {
    fn setup(&mut self) -> Result<()> {
        self.log.borrow_mut().push("supervisor.setup".to_string());
        Ok(())
    }
}

pub struct MockScheduler {
    pub log: CallLog,
}

impl Scheduler for MockScheduler {
    fn install(&mut self) -> Result<()> {
        self.log.borrow_mut().push("scheduler.install".to_string());
        Ok(())
    }
}

// ============================================================================
// Web server
// ============================================================================

pub struct MockWebServer {
    pub variant: WebServer,
    pub log: CallLog,
    pub fail_harden: bool,
}

impl MockWebServer {
    pub fn new(variant: WebServer, log: CallLog) -> Self {
        Self {
            variant,
            log,
            fail_harden: false,
        }
    }

    fn record(&self, op: &str) {
        self.log.borrow_mut().push(format!("{}.{}", self.variant, op));
    }
}

impl WebServerInstaller for MockWebServer {
    fn variant(&self) -> WebServer {
        self.variant
    }
    fn install(&mut self) -> Result<()> {
        self.record("install");
        Ok(())
    }
    fn harden(&mut self) -> Result<()> {
        self.record("harden");
        if self.fail_harden {
            bail!("security module missing");
        }
        Ok(())
    }
    fn configure(&mut self) -> Result<()> {
        self.record("configure");
        Ok(())
    }
}

pub fn registry_with(log: &CallLog, variants: &[WebServer]) -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    for variant in variants {
        registry.register(Box::new(MockWebServer::new(*variant, log.clone())));
    }
    registry
}

// ============================================================================
// Assembly
// ============================================================================

/// Collaborators with an already-installed database accepting "secret"
pub fn mock_collaborators(log: &CallLog, dir: &Path) -> Collaborators {
    Collaborators {
        probe: Box::new(MockProbe::satisfied()),
        packages: Rc::new(MockPackages::new(log.clone())),
        database: Box::new(MockDatabase::existing(log.clone(), "secret")),
        application: Box::new(MockApplication { log: log.clone() }),
        credential_store: CredentialStore::new(dir.join("credentials.json"), false),
        supervisor: Box::new(MockSupervisor { log: log.clone() }),
        scheduler: Box::new(MockScheduler { log: log.clone() }),
        web_servers: registry_with(log, &[WebServer::Apache, WebServer::Nginx]),
    }
}

//! Provisioning steps
//!
//! A `Step` is one idempotent unit of work with a fixed position in the
//! `InstallationPlan`. Steps own the collaborators they drive and read the
//! shared run state from a `RunContext` passed into every call.

use anyhow::{Context, Result};
use log::info;
use std::rc::Rc;

use crate::application::ApplicationInstaller;
use crate::config_file::InstallConfig;
use crate::database::{CredentialStore, Credentials, DatabaseEngine};
use crate::negotiator;
use crate::package_manager::{PackageManager, ensure_database_driver};
use crate::prompt::Operator;
use crate::services::{Scheduler, Supervisor};
use crate::types::{StepName, WebServer};
use crate::webserver::WebServerInstaller;

/// Run-scoped state shared by every step.
pub struct RunContext<'a> {
    pub config: &'a InstallConfig,
    pub operator: &'a mut dyn Operator,
    /// Backend chosen for this run
    pub web_server: WebServer,
    /// Set by the credential step once verified
    pub credentials: Option<Credentials>,
}

impl<'a> RunContext<'a> {
    pub fn new(config: &'a InstallConfig, operator: &'a mut dyn Operator, web_server: WebServer) -> Self {
        Self {
            config,
            operator,
            web_server,
            credentials: None,
        }
    }
}

/// One unit of provisioning work.
pub trait Step {
    fn name(&self) -> StepName;

    fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<()>;
}

/// Collaborators consumed when building the standard plan
pub struct PlanParts {
    pub packages: Rc<dyn PackageManager>,
    pub database: Box<dyn DatabaseEngine>,
    pub application: Box<dyn ApplicationInstaller>,
    pub credential_store: CredentialStore,
    pub supervisor: Box<dyn Supervisor>,
    pub scheduler: Box<dyn Scheduler>,
    pub web_server: Box<dyn WebServerInstaller>,
}

/// Ordered steps for one run. Fixed once built.
pub struct InstallationPlan {
    steps: Vec<Box<dyn Step>>,
}

impl InstallationPlan {
    pub fn new(steps: Vec<Box<dyn Step>>) -> Self {
        Self { steps }
    }

    pub fn standard(parts: PlanParts) -> Self {
        Self::new(vec![
            Box::new(DependencyStep {
                packages: parts.packages.clone(),
            }),
            Box::new(OsUpdateStep {
                packages: parts.packages.clone(),
            }),
            Box::new(CredentialStep {
                database: parts.database,
            }),
            Box::new(PackageStep {
                packages: parts.packages,
            }),
            Box::new(ApplicationStep {
                application: parts.application,
                store: parts.credential_store,
            }),
            Box::new(SupervisorStep {
                supervisor: parts.supervisor,
            }),
            Box::new(SchedulerStep {
                scheduler: parts.scheduler,
            }),
            Box::new(WebServerStep {
                installer: parts.web_server,
            }),
        ])
    }

    pub fn names(&self) -> Vec<StepName> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps in execution order
    pub fn steps_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Step>> {
        self.steps.iter_mut()
    }
}

// ============================================================================
// Steps
// ============================================================================

pub struct DependencyStep {
    packages: Rc<dyn PackageManager>,
}

impl Step for DependencyStep {
    fn name(&self) -> StepName {
        StepName::InstallDependencies
    }

    fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<()> {
        self.packages
            .install_packages(&ctx.config.dependency_packages)
            .context("Failed to install bootstrap dependencies")
    }
}

pub struct OsUpdateStep {
    packages: Rc<dyn PackageManager>,
}

impl Step for OsUpdateStep {
    fn name(&self) -> StepName {
        StepName::UpdateOs
    }

    fn run(&mut self, _ctx: &mut RunContext<'_>) -> Result<()> {
        self.packages.update_system()
    }
}

pub struct CredentialStep {
    database: Box<dyn DatabaseEngine>,
}

impl Step for CredentialStep {
    fn name(&self) -> StepName {
        StepName::NegotiateCredentials
    }

    fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<()> {
        let negotiated = negotiator::negotiate(self.database.as_mut(), &mut *ctx.operator, ctx.config)?;
        info!(
            "Using database '{}' as '{}' ({:?})",
            negotiated.credentials.database, negotiated.credentials.username, negotiated.mode
        );
        ctx.credentials = Some(negotiated.credentials);
        Ok(())
    }
}

/// Package groups, then the database driver
pub struct PackageStep {
    packages: Rc<dyn PackageManager>,
}

impl Step for PackageStep {
    fn name(&self) -> StepName {
        StepName::InstallPackages
    }

    fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<()> {
        for group in &ctx.config.package_groups {
            self.packages.install_package_group(&group.name)?;
        }
        ensure_database_driver(self.packages.as_ref(), &ctx.config.database_driver_package)?;
        Ok(())
    }
}

pub struct ApplicationStep {
    application: Box<dyn ApplicationInstaller>,
    store: CredentialStore,
}

impl Step for ApplicationStep {
    fn name(&self) -> StepName {
        StepName::InstallApplication
    }

    fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<()> {
        let credentials = match &ctx.credentials {
            Some(creds) => creds.clone(),
            None => self
                .store
                .load()
                .context("No verified database credentials available")?,
        };

        self.application.set_path(&ctx.config.install_path);
        self.application.install()?;
        self.application.configure(&credentials)
    }
}

pub struct SupervisorStep {
    supervisor: Box<dyn Supervisor>,
}

impl Step for SupervisorStep {
    fn name(&self) -> StepName {
        StepName::SetupSupervisor
    }

    fn run(&mut self, _ctx: &mut RunContext<'_>) -> Result<()> {
        self.supervisor.setup()
    }
}

pub struct SchedulerStep {
    scheduler: Box<dyn Scheduler>,
}

impl Step for SchedulerStep {
    fn name(&self) -> StepName {
        StepName::SetupScheduler
    }

    fn run(&mut self, _ctx: &mut RunContext<'_>) -> Result<()> {
        self.scheduler.install()
    }
}

/// install, harden, configure; always all three, in that order
pub struct WebServerStep {
    installer: Box<dyn WebServerInstaller>,
}

impl Step for WebServerStep {
    fn name(&self) -> StepName {
        StepName::ProvisionWebServer
    }

    fn run(&mut self, _ctx: &mut RunContext<'_>) -> Result<()> {
        let variant = self.installer.variant();
        self.installer
            .install()
            .with_context(|| format!("{} install failed", variant))?;
        self.installer
            .harden()
            .with_context(|| format!("{} hardening failed", variant))?;
        self.installer
            .configure()
            .with_context(|| format!("{} configuration failed", variant))
    }
}

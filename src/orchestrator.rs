//! Orchestrator
//!
//! Runs one production install from start to finish:
//!
//! 1. confirm intent with the operator
//! 2. pick the web server backend and resolve it (unknown name: abort, nothing ran)
//! 3. requirement gate (anything missing: abort with the full report)
//! 4. the `InstallationPlan` steps, in order
//!
//! The first failing step aborts the run. Steps that already completed stay
//! completed; the pipeline is forward-only and has no rollback.

use log::{error, info};
use std::rc::Rc;
use strum::IntoEnumIterator;
use thiserror::Error;

use crate::application::{ApplicationInstaller, ComposerApp};
use crate::command_runner::CommandRunner;
use crate::config_file::InstallConfig;
use crate::database::{CredentialStore, DatabaseEngine, MariaDbEngine};
use crate::error::ProvisionError;
use crate::install_state::{InstallStage, InstallTransitionError, StageTracker};
use crate::package_manager::{PackageManager, SystemPackageManager};
use crate::prompt::Operator;
use crate::requirements::{HostProbe, RequirementChecker, RequirementSet, SystemProbe};
use crate::services::{CronScheduler, Scheduler, Supervisor, SupervisorWorkers};
use crate::steps::{InstallationPlan, PlanParts, RunContext};
use crate::types::{StepName, WebServer};
use crate::webserver::BackendRegistry;

/// Why a run stopped before `Done`.
#[derive(Debug, Error)]
pub enum AbortReason {
    #[error("Installation cancelled by operator")]
    UserDeclined,

    #[error("Requirements not met: {}", .0.summary())]
    RequirementsUnsatisfied(RequirementSet),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Step '{step}' failed: {message}")]
    StepFailed { step: StepName, message: String },

    #[error("Operator input unavailable: {0}")]
    OperatorUnavailable(String),

    #[error("Internal state error: {0}")]
    Internal(#[from] InstallTransitionError),
}

impl AbortReason {
    /// Failing step, when a step caused the abort
    pub fn step(&self) -> Option<StepName> {
        match self {
            Self::StepFailed { step, .. } => Some(*step),
            _ => None,
        }
    }

    fn from_step_error(step: StepName, err: anyhow::Error) -> Self {
        match err.downcast_ref::<ProvisionError>() {
            Some(ProvisionError::Prompt(msg)) => Self::OperatorUnavailable(msg.clone()),
            _ => Self::StepFailed {
                step,
                message: format!("{:#}", err),
            },
        }
    }
}

impl From<ProvisionError> for AbortReason {
    fn from(err: ProvisionError) -> Self {
        match err {
            ProvisionError::Prompt(msg) => Self::OperatorUnavailable(msg),
            ProvisionError::Config(msg) => Self::Configuration(msg),
            other => Self::Configuration(other.to_string()),
        }
    }
}

impl From<AbortReason> for ProvisionError {
    fn from(reason: AbortReason) -> Self {
        match reason {
            AbortReason::UserDeclined => ProvisionError::general("Installation cancelled by operator"),
            AbortReason::RequirementsUnsatisfied(set) => ProvisionError::requirements(set.summary()),
            AbortReason::Configuration(msg) => ProvisionError::Config(msg),
            AbortReason::StepFailed { step, message } => ProvisionError::step(step, message),
            AbortReason::OperatorUnavailable(msg) => ProvisionError::Prompt(msg),
            AbortReason::Internal(err) => err.into(),
        }
    }
}

/// Summary of a completed run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub web_server: WebServer,
    pub steps: Vec<StepName>,
    pub history: Vec<(InstallStage, u64)>,
}

#[derive(Debug)]
pub enum Outcome {
    Completed(RunReport),
    Aborted {
        reason: AbortReason,
        /// Stage the run was in when it stopped
        stage: InstallStage,
    },
}

impl Outcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    pub fn abort_reason(&self) -> Option<&AbortReason> {
        match self {
            Outcome::Aborted { reason, .. } => Some(reason),
            Outcome::Completed(_) => None,
        }
    }

    pub fn into_result(self) -> crate::error::Result<RunReport> {
        match self {
            Outcome::Completed(report) => Ok(report),
            Outcome::Aborted { reason, .. } => Err(reason.into()),
        }
    }

    /// Process exit status: 0 only for a completed run
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Completed(_) => 0,
            Outcome::Aborted { .. } => 1,
        }
    }
}

/// Everything the orchestrator drives on the host.
pub struct Collaborators {
    pub probe: Box<dyn HostProbe>,
    pub packages: Rc<dyn PackageManager>,
    pub database: Box<dyn DatabaseEngine>,
    pub application: Box<dyn ApplicationInstaller>,
    pub credential_store: CredentialStore,
    pub supervisor: Box<dyn Supervisor>,
    pub scheduler: Box<dyn Scheduler>,
    pub web_servers: BackendRegistry,
}

impl Collaborators {
    /// Real host collaborators sharing one command runner
    pub fn system(config: &InstallConfig, runner: Rc<dyn CommandRunner>) -> Self {
        let dry_run = runner.is_dry_run();
        let packages: Rc<dyn PackageManager> = Rc::new(SystemPackageManager::new(
            runner.clone(),
            config.package_flavor,
            config.package_groups.clone(),
        ));
        let credential_store = CredentialStore::new(&config.credentials_path, dry_run);
        let mut supervisor = SupervisorWorkers::new(
            runner.clone(),
            config.package_flavor,
            &config.install_path,
            &config.app_user,
            config.worker_count,
        );
        if let Some(dir) = &config.supervisor_dir {
            supervisor = supervisor.with_conf_dir(dir);
        }

        Self {
            probe: Box::new(SystemProbe::new(runner.clone(), config.package_flavor)),
            database: Box::new(MariaDbEngine::new(
                runner.clone(),
                packages.clone(),
                config.package_flavor,
                credential_store.clone(),
            )),
            application: Box::new(ComposerApp::new(
                runner.clone(),
                &config.repository,
                &config.branch,
                &config.app_user,
            )),
            credential_store,
            supervisor: Box::new(supervisor),
            scheduler: Box::new(CronScheduler::new(
                runner.clone(),
                &config.cron_path,
                &config.install_path,
                &config.app_user,
            )),
            web_servers: BackendRegistry::standard(runner, packages.clone(), config),
            packages,
        }
    }
}

/// Runs the install pipeline once.
pub struct Orchestrator<'a> {
    config: InstallConfig,
    operator: &'a mut dyn Operator,
    collaborators: Collaborators,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: InstallConfig, operator: &'a mut dyn Operator, collaborators: Collaborators) -> Self {
        Self {
            config,
            operator,
            collaborators,
        }
    }

    pub fn run(self) -> Outcome {
        let mut tracker = StageTracker::new();
        match self.execute(&mut tracker) {
            Ok(report) => {
                info!("Installation complete ({} steps)", report.steps.len());
                Outcome::Completed(report)
            }
            Err(reason) => {
                let stage = tracker.current_stage();
                if let Err(e) = tracker.abort() {
                    error!("Could not record abort: {}", e);
                }
                error!("Installation aborted at '{}': {}", stage, reason);
                Outcome::Aborted { reason, stage }
            }
        }
    }

    fn execute(self, tracker: &mut StageTracker) -> Result<RunReport, AbortReason> {
        let Orchestrator {
            config,
            operator,
            collaborators,
        } = self;

        let proceed = operator.confirm(
            &format!(
                "Install {} into {}?",
                config.repository,
                config.install_path.display()
            ),
            false,
        )?;
        if !proceed {
            return Err(AbortReason::UserDeclined);
        }
        tracker.transition_to(InstallStage::Confirmed)?;

        let options: Vec<String> = WebServer::iter().map(|w| w.to_string()).collect();
        let default = WebServer::iter()
            .position(|w| w == config.default_web_server)
            .unwrap_or(0);
        let choice = operator.select("Which web server should serve the application?", &options, default)?;
        let installer = collaborators.web_servers.resolve(&choice)?;
        let web_server = installer.variant();
        info!("Selected web server: {}", web_server);

        let requirements = RequirementChecker::new(&config, collaborators.probe.as_ref()).check_all();
        tracker.transition_to(InstallStage::RequirementsChecked)?;
        if !requirements.has_all_requirements() {
            operator.notify(&requirements.render());
            return Err(AbortReason::RequirementsUnsatisfied(requirements));
        }

        let mut plan = InstallationPlan::standard(PlanParts {
            packages: collaborators.packages,
            database: collaborators.database,
            application: collaborators.application,
            credential_store: collaborators.credential_store,
            supervisor: collaborators.supervisor,
            scheduler: collaborators.scheduler,
            web_server: installer,
        });
        let names = plan.names();

        let mut ctx = RunContext::new(&config, operator, web_server);
        let total = plan.len();
        for (i, step) in plan.steps_mut().enumerate() {
            let name = step.name();
            info!("[{}/{}] {}", i + 1, total, name);
            step.run(&mut ctx)
                .map_err(|e| AbortReason::from_step_error(name, e))?;
            tracker.transition_to(InstallStage::after_step(name))?;
        }

        tracker.advance()?;
        ctx.operator.notify(&format!(
            "Production install complete: {} served by {}",
            config.domain, web_server
        ));

        Ok(RunReport {
            web_server,
            steps: names,
            history: tracker.stage_history().to_vec(),
        })
    }
}

//! prodstack library
//!
//! Installation orchestration for a production web application host: a
//! requirement gate, credential negotiation with the database, a fixed
//! sequence of idempotent provisioning steps, and a pluggable web server
//! backend.

pub mod application;
pub mod cli;
pub mod command_runner;
pub mod config_file;
pub mod database;
pub mod error;
pub mod install_state;
pub mod negotiator;
pub mod orchestrator;
pub mod package_manager;
pub mod process_guard;
pub mod prompt;
pub mod requirements;
pub mod services;
pub mod steps;
pub mod types;
pub mod webserver;

// Re-export main types for convenience
pub use command_runner::{CommandOutput, CommandRunner, CommandSpec, SystemRunner};
pub use config_file::InstallConfig;
pub use database::{CredentialStore, Credentials, DatabaseEngine};
pub use error::ProvisionError;
pub use install_state::{InstallStage, InstallTransitionError, StageTracker};
pub use negotiator::{Attempt, Negotiated, NegotiationMode};
pub use orchestrator::{AbortReason, Collaborators, Orchestrator, Outcome, RunReport};
pub use process_guard::{ChildRegistry, CommandProcessGroup};
pub use prompt::{Answer, Operator, ScriptedOperator, TerminalOperator};
pub use requirements::{HostProbe, RequirementChecker, RequirementSet};
pub use steps::{InstallationPlan, RunContext, Step};
pub use types::{PackageFlavor, RequirementCategory, StepName, WebServer};
pub use webserver::{BackendRegistry, WebServerInstaller};

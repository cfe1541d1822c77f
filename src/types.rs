//! Closed, type-safe enums shared across the installer
//!
//! Every user-selectable or configurable choice is an enum here rather than a
//! free string, so an unknown name fails at parse time instead of mid-run.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Web server backend variant. Exactly one is active per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum WebServer {
    #[strum(serialize = "apache")]
    Apache,
    #[default]
    #[strum(serialize = "nginx")]
    Nginx,
}

impl WebServer {
    /// Service unit name on the host
    pub fn service_name(&self, flavor: PackageFlavor) -> &'static str {
        match (self, flavor) {
            (Self::Apache, PackageFlavor::Apt) => "apache2",
            (Self::Apache, PackageFlavor::Dnf) => "httpd",
            (Self::Nginx, _) => "nginx",
        }
    }
}

/// Host requirement categories checked by the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(Display, EnumIter)]
pub enum RequirementCategory {
    #[strum(serialize = "software")]
    Software,
    #[strum(serialize = "OS packages")]
    OsPackages,
    #[strum(serialize = "filesystem access")]
    FilesystemAccess,
    #[strum(serialize = "commands")]
    Commands,
}

/// Host package manager family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PackageFlavor {
    #[default]
    Apt,
    Dnf,
}

/// Identity of each provisioning step, in pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum StepName {
    InstallDependencies,
    UpdateOs,
    NegotiateCredentials,
    InstallPackages,
    InstallApplication,
    SetupSupervisor,
    SetupScheduler,
    ProvisionWebServer,
}

//! OS package management
//!
//! Wraps the host package manager (apt or dnf) behind `PackageManager`.
//! Every install first asks the package database what is already present and
//! only installs the remainder, so re-running a step never reinstalls.
//!
//! # Transparency
//!
//! The exact package list of every transaction is logged at `info` before
//! it starts.

use anyhow::{Context, Result};
use std::rc::Rc;

use crate::command_runner::{CommandRunner, CommandSpec};
use crate::config_file::PackageGroup;
use crate::requirements::os_package_installed;
use crate::types::PackageFlavor;

/// Package manager collaborator.
pub trait PackageManager {
    /// Install every package of a named group
    fn install_package_group(&self, group: &str) -> Result<()>;

    /// Install one package
    fn install_package(&self, name: &str) -> Result<()> {
        self.install_packages(&[name.to_string()])
    }

    /// Install several packages in one transaction
    fn install_packages(&self, names: &[String]) -> Result<()>;

    /// Refresh package indexes and upgrade installed packages
    fn update_system(&self) -> Result<()>;

    /// Whether a package is installed
    fn is_installed(&self, name: &str) -> bool;
}

/// Host package manager driven through apt-get or dnf.
pub struct SystemPackageManager {
    runner: Rc<dyn CommandRunner>,
    flavor: PackageFlavor,
    groups: Vec<PackageGroup>,
}

impl SystemPackageManager {
    pub fn new(runner: Rc<dyn CommandRunner>, flavor: PackageFlavor, groups: Vec<PackageGroup>) -> Self {
        Self {
            runner,
            flavor,
            groups,
        }
    }

    pub fn flavor(&self) -> PackageFlavor {
        self.flavor
    }

    fn base_command(&self) -> CommandSpec {
        match self.flavor {
            PackageFlavor::Apt => {
                CommandSpec::new("apt-get").env("DEBIAN_FRONTEND", "noninteractive")
            }
            PackageFlavor::Dnf => CommandSpec::new("dnf"),
        }
    }
}

impl PackageManager for SystemPackageManager {
    fn install_package_group(&self, group: &str) -> Result<()> {
        let found = self
            .groups
            .iter()
            .find(|g| g.name == group)
            .with_context(|| format!("Unknown package group: {}", group))?;

        log::info!("Installing package group '{}'", group);
        self.install_packages(&found.packages)
            .with_context(|| format!("Failed to install package group '{}'", group))
    }

    fn install_packages(&self, names: &[String]) -> Result<()> {
        let missing: Vec<&String> = names.iter().filter(|n| !self.is_installed(n)).collect();

        if missing.is_empty() {
            log::info!("Already installed: {:?}", names);
            return Ok(());
        }

        log::info!("Installing packages: {:?}", missing);
        let spec = self
            .base_command()
            .args(["install", "-y"])
            .args(missing.iter().map(|s| s.as_str()));
        self.runner.run_checked(&spec)?;

        log::info!("Package installation complete: {:?}", missing);
        Ok(())
    }

    fn update_system(&self) -> Result<()> {
        log::info!("Updating OS packages ({})", self.flavor);
        match self.flavor {
            PackageFlavor::Apt => {
                self.runner
                    .run_checked(&self.base_command().arg("update"))
                    .context("Failed to refresh package indexes")?;
                self.runner
                    .run_checked(&self.base_command().args(["upgrade", "-y"]))
                    .context("Failed to upgrade packages")?;
            }
            PackageFlavor::Dnf => {
                self.runner
                    .run_checked(&self.base_command().args(["upgrade", "-y", "--refresh"]))
                    .context("Failed to upgrade packages")?;
            }
        }
        Ok(())
    }

    fn is_installed(&self, name: &str) -> bool {
        os_package_installed(self.runner.as_ref(), self.flavor, name)
    }
}

/// Install the database driver package unless it is already present.
///
/// Returns true when an install was performed.
pub fn ensure_database_driver(packages: &dyn PackageManager, driver: &str) -> Result<bool> {
    if driver.trim().is_empty() {
        return Ok(false);
    }
    if packages.is_installed(driver) {
        log::info!("Database driver {} already present", driver);
        return Ok(false);
    }
    packages
        .install_package(driver)
        .with_context(|| format!("Failed to install database driver {}", driver))?;
    Ok(true)
}

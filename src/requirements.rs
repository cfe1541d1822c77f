//! Host requirement gate
//!
//! Verifies the host before anything is mutated. Four independent checks run
//! on every invocation (software, OS packages, filesystem access, commands)
//! and each records its findings instead of stopping at the first miss, so
//! the operator sees the complete deficiency list in one pass.
//!
//! A missing requirement is a normal, reportable state: nothing in here
//! returns an error.

use nix::unistd::{AccessFlags, access};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use strum::IntoEnumIterator;

use crate::command_runner::{CommandRunner, CommandSpec};
use crate::config_file::InstallConfig;
use crate::types::{PackageFlavor, RequirementCategory};

/// Read-only host probing used by the checker.
pub trait HostProbe {
    /// Software responds to `--version`
    fn has_software(&self, name: &str) -> bool;
    /// OS package is installed according to the package database
    fn has_os_package(&self, name: &str) -> bool;
    /// Path (or its nearest existing ancestor) is writable
    fn is_writable(&self, path: &Path) -> bool;
    /// Executable is on PATH
    fn has_command(&self, name: &str) -> bool;
    /// Effective user is root
    fn is_root(&self) -> bool;
}

/// Probes the real host through a `CommandRunner`.
pub struct SystemProbe {
    runner: Rc<dyn CommandRunner>,
    flavor: PackageFlavor,
}

impl SystemProbe {
    pub fn new(runner: Rc<dyn CommandRunner>, flavor: PackageFlavor) -> Self {
        Self { runner, flavor }
    }
}

impl HostProbe for SystemProbe {
    fn has_software(&self, name: &str) -> bool {
        self.runner
            .probe(&CommandSpec::new(name).arg("--version").read_only())
    }

    fn has_os_package(&self, name: &str) -> bool {
        os_package_installed(self.runner.as_ref(), self.flavor, name)
    }

    fn is_writable(&self, path: &Path) -> bool {
        let mut candidate = Some(path);
        while let Some(p) = candidate {
            if p.exists() {
                return access(p, AccessFlags::W_OK).is_ok();
            }
            candidate = p.parent();
        }
        false
    }

    fn has_command(&self, name: &str) -> bool {
        self.runner.probe(
            &CommandSpec::new("sh")
                .args(["-c", "command -v \"$1\"", "sh", name])
                .read_only(),
        )
    }

    fn is_root(&self) -> bool {
        should_skip_root_check() || nix::unistd::geteuid().is_root()
    }
}

/// Package database lookup shared by the probe and the package manager
pub fn os_package_installed(runner: &dyn CommandRunner, flavor: PackageFlavor, name: &str) -> bool {
    match flavor {
        PackageFlavor::Apt => runner
            .run(
                &CommandSpec::new("dpkg-query")
                    .args(["-W", "-f=${Status}", name])
                    .read_only(),
            )
            .map(|o| o.success && o.stdout.contains("install ok installed"))
            .unwrap_or(false),
        PackageFlavor::Dnf => runner.probe(&CommandSpec::new("rpm").args(["-q", name]).read_only()),
    }
}

/// Skip root check (for development/testing)
/// Set PRODSTACK_SKIP_ROOT_CHECK=1 to skip
pub fn should_skip_root_check() -> bool {
    std::env::var("PRODSTACK_SKIP_ROOT_CHECK")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Findings for one category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryState {
    pub checked: Vec<String>,
    pub missing: Vec<String>,
}

impl CategoryState {
    pub fn is_satisfied(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Result of a full requirement check, every category present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementSet {
    states: BTreeMap<RequirementCategory, CategoryState>,
    flavor: PackageFlavor,
}

impl Default for RequirementSet {
    fn default() -> Self {
        Self::new(PackageFlavor::default())
    }
}

impl RequirementSet {
    pub fn new(flavor: PackageFlavor) -> Self {
        Self {
            states: RequirementCategory::iter()
                .map(|c| (c, CategoryState::default()))
                .collect(),
            flavor,
        }
    }

    /// Record one probed item
    pub fn record(&mut self, category: RequirementCategory, item: impl Into<String>, present: bool) {
        let item = item.into();
        let state = self.states.entry(category).or_default();
        if !present {
            state.missing.push(item.clone());
        }
        state.checked.push(item);
    }

    pub fn state(&self, category: RequirementCategory) -> &CategoryState {
        // every category is inserted by `new`
        &self.states[&category]
    }

    pub fn is_satisfied(&self, category: RequirementCategory) -> bool {
        self.state(category).is_satisfied()
    }

    /// True iff every category is fully satisfied
    pub fn has_all_requirements(&self) -> bool {
        self.states.values().all(CategoryState::is_satisfied)
    }

    pub fn unsatisfied_categories(&self) -> Vec<RequirementCategory> {
        self.states
            .iter()
            .filter(|(_, s)| !s.is_satisfied())
            .map(|(c, _)| *c)
            .collect()
    }

    /// Total number of missing items across categories
    pub fn missing_count(&self) -> usize {
        self.states.values().map(|s| s.missing.len()).sum()
    }

    /// One-line summary, e.g. `software: php; commands: composer`
    pub fn summary(&self) -> String {
        self.states
            .iter()
            .filter(|(_, s)| !s.is_satisfied())
            .map(|(c, s)| format!("{}: {}", c, s.missing.join(", ")))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Full operator-facing report with a fix hint per missing item
    pub fn render(&self) -> String {
        let mut out = String::new();
        if self.has_all_requirements() {
            let _ = writeln!(out, "✓ All requirements satisfied");
            return out;
        }

        let _ = writeln!(out, "✗ Host requirements not satisfied:");
        for (category, state) in self.states.iter().filter(|(_, s)| !s.is_satisfied()) {
            let _ = writeln!(out);
            let _ = writeln!(out, "  Missing {}:", category);
            for item in &state.missing {
                let _ = writeln!(out, "    • {} ({})", item, self.hint(*category, item));
            }
        }
        out
    }

    fn hint(&self, category: RequirementCategory, item: &str) -> String {
        match category {
            RequirementCategory::Software => format!("install {}", item),
            RequirementCategory::OsPackages => match self.flavor {
                PackageFlavor::Apt => format!("apt-get install {}", item),
                PackageFlavor::Dnf => format!("dnf install {}", item),
            },
            RequirementCategory::FilesystemAccess if item == ROOT_ITEM => {
                "run with sudo or as root".to_string()
            }
            RequirementCategory::FilesystemAccess => format!("grant write access to {}", item),
            RequirementCategory::Commands => format!("make sure {} is on PATH", item),
        }
    }
}

const ROOT_ITEM: &str = "root privileges";

/// Runs every requirement check against a probe.
pub struct RequirementChecker<'a> {
    probe: &'a dyn HostProbe,
    software: Vec<String>,
    os_packages: Vec<String>,
    writable_paths: Vec<PathBuf>,
    commands: Vec<String>,
    flavor: PackageFlavor,
}

impl<'a> RequirementChecker<'a> {
    pub fn new(config: &InstallConfig, probe: &'a dyn HostProbe) -> Self {
        Self {
            probe,
            software: config.required_software.clone(),
            os_packages: config.required_os_packages.clone(),
            writable_paths: config.writable_paths.clone(),
            commands: config.required_commands.clone(),
            flavor: config.package_flavor,
        }
    }

    /// Run all four checks; never short-circuits.
    pub fn check_all(&self) -> RequirementSet {
        log::debug!("Running requirement checks...");
        let mut set = RequirementSet::new(self.flavor);

        self.check_software(&mut set);
        self.check_os_packages(&mut set);
        self.check_filesystem(&mut set);
        self.check_commands(&mut set);

        if set.has_all_requirements() {
            log::info!("Requirement checks passed");
        } else {
            log::warn!(
                "{} requirement(s) missing: {}",
                set.missing_count(),
                set.summary()
            );
        }
        set
    }

    fn check_software(&self, set: &mut RequirementSet) {
        for name in &self.software {
            set.record(RequirementCategory::Software, name, self.probe.has_software(name));
        }
    }

    fn check_os_packages(&self, set: &mut RequirementSet) {
        for name in &self.os_packages {
            set.record(RequirementCategory::OsPackages, name, self.probe.has_os_package(name));
        }
    }

    fn check_filesystem(&self, set: &mut RequirementSet) {
        set.record(RequirementCategory::FilesystemAccess, ROOT_ITEM, self.probe.is_root());
        for path in &self.writable_paths {
            set.record(
                RequirementCategory::FilesystemAccess,
                path.display().to_string(),
                self.probe.is_writable(path),
            );
        }
    }

    fn check_commands(&self, set: &mut RequirementSet) {
        for name in &self.commands {
            set.record(RequirementCategory::Commands, name, self.probe.has_command(name));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_runner::SystemRunner;
    use std::collections::HashSet;

    /// Probe answering from fixed "missing" sets
    #[derive(Default)]
    struct FakeProbe {
        missing: HashSet<String>,
        root: bool,
    }

    impl FakeProbe {
        fn with_missing(items: &[&str]) -> Self {
            Self {
                missing: items.iter().map(|s| s.to_string()).collect(),
                root: true,
            }
        }
    }

    impl HostProbe for FakeProbe {
        fn has_software(&self, name: &str) -> bool {
            !self.missing.contains(name)
        }
        fn has_os_package(&self, name: &str) -> bool {
            !self.missing.contains(name)
        }
        fn is_writable(&self, path: &Path) -> bool {
            !self.missing.contains(&path.display().to_string())
        }
        fn has_command(&self, name: &str) -> bool {
            !self.missing.contains(name)
        }
        fn is_root(&self) -> bool {
            self.root
        }
    }

    fn config() -> InstallConfig {
        InstallConfig {
            required_software: vec!["php".into(), "git".into()],
            required_os_packages: vec!["ca-certificates".into()],
            required_commands: vec!["composer".into(), "tee".into()],
            writable_paths: vec![PathBuf::from("/var/www")],
            ..Default::default()
        }
    }

    #[test]
    fn test_all_present_passes_gate() {
        let probe = FakeProbe::with_missing(&[]);
        let set = RequirementChecker::new(&config(), &probe).check_all();
        assert!(set.has_all_requirements());
        assert!(set.unsatisfied_categories().is_empty());
        assert!(set.render().contains("All requirements satisfied"));
    }

    #[test]
    fn test_every_missing_item_is_reported() {
        let probe = FakeProbe {
            missing: ["php", "git", "composer", "/var/www"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            root: false,
        };
        let set = RequirementChecker::new(&config(), &probe).check_all();

        assert!(!set.has_all_requirements());
        assert_eq!(
            set.unsatisfied_categories(),
            vec![
                RequirementCategory::Software,
                RequirementCategory::FilesystemAccess,
                RequirementCategory::Commands,
            ]
        );
        assert_eq!(set.state(RequirementCategory::Software).missing, ["php", "git"]);
        assert_eq!(
            set.state(RequirementCategory::FilesystemAccess).missing,
            [ROOT_ITEM, "/var/www"]
        );
        assert_eq!(set.missing_count(), 5);

        let report = set.render();
        assert!(report.contains("php (install php)"));
        assert!(report.contains("run with sudo or as root"));
        assert!(report.contains("composer (make sure composer is on PATH)"));
        assert!(!report.contains("OS packages"));
    }

    #[test]
    fn test_summary_lists_categories() {
        let probe = FakeProbe::with_missing(&["ca-certificates"]);
        let set = RequirementChecker::new(&config(), &probe).check_all();
        assert_eq!(set.summary(), "OS packages: ca-certificates");
        assert!(set.render().contains("apt-get install ca-certificates"));
    }

    #[test]
    fn test_empty_set_is_satisfied() {
        assert!(RequirementSet::default().has_all_requirements());
    }

    #[test]
    fn test_system_probe_finds_sh() {
        let probe = SystemProbe::new(Rc::new(SystemRunner::new(false)), PackageFlavor::Apt);
        assert!(probe.has_command("sh"));
        assert!(!probe.has_command("this_binary_definitely_does_not_exist_12345"));
        assert!(!probe.has_software("this_binary_definitely_does_not_exist_12345"));
    }

    #[test]
    fn test_system_probe_writable_checks_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let probe = SystemProbe::new(Rc::new(SystemRunner::new(false)), PackageFlavor::Apt);
        assert!(probe.is_writable(&dir.path().join("not/yet/created")));
    }

    #[test]
    fn test_command_names_are_not_shell_code() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("pwned");
        let probe = SystemProbe::new(Rc::new(SystemRunner::new(false)), PackageFlavor::Apt);

        let name = format!("sh; touch {}", marker.display());
        assert!(!probe.has_command(&name));
        assert!(!marker.exists());
    }
}

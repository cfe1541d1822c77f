//! Installation configuration file
//!
//! Everything the pipeline needs that is not asked interactively lives in an
//! `InstallConfig`. Files are JSON; every field has a default so a config file
//! only needs to name what differs.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::{PackageFlavor, WebServer};

/// A named set of packages installed together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageGroup {
    pub name: String,
    pub packages: Vec<String>,
}

impl PackageGroup {
    pub fn new(name: &str, packages: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            packages: packages.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Installation configuration that can be saved/loaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    // Application
    pub install_path: PathBuf,
    pub repository: String,
    pub branch: String,
    pub app_user: String,
    pub domain: String,

    // Host
    pub package_flavor: PackageFlavor,
    pub default_web_server: WebServer,
    pub dependency_packages: Vec<String>,
    pub package_groups: Vec<PackageGroup>,
    pub database_driver_package: String,

    // Database
    pub database_name: String,
    pub database_user: String,
    pub credentials_path: PathBuf,

    // Requirement gate
    pub required_software: Vec<String>,
    pub required_os_packages: Vec<String>,
    pub required_commands: Vec<String>,
    pub writable_paths: Vec<PathBuf>,

    // Workers, scheduler, web server files
    pub worker_count: u8,
    /// Overrides the per-flavor supervisor include directory
    pub supervisor_dir: Option<PathBuf>,
    pub cron_path: PathBuf,
    /// Overrides the per-server default site directory
    pub web_config_dir: Option<PathBuf>,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            install_path: PathBuf::from("/var/www/app"),
            repository: "https://github.com/example/app.git".to_string(),
            branch: "main".to_string(),
            app_user: "www-data".to_string(),
            domain: "localhost".to_string(),

            package_flavor: PackageFlavor::Apt,
            default_web_server: WebServer::Nginx,
            dependency_packages: ["curl", "git", "unzip", "ca-certificates"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
            package_groups: vec![
                PackageGroup::new(
                    "php",
                    &[
                        "php-fpm", "php-cli", "php-mbstring", "php-xml", "php-curl", "php-zip",
                        "php-bcmath",
                    ],
                ),
                PackageGroup::new("tooling", &["composer", "supervisor", "cron"]),
                PackageGroup::new("cache", &["redis-server"]),
            ],
            database_driver_package: "php-mysql".to_string(),

            database_name: "app".to_string(),
            database_user: "app".to_string(),
            credentials_path: PathBuf::from("/root/.prodstack/credentials.json"),

            required_software: vec!["bash".to_string(), "systemctl".to_string()],
            required_os_packages: vec!["ca-certificates".to_string()],
            required_commands: vec!["sh".to_string(), "tee".to_string()],
            writable_paths: vec![PathBuf::from("/var/www"), PathBuf::from("/etc")],

            worker_count: 2,
            supervisor_dir: None,
            cron_path: PathBuf::from("/etc/cron.d/prodstack"),
            web_config_dir: None,
        }
    }
}

impl InstallConfig {
    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        Ok(config)
    }

    /// Load `path` if given, otherwise defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.install_path.as_os_str().is_empty() {
            anyhow::bail!("Install path must be specified");
        }
        if !self.install_path.is_absolute() {
            anyhow::bail!("Install path must be absolute: {:?}", self.install_path);
        }

        let repo = self.repository.trim();
        if repo.is_empty() {
            anyhow::bail!("Application repository must be specified");
        }
        if !["http://", "https://", "git@", "ssh://"]
            .iter()
            .any(|prefix| repo.starts_with(prefix))
        {
            anyhow::bail!("Repository URL must start with http://, https://, git@, or ssh://");
        }

        if self.branch.trim().is_empty() {
            anyhow::bail!("Branch must be specified");
        }
        if self.app_user.trim().is_empty() {
            anyhow::bail!("Application user must be specified");
        }
        validate_user_name(&self.app_user)?;

        validate_identifier("Database name", &self.database_name)?;
        validate_identifier("Database user", &self.database_user)?;

        if self.worker_count == 0 || self.worker_count > 64 {
            anyhow::bail!("Worker count must be between 1 and 64");
        }

        for group in &self.package_groups {
            if group.name.trim().is_empty() {
                anyhow::bail!("Package group names cannot be empty");
            }
        }

        Ok(())
    }
}

/// Database identifiers end up inside SQL, so keep them to `[A-Za-z0-9_]`
pub fn validate_identifier(label: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.len() > 64 {
        anyhow::bail!("{} must be 1-64 characters long", label);
    }
    if value.starts_with(|c: char| c.is_ascii_digit()) {
        anyhow::bail!("{} cannot start with a digit", label);
    }
    if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        anyhow::bail!("{} can only contain letters, numbers, and underscores", label);
    }
    Ok(())
}

/// The app user lands in the cron entry, `chown` and `runuser`, so keep it
/// to a plain system account name
pub fn validate_user_name(value: &str) -> Result<()> {
    if value.is_empty() || value.len() > 32 {
        anyhow::bail!("Application user must be 1-32 characters long");
    }
    if value.starts_with('-') {
        anyhow::bail!("Application user cannot start with '-'");
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        anyhow::bail!("Application user can only contain letters, numbers, '_' and '-'");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        InstallConfig::default().validate().unwrap();
    }

    #[test]
    fn test_save_and_load_preserves_fields() {
        let mut config = InstallConfig::default();
        config.default_web_server = WebServer::Apache;
        config.worker_count = 4;

        let file = NamedTempFile::new().unwrap();
        config.save_to_file(file.path()).unwrap();
        let loaded = InstallConfig::load_from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let file = NamedTempFile::new().unwrap();
        fs::write(
            file.path(),
            r#"{ "default_web_server": "apache", "database_name": "shop" }"#,
        )
        .unwrap();

        let loaded = InstallConfig::load_from_file(file.path()).unwrap();
        assert_eq!(loaded.default_web_server, WebServer::Apache);
        assert_eq!(loaded.database_name, "shop");
        assert_eq!(loaded.branch, "main");
    }

    #[test]
    fn test_unknown_web_server_fails_to_load() {
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), r#"{ "default_web_server": "caddy" }"#).unwrap();
        assert!(InstallConfig::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_relative_install_path_rejected() {
        let config = InstallConfig {
            install_path: PathBuf::from("var/www"),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_repository_scheme_checked() {
        let config = InstallConfig {
            repository: "ftp://example.com/app.git".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = InstallConfig {
            repository: "git@github.com:example/app.git".to_string(),
            ..Default::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn test_worker_count_bounds() {
        let config = InstallConfig {
            worker_count: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_identifier_rules() {
        assert!(validate_identifier("db", "app_01").is_ok());
        assert!(validate_identifier("db", "").is_err());
        assert!(validate_identifier("db", "1app").is_err());
        assert!(validate_identifier("db", "app; DROP").is_err());
        assert!(validate_identifier("db", &"a".repeat(65)).is_err());
    }

    #[test]
    fn test_app_user_cannot_inject_into_cron() {
        let config = InstallConfig {
            app_user: "www-data\n* * * * * root /tmp/x".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        assert!(validate_user_name("www-data").is_ok());
        assert!(validate_user_name("deploy_1").is_ok());
        assert!(validate_user_name("-rf").is_err());
        assert!(validate_user_name("a b").is_err());
    }
}

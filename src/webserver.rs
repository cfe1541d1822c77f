//! Web server backends
//!
//! Every backend implements `WebServerInstaller` (install, harden,
//! configure). `BackendRegistry` maps each `WebServer` variant to exactly one
//! installer; `resolve` consumes the registry and hands back the single
//! active backend, or a configuration error before anything has run.
//!
//! Config files go through `write_and_apply`; the service is only reloaded
//! after a file actually changed and the server's own config test passed.
//! A file the server rejects is rolled back, so a re-run tests it again.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::str::FromStr;

use crate::command_runner::{CommandRunner, CommandSpec};
use crate::config_file::InstallConfig;
use crate::error::ProvisionError;
use crate::package_manager::PackageManager;
use crate::services::write_and_apply;
use crate::types::{PackageFlavor, WebServer};

const SITE_FILE: &str = "prodstack.conf";
const HARDENING_FILE: &str = "prodstack-hardening.conf";

/// Web server backend capability.
pub trait WebServerInstaller {
    fn variant(&self) -> WebServer;

    /// Install the server package and start the service
    fn install(&mut self) -> Result<()>;

    /// Apply security settings
    fn harden(&mut self) -> Result<()>;

    /// Serve the application
    fn configure(&mut self) -> Result<()>;
}

/// Host facts shared by both backends
struct Host {
    runner: Rc<dyn CommandRunner>,
    packages: Rc<dyn PackageManager>,
    flavor: PackageFlavor,
    conf_dir: PathBuf,
    domain: String,
    docroot: PathBuf,
}

impl Host {
    fn new(
        runner: Rc<dyn CommandRunner>,
        packages: Rc<dyn PackageManager>,
        config: &InstallConfig,
        default_dir: PathBuf,
    ) -> Self {
        Self {
            runner,
            packages,
            flavor: config.package_flavor,
            conf_dir: config.web_config_dir.clone().unwrap_or(default_dir),
            domain: config.domain.clone(),
            docroot: config.install_path.join("public"),
        }
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<()> {
        self.runner
            .run_checked(&CommandSpec::new(program).args(args.iter().copied()))
            .map(|_| ())
    }

    fn install_and_start(&self, package: &str, service: &str) -> Result<()> {
        self.packages
            .install_package(package)
            .with_context(|| format!("Failed to install {}", package))?;
        self.run("systemctl", &["enable", "--now", service])
            .with_context(|| format!("Failed to start {}", service))
    }

    /// Write a file under the config dir and activate it when it changed
    fn apply<F>(&self, name: &str, content: &str, activate: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let path = self.conf_dir.join(name);
        write_and_apply(&path, content, self.runner.is_dry_run(), activate).map(|_| ())
    }

    fn reload(&self, test: &[&str], service: &str) -> Result<()> {
        self.run(test[0], &test[1..])
            .context("Web server rejected the new configuration")?;
        self.run("systemctl", &["reload", service])
            .with_context(|| format!("Failed to reload {}", service))
    }

    fn php_fpm_socket(&self) -> &'static str {
        match self.flavor {
            PackageFlavor::Apt => "/run/php/php-fpm.sock",
            PackageFlavor::Dnf => "/run/php-fpm/www.sock",
        }
    }
}

// ============================================================================
// Apache
// ============================================================================

pub struct Apache {
    host: Host,
}

impl Apache {
    pub fn new(runner: Rc<dyn CommandRunner>, packages: Rc<dyn PackageManager>, config: &InstallConfig) -> Self {
        let default_dir = match config.package_flavor {
            PackageFlavor::Apt => "/etc/apache2/sites-enabled",
            PackageFlavor::Dnf => "/etc/httpd/conf.d",
        };
        Self {
            host: Host::new(runner, packages, config, PathBuf::from(default_dir)),
        }
    }

    fn service(&self) -> &'static str {
        WebServer::Apache.service_name(self.host.flavor)
    }

    fn reload(&self) -> Result<()> {
        self.host.reload(&["apachectl", "configtest"], self.service())
    }

    pub fn render_hardening() -> String {
        "ServerTokens Prod\n\
         ServerSignature Off\n\
         TraceEnable Off\n\
         <Directory />\n    Options -Indexes\n    AllowOverride None\n</Directory>\n"
            .to_string()
    }

    pub fn render_site(&self) -> String {
        format!(
            "<VirtualHost *:80>\n\
             \x20   ServerName {domain}\n\
             \x20   DocumentRoot {root}\n\
             \x20   <Directory {root}>\n\
             \x20       Options -Indexes +FollowSymLinks\n\
             \x20       AllowOverride All\n\
             \x20       Require all granted\n\
             \x20   </Directory>\n\
             \x20   <FilesMatch \\.php$>\n\
             \x20       SetHandler \"proxy:unix:{socket}|fcgi://localhost\"\n\
             \x20   </FilesMatch>\n\
             </VirtualHost>\n",
            domain = self.host.domain,
            root = self.host.docroot.display(),
            socket = self.host.php_fpm_socket(),
        )
    }
}

impl WebServerInstaller for Apache {
    fn variant(&self) -> WebServer {
        WebServer::Apache
    }

    fn install(&mut self) -> Result<()> {
        self.host.install_and_start(self.service(), self.service())?;
        if self.host.flavor == PackageFlavor::Apt {
            self.host
                .run("a2enmod", &["proxy_fcgi", "setenvif", "rewrite"])
                .context("Failed to enable Apache modules")?;
        }
        Ok(())
    }

    fn harden(&mut self) -> Result<()> {
        self.host.apply(HARDENING_FILE, &Self::render_hardening(), || {
            if self.host.flavor == PackageFlavor::Apt {
                self.host
                    .run("a2dismod", &["-f", "autoindex"])
                    .context("Failed to disable autoindex")?;
            }
            self.reload()
        })
    }

    fn configure(&mut self) -> Result<()> {
        self.host.apply(SITE_FILE, &self.render_site(), || self.reload())
    }
}

// ============================================================================
// Nginx
// ============================================================================

pub struct Nginx {
    host: Host,
}

impl Nginx {
    pub fn new(runner: Rc<dyn CommandRunner>, packages: Rc<dyn PackageManager>, config: &InstallConfig) -> Self {
        Self {
            host: Host::new(runner, packages, config, PathBuf::from("/etc/nginx/conf.d")),
        }
    }

    fn reload(&self) -> Result<()> {
        self.host.reload(&["nginx", "-t"], "nginx")
    }

    pub fn render_hardening() -> String {
        "server_tokens off;\nautoindex off;\n".to_string()
    }

    pub fn render_site(&self) -> String {
        format!(
            "server {{\n\
             \x20   listen 80;\n\
             \x20   server_name {domain};\n\
             \x20   root {root};\n\
             \x20   index index.php;\n\
             \n\
             \x20   location / {{\n\
             \x20       try_files $uri $uri/ /index.php?$query_string;\n\
             \x20   }}\n\
             \n\
             \x20   location ~ \\.php$ {{\n\
             \x20       include fastcgi_params;\n\
             \x20       fastcgi_param SCRIPT_FILENAME $realpath_root$fastcgi_script_name;\n\
             \x20       fastcgi_pass unix:{socket};\n\
             \x20   }}\n\
             \n\
             \x20   location ~ /\\.(?!well-known) {{\n\
             \x20       deny all;\n\
             \x20   }}\n\
             }}\n",
            domain = self.host.domain,
            root = self.host.docroot.display(),
            socket = self.host.php_fpm_socket(),
        )
    }
}

impl WebServerInstaller for Nginx {
    fn variant(&self) -> WebServer {
        WebServer::Nginx
    }

    fn install(&mut self) -> Result<()> {
        self.host.install_and_start("nginx", "nginx")
    }

    fn harden(&mut self) -> Result<()> {
        self.host.apply(HARDENING_FILE, &Self::render_hardening(), || self.reload())
    }

    fn configure(&mut self) -> Result<()> {
        self.host.apply(SITE_FILE, &self.render_site(), || self.reload())
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Closed mapping from backend variant to installer.
#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<WebServer, Box<dyn WebServerInstaller>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apache and Nginx for this host
    pub fn standard(
        runner: Rc<dyn CommandRunner>,
        packages: Rc<dyn PackageManager>,
        config: &InstallConfig,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(Apache::new(runner.clone(), packages.clone(), config)));
        registry.register(Box::new(Nginx::new(runner, packages, config)));
        registry
    }

    /// Register under the installer's own variant, replacing any previous one
    pub fn register(&mut self, installer: Box<dyn WebServerInstaller>) {
        self.backends.insert(installer.variant(), installer);
    }

    pub fn contains(&self, variant: WebServer) -> bool {
        self.backends.contains_key(&variant)
    }

    /// Registered variants, sorted by name
    pub fn variants(&self) -> Vec<WebServer> {
        let mut variants: Vec<WebServer> = self.backends.keys().copied().collect();
        variants.sort_by_key(|v| v.to_string());
        variants
    }

    /// Take the installer for `name`. Pure lookup, nothing runs.
    pub fn resolve(mut self, name: &str) -> crate::error::Result<Box<dyn WebServerInstaller>> {
        let variant = WebServer::from_str(name.trim())
            .map_err(|_| ProvisionError::config(format!("Unknown web server '{}'", name)))?;
        self.backends.remove(&variant).ok_or_else(|| {
            ProvisionError::config(format!("No installer registered for web server '{}'", variant))
        })
    }
}

/// Site file inside a backend config directory
pub fn site_file(conf_dir: &Path) -> PathBuf {
    conf_dir.join(SITE_FILE)
}

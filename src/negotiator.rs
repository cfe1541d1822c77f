//! Credential negotiation
//!
//! Obtains database credentials that have passed a live connection test.
//!
//! - Engine already running: ask the operator for a login, test it, and ask
//!   again until one works. There is no attempt cap; the loop ends only on
//!   success or when the operator goes away (prompt error, signal).
//! - No engine: install it, apply the baseline configuration, generate an
//!   account, and put the generated login through the same test.
//!
//! Either way the credentials are saved only after the test passed, and the
//! value returned is exactly the value that was tested.

use anyhow::{Context, Result};
use log::{info, warn};

use crate::config_file::{InstallConfig, validate_identifier};
use crate::database::{Credentials, DatabaseEngine};
use crate::prompt::Operator;

/// Result of one negotiation round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    Valid(Credentials),
    Invalid(String),
}

/// How the credentials were obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationMode {
    Probed,
    Generated,
}

#[derive(Debug, Clone)]
pub struct Negotiated {
    pub credentials: Credentials,
    pub mode: NegotiationMode,
    /// Rounds taken, including the successful one
    pub attempts: usize,
}

/// Drives a `DatabaseEngine` and an `Operator` to verified credentials.
pub struct CredentialNegotiator<'a> {
    engine: &'a mut dyn DatabaseEngine,
    operator: &'a mut dyn Operator,
    default_user: String,
    default_database: String,
}

impl<'a> CredentialNegotiator<'a> {
    pub fn new(
        engine: &'a mut dyn DatabaseEngine,
        operator: &'a mut dyn Operator,
        config: &InstallConfig,
    ) -> Self {
        Self {
            engine,
            operator,
            default_user: config.database_user.clone(),
            default_database: config.database_name.clone(),
        }
    }

    pub fn negotiate(mut self) -> Result<Negotiated> {
        let negotiated = if self.engine.is_installed() {
            info!("Database engine found, asking for existing credentials");
            self.probe_existing()?
        } else {
            info!("No database engine found, installing a fresh one");
            self.provision_fresh()?
        };

        self.engine
            .save_credentials()
            .context("Failed to persist verified credentials")?;
        Ok(negotiated)
    }

    fn probe_existing(&mut self) -> Result<Negotiated> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.attempt_existing()? {
                Attempt::Valid(credentials) => {
                    info!("Database credentials verified after {} attempt(s)", attempts);
                    return Ok(Negotiated {
                        credentials,
                        mode: NegotiationMode::Probed,
                        attempts,
                    });
                }
                Attempt::Invalid(reason) => {
                    warn!("Credential attempt {} rejected: {}", attempts, reason);
                    self.operator
                        .notify(&format!("{}. Please try again.", reason));
                }
            }
        }
    }

    /// One operator round: collect, validate shape, then test live
    fn attempt_existing(&mut self) -> Result<Attempt> {
        let username = self
            .operator
            .ask("Database username", Some(&self.default_user))?;
        let password = self.operator.ask_secret("Database password")?;
        let database = self
            .operator
            .ask("Database name", Some(&self.default_database))?;

        for (label, value) in [("Database username", &username), ("Database name", &database)] {
            if let Err(e) = validate_identifier(label, value) {
                return Ok(Attempt::Invalid(e.to_string()));
            }
        }

        Ok(self.verify(Credentials::new(username, password, database)))
    }

    fn provision_fresh(&mut self) -> Result<Negotiated> {
        self.engine.install()?;
        self.engine.configure()?;

        let generated = Credentials::generate(&self.default_user, &self.default_database);
        self.engine.create_credentials(&generated)?;

        match self.verify(generated) {
            Attempt::Valid(credentials) => {
                info!("Generated database credentials verified");
                self.operator.notify(&format!(
                    "Created database '{}' with user '{}'",
                    credentials.database, credentials.username
                ));
                Ok(Negotiated {
                    credentials,
                    mode: NegotiationMode::Generated,
                    attempts: 1,
                })
            }
            Attempt::Invalid(reason) => anyhow::bail!("Generated credentials failed: {}", reason),
        }
    }

    fn verify(&mut self, credentials: Credentials) -> Attempt {
        self.engine.set_credentials(credentials.clone());
        if self.engine.test_credentials() {
            Attempt::Valid(credentials)
        } else {
            Attempt::Invalid(format!(
                "Could not connect to database '{}' as '{}'",
                credentials.database, credentials.username
            ))
        }
    }
}

/// Convenience wrapper used by the credential step
pub fn negotiate(
    engine: &mut dyn DatabaseEngine,
    operator: &mut dyn Operator,
    config: &InstallConfig,
) -> Result<Negotiated> {
    CredentialNegotiator::new(engine, operator, config).negotiate()
}

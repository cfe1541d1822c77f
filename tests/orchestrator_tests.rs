//! Orchestrator pipeline tests
//!
//! These tests verify:
//! - Steps run in the fixed order and each only after its predecessor succeeded
//! - The first failing step aborts the run and nothing after it runs
//! - Declining, a failed gate, or an unknown backend abort before any mutation

mod common;

use common::*;
use prodstack::config_file::InstallConfig;
use prodstack::install_state::InstallStage;
use prodstack::orchestrator::{AbortReason, Orchestrator, Outcome};
use prodstack::prompt::{Answer, ScriptedOperator};
use prodstack::types::{StepName, WebServer};
use std::rc::Rc;

fn text(s: &str) -> Answer {
    Answer::Text(s.to_string())
}

/// confirm, pick backend, then one good credential round
fn happy_answers(backend: &str) -> Vec<Answer> {
    vec![
        Answer::Bool(true),
        text(backend),
        text("app"),
        text("secret"),
        text("app"),
    ]
}

// =============================================================================
// Ordering
// =============================================================================

#[test]
fn test_full_run_invokes_steps_in_fixed_order() {
    let dir = tempfile::tempdir().unwrap();
    let log = call_log();
    let mut operator = ScriptedOperator::new(happy_answers("nginx"));

    let outcome = Orchestrator::new(
        InstallConfig::default(),
        &mut operator,
        mock_collaborators(&log, dir.path()),
    )
    .run();

    assert!(outcome.is_completed(), "unexpected outcome: {:?}", outcome);
    assert_eq!(outcome.exit_code(), 0);

    assert_eq!(
        *log.borrow(),
        vec![
            "packages.install:curl",
            "packages.install:git",
            "packages.install:unzip",
            "packages.install:ca-certificates",
            "packages.update",
            "database.is_installed",
            "database.test",
            "database.save",
            "packages.group:php",
            "packages.group:tooling",
            "packages.group:cache",
            "packages.install:php-mysql",
            "app.set_path:/var/www/app",
            "app.install",
            "app.configure:app",
            "supervisor.setup",
            "scheduler.install",
            "nginx.install",
            "nginx.harden",
            "nginx.configure",
        ]
    );
}

#[test]
fn test_report_lists_steps_and_stage_history() {
    let dir = tempfile::tempdir().unwrap();
    let log = call_log();
    let mut operator = ScriptedOperator::new(happy_answers("apache"));

    let outcome = Orchestrator::new(
        InstallConfig::default(),
        &mut operator,
        mock_collaborators(&log, dir.path()),
    )
    .run();

    let Outcome::Completed(report) = outcome else {
        panic!("expected completion");
    };
    assert_eq!(report.web_server, WebServer::Apache);
    assert_eq!(
        report.steps,
        vec![
            StepName::InstallDependencies,
            StepName::UpdateOs,
            StepName::NegotiateCredentials,
            StepName::InstallPackages,
            StepName::InstallApplication,
            StepName::SetupSupervisor,
            StepName::SetupScheduler,
            StepName::ProvisionWebServer,
        ]
    );
    let stages: Vec<InstallStage> = report.history.iter().map(|(s, _)| *s).collect();
    assert_eq!(stages, InstallStage::all_stages()[1..].to_vec());
    assert_eq!(
        calls_matching(&log, &["apache.", "nginx."]),
        vec!["apache.install", "apache.harden", "apache.configure"]
    );
}

#[test]
fn test_credential_retries_stay_inside_the_negotiation_step() {
    let dir = tempfile::tempdir().unwrap();
    let log = call_log();
    let mut operator = ScriptedOperator::new([
        Answer::Bool(true),
        text("nginx"),
        text("app"),
        text("wrong"),
        text("app"),
        text("app"),
        text("secret"),
        text("app"),
    ]);

    let outcome = Orchestrator::new(
        InstallConfig::default(),
        &mut operator,
        mock_collaborators(&log, dir.path()),
    )
    .run();

    assert!(outcome.is_completed());
    assert_eq!(
        calls_matching(&log, &["database."]),
        vec!["database.is_installed", "database.test", "database.test", "database.save"]
    );
}

// =============================================================================
// Abort propagation
// =============================================================================

#[test]
fn test_package_failure_stops_everything_after_it() {
    let dir = tempfile::tempdir().unwrap();
    let log = call_log();
    let mut collaborators = mock_collaborators(&log, dir.path());
    let mut packages = MockPackages::new(log.clone());
    packages.failing_group = Some("tooling".to_string());
    collaborators.packages = Rc::new(packages);

    let mut operator = ScriptedOperator::new(happy_answers("nginx"));
    let outcome = Orchestrator::new(InstallConfig::default(), &mut operator, collaborators).run();

    match &outcome {
        Outcome::Aborted {
            reason: AbortReason::StepFailed { step, message },
            stage,
        } => {
            assert_eq!(*step, StepName::InstallPackages);
            assert!(message.contains("tooling"), "message: {}", message);
            assert_eq!(*stage, InstallStage::CredentialsReady);
        }
        other => panic!("expected step failure, got {:?}", other),
    }
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(outcome.abort_reason().and_then(|r| r.step()), Some(StepName::InstallPackages));

    let log = log.borrow();
    assert_eq!(log.last().map(String::as_str), Some("packages.group:tooling"));
    assert!(!log.iter().any(|c| c.starts_with("app.")
        || c.starts_with("supervisor.")
        || c.starts_with("scheduler.")
        || c.starts_with("nginx.")));
}

#[test]
fn test_backend_failure_names_the_web_server_step() {
    let dir = tempfile::tempdir().unwrap();
    let log = call_log();
    let mut collaborators = mock_collaborators(&log, dir.path());
    let mut registry = registry_with(&log, &[WebServer::Apache]);
    let mut nginx = MockWebServer::new(WebServer::Nginx, log.clone());
    nginx.fail_harden = true;
    registry.register(Box::new(nginx));
    collaborators.web_servers = registry;

    let mut operator = ScriptedOperator::new(happy_answers("nginx"));
    let outcome = Orchestrator::new(InstallConfig::default(), &mut operator, collaborators).run();

    let reason = outcome.abort_reason().unwrap();
    assert_eq!(reason.step(), Some(StepName::ProvisionWebServer));
    assert!(reason.to_string().contains("nginx hardening failed"));
    assert_eq!(
        calls_matching(&log, &["nginx."]),
        vec!["nginx.install", "nginx.harden"]
    );
}

// =============================================================================
// Early aborts (no mutation)
// =============================================================================

#[test]
fn test_declining_aborts_before_anything_runs() {
    let dir = tempfile::tempdir().unwrap();
    let log = call_log();
    let mut operator = ScriptedOperator::new([Answer::Bool(false)]);

    let outcome = Orchestrator::new(
        InstallConfig::default(),
        &mut operator,
        mock_collaborators(&log, dir.path()),
    )
    .run();

    assert!(matches!(
        outcome,
        Outcome::Aborted {
            reason: AbortReason::UserDeclined,
            stage: InstallStage::Init
        }
    ));
    assert_ne!(outcome.exit_code(), 0);
    assert!(log.borrow().is_empty());
    assert_eq!(operator.questions().len(), 1);
}

#[test]
fn test_failed_gate_reports_every_category_and_mutates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let log = call_log();
    let mut collaborators = mock_collaborators(&log, dir.path());
    collaborators.probe = Box::new(MockProbe {
        root: false,
        ..MockProbe::missing(&["bash", "tee"])
    });

    let mut operator = ScriptedOperator::new(happy_answers("nginx"));
    let outcome = Orchestrator::new(InstallConfig::default(), &mut operator, collaborators).run();

    match &outcome {
        Outcome::Aborted {
            reason: AbortReason::RequirementsUnsatisfied(set),
            stage,
        } => {
            assert_eq!(*stage, InstallStage::RequirementsChecked);
            assert_eq!(set.unsatisfied_categories().len(), 3);
            assert_eq!(set.missing_count(), 3);
        }
        other => panic!("expected requirement failure, got {:?}", other),
    }
    assert!(log.borrow().is_empty());

    let report = operator.messages().join("\n");
    assert!(report.contains("bash"));
    assert!(report.contains("root privileges"));
    assert!(report.contains("tee"));
}

#[test]
fn test_unregistered_backend_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let log = call_log();
    let mut collaborators = mock_collaborators(&log, dir.path());
    collaborators.web_servers = registry_with(&log, &[WebServer::Nginx]);

    let mut operator = ScriptedOperator::new(happy_answers("apache"));
    let outcome = Orchestrator::new(InstallConfig::default(), &mut operator, collaborators).run();

    assert!(matches!(
        outcome.abort_reason(),
        Some(AbortReason::Configuration(_))
    ));
    assert!(log.borrow().is_empty(), "calls made: {:?}", log.borrow());
    // gate never ran, so no credential prompts were consumed
    assert_eq!(operator.remaining(), 3);
}

#[test]
fn test_unknown_backend_named_in_answers_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let log = call_log();
    let mut operator = ScriptedOperator::new(happy_answers("caddy"));

    let outcome = Orchestrator::new(
        InstallConfig::default(),
        &mut operator,
        mock_collaborators(&log, dir.path()),
    )
    .run();

    match &outcome {
        Outcome::Aborted { reason: AbortReason::Configuration(msg), stage } => {
            assert!(msg.contains("caddy"), "{}", msg);
            assert_eq!(*stage, InstallStage::Confirmed);
        }
        other => panic!("expected configuration error, got {:?}", other),
    }
    assert!(log.borrow().is_empty(), "calls made: {:?}", log.borrow());
    assert_eq!(operator.remaining(), 3);
}

#[test]
fn test_operator_disappearing_mid_negotiation_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let log = call_log();
    let mut operator = ScriptedOperator::new([
        Answer::Bool(true),
        text("nginx"),
        text("app"),
        text("wrong"),
        text("app"),
    ]);

    let outcome = Orchestrator::new(
        InstallConfig::default(),
        &mut operator,
        mock_collaborators(&log, dir.path()),
    )
    .run();

    assert!(matches!(
        outcome.abort_reason(),
        Some(AbortReason::OperatorUnavailable(_))
    ));
    assert!(!log.borrow().iter().any(|c| c == "database.save"));
    assert!(!log.borrow().iter().any(|c| c.starts_with("packages.group")));
}

//! prodstack - main entry point
//!
//! Parses the command line, sets up logging and signal handling, and hands
//! off to the library.

use log::{debug, error, info};
use std::path::Path;
use std::rc::Rc;

use prodstack::cli::{Cli, Commands};
use prodstack::command_runner::{CommandRunner, SystemRunner};
use prodstack::config_file::InstallConfig;
use prodstack::orchestrator::{Collaborators, Orchestrator, Outcome};
use prodstack::process_guard;
use prodstack::prompt::{Operator, ScriptedOperator, TerminalOperator};
use prodstack::requirements::{RequirementChecker, SystemProbe};

/// Initialize the logger with appropriate settings
fn init_logger() {
    use env_logger::Builder;
    use std::io::Write;

    Builder::from_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}:{}] {}",
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .parse_default_env() // RUST_LOG overrides
        .init();
}

fn main() {
    init_logger();
    info!("prodstack starting up");

    // Tracked children are terminated if we receive SIGINT/SIGTERM/SIGHUP
    if let Err(e) = process_guard::init_signal_handlers() {
        log::warn!("Failed to initialize signal handlers: {}", e);
    }
    debug!("Signal handlers initialized");

    let cli = Cli::parse_args();
    if cli.dry_run {
        info!("Dry-run mode: no changes will be made");
    }

    let code = match cli.command {
        Some(Commands::Validate { config }) => validate(&config),
        Some(Commands::Check { config }) => check(config.as_deref(), cli.dry_run),
        Some(Commands::Install { config, answers }) => {
            install(config.as_deref(), answers.as_deref(), cli.dry_run)
        }
        None => install(None, None, cli.dry_run),
    };

    std::process::exit(code);
}

fn validate(path: &Path) -> i32 {
    info!("Validating configuration file: {:?}", path);
    match InstallConfig::load_from_file(path).and_then(|c| c.validate()) {
        Ok(()) => {
            println!("✓ Configuration file is valid: {:?}", path);
            0
        }
        Err(e) => {
            error!("Configuration validation failed: {:#}", e);
            eprintln!("✗ Configuration validation failed: {:#}", e);
            1
        }
    }
}

fn load_config(path: Option<&Path>) -> Option<InstallConfig> {
    let loaded = InstallConfig::load_or_default(path).and_then(|c| {
        c.validate()?;
        Ok(c)
    });
    match loaded {
        Ok(config) => Some(config),
        Err(e) => {
            error!("Invalid configuration: {:#}", e);
            eprintln!("✗ Invalid configuration: {:#}", e);
            None
        }
    }
}

fn check(config: Option<&Path>, dry_run: bool) -> i32 {
    let Some(config) = load_config(config) else {
        return 1;
    };

    let runner: Rc<dyn CommandRunner> = Rc::new(SystemRunner::new(dry_run));
    let probe = SystemProbe::new(runner, config.package_flavor);
    let set = RequirementChecker::new(&config, &probe).check_all();

    if set.has_all_requirements() {
        println!("✓ All requirements satisfied");
        0
    } else {
        println!("{}", set.render());
        1
    }
}

fn install(config: Option<&Path>, answers: Option<&Path>, dry_run: bool) -> i32 {
    let Some(config) = load_config(config) else {
        return 1;
    };

    let mut operator: Box<dyn Operator> = match answers {
        Some(path) => match ScriptedOperator::from_file(path) {
            Ok(op) => Box::new(op),
            Err(e) => {
                eprintln!("✗ {:#}", e);
                return 1;
            }
        },
        None => Box::new(TerminalOperator::new()),
    };

    let runner: Rc<dyn CommandRunner> = Rc::new(SystemRunner::new(dry_run));
    let collaborators = Collaborators::system(&config, runner);

    let outcome = Orchestrator::new(config, operator.as_mut(), collaborators).run();
    let code = outcome.exit_code();
    let stage = match &outcome {
        Outcome::Aborted { stage, .. } => Some(*stage),
        Outcome::Completed(_) => None,
    };

    match outcome.into_result() {
        Ok(report) => {
            println!("✓ Production install complete ({})", report.web_server);
            for (stage, ts) in &report.history {
                debug!("  {} @ {}", stage, ts);
            }
        }
        Err(e) => {
            let stage = stage.map(|s| s.to_string()).unwrap_or_default();
            eprintln!("✗ Installation aborted during '{}': {}", stage, e);
        }
    }
    code
}

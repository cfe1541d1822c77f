//! External command execution
//!
//! Every collaborator that touches the host goes through a `CommandRunner`.
//! `SystemRunner` is the only implementation that spawns processes; tests
//! substitute recording fakes.
//!
//! # Rules
//!
//! - Children spawn in a new process group and are tracked in
//!   `ChildRegistry::global()` for the lifetime of the command.
//! - Commands are mutating unless built with `read_only()`. In dry-run mode
//!   mutating commands are logged and reported as successful without running;
//!   read-only probes still execute so requirement checks stay truthful.
//! - Environment values are never logged, only their keys (passwords travel
//!   through `MYSQL_PWD`).

use anyhow::{Context, Result};
use log::{debug, info};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;

use crate::process_guard::{ChildRegistry, CommandProcessGroup};

/// A fully described external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<String>,
    pub current_dir: Option<PathBuf>,
    pub mutating: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
            current_dir: None,
            mutating: true,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Mark as a probe that never changes host state
    pub fn read_only(mut self) -> Self {
        self.mutating = false;
        self
    }

    /// `program arg1 arg2` for logs and error messages
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Output from a command execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// None if terminated by signal
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl CommandOutput {
    /// Successful output with the given stdout (used by dry-run and fakes)
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
            success: true,
        }
    }

    /// Failed output with the given exit code and stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: Some(code),
            success: false,
        }
    }

    /// Convert a non-zero exit into an error naming `context`
    pub fn ensure_success(&self, context: &str) -> Result<()> {
        if self.success {
            Ok(())
        } else {
            anyhow::bail!(
                "{} failed (exit code {}): {}",
                context,
                self.exit_code.unwrap_or(-1),
                self.stderr.trim()
            )
        }
    }
}

/// Executes external commands on the host.
pub trait CommandRunner {
    /// Run `spec` to completion. A non-zero exit is `Ok` with
    /// `success == false`; `Err` means the command could not run at all.
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Whether mutations are being simulated
    fn is_dry_run(&self) -> bool {
        false
    }

    /// Run and require a zero exit status
    fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let output = self.run(spec)?;
        output.ensure_success(&spec.display())?;
        Ok(output)
    }

    /// Run a read-only probe and report only whether it succeeded
    fn probe(&self, spec: &CommandSpec) -> bool {
        self.run(spec).map(|o| o.success).unwrap_or(false)
    }
}

/// Spawns real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner {
    dry_run: bool,
}

impl SystemRunner {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let env_keys: Vec<&str> = spec.env.iter().map(|(k, _)| k.as_str()).collect();

        if self.dry_run && spec.mutating {
            info!("[dry-run] {} env={:?}", spec.display(), env_keys);
            return Ok(CommandOutput::ok(""));
        }

        if spec.mutating {
            info!("Running: {} env={:?}", spec.display(), env_keys);
        } else {
            debug!("Probing: {}", spec.display());
        }

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .in_new_process_group();
        if let Some(dir) = &spec.current_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn: {}", spec.program))?;
        let pid = child.id();

        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.register(pid);
        }

        // stdin is fed from its own thread while stdout/stderr drain here,
        // so a chatty child cannot fill its output pipe and stall us
        let writer = match (spec.stdin.clone(), child.stdin.take()) {
            (Some(input), Some(mut pipe)) => {
                Some(thread::spawn(move || pipe.write_all(input.as_bytes())))
            }
            _ => None,
        };

        let output = child.wait_with_output();

        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.unregister(pid);
        }

        if let Some(writer) = writer {
            match writer.join() {
                Ok(Ok(())) => {}
                // The child exited without reading all of its input
                Ok(Err(e)) if e.kind() == ErrorKind::BrokenPipe => {
                    debug!("{} closed stdin early", spec.program);
                }
                Ok(Err(e)) => {
                    return Err(e).with_context(|| format!("Failed writing stdin of {}", spec.program));
                }
                Err(_) => anyhow::bail!("stdin writer for {} panicked", spec.program),
            }
        }

        let output = output.with_context(|| format!("Failed waiting for {}", spec.program))?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
            success: output.status.success(),
        };

        if !result.success {
            debug!(
                "{} exited with {:?}: {}",
                spec.program,
                result.exit_code,
                result.stderr.trim()
            );
        }

        Ok(result)
    }

    fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_builder_and_display() {
        let spec = CommandSpec::new("apt-get")
            .args(["install", "-y"])
            .arg("git")
            .env("DEBIAN_FRONTEND", "noninteractive");
        assert_eq!(spec.display(), "apt-get install -y git");
        assert!(spec.mutating);
        assert!(!spec.clone().read_only().mutating);
    }

    #[test]
    fn test_system_runner_captures_output() {
        let runner = SystemRunner::new(false);
        let out = runner
            .run(&CommandSpec::new("sh").args(["-c", "echo hello"]).read_only())
            .unwrap();
        assert!(out.success);
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn test_system_runner_feeds_stdin() {
        let runner = SystemRunner::new(false);
        let out = runner
            .run(&CommandSpec::new("cat").stdin("piped input"))
            .unwrap();
        assert_eq!(out.stdout, "piped input");
    }

    #[test]
    fn test_large_stdin_with_large_output_completes() {
        let runner = SystemRunner::new(false);
        let input = "x".repeat(4 << 20);
        let out = runner.run(&CommandSpec::new("cat").stdin(input.clone())).unwrap();
        assert!(out.success);
        assert_eq!(out.stdout.len(), input.len());
    }

    #[test]
    fn test_child_ignoring_stdin_is_still_reaped() {
        let runner = SystemRunner::new(false);
        let out = runner
            .run(&CommandSpec::new("true").stdin("y".repeat(4 << 20)))
            .unwrap();
        assert!(out.success);
    }

    #[test]
    fn test_nonzero_exit_is_not_an_error() {
        let runner = SystemRunner::new(false);
        let spec = CommandSpec::new("sh").args(["-c", "echo boom >&2; exit 3"]);
        let out = runner.run(&spec).unwrap();
        assert!(!out.success);
        assert_eq!(out.exit_code, Some(3));

        let err = runner.run_checked(&spec).unwrap_err();
        assert!(err.to_string().contains("exit code 3"));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_missing_program_is_an_error() {
        let runner = SystemRunner::new(false);
        let spec = CommandSpec::new("this_binary_definitely_does_not_exist_12345");
        assert!(runner.run(&spec).is_err());
        assert!(!runner.probe(&spec));
    }

    #[test]
    fn test_dry_run_skips_mutations_but_runs_probes() {
        let runner = SystemRunner::new(true);
        let mutating = CommandSpec::new("sh").args(["-c", "exit 1"]);
        assert!(runner.run(&mutating).unwrap().success);

        let probe = CommandSpec::new("sh").args(["-c", "exit 1"]).read_only();
        assert!(!runner.run(&probe).unwrap().success);
        assert!(runner.is_dry_run());
    }
}

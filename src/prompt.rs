//! Operator interaction
//!
//! The pipeline never reads stdin directly. It talks to an `Operator`, which
//! is either the terminal or a scripted answer queue (answers file, tests).
//! All calls block until an answer is available; there is no timeout.

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::path::Path;

use crate::error::{ProvisionError, Result};

/// Source of operator decisions and input.
pub trait Operator {
    /// Yes/no question
    fn confirm(&mut self, question: &str, default: bool) -> Result<bool>;

    /// Pick one of `options`; returns the chosen index
    fn choose(&mut self, question: &str, options: &[String], default: usize) -> Result<usize>;

    /// Pick one of `options` by name. The name is not guaranteed to be one
    /// of `options`; callers validate it themselves.
    fn select(&mut self, question: &str, options: &[String], default: usize) -> Result<String> {
        let index = self.choose(question, options, default)?;
        options
            .get(index)
            .cloned()
            .ok_or_else(|| ProvisionError::prompt(format!("invalid choice for '{}'", question)))
    }

    /// Free-text answer; empty input yields `default` when given
    fn ask(&mut self, question: &str, default: Option<&str>) -> Result<String>;

    /// Masked answer (passwords)
    fn ask_secret(&mut self, question: &str) -> Result<String>;

    /// Show a message (diagnostics, banners)
    fn notify(&mut self, message: &str);
}

// ============================================================================
// Terminal
// ============================================================================

/// Interactive operator on stdin/stdout.
#[derive(Debug, Default)]
pub struct TerminalOperator;

impl TerminalOperator {
    pub fn new() -> Self {
        Self
    }

    fn read_line(&self, prompt: &str) -> Result<String> {
        print!("{}", prompt);
        io::stdout().flush()?;

        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line)?;
        if read == 0 {
            return Err(ProvisionError::prompt("input closed"));
        }
        Ok(line.trim().to_string())
    }
}

impl Operator for TerminalOperator {
    fn confirm(&mut self, question: &str, default: bool) -> Result<bool> {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        loop {
            let answer = self.read_line(&format!("{} {} ", question, hint))?;
            if let Some(value) = parse_yes_no(&answer, default) {
                return Ok(value);
            }
            println!("Please answer yes or no.");
        }
    }

    fn choose(&mut self, question: &str, options: &[String], default: usize) -> Result<usize> {
        if options.is_empty() {
            return Err(ProvisionError::prompt(format!("no options for '{}'", question)));
        }
        let default = default.min(options.len() - 1);

        println!("{}", question);
        for (i, option) in options.iter().enumerate() {
            let marker = if i == default { " (default)" } else { "" };
            println!("  [{}] {}{}", i + 1, option, marker);
        }

        loop {
            let answer = self.read_line("> ")?;
            if let Some(index) = parse_choice(&answer, options, default) {
                return Ok(index);
            }
            println!("Enter a number between 1 and {}.", options.len());
        }
    }

    fn ask(&mut self, question: &str, default: Option<&str>) -> Result<String> {
        let prompt = match default {
            Some(d) => format!("{} [{}]: ", question, d),
            None => format!("{}: ", question),
        };
        let answer = self.read_line(&prompt)?;
        Ok(match default {
            Some(d) if answer.is_empty() => d.to_string(),
            _ => answer,
        })
    }

    fn ask_secret(&mut self, question: &str) -> Result<String> {
        print!("{}: ", question);
        io::stdout().flush()?;

        terminal::enable_raw_mode()?;
        let result = read_masked();
        let _ = terminal::disable_raw_mode();
        println!();
        result
    }

    fn notify(&mut self, message: &str) {
        println!("{}", message);
    }
}

/// Collect keystrokes without echo until Enter
fn read_masked() -> Result<String> {
    let mut secret = String::new();
    loop {
        if let Event::Key(KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            ..
        }) = event::read()?
        {
            match code {
                KeyCode::Enter => return Ok(secret),
                KeyCode::Backspace => {
                    secret.pop();
                }
                KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                    return Err(ProvisionError::prompt("aborted by operator"));
                }
                KeyCode::Char(c) => secret.push(c),
                _ => {}
            }
        }
    }
}

fn parse_yes_no(answer: &str, default: bool) -> Option<bool> {
    match answer.to_ascii_lowercase().as_str() {
        "" => Some(default),
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// Accepts a 1-based number or an option name
fn parse_choice(answer: &str, options: &[String], default: usize) -> Option<usize> {
    if answer.is_empty() {
        return Some(default);
    }
    if let Ok(n) = answer.parse::<usize>() {
        return (1..=options.len()).contains(&n).then(|| n - 1);
    }
    options.iter().position(|o| o.eq_ignore_ascii_case(answer))
}

// ============================================================================
// Scripted
// ============================================================================

/// One pre-recorded answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    Bool(bool),
    Index(usize),
    Text(String),
}

/// Operator that replays a fixed answer queue.
///
/// Used for unattended installs (`--answers`) and in tests. Every question
/// asked is recorded; running out of answers is a prompt error, which aborts
/// the run the same way a closed terminal would.
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    answers: VecDeque<Answer>,
    questions: Vec<String>,
    messages: Vec<String>,
}

impl ScriptedOperator {
    pub fn new(answers: impl IntoIterator<Item = Answer>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Load a JSON array of answers, e.g. `[true, "nginx", "app", "secret", "app"]`
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read answers from {:?}", path))?;
        let answers: Vec<Answer> =
            serde_json::from_str(&content).context("Failed to parse answers JSON")?;
        Ok(Self::new(answers))
    }

    /// Every question asked so far, in order
    pub fn questions(&self) -> &[String] {
        &self.questions
    }

    /// Every message shown so far, in order
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn remaining(&self) -> usize {
        self.answers.len()
    }

    fn next(&mut self, question: &str) -> Result<Answer> {
        self.questions.push(question.to_string());
        self.answers
            .pop_front()
            .ok_or_else(|| ProvisionError::prompt(format!("no scripted answer for '{}'", question)))
    }

    fn next_text(&mut self, question: &str) -> Result<String> {
        match self.next(question)? {
            Answer::Text(text) => Ok(text),
            Answer::Index(n) => Ok(n.to_string()),
            Answer::Bool(b) => Ok(b.to_string()),
        }
    }
}

impl Operator for ScriptedOperator {
    fn confirm(&mut self, question: &str, default: bool) -> Result<bool> {
        match self.next(question)? {
            Answer::Bool(b) => Ok(b),
            Answer::Text(t) => parse_yes_no(&t, default)
                .ok_or_else(|| ProvisionError::prompt(format!("'{}' is not yes/no", t))),
            Answer::Index(_) => Err(ProvisionError::prompt("expected yes/no answer")),
        }
    }

    fn choose(&mut self, question: &str, options: &[String], default: usize) -> Result<usize> {
        let picked = match self.next(question)? {
            Answer::Index(i) if i < options.len() => Some(i),
            Answer::Text(t) => options.iter().position(|o| o.eq_ignore_ascii_case(&t)),
            Answer::Bool(true) if default < options.len() => Some(default),
            _ => None,
        };
        picked.ok_or_else(|| ProvisionError::prompt(format!("invalid choice for '{}'", question)))
    }

    /// Text answers pass through as typed in the answers file
    fn select(&mut self, question: &str, options: &[String], default: usize) -> Result<String> {
        match self.next(question)? {
            Answer::Text(name) => Ok(name.trim().to_string()),
            Answer::Index(i) => options
                .get(i)
                .cloned()
                .ok_or_else(|| ProvisionError::prompt(format!("invalid choice for '{}'", question))),
            Answer::Bool(true) => options
                .get(default)
                .cloned()
                .ok_or_else(|| ProvisionError::prompt(format!("invalid choice for '{}'", question))),
            Answer::Bool(false) => Err(ProvisionError::prompt(format!("invalid choice for '{}'", question))),
        }
    }

    fn ask(&mut self, question: &str, default: Option<&str>) -> Result<String> {
        let text = self.next_text(question)?;
        Ok(match default {
            Some(d) if text.is_empty() => d.to_string(),
            _ => text,
        })
    }

    fn ask_secret(&mut self, question: &str) -> Result<String> {
        self.next_text(question)
    }

    fn notify(&mut self, message: &str) {
        self.messages.push(message.to_string());
    }
}

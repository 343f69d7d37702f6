//! Operator escalation
//!
//! Some failures can only be fixed by a person at the keyboard. The
//! orchestrator asks an [`Operator`]; a non-interactive operator turns the
//! request into [`Error::OperatorActionRequired`] instead of blocking.

use std::io::BufRead;
use std::path::Path;

use brx_core::prelude::*;
use brx_device::{CommandRunner, CommandSpec};

const OPEN: &str = "/usr/bin/open";

/// Steps shown while the operator configures signing in Xcode
pub const SIGNING_STEPS: &[&str] = &[
    "Select the project in the navigator, then your app target",
    "Open the \"Signing & Capabilities\" tab",
    "Enable \"Automatically manage signing\"",
    "Choose your team (add your Apple ID under Xcode → Settings → Accounts if none is listed)",
    "Wait until Xcode shows a valid signing certificate",
];

/// Numbered signing instructions
pub fn signing_instructions() -> String {
    SIGNING_STEPS
        .iter()
        .enumerate()
        .map(|(i, step)| format!("{}. {}", i + 1, step))
        .collect::<Vec<_>>()
        .join("\n")
}

#[trait_variant::make(Operator: Send)]
pub trait LocalOperator {
    /// Have the operator set up code signing for `project`; returns once
    /// they confirm
    async fn confirm_signing_setup(&self, project: &Path) -> Result<()>;
}

/// Opens Xcode and waits for Enter on stdin
#[derive(Debug, Clone)]
pub struct TerminalOperator<R> {
    runner: R,
}

impl<R> TerminalOperator<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }
}

impl<R: CommandRunner + Sync> Operator for TerminalOperator<R> {
    async fn confirm_signing_setup(&self, project: &Path) -> Result<()> {
        let open = CommandSpec::new(OPEN).arg(project.to_string_lossy());
        match self.runner.run(&open).await {
            Ok(result) if result.success() => {}
            Ok(result) => warn!("Could not open project in Xcode: {}", result.stderr.trim()),
            Err(e) => warn!("Could not open project in Xcode: {}", e),
        }

        eprintln!();
        eprintln!("🔐 Code signing needs to be set up in Xcode:");
        eprintln!("{}", signing_instructions());
        eprintln!();
        eprintln!("Press Enter when done...");

        // One blocking read, off the async workers
        tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).map(|_| ())
        })
        .await
        .map_err(|e| Error::signing_setup(format!("input task failed: {e}")))?
        .map_err(|e| Error::signing_setup(format!("could not read confirmation: {e}")))
    }
}

/// Never blocks; every escalation becomes an error
#[derive(Debug, Clone, Copy, Default)]
pub struct NonInteractive;

impl Operator for NonInteractive {
    async fn confirm_signing_setup(&self, project: &Path) -> Result<()> {
        Err(Error::operator_action(format!(
            "Set up code signing for {} in Xcode:\n{}",
            project.display(),
            signing_instructions()
        )))
    }
}

//! Automated recovery for classified build failures

use std::fmt;
use std::path::{Path, PathBuf};

use brx_core::prelude::*;
use brx_core::FailureKind;
use brx_device::CommandRunner;

use crate::projectgen::ProjectGenerator;

/// What recovery is possible in the current project
#[derive(Debug, Clone)]
pub struct RecoveryContext {
    /// Isolated build output directory of the project
    pub output_dir: PathBuf,
    /// Whether a declarative project source exists to regenerate from
    pub can_regenerate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryStep {
    /// Delete the project's isolated build output
    ClearOutputDir(PathBuf),
    /// Regenerate the project metadata from its declarative source
    RegenerateProject,
}

/// An idempotent automated fix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryAction {
    pub description: &'static str,
    pub step: RecoveryStep,
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description)
    }
}

impl RecoveryAction {
    pub async fn execute<R: CommandRunner + Sync>(
        &self,
        generator: &ProjectGenerator<R>,
    ) -> Result<()> {
        info!("Recovery: {}", self.description);
        let outcome = match &self.step {
            RecoveryStep::ClearOutputDir(dir) => clear_dir(dir),
            RecoveryStep::RegenerateProject => generator.regenerate().await,
        };
        outcome.map_err(|e| Error::Recovery {
            action: self.description.to_string(),
            message: e.to_string(),
        })
    }
}

fn clear_dir(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Automated recovery lookup for [`FailureKind`]
pub trait RecoveryExt {
    /// `None` when the kind has no automated fix here: signing escalates to
    /// the operator, missing dependencies and unknown failures surface as is.
    fn recovery(&self, ctx: &RecoveryContext) -> Option<RecoveryAction>;
}

impl RecoveryExt for FailureKind {
    fn recovery(&self, ctx: &RecoveryContext) -> Option<RecoveryAction> {
        match self {
            FailureKind::CorruptedCache => Some(RecoveryAction {
                description: "Clearing corrupted build cache",
                step: RecoveryStep::ClearOutputDir(ctx.output_dir.clone()),
            }),
            FailureKind::MissingScheme { .. } | FailureKind::ProjectCorrupted
                if ctx.can_regenerate =>
            {
                Some(RecoveryAction {
                    description: "Regenerating project",
                    step: RecoveryStep::RegenerateProject,
                })
            }
            _ => None,
        }
    }
}

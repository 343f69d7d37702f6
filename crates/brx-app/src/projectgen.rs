//! Project metadata regeneration with XcodeGen

use std::path::PathBuf;
use std::time::Duration;

use brx_core::prelude::*;
use brx_core::{ProjectDescriptor, DESCRIPTOR_FILENAME};
use brx_device::{CommandRunner, CommandSpec};

const XCODEGEN: &str = "xcodegen";

const GENERATE_TIMEOUT: Duration = Duration::from_secs(120);

/// Regenerates the `.xcodeproj` from its declarative source
#[derive(Debug, Clone)]
pub struct ProjectGenerator<R> {
    runner: R,
    descriptor: ProjectDescriptor,
}

impl<R: CommandRunner + Sync> ProjectGenerator<R> {
    pub fn new(runner: R, descriptor: ProjectDescriptor) -> Self {
        Self { runner, descriptor }
    }

    /// Declarative source to generate from.
    ///
    /// `project.yml` when present, otherwise `brx.yml` itself if the
    /// descriptor opts into XcodeGen.
    pub fn source(&self) -> Option<PathBuf> {
        self.descriptor.generator_spec().or_else(|| {
            self.descriptor
                .uses_xcodegen()
                .then(|| self.descriptor.root.join(DESCRIPTOR_FILENAME))
        })
    }

    /// Whether code reloads must regenerate first so new files join the project
    pub fn regenerates_on_change(&self) -> bool {
        self.descriptor.generator_spec().is_some()
    }

    pub async fn regenerate(&self) -> Result<()> {
        let source = self.source().ok_or_else(|| {
            Error::project_generation("no declarative project source (project.yml) found")
        })?;

        info!("Regenerating project from {}", source.display());

        let spec = CommandSpec::new(XCODEGEN)
            .args(["generate", "--spec"])
            .arg(source.to_string_lossy())
            .current_dir(&self.descriptor.root)
            .timeout(GENERATE_TIMEOUT);

        let result = match self.runner.run(&spec).await {
            Ok(result) => result,
            Err(Error::CommandSpawn { .. }) => {
                return Err(Error::ToolNotFound {
                    tool: XCODEGEN.to_string(),
                    hint: "Install with: brew install xcodegen".to_string(),
                })
            }
            Err(e) => return Err(e),
        };

        if !result.success() {
            return Err(Error::project_generation(
                result.combined_output().trim().to_string(),
            ));
        }

        Ok(())
    }
}

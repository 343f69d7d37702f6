//! Build orchestration with classified, bounded recovery
//!
//! One call to [`BuildOrchestrator::build`] runs `xcodebuild` into the
//! project's own `.brx/DerivedData`, classifies failures and applies at most
//! one recovery per failure kind before giving up. Operator escalation for
//! signing happens at most once per call.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use brx_core::prelude::*;
use brx_core::{
    diagnostic_tail, BuildContext, Destination, DeviceKind, FailureKind, FailureTag,
    ProjectDescriptor, DIAGNOSTIC_TAIL_LINES,
};
use brx_device::{CommandResult, CommandRunner, CommandSpec, SimulatorBackend};

use crate::classifier::classify;
use crate::events::EventSink;
use crate::operator::Operator;
use crate::projectgen::ProjectGenerator;
use crate::recovery::{RecoveryContext, RecoveryExt};
use crate::signing::{SigningIdentity, SigningLookup};

const XCODEBUILD: &str = "xcodebuild";

/// Isolated build output, relative to the project root
pub const OUTPUT_DIR: &str = ".brx/DerivedData";

/// Default upper bound for one build tool invocation
pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(300);

const VERSION_TIMEOUT: Duration = Duration::from_secs(15);

const ALLOW_PROVISIONING: &str = "-allowProvisioningUpdates";

/// Expected bundle location for a configuration and device kind
pub fn app_bundle_path(
    output_dir: &Path,
    configuration: &str,
    kind: DeviceKind,
    app_name: &str,
) -> PathBuf {
    products_dir(output_dir, configuration, kind).join(format!("{app_name}.app"))
}

fn products_dir(output_dir: &Path, configuration: &str, kind: DeviceKind) -> PathBuf {
    output_dir
        .join("Build")
        .join("Products")
        .join(format!("{configuration}-{}", kind.sdk_name()))
}

/// Signing arguments for one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
enum Signing {
    /// Simulator builds do not sign
    Unsigned,
    Identity(SigningIdentity),
    /// No identity found even after setup; let Xcode provision
    ProvisioningOnly,
}

impl Signing {
    fn args(&self) -> Vec<String> {
        match self {
            Signing::Unsigned => Vec::new(),
            Signing::Identity(identity) => {
                let mut args = identity.build_settings();
                args.push(ALLOW_PROVISIONING.to_string());
                args
            }
            Signing::ProvisioningOnly => vec![
                ALLOW_PROVISIONING.to_string(),
                "CODE_SIGN_STYLE=Automatic".to_string(),
            ],
        }
    }
}

/// Per-call bookkeeping that bounds retries
#[derive(Debug, Default)]
struct Attempts {
    recovered: HashSet<FailureTag>,
    signing_escalated: bool,
    invocations: u32,
}

/// Runs builds and recovers from the failures it knows how to fix
pub struct BuildOrchestrator<R, S, O> {
    runner: R,
    descriptor: ProjectDescriptor,
    generator: ProjectGenerator<R>,
    simulators: SimulatorBackend<R>,
    signing: S,
    operator: O,
    timeout: Duration,
    events: EventSink,
}

impl<R, S, O> BuildOrchestrator<R, S, O>
where
    R: CommandRunner + Clone + Sync,
    S: SigningLookup + Sync,
    O: Operator + Sync,
{
    pub fn new(runner: R, descriptor: ProjectDescriptor, signing: S, operator: O) -> Self {
        Self {
            generator: ProjectGenerator::new(runner.clone(), descriptor.clone()),
            simulators: SimulatorBackend::new(runner.clone()),
            runner,
            descriptor,
            signing,
            operator,
            timeout: DEFAULT_BUILD_TIMEOUT,
            events: EventSink::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn descriptor(&self) -> &ProjectDescriptor {
        &self.descriptor
    }

    pub fn generator(&self) -> &ProjectGenerator<R> {
        &self.generator
    }

    /// The project's isolated build output directory
    pub fn output_dir(&self) -> PathBuf {
        self.descriptor.root.join(OUTPUT_DIR)
    }

    /// Build the app for `ctx` and return the produced bundle
    pub async fn build(&self, ctx: &BuildContext) -> Result<PathBuf> {
        let output_dir = self.output_dir();
        std::fs::create_dir_all(&output_dir)?;

        let mut attempts = Attempts::default();
        let physical = ctx.is_physical_target();

        let mut signing = if physical {
            self.prepare_signing(ctx, &mut attempts).await?
        } else {
            Signing::Unsigned
        };

        let recovery_ctx = RecoveryContext {
            output_dir: output_dir.clone(),
            can_regenerate: self.generator.source().is_some(),
        };

        self.events.step(
            "🔨",
            format!("Building {} ({})", ctx.scheme, ctx.configuration),
        );

        loop {
            let result = self
                .invoke(ctx, &ctx.destination, None, &signing, &mut attempts)
                .await?;
            if result.success() {
                return self.locate_bundle(ctx);
            }

            let diagnostic = result.combined_output();
            let kind = classify(&diagnostic);
            warn!("Build failed: {}", kind.summary());

            if !attempts.recovered.insert(kind.tag()) {
                debug!("{:?} already handled once in this build", kind.tag());
                return Err(build_failed(kind, &diagnostic));
            }

            match &kind {
                FailureKind::SigningIssue if physical => {
                    if attempts.signing_escalated {
                        return Err(build_failed(kind, &diagnostic));
                    }
                    signing = self.escalate_signing(ctx, &mut attempts).await?;
                }
                FailureKind::RuntimeMismatch { requested_version } if !physical => {
                    return self
                        .runtime_fallbacks(ctx, requested_version, &signing, &mut attempts)
                        .await;
                }
                _ => match kind.recovery(&recovery_ctx) {
                    Some(action) => {
                        self.events
                            .warning(format!("{} → {}", kind.summary(), action));
                        action.execute(&self.generator).await?;
                    }
                    None => return Err(build_failed(kind, &diagnostic)),
                },
            }
        }
    }

    async fn prepare_signing(
        &self,
        ctx: &BuildContext,
        attempts: &mut Attempts,
    ) -> Result<Signing> {
        match self.signing.find_identity().await? {
            Some(identity) => Ok(Signing::Identity(identity)),
            None => self.escalate_signing(ctx, attempts).await,
        }
    }

    /// Hand signing setup to the operator, then look the identity up again
    async fn escalate_signing(
        &self,
        ctx: &BuildContext,
        attempts: &mut Attempts,
    ) -> Result<Signing> {
        attempts.signing_escalated = true;
        self.events.step("🔐", "Code signing setup required");

        self.operator.confirm_signing_setup(&ctx.project).await?;

        match self.signing.find_identity().await? {
            Some(identity) => Ok(Signing::Identity(identity)),
            None => {
                self.events
                    .warning("No signing identity found; continuing with automatic provisioning");
                Ok(Signing::ProvisioningOnly)
            }
        }
    }

    /// Alternate invocations for a missing simulator runtime, in order:
    /// SDK pinned to the nearest installed runtime, then a generic
    /// simulator destination.
    async fn runtime_fallbacks(
        &self,
        ctx: &BuildContext,
        requested: &str,
        signing: &Signing,
        attempts: &mut Attempts,
    ) -> Result<PathBuf> {
        let nearest = self.nearest_runtime_version(requested).await;

        if let Some(version) = &nearest {
            self.events.warning(format!(
                "iOS {requested} runtime not installed; retrying with iOS {version} SDK"
            ));
            let sdk = format!("iphonesimulator{version}");
            let result = self
                .invoke(ctx, &ctx.destination, Some(&sdk), signing, attempts)
                .await?;
            if result.success() {
                return self.locate_bundle(ctx);
            }
        }

        self.events
            .warning("Retrying with a generic simulator destination");
        let result = self
            .invoke(ctx, &Destination::GenericSimulator, None, signing, attempts)
            .await?;
        if result.success() {
            return self.locate_bundle(ctx);
        }

        Err(Error::RuntimeUnavailable {
            requested: requested.to_string(),
            nearest,
            toolchain: self.toolchain_version().await,
        })
    }

    async fn nearest_runtime_version(&self, requested: &str) -> Option<String> {
        let lookup = if requested.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            self.simulators.nearest_runtime(requested).await
        } else {
            self.simulators.latest_runtime().await.map(Some)
        };
        match lookup {
            Ok(runtime) => runtime.map(|r| r.version),
            Err(e) => {
                debug!("Runtime lookup failed: {}", e);
                None
            }
        }
    }

    /// Installed Xcode version, e.g. "16.0"
    pub async fn toolchain_version(&self) -> Option<String> {
        let spec = CommandSpec::new(XCODEBUILD)
            .arg("-version")
            .timeout(VERSION_TIMEOUT);
        let result = self.runner.run(&spec).await.ok()?;
        if !result.success() {
            return None;
        }
        result
            .stdout
            .lines()
            .next()
            .map(|line| line.trim().trim_start_matches("Xcode ").to_string())
            .filter(|v| !v.is_empty())
    }

    async fn invoke(
        &self,
        ctx: &BuildContext,
        destination: &Destination,
        sdk: Option<&str>,
        signing: &Signing,
        attempts: &mut Attempts,
    ) -> Result<CommandResult> {
        attempts.invocations += 1;

        let mut spec = CommandSpec::new(XCODEBUILD)
            .arg("-project")
            .arg(ctx.project.to_string_lossy())
            .args(["-scheme", ctx.scheme.as_str()])
            .args(["-configuration", ctx.configuration.as_str()])
            .arg("-destination")
            .arg(destination.as_arg());
        if let Some(sdk) = sdk {
            spec = spec.args(["-sdk", sdk]);
        }
        let spec = spec
            .arg("-derivedDataPath")
            .arg(self.output_dir().to_string_lossy())
            .args(signing.args())
            .arg("build")
            .current_dir(&self.descriptor.root)
            .timeout(self.timeout);

        debug!("Build attempt {}: {}", attempts.invocations, spec);

        match self.runner.run(&spec).await {
            Err(Error::CommandSpawn { .. }) => Err(Error::ToolNotFound {
                tool: XCODEBUILD.to_string(),
                hint: "Install Xcode from the App Store, then run: sudo xcode-select -s /Applications/Xcode.app"
                    .to_string(),
            }),
            other => other,
        }
    }

    fn locate_bundle(&self, ctx: &BuildContext) -> Result<PathBuf> {
        let dir = products_dir(
            &self.output_dir(),
            &ctx.configuration,
            ctx.destination.kind(),
        );
        let expected = dir.join(self.descriptor.app_bundle_name());
        if expected.exists() {
            self.events.success("Build succeeded");
            return Ok(expected);
        }

        // Product name may differ from the descriptor name
        let found = std::fs::read_dir(&dir).ok().and_then(|entries| {
            entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .find(|p| p.extension().is_some_and(|ext| ext == "app"))
        });

        match found {
            Some(bundle) => {
                self.events.success("Build succeeded");
                Ok(bundle)
            }
            None => Err(Error::AppBundleNotFound { dir }),
        }
    }
}

fn build_failed(kind: FailureKind, diagnostic: &str) -> Error {
    Error::BuildFailed {
        kind,
        diagnostic: diagnostic_tail(diagnostic, DIAGNOSTIC_TAIL_LINES),
    }
}

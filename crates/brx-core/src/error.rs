//! Application error types with rich context

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::failure::FailureKind;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    // ─────────────────────────────────────────────────────────────
    // External Command Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to spawn {program}: {reason}")]
    CommandSpawn { program: String, reason: String },

    #[error("{program} timed out after {}s", timeout.as_secs())]
    CommandTimeout { program: String, timeout: Duration },

    #[error("Required tool not found: {tool}")]
    ToolNotFound { tool: String, hint: String },

    // ─────────────────────────────────────────────────────────────
    // Device Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Device '{name}' not found")]
    DeviceNotFound { name: String, reason: Option<String> },

    #[error("Device '{name}' ({id}) has not trusted this computer")]
    DeviceNotTrusted { name: String, id: String },

    // ─────────────────────────────────────────────────────────────
    // Simulator Errors
    // ─────────────────────────────────────────────────────────────
    #[error("No {platform} simulator runtime available")]
    NoRuntime { platform: String },

    #[error("No device type matching '{pattern}'")]
    NoDeviceType { pattern: String },

    #[error("Simulator error: {message}")]
    Simulator { message: String },

    #[error("Simulator {udid} did not finish booting after {attempts} attempts")]
    BootTimeout { udid: String, attempts: u32 },

    // ─────────────────────────────────────────────────────────────
    // Physical Device Errors
    // ─────────────────────────────────────────────────────────────
    #[error("devicectl not available (requires Xcode 15+)")]
    HelperUnavailable,

    #[error("Physical device error: {message}")]
    Physical { message: String },

    // ─────────────────────────────────────────────────────────────
    // Build Errors
    // ─────────────────────────────────────────────────────────────
    #[error("{}", kind.summary())]
    BuildFailed { kind: FailureKind, diagnostic: String },

    #[error("iOS {requested} simulator runtime is not installed")]
    RuntimeUnavailable {
        requested: String,
        nearest: Option<String>,
        toolchain: Option<String>,
    },

    #[error("Build reported success but no .app bundle was found in {}", dir.display())]
    AppBundleNotFound { dir: PathBuf },

    #[error("Recovery '{action}' failed: {message}")]
    Recovery { action: String, message: String },

    // ─────────────────────────────────────────────────────────────
    // Signing / Operator Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Code signing setup failed: {message}")]
    SigningSetup { message: String },

    #[error("Operator action required: {action}")]
    OperatorActionRequired { action: String },

    // ─────────────────────────────────────────────────────────────
    // Project Descriptor Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Project spec not found at {}", path.display())]
    ProjectSpecNotFound { path: PathBuf },

    #[error("Invalid project spec {} (missing {})", path.display(), missing.join(", "))]
    ProjectSpecInvalid {
        path: PathBuf,
        missing: Vec<&'static str>,
    },

    #[error("Project generation failed: {message}")]
    ProjectGeneration { message: String },

    // ─────────────────────────────────────────────────────────────
    // Boundary Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Not permitted to {operation}")]
    UsageDenied { operation: String },

    #[error("File watcher error: {message}")]
    Watcher { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn simulator(message: impl Into<String>) -> Self {
        Self::Simulator {
            message: message.into(),
        }
    }

    pub fn physical(message: impl Into<String>) -> Self {
        Self::Physical {
            message: message.into(),
        }
    }

    pub fn device_not_found(name: impl Into<String>) -> Self {
        Self::DeviceNotFound {
            name: name.into(),
            reason: None,
        }
    }

    pub fn signing_setup(message: impl Into<String>) -> Self {
        Self::SigningSetup {
            message: message.into(),
        }
    }

    pub fn operator_action(action: impl Into<String>) -> Self {
        Self::OperatorActionRequired {
            action: action.into(),
        }
    }

    pub fn project_generation(message: impl Into<String>) -> Self {
        Self::ProjectGeneration {
            message: message.into(),
        }
    }

    pub fn watcher(message: impl Into<String>) -> Self {
        Self::Watcher {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Conditions the operator has to resolve by hand. Retrying them
    /// automatically cannot succeed.
    pub fn is_operator_actionable(&self) -> bool {
        matches!(
            self,
            Error::DeviceNotTrusted { .. }
                | Error::SigningSetup { .. }
                | Error::OperatorActionRequired { .. }
                | Error::RuntimeUnavailable { .. }
                | Error::HelperUnavailable
                | Error::ToolNotFound { .. }
        ) || matches!(
            self,
            Error::BuildFailed {
                kind: FailureKind::SigningIssue,
                ..
            }
        )
    }

    /// Step-by-step guidance shown beneath the error message.
    pub fn remediation(&self) -> Option<String> {
        match self {
            Error::DeviceNotFound { reason, .. } => Some(match reason {
                Some(reason) => format!("{reason}\nRun `brx devices` to see available devices."),
                None => "Run `brx devices` to see available devices.".to_string(),
            }),
            Error::DeviceNotTrusted { .. } => Some(
                "1. Unlock your iPhone\n2. Tap 'Trust' when asked to trust this computer\n3. Run this command again"
                    .to_string(),
            ),
            Error::HelperUnavailable => Some(
                "Install Xcode 15 or newer, then run: sudo xcode-select -s /Applications/Xcode.app"
                    .to_string(),
            ),
            Error::ToolNotFound { hint, .. } => Some(hint.clone()),
            Error::NoRuntime { platform } => Some(format!(
                "Install a {platform} runtime: xcodebuild -downloadPlatform {platform}"
            )),
            Error::RuntimeUnavailable {
                requested,
                nearest,
                toolchain,
            } => {
                let mut lines = Vec::new();
                if let Some(toolchain) = toolchain {
                    lines.push(format!("Installed Xcode: {toolchain}"));
                }
                match nearest {
                    Some(nearest) => lines.push(format!("Nearest installed runtime: iOS {nearest}")),
                    None => lines.push("No iOS simulator runtime is installed".to_string()),
                }
                lines.push(format!(
                    "Install a matching runtime (iOS {requested}): Xcode → Settings → Platforms, or run: xcodebuild -downloadPlatform iOS"
                ));
                Some(lines.join("\n"))
            }
            Error::BuildFailed { kind, .. } => kind.remediation(),
            Error::AppBundleNotFound { .. } => Some(
                "Check that the scheme builds an application target, then run `brx build` again."
                    .to_string(),
            ),
            Error::ProjectSpecNotFound { .. } => {
                Some("Run brx from a project directory containing brx.yml.".to_string())
            }
            Error::ProjectSpecInvalid { .. } => {
                Some("brx.yml needs at least `name:` and `bundle_id:` entries.".to_string())
            }
            Error::OperatorActionRequired { action } => Some(action.clone()),
            _ => None,
        }
    }
}

//! Core domain types

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────
// Devices
// ─────────────────────────────────────────────────────────────────

/// Which backend owns a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Simulated,
    Physical,
}

impl DeviceKind {
    /// SDK directory suffix used under `Build/Products/<Configuration>-<sdk>`
    pub fn sdk_name(&self) -> &'static str {
        match self {
            DeviceKind::Simulated => "iphonesimulator",
            DeviceKind::Physical => "iphoneos",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Simulated => write!(f, "Simulator"),
            DeviceKind::Physical => write!(f, "Physical Device"),
        }
    }
}

/// A resolved build/run target.
///
/// The kind is fixed when the handle is resolved; a handle is re-resolved
/// on every command invocation rather than persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    /// Simulator UDID or physical device identifier
    pub id: String,
    pub kind: DeviceKind,
}

impl Device {
    pub fn simulated(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            kind: DeviceKind::Simulated,
        }
    }

    pub fn physical(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            kind: DeviceKind::Physical,
        }
    }

    pub fn is_physical(&self) -> bool {
        self.kind == DeviceKind::Physical
    }

    /// Build destination addressing exactly this device
    pub fn destination(&self) -> Destination {
        match self.kind {
            DeviceKind::Simulated => Destination::Simulator {
                udid: self.id.clone(),
            },
            DeviceKind::Physical => Destination::GenericDevice,
        }
    }
}

/// Platform family of a simulator runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Platform {
    #[default]
    #[serde(rename = "ios")]
    IOS,
    #[serde(rename = "watchos")]
    WatchOS,
}

impl Platform {
    /// Prefix of the CoreSimulator runtime identifier
    pub fn runtime_prefix(&self) -> &'static str {
        match self {
            Platform::IOS => "com.apple.CoreSimulator.SimRuntime.iOS",
            Platform::WatchOS => "com.apple.CoreSimulator.SimRuntime.watchOS",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::IOS => write!(f, "iOS"),
            Platform::WatchOS => write!(f, "watchOS"),
        }
    }
}

/// What `launch` reports back for the confirmation line
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LaunchInfo {
    pub pid: Option<u32>,
    pub os_version: Option<String>,
}

// ─────────────────────────────────────────────────────────────────
// Builds
// ─────────────────────────────────────────────────────────────────

/// The build tool's notion of where to compile for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// A specific simulator
    Simulator { udid: String },
    /// Any simulator of the platform
    GenericSimulator,
    /// Any physical iOS device
    GenericDevice,
    /// Verbatim destination string from the project descriptor
    Custom(String),
}

impl Destination {
    pub fn as_arg(&self) -> String {
        match self {
            Destination::Simulator { udid } => format!("platform=iOS Simulator,id={udid}"),
            Destination::GenericSimulator => "generic/platform=iOS Simulator".to_string(),
            Destination::GenericDevice => "generic/platform=iOS".to_string(),
            Destination::Custom(raw) => raw.clone(),
        }
    }

    pub fn is_physical(&self) -> bool {
        match self {
            Destination::GenericDevice => true,
            Destination::Custom(raw) => {
                let raw = raw.to_lowercase();
                raw.contains("platform=ios") && !raw.contains("simulator")
            }
            _ => false,
        }
    }

    pub fn kind(&self) -> DeviceKind {
        if self.is_physical() {
            DeviceKind::Physical
        } else {
            DeviceKind::Simulated
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_arg())
    }
}

/// Parameters of one build attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
    /// Path to the `.xcodeproj`
    pub project: PathBuf,
    pub scheme: String,
    pub configuration: String,
    pub destination: Destination,
}

impl BuildContext {
    pub fn is_physical_target(&self) -> bool {
        self.destination.is_physical()
    }
}

// ─────────────────────────────────────────────────────────────────
// Live reload
// ─────────────────────────────────────────────────────────────────

/// How a burst of file changes must be applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeClass {
    /// Resources only: reinstall the last bundle and relaunch
    Asset,
    /// Compiled sources: rebuild, reinstall and relaunch
    Code,
}

impl ChangeClass {
    /// Code dominates asset
    pub fn merge(self, other: ChangeClass) -> ChangeClass {
        if self == ChangeClass::Code || other == ChangeClass::Code {
            ChangeClass::Code
        } else {
            ChangeClass::Asset
        }
    }
}

impl fmt::Display for ChangeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeClass::Asset => write!(f, "assets"),
            ChangeClass::Code => write!(f, "code"),
        }
    }
}

/// A throttled burst of filesystem changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub paths: BTreeSet<PathBuf>,
    pub class: ChangeClass,
}

impl ChangeEvent {
    pub fn new(paths: impl IntoIterator<Item = PathBuf>, class: ChangeClass) -> Self {
        Self {
            paths: paths.into_iter().collect(),
            class,
        }
    }
}

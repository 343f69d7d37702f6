//! Tool availability checking
//!
//! Locates the external programs brx drives: `xcrun` (simulators),
//! `xcodebuild`, `devicectl` (physical devices, Xcode 15+), `xcodegen` and
//! `security` (signing identities).

use std::path::{Path, PathBuf};

use brx_core::prelude::*;

use crate::physical::XCODE_DEVICECTL;

/// Availability of external tools, checked once at startup
#[derive(Debug, Clone, Default)]
pub struct ToolAvailability {
    /// Whether `xcrun` is available (macOS with Xcode command line tools)
    pub xcrun: bool,

    /// Whether `xcodebuild` is available
    pub xcodebuild: bool,

    /// Path to `devicectl` if found
    pub devicectl: Option<PathBuf>,

    /// Whether `xcodegen` is installed
    pub xcodegen: bool,

    /// Whether the `security` keychain tool is available
    pub security: bool,
}

impl ToolAvailability {
    pub fn check() -> Self {
        let availability = Self {
            xcrun: Self::on_path("xcrun"),
            xcodebuild: Self::on_path("xcodebuild"),
            devicectl: Self::find_devicectl(Path::new(XCODE_DEVICECTL)),
            xcodegen: Self::on_path("xcodegen"),
            security: Self::on_path("security"),
        };
        debug!("Tool availability: {:?}", availability);
        availability
    }

    fn on_path(tool: &str) -> bool {
        which::which(tool)
            .inspect_err(|e| trace!("{} not found: {}", tool, e))
            .is_ok()
    }

    /// `devicectl` on PATH, otherwise inside the default Xcode install
    fn find_devicectl(fallback: &Path) -> Option<PathBuf> {
        which::which("devicectl")
            .ok()
            .or_else(|| fallback.exists().then(|| fallback.to_path_buf()))
    }

    /// Error for a tool that must exist for the requested operation
    pub fn require(&self, tool: &str) -> Result<()> {
        let present = match tool {
            "xcrun" => self.xcrun,
            "xcodebuild" => self.xcodebuild,
            "devicectl" => self.devicectl.is_some(),
            "xcodegen" => self.xcodegen,
            "security" => self.security,
            _ => Self::on_path(tool),
        };
        if present {
            return Ok(());
        }
        Err(Error::ToolNotFound {
            tool: tool.to_string(),
            hint: Self::install_hint(tool).to_string(),
        })
    }

    fn install_hint(tool: &str) -> &'static str {
        match tool {
            "xcodegen" => "Install with: brew install xcodegen",
            "devicectl" => "Install Xcode 15 or newer to deploy to physical devices.",
            _ => "Install Xcode from the App Store, then run: xcode-select --install",
        }
    }

    /// User-facing message when simulators cannot be managed
    pub fn ios_unavailable_message(&self) -> Option<&'static str> {
        if self.xcrun && self.xcodebuild {
            None
        } else {
            #[cfg(target_os = "macos")]
            {
                Some("Xcode not installed. Install Xcode to build and run iOS apps.")
            }

            #[cfg(not(target_os = "macos"))]
            {
                Some("iOS simulators are only available on macOS.")
            }
        }
    }

    /// User-facing message when physical devices cannot be reached
    pub fn physical_unavailable_message(&self) -> Option<&'static str> {
        if self.devicectl.is_some() {
            None
        } else {
            Some("devicectl not found. Physical devices require Xcode 15 or newer.")
        }
    }
}

//! Physical device backend using `devicectl`
//!
//! `devicectl` ships with Xcode 15+. When it cannot be located the backend
//! is simply absent and physical lookups are skipped.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use brx_core::prelude::*;
use brx_core::{Device, DeviceKind, LaunchInfo};
use regex::Regex;

use crate::backend::DeviceBackend;
use crate::runner::{CommandResult, CommandRunner, CommandSpec};
use crate::tool_availability::ToolAvailability;

/// Fallback location when `devicectl` is not on PATH
pub const XCODE_DEVICECTL: &str = "/Applications/Xcode.app/Contents/Developer/usr/bin/devicectl";

/// Header lines printed before the device table
const TABLE_HEADER_LINES: usize = 2;

const QUERY_TIMEOUT: Duration = Duration::from_secs(30);
const INSTALL_TIMEOUT: Duration = Duration::from_secs(300);

static HOSTNAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9-]+\.coredevice\.local").expect("Invalid hostname regex")
});

/// Columns are separated by runs of two or more spaces
static COLUMN_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s{2,}").expect("Invalid column regex"));

/// stderr fragments that mean the host is not (yet) trusted by the device
const UNTRUSTED_MARKERS: &[&str] = &[
    "not paired",
    "pairing",
    "trust",
    "passcode",
    "locked",
    "untrusted",
];

/// A row of `devicectl list devices`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalDevice {
    pub name: String,
    pub hostname: String,
    pub identifier: String,
    pub state: Option<String>,
    pub model: Option<String>,
}

impl PhysicalDevice {
    pub fn to_device(&self) -> Device {
        Device::physical(&self.name, &self.identifier)
    }
}

/// Parse the table printed by `devicectl list devices`.
///
/// The hostname column is the anchor: everything before it is the name,
/// the next token is the identifier. Rows without a hostname are skipped.
pub fn parse_device_table(output: &str) -> Vec<PhysicalDevice> {
    output
        .lines()
        .skip(TABLE_HEADER_LINES)
        .filter_map(parse_device_row)
        .collect()
}

fn parse_device_row(line: &str) -> Option<PhysicalDevice> {
    let host = HOSTNAME_REGEX.find(line)?;

    let name = line[..host.start()].trim();
    if name.is_empty() {
        return None;
    }

    let rest = line[host.end()..].trim_start();
    let (identifier, tail) = match rest.split_once(char::is_whitespace) {
        Some((id, tail)) => (id, tail.trim()),
        None => (rest.trim(), ""),
    };
    if identifier.is_empty() {
        return None;
    }

    let mut columns = COLUMN_SPLIT
        .split(tail)
        .map(str::trim)
        .filter(|c| !c.is_empty());

    Some(PhysicalDevice {
        name: name.to_string(),
        hostname: host.as_str().to_string(),
        identifier: identifier.to_string(),
        state: columns.next().map(str::to_string),
        model: columns.next().map(str::to_string),
    })
}

fn check(result: CommandResult, what: &str) -> Result<CommandResult> {
    if result.success() {
        Ok(result)
    } else {
        Err(Error::physical(format!(
            "{what} failed: {}",
            result.combined_output().trim()
        )))
    }
}

/// Physical device operations through `devicectl`
#[derive(Debug, Clone)]
pub struct PhysicalBackend<R> {
    runner: R,
    devicectl: PathBuf,
}

impl<R: CommandRunner + Sync> PhysicalBackend<R> {
    pub fn new(runner: R, devicectl: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            devicectl: devicectl.into(),
        }
    }

    /// Backend for the host's `devicectl`, or `None` when it is not installed
    pub fn probe(runner: R, tools: &ToolAvailability) -> Option<Self> {
        match &tools.devicectl {
            Some(path) => Some(Self::new(runner, path)),
            None => {
                debug!("devicectl not found; physical devices unavailable");
                None
            }
        }
    }

    pub fn helper_path(&self) -> &Path {
        &self.devicectl
    }

    async fn devicectl<I, S>(&self, args: I, timeout: Duration) -> Result<CommandResult>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = CommandSpec::new(self.devicectl.to_string_lossy())
            .args(args)
            .timeout(timeout);
        self.runner.run(&spec).await
    }

    /// Connected devices
    pub async fn list_devices(&self) -> Result<Vec<PhysicalDevice>> {
        let result = check(
            self.devicectl(["list", "devices"], QUERY_TIMEOUT).await?,
            "devicectl list devices",
        )?;
        Ok(parse_device_table(&result.stdout))
    }

    /// Exact name first, then a case-insensitive substring match
    pub async fn find_device(&self, name: &str) -> Result<Option<PhysicalDevice>> {
        let devices = self.list_devices().await?;
        if let Some(exact) = devices.iter().find(|d| d.name == name) {
            return Ok(Some(exact.clone()));
        }

        let needle = name.to_lowercase();
        Ok(devices
            .into_iter()
            .find(|d| d.name.to_lowercase().contains(&needle)))
    }

    pub async fn install(&self, id: &str, app: &Path) -> Result<()> {
        let app = app.to_string_lossy();
        check(
            self.devicectl(
                ["device", "install", "app", "--device", id, app.as_ref()],
                INSTALL_TIMEOUT,
            )
            .await?,
            "devicectl install",
        )?;
        Ok(())
    }

    pub async fn launch(&self, id: &str, bundle_id: &str) -> Result<LaunchInfo> {
        check(
            self.devicectl(
                ["device", "process", "launch", "--device", id, bundle_id],
                QUERY_TIMEOUT,
            )
            .await?,
            "devicectl launch",
        )?;
        Ok(LaunchInfo::default())
    }

    /// Read device details; a pairing or lock refusal means "not trusted"
    pub async fn check_trust(&self, id: &str) -> Result<bool> {
        let result = self
            .devicectl(["device", "info", "details", "--device", id], QUERY_TIMEOUT)
            .await?;
        if result.success() {
            return Ok(true);
        }

        let output = result.combined_output().to_lowercase();
        if UNTRUSTED_MARKERS.iter().any(|m| output.contains(m)) {
            debug!("Device {} is not trusted: {}", id, output.trim());
            return Ok(false);
        }

        Err(Error::physical(format!(
            "devicectl info failed: {}",
            result.combined_output().trim()
        )))
    }
}

impl<R: CommandRunner + Sync> DeviceBackend for PhysicalBackend<R> {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Physical
    }

    async fn find(&self, name: &str) -> Result<Option<Device>> {
        Ok(self.find_device(name).await?.map(|d| d.to_device()))
    }

    async fn boot_if_needed(&self, _device: &Device) -> Result<()> {
        Ok(())
    }

    async fn install(&self, app: &Path, device: &Device) -> Result<()> {
        PhysicalBackend::install(self, &device.id, app).await
    }

    async fn launch(&self, bundle_id: &str, device: &Device) -> Result<LaunchInfo> {
        PhysicalBackend::launch(self, &device.id, bundle_id).await
    }

    // devicectl relaunch replaces the running process
    async fn terminate(&self, _bundle_id: &str, _device: &Device) -> Result<()> {
        Ok(())
    }

    async fn check_trust(&self, device: &Device) -> Result<bool> {
        PhysicalBackend::check_trust(self, &device.id).await
    }
}

//! Simulator backend using `xcrun simctl`
//!
//! Runtime and device-type selection, device creation, boot with bounded
//! polling, and app install/launch/terminate on simulators.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use brx_core::prelude::*;
use brx_core::{Device, DeviceKind, LaunchInfo, Platform};
use regex::RegexBuilder;
use serde::Deserialize;

use crate::backend::DeviceBackend;
use crate::runner::{CommandResult, CommandRunner, CommandSpec};

const XCRUN: &str = "xcrun";

/// Timeout for short simctl queries
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for install/launch, which may copy large bundles
const INSTALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Environment key whose value is the simulator's OS version
const RUNTIME_VERSION_KEY: &str = "SIMULATOR_RUNTIME_VERSION";

// ─────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatorState {
    Shutdown,
    Booted,
    Booting,
    Unknown,
}

impl From<&str> for SimulatorState {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "shutdown" => SimulatorState::Shutdown,
            "booted" => SimulatorState::Booted,
            "booting" => SimulatorState::Booting,
            _ => SimulatorState::Unknown,
        }
    }
}

/// An existing simulator device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IosSimulator {
    pub udid: String,
    pub name: String,
    pub runtime: String, // e.g., "iOS 17.2"
    pub state: SimulatorState,
}

impl IosSimulator {
    pub fn to_device(&self) -> Device {
        Device::simulated(&self.name, &self.udid)
    }
}

/// An installed simulator runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimRuntime {
    pub identifier: String,
    pub version: String,
    pub name: String,
}

/// A simulator hardware profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimDeviceType {
    pub identifier: String,
    pub name: String,
}

/// Polling schedule while waiting for a simulator to boot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootPolicy {
    pub interval: Duration,
    pub attempts: u32,
}

impl Default for BootPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            attempts: 30,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// simctl JSON
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SimctlDevicesOutput {
    devices: HashMap<String, Vec<SimctlDevice>>,
}

#[derive(Debug, Deserialize)]
struct SimctlDevice {
    udid: String,
    name: String,
    state: String,
    #[serde(rename = "isAvailable")]
    is_available: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct SimctlRuntimesOutput {
    runtimes: Vec<SimctlRuntime>,
}

#[derive(Debug, Deserialize)]
struct SimctlRuntime {
    identifier: String,
    version: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "isAvailable")]
    is_available: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct SimctlDeviceTypesOutput {
    devicetypes: Vec<SimctlDeviceType>,
}

#[derive(Debug, Deserialize)]
struct SimctlDeviceType {
    identifier: String,
    name: String,
}

// ─────────────────────────────────────────────────────────────────
// Pure helpers
// ─────────────────────────────────────────────────────────────────

/// Parse runtime identifier to friendly name
/// "com.apple.CoreSimulator.SimRuntime.iOS-17-2" -> "iOS 17.2"
fn parse_runtime_name(identifier: &str) -> String {
    if let Some(suffix) = identifier.strip_prefix("com.apple.CoreSimulator.SimRuntime.") {
        if let Some((os_name, version)) = suffix.split_once('-') {
            format!("{} {}", os_name, version.replace('-', "."))
        } else {
            suffix.to_string()
        }
    } else {
        identifier.to_string()
    }
}

/// Numeric components of a dotted version, trailing zeros dropped so that
/// "17" and "17.0" compare equal.
fn version_key(version: &str) -> Vec<u32> {
    let mut parts: Vec<u32> = version
        .split('.')
        .map(|p| p.trim().parse().unwrap_or(0))
        .collect();
    while parts.last() == Some(&0) {
        parts.pop();
    }
    parts
}

/// Order two dotted version strings numerically
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    version_key(a).cmp(&version_key(b))
}

/// Pick the installed runtime closest to `preferred`.
///
/// An exact match wins; otherwise the smallest version above `preferred`;
/// otherwise the newest installed one. Never invents a runtime.
pub fn find_closest_runtime<'a>(installed: &'a [SimRuntime], preferred: &str) -> Option<&'a SimRuntime> {
    if let Some(exact) = installed
        .iter()
        .find(|r| compare_versions(&r.version, preferred) == Ordering::Equal)
    {
        return Some(exact);
    }

    installed
        .iter()
        .filter(|r| compare_versions(&r.version, preferred) == Ordering::Greater)
        .min_by(|a, b| compare_versions(&a.version, &b.version))
        .or_else(|| {
            installed
                .iter()
                .max_by(|a, b| compare_versions(&a.version, &b.version))
        })
}

/// Search pattern for the device-type catalog.
///
/// Families whose marketing names change every year are matched loosely
/// so that "iPhone 17 Pro Max" still finds a Pro Max on older Xcodes.
pub fn device_type_pattern(name: &str, platform: Platform) -> String {
    match platform {
        Platform::IOS if name.contains("Pro Max") => "iPhone.*Pro Max".to_string(),
        Platform::WatchOS if name.contains("Ultra") => "Apple Watch Ultra.*49mm".to_string(),
        _ => regex::escape(name).replace(' ', r"\s+"),
    }
}

/// Exact display-name match first, then the family pattern
pub fn select_device_type<'a>(
    types: &'a [SimDeviceType],
    name: &str,
    platform: Platform,
) -> Result<&'a SimDeviceType> {
    if let Some(exact) = types.iter().find(|t| t.name.eq_ignore_ascii_case(name)) {
        return Ok(exact);
    }

    let pattern = device_type_pattern(name, platform);
    let re = RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .map_err(|_| Error::NoDeviceType {
            pattern: pattern.clone(),
        })?;

    types
        .iter()
        .find(|t| re.is_match(&t.name))
        .ok_or(Error::NoDeviceType { pattern })
}

/// Parse `simctl launch` output: "com.example.demo: 12345"
fn parse_launch_pid(stdout: &str) -> Option<u32> {
    stdout
        .lines()
        .find_map(|line| line.rsplit_once(':'))
        .and_then(|(_, pid)| pid.trim().parse().ok())
}

/// Group simulators by runtime for display
pub fn group_simulators_by_runtime(simulators: &[IosSimulator]) -> Vec<(&str, Vec<&IosSimulator>)> {
    let mut groups: BTreeMap<&str, Vec<&IosSimulator>> = BTreeMap::new();

    for sim in simulators {
        groups.entry(&sim.runtime).or_default().push(sim);
    }

    let mut result: Vec<_> = groups.into_iter().collect();
    result.sort_by(|a, b| runtime_display_order(a.0, b.0));
    result
}

/// Platform name ascending, then newest version first: "iOS 18.0" before
/// "iOS 9.3" before "watchOS 11.0"
fn runtime_display_order(a: &str, b: &str) -> Ordering {
    let (a_os, a_version) = a.split_once(' ').unwrap_or((a, ""));
    let (b_os, b_version) = b.split_once(' ').unwrap_or((b, ""));
    a_os.cmp(b_os)
        .then_with(|| compare_versions(b_version, a_version))
}

fn check(result: CommandResult, what: &str) -> Result<CommandResult> {
    if result.success() {
        Ok(result)
    } else {
        Err(Error::simulator(format!(
            "{what} failed: {}",
            result.combined_output().trim()
        )))
    }
}

// ─────────────────────────────────────────────────────────────────
// Backend
// ─────────────────────────────────────────────────────────────────

/// Simulator operations over a [`CommandRunner`]
#[derive(Debug, Clone)]
pub struct SimulatorBackend<R> {
    runner: R,
    platform: Platform,
    boot: BootPolicy,
}

impl<R: CommandRunner + Sync> SimulatorBackend<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            platform: Platform::IOS,
            boot: BootPolicy::default(),
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_boot_policy(mut self, boot: BootPolicy) -> Self {
        self.boot = boot;
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    async fn simctl<I, S>(&self, args: I, timeout: Duration) -> Result<CommandResult>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = CommandSpec::new(XCRUN)
            .arg("simctl")
            .args(args)
            .timeout(timeout);
        self.runner.run(&spec).await
    }

    /// Installed, available runtimes of the backend's platform, newest first
    pub async fn list_runtimes(&self) -> Result<Vec<SimRuntime>> {
        let result = check(
            self.simctl(["list", "runtimes", "--json"], QUERY_TIMEOUT).await?,
            "simctl list runtimes",
        )?;
        let parsed: SimctlRuntimesOutput = serde_json::from_str(&result.stdout)?;

        let prefix = self.platform.runtime_prefix();
        let mut runtimes: Vec<SimRuntime> = parsed
            .runtimes
            .into_iter()
            .filter(|r| r.is_available != Some(false) && r.identifier.starts_with(prefix))
            .map(|r| SimRuntime {
                name: if r.name.is_empty() {
                    parse_runtime_name(&r.identifier)
                } else {
                    r.name
                },
                identifier: r.identifier,
                version: r.version,
            })
            .collect();

        runtimes.sort_by(|a, b| compare_versions(&b.version, &a.version));
        Ok(runtimes)
    }

    /// Newest installed runtime
    pub async fn latest_runtime(&self) -> Result<SimRuntime> {
        self.list_runtimes()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NoRuntime {
                platform: self.platform.to_string(),
            })
    }

    /// Installed runtime closest to `preferred`
    pub async fn nearest_runtime(&self, preferred: &str) -> Result<Option<SimRuntime>> {
        let runtimes = self.list_runtimes().await?;
        Ok(find_closest_runtime(&runtimes, preferred).cloned())
    }

    pub async fn list_device_types(&self) -> Result<Vec<SimDeviceType>> {
        let result = check(
            self.simctl(["list", "devicetypes", "--json"], QUERY_TIMEOUT)
                .await?,
            "simctl list devicetypes",
        )?;
        let parsed: SimctlDeviceTypesOutput = serde_json::from_str(&result.stdout)?;
        Ok(parsed
            .devicetypes
            .into_iter()
            .map(|t| SimDeviceType {
                identifier: t.identifier,
                name: t.name,
            })
            .collect())
    }

    /// Device type matching a requested device name
    pub async fn resolve_device_type(&self, name: &str) -> Result<SimDeviceType> {
        let types = self.list_device_types().await?;
        select_device_type(&types, name, self.platform).cloned()
    }

    /// All available simulators, every runtime
    async fn list_all(&self) -> Result<Vec<IosSimulator>> {
        let result = check(
            self.simctl(["list", "devices", "--json"], QUERY_TIMEOUT)
                .await?,
            "simctl list devices",
        )?;
        let parsed: SimctlDevicesOutput = serde_json::from_str(&result.stdout)?;

        let mut simulators = Vec::new();
        for (runtime_key, devices) in parsed.devices {
            let runtime = parse_runtime_name(&runtime_key);
            for device in devices {
                if device.is_available == Some(false) {
                    continue;
                }
                simulators.push(IosSimulator {
                    udid: device.udid,
                    name: device.name,
                    runtime: runtime.clone(),
                    state: SimulatorState::from(device.state.as_str()),
                });
            }
        }

        // Newest runtime first, then by name
        simulators.sort_by(|a, b| {
            runtime_display_order(&a.runtime, &b.runtime).then_with(|| a.name.cmp(&b.name))
        });
        Ok(simulators)
    }

    /// Available simulators of the backend's platform
    pub async fn list_devices(&self) -> Result<Vec<IosSimulator>> {
        let family = self.platform.to_string();
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|s| s.runtime.starts_with(&family))
            .collect())
    }

    /// Existing simulator with exactly this display name
    pub async fn find_device(&self, name: &str) -> Result<Option<IosSimulator>> {
        Ok(self.list_devices().await?.into_iter().find(|s| s.name == name))
    }

    /// Create a simulator named `name`.
    ///
    /// Uses the runtime closest to `preferred_version` when given, the newest
    /// installed runtime otherwise.
    pub async fn create_device(&self, name: &str, preferred_version: Option<&str>) -> Result<Device> {
        let runtime = match preferred_version {
            Some(version) => self
                .nearest_runtime(version)
                .await?
                .ok_or_else(|| Error::NoRuntime {
                    platform: self.platform.to_string(),
                })?,
            None => self.latest_runtime().await?,
        };
        let device_type = self.resolve_device_type(name).await?;

        info!(
            "Creating simulator '{}' ({} on {})",
            name, device_type.name, runtime.name
        );

        let result = check(
            self.simctl(
                [
                    "create",
                    name,
                    device_type.identifier.as_str(),
                    runtime.identifier.as_str(),
                ],
                QUERY_TIMEOUT,
            )
            .await?,
            "simctl create",
        )?;

        let udid = result.stdout_trimmed().to_string();
        if udid.is_empty() {
            return Err(Error::simulator("simctl create returned no device id"));
        }

        Ok(Device::simulated(name, udid))
    }

    /// Existing simulator by name, created when absent
    pub async fn ensure_device(&self, name: &str) -> Result<Device> {
        if let Some(existing) = self.find_device(name).await? {
            debug!("Reusing simulator '{}' ({})", existing.name, existing.udid);
            return Ok(existing.to_device());
        }
        self.create_device(name, None).await
    }

    async fn state_of(&self, udid: &str) -> Result<SimulatorState> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .find(|s| s.udid == udid)
            .map(|s| s.state)
            .unwrap_or(SimulatorState::Unknown))
    }

    /// Boot `udid` unless already booted, then poll until it reports booted
    pub async fn boot_if_needed(&self, udid: &str) -> Result<()> {
        if self.state_of(udid).await? == SimulatorState::Booted {
            return Ok(());
        }

        let result = self.simctl(["boot", udid], QUERY_TIMEOUT).await?;
        if !result.success() {
            // "Unable to boot device in current state: Booted" is not an error
            if !result.stderr.contains("Booted") {
                return Err(Error::simulator(format!(
                    "Failed to boot simulator: {}",
                    result.stderr.trim()
                )));
            }
        }

        self.wait_for_boot(udid).await?;

        // Bring Simulator.app forward; failure only affects visibility
        let open = CommandSpec::new("open").args(["-a", "Simulator"]);
        if let Err(e) = self.runner.run(&open).await {
            debug!("Could not open Simulator.app: {}", e);
        }

        Ok(())
    }

    async fn wait_for_boot(&self, udid: &str) -> Result<()> {
        for attempt in 1..=self.boot.attempts {
            if self.state_of(udid).await? == SimulatorState::Booted {
                debug!("Simulator {} booted after {} checks", udid, attempt);
                return Ok(());
            }
            tokio::time::sleep(self.boot.interval).await;
        }

        Err(Error::BootTimeout {
            udid: udid.to_string(),
            attempts: self.boot.attempts,
        })
    }

    pub async fn install(&self, udid: &str, app: &Path) -> Result<()> {
        let app = app.to_string_lossy();
        check(
            self.simctl(["install", udid, app.as_ref()], INSTALL_TIMEOUT)
                .await?,
            "simctl install",
        )?;
        Ok(())
    }

    /// Launch the app and report its pid and the simulator's OS version
    pub async fn launch(&self, udid: &str, bundle_id: &str) -> Result<LaunchInfo> {
        let result = check(
            self.simctl(["launch", udid, bundle_id], INSTALL_TIMEOUT)
                .await?,
            "simctl launch",
        )?;

        let os_version = match self
            .simctl(["getenv", udid, RUNTIME_VERSION_KEY], QUERY_TIMEOUT)
            .await
        {
            Ok(env) if env.success() && !env.stdout_trimmed().is_empty() => {
                Some(env.stdout_trimmed().to_string())
            }
            _ => None,
        };

        Ok(LaunchInfo {
            pid: parse_launch_pid(&result.stdout),
            os_version,
        })
    }

    /// Stop a running instance of the app; not running is fine
    pub async fn terminate(&self, udid: &str, bundle_id: &str) -> Result<()> {
        let result = self
            .simctl(["terminate", udid, bundle_id], QUERY_TIMEOUT)
            .await?;
        if !result.success() {
            debug!("simctl terminate: {}", result.stderr.trim());
        }
        Ok(())
    }
}

impl<R: CommandRunner + Sync> DeviceBackend for SimulatorBackend<R> {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Simulated
    }

    async fn find(&self, name: &str) -> Result<Option<Device>> {
        Ok(self.find_device(name).await?.map(|s| s.to_device()))
    }

    async fn boot_if_needed(&self, device: &Device) -> Result<()> {
        SimulatorBackend::boot_if_needed(self, &device.id).await
    }

    async fn install(&self, app: &Path, device: &Device) -> Result<()> {
        SimulatorBackend::install(self, &device.id, app).await
    }

    async fn launch(&self, bundle_id: &str, device: &Device) -> Result<LaunchInfo> {
        SimulatorBackend::launch(self, &device.id, bundle_id).await
    }

    async fn terminate(&self, bundle_id: &str, device: &Device) -> Result<()> {
        SimulatorBackend::terminate(self, &device.id, bundle_id).await
    }

    async fn check_trust(&self, _device: &Device) -> Result<bool> {
        Ok(true)
    }
}

//! Device resolution and dispatch
//!
//! [`DeviceManager`] turns a device name into a [`Device`] handle, preferring
//! a connected physical device, then an existing simulator, and creating a
//! simulator as the last resort. Operations on a handle are routed to the
//! backend that owns it.

use std::path::Path;

use brx_core::prelude::*;
use brx_core::{Device, DeviceKind, LaunchInfo, Platform};

use crate::backend::DeviceBackend;
use crate::physical::{PhysicalBackend, PhysicalDevice};
use crate::runner::CommandRunner;
use crate::simulator::{IosSimulator, SimulatorBackend};
use crate::tool_availability::ToolAvailability;

const NO_PHYSICAL_DEVICES: &str = "No physical devices connected. Connect your iPhone and try again.";

/// Everything `brx devices` shows
#[derive(Debug, Clone, Default)]
pub struct DeviceListing {
    /// `None` when the physical helper is unavailable
    pub physical: Option<Vec<PhysicalDevice>>,
    pub simulators: Vec<IosSimulator>,
}

/// Resolves device names and dispatches per-device operations
#[derive(Debug, Clone)]
pub struct DeviceManager<R> {
    simulator: SimulatorBackend<R>,
    physical: Option<PhysicalBackend<R>>,
}

impl<R: CommandRunner + Clone + Sync> DeviceManager<R> {
    /// Manager for the host, with a physical backend when `devicectl` exists
    pub fn new(runner: R, tools: &ToolAvailability) -> Self {
        Self {
            physical: PhysicalBackend::probe(runner.clone(), tools),
            simulator: SimulatorBackend::new(runner),
        }
    }

    pub fn with_backends(simulator: SimulatorBackend<R>, physical: Option<PhysicalBackend<R>>) -> Self {
        Self {
            simulator,
            physical,
        }
    }

    pub fn simulator(&self) -> &SimulatorBackend<R> {
        &self.simulator
    }

    pub fn platform(&self) -> Platform {
        self.simulator.platform()
    }

    pub fn has_physical_backend(&self) -> bool {
        self.physical.is_some()
    }

    fn physical(&self) -> Result<&PhysicalBackend<R>> {
        self.physical.as_ref().ok_or(Error::HelperUnavailable)
    }

    /// Resolve `name` to a device, creating a simulator when nothing matches.
    ///
    /// Resolving the same name again returns the same id.
    pub async fn resolve(&self, name: &str) -> Result<Device> {
        if let Some(physical) = &self.physical {
            match physical.find(name).await {
                Ok(Some(device)) => {
                    info!("Using physical device '{}' ({})", device.name, device.id);
                    return Ok(device);
                }
                Ok(None) => {}
                Err(e) => warn!("Physical device lookup failed, trying simulators: {}", e),
            }
        }

        match self.simulator.find(name).await {
            Ok(Some(device)) => {
                debug!("Using simulator '{}' ({})", device.name, device.id);
                return Ok(device);
            }
            Ok(None) => {}
            Err(e) => warn!("Simulator lookup failed: {}", e),
        }

        self.simulator
            .create_device(name, None)
            .await
            .map_err(|e| Error::DeviceNotFound {
                name: name.to_string(),
                reason: Some(e.to_string()),
            })
    }

    /// Resolve with an optional kind constraint.
    ///
    /// A physical constraint never falls back to a simulator.
    pub async fn ensure(&self, name: &str, kind: Option<DeviceKind>) -> Result<Device> {
        match kind {
            Some(DeviceKind::Physical) => self
                .physical()?
                .find(name)
                .await?
                .ok_or_else(|| Error::device_not_found(name)),
            Some(DeviceKind::Simulated) => match self.simulator.find(name).await? {
                Some(device) => Ok(device),
                None => self
                    .simulator
                    .create_device(name, None)
                    .await
                    .map_err(|e| Error::DeviceNotFound {
                        name: name.to_string(),
                        reason: Some(e.to_string()),
                    }),
            },
            None => self.resolve(name).await,
        }
    }

    /// First connected physical device
    pub async fn first_physical(&self) -> Result<Device> {
        self.physical()?
            .list_devices()
            .await?
            .first()
            .map(PhysicalDevice::to_device)
            .ok_or_else(|| Error::DeviceNotFound {
                name: "physical device".to_string(),
                reason: Some(NO_PHYSICAL_DEVICES.to_string()),
            })
    }

    pub async fn boot_if_needed(&self, device: &Device) -> Result<()> {
        match device.kind {
            DeviceKind::Simulated => DeviceBackend::boot_if_needed(&self.simulator, device).await,
            DeviceKind::Physical => DeviceBackend::boot_if_needed(self.physical()?, device).await,
        }
    }

    pub async fn install(&self, app: &Path, device: &Device) -> Result<()> {
        info!("Installing {} on {}", app.display(), device.name);
        match device.kind {
            DeviceKind::Simulated => DeviceBackend::install(&self.simulator, app, device).await,
            DeviceKind::Physical => DeviceBackend::install(self.physical()?, app, device).await,
        }
    }

    pub async fn launch(&self, bundle_id: &str, device: &Device) -> Result<LaunchInfo> {
        info!("Launching {} on {}", bundle_id, device.name);
        match device.kind {
            DeviceKind::Simulated => DeviceBackend::launch(&self.simulator, bundle_id, device).await,
            DeviceKind::Physical => DeviceBackend::launch(self.physical()?, bundle_id, device).await,
        }
    }

    pub async fn terminate(&self, bundle_id: &str, device: &Device) -> Result<()> {
        match device.kind {
            DeviceKind::Simulated => {
                DeviceBackend::terminate(&self.simulator, bundle_id, device).await
            }
            DeviceKind::Physical => {
                DeviceBackend::terminate(self.physical()?, bundle_id, device).await
            }
        }
    }

    /// Whether the device accepts installs; simulators always do
    pub async fn check_trust(&self, device: &Device) -> Result<bool> {
        match device.kind {
            DeviceKind::Simulated => DeviceBackend::check_trust(&self.simulator, device).await,
            DeviceKind::Physical => DeviceBackend::check_trust(self.physical()?, device).await,
        }
    }

    /// Physical devices (when reachable) and simulators
    pub async fn list(&self) -> Result<DeviceListing> {
        let physical = match &self.physical {
            Some(backend) => match backend.list_devices().await {
                Ok(devices) => Some(devices),
                Err(e) => {
                    warn!("Could not list physical devices: {}", e);
                    Some(Vec::new())
                }
            },
            None => None,
        };

        Ok(DeviceListing {
            physical,
            simulators: self.simulator.list_devices().await?,
        })
    }
}

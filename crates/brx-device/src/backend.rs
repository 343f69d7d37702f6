//! Common surface of the simulator and physical backends

use std::path::Path;

use brx_core::prelude::*;
use brx_core::{Device, DeviceKind, LaunchInfo};

/// Device operations shared by both backends
///
/// The device manager dispatches on [`Device::kind`] to whichever backend
/// owns the handle.
#[trait_variant::make(DeviceBackend: Send)]
pub trait LocalDeviceBackend {
    /// Which kind of device this backend owns
    fn kind(&self) -> DeviceKind;

    /// Look up a device by display name
    async fn find(&self, name: &str) -> Result<Option<Device>>;

    /// Make the device ready to receive an install
    async fn boot_if_needed(&self, device: &Device) -> Result<()>;

    async fn install(&self, app: &Path, device: &Device) -> Result<()>;

    async fn launch(&self, bundle_id: &str, device: &Device) -> Result<LaunchInfo>;

    /// Stop a running instance of the app before relaunching it
    async fn terminate(&self, bundle_id: &str, device: &Device) -> Result<()>;

    /// Whether the device accepts installs from this host
    async fn check_trust(&self, device: &Device) -> Result<bool>;
}

//! # brx-device - Command Execution and Device Backends
//!
//! Runs external tools and manages build/run targets: simulators through
//! `xcrun simctl` and physical devices through `devicectl`.
//!
//! Depends on [`brx_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Command Execution
//! - [`CommandRunner`] - Run a program with args, env and timeout
//! - [`SystemRunner`] - Host implementation over `tokio::process`
//!
//! ### Backends
//! - [`SimulatorBackend`] - Runtime/device-type selection, create, boot, install, launch
//! - [`PhysicalBackend`] - `devicectl` table parsing, install, launch, trust probe
//! - [`DeviceBackend`] - Operations both backends share
//!
//! ### Resolution
//! - [`DeviceManager`] - Name to device handle, physical first, simulator created on demand
//! - [`ToolAvailability`] - Which Xcode tools the host has

pub mod backend;
pub mod manager;
pub mod physical;
pub mod runner;
pub mod simulator;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod tool_availability;

pub use backend::{DeviceBackend, LocalDeviceBackend};
pub use manager::{DeviceListing, DeviceManager};
pub use physical::{parse_device_table, PhysicalBackend, PhysicalDevice, XCODE_DEVICECTL};
pub use runner::{CommandResult, CommandRunner, CommandSpec, LocalCommandRunner, SystemRunner};
pub use simulator::{
    compare_versions, device_type_pattern, find_closest_runtime, group_simulators_by_runtime,
    BootPolicy, IosSimulator, SimDeviceType, SimRuntime, SimulatorBackend, SimulatorState,
};
pub use tool_availability::ToolAvailability;

//! brx-app - Build orchestration and live reload for brx
//!
//! This crate classifies build failures and recovers from them within a
//! bounded retry budget. It also runs the build → install → launch flow and
//! drives live reload from file changes. Collaborators (signing lookup,
//! operator prompts, usage gate) are injected so every flow runs against
//! fakes in tests.

pub mod classifier;
pub mod events;
pub mod gate;
pub mod operator;
pub mod orchestrator;
pub mod projectgen;
pub mod recovery;
pub mod reload;
pub mod run;
pub mod settings;
pub mod signals;
pub mod signing;
pub mod watcher;

// Re-export primary types
pub use classifier::classify;
pub use events::{EventSink, RunEvent};
pub use gate::{ensure_permitted, OpenGate, Operation, UsageGate};
pub use operator::{LocalOperator, NonInteractive, Operator, TerminalOperator};
pub use orchestrator::{app_bundle_path, BuildOrchestrator, OUTPUT_DIR};
pub use projectgen::ProjectGenerator;
pub use recovery::{RecoveryAction, RecoveryContext, RecoveryExt, RecoveryStep};
pub use reload::{DeviceReloader, LocalReloadHandler, ReloadHandler, ReloadQueue, ReloadReport};
pub use run::{BuildOptions, RunFlow, RunOptions, RunOutcome};
pub use settings::{load_settings, Settings};
pub use signing::{KeychainSigning, LocalSigningLookup, SigningIdentity, SigningLookup};
pub use watcher::{classify_burst, Dispatcher, LiveReload, Throttle, WatcherConfig};

// Re-export device types for the binary
pub use brx_device::{DeviceListing, DeviceManager, SystemRunner, ToolAvailability};

//! The `run` and `build` flows
//!
//! `run`: gate check, device selection, build, boot or trust check,
//! install, launch, usage record, then live reload until shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use brx_core::prelude::*;
use brx_core::{BuildContext, Destination, Device, DeviceKind, LaunchInfo, ProjectDescriptor};
use brx_device::{CommandRunner, DeviceManager};
use tokio::sync::watch;

use crate::events::{EventSink, RunEvent};
use crate::gate::{ensure_permitted, Operation, UsageGate};
use crate::operator::Operator;
use crate::orchestrator::BuildOrchestrator;
use crate::reload::DeviceReloader;
use crate::settings::Settings;
use crate::signals::wait_for_shutdown;
use crate::signing::SigningLookup;
use crate::watcher::{LiveReload, WatcherConfig};

/// Options of `brx run`
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Device name; the configured default when absent
    pub device: Option<String>,
    /// Restrict resolution to one kind of device
    pub kind: Option<DeviceKind>,
    /// Use the first connected physical device
    pub first_physical: bool,
    /// Build configuration; the configured default when absent
    pub configuration: Option<String>,
    /// Keep running with live reload after launch
    pub watch: bool,
}

/// Options of `brx build`
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub configuration: Option<String>,
    /// Build for physical devices instead of the simulator
    pub physical: bool,
}

/// What a finished run deployed
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub device: Device,
    pub app: PathBuf,
    pub launch: LaunchInfo,
}

pub struct RunFlow<R, S, O> {
    descriptor: ProjectDescriptor,
    settings: Settings,
    devices: Arc<DeviceManager<R>>,
    orchestrator: Arc<BuildOrchestrator<R, S, O>>,
    gate: Arc<dyn UsageGate>,
    events: EventSink,
}

impl<R, S, O> RunFlow<R, S, O>
where
    R: CommandRunner + Clone + Sync + 'static,
    S: SigningLookup + Sync + 'static,
    O: Operator + Sync + 'static,
{
    pub fn new(
        settings: Settings,
        devices: DeviceManager<R>,
        orchestrator: BuildOrchestrator<R, S, O>,
        gate: Arc<dyn UsageGate>,
        events: EventSink,
    ) -> Self {
        let orchestrator = orchestrator
            .with_timeout(settings.build.timeout())
            .with_events(events.clone());
        Self {
            descriptor: orchestrator.descriptor().clone(),
            settings,
            devices: Arc::new(devices),
            orchestrator: Arc::new(orchestrator),
            gate,
            events,
        }
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn devices(&self) -> &DeviceManager<R> {
        &self.devices
    }

    fn context(&self, destination: Destination, configuration: Option<&str>) -> BuildContext {
        BuildContext {
            project: self.descriptor.project_path(),
            scheme: self.descriptor.scheme().to_string(),
            configuration: configuration
                .unwrap_or(&self.settings.build.configuration)
                .to_string(),
            destination,
        }
    }

    /// The descriptor's destination when it targets the same kind of device
    fn pinned_destination(&self, fallback: Destination) -> Destination {
        match self.descriptor.destination_override() {
            Some(pinned) if pinned.is_physical() == fallback.is_physical() => pinned,
            Some(pinned) => {
                debug!(
                    "Ignoring destination '{}' for a {} build",
                    pinned,
                    fallback.kind()
                );
                fallback
            }
            None => fallback,
        }
    }

    /// Build without deploying
    pub async fn build(&self, options: &BuildOptions) -> Result<PathBuf> {
        ensure_permitted(self.gate.as_ref(), Operation::Build)?;

        let destination = if options.physical {
            Destination::GenericDevice
        } else {
            Destination::GenericSimulator
        };
        let destination = self.pinned_destination(destination);
        let ctx = self.context(destination, options.configuration.as_deref());
        let app = self.orchestrator.build(&ctx).await?;

        self.gate.record_usage(Operation::Build);
        Ok(app)
    }

    /// Build, deploy and launch; with `watch`, keep reloading until `shutdown`
    pub async fn run(
        &self,
        options: &RunOptions,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<RunOutcome> {
        ensure_permitted(self.gate.as_ref(), Operation::Run)?;

        let device = self.select_device(options).await?;
        self.events
            .success(format!("Using {} ({})", device.name, device.id));

        // The resolved device decides the target, never the descriptor
        let ctx = self.context(device.destination(), options.configuration.as_deref());
        let app = self.orchestrator.build(&ctx).await?;

        let launch = self.deploy(&device, &app).await?;
        self.gate.record_usage(Operation::Run);

        let outcome = RunOutcome {
            device: device.clone(),
            app: app.clone(),
            launch,
        };

        if options.watch {
            self.watch(device, ctx, app, &mut shutdown).await;
        }

        Ok(outcome)
    }

    async fn select_device(&self, options: &RunOptions) -> Result<Device> {
        if options.first_physical {
            self.events.step("📱", "Looking for a connected device");
            return self.devices.first_physical().await;
        }

        let name = options
            .device
            .as_deref()
            .unwrap_or(&self.settings.device.default_name);
        self.events.step("📱", format!("Resolving device '{name}'"));
        self.devices.ensure(name, options.kind).await
    }

    /// Boot or verify trust, then install and launch
    async fn deploy(&self, device: &Device, app: &std::path::Path) -> Result<LaunchInfo> {
        if device.is_physical() {
            if !self.devices.check_trust(device).await? {
                self.events.emit(RunEvent::TrustRequired {
                    device: device.clone(),
                });
                return Err(Error::DeviceNotTrusted {
                    name: device.name.clone(),
                    id: device.id.clone(),
                });
            }
        } else {
            self.events.step("⏳", format!("Booting {}", device.name));
            self.devices.boot_if_needed(device).await?;
        }

        self.events
            .step("📦", format!("Installing on {}", device.name));
        self.devices.install(app, device).await?;

        self.events
            .step("🚀", format!("Launching {}", self.descriptor.bundle_id));
        let launch = self
            .devices
            .launch(&self.descriptor.bundle_id, device)
            .await?;
        match (launch.pid, &launch.os_version) {
            (Some(pid), Some(os)) => self
                .events
                .success(format!("Launched (pid {pid}, iOS {os})")),
            (Some(pid), None) => self.events.success(format!("Launched (pid {pid})")),
            _ => self.events.success("Launched"),
        }
        Ok(launch)
    }

    /// Live reload until shutdown. A watcher that cannot start only warns:
    /// the app is already running.
    async fn watch(
        &self,
        device: Device,
        ctx: BuildContext,
        app: PathBuf,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        let config = WatcherConfig::from_settings(&self.descriptor.root, &self.settings.watcher);
        let mut live = LiveReload::new(config);
        let reloader = DeviceReloader::new(
            self.orchestrator.clone(),
            self.devices.clone(),
            device,
            ctx,
            app,
            self.events.clone(),
        );

        match live.start(reloader, shutdown.clone()) {
            Ok(paths) => {
                self.events.emit(RunEvent::Watching { paths });
                wait_for_shutdown(shutdown).await;
                live.stop();
                self.events.emit(RunEvent::Shutdown);
            }
            Err(e) => {
                warn!("Live reload not started: {}", e);
                self.events.warning(format!("Live reload unavailable: {e}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::NonInteractive;
    use crate::orchestrator::{app_bundle_path, OUTPUT_DIR};
    use crate::signing::SigningIdentity;
    use brx_device::test_utils::{devices_json, FakeRunner};
    use brx_device::ToolAvailability;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct NoSigning;

    impl SigningLookup for NoSigning {
        async fn find_identity(&self) -> Result<Option<SigningIdentity>> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct CountingGate {
        permit: bool,
        recorded: AtomicUsize,
    }

    impl UsageGate for CountingGate {
        fn is_permitted(&self, _operation: Operation) -> bool {
            self.permit
        }

        fn record_usage(&self, _operation: Operation) {
            self.recorded.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn flow(
        dir: &TempDir,
        runner: &FakeRunner,
        gate: Arc<CountingGate>,
    ) -> RunFlow<FakeRunner, NoSigning, NonInteractive> {
        flow_with_descriptor(
            dir,
            runner,
            gate,
            "name: Demo\nbundle_id: com.example.demo\n",
        )
    }

    fn flow_with_descriptor(
        dir: &TempDir,
        runner: &FakeRunner,
        gate: Arc<CountingGate>,
        descriptor: &str,
    ) -> RunFlow<FakeRunner, NoSigning, NonInteractive> {
        std::fs::write(dir.path().join("brx.yml"), descriptor).unwrap();
        let descriptor = ProjectDescriptor::load(dir.path()).unwrap();
        RunFlow::new(
            Settings::default(),
            DeviceManager::new(runner.clone(), &ToolAvailability::default()),
            BuildOrchestrator::new(runner.clone(), descriptor, NoSigning, NonInteractive),
            gate,
            EventSink::new(),
        )
    }

    #[tokio::test]
    async fn test_denied_run_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let runner = FakeRunner::new();
        let gate = Arc::new(CountingGate::default());
        let (_tx, rx) = watch::channel(false);

        let err = flow(&dir, &runner, gate.clone())
            .run(&RunOptions::default(), rx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UsageDenied { ref operation } if operation == "run"));
        assert!(runner.calls().is_empty());
        assert_eq!(gate.recorded.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_on_existing_simulator() {
        let dir = TempDir::new().unwrap();
        let app = app_bundle_path(
            &dir.path().join(OUTPUT_DIR),
            "Debug",
            DeviceKind::Simulated,
            "Demo",
        );
        std::fs::create_dir_all(&app).unwrap();

        let runner = FakeRunner::new();
        runner
            .respond_ok(
                "xcrun",
                &["simctl", "list", "devices"],
                &devices_json(&[("26.0", "iPhone 17 Pro Max", "SIM-1", "Booted")]),
            )
            .respond_ok("xcodebuild", &["-project"], "** BUILD SUCCEEDED **")
            .respond_ok("xcrun", &["simctl", "install"], "")
            .respond_ok("xcrun", &["simctl", "launch"], "com.example.demo: 4242")
            .respond_ok("xcrun", &["simctl", "getenv"], "26.0");
        let gate = Arc::new(CountingGate {
            permit: true,
            ..Default::default()
        });
        let (_tx, rx) = watch::channel(false);

        let outcome = flow(&dir, &runner, gate.clone())
            .run(&RunOptions::default(), rx)
            .await
            .unwrap();

        assert_eq!(outcome.device.id, "SIM-1");
        assert_eq!(outcome.app, app);
        assert_eq!(outcome.launch.pid, Some(4242));
        assert_eq!(outcome.launch.os_version.as_deref(), Some("26.0"));
        assert!(runner.called_with("xcodebuild", "platform=iOS Simulator,id=SIM-1"));
        assert_eq!(runner.count("xcrun", &["simctl", "boot"]), 0);
        assert_eq!(gate.recorded.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_build_targets_generic_destination() {
        let dir = TempDir::new().unwrap();
        let app = app_bundle_path(
            &dir.path().join(OUTPUT_DIR),
            "Release",
            DeviceKind::Simulated,
            "Demo",
        );
        std::fs::create_dir_all(&app).unwrap();
        let runner = FakeRunner::new();
        runner.respond_ok("xcodebuild", &["-project"], "");
        let gate = Arc::new(CountingGate {
            permit: true,
            ..Default::default()
        });

        let built = flow(&dir, &runner, gate.clone())
            .build(&BuildOptions {
                configuration: Some("Release".to_string()),
                physical: false,
            })
            .await
            .unwrap();

        assert_eq!(built, app);
        assert!(runner.called_with("xcodebuild", "generic/platform=iOS Simulator"));
        assert!(runner.called_with("xcodebuild", "Release"));
        assert_eq!(gate.recorded.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_first_physical_without_helper() {
        let dir = TempDir::new().unwrap();
        let runner = FakeRunner::new();
        let gate = Arc::new(CountingGate {
            permit: true,
            ..Default::default()
        });
        let (_tx, rx) = watch::channel(false);

        let err = flow(&dir, &runner, gate)
            .run(
                &RunOptions {
                    first_physical: true,
                    ..Default::default()
                },
                rx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HelperUnavailable));
    }

    const PINNED_DEVICE_DESCRIPTOR: &str =
        "name: Demo\nbundle_id: com.example.demo\ndestination: generic/platform=iOS\n";

    #[tokio::test]
    async fn test_simulator_run_ignores_device_destination() {
        let dir = TempDir::new().unwrap();
        let app = app_bundle_path(
            &dir.path().join(OUTPUT_DIR),
            "Debug",
            DeviceKind::Simulated,
            "Demo",
        );
        std::fs::create_dir_all(&app).unwrap();

        let runner = FakeRunner::new();
        runner
            .respond_ok(
                "xcrun",
                &["simctl", "list", "devices"],
                &devices_json(&[("18.0", "iPhone 16", "SIM-16", "Booted")]),
            )
            .respond_ok("xcodebuild", &["-project"], "** BUILD SUCCEEDED **")
            .respond_ok("xcrun", &["simctl", "install"], "")
            .respond_ok("xcrun", &["simctl", "launch"], "com.example.demo: 7")
            .respond_ok("xcrun", &["simctl", "getenv"], "18.0");
        let gate = Arc::new(CountingGate {
            permit: true,
            ..Default::default()
        });
        let (_tx, rx) = watch::channel(false);

        let outcome = flow_with_descriptor(&dir, &runner, gate, PINNED_DEVICE_DESCRIPTOR)
            .run(
                &RunOptions {
                    device: Some("iPhone 16".to_string()),
                    kind: Some(DeviceKind::Simulated),
                    ..Default::default()
                },
                rx,
            )
            .await
            .unwrap();

        assert_eq!(outcome.device.id, "SIM-16");
        assert_eq!(outcome.app, app);
        assert!(runner.called_with("xcodebuild", "platform=iOS Simulator,id=SIM-16"));
        assert!(!runner.called_with("xcodebuild", "generic/platform=iOS"));
        assert!(!runner.called_with("xcodebuild", "-allowProvisioningUpdates"));
        assert!(runner.called_with("xcrun", app.to_string_lossy().as_ref()));
    }

    #[tokio::test]
    async fn test_build_applies_destination_of_same_kind() {
        let dir = TempDir::new().unwrap();
        let app = app_bundle_path(
            &dir.path().join(OUTPUT_DIR),
            "Debug",
            DeviceKind::Simulated,
            "Demo",
        );
        std::fs::create_dir_all(&app).unwrap();
        let runner = FakeRunner::new();
        runner.respond_ok("xcodebuild", &["-project"], "");
        let gate = Arc::new(CountingGate {
            permit: true,
            ..Default::default()
        });

        let built = flow_with_descriptor(
            &dir,
            &runner,
            gate,
            "name: Demo\nbundle_id: com.example.demo\ndestination: platform=iOS Simulator,name=iPad Air\n",
        )
        .build(&BuildOptions::default())
        .await
        .unwrap();

        assert_eq!(built, app);
        assert!(runner.called_with("xcodebuild", "platform=iOS Simulator,name=iPad Air"));
    }

    #[tokio::test]
    async fn test_simulator_build_ignores_device_destination() {
        let dir = TempDir::new().unwrap();
        let app = app_bundle_path(
            &dir.path().join(OUTPUT_DIR),
            "Debug",
            DeviceKind::Simulated,
            "Demo",
        );
        std::fs::create_dir_all(&app).unwrap();
        let runner = FakeRunner::new();
        runner.respond_ok("xcodebuild", &["-project"], "");
        let gate = Arc::new(CountingGate {
            permit: true,
            ..Default::default()
        });

        flow_with_descriptor(&dir, &runner, gate, PINNED_DEVICE_DESCRIPTOR)
            .build(&BuildOptions::default())
            .await
            .unwrap();

        assert!(runner.called_with("xcodebuild", "generic/platform=iOS Simulator"));
        assert!(!runner.called_with("xcodebuild", "generic/platform=iOS"));
    }
}

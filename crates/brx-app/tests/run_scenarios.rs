//! End-to-end flows against a scripted host

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use brx_app::{
    app_bundle_path, classify, BuildOrchestrator, Dispatcher, EventSink, NonInteractive, OpenGate,
    Operator, RunEvent, RunFlow, RunOptions, Settings, SigningIdentity, SigningLookup,
    WatcherConfig, OUTPUT_DIR,
};
use brx_core::{
    BuildContext, ChangeClass, Destination, DeviceKind, Error, FailureKind, ProjectDescriptor,
    Result,
};
use brx_device::test_utils::{device_types_json, devices_json, runtimes_json, FakeRunner};
use brx_device::{
    find_closest_runtime, CommandResult, DeviceManager, PhysicalBackend, SimRuntime,
    SimulatorBackend, ToolAvailability,
};
use tempfile::TempDir;
use tokio::sync::watch;

const DEVICE_TABLE: &str = "\
Name            Hostname                          Identifier                             State                Model
-------------   -------------------------------   ------------------------------------   ------------------   --------------------------
Zac's iPhone    Zacs-iPhone.coredevice.local      7A1B2C3D-1111-2222-3333-444455556666   available (paired)   iPhone 15 Pro (iPhone16,1)
";

struct FixedSigning(Option<SigningIdentity>);

impl SigningLookup for FixedSigning {
    async fn find_identity(&self) -> Result<Option<SigningIdentity>> {
        Ok(self.0.clone())
    }
}

#[derive(Clone, Default)]
struct CountingOperator(Arc<AtomicUsize>);

impl Operator for CountingOperator {
    async fn confirm_signing_setup(&self, _project: &Path) -> Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn identity() -> SigningIdentity {
    SigningIdentity {
        name: "Apple Development: dev@example.com (ABCDE12345)".to_string(),
        team_id: "ABCDE12345".to_string(),
    }
}

/// Write a minimal `brx.yml` and load it
fn create_project(dir: &TempDir) -> ProjectDescriptor {
    std::fs::write(
        dir.path().join("brx.yml"),
        "name: Demo\nbundle_id: com.example.demo\n",
    )
    .unwrap();
    ProjectDescriptor::load(dir.path()).unwrap()
}

fn create_bundle(dir: &TempDir, kind: DeviceKind) -> PathBuf {
    let app = app_bundle_path(&dir.path().join(OUTPUT_DIR), "Debug", kind, "Demo");
    std::fs::create_dir_all(&app).unwrap();
    app
}

fn runtime(version: &str) -> SimRuntime {
    SimRuntime {
        identifier: format!(
            "com.apple.CoreSimulator.SimRuntime.iOS-{}",
            version.replace('.', "-")
        ),
        version: version.to_string(),
        name: format!("iOS {version}"),
    }
}

// ─────────────────────────────────────────────────────────
// Device resolution
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_resolve_creates_simulator_on_latest_runtime_once() {
    let runner = FakeRunner::new();
    let created = Arc::new(AtomicBool::new(false));

    let listed = created.clone();
    runner.respond_with("xcrun", &["simctl", "list", "devices"], move |_| {
        if listed.load(Ordering::SeqCst) {
            CommandResult::ok(devices_json(&[(
                "26.0",
                "iPhone 17 Pro Max",
                "NEW-UDID",
                "Shutdown",
            )]))
        } else {
            CommandResult::ok(devices_json(&[]))
        }
    });
    let flag = created.clone();
    runner.respond_with("xcrun", &["simctl", "create"], move |_| {
        flag.store(true, Ordering::SeqCst);
        CommandResult::ok("NEW-UDID\n")
    });
    runner
        .respond_ok(
            "xcrun",
            &["simctl", "list", "runtimes"],
            &runtimes_json(&["18.4", "26.0"]),
        )
        .respond_ok(
            "xcrun",
            &["simctl", "list", "devicetypes"],
            &device_types_json(&["iPhone 16", "iPhone 17 Pro Max"]),
        );

    let manager = DeviceManager::new(runner.clone(), &ToolAvailability::default());

    let first = manager.resolve("iPhone 17 Pro Max").await.unwrap();
    assert_eq!(first.id, "NEW-UDID");
    assert_eq!(first.kind, DeviceKind::Simulated);

    let create = runner
        .calls()
        .into_iter()
        .find(|c| c.args.get(1).map(String::as_str) == Some("create"))
        .unwrap();
    assert!(create
        .args
        .contains(&"com.apple.CoreSimulator.SimRuntime.iOS-26-0".to_string()));
    assert!(create
        .args
        .contains(&"com.apple.CoreSimulator.SimDeviceType.iPhone-17-Pro-Max".to_string()));

    let second = manager.resolve("iPhone 17 Pro Max").await.unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(runner.count("xcrun", &["simctl", "create"]), 1);
}

#[test]
fn test_find_closest_runtime_properties() {
    let installed = vec![runtime("17.5"), runtime("18.0"), runtime("18.4")];

    assert_eq!(
        find_closest_runtime(&installed, "18.0").unwrap().version,
        "18.0"
    );
    assert_eq!(
        find_closest_runtime(&installed, "18").unwrap().version,
        "18.0"
    );
    assert_eq!(
        find_closest_runtime(&installed, "18.1").unwrap().version,
        "18.4"
    );
    assert_eq!(
        find_closest_runtime(&installed, "19.0").unwrap().version,
        "18.4"
    );
    assert_eq!(
        find_closest_runtime(&installed, "16.0").unwrap().version,
        "17.5"
    );
    assert!(find_closest_runtime(&[], "18.0").is_none());

    // Whatever is picked is always one of the installed runtimes
    for preferred in ["1.0", "17.5", "17.6", "99"] {
        let picked = find_closest_runtime(&installed, preferred).unwrap();
        assert!(installed.contains(picked));
    }
}

// ─────────────────────────────────────────────────────────
// Classification and recovery
// ─────────────────────────────────────────────────────────

#[test]
fn test_runtime_not_installed_is_classified_with_version() {
    let raw = "xcodebuild: error: Failed to build\niOS 18.2 is not installed. Please download it in Xcode > Settings > Components.";
    assert_eq!(
        classify(raw),
        FailureKind::RuntimeMismatch {
            requested_version: "18.2".to_string()
        }
    );
}

#[tokio::test]
async fn test_signing_escalation_is_bounded() {
    let dir = TempDir::new().unwrap();
    let runner = FakeRunner::new();
    runner.respond_err(
        "xcodebuild",
        &["-project"],
        65,
        "error: No signing certificate \"iOS Development\" found",
    );
    let operator = CountingOperator::default();
    let orchestrator = BuildOrchestrator::new(
        runner.clone(),
        create_project(&dir),
        FixedSigning(Some(identity())),
        operator.clone(),
    );
    let ctx = BuildContext {
        project: dir.path().join("Demo.xcodeproj"),
        scheme: "Demo".to_string(),
        configuration: "Debug".to_string(),
        destination: Destination::GenericDevice,
    };

    let err = orchestrator.build(&ctx).await.unwrap_err();

    assert!(err.is_operator_actionable());
    assert_eq!(operator.0.load(Ordering::SeqCst), 1);
    assert_eq!(runner.count("xcodebuild", &["-project"]), 2);
}

// ─────────────────────────────────────────────────────────
// Throttling
// ─────────────────────────────────────────────────────────

#[test]
fn test_asset_writes_throttled_to_one_dispatch_per_window() {
    let dir = TempDir::new().unwrap();
    let resources = dir.path().join("Resources");
    std::fs::create_dir_all(&resources).unwrap();
    std::fs::write(resources.join("logo.png"), "png").unwrap();

    let mut dispatcher = Dispatcher::new(&WatcherConfig::new().with_throttle_ms(500));
    let t0 = Instant::now();
    let write = || vec![resources.join("logo.png")];

    let dispatched: Vec<_> = [0u64, 200, 900]
        .into_iter()
        .filter_map(|ms| dispatcher.on_batch(write(), t0 + Duration::from_millis(ms)))
        .collect();

    assert_eq!(dispatched.len(), 2);
    assert!(dispatched.iter().all(|e| e.class == ChangeClass::Asset));
}

// ─────────────────────────────────────────────────────────
// Trust
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_untrusted_device_halts_before_install() {
    let dir = TempDir::new().unwrap();
    let descriptor = create_project(&dir);
    create_bundle(&dir, DeviceKind::Physical);

    let runner = FakeRunner::new();
    runner
        .respond_ok("devicectl", &["list", "devices"], DEVICE_TABLE)
        .respond_ok("xcodebuild", &["-project"], "** BUILD SUCCEEDED **")
        .respond_err(
            "devicectl",
            &["device", "info"],
            1,
            "ERROR: The device is not paired with this host.",
        )
        .respond_ok("devicectl", &["device", "install"], "");

    let devices = DeviceManager::with_backends(
        SimulatorBackend::new(runner.clone()),
        Some(PhysicalBackend::new(runner.clone(), "devicectl")),
    );
    let events = EventSink::new();
    let mut rx = events.subscribe();
    let flow = RunFlow::new(
        Settings::default(),
        devices,
        BuildOrchestrator::new(
            runner.clone(),
            descriptor,
            FixedSigning(Some(identity())),
            NonInteractive,
        ),
        Arc::new(OpenGate),
        events,
    );
    let (_tx, shutdown) = watch::channel(false);

    let err = flow
        .run(
            &RunOptions {
                device: Some("Zac's iPhone".to_string()),
                ..Default::default()
            },
            shutdown,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::DeviceNotTrusted { .. }));
    assert!(err.is_operator_actionable());
    assert_eq!(runner.count("devicectl", &["device", "install"]), 0);
    assert_eq!(runner.count("devicectl", &["device", "process"]), 0);

    let mut saw_trust_event = false;
    while let Ok(event) = rx.try_recv() {
        if let RunEvent::TrustRequired { device } = event {
            assert_eq!(device.id, "7A1B2C3D-1111-2222-3333-444455556666");
            saw_trust_event = true;
        }
    }
    assert!(saw_trust_event);
}

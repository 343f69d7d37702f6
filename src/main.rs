//! brx - Build, run and live-reload iOS apps
//!
//! This is the binary entry point. All logic lives in the workspace crates.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use brx_app::{
    load_settings, signals, BuildOptions, BuildOrchestrator, EventSink, KeychainSigning,
    NonInteractive, OpenGate, Operator, RunEvent, RunFlow, RunOptions, Settings,
    TerminalOperator,
};
use brx_core::prelude::*;
use brx_core::{DeviceKind, ProjectDescriptor};
use brx_device::{group_simulators_by_runtime, DeviceManager, SystemRunner, ToolAvailability};
use clap::{Parser, Subcommand};
use color_eyre::{Section, SectionExt};

const RENDER_DRAIN: Duration = Duration::from_millis(500);

/// brx - Build, run and live-reload iOS apps on simulators and devices
#[derive(Parser, Debug)]
#[command(name = "brx")]
#[command(about = "Build, run and live-reload iOS apps", long_about = None)]
struct Args {
    /// Path to the project (directory containing brx.yml)
    #[arg(long, global = true, value_name = "PATH")]
    path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build, install and launch, then live-reload on changes
    Run {
        /// Device name (simulator or connected device)
        #[arg(long, short)]
        device: Option<String>,

        /// Only consider simulators when resolving the device name
        #[arg(long, conflicts_with = "realsim")]
        simulator: bool,

        /// Use the first connected physical device
        #[arg(long)]
        realsim: bool,

        /// Build configuration (defaults to the configured one)
        #[arg(long, short)]
        configuration: Option<String>,

        /// Exit after launch instead of watching for changes
        #[arg(long)]
        no_watch: bool,

        /// Never prompt; fail with instructions instead
        #[arg(long)]
        non_interactive: bool,
    },

    /// Build the app without deploying it
    Build {
        #[arg(long, short)]
        configuration: Option<String>,

        /// Build for physical devices
        #[arg(long)]
        realsim: bool,

        #[arg(long)]
        non_interactive: bool,
    },

    /// List connected devices and available simulators
    Devices,
}

/// Operator chosen at startup
enum CliOperator {
    Terminal(TerminalOperator<SystemRunner>),
    Unattended(NonInteractive),
}

impl Operator for CliOperator {
    async fn confirm_signing_setup(&self, project: &Path) -> Result<()> {
        match self {
            CliOperator::Terminal(op) => op.confirm_signing_setup(project).await,
            CliOperator::Unattended(op) => op.confirm_signing_setup(project).await,
        }
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    if let Err(e) = brx_core::logging::init() {
        eprintln!("Warning: file logging unavailable: {e}");
    }

    run(args).await.map_err(report)
}

async fn run(args: Args) -> Result<()> {
    let base_path = args
        .path
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let project_root = dunce::canonicalize(&base_path).unwrap_or(base_path);

    let tools = ToolAvailability::check();

    match args.command {
        Command::Devices => list_devices(&tools).await,
        Command::Build {
            configuration,
            realsim,
            non_interactive,
        } => {
            let (flow, renderer) = setup(&project_root, &tools, non_interactive)?;
            let result = flow
                .build(&BuildOptions {
                    configuration,
                    physical: realsim,
                })
                .await;
            finish(flow, renderer).await;
            let app = result?;
            println!("📦 {}", app.display());
            Ok(())
        }
        Command::Run {
            device,
            simulator,
            realsim,
            configuration,
            no_watch,
            non_interactive,
        } => {
            let (flow, renderer) = setup(&project_root, &tools, non_interactive)?;
            let options = RunOptions {
                device,
                kind: simulator.then_some(DeviceKind::Simulated),
                first_physical: realsim,
                configuration,
                watch: !no_watch,
            };
            let result = flow.run(&options, signals::shutdown_signal()).await;
            finish(flow, renderer).await;
            result.map(|_| ())
        }
    }
}

/// Let the renderer print what is still queued
async fn finish(flow: CliFlow, renderer: tokio::task::JoinHandle<()>) {
    drop(flow);
    let _ = tokio::time::timeout(RENDER_DRAIN, renderer).await;
}

type CliFlow = RunFlow<SystemRunner, KeychainSigning<SystemRunner>, CliOperator>;

/// Wire the run flow for the project and start rendering its events
fn setup(
    project_root: &Path,
    tools: &ToolAvailability,
    non_interactive: bool,
) -> Result<(CliFlow, tokio::task::JoinHandle<()>)> {
    if let Some(message) = tools.ios_unavailable_message() {
        warn!("{}", message);
    }
    tools.require("xcodebuild")?;
    tools.require("xcrun")?;

    let descriptor = ProjectDescriptor::load(project_root)?;
    let settings: Settings = load_settings(project_root);
    info!("Project: {} ({})", descriptor.name, descriptor.bundle_id);

    let runner = SystemRunner;
    let interactive =
        settings.build.interactive_signing && !non_interactive && std::io::stdin().is_terminal();
    let operator = if interactive {
        CliOperator::Terminal(TerminalOperator::new(runner.clone()))
    } else {
        CliOperator::Unattended(NonInteractive)
    };

    let events = EventSink::new();
    let renderer = tokio::spawn(render_events(events.subscribe()));

    let orchestrator = BuildOrchestrator::new(
        runner.clone(),
        descriptor,
        KeychainSigning::new(runner.clone()),
        operator,
    );
    let flow = RunFlow::new(
        settings,
        DeviceManager::new(runner, tools),
        orchestrator,
        Arc::new(OpenGate),
        events,
    );
    Ok((flow, renderer))
}

/// Print run events until every sender is gone
async fn render_events(mut rx: tokio::sync::broadcast::Receiver<RunEvent>) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(n)) => {
                debug!("Renderer skipped {} events", n);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match event {
            RunEvent::Step { icon, message } => eprintln!("{icon} {message}"),
            RunEvent::Success { message } => eprintln!("✅ {message}"),
            RunEvent::Warning { message } => eprintln!("⚠️  {message}"),
            RunEvent::TrustRequired { device } => {
                eprintln!("🔒 {} has not trusted this computer", device.name)
            }
            RunEvent::Watching { paths } => {
                let paths: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
                eprintln!("👀 Watching {} (Ctrl+C to stop)", paths.join(", "));
            }
            RunEvent::ReloadCompleted { class, elapsed } => {
                eprintln!("{}", RunEvent::reload_summary(class, elapsed))
            }
            RunEvent::ReloadFailed { reason } => eprintln!("❌ Reload failed: {reason}"),
            RunEvent::Shutdown => eprintln!("👋 Stopped"),
        }
    }
}

async fn list_devices(tools: &ToolAvailability) -> Result<()> {
    if let Some(message) = tools.ios_unavailable_message() {
        eprintln!("❌ {message}");
        return Ok(());
    }

    let manager = DeviceManager::new(SystemRunner, tools);
    let listing = manager.list().await?;

    match &listing.physical {
        Some(devices) if devices.is_empty() => println!("📱 No connected devices"),
        Some(devices) => {
            println!("📱 Connected devices");
            for device in devices {
                let state = device.state.as_deref().unwrap_or("unknown");
                println!("   {}  {}  ({})", device.name, device.identifier, state);
            }
        }
        None => {
            if let Some(message) = tools.physical_unavailable_message() {
                println!("📱 {message}");
            }
        }
    }

    println!();
    println!("🖥  Simulators");
    for (runtime, simulators) in group_simulators_by_runtime(&listing.simulators) {
        println!("   {runtime}");
        for sim in simulators {
            println!("     {}  {}  ({:?})", sim.name, sim.udid, sim.state);
        }
    }
    Ok(())
}

/// Attach build output and remediation to the error before color-eyre
/// renders it
fn report(error: Error) -> color_eyre::Report {
    error!("{}", error);

    let diagnostic = match &error {
        Error::BuildFailed { diagnostic, .. } if !diagnostic.trim().is_empty() => {
            Some(diagnostic.clone())
        }
        _ => None,
    };
    let remediation = error.remediation();

    let mut report = color_eyre::Report::new(error);
    if let Some(diagnostic) = diagnostic {
        report = report.section(diagnostic.header("Build output:"));
    }
    if let Some(remediation) = remediation {
        report = report.suggestion(remediation);
    }
    report
}

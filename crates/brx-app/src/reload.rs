//! Reload handling
//!
//! [`ReloadQueue`] hands dispatched changes to a [`ReloadHandler`] on a
//! single worker task, so one reload's install/launch never overlaps
//! another's. [`DeviceReloader`] is the handler used by `brx run`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use brx_core::prelude::*;
use brx_core::{BuildContext, ChangeClass, ChangeEvent, Device};
use brx_device::{CommandRunner, DeviceManager};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::events::{EventSink, RunEvent};
use crate::operator::Operator;
use crate::orchestrator::BuildOrchestrator;
use crate::signing::SigningLookup;

/// Changes waiting while a reload runs
const QUEUE_CAPACITY: usize = 8;

/// Outcome of one handled change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadReport {
    pub class: ChangeClass,
    pub elapsed: Duration,
}

impl ReloadReport {
    pub fn summary(&self) -> String {
        RunEvent::reload_summary(self.class, self.elapsed)
    }
}

/// Performs the reload for a classified change
#[trait_variant::make(ReloadHandler: Send)]
pub trait LocalReloadHandler {
    async fn handle(&self, event: ChangeEvent) -> Result<ReloadReport>;
}

/// Single-worker queue in front of a [`ReloadHandler`]
pub struct ReloadQueue {
    tx: mpsc::Sender<ChangeEvent>,
    worker: JoinHandle<()>,
}

impl ReloadQueue {
    pub fn spawn<H>(handler: H) -> Self
    where
        H: ReloadHandler + Sync + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<ChangeEvent>(QUEUE_CAPACITY);
        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let class = event.class;
                match handler.handle(event).await {
                    Ok(report) => debug!("{}", report.summary()),
                    Err(e) => warn!("Reload of {} change failed: {}", class, e),
                }
            }
            trace!("Reload worker finished");
        });
        Self { tx, worker }
    }

    /// Enqueue without waiting; a full queue drops the change
    pub fn submit(&self, event: ChangeEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!("Reload queue full; dropping {} change", event.class);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Stop accepting changes and wait for queued ones to finish
    pub async fn close(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            warn!("Reload worker ended abnormally: {}", e);
        }
    }

    /// Stop immediately, abandoning queued and in-flight reloads
    pub fn abort(self) {
        self.worker.abort();
    }
}

/// Reloads the running app on one device
pub struct DeviceReloader<R, S, O> {
    orchestrator: Arc<BuildOrchestrator<R, S, O>>,
    devices: Arc<DeviceManager<R>>,
    device: Device,
    context: BuildContext,
    bundle_id: String,
    /// Bundle produced by the most recent build
    app: Mutex<PathBuf>,
    events: EventSink,
}

impl<R, S, O> DeviceReloader<R, S, O>
where
    R: CommandRunner + Clone + Sync,
    S: SigningLookup + Sync,
    O: Operator + Sync,
{
    pub fn new(
        orchestrator: Arc<BuildOrchestrator<R, S, O>>,
        devices: Arc<DeviceManager<R>>,
        device: Device,
        context: BuildContext,
        app: PathBuf,
        events: EventSink,
    ) -> Self {
        let bundle_id = orchestrator.descriptor().bundle_id.clone();
        Self {
            orchestrator,
            devices,
            device,
            context,
            bundle_id,
            app: Mutex::new(app),
            events,
        }
    }

    pub async fn last_app(&self) -> PathBuf {
        self.app.lock().await.clone()
    }

    /// Reinstall the last bundle and relaunch
    async fn reload_assets(&self) -> Result<()> {
        let app = self.last_app().await;
        self.relaunch(&app).await
    }

    /// Regenerate when the project is generated, rebuild, reinstall, relaunch
    async fn reload_code(&self) -> Result<()> {
        let generator = self.orchestrator.generator();
        if generator.regenerates_on_change() {
            generator.regenerate().await?;
        }

        let app = self.orchestrator.build(&self.context).await?;
        *self.app.lock().await = app.clone();
        self.relaunch(&app).await
    }

    async fn relaunch(&self, app: &Path) -> Result<()> {
        if let Err(e) = self.devices.terminate(&self.bundle_id, &self.device).await {
            debug!("Terminate before relaunch failed: {}", e);
        }
        self.devices.install(app, &self.device).await?;
        self.devices.launch(&self.bundle_id, &self.device).await?;
        Ok(())
    }
}

impl<R, S, O> ReloadHandler for DeviceReloader<R, S, O>
where
    R: CommandRunner + Clone + Sync,
    S: SigningLookup + Sync,
    O: Operator + Sync,
{
    async fn handle(&self, event: ChangeEvent) -> Result<ReloadReport> {
        let started = Instant::now();
        info!(
            "{} change in {} path(s), reloading on {}",
            event.class,
            event.paths.len(),
            self.device.name
        );

        let outcome = match event.class {
            ChangeClass::Asset => self.reload_assets().await,
            ChangeClass::Code => self.reload_code().await,
        };

        match outcome {
            Ok(()) => {
                let report = ReloadReport {
                    class: event.class,
                    elapsed: started.elapsed(),
                };
                self.events.emit(RunEvent::ReloadCompleted {
                    class: report.class,
                    elapsed: report.elapsed,
                });
                Ok(report)
            }
            Err(e) => {
                self.events.emit(RunEvent::ReloadFailed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }
}

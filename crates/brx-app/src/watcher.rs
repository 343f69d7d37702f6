//! File watching for live reload
//!
//! Watches the project's source and resource directories, throttles bursts
//! to one dispatch per window and classifies each dispatch as an asset or a
//! code change. Dispatched changes go to a [`ReloadQueue`], which runs the
//! reload handler one change at a time.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use brx_core::prelude::*;
use brx_core::{ChangeClass, ChangeEvent};
use notify::RecursiveMode;
use notify_debouncer_full::{new_debouncer, DebounceEventResult};
use tokio::sync::{mpsc, oneshot, watch};

use crate::reload::{ReloadHandler, ReloadQueue};
use crate::settings::WatcherSettings;

/// Default throttle window in milliseconds
pub const DEFAULT_THROTTLE_MS: u64 = 500;

/// Coalescing delay of the underlying debouncer, well below the throttle
pub const DEFAULT_DEBOUNCE_MS: u64 = 100;

/// Default paths to watch (relative to project root)
pub const DEFAULT_WATCH_PATHS: &[&str] = &["Sources", "Resources"];

/// Extensions that need a compile step
pub const CODE_EXTENSIONS: &[&str] = &["swift", "m", "mm", "h"];

const RAW_EVENT_CAPACITY: usize = 64;

/// Configuration for the live reload watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Absolute directories to watch
    pub paths: Vec<PathBuf>,
    /// Minimum time between two dispatches
    pub throttle: Duration,
    /// Debounce duration of the filesystem watcher
    pub debounce: Duration,
    /// Extensions classified as code
    pub code_extensions: Vec<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            paths: DEFAULT_WATCH_PATHS.iter().map(PathBuf::from).collect(),
            throttle: Duration::from_millis(DEFAULT_THROTTLE_MS),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            code_extensions: CODE_EXTENSIONS.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

impl WatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Config for a project root from `[watcher]` settings
    pub fn from_settings(project_root: &Path, settings: &WatcherSettings) -> Self {
        Self::default()
            .with_paths(
                settings
                    .paths
                    .iter()
                    .map(|p| project_root.join(p))
                    .collect(),
            )
            .with_throttle_ms(settings.throttle_ms)
            .with_code_extensions(settings.code_extensions.clone())
    }

    pub fn with_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.paths = paths;
        self
    }

    pub fn with_throttle_ms(mut self, ms: u64) -> Self {
        self.throttle = Duration::from_millis(ms);
        self
    }

    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.debounce = Duration::from_millis(ms);
        self
    }

    pub fn with_code_extensions(mut self, extensions: Vec<String>) -> Self {
        self.code_extensions = extensions;
        self
    }

    /// Configured paths that exist on disk
    pub fn existing_paths(&self) -> Vec<PathBuf> {
        self.paths.iter().filter(|p| p.is_dir()).cloned().collect()
    }
}

/// Window gate: admits at most one trigger per window
#[derive(Debug, Clone)]
pub struct Throttle {
    window: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether a trigger at `now` may dispatch. Admitted triggers restart the
    /// window; dropped ones do not.
    pub fn admit(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.window => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

fn has_code_extension(path: &Path, code_extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| code_extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}

/// Classify a burst of changed paths.
///
/// `Code` when a changed path has a code extension or its directory
/// currently holds code files; `Asset` otherwise.
pub fn classify_burst(paths: &[PathBuf], code_extensions: &[String]) -> ChangeClass {
    paths
        .iter()
        .map(|path| classify_path(path, code_extensions))
        .fold(ChangeClass::Asset, ChangeClass::merge)
}

fn classify_path(path: &Path, code_extensions: &[String]) -> ChangeClass {
    if has_code_extension(path, code_extensions)
        || path
            .parent()
            .is_some_and(|dir| dir_has_code(dir, code_extensions))
    {
        ChangeClass::Code
    } else {
        ChangeClass::Asset
    }
}

fn dir_has_code(dir: &Path, code_extensions: &[String]) -> bool {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .any(|e| has_code_extension(&e.path(), code_extensions))
        })
        .unwrap_or(false)
}

/// Editor droppings and Finder metadata
fn is_noise(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') || n.ends_with('~'))
}

/// Turns raw change batches into throttled, classified dispatches
#[derive(Debug)]
pub struct Dispatcher {
    throttle: Throttle,
    code_extensions: Vec<String>,
}

impl Dispatcher {
    pub fn new(config: &WatcherConfig) -> Self {
        Self {
            throttle: Throttle::new(config.throttle),
            code_extensions: config.code_extensions.clone(),
        }
    }

    /// Handle a batch observed at `now`; `None` when throttled or empty
    pub fn on_batch(&mut self, paths: Vec<PathBuf>, now: Instant) -> Option<ChangeEvent> {
        let paths: BTreeSet<PathBuf> = paths.into_iter().filter(|p| !is_noise(p)).collect();
        if paths.is_empty() {
            return None;
        }
        if !self.throttle.admit(now) {
            trace!("Throttled {} change(s)", paths.len());
            return None;
        }

        let list: Vec<PathBuf> = paths.iter().cloned().collect();
        let class = classify_burst(&list, &self.code_extensions);
        debug!("Dispatching {} change: {} path(s)", class, paths.len());
        Some(ChangeEvent { paths, class })
    }
}

/// Live reload engine: watcher thread, dispatcher task and reload queue
pub struct LiveReload {
    config: WatcherConfig,
    /// Handle to stop the watcher thread
    stop_tx: Option<oneshot::Sender<()>>,
}

impl LiveReload {
    pub fn new(config: WatcherConfig) -> Self {
        Self {
            config,
            stop_tx: None,
        }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Start watching. Dispatched changes run through `handler` one at a
    /// time until `shutdown` flips or [`LiveReload::stop`] is called.
    ///
    /// Returns the directories actually watched.
    pub fn start<H>(&mut self, handler: H, shutdown: watch::Receiver<bool>) -> Result<Vec<PathBuf>>
    where
        H: ReloadHandler + Sync + 'static,
    {
        if self.is_running() {
            return Err(Error::watcher("Watcher is already running"));
        }

        let paths = self.config.existing_paths();
        if paths.is_empty() {
            return Err(Error::watcher(format!(
                "None of the watch paths exist: {}",
                self.config
                    .paths
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        let (raw_tx, raw_rx) = mpsc::channel(RAW_EVENT_CAPACITY);
        let (stop_tx, stop_rx) = oneshot::channel();
        self.stop_tx = Some(stop_tx);

        let config = self.config.clone();
        let watched = paths.clone();
        tokio::task::spawn_blocking(move || run_watcher(watched, config.debounce, raw_tx, stop_rx));

        let queue = ReloadQueue::spawn(handler);
        let dispatcher = Dispatcher::new(&self.config);
        tokio::spawn(dispatch_loop(dispatcher, raw_rx, queue, shutdown));

        Ok(paths)
    }

    /// Stop the watcher thread; the dispatcher exits once its input closes
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    pub fn is_running(&self) -> bool {
        self.stop_tx.is_some()
    }
}

impl Drop for LiveReload {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn dispatch_loop(
    mut dispatcher: Dispatcher,
    mut raw_rx: mpsc::Receiver<Vec<PathBuf>>,
    queue: ReloadQueue,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            batch = raw_rx.recv() => {
                let Some(paths) = batch else {
                    debug!("Watcher closed; draining reload queue");
                    queue.close().await;
                    return;
                };
                if let Some(event) = dispatcher.on_batch(paths, Instant::now()) {
                    queue.submit(event);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Shutdown requested; abandoning pending reloads");
                    queue.abort();
                    return;
                }
            }
        }
    }
}

/// Blocking body of the watcher thread
fn run_watcher(
    paths: Vec<PathBuf>,
    debounce: Duration,
    raw_tx: mpsc::Sender<Vec<PathBuf>>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let tx = raw_tx.clone();
    let debouncer_result =
        new_debouncer(
            debounce,
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    let changed: Vec<PathBuf> = events
                        .iter()
                        .filter(|event| !event.kind.is_access())
                        .flat_map(|event| event.paths.iter().cloned())
                        .collect();
                    if !changed.is_empty() {
                        trace!("Watcher saw {} path(s)", changed.len());
                        let _ = tx.blocking_send(changed);
                    }
                }
                Err(errors) => {
                    for error in errors {
                        warn!("File watcher error: {:?}", error);
                    }
                }
            },
        );

    let mut debouncer = match debouncer_result {
        Ok(d) => d,
        Err(e) => {
            error!("Failed to create file watcher: {}", e);
            return;
        }
    };

    // Top-level directories only; nested and symlinked trees are not followed
    for path in &paths {
        if let Err(e) = debouncer.watch(path, RecursiveMode::NonRecursive) {
            warn!("Failed to watch {}: {}", path.display(), e);
        } else {
            info!("Watching: {}", path.display());
        }
    }

    loop {
        match stop_rx.try_recv() {
            Ok(()) | Err(oneshot::error::TryRecvError::Closed) => {
                info!("File watcher stopping");
                break;
            }
            Err(oneshot::error::TryRecvError::Empty) => {
                if raw_tx.is_closed() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reload::ReloadReport;
    use tempfile::TempDir;

    struct NoopHandler;

    impl ReloadHandler for NoopHandler {
        async fn handle(&self, event: ChangeEvent) -> Result<ReloadReport> {
            Ok(ReloadReport {
                class: event.class,
                elapsed: Duration::ZERO,
            })
        }
    }

    fn exts() -> Vec<String> {
        CODE_EXTENSIONS.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_watcher_config_default() {
        let config = WatcherConfig::default();
        assert_eq!(config.throttle, Duration::from_millis(500));
        assert_eq!(
            config.paths,
            vec![PathBuf::from("Sources"), PathBuf::from("Resources")]
        );
        assert!(config.code_extensions.contains(&"swift".to_string()));
    }

    #[test]
    fn test_config_from_settings_joins_root() {
        let settings = WatcherSettings {
            paths: vec!["App".to_string()],
            throttle_ms: 250,
            code_extensions: vec!["swift".to_string()],
        };
        let config = WatcherConfig::from_settings(Path::new("/proj"), &settings);
        assert_eq!(config.paths, vec![PathBuf::from("/proj/App")]);
        assert_eq!(config.throttle, Duration::from_millis(250));
        assert_eq!(config.code_extensions, vec!["swift".to_string()]);
    }

    #[test]
    fn test_throttle_window() {
        let mut throttle = Throttle::new(Duration::from_millis(500));
        let t0 = Instant::now();
        assert!(throttle.admit(t0));
        assert!(!throttle.admit(t0 + Duration::from_millis(200)));
        assert!(!throttle.admit(t0 + Duration::from_millis(499)));
        assert!(throttle.admit(t0 + Duration::from_millis(900)));
        // Window restarts from the last admitted trigger
        assert!(!throttle.admit(t0 + Duration::from_millis(1_300)));
        assert!(throttle.admit(t0 + Duration::from_millis(1_400)));
    }

    #[test]
    fn test_classify_by_extension() {
        assert_eq!(
            classify_burst(&[PathBuf::from("/nope/View.swift")], &exts()),
            ChangeClass::Code
        );
        assert_eq!(
            classify_burst(&[PathBuf::from("/nope/Bridge.H")], &exts()),
            ChangeClass::Code
        );
        assert_eq!(
            classify_burst(&[PathBuf::from("/nope/logo.png")], &exts()),
            ChangeClass::Asset
        );
        assert_eq!(classify_burst(&[], &exts()), ChangeClass::Asset);
    }

    #[test]
    fn test_mixed_burst_is_code() {
        let burst = [
            PathBuf::from("/nope/logo.png"),
            PathBuf::from("/nope/View.swift"),
            PathBuf::from("/nope/icon.pdf"),
        ];
        assert_eq!(classify_burst(&burst, &exts()), ChangeClass::Code);
    }

    #[test]
    fn test_classify_by_directory_contents() {
        let dir = TempDir::new().unwrap();
        let sources = dir.path().join("Sources");
        let resources = dir.path().join("Resources");
        std::fs::create_dir_all(&sources).unwrap();
        std::fs::create_dir_all(&resources).unwrap();
        std::fs::write(sources.join("App.swift"), "").unwrap();
        std::fs::write(sources.join("Info.plist"), "").unwrap();
        std::fs::write(resources.join("logo.png"), "").unwrap();

        assert_eq!(
            classify_burst(&[sources.join("Info.plist")], &exts()),
            ChangeClass::Code
        );
        assert_eq!(
            classify_burst(&[resources.join("logo.png")], &exts()),
            ChangeClass::Asset
        );
    }

    #[test]
    fn test_dispatcher_throttles_and_classifies() {
        let mut dispatcher = Dispatcher::new(&WatcherConfig::default());
        let t0 = Instant::now();

        let first = dispatcher
            .on_batch(vec![PathBuf::from("/nope/a.png")], t0)
            .unwrap();
        assert_eq!(first.class, ChangeClass::Asset);

        assert!(dispatcher
            .on_batch(
                vec![PathBuf::from("/nope/b.swift")],
                t0 + Duration::from_millis(200)
            )
            .is_none());

        let second = dispatcher
            .on_batch(
                vec![PathBuf::from("/nope/b.swift")],
                t0 + Duration::from_millis(900),
            )
            .unwrap();
        assert_eq!(second.class, ChangeClass::Code);
    }

    #[test]
    fn test_dispatcher_ignores_noise_without_consuming_window() {
        let mut dispatcher = Dispatcher::new(&WatcherConfig::default());
        let t0 = Instant::now();
        assert!(dispatcher
            .on_batch(vec![PathBuf::from("/nope/.DS_Store")], t0)
            .is_none());
        assert!(dispatcher
            .on_batch(
                vec![PathBuf::from("/nope/a.png")],
                t0 + Duration::from_millis(10)
            )
            .is_some());
    }

    #[tokio::test]
    async fn test_start_requires_existing_paths() {
        let dir = TempDir::new().unwrap();
        let config = WatcherConfig::new().with_paths(vec![dir.path().join("missing")]);
        let mut reload = LiveReload::new(config);
        let (_tx, rx) = watch::channel(false);

        let err = reload.start(NoopHandler, rx).unwrap_err();
        assert!(matches!(err, Error::Watcher { .. }));
        assert!(!reload.is_running());
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let dir = TempDir::new().unwrap();
        let mut reload =
            LiveReload::new(WatcherConfig::new().with_paths(vec![dir.path().to_path_buf()]));
        let (_tx, rx) = watch::channel(false);

        let watched = reload.start(NoopHandler, rx.clone()).unwrap();
        assert_eq!(watched, vec![dir.path().to_path_buf()]);
        assert!(reload.is_running());
        assert!(reload.start(NoopHandler, rx).is_err());

        reload.stop();
        assert!(!reload.is_running());
    }
}

//! Live reload against the real filesystem watcher

use std::time::Duration;

use brx_app::{LiveReload, ReloadHandler, ReloadReport, WatcherConfig};
use brx_core::{ChangeClass, ChangeEvent, Result};
use serial_test::serial;
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};

/// Forwards every handled change to the test
struct Forward(mpsc::UnboundedSender<ChangeEvent>);

impl ReloadHandler for Forward {
    async fn handle(&self, event: ChangeEvent) -> Result<ReloadReport> {
        let class = event.class;
        let _ = self.0.send(event);
        Ok(ReloadReport {
            class,
            elapsed: Duration::ZERO,
        })
    }
}

fn project_dirs() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("Sources")).unwrap();
    std::fs::create_dir_all(dir.path().join("Resources")).unwrap();
    std::fs::write(dir.path().join("Sources/App.swift"), "import SwiftUI\n").unwrap();
    dir
}

fn config(dir: &TempDir) -> WatcherConfig {
    WatcherConfig::new()
        .with_paths(vec![
            dir.path().join("Sources"),
            dir.path().join("Resources"),
        ])
        .with_throttle_ms(300)
        .with_debounce_ms(50)
}

async fn next_change(rx: &mut mpsc::UnboundedReceiver<ChangeEvent>) -> Option<ChangeEvent> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .ok()
        .flatten()
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn test_file_changes_are_classified_and_delivered() {
    let dir = project_dirs();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (_shutdown_tx, shutdown) = watch::channel(false);

    let mut live = LiveReload::new(config(&dir));
    let watched = live.start(Forward(tx), shutdown).unwrap();
    assert_eq!(watched.len(), 2);
    tokio::time::sleep(Duration::from_millis(300)).await;

    std::fs::write(dir.path().join("Resources/logo.png"), "png").unwrap();
    let asset = next_change(&mut rx)
        .await
        .expect("asset change not delivered");
    assert_eq!(asset.class, ChangeClass::Asset);

    tokio::time::sleep(Duration::from_millis(400)).await;
    std::fs::write(dir.path().join("Sources/View.swift"), "struct V {}\n").unwrap();
    let code = loop {
        let change = next_change(&mut rx)
            .await
            .expect("code change not delivered");
        if change.class == ChangeClass::Code {
            break change;
        }
    };
    assert!(code.paths.iter().any(|p| p.ends_with("View.swift")));

    live.stop();
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn test_shutdown_stops_dispatch() {
    let dir = project_dirs();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown) = watch::channel(false);

    let mut live = LiveReload::new(config(&dir));
    live.start(Forward(tx), shutdown).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    shutdown_tx.send(true).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    std::fs::write(dir.path().join("Resources/late.png"), "png").unwrap();
    let late = tokio::time::timeout(Duration::from_millis(800), rx.recv()).await;
    // Either nothing arrives or the channel closed with the aborted worker
    assert!(!matches!(late, Ok(Some(_))));

    live.stop();
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn test_nested_directories_are_not_watched() {
    let dir = project_dirs();
    let nested = dir.path().join("Resources/Vendor/Assets");
    std::fs::create_dir_all(&nested).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (_shutdown_tx, shutdown) = watch::channel(false);

    let mut live = LiveReload::new(config(&dir));
    live.start(Forward(tx), shutdown).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    std::fs::write(nested.join("deep.png"), "png").unwrap();
    let deep = tokio::time::timeout(Duration::from_millis(800), rx.recv()).await;
    assert!(
        deep.is_err(),
        "change below a watched directory was delivered"
    );

    std::fs::write(dir.path().join("Resources/top.png"), "png").unwrap();
    let top = next_change(&mut rx)
        .await
        .expect("top-level change not delivered");
    assert!(top.paths.iter().any(|p| p.ends_with("top.png")));

    live.stop();
}

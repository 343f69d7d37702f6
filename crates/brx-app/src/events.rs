//! Events emitted during a run for external consumers
//!
//! The binary subscribes and renders them to the terminal; tests subscribe
//! to assert on what the operator would have seen.

use std::path::PathBuf;
use std::time::Duration;

use brx_core::{ChangeClass, Device};
use tokio::sync::broadcast;

/// Default capacity of the event channel
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    // ─────────────────────────────────────────────────────────
    // Progress
    // ─────────────────────────────────────────────────────────
    /// A step of the run flow started
    Step {
        icon: &'static str,
        message: String,
    },

    /// A step finished successfully
    Success {
        message: String,
    },

    /// Something degraded but the run continues
    Warning {
        message: String,
    },

    /// The physical device must trust this computer before install
    TrustRequired {
        device: Device,
    },

    // ─────────────────────────────────────────────────────────
    // Live Reload
    // ─────────────────────────────────────────────────────────
    /// The watcher is observing these directories
    Watching {
        paths: Vec<PathBuf>,
    },

    ReloadCompleted {
        class: ChangeClass,
        elapsed: Duration,
    },

    ReloadFailed {
        reason: String,
    },

    /// The run is ending on operator request
    Shutdown,
}

impl RunEvent {
    /// Short label, used in logs
    pub fn event_type(&self) -> &'static str {
        match self {
            RunEvent::Step { .. } => "step",
            RunEvent::Success { .. } => "success",
            RunEvent::Warning { .. } => "warning",
            RunEvent::TrustRequired { .. } => "trust_required",
            RunEvent::Watching { .. } => "watching",
            RunEvent::ReloadCompleted { .. } => "reload_completed",
            RunEvent::ReloadFailed { .. } => "reload_failed",
            RunEvent::Shutdown => "shutdown",
        }
    }

    /// Operator-facing line for completed reloads
    ///
    /// Asset reloads report milliseconds, code reloads seconds.
    pub fn reload_summary(class: ChangeClass, elapsed: Duration) -> String {
        match class {
            ChangeClass::Asset => format!(
                "Δ assets → fast install & relaunch ({} ms)",
                elapsed.as_millis()
            ),
            ChangeClass::Code => format!(
                "Δ code → incremental build, install, launch ({:.1} s)",
                elapsed.as_secs_f64()
            ),
        }
    }
}

/// Cloneable sender half of the run event bus
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<RunEvent>,
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }

    /// Send an event; having no subscribers is fine
    pub fn emit(&self, event: RunEvent) {
        tracing::trace!("event: {}", event.event_type());
        let _ = self.tx.send(event);
    }

    pub fn step(&self, icon: &'static str, message: impl Into<String>) {
        self.emit(RunEvent::Step {
            icon,
            message: message.into(),
        });
    }

    pub fn success(&self, message: impl Into<String>) {
        self.emit(RunEvent::Success {
            message: message.into(),
        });
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.emit(RunEvent::Warning {
            message: message.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reload_summary_units() {
        assert_eq!(
            RunEvent::reload_summary(ChangeClass::Asset, Duration::from_millis(412)),
            "Δ assets → fast install & relaunch (412 ms)"
        );
        assert_eq!(
            RunEvent::reload_summary(ChangeClass::Code, Duration::from_millis(8_240)),
            "Δ code → incremental build, install, launch (8.2 s)"
        );
    }

    #[test]
    fn test_event_type_labels() {
        assert_eq!(RunEvent::Shutdown.event_type(), "shutdown");
        assert_eq!(
            RunEvent::ReloadFailed {
                reason: "x".to_string()
            }
            .event_type(),
            "reload_failed"
        );
    }

    #[tokio::test]
    async fn test_event_sink_delivers_to_subscribers() {
        let sink = EventSink::new();
        let mut rx = sink.subscribe();

        sink.step("🔨", "Building");
        sink.success("Built");

        assert_eq!(
            rx.recv().await.unwrap(),
            RunEvent::Step {
                icon: "🔨",
                message: "Building".to_string()
            }
        );
        assert!(matches!(rx.recv().await.unwrap(), RunEvent::Success { .. }));
    }

    #[test]
    fn test_emit_without_subscribers() {
        EventSink::new().warning("nobody listening");
    }
}

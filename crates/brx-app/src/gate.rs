//! Usage gate boundary
//!
//! Entitlement checking lives outside brx. The run flow only asks whether an
//! operation is permitted before starting and records usage after success.

use std::fmt;

use brx_core::prelude::*;

/// Operations subject to the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Build,
    Run,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Build => write!(f, "build"),
            Operation::Run => write!(f, "run"),
        }
    }
}

pub trait UsageGate: Send + Sync {
    fn is_permitted(&self, operation: Operation) -> bool;

    /// Called once after a successful attempt
    fn record_usage(&self, operation: Operation);
}

/// Gate that permits everything and records nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenGate;

impl UsageGate for OpenGate {
    fn is_permitted(&self, _operation: Operation) -> bool {
        true
    }

    fn record_usage(&self, _operation: Operation) {}
}

/// `Err(UsageDenied)` unless the gate permits `operation`
pub fn ensure_permitted(gate: &dyn UsageGate, operation: Operation) -> Result<()> {
    if gate.is_permitted(operation) {
        Ok(())
    } else {
        info!("Usage gate denied {}", operation);
        Err(Error::UsageDenied {
            operation: operation.to_string(),
        })
    }
}

//! # brx-core - Core Domain Types
//!
//! Foundation crate for brx. Provides domain types, the error taxonomy,
//! build-failure kinds, logging setup and project descriptor loading.
//!
//! This crate has **zero internal dependencies**.
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`Device`], [`DeviceKind`] - A resolved simulator or physical target
//! - [`Destination`], [`BuildContext`] - Parameters of one build attempt
//! - [`ChangeClass`], [`ChangeEvent`] - Classified file-change bursts
//!
//! ### Failures (`failure`)
//! - [`FailureKind`] - Closed classification of build-tool failures
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error enum with operator-actionable classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//!
//! ### Project (`project`)
//! - [`ProjectDescriptor`] - Parsed `brx.yml`
//!
//! ## Prelude
//!
//! ```rust
//! use brx_core::prelude::*;
//! ```

pub mod error;
pub mod failure;
pub mod logging;
pub mod prelude;
pub mod project;
pub mod types;

pub use error::{Error, Result};
pub use failure::{diagnostic_tail, FailureKind, FailureTag, DIAGNOSTIC_TAIL_LINES};
pub use project::{ProjectDescriptor, DESCRIPTOR_FILENAME, GENERATOR_SPEC_FILENAME};
pub use types::{
    BuildContext, ChangeClass, ChangeEvent, Destination, Device, DeviceKind, LaunchInfo, Platform,
};

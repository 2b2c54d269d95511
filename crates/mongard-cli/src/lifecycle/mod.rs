//! Lifecycle management for the `mongardd` supervisor.
//!
//! This module is split into focused submodules so each concern remains small
//! and testable:
//! - [`types`] defines the user-facing command models and IO helpers.
//! - [`error`] captures the error surface exposed to the CLI.
//! - [`spawning`] handles supervisor process spawning.
//! - [`monitoring`] provides handle record reading and readiness polling.
//! - [`shutdown`] manages supervisor termination and shutdown waiting.
//! - [`controller`] implements the high-level start/stop/status flows.

mod controller;
mod error;
mod monitoring;
mod shutdown;
mod spawning;
mod types;

pub(crate) use controller::SystemLifecycle;
pub(crate) use error::LifecycleError;
pub(crate) use types::{LifecycleCommand, LifecycleContext, LifecycleOutput};

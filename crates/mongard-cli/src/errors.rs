//! Error types for the CLI runtime.

use std::sync::Arc;

use thiserror::Error;

use crate::import::ImportError;
use crate::lifecycle::LifecycleError;
use crate::scripts::ScriptsError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("failed to initialise telemetry: {0}")]
    Telemetry(#[from] mongardd::telemetry::TelemetryError),
    #[error("server lifecycle command failed: {0}")]
    Lifecycle(#[from] LifecycleError),
    #[error("bulk import failed: {0}")]
    Import(#[from] ImportError),
    #[error("script evaluation failed: {0}")]
    Scripts(#[from] ScriptsError),
}

//! Supervisor for an embedded MongoDB server.
//!
//! The `mongardd` process owns the managed `mongod` instance for its whole
//! lifetime: it acquires the singleton process guard, optionally detaches
//! into the background, resolves the effective listening port, launches the
//! server through the engine seam, routes its output, verifies readiness
//! over TCP, publishes the handle record other build steps consume, and
//! supervises the server with a coarse liveness loop until a shutdown
//! signal arrives.
//!
//! The crate doubles as a library: the bulk import driver embeds
//! [`engine::ScopedServer`] to run short-lived foreground servers, and the
//! supervisor's launch sequence accepts injected collaborators so tests can
//! drive it in-process without forking.

pub mod engine;
pub mod net;
pub mod output;
mod process;
pub mod telemetry;

pub use process::{run_daemon, LaunchError, LaunchMode};

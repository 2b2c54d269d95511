use std::env;
use std::process::ExitCode;

use tracing::error;

use mongard_config::Config;
use mongardd::telemetry;

fn main() -> ExitCode {
    let config = match Config::load_from_iter(env::args_os()) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("mongardd: failed to load configuration: {error}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(error) = telemetry::initialise(&config) {
        eprintln!("mongardd: failed to initialise telemetry: {error}");
        return ExitCode::FAILURE;
    }
    match mongardd::run_daemon(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(error = %error, "supervisor failed");
            ExitCode::FAILURE
        }
    }
}

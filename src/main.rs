//! This file defines the signal-resolver binary entry point.

use signal_resolver::app;
use signal_resolver::app_state::{build_registry, AppState};
use signal_resolver::cli;
use signal_resolver::metrics;
use signal_resolver::server;
use signal_resolver::tracing;

use std::process::exit;

/// Application entry point
#[tokio::main]
async fn main() {
    let args = cli::parse();
    tracing::init_tracing();
    ::tracing::info!("{:?}", args);
    metrics::register_metrics();
    let registry = match build_registry(&args) {
        Ok(registry) => registry,
        Err(error) => {
            ::tracing::error!("failed to load signal store: {}", error);
            exit(1)
        }
    };
    let service = app::service_from(AppState::new(&args, registry));
    server::serve(&args, service).await;
}

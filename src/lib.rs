pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod logger;
pub mod manager;
pub mod rate_limit;
pub mod server;
pub mod signals;
pub mod stream;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing/logging
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

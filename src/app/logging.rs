use tracing_subscriber::{EnvFilter, fmt};

use crate::app::AppError;

/// Used when `RUST_LOG` is unset or unparsable.
const DEFAULT_FILTER: &str = "info,actix_server=warn";

pub fn init() -> Result<(), AppError> {
    fmt()
        .with_env_filter(env_filter())
        .with_target(true)
        .with_thread_names(true)
        .try_init()
        .map_err(AppError::logging_init)
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

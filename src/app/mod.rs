pub mod config;
pub mod coordinator;
mod error;
pub mod ledger;
pub mod lifecycle;
mod logging;
mod runtime;
pub mod services;

pub use error::AppError;

pub fn run() -> Result<(), AppError> {
    run_api()
}

pub fn run_api() -> Result<(), AppError> {
    let config = bootstrap()?;
    runtime::run_api(config)
}

pub fn run_reconcile() -> Result<(), AppError> {
    let config = bootstrap()?;
    runtime::run_reconcile(config).map(|_| ())
}

fn bootstrap() -> Result<config::AppConfig, AppError> {
    logging::init()?;

    let config = config::AppConfig::from_env()?;

    tracing::info!(
        db_path = %config.db_path,
        http_bind = %config.http_bind,
        seeded_stations = config.station_seed.len(),
        audit_on_startup = config.audit_on_startup,
        reconcile_repair = config.reconcile_repair,
        cors_allow_origin = config.cors_allow_origin.as_deref().unwrap_or("*"),
        "application bootstrap initialized"
    );

    Ok(config)
}

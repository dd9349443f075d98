use std::sync::{Arc, Mutex};

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};

use crate::adapters::api::{ApiState, SharedCoordinator, configure_routes};
use crate::adapters::db::{open_connection, run_migrations};
use crate::app::coordinator::{CoordinatorError, SessionCoordinator};
use crate::app::config::AppConfig;
use crate::app::error::AppError;
use crate::app::services::SqliteStore;
use crate::domain::models::CapacityAudit;
use crate::domain::session_state::SystemClock;

pub fn run_api(config: AppConfig) -> Result<(), AppError> {
    let coordinator = build_coordinator(&config)?;

    if config.audit_on_startup {
        let audits = coordinator.reconcile_all(false).map_err(AppError::runtime)?;
        log_audit_summary(&audits, false);
    }

    let api_state = ApiState { coordinator };
    let cors_allow_origin = config.cors_allow_origin.clone();

    tracing::info!(bind = %config.http_bind, "http server starting");

    actix_web::rt::System::new()
        .block_on(async move {
            HttpServer::new(move || {
                App::new()
                    .wrap(build_cors(cors_allow_origin.as_deref()))
                    .app_data(web::Data::new(api_state.clone()))
                    .configure(configure_routes)
            })
            .bind(&config.http_bind)?
            .run()
            .await
        })
        .map_err(AppError::runtime)
}

/// One-shot audit of every station, repairing drift when configured to.
pub fn run_reconcile(config: AppConfig) -> Result<Vec<CapacityAudit>, AppError> {
    let coordinator = build_coordinator(&config)?;
    let audits = coordinator
        .reconcile_all(config.reconcile_repair)
        .map_err(AppError::runtime)?;
    log_audit_summary(&audits, config.reconcile_repair);
    Ok(audits)
}

pub fn build_coordinator(config: &AppConfig) -> Result<SharedCoordinator, AppError> {
    let mut connection = open_connection(&config.db_path).map_err(AppError::database_init)?;
    run_migrations(&mut connection).map_err(AppError::database_init)?;

    let store = Arc::new(SqliteStore::new(Arc::new(Mutex::new(connection))));
    let coordinator = SessionCoordinator::new(store, SystemClock);

    for seed in &config.station_seed {
        match coordinator.register_station(&seed.station_id, seed.total_chargers) {
            Ok(_) => {}
            Err(CoordinatorError::StationConflict {
                station_id,
                existing,
                requested,
            }) => tracing::warn!(
                station_id = %station_id,
                existing,
                requested,
                "seeded station already registered with a different charger count; keeping stored value"
            ),
            Err(error) => return Err(AppError::database_init(error)),
        }
    }

    Ok(Arc::new(coordinator))
}

fn build_cors(allow_origin: Option<&str>) -> Cors {
    match allow_origin {
        Some("*") | None => Cors::permissive(),
        Some(origin) => Cors::default()
            .allowed_origin(origin)
            .allow_any_method()
            .allow_any_header()
            .max_age(3600),
    }
}

fn log_audit_summary(audits: &[CapacityAudit], repaired: bool) {
    let drifted = audits.iter().filter(|audit| !audit.is_consistent()).count();

    tracing::info!(
        stations = audits.len(),
        drifted,
        repaired,
        "station capacity audit finished"
    );
}

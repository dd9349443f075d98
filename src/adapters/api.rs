use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse, Responder, get, post, put, web};
use serde::{Deserialize, Serialize};

use crate::app::coordinator::{CoordinatorError, SessionCoordinator};
use crate::app::services::SqliteStore;
use crate::domain::models::{
    EndSession, NewSession, ReconciliationEvent, Session, SessionFilter, StationCapacity,
};
use crate::domain::session_state::{SessionState, SystemClock};

pub const USER_ID_HEADER: &str = "X-User-Id";

pub type SharedCoordinator = Arc<SessionCoordinator<SqliteStore, SystemClock>>;

#[derive(Clone)]
pub struct ApiState {
    pub coordinator: SharedCoordinator,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub id: String,
    pub station_id: String,
    pub owner_id: Option<String>,
    pub vehicle_ref: Option<String>,
    pub start_time: String,
    pub end_time: Option<String>,
    pub duration_minutes: Option<i64>,
    pub battery_start: Option<u8>,
    pub battery_end: Option<u8>,
    pub energy_delivered: Option<f64>,
    pub state: SessionState,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            station_id: session.station_id,
            owner_id: session.owner_id,
            vehicle_ref: session.vehicle_ref,
            start_time: session.started_at.to_iso8601(),
            end_time: session.ended_at.map(|value| value.to_iso8601()),
            duration_minutes: session.duration_minutes,
            battery_start: session.battery_start,
            battery_end: session.battery_end,
            energy_delivered: session.energy_delivered_kwh,
            state: session.state,
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CapacityResponse {
    pub station_id: String,
    pub total_chargers: u32,
    pub available_chargers: u32,
    pub chargers_in_use: u32,
}

impl From<StationCapacity> for CapacityResponse {
    fn from(capacity: StationCapacity) -> Self {
        Self {
            chargers_in_use: capacity.in_use(),
            station_id: capacity.station_id,
            total_chargers: capacity.total_chargers,
            available_chargers: capacity.available_chargers,
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationEventResponse {
    pub id: String,
    pub created_at: String,
    pub station_id: String,
    pub session_id: Option<String>,
    pub kind: String,
    pub message: String,
    pub details_json: Option<String>,
}

impl From<ReconciliationEvent> for ReconciliationEventResponse {
    fn from(event: ReconciliationEvent) -> Self {
        Self {
            id: event.id,
            created_at: event.created_at,
            station_id: event.station_id,
            session_id: event.session_id,
            kind: event.kind.as_str().to_string(),
            message: event.message,
            details_json: event.details_json,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterStationRequest {
    pub total_chargers: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    pub station_id: String,
    pub vehicle_ref: Option<String>,
    pub battery_start: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndSessionRequest {
    pub battery_end: Option<u8>,
    pub energy_delivered: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub station_id: Option<String>,
    pub owner_id: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct DiagnosticsEventQuery {
    pub limit: Option<u32>,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .app_data(query_config())
        .service(health)
        .service(register_station_endpoint)
        .service(station_capacity_endpoint)
        .service(active_session_endpoint)
        .service(start_session_endpoint)
        .service(end_session_endpoint)
        .service(list_sessions_endpoint)
        .service(audit_station_endpoint)
        .service(reconcile_station_endpoint)
        .service(list_reconciliation_events_endpoint);
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|error, _req| {
        let response = invalid_body_response(&error);
        actix_web::error::InternalError::from_response(error, response).into()
    })
}

fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|error, _req| {
        let response = invalid_body_response(&error);
        actix_web::error::InternalError::from_response(error, response).into()
    })
}

fn invalid_body_response(error: &dyn std::fmt::Display) -> HttpResponse {
    error_body(StatusCode::BAD_REQUEST, "invalid_input", error.to_string())
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[put("/stations/{station_id}")]
async fn register_station_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
    body: web::Json<RegisterStationRequest>,
) -> HttpResponse {
    let station_id = path.into_inner();
    let total_chargers = body.total_chargers;

    match run_blocking(&state, move |coordinator| {
        coordinator.register_station(&station_id, total_chargers)
    })
    .await
    {
        Ok(capacity) => HttpResponse::Ok().json(CapacityResponse::from(capacity)),
        Err(response) => response,
    }
}

#[get("/stations/{station_id}/capacity")]
async fn station_capacity_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
) -> HttpResponse {
    let station_id = path.into_inner();

    match run_blocking(&state, move |coordinator| {
        coordinator.station_capacity(&station_id)
    })
    .await
    {
        Ok(capacity) => HttpResponse::Ok().json(CapacityResponse::from(capacity)),
        Err(response) => response,
    }
}

#[get("/stations/{station_id}/active-session")]
async fn active_session_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
) -> HttpResponse {
    let station_id = path.into_inner();

    match run_blocking(&state, move |coordinator| {
        coordinator.get_active_session(&station_id)
    })
    .await
    {
        Ok(Some(session)) => HttpResponse::Ok().json(SessionResponse::from(session)),
        Ok(None) => HttpResponse::NoContent().finish(),
        Err(response) => response,
    }
}

#[post("/sessions")]
async fn start_session_endpoint(
    state: web::Data<ApiState>,
    req: HttpRequest,
    body: web::Json<StartSessionRequest>,
) -> HttpResponse {
    let body = body.into_inner();
    let new_session = NewSession {
        station_id: body.station_id,
        owner_id: requester_identity(&req),
        vehicle_ref: body.vehicle_ref,
        battery_start: body.battery_start,
    };

    match run_blocking(&state, move |coordinator| {
        coordinator.start_session(new_session)
    })
    .await
    {
        Ok(session) => HttpResponse::Created().json(SessionResponse::from(session)),
        Err(response) => response,
    }
}

#[post("/sessions/{session_id}/end")]
async fn end_session_endpoint(
    state: web::Data<ApiState>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Bytes,
) -> HttpResponse {
    let session_id = path.into_inner();
    let body = match parse_end_body(&body) {
        Ok(body) => body,
        Err(response) => return response,
    };
    let end = EndSession {
        battery_end: body.battery_end,
        energy_delivered_kwh: body.energy_delivered,
        requester_id: requester_identity(&req),
    };

    match run_blocking(&state, move |coordinator| {
        coordinator.end_session(&session_id, end)
    })
    .await
    {
        Ok(session) => HttpResponse::Ok().json(SessionResponse::from(session)),
        Err(response) => response,
    }
}

#[get("/sessions")]
async fn list_sessions_endpoint(
    state: web::Data<ApiState>,
    query: web::Query<ListQuery>,
) -> HttpResponse {
    let query = query.into_inner();
    let filter = SessionFilter {
        station_id: query.station_id,
        owner_id: query.owner_id,
        limit: query.limit.unwrap_or(50).clamp(1, 500),
        offset: query.offset.unwrap_or(0),
    };

    match run_blocking(&state, move |coordinator| coordinator.list_sessions(&filter)).await {
        Ok(sessions) => {
            let mapped: Vec<SessionResponse> =
                sessions.into_iter().map(SessionResponse::from).collect();
            HttpResponse::Ok().json(mapped)
        }
        Err(response) => response,
    }
}

#[get("/diagnostics/stations/{station_id}/audit")]
async fn audit_station_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
) -> HttpResponse {
    let station_id = path.into_inner();

    match run_blocking(&state, move |coordinator| coordinator.audit_station(&station_id)).await {
        Ok(audit) => HttpResponse::Ok().json(audit),
        Err(response) => response,
    }
}

#[post("/diagnostics/stations/{station_id}/reconcile")]
async fn reconcile_station_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
) -> HttpResponse {
    let station_id = path.into_inner();

    match run_blocking(&state, move |coordinator| {
        coordinator.reconcile_station(&station_id)
    })
    .await
    {
        Ok(audit) => HttpResponse::Ok().json(audit),
        Err(response) => response,
    }
}

#[get("/diagnostics/reconciliation-events")]
async fn list_reconciliation_events_endpoint(
    state: web::Data<ApiState>,
    query: web::Query<DiagnosticsEventQuery>,
) -> HttpResponse {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);

    match run_blocking(&state, move |coordinator| {
        coordinator.recent_reconciliation_events(limit)
    })
    .await
    {
        Ok(events) => {
            let mapped: Vec<ReconciliationEventResponse> = events
                .into_iter()
                .map(ReconciliationEventResponse::from)
                .collect();
            HttpResponse::Ok().json(mapped)
        }
        Err(response) => response,
    }
}

/// Runs a coordinator call on the blocking pool. The call completes even if
/// the client goes away while it is in flight.
async fn run_blocking<T, F>(state: &ApiState, op: F) -> Result<T, HttpResponse>
where
    T: Send + 'static,
    F: FnOnce(&SessionCoordinator<SqliteStore, SystemClock>) -> Result<T, CoordinatorError>
        + Send
        + 'static,
{
    let coordinator = Arc::clone(&state.coordinator);

    match web::block(move || op(&coordinator)).await {
        Ok(result) => result.map_err(coordinator_error_response),
        Err(error) => {
            tracing::error!(error = %error, "blocking coordinator task failed");
            Err(error_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "request could not be processed".to_string(),
            ))
        }
    }
}

/// An empty body ends the session without metrics; anything else must be a
/// valid end request.
fn parse_end_body(body: &[u8]) -> Result<EndSessionRequest, HttpResponse> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(EndSessionRequest::default());
    }

    serde_json::from_slice(body).map_err(|error| invalid_body_response(&error))
}

fn requester_identity(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

fn coordinator_error_response(error: CoordinatorError) -> HttpResponse {
    let (status, code) = match &error {
        CoordinatorError::CapacityExhausted { .. } => (StatusCode::CONFLICT, "capacity_exhausted"),
        CoordinatorError::StationNotFound { .. } => (StatusCode::NOT_FOUND, "station_not_found"),
        CoordinatorError::StationConflict { .. } => (StatusCode::CONFLICT, "station_conflict"),
        CoordinatorError::SessionNotFound { .. } => (StatusCode::NOT_FOUND, "session_not_found"),
        CoordinatorError::Forbidden { .. } => (StatusCode::FORBIDDEN, "forbidden"),
        CoordinatorError::AlreadyEnded { .. } => (StatusCode::CONFLICT, "already_ended"),
        CoordinatorError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
        CoordinatorError::PersistenceFailure(_) => {
            tracing::error!(error = %error, "coordinator persistence failure");
            (StatusCode::INTERNAL_SERVER_ERROR, "persistence_failure")
        }
    };

    error_body(status, code, error.to_string())
}

fn error_body(status: StatusCode, code: &str, message: String) -> HttpResponse {
    HttpResponse::build(status).json(serde_json::json!({
        "error": code,
        "message": message,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use actix_web::{App, body::to_bytes, http::StatusCode, test, web};

    use crate::app::coordinator::SessionCoordinator;
    use crate::app::services::SqliteStore;
    use crate::domain::session_state::SystemClock;
    use crate::test_support::open_test_connection;

    use super::{ApiState, USER_ID_HEADER, configure_routes};

    fn build_state(name: &str, stations: &[(&str, u32)]) -> ApiState {
        let connection = open_test_connection(name);
        let store = Arc::new(SqliteStore::new(Arc::new(Mutex::new(connection))));
        let coordinator = SessionCoordinator::new(store, SystemClock);
        for (station_id, total) in stations {
            coordinator
                .register_station(station_id, *total)
                .expect("station should register");
        }

        ApiState {
            coordinator: Arc::new(coordinator),
        }
    }

    async fn body_json(resp: actix_web::dev::ServiceResponse) -> serde_json::Value {
        let body = to_bytes(resp.into_body())
            .await
            .expect("body should be readable");
        serde_json::from_slice(&body).expect("body should be json")
    }

    #[actix_web::test]
    async fn health_endpoint_returns_ok() {
        let state = build_state("health", &[]);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn registers_station_and_reports_capacity() {
        let state = build_state("register-api", &[]);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::put()
            .uri("/stations/depot-1")
            .set_json(serde_json::json!({ "totalChargers": 2 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::put()
            .uri("/stations/depot-1")
            .set_json(serde_json::json!({ "totalChargers": 3 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(resp).await["error"], "station_conflict");

        let req = test::TestRequest::get()
            .uri("/stations/depot-1/capacity")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["totalChargers"], 2);
        assert_eq!(json["availableChargers"], 2);
        assert_eq!(json["chargersInUse"], 0);
    }

    #[actix_web::test]
    async fn start_and_end_round_trip_through_http() {
        let state = build_state("lifecycle-api", &[("depot-1", 1)]);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/sessions")
            .insert_header((USER_ID_HEADER, "alice"))
            .set_json(serde_json::json!({ "stationId": "depot-1", "vehicleRef": "EV-7", "batteryStart": 25 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let started = body_json(resp).await;
        assert_eq!(started["state"], "ACTIVE");
        assert_eq!(started["ownerId"], "alice");
        assert_eq!(started["endTime"], serde_json::Value::Null);
        let session_id = started["id"].as_str().expect("id should be a string").to_string();

        let req = test::TestRequest::post()
            .uri("/sessions")
            .set_json(serde_json::json!({ "stationId": "depot-1" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(resp).await["error"], "capacity_exhausted");

        let req = test::TestRequest::get()
            .uri("/stations/depot-1/active-session")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["id"], session_id.as_str());

        let req = test::TestRequest::post()
            .uri(&format!("/sessions/{session_id}/end"))
            .insert_header((USER_ID_HEADER, "mallory"))
            .set_json(serde_json::json!({}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(resp).await["error"], "forbidden");

        let req = test::TestRequest::post()
            .uri(&format!("/sessions/{session_id}/end"))
            .insert_header((USER_ID_HEADER, "alice"))
            .set_json(serde_json::json!({ "batteryEnd": 80, "energyDelivered": 12.5 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let ended = body_json(resp).await;
        assert_eq!(ended["state"], "ENDED");
        assert_eq!(ended["batteryEnd"], 80);
        assert_eq!(ended["energyDelivered"], 12.5);
        assert_eq!(ended["durationMinutes"], 0);

        let req = test::TestRequest::post()
            .uri(&format!("/sessions/{session_id}/end"))
            .insert_header((USER_ID_HEADER, "alice"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(resp).await["error"], "already_ended");

        let req = test::TestRequest::get()
            .uri("/stations/depot-1/capacity")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(body_json(resp).await["availableChargers"], 1);

        let req = test::TestRequest::get()
            .uri("/stations/depot-1/active-session")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[actix_web::test]
    async fn malformed_end_body_is_rejected_and_session_stays_active() {
        let state = build_state("malformed-end-api", &[("depot-1", 1)]);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/sessions")
            .set_json(serde_json::json!({ "stationId": "depot-1" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        let session_id = body_json(resp).await["id"]
            .as_str()
            .expect("id should be a string")
            .to_string();

        let req = test::TestRequest::post()
            .uri(&format!("/sessions/{session_id}/end"))
            .set_json(serde_json::json!({ "batteryEnd": 300, "energyDelivered": 12.5 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"], "invalid_input");

        let req = test::TestRequest::get()
            .uri("/stations/depot-1/active-session")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["state"], "ACTIVE");

        let req = test::TestRequest::post()
            .uri(&format!("/sessions/{session_id}/end"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let ended = body_json(resp).await;
        assert_eq!(ended["state"], "ENDED");
        assert_eq!(ended["batteryEnd"], serde_json::Value::Null);
    }

    #[actix_web::test]
    async fn out_of_range_start_battery_gets_json_error_body() {
        let state = build_state("malformed-start-api", &[("depot-1", 1)]);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/sessions")
            .set_json(serde_json::json!({ "stationId": "depot-1", "batteryStart": 300 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"], "invalid_input");

        let req = test::TestRequest::get()
            .uri("/sessions?limit=lots")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"], "invalid_input");

        let req = test::TestRequest::get()
            .uri("/stations/depot-1/capacity")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(body_json(resp).await["availableChargers"], 1);
    }

    #[actix_web::test]
    async fn rejects_invalid_battery_and_unknown_session() {
        let state = build_state("invalid-api", &[("depot-1", 1)]);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/sessions")
            .set_json(serde_json::json!({ "stationId": "depot-1", "batteryStart": 101 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"], "invalid_input");

        let req = test::TestRequest::post()
            .uri("/sessions/does-not-exist/end")
            .set_json(serde_json::json!({}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp).await["error"], "session_not_found");

        let req = test::TestRequest::post()
            .uri("/sessions")
            .set_json(serde_json::json!({ "stationId": "ghost" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp).await["error"], "station_not_found");
    }

    #[actix_web::test]
    async fn lists_sessions_filtered_by_owner() {
        let state = build_state("list-api", &[("depot-1", 3)]);
        for owner in ["alice", "bob", "alice"] {
            state
                .coordinator
                .start_session(crate::domain::models::NewSession {
                    station_id: "depot-1".to_string(),
                    owner_id: Some(owner.to_string()),
                    ..Default::default()
                })
                .expect("start should succeed");
        }
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/sessions?ownerId=alice&stationId=depot-1")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        let items = json.as_array().expect("response should be an array");
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|item| item["ownerId"] == "alice"));

        let req = test::TestRequest::get()
            .uri("/sessions?limit=1&offset=1")
            .to_request();
        let resp = test::call_service(&app, req).await;
        let json = body_json(resp).await;
        assert_eq!(json.as_array().expect("array").len(), 1);
    }

    #[actix_web::test]
    async fn diagnostics_audit_and_reconcile_endpoints() {
        let state = build_state("diagnostics-api", &[("depot-1", 2)]);
        state
            .coordinator
            .start_session(crate::domain::models::NewSession {
                station_id: "depot-1".to_string(),
                ..Default::default()
            })
            .expect("start should succeed");
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/diagnostics/stations/depot-1/audit")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["activeSessions"], 1);
        assert_eq!(json["availableChargers"], 1);
        assert_eq!(json["drift"], 0);

        let req = test::TestRequest::post()
            .uri("/diagnostics/stations/depot-1/reconcile")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["drift"], 0);

        let req = test::TestRequest::get()
            .uri("/diagnostics/reconciliation-events?limit=5")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json.as_array().expect("array").len(), 0);
    }
}

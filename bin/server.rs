// Stable Ledger - Web Server
// REST API with Axum

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use chrono::{Local, NaiveDate};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use stable_ledger::budget::{month_of, parse_month};
use stable_ledger::{
    delete_operation, get_all_operations, get_events_for_entity, insert_operations, open_database,
    update_operation, AppConfig, AutomationRule, Envelope, GroundCondition, HealthEvent, LedgerError, Operation,
    OperationType, StableData, StableState, TrainingSeries, WeatherSnapshot,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    stable: Arc<Mutex<StableState>>,
    config: Arc<AppConfig>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Response {
        (
            StatusCode::OK,
            Json(Self {
                success: true,
                data: Some(data),
                error: None,
            }),
        )
            .into_response()
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ApiResponse::<()> {
        success: false,
        data: None,
        error: Some(message.into()),
    };
    (status, Json(body)).into_response()
}

fn ledger_error_response(err: LedgerError) -> Response {
    let status = match err {
        LedgerError::NotFound { .. } => StatusCode::NOT_FOUND,
        LedgerError::InvalidTransition { .. } => StatusCode::CONFLICT,
        _ => StatusCode::BAD_REQUEST,
    };
    error_response(status, err.to_string())
}

fn internal_error(context: &str, err: anyhow::Error) -> Response {
    error!("{}: {:#}", context, err);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, context)
}

/// A poisoned lock turns into a 500 instead of a panic
fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, Response> {
    mutex
        .lock()
        .map_err(|_| error_response(StatusCode::INTERNAL_SERVER_ERROR, "state lock poisoned"))
}

/// Body of POST /api/operations
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewOperation {
    date: NaiveDate,
    label: String,
    amount: f64,
    #[serde(rename = "type")]
    op_type: OperationType,
    account_id: String,
    #[serde(default)]
    category_id: Option<String>,
    #[serde(default)]
    horse_id: Option<String>,
    #[serde(default)]
    payee: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

impl From<NewOperation> for Operation {
    fn from(input: NewOperation) -> Self {
        let mut op = Operation::new(input.date, input.label, input.amount, input.op_type, input.account_id);
        op.category_id = input.category_id;
        op.horse_id = input.horse_id;
        op.payee = input.payee;
        op.tags = input.tags;
        op
    }
}

#[derive(Deserialize)]
struct MonthQuery {
    month: Option<String>,
}

/// Optional weather observation for the weather check
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecommendationQuery {
    temperature_c: Option<f64>,
    humidity: Option<f64>,
    ground: Option<GroundCondition>,
}

impl RecommendationQuery {
    fn weather(&self) -> Option<WeatherSnapshot> {
        Some(WeatherSnapshot {
            temperature_c: self.temperature_c?,
            relative_humidity: self.humidity.unwrap_or(50.0),
            ground: self.ground.unwrap_or(GroundCondition::Good),
        })
    }
}

#[derive(Deserialize)]
struct OccurrenceQuery {
    limit: Option<usize>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> Response {
    ApiResponse::ok("OK")
}

/// GET /api/operations - All operations, newest first
async fn list_operations(State(state): State<AppState>) -> Response {
    let stable = match lock(&state.stable) {
        Ok(stable) => stable,
        Err(response) => return response,
    };

    let mut operations = stable.operations().to_vec();
    operations.sort_by(|a, b| b.date.cmp(&a.date));
    ApiResponse::ok(operations)
}

/// POST /api/operations - Create an operation (automation rules applied)
async fn create_operation(State(state): State<AppState>, Json(input): Json<NewOperation>) -> Response {
    if !input.amount.is_finite() || input.amount < 0.0 {
        return error_response(StatusCode::BAD_REQUEST, "amount must be a positive number");
    }

    let (conn, mut stable) = match (lock(&state.db), lock(&state.stable)) {
        (Ok(conn), Ok(stable)) => (conn, stable),
        (Err(response), _) | (_, Err(response)) => return response,
    };

    let op = stable.add_operation(input.into()).clone();

    match insert_operations(&conn, std::slice::from_ref(&op)) {
        Ok(summary) if summary.inserted == 1 => {
            info!(id = %op.id, label = %op.label, "operation created");
            (StatusCode::CREATED, Json(ApiResponse { success: true, data: Some(op), error: None })).into_response()
        }
        Ok(_) => {
            // Same date/amount/label/account/type already stored
            rollback_operation(&mut stable, &op.id);
            warn!(label = %op.label, "duplicate operation rejected");
            error_response(StatusCode::CONFLICT, "duplicate operation")
        }
        Err(e) => {
            rollback_operation(&mut stable, &op.id);
            internal_error("Error storing operation", e)
        }
    }
}

/// Drop an operation the database refused, so memory and SQLite agree
fn rollback_operation(stable: &mut StableState, id: &str) {
    if let Err(e) = stable.delete_operation(id) {
        warn!(id = %id, "rollback of unsaved operation failed: {}", e);
    }
}

/// PUT /api/operations/:id - Replace the editable fields of an operation
async fn edit_operation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<NewOperation>,
) -> Response {
    if !input.amount.is_finite() || input.amount < 0.0 {
        return error_response(StatusCode::BAD_REQUEST, "amount must be a positive number");
    }

    let (conn, mut stable) = match (lock(&state.db), lock(&state.stable)) {
        (Ok(conn), Ok(stable)) => (conn, stable),
        (Err(response), _) | (_, Err(response)) => return response,
    };

    let previous = match stable.operation(&id) {
        Some(op) => op.clone(),
        None => return ledger_error_response(LedgerError::not_found("operation", id)),
    };

    let updated = match stable.update_operation(&id, |op| {
        op.date = input.date;
        op.label = input.label;
        op.amount = input.amount;
        op.op_type = input.op_type;
        op.account_id = input.account_id;
        op.category_id = input.category_id;
        op.horse_id = input.horse_id;
        op.payee = input.payee;
        op.tags = input.tags;
    }) {
        Ok(op) => op.clone(),
        Err(e) => return ledger_error_response(e),
    };

    match update_operation(&conn, &updated) {
        Ok(true) => ApiResponse::ok(updated),
        Ok(false) => {
            restore_operation(&mut stable, previous);
            error_response(StatusCode::NOT_FOUND, "operation not stored")
        }
        Err(e) => {
            // Usually the new values collide with another stored operation
            restore_operation(&mut stable, previous);
            internal_error("Error updating operation", e)
        }
    }
}

fn restore_operation(stable: &mut StableState, previous: Operation) {
    let id = previous.id.clone();
    if let Err(e) = stable.update_operation(&id, |op| *op = previous) {
        warn!(id = %id, "restoring operation failed: {}", e);
    }
}

/// GET /api/operations/:id/events - Audit trail, newest first
async fn get_operation_events(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let conn = match lock(&state.db) {
        Ok(conn) => conn,
        Err(response) => return response,
    };

    match get_events_for_entity(&conn, "operation", &id) {
        Ok(events) => ApiResponse::ok(events),
        Err(e) => internal_error("Error reading events", e),
    }
}

/// DELETE /api/operations/:id
async fn remove_operation(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let (conn, mut stable) = match (lock(&state.db), lock(&state.stable)) {
        (Ok(conn), Ok(stable)) => (conn, stable),
        (Err(response), _) | (_, Err(response)) => return response,
    };

    let removed = match stable.delete_operation(&id) {
        Ok(op) => op,
        Err(e) => return ledger_error_response(e),
    };

    match delete_operation(&conn, &id) {
        Ok(_) => ApiResponse::ok(removed),
        Err(e) => internal_error("Error deleting operation", e),
    }
}

/// Write the stable document after a change
fn persist(stable: &StableState, config: &AppConfig) -> Result<(), Response> {
    stable
        .data
        .save(&config.data_path)
        .map_err(|e| internal_error("Error saving stable document", e))
}

/// Upsert into the stable document, save it and echo the stored value
fn upsert_and_save<T, F>(state: &AppState, item: T, upsert: F) -> Response
where
    T: Serialize + Clone,
    F: FnOnce(&mut StableState, T),
{
    let mut stable = match lock(&state.stable) {
        Ok(stable) => stable,
        Err(response) => return response,
    };

    upsert(&mut *stable, item.clone());
    if let Err(response) = persist(&stable, &state.config) {
        return response;
    }
    (StatusCode::CREATED, Json(ApiResponse { success: true, data: Some(item), error: None })).into_response()
}

/// POST /api/rules
async fn save_rule(State(state): State<AppState>, Json(rule): Json<AutomationRule>) -> Response {
    upsert_and_save(&state, rule, StableState::upsert_rule)
}

/// POST /api/budget/envelopes
async fn save_envelope(State(state): State<AppState>, Json(envelope): Json<Envelope>) -> Response {
    if !envelope.amount.is_finite() || envelope.amount < 0.0 {
        return error_response(StatusCode::BAD_REQUEST, "envelope amount must be a positive number");
    }
    upsert_and_save(&state, envelope, StableState::upsert_envelope)
}

/// POST /api/health/events
async fn save_health_event(State(state): State<AppState>, Json(event): Json<HealthEvent>) -> Response {
    upsert_and_save(&state, event, StableState::upsert_health_event)
}

/// POST /api/training/series - The rule must parse
async fn save_series(State(state): State<AppState>, Json(series): Json<TrainingSeries>) -> Response {
    if let Err(e) = series.occurrences(1) {
        return ledger_error_response(e);
    }
    upsert_and_save(&state, series, StableState::upsert_series)
}

/// GET /api/budget/balances
async fn get_balances(State(state): State<AppState>) -> Response {
    match lock(&state.stable) {
        Ok(stable) => ApiResponse::ok(stable.account_balances()),
        Err(response) => response,
    }
}

/// GET /api/budget/envelopes?month=YYYY-MM - Defaults to the current month
async fn get_envelopes(State(state): State<AppState>, Query(query): Query<MonthQuery>) -> Response {
    let (year, month) = match query.month.as_deref() {
        Some(value) => match parse_month(value) {
            Ok(period) => period,
            Err(e) => return ledger_error_response(e),
        },
        None => month_of(Local::now().date_naive()),
    };

    let stable = match lock(&state.stable) {
        Ok(stable) => stable,
        Err(response) => return response,
    };

    match stable.envelope_report(year, month) {
        Ok(report) => ApiResponse::ok(report),
        Err(e) => ledger_error_response(e),
    }
}

/// GET /api/ai/recommendations
async fn get_recommendations(State(state): State<AppState>, Query(query): Query<RecommendationQuery>) -> Response {
    match lock(&state.stable) {
        Ok(stable) => ApiResponse::ok(stable.recommendations(Local::now().date_naive(), query.weather())),
        Err(response) => response,
    }
}

/// GET /api/training/series/:id/occurrences?limit=N
async fn get_series_occurrences(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<OccurrenceQuery>,
) -> Response {
    let decoded_id = urlencoding::decode(&id)
        .map(|decoded| decoded.into_owned())
        .unwrap_or(id);
    let limit = query.limit.unwrap_or(state.config.max_occurrences);

    match lock(&state.stable) {
        Ok(stable) => match stable.series_occurrences(&decoded_id, limit) {
            Ok(occurrences) => ApiResponse::ok(occurrences),
            Err(e) => ledger_error_response(e),
        },
        Err(response) => response,
    }
}

fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/operations", get(list_operations).post(create_operation))
        .route("/operations/:id", put(edit_operation).delete(remove_operation))
        .route("/operations/:id/events", get(get_operation_events))
        .route("/rules", post(save_rule))
        .route("/budget/balances", get(get_balances))
        .route("/budget/envelopes", get(get_envelopes).post(save_envelope))
        .route("/health/events", post(save_health_event))
        .route("/ai/recommendations", get(get_recommendations))
        .route("/training/series", post(save_series))
        .route("/training/series/:id/occurrences", get(get_series_occurrences))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::load()?;

    let conn = open_database(&config.database_path)?;
    let operations = get_all_operations(&conn)?;
    let data = StableData::load(&config.data_path)?;
    info!(
        operations = operations.len(),
        horses = data.horses.len(),
        db = ?config.database_path,
        "stable loaded"
    );

    let addr = config.server_addr.clone();
    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        stable: Arc::new(Mutex::new(StableState::new(data, operations))),
        config: Arc::new(config),
    };

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🚀 Server running on http://{}", addr);

    axum::serve(listener, router(state)).await?;
    Ok(())
}

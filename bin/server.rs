// Course Ledger - Web Server
// REST API with Axum

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use clap::Parser;
use course_ledger::{
    delete_record, get_all_records, get_events_for_entity, guardian_summaries, import_text,
    insert_record, query_records, render_notice, setup_database, summary_for_guardian,
    update_record, CourseRecord, Event, GuardianSummary, ImportOutcome, LedgerConfig,
    LedgerError, NewRecord, NoticeLanguage, RecordFilter, RecordUpdate, ReconciliationEngine,
    Roster, SqliteStore, ENTITY_COURSE_RECORD,
};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    roster: Arc<Roster>,
    config: Arc<LedgerConfig>,
}

impl AppState {
    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ApiError> {
        self.db
            .lock()
            .map_err(|_| ApiError::internal("database lock poisoned".to_string()))
    }
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

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// Error half of every handler: status code plus the message shown to the caller
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: String) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message,
        }
    }

    fn bad_request(message: String) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message,
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        let status = match &err {
            LedgerError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, "{}", self.message);
        } else {
            warn!(status = %self.status, "{}", self.message);
        }
        (self.status, Json(ApiResponse::<()>::err(self.message))).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Serialize)]
struct NoticeResponse {
    guardian: String,
    language: &'static str,
    text: String,
}

#[derive(Deserialize)]
struct NoticeQuery {
    guardian: String,
    lang: Option<String>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/records - Stored course records, optionally filtered
async fn get_records(
    State(state): State<AppState>,
    Query(filter): Query<RecordFilter>,
) -> ApiResult<Vec<CourseRecord>> {
    let conn = state.conn()?;
    let records = query_records(&conn, &filter)?;
    Ok(Json(ApiResponse::ok(records)))
}

/// POST /api/import - Pasted schedule export as the plain-text body
///
/// Runs on the blocking pool under the configured deadline. On timeout the caller
/// gets 504 while the import may still finish in the background.
async fn import_schedule(State(state): State<AppState>, body: String) -> ApiResult<ImportOutcome> {
    let timeout = state.config.timeout();
    let engine = ReconciliationEngine::with_batch_size(state.config.batch_size);
    let db = state.db.clone();
    let roster = state.roster.clone();

    let task = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| {
            LedgerError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "database lock poisoned",
            ))
        })?;
        let store = SqliteStore::new(&conn).with_actor("api");
        import_text(&body, &roster, &store, &engine)
    });

    match tokio::time::timeout(timeout, task).await {
        Err(_) => Err(LedgerError::Timeout(timeout).into()),
        Ok(Err(join_error)) => Err(ApiError::internal(join_error.to_string())),
        Ok(Ok(outcome)) => {
            let outcome = outcome?;
            info!("{}; {}", outcome.process.summary(), outcome.upsert.summary());
            Ok(Json(ApiResponse::ok(outcome)))
        }
    }
}

/// GET /api/summaries - Per-guardian totals
async fn get_summaries(
    State(state): State<AppState>,
    Query(filter): Query<RecordFilter>,
) -> ApiResult<Vec<GuardianSummary>> {
    let conn = state.conn()?;
    let records = get_all_records(&conn)?;
    Ok(Json(ApiResponse::ok(guardian_summaries(&records, &filter))))
}

/// GET /api/notice?guardian=&lang= - Rendered fee notice
async fn get_notice(
    State(state): State<AppState>,
    Query(query): Query<NoticeQuery>,
) -> ApiResult<NoticeResponse> {
    let language = match query.lang.as_deref() {
        Some(code) => code.parse::<NoticeLanguage>().map_err(ApiError::bad_request)?,
        None => state.roster.guardian_language(&query.guardian).into(),
    };
    let filter = RecordFilter {
        from: query.from,
        to: query.to,
        ..Default::default()
    };

    let records = {
        let conn = state.conn()?;
        get_all_records(&conn)?
    };

    let text = summary_for_guardian(&records, &query.guardian, &filter)
        .and_then(|summary| render_notice(&summary, language, &state.config.payment))
        .ok_or_else(|| LedgerError::NotFound(format!("records for guardian {}", query.guardian)))?;

    Ok(Json(ApiResponse::ok(NoticeResponse {
        guardian: query.guardian,
        language: language.code(),
        text,
    })))
}

/// POST /api/records - Add a lesson by hand for a roster student (audited)
async fn add_record(
    State(state): State<AppState>,
    Json(new): Json<NewRecord>,
) -> ApiResult<CourseRecord> {
    let record = new.build(&state.roster)?;
    let conn = state.conn()?;
    insert_record(&conn, &record, "api")?;
    Ok(Json(ApiResponse::ok(record)))
}

/// PATCH /api/records/:id - Edit date, times, hours, title or student (audited)
async fn edit_record(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<RecordUpdate>,
) -> ApiResult<CourseRecord> {
    let conn = state.conn()?;
    let record = update_record(&conn, &id, &update, &state.roster, "api")?;
    Ok(Json(ApiResponse::ok(record)))
}

/// DELETE /api/records/:id - Remove one record (audited)
async fn remove_record(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<CourseRecord> {
    let conn = state.conn()?;
    let removed = delete_record(&conn, &id, "api")?;
    Ok(Json(ApiResponse::ok(removed)))
}

/// GET /api/records/:id/history - Audit trail, newest first
async fn record_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<Event>> {
    let conn = state.conn()?;
    let events = get_events_for_entity(&conn, ENTITY_COURSE_RECORD, &id)?;
    Ok(Json(ApiResponse::ok(events)))
}

fn app(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/records", get(get_records).post(add_record))
        .route("/records/:id", delete(remove_record).patch(edit_record))
        .route("/records/:id/history", get(record_history))
        .route("/import", post(import_schedule))
        .route("/summaries", get(get_summaries))
        .route("/notice", get(get_notice))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Main Server
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "ledger-server")]
#[command(about = "HTTP API for the course ledger")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address
    #[arg(long, default_value = "0.0.0.0:3000", env = "LEDGER_SERVER_ADDR")]
    addr: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use anyhow::Context;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "course_ledger=info,ledger_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = LedgerConfig::load(args.config.as_deref()).context("loading configuration")?;

    let roster = Roster::from_csv_path(&config.roster_path)?;
    info!(students = roster.len(), "roster loaded");

    let conn = Connection::open(&config.database_path)
        .with_context(|| format!("opening database {}", config.database_path.display()))?;
    setup_database(&conn)?;
    info!(path = %config.database_path.display(), "database opened");

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        roster: Arc::new(roster),
        config: Arc::new(config),
    };

    let listener = tokio::net::TcpListener::bind(&args.addr)
        .await
        .with_context(|| format!("binding {}", args.addr))?;

    info!("🚀 Server running on http://{}/api", args.addr);
    axum::serve(listener, app(state)).await?;

    Ok(())
}

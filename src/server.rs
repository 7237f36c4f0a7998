use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::datatype::Value;
use crate::error::{FilingsError, Result};
use crate::filter::{FilterBuilder, FilterCondition, FilterSet};
use crate::loading::{BatchStream, LoadOptions, LoadingSession, LoadingStatus, ProgressiveLoader, SessionId};
use crate::persist::SqliteStore;
use crate::preferences::{ColumnCatalog, ColumnMetadata, FilterSetRepository, UserColumnPreference};
use crate::query::{DEFAULT_DISTINCT_LIMIT, Page, QueryService};
use crate::schema::JobFiling;

/// Everything the handlers share.
pub struct AppState {
    pub loader: ProgressiveLoader<SqliteStore>,
    pub filters: FilterSetRepository,
    pub columns: ColumnCatalog,
    pub defaults: LoadOptions,
    // streams of started sessions waiting for a websocket to attach
    pending: Mutex<HashMap<SessionId, Parked>>,
}

struct Parked {
    stream: BatchStream,
    since: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        loader: ProgressiveLoader<SqliteStore>,
        filters: FilterSetRepository,
        columns: ColumnCatalog,
        defaults: LoadOptions,
    ) -> Self {
        Self { loader, filters, columns, defaults, pending: Mutex::new(HashMap::new()) }
    }

    pub fn from_settings(settings: &Settings) -> Result<Arc<AppState>> {
        let store = SqliteStore::open(&settings.persistence_mode())?;
        let queries = QueryService::new(Arc::new(store));
        let loader = ProgressiveLoader::new(queries, settings.loading.channel_capacity);
        Ok(Arc::new(AppState::new(
            loader,
            FilterSetRepository::new(&settings.filters.saved_filters_dir),
            ColumnCatalog::new(&settings.columns.metadata_file, &settings.columns.preferences_dir),
            settings.load_options(),
        )))
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<SessionId, Parked>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of started sessions whose stream no websocket has claimed yet.
    pub fn unclaimed(&self) -> usize {
        self.pending().len()
    }

    /// Cancels sessions whose stream has waited at least `max_age` for a
    /// websocket, and forgets streams of sessions that no longer exist.
    /// Returns how many sessions were cancelled.
    pub fn release_unclaimed(&self, max_age: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let loader = &self.loader;
        let mut cancelled = 0;
        self.pending().retain(|id, parked| {
            if loader.state(*id).is_none() {
                return false;
            }
            if parked.since > cutoff {
                return true;
            }
            if loader.cancel(*id) {
                cancelled += 1;
                info!(session = %id, "unclaimed loading session cancelled");
            }
            false
        });
        cancelled
    }
}

/// A failed request, rendered as `{"error": ...}`.
#[derive(Debug)]
pub struct ApiError(FilingsError);

impl<E: Into<FilingsError>> From<E> for ApiError {
    fn from(e: E) -> Self {
        ApiError(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            FilingsError::InvalidArgument(_) | FilingsError::UnknownField(_) | FilingsError::Json(_) => {
                StatusCode::BAD_REQUEST
            }
            FilingsError::UnknownSession(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let msg = self.0.to_string();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(%msg, code = %status.as_u16(), "request failed");
        } else {
            debug!(%msg, code = %status.as_u16(), "request rejected");
        }
        (status, Json(ErrorBody { error: msg })).into_response()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

async fn blocking<T, F>(work: F) -> std::result::Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    Ok(tokio::task::spawn_blocking(work).await??)
}

fn unknown_session(id: SessionId) -> ApiError {
    ApiError(FilingsError::UnknownSession(id.to_string()))
}

// ------------- Requests and responses --------------

fn first_page() -> usize {
    1
}
fn default_page_size() -> usize {
    50
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    #[serde(default)]
    pub conditions: Vec<FilterCondition>,
    #[serde(default = "first_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

#[derive(Deserialize)]
pub struct DistinctQuery {
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadRequest {
    #[serde(default)]
    pub conditions: Vec<FilterCondition>,
    pub initial_batch_size: Option<usize>,
    pub subsequent_batch_size: Option<usize>,
}

#[derive(Serialize)]
pub struct LoadStarted {
    pub id: SessionId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchMessage<'a> {
    session: SessionId,
    records: &'a [JobFiling],
}

#[derive(Serialize)]
struct FailureMessage<'a> {
    session: SessionId,
    error: &'a str,
}

#[derive(Serialize)]
struct StatusMessage<'a> {
    status: &'static str,
    #[serde(flatten)]
    session: &'a LoadingSession,
}

fn status_name(status: &LoadingStatus) -> &'static str {
    match status {
        LoadingStatus::Running => "running",
        LoadingStatus::Completed => "completed",
        LoadingStatus::Cancelled => "cancelled",
        LoadingStatus::Failed(_) => "failed",
    }
}

#[derive(Serialize)]
struct Deleted {
    deleted: bool,
}

// ------------- Handlers --------------

async fn get_page(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PageRequest>,
) -> std::result::Result<Json<Page>, ApiError> {
    let queries = state.loader.queries().clone();
    let predicate = FilterBuilder::build(&req.conditions);
    let started = std::time::Instant::now();
    let page = blocking(move || queries.get_page(req.page, req.page_size, Some(&predicate))).await?;
    info!(ms = started.elapsed().as_secs_f64() * 1000.0, page = page.page, rows = page.items.len(), total = page.total_count, "page served");
    Ok(Json(page))
}

async fn distinct_values(
    State(state): State<Arc<AppState>>,
    Path(field): Path<String>,
    Query(query): Query<DistinctQuery>,
) -> std::result::Result<Json<BTreeSet<Value>>, ApiError> {
    let queries = state.loader.queries().clone();
    let limit = query.limit.unwrap_or(DEFAULT_DISTINCT_LIMIT);
    let values = blocking(move || queries.distinct_values(&field, limit)).await?;
    Ok(Json(values))
}

async fn start_load(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoadRequest>,
) -> std::result::Result<(StatusCode, Json<LoadStarted>), ApiError> {
    let options = LoadOptions {
        initial_batch_size: req.initial_batch_size.unwrap_or(state.defaults.initial_batch_size),
        subsequent_batch_size: req.subsequent_batch_size.unwrap_or(state.defaults.subsequent_batch_size),
    };
    let (stream, id) = state.loader.start(Some(FilterBuilder::build(&req.conditions)), options)?;
    state.pending().insert(id, Parked { stream, since: Utc::now() });
    Ok((StatusCode::ACCEPTED, Json(LoadStarted { id })))
}

async fn load_state(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> std::result::Result<Json<LoadingSession>, ApiError> {
    let id = SessionId::from(id);
    state.loader.state(id).map(Json).ok_or_else(|| unknown_session(id))
}

async fn cancel_load(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> std::result::Result<Json<LoadingSession>, ApiError> {
    let id = SessionId::from(id);
    state.loader.cancel(id);
    state.pending().remove(&id);
    state.loader.state(id).map(Json).ok_or_else(|| unknown_session(id))
}

async fn stream_load(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    ws: WebSocketUpgrade,
) -> std::result::Result<Response, ApiError> {
    let id = SessionId::from(id);
    let stream = state.pending().remove(&id).map(|parked| parked.stream).ok_or_else(|| unknown_session(id))?;
    Ok(ws.on_upgrade(move |socket| forward_batches(state, stream, socket)))
}

/// Sends every batch as a JSON text message, then the final session state.
async fn forward_batches(state: Arc<AppState>, mut stream: BatchStream, mut socket: WebSocket) {
    let id = stream.id();
    while let Some(item) = stream.next_batch().await {
        let text = match &item {
            Ok(batch) => serde_json::to_string(&BatchMessage { session: id, records: batch }),
            Err(e) => serde_json::to_string(&FailureMessage { session: id, error: &e.message }),
        };
        let text = match text {
            Ok(text) => text,
            Err(e) => {
                warn!(session = %id, error = %e, "could not encode batch");
                state.loader.cancel(id);
                break;
            }
        };
        if socket.send(Message::Text(text)).await.is_err() {
            debug!(session = %id, "websocket closed by client");
            state.loader.cancel(id);
            return;
        }
    }
    if let Some(session) = state.loader.wait(id).await {
        let message = StatusMessage { status: status_name(&session.status()), session: &session };
        if let Ok(text) = serde_json::to_string(&message) {
            let _ = socket.send(Message::Text(text)).await;
        }
    }
    let _ = socket.send(Message::Close(None)).await;
}

async fn list_filters(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
) -> std::result::Result<Json<Vec<FilterSet>>, ApiError> {
    let filters = state.filters.clone();
    Ok(Json(blocking(move || filters.list(&user)).await?))
}

async fn save_filter(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
    Json(set): Json<FilterSet>,
) -> std::result::Result<(StatusCode, Json<FilterSet>), ApiError> {
    let filters = state.filters.clone();
    let saved = blocking(move || filters.save(&user, set)).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

async fn delete_filter(
    State(state): State<Arc<AppState>>,
    Path((user, id)): Path<(String, String)>,
) -> std::result::Result<Json<Deleted>, ApiError> {
    let filters = state.filters.clone();
    let deleted = blocking(move || filters.delete(&user, &id)).await?;
    Ok(Json(Deleted { deleted }))
}

async fn get_columns(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
) -> std::result::Result<Json<Vec<ColumnMetadata>>, ApiError> {
    let columns = state.columns.clone();
    Ok(Json(blocking(move || columns.columns(Some(&user))).await?))
}

async fn put_columns(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
    Json(preferences): Json<Vec<UserColumnPreference>>,
) -> std::result::Result<Json<Vec<ColumnMetadata>>, ApiError> {
    let columns = state.columns.clone();
    let updated = blocking(move || {
        columns.save_preferences(&user, &preferences)?;
        columns.columns(Some(&user))
    })
    .await?;
    Ok(Json(updated))
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);
    Router::new()
        .route("/v1/filings/page", post(get_page))
        .route("/v1/fields/:field/distinct", get(distinct_values))
        .route("/v1/loads", post(start_load))
        .route("/v1/loads/:id", get(load_state).delete(cancel_load))
        .route("/v1/loads/:id/stream", get(stream_load))
        .route("/v1/users/:user/filters", get(list_filters).post(save_filter))
        .route("/v1/users/:user/filters/:id", axum::routing::delete(delete_filter))
        .route("/v1/users/:user/columns", get(get_columns).put(put_columns))
        .layer(cors)
        .with_state(state)
}

/// Periodically forgets finished sessions older than `max_age` and cancels
/// sessions whose stream has gone unclaimed for as long.
pub fn spawn_sweeper(state: Arc<AppState>, every: Duration, max_age: chrono::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let released = state.release_unclaimed(max_age);
            let removed = state.loader.sweep(max_age);
            if removed > 0 || released > 0 {
                debug!(removed, released, "loading sessions swept");
            }
        }
    })
}

pub async fn serve(state: Arc<AppState>, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

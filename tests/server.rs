use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use serde_json::{Value as Json, json};
use tower::ServiceExt;

use filingscope::config::Settings;
use filingscope::import;
use filingscope::loading::{LoadOptions, LoadingStatus, ProgressiveLoader, SessionId};
use filingscope::persist::{PersistenceMode, SqliteStore};
use filingscope::preferences::{ColumnCatalog, FilterSetRepository};
use filingscope::query::QueryService;
use filingscope::server::{self, AppState};

fn setup(dir: &Path, records: usize) -> Arc<AppState> {
    let store = SqliteStore::open(&PersistenceMode::InMemory).expect("open store");
    import::generate_test_data(&store, records, 5).expect("seed");
    let loader = ProgressiveLoader::new(QueryService::new(Arc::new(store)), 4);
    Arc::new(AppState::new(
        loader,
        FilterSetRepository::new(dir.join("filters")),
        ColumnCatalog::new(dir.join("columns.json"), dir.join("preferences")),
        LoadOptions::default(),
    ))
}

async fn call(state: &Arc<AppState>, method: Method, uri: &str, body: Option<Json>) -> (StatusCode, Json) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request");
    let response = server::router(Arc::clone(state)).oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
    let json = if bytes.is_empty() { Json::Null } else { serde_json::from_slice(&bytes).expect("json body") };
    (status, json)
}

fn session_id(body: &Json) -> u64 {
    body["id"].as_u64().expect("numeric session id")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn state_and_router_from_default_settings() {
    let settings = Settings::load(None).expect("defaults");
    let state = AppState::from_settings(&settings).expect("state");
    assert_eq!(state.defaults, settings.load_options());
    let _router = server::router(Arc::clone(&state));

    let (mut stream, id) = state.loader.start(None, state.defaults).expect("start");
    while stream.next_batch().await.is_some() {}
    let session = state.loader.wait(id).await.expect("session");
    assert_eq!(session.status(), LoadingStatus::Completed, "empty database loads one empty batch");

    let sweeper = server::spawn_sweeper(Arc::clone(&state), Duration::from_secs(1), chrono::Duration::zero());
    tokio::time::sleep(Duration::from_millis(100)).await;
    sweeper.abort();
    assert!(state.loader.state(id).is_none(), "first tick sweeps finished sessions");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn page_route() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = setup(dir.path(), 30);

    let (status, body) = call(&state, Method::POST, "/v1/filings/page", Some(json!({"page": 3, "pageSize": 12}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalCount"], 30);
    assert_eq!(body["items"].as_array().expect("items").len(), 6);
    assert_eq!(body["items"][0]["job_s1_no"], "TEST000024");

    let filtered = json!({"conditions": [{"fieldName": "JobS1No", "operator": "eq", "value": "TEST000007"}]});
    let (status, body) = call(&state, Method::POST, "/v1/filings/page", Some(filtered)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalCount"], 1);
    assert_eq!(body["pageSize"], 50, "page size defaults to 50");

    let (status, body) = call(&state, Method::POST, "/v1/filings/page", Some(json!({"page": 0}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().expect("error text").contains("page"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn distinct_route() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = setup(dir.path(), 200);

    let (status, body) = call(&state, Method::GET, "/v1/fields/Borough/distinct", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().expect("values").len(), 5);

    let (status, body) = call(&state, Method::GET, "/v1/fields/BOROUGH/distinct?limit=2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().expect("values").len(), 2);

    let (status, body) = call(&state, Method::GET, "/v1/fields/NoSuchField/distinct", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn load_routes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = setup(dir.path(), 200);

    // twenty batches against a channel of four, so the session is still running
    let request = json!({"initialBatchSize": 5, "subsequentBatchSize": 10});
    let (status, body) = call(&state, Method::POST, "/v1/loads", Some(request)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = session_id(&body);
    assert_eq!(state.unclaimed(), 1);

    let (status, body) = call(&state, Method::GET, &format!("/v1/loads/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], id);

    let (status, body) = call(&state, Method::DELETE, &format!("/v1/loads/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isCancelled"], true);
    assert!(body["endTime"].is_string());
    assert_eq!(state.unclaimed(), 0, "cancelling releases the parked stream");

    let (status, _) = call(&state, Method::GET, &format!("/v1/loads/{}/stream", id), None).await;
    assert_ne!(status, StatusCode::SWITCHING_PROTOCOLS);

    let (status, body) = call(&state, Method::GET, "/v1/loads/987654", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
    let (status, _) = call(&state, Method::DELETE, "/v1/loads/987654", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&state, Method::POST, "/v1/loads", Some(json!({"subsequentBatchSize": 0}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = call(&state, Method::POST, "/v1/loads", Some(json!({"subsequentBatchSize": u64::MAX}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unclaimed_streams_are_cancelled_once_stale() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = setup(dir.path(), 200);
    let request = json!({"initialBatchSize": 5, "subsequentBatchSize": 10});
    let (status, body) = call(&state, Method::POST, "/v1/loads", Some(request)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = SessionId::from(session_id(&body));

    assert_eq!(state.release_unclaimed(chrono::Duration::hours(1)), 0, "recent streams are kept");
    assert_eq!(state.unclaimed(), 1);
    assert_eq!(state.loader.state(id).expect("session").status(), LoadingStatus::Running);

    assert_eq!(state.release_unclaimed(chrono::Duration::zero()), 1);
    assert_eq!(state.unclaimed(), 0);
    let session = state.loader.wait(id).await.expect("final state");
    assert_eq!(session.status(), LoadingStatus::Cancelled);
    assert_eq!(state.loader.sweep(chrono::Duration::zero()), 1, "cancelled session can now be swept");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn filter_routes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = setup(dir.path(), 0);
    let set = json!({
        "name": "bronx",
        "conditions": [{"fieldName": "Borough", "operator": "eq", "value": "BRONX"}]
    });

    let (status, saved) = call(&state, Method::POST, "/v1/users/alice/filters", Some(set)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(saved["userId"], "alice");
    let id = saved["id"].as_str().expect("assigned id").to_string();

    let (status, listed) = call(&state, Method::GET, "/v1/users/alice/filters", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().expect("sets").len(), 1);
    assert_eq!(listed[0]["name"], "bronx");

    let uri = format!("/v1/users/alice/filters/{}", id);
    let (status, body) = call(&state, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"deleted": true}));
    let (_, body) = call(&state, Method::DELETE, &uri, None).await;
    assert_eq!(body, json!({"deleted": false}));

    let (status, _) = call(&state, Method::POST, "/v1/users/alice/filters", Some(json!({"name": " "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = call(&state, Method::POST, "/v1/users/.hidden/filters", Some(json!({"name": "x"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn column_routes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = setup(dir.path(), 0);

    let (status, columns) = call(&state, Method::GET, "/v1/users/bob/columns", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(columns.as_array().expect("columns").len(), 12);

    let preferences = json!([{"fieldName": "Borough", "visible": false, "displayOrder": -5, "width": 90}]);
    let (status, columns) = call(&state, Method::PUT, "/v1/users/bob/columns", Some(preferences)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(columns[0]["fieldName"], "Borough");
    assert_eq!(columns[0]["visible"], false);
    assert_eq!(columns[0]["width"], 90);

    let (_, others) = call(&state, Method::GET, "/v1/users/carol/columns", None).await;
    assert_ne!(others[0]["fieldName"], "Borough");
}

/// JSON HTTP API (axum)
///
/// Routes keep the collection's historical endpoint names. Errors are returned as
/// `{"error": ..., "field"?: ...}` with a matching status code.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::errors::BooksError;
use crate::library::Library;

mod handlers;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub library: Library,
    /// When set, every route except `/` and `/health` needs a matching `x-api-key`
    pub api_key: Option<String>,
    pub started: Instant,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(library: Library, api_key: Option<String>) -> SharedState {
        Arc::new(AppState {
            library,
            api_key: api_key.filter(|k| !k.is_empty()),
            started: Instant::now(),
        })
    }
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest { message: String, field: Option<String> },
    Unauthorized,
    NotFound(String),
    BadGateway(String),
    Internal(String),
}

impl From<BooksError> for ApiError {
    fn from(e: BooksError) -> Self {
        match e {
            BooksError::Validation { message, field } => ApiError::BadRequest { message, field },
            e @ BooksError::NotFound { .. } => ApiError::NotFound(e.to_string()),
            BooksError::Lookup(msg) => ApiError::BadGateway(msg),
            e => ApiError::Internal(e.to_string()),
        }
    }
}

impl ApiError {
    pub fn bad_request(field: &str, message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest { message, field } => {
                let mut body = json!({"error": message});
                if let Some(field) = field {
                    body["field"] = json!(field);
                }
                (StatusCode::BAD_REQUEST, body)
            }
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({"error": "Missing or invalid x-api-key header"}),
            ),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({"error": msg})),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, json!({"error": msg})),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, json!({"error": msg}))
            }
        };
        (status, Json(body)).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    use handlers::*;

    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/configuration", get(configuration))
        .route("/valid_locations", get(valid_locations))
        .route("/locations", get(locations))
        .route("/books_search", get(books_search))
        .route("/books_read", get(books_read))
        .route("/books_read/{year}", get(books_read_year))
        .route("/summary_books_read_by_year", get(summary_books_read_by_year))
        .route("/summary_books_read_by_year/{year}", get(summary_books_read_in_year))
        .route("/year_rank", get(year_rank))
        .route("/year_progress", get(year_progress))
        .route("/recent", get(recent))
        .route("/report", post(report))
        .route("/status_read/{id}", get(status_read))
        .route("/tags/{id}", get(tags_for_book))
        .route("/tag_counts", get(tag_counts))
        .route("/tag_counts/{prefix}", get(tag_counts_prefix))
        .route("/tags_search/{fragment}", get(tags_search))
        .route("/add_tag/{id}/{tag}", put(add_tag))
        .route("/update_tag_value/{old}/{new}", get(update_tag_value).put(update_tag_value))
        .route("/tag_from_category/{category}/{tag}", put(tag_from_category))
        .route("/tag_maintenance", get(tag_maintenance))
        .route("/add_books", post(add_books))
        .route("/add_read_dates", post(add_read_dates))
        .route("/update_read_dates", post(add_read_dates))
        .route("/update_edit_read_note", post(update_edit_read_note))
        .route("/update_book_note_status", post(update_book_note_status))
        .route("/update_book/{id}", post(update_book))
        .route("/browse/{id}/{direction}", get(browse))
        .route("/browse_find", get(browse_find))
        .route("/add_book_estimate/{id}/{pages}", put(add_book_estimate))
        .route("/add_book_estimate/{id}/{pages}/{start}", put(add_book_estimate_from))
        .route("/record_set/{id}", get(record_set))
        .route("/record_set/{id}/{index}", get(record_set_indexed))
        .route("/add_date_page", post(add_date_page))
        .route("/date_page_records/{record_id}", get(date_page_records))
        .route("/estimate/{record_id}", get(estimate))
        .route("/book_id_from_record_id/{record_id}", get(book_id_from_record_id))
        .route("/complete_records_window/{id}", get(complete_records_window))
        .route("/complete_records_window/{id}/{window}", get(complete_records_window_sized))
        .route("/books_by_isbn", post(books_by_isbn))
}

async fn require_api_key(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(expected) = state.api_key.as_deref() {
        let path = request.uri().path();
        if path != "/" && path != "/health" {
            let supplied = request
                .headers()
                .get("x-api-key")
                .and_then(|v| v.to_str().ok());
            if supplied != Some(expected) {
                tracing::warn!(path = %path, "Rejected request without valid api key");
                return Err(ApiError::Unauthorized);
            }
        }
    }
    Ok(next.run(request).await)
}

pub fn build_router(state: SharedState) -> Router {
    api_router()
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(state: SharedState, bind_addr: &str) -> Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, "booktrack API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::LibrarySettings;
    use crate::store::sqlite::SqliteBookStore;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn test_app(api_key: Option<&str>) -> Router {
        let store = SqliteBookStore::in_memory().await.unwrap();
        let library = Library::new(Arc::new(store), LibrarySettings::default(), None);
        build_router(AppState::new(library, api_key.map(str::to_string)))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn seed(app: &Router) {
        let books = json!([
            {"Title": "Dune", "Author": "Herbert, Frank", "Pages": "412", "CopyrightDate": "1965"},
            {"Title": "Emma", "Author": "Austen, Jane", "Pages": 474, "Location": "Oversized"}
        ]);
        let (status, _) = send(app, "POST", "/add_books", Some(books)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = test_app(None).await;
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_add_books_and_search() {
        let app = test_app(None).await;
        let books = json!([{"Title": "Dune", "Author": "Herbert, Frank", "Pages": "412"}]);
        let (status, body) = send(&app, "POST", "/add_books", Some(books)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["add_books"][0]["BookCollectionID"], 1);

        let (status, body) = send(&app, "GET", "/books_search?Author=herbert", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["header"][0], "BookCollectionID");
        assert_eq!(body["data"][0][1], "Dune");
    }

    #[tokio::test]
    async fn test_validation_errors_are_400() {
        let app = test_app(None).await;
        let (status, body) = send(&app, "POST", "/add_books", Some(json!([{"Title": "No author"}]))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "Author");

        let (status, body) = send(&app, "GET", "/books_search?Colour=red", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("Colour"));
    }

    #[tokio::test]
    async fn test_missing_book_is_404() {
        let app = test_app(None).await;
        let (status, body) = send(&app, "GET", "/status_read/42", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Book not found: 42");
    }

    #[tokio::test]
    async fn test_read_dates_and_summary() {
        let app = test_app(None).await;
        seed(&app).await;

        let reads = json!([
            {"BookCollectionID": 1, "ReadDate": "2021-03-01", "ReadNote": "great"},
            {"BookCollectionID": 2, "ReadDate": "2021-08-09"},
            {"BookCollectionID": 2, "ReadDate": "1966-01-01"}
        ]);
        let (status, body) = send(&app, "POST", "/add_read_dates", Some(reads)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["update_read_dates"].as_array().unwrap().len(), 3);

        let (_, body) = send(&app, "GET", "/summary_books_read_by_year", None).await;
        assert_eq!(body["header"], json!(["year", "pages read", "books read"]));
        assert_eq!(body["data"], json!([[2021, 886, 2]]));

        let (_, body) = send(&app, "GET", "/status_read/1", None).await;
        assert_eq!(body["data"][0], json!([1, "2021-03-01", "great"]));

        let (_, body) = send(&app, "GET", "/books_read/2021", None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 2);

        let (_, body) = send(&app, "GET", "/year_rank", None).await;
        assert_eq!(body["data"][0], json!([1, 2021, 2, 886]));
    }

    #[tokio::test]
    async fn test_tags_routes() {
        let app = test_app(None).await;
        seed(&app).await;

        let (status, body) = send(&app, "PUT", "/add_tag/1/Science%20Fiction", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["Tag"], "science fiction");

        let (_, body) = send(&app, "GET", "/tags/1", None).await;
        assert_eq!(body, json!({"BookID": 1, "tag_list": ["science fiction"]}));

        let (_, body) = send(&app, "GET", "/tag_counts/sci", None).await;
        assert_eq!(body["data"], json!([["science fiction", 1]]));

        let (_, body) = send(&app, "GET", "/tags_search/fiction", None).await;
        assert_eq!(body["data"][0][0], 1);

        let (_, body) = send(&app, "GET", "/update_tag_value/science%20fiction/scifi", None).await;
        assert_eq!(body["updated"], 1);

        let (_, body) = send(&app, "GET", "/tag_maintenance", None).await;
        assert_eq!(body["tags_after"], 1);
    }

    #[tokio::test]
    async fn test_tag_from_category_route() {
        let app = test_app(None).await;
        let books = json!([
            {"Title": "Odes", "Author": "Keats, John", "Pages": 90, "Category": "Poetry"},
            {"Title": "Emma", "Author": "Austen, Jane", "Pages": 474, "Category": "Novel"}
        ]);
        send(&app, "POST", "/add_books", Some(books)).await;

        let (status, body) = send(&app, "PUT", "/tag_from_category/Poetry/Verse", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["tag_from_category"],
            json!({"tag": "verse", "category": "Poetry", "book_ids": [1]})
        );

        let (_, body) = send(&app, "GET", "/tags/1", None).await;
        assert_eq!(body["tag_list"], json!(["verse"]));
    }

    #[tokio::test]
    async fn test_year_progress_route() {
        let app = test_app(None).await;
        seed(&app).await;
        let reads = json!([
            {"BookCollectionID": 1, "ReadDate": "2021-01-05"},
            {"BookCollectionID": 2, "ReadDate": "2021-02-01"}
        ]);
        send(&app, "POST", "/add_read_dates", Some(reads)).await;

        let (status, body) = send(&app, "GET", "/year_progress", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["header"], json!(["Year", "Day", "ReadDate", "Pages"]));
        assert_eq!(
            body["data"],
            json!([[2021, 5, "2021-01-05", 412], [2021, 32, "2021-02-01", 886]])
        );
    }

    #[tokio::test]
    async fn test_report_route() {
        let app = test_app(None).await;
        seed(&app).await;

        let query = json!({"search_type": "Author", "search_term": "austen", "columns": ["Title", "Location"]});
        let (status, body) = send(&app, "POST", "/report", Some(query)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["data"][0], json!(["Emma", "Oversized"]));

        let query = json!({"location": "All", "by_year": true});
        let (_, body) = send(&app, "POST", "/report", Some(query)).await;
        assert_eq!(body["years"], json!([]));
    }

    #[tokio::test]
    async fn test_browse_routes() {
        let app = test_app(None).await;
        seed(&app).await;

        let (_, body) = send(&app, "GET", "/browse/2/next", None).await;
        assert_eq!(body["BookCollectionID"], 1);

        let (status, _) = send(&app, "GET", "/browse/1/sideways", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = send(&app, "GET", "/browse_find?field=Title&term=emm", None).await;
        assert_eq!(body["BookCollectionID"], 2);

        let (status, _) = send(&app, "GET", "/browse_find?field=Author&term=tolkien", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_update_book_and_note_status() {
        let app = test_app(None).await;
        seed(&app).await;

        let edit = json!({"Title": "Dune", "Author": "Herbert, Frank", "Pages": 420, "ReadDate": "2023-02-02"});
        let (status, body) = send(&app, "POST", "/update_book/1", Some(edit)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["Pages"], 420);
        assert_eq!(body["LastRead"], "2023-02-02");

        let update = json!({"BookCollectionID": 1, "Recycled": "yes"});
        let (_, body) = send(&app, "POST", "/update_book_note_status", Some(update)).await;
        assert_eq!(body["update_book_note_status"]["Recycled"], true);

        let note = json!({"BookCollectionID": 1, "ReadDate": "2023-02-02", "ReadNote": "reread"});
        let (_, body) = send(&app, "POST", "/update_edit_read_note", Some(note)).await;
        assert_eq!(body["update_read_note"]["ReadNote"], "reread");
    }

    #[tokio::test]
    async fn test_estimate_routes() {
        let app = test_app(None).await;
        seed(&app).await;

        let (status, body) = send(&app, "PUT", "/add_book_estimate/1/100/2024-01-01", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["add_book_estimate"]["StartDate"], "2024-01-01");
        let record_id = body["add_book_estimate"]["RecordID"].as_i64().unwrap();

        for (date, page) in [("2024-01-02", 10), ("2024-01-03", 20)] {
            let entry = json!({"RecordID": record_id, "RecordDate": date, "Page": page});
            let (status, _) = send(&app, "POST", "/add_date_page", Some(entry)).await;
            assert_eq!(status, StatusCode::OK);
        }

        let (_, body) = send(&app, "GET", &format!("/estimate/{}", record_id), None).await;
        assert_eq!(body["estimate"], json!(["2024-01-11", "2024-01-11", "2024-01-11"]));

        let (_, body) = send(&app, "GET", "/record_set/1", None).await;
        assert_eq!(body["record_set"]["RecordID"], json!([["2024-01-01", record_id]]));
        let (status, indexed) = send(&app, "GET", "/record_set/1/-1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(indexed, body);

        let (_, body) = send(&app, "GET", &format!("/date_page_records/{}", record_id), None).await;
        assert_eq!(body["data"][1], json!(["2024-01-03", 20, 2]));

        let (_, body) = send(&app, "GET", &format!("/book_id_from_record_id/{}", record_id), None).await;
        assert_eq!(body["BookCollectionID"], 1);
    }

    #[tokio::test]
    async fn test_complete_records_window() {
        let app = test_app(None).await;
        seed(&app).await;

        let (_, body) = send(&app, "GET", "/complete_records_window/1/1", None).await;
        let window = body.as_array().unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0]["book"]["data"][0][1], "Dune");
    }

    #[tokio::test]
    async fn test_isbn_lookup_disabled_is_502() {
        let app = test_app(None).await;
        let (status, body) = send(&app, "POST", "/books_by_isbn", Some(json!({"isbn_list": ["9780141439587"]}))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().unwrap().contains("disabled"));
    }

    #[tokio::test]
    async fn test_api_key_required_when_configured() {
        let app = test_app(Some("secret")).await;

        let (status, _) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&app, "GET", "/tag_counts", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .uri("/tag_counts")
            .header("x-api-key", "secret")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

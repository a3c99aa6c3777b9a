use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{ApiError, SharedState};
use crate::payload::{
    parse_read_date, BookPayload, DatePagePayload, IsbnListPayload, NoteStatusPayload,
    ReadDatePayload, UpdateBookPayload,
};
use crate::query::{BookQuery, ReportQuery};
use crate::reports::recent_line;
use crate::store::{Direction, FindField, RowSet};

type ApiResult = Result<Json<Value>, ApiError>;

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn to_json<T: Serialize>(value: &T) -> ApiResult {
    serde_json::to_value(value)
        .map(Json)
        .map_err(|e| ApiError::Internal(format!("Failed to serialize response: {}", e)))
}

// ── Service ──────────────────────────────────────────────────────────

pub async fn index() -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn health_check(State(state): State<SharedState>) -> ApiResult {
    tracing::info!(route = "health", "Request received");
    state.library.health().await?;
    Ok(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.started.elapsed().as_secs(),
    })))
}

pub async fn configuration(State(state): State<SharedState>) -> Json<Value> {
    tracing::info!(route = "configuration", "Request received");
    let settings = state.library.settings();
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "recent_days": settings.recent_days,
        "unrecorded_read_year": settings.unrecorded_read_year,
        "default_location": settings.default_location,
        "location_order": settings.location_order,
        "window_size": settings.window_size,
        "isbn_lookup": state.library.isbn_enabled(),
    }))
}

// ── Catalog ──────────────────────────────────────────────────────────

pub async fn valid_locations(State(state): State<SharedState>) -> ApiResult {
    tracing::info!(route = "valid_locations", "Request received");
    let locations = state.library.valid_locations().await?;
    Ok(Json(json!({ "valid_locations": locations })))
}

pub async fn locations(State(state): State<SharedState>) -> ApiResult {
    tracing::info!(route = "locations", "Request received");
    let rows = state.library.locations().await?;
    to_json(&RowSet::from_rows(&rows))
}

pub async fn books_search(
    State(state): State<SharedState>,
    Query(params): Query<Vec<(String, String)>>,
) -> ApiResult {
    let query = BookQuery::from_pairs(params)?;
    tracing::info!(route = "books_search", filters = !query.is_empty(), "Request received");
    let books = state.library.search_books(&query).await?;
    to_json(&RowSet::from_rows(&books))
}

pub async fn add_books(
    State(state): State<SharedState>,
    Json(payloads): Json<Vec<BookPayload>>,
) -> ApiResult {
    tracing::info!(route = "add_books", count = payloads.len(), "Request received");
    let books = state.library.add_books(payloads).await?;
    Ok(Json(json!({ "add_books": books })))
}

pub async fn update_book(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateBookPayload>,
) -> ApiResult {
    tracing::info!(route = "update_book", id, "Request received");
    let view = state.library.update_book(id, payload, today()).await?;
    to_json(&view)
}

pub async fn update_book_note_status(
    State(state): State<SharedState>,
    Json(payload): Json<NoteStatusPayload>,
) -> ApiResult {
    tracing::info!(route = "update_book_note_status", id = payload.book_id, "Request received");
    let book = state.library.update_note_status(&payload).await?;
    Ok(Json(json!({ "update_book_note_status": book })))
}

// ── Record browser ───────────────────────────────────────────────────

pub async fn browse(
    State(state): State<SharedState>,
    Path((id, direction)): Path<(i64, String)>,
) -> ApiResult {
    let direction = Direction::parse(&direction)
        .ok_or_else(|| ApiError::bad_request("direction", "direction must be next or prev"))?;
    tracing::info!(route = "browse", id, ?direction, "Request received");
    let view = state.library.browse(id, direction).await?;
    to_json(&view)
}

#[derive(Debug, Deserialize)]
pub struct FindParams {
    pub field: FindField,
    pub term: String,
    /// Search starts after this id
    #[serde(default)]
    pub after: i64,
}

pub async fn browse_find(
    State(state): State<SharedState>,
    Query(params): Query<FindParams>,
) -> ApiResult {
    tracing::info!(route = "browse_find", field = ?params.field, after = params.after, "Request received");
    match state.library.find(params.field, &params.term, params.after).await? {
        Some(view) => to_json(&view),
        None => Err(ApiError::NotFound(format!("No book matches '{}'", params.term.trim()))),
    }
}

pub async fn complete_records_window(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> ApiResult {
    records_window(&state, id, None).await
}

pub async fn complete_records_window_sized(
    State(state): State<SharedState>,
    Path((id, window)): Path<(i64, i64)>,
) -> ApiResult {
    records_window(&state, id, Some(window)).await
}

async fn records_window(state: &SharedState, id: i64, window: Option<i64>) -> ApiResult {
    tracing::info!(route = "complete_records_window", id, ?window, "Request received");
    let records = state.library.complete_records_window(id, window).await?;
    to_json(&records)
}

// ── Reads ────────────────────────────────────────────────────────────

pub async fn add_read_dates(
    State(state): State<SharedState>,
    Json(payloads): Json<Vec<ReadDatePayload>>,
) -> ApiResult {
    tracing::info!(route = "add_read_dates", count = payloads.len(), "Request received");
    let results = state.library.add_read_dates(&payloads).await?;
    Ok(Json(json!({ "update_read_dates": results })))
}

pub async fn update_edit_read_note(
    State(state): State<SharedState>,
    Json(payload): Json<ReadDatePayload>,
) -> ApiResult {
    tracing::info!(route = "update_edit_read_note", id = payload.book_id, "Request received");
    let record = state.library.update_read_note(&payload).await?;
    Ok(Json(json!({ "update_read_note": record })))
}

pub async fn status_read(State(state): State<SharedState>, Path(id): Path<i64>) -> ApiResult {
    tracing::info!(route = "status_read", id, "Request received");
    let reads = state.library.read_status(id).await?;
    to_json(&RowSet::from_rows(&reads))
}

pub async fn books_read(State(state): State<SharedState>) -> ApiResult {
    tracing::info!(route = "books_read", "Request received");
    let rows = state.library.books_read(None).await?;
    to_json(&RowSet::from_rows(&rows))
}

pub async fn books_read_year(State(state): State<SharedState>, Path(year): Path<i32>) -> ApiResult {
    tracing::info!(route = "books_read", year, "Request received");
    let rows = state.library.books_read(Some(year)).await?;
    to_json(&RowSet::from_rows(&rows))
}

pub async fn summary_books_read_by_year(State(state): State<SharedState>) -> ApiResult {
    tracing::info!(route = "summary_books_read_by_year", "Request received");
    let rows = state.library.summary_by_year(None).await?;
    to_json(&RowSet::from_rows(&rows))
}

pub async fn summary_books_read_in_year(
    State(state): State<SharedState>,
    Path(year): Path<i32>,
) -> ApiResult {
    tracing::info!(route = "summary_books_read_by_year", year, "Request received");
    let rows = state.library.summary_by_year(Some(year)).await?;
    to_json(&RowSet::from_rows(&rows))
}

pub async fn year_rank(State(state): State<SharedState>) -> ApiResult {
    tracing::info!(route = "year_rank", "Request received");
    let rows = state.library.year_rank().await?;
    to_json(&RowSet::from_rows(&rows))
}

pub async fn year_progress(State(state): State<SharedState>) -> ApiResult {
    tracing::info!(route = "year_progress", "Request received");
    let points = state.library.year_progress().await?;
    to_json(&RowSet::from_rows(&points))
}

#[derive(Debug, Deserialize)]
pub struct RecentParams {
    pub days: Option<i64>,
}

#[derive(Serialize)]
struct RecentReads {
    #[serde(flatten)]
    table: RowSet,
    lines: Vec<String>,
}

pub async fn recent(
    State(state): State<SharedState>,
    Query(params): Query<RecentParams>,
) -> ApiResult {
    tracing::info!(route = "recent", days = ?params.days, "Request received");
    let reads = state.library.recent(params.days, today()).await?;
    to_json(&RecentReads {
        lines: reads.iter().map(recent_line).collect(),
        table: RowSet::from_rows(&reads),
    })
}

pub async fn report(
    State(state): State<SharedState>,
    Json(query): Json<ReportQuery>,
) -> ApiResult {
    tracing::info!(route = "report", search_type = ?query.search_type, by_year = query.by_year, "Request received");
    let output = state.library.report(&query).await?;
    to_json(&output)
}

// ── Tags ─────────────────────────────────────────────────────────────

pub async fn tags_for_book(State(state): State<SharedState>, Path(id): Path<i64>) -> ApiResult {
    tracing::info!(route = "tags_for_book", id, "Request received");
    let tags = state.library.tags_for_book(id).await?;
    Ok(Json(json!({ "BookID": id, "tag_list": tags })))
}

pub async fn add_tag(
    State(state): State<SharedState>,
    Path((id, tag)): Path<(i64, String)>,
) -> ApiResult {
    tracing::info!(route = "add_tag", id, tag = %tag, "Request received");
    let record = state.library.add_tag(id, &tag).await?;
    to_json(&record)
}

pub async fn tag_counts(State(state): State<SharedState>) -> ApiResult {
    tracing::info!(route = "tag_counts", "Request received");
    let counts = state.library.tag_counts(None).await?;
    to_json(&RowSet::from_rows(&counts))
}

pub async fn tag_counts_prefix(
    State(state): State<SharedState>,
    Path(prefix): Path<String>,
) -> ApiResult {
    tracing::info!(route = "tag_counts", prefix = %prefix, "Request received");
    let counts = state.library.tag_counts(Some(&prefix)).await?;
    to_json(&RowSet::from_rows(&counts))
}

pub async fn tags_search(
    State(state): State<SharedState>,
    Path(fragment): Path<String>,
) -> ApiResult {
    tracing::info!(route = "tags_search", fragment = %fragment, "Request received");
    let records = state.library.tags_search(&fragment).await?;
    to_json(&RowSet::from_rows(&records))
}

pub async fn update_tag_value(
    State(state): State<SharedState>,
    Path((old, new)): Path<(String, String)>,
) -> ApiResult {
    tracing::info!(route = "update_tag_value", old = %old, new = %new, "Request received");
    let updated = state.library.rename_tag(&old, &new).await?;
    Ok(Json(json!({ "old": old, "new": new, "updated": updated })))
}

pub async fn tag_from_category(
    State(state): State<SharedState>,
    Path((category, tag)): Path<(String, String)>,
) -> ApiResult {
    tracing::info!(route = "tag_from_category", category = %category, tag = %tag, "Request received");
    let result = state.library.tag_from_category(&tag, &category).await?;
    Ok(Json(json!({ "tag_from_category": result })))
}

pub async fn tag_maintenance(State(state): State<SharedState>) -> ApiResult {
    tracing::info!(route = "tag_maintenance", "Request received");
    let result = state.library.tag_maintenance().await?;
    to_json(&result)
}

// ── Reading estimates ────────────────────────────────────────────────

pub async fn add_book_estimate(
    State(state): State<SharedState>,
    Path((id, pages)): Path<(i64, i64)>,
) -> ApiResult {
    tracing::info!(route = "add_book_estimate", id, pages, "Request received");
    let record = state
        .library
        .add_reading_estimate(id, pages, None, today())
        .await?;
    Ok(Json(json!({ "add_book_estimate": record })))
}

pub async fn add_book_estimate_from(
    State(state): State<SharedState>,
    Path((id, pages, start)): Path<(i64, i64, String)>,
) -> ApiResult {
    tracing::info!(route = "add_book_estimate", id, pages, start = %start, "Request received");
    let start = parse_read_date(&start)
        .map_err(|_| ApiError::bad_request("StartDate", "StartDate must be a YYYY-MM-DD date"))?;
    let record = state
        .library
        .add_reading_estimate(id, pages, Some(start), today())
        .await?;
    Ok(Json(json!({ "add_book_estimate": record })))
}

pub async fn add_date_page(
    State(state): State<SharedState>,
    Json(payload): Json<DatePagePayload>,
) -> ApiResult {
    tracing::info!(route = "add_date_page", record_id = payload.record_id, "Request received");
    let entry = state.library.add_date_page(&payload, today()).await?;
    Ok(Json(json!({ "add_date_page": entry })))
}

pub async fn date_page_records(
    State(state): State<SharedState>,
    Path(record_id): Path<i64>,
) -> ApiResult {
    tracing::info!(route = "date_page_records", record_id, "Request received");
    let rows = state.library.date_page_records(record_id).await?;
    to_json(&RowSet::from_rows(&rows))
}

pub async fn estimate(State(state): State<SharedState>, Path(record_id): Path<i64>) -> ApiResult {
    tracing::info!(route = "estimate", record_id, "Request received");
    let estimate = state.library.estimate(record_id).await?;
    Ok(Json(json!({ "estimate": estimate.as_strings() })))
}

pub async fn record_set(State(state): State<SharedState>, Path(id): Path<i64>) -> ApiResult {
    tracing::info!(route = "record_set", id, "Request received");
    let set = state.library.record_set(id).await?;
    Ok(Json(json!({ "record_set": set })))
}

/// Older clients append an index to the path; the full set is returned regardless.
pub async fn record_set_indexed(
    State(state): State<SharedState>,
    Path((id, index)): Path<(i64, i64)>,
) -> ApiResult {
    tracing::info!(route = "record_set", id, index, "Request received");
    let set = state.library.record_set(id).await?;
    Ok(Json(json!({ "record_set": set })))
}

pub async fn book_id_from_record_id(
    State(state): State<SharedState>,
    Path(record_id): Path<i64>,
) -> ApiResult {
    tracing::info!(route = "book_id_from_record_id", record_id, "Request received");
    let book_id = state.library.book_id_from_record_id(record_id).await?;
    Ok(Json(json!({ "BookCollectionID": book_id })))
}

// ── ISBN lookup ──────────────────────────────────────────────────────

pub async fn books_by_isbn(
    State(state): State<SharedState>,
    Json(payload): Json<IsbnListPayload>,
) -> ApiResult {
    tracing::info!(route = "books_by_isbn", count = payload.isbn_list.len(), "Request received");
    let results = state.library.books_by_isbn(&payload.isbn_list).await?;
    to_json(&results)
}

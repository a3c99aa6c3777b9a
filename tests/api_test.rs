use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use booktrack::api::{build_router, AppState};
use booktrack::library::{Library, LibrarySettings};
use booktrack::store::sqlite::SqliteBookStore;
use chrono::{Duration, Local};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn app() -> Router {
    let store = SqliteBookStore::in_memory().await.unwrap();
    let library = Library::new(Arc::new(store), LibrarySettings::default(), None);
    build_router(AppState::new(library, Some("k3y".to_string())))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-api-key", "k3y");
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
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_catalog_workflow() {
    let app = app().await;

    // string-valued fields, as the desktop client sends them
    let books = json!([
        {"Title": "Cannery Row", "Author": "Steinbeck, John", "Pages": "181",
         "CopyrightDate": "1945", "CoverType": "Soft", "Recycled": "0", "ISBNNumber": "0140177388"},
        {"Title": "East of Eden", "Author": "Steinbeck, John", "Pages": "601", "CoverType": "Hardcover"},
        {"Title": "Middlemarch", "Author": "Eliot, George", "Pages": "880", "CoverType": "Digital"}
    ]);
    let (status, body) = call(&app, "POST", "/add_books", Some(books)).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<i64> = body["add_books"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["BookCollectionID"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2, 3]);

    let (_, body) = call(&app, "GET", "/books_search?Author=steinbeck&Title=eden", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0][6], "Hard");

    let (_, body) = call(&app, "GET", "/valid_locations", None).await;
    assert_eq!(body["valid_locations"], json!(["Main Collection"]));

    call(&app, "PUT", "/add_tag/1/California", None).await;
    call(&app, "PUT", "/add_tag/2/california", None).await;
    call(&app, "PUT", "/add_tag/3/victorian", None).await;

    let (_, body) = call(&app, "GET", "/books_search?Tags=calif", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let recently = (Local::now().date_naive() - Duration::days(10)).format("%Y-%m-%d").to_string();
    let reads = json!([
        {"BookCollectionID": 1, "ReadDate": "2019-06-01"},
        {"BookCollectionID": 3, "ReadDate": recently.clone(), "ReadNote": "slow going"}
    ]);
    let (status, _) = call(&app, "POST", "/add_read_dates", Some(reads)).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = call(&app, "GET", "/recent", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert!(body["lines"][0].as_str().unwrap().contains("Middlemarch"));

    let unread = json!({"unread_only": true, "columns": ["Title"]});
    let (_, body) = call(&app, "POST", "/report", Some(unread)).await;
    assert_eq!(body["data"], json!([["East of Eden"]]));

    let physical = json!({"exclude_digital": true, "search_type": "Tag", "search_term": "calif", "columns": ["Title", "Pages"], "order": "Title"});
    let (_, body) = call(&app, "POST", "/report", Some(physical)).await;
    assert_eq!(body["count"], 2);
    assert_eq!(body["total_pages"], 782);
}

#[tokio::test]
async fn test_reading_progress_workflow() {
    let app = app().await;
    call(&app, "POST", "/add_books", Some(json!([{"Title": "Middlemarch", "Author": "Eliot, George", "Pages": 880}]))).await;

    let (status, body) = call(&app, "PUT", "/add_book_estimate/1/800/2024-03-01", None).await;
    assert_eq!(status, StatusCode::OK);
    let record_id = body["add_book_estimate"]["RecordID"].as_i64().unwrap();

    let (status, body) = call(&app, "GET", &format!("/estimate/{}", record_id), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    for (date, page) in [("2024-03-02", 40), ("2024-03-03", 80), ("2024-03-05", 160)] {
        let entry = json!({"RecordID": record_id, "RecordDate": date, "Page": page});
        call(&app, "POST", "/add_date_page", Some(entry)).await;
    }

    let (status, body) = call(&app, "GET", &format!("/estimate/{}", record_id), None).await;
    assert_eq!(status, StatusCode::OK);
    // steady 40 pages a day reaches page 800 on day 20
    assert_eq!(body["estimate"], json!(["2024-03-21", "2024-03-21", "2024-03-21"]));

    let (status, _) = call(&app, "PUT", "/add_book_estimate/9/100", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rejects_wrong_api_key() {
    let app = app().await;
    let request = Request::builder()
        .uri("/books_read")
        .header("x-api-key", "wrong")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

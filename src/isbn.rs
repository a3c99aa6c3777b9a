/// ISBN lookup against isbndb
///
/// Requires BOOKTRACK_ISBN__API_KEY. The key is sent as the raw Authorization
/// header value, which is what isbndb expects.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::errors::BooksError;
use crate::store::{CoverType, NewBook};

/// Book record as returned under `book` by isbndb.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IsbnBook {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub isbn: String,
    #[serde(default)]
    pub isbn13: String,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub pages: Option<i64>,
    /// Year or full date; isbndb sends either a string or a number.
    #[serde(default)]
    pub date_published: Option<Value>,
    #[serde(default)]
    pub binding: Option<String>,
}

#[derive(Deserialize)]
struct LookupResponse {
    book: IsbnBook,
}

#[async_trait]
pub trait IsbnLookup: Send + Sync {
    async fn lookup(&self, isbn: &str) -> Result<IsbnBook, BooksError>;
}

/// isbndb-backed lookup.
pub struct IsbndbClient {
    client: reqwest::Client,
    url_template: String,
    api_key: String,
}

impl IsbndbClient {
    /// # Errors
    /// Returns `BooksError::Config` if api_key is empty.
    pub fn new(url_template: String, api_key: String) -> Result<Self, BooksError> {
        if api_key.trim().is_empty() {
            return Err(BooksError::Config(
                "ISBN lookup needs an API key. Set BOOKTRACK_ISBN__API_KEY in the environment".to_string(),
            ));
        }
        Ok(IsbndbClient {
            client: reqwest::Client::new(),
            url_template,
            api_key,
        })
    }

    fn url_for(&self, isbn: &str) -> String {
        self.url_template.replace("{}", isbn)
    }
}

#[async_trait]
impl IsbnLookup for IsbndbClient {
    async fn lookup(&self, isbn: &str) -> Result<IsbnBook, BooksError> {
        let response = self
            .client
            .get(self.url_for(isbn))
            .header("Authorization", &self.api_key)
            .send()
            .await
            .map_err(|e| BooksError::Lookup(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(BooksError::Lookup(format!("isbndb returned {}: {}", status, body)));
        }

        let parsed: LookupResponse = response
            .json()
            .await
            .map_err(|e| BooksError::Lookup(format!("Failed to parse isbndb response: {}", e)))?;
        Ok(parsed.book)
    }
}

static ISBN_SHAPE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^(\d{9}[\dX]|\d{13})$"));

/// Keep digits and a trailing X; the result must be an ISBN-10 or ISBN-13.
pub fn normalize_isbn(raw: &str) -> Result<String, BooksError> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == 'x' || *c == 'X')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let shape = ISBN_SHAPE
        .as_ref()
        .map_err(|e| BooksError::Internal(e.to_string()))?;
    if shape.is_match(&cleaned) {
        Ok(cleaned)
    } else {
        Err(BooksError::Validation {
            message: format!("'{}' is not an ISBN-10 or ISBN-13", raw),
            field: Some("isbn".to_string()),
        })
    }
}

fn published_date(value: Option<&Value>) -> Option<NaiveDate> {
    let text = match value? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let text: String = text.chars().take(10).collect();
    if text.len() == 4 {
        let year = text.parse::<i32>().ok()?;
        return NaiveDate::from_ymd_opt(year, 1, 1);
    }
    NaiveDate::parse_from_str(&text, "%Y-%m-%d").ok()
}

fn cover_from_binding(binding: Option<&str>) -> CoverType {
    let binding = binding.unwrap_or_default().to_lowercase();
    if binding.contains("kindle") || binding.contains("ebook") || binding.contains("digital") {
        CoverType::Digital
    } else if binding.starts_with("hard") || binding.contains("library binding") {
        CoverType::Hard
    } else {
        CoverType::Soft
    }
}

/// Map an isbndb record onto a catalog entry.
pub fn to_new_book(book: &IsbnBook, default_location: &str) -> NewBook {
    NewBook {
        title: book.title.clone(),
        author: book.authors.first().cloned().unwrap_or_default(),
        copyright_date: published_date(book.date_published.as_ref()),
        isbn: book.isbn.clone(),
        isbn13: book.isbn13.clone(),
        publisher: book
            .publisher
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| "unknown".to_string()),
        cover_type: cover_from_binding(book.binding.as_deref()),
        pages: book.pages.unwrap_or(0).max(0),
        category: String::new(),
        note: String::new(),
        recycled: false,
        location: default_location.to_string(),
    }
}

use rmcp::{
    ServerHandler,
    tool,
    model::{
        ServerCapabilities, Implementation, ProtocolVersion, CallToolResult,
        RawResource, ListResourcesResult, ReadResourceResult, ResourceContents,
        ReadResourceRequestParams, AnnotateAble,
    },
    handler::server::wrapper::Parameters,
    service::{RequestContext, RoleServer},
    ErrorData as McpError,
};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::errors::BooksError;
use crate::library::Library;
use crate::payload::ReadDatePayload;
use crate::query::{BookQuery, ReportQuery};
use crate::reports::recent_line;
use crate::store::{ReadBook, RowSet};

pub struct BooksService {
    library: Arc<Library>,
    start_time: Instant,
}

impl BooksService {
    pub fn new(library: Arc<Library>) -> Self {
        Self {
            library,
            start_time: Instant::now(),
        }
    }

    fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Render a readable resource URI as text.
    async fn resource_text(&self, uri: &str) -> Result<String, McpError> {
        let url = Url::parse(uri).map_err(|e| {
            McpError::resource_not_found(format!("Invalid resource URI {}: {}", uri, e), None)
        })?;

        let text = match (url.scheme(), url.host_str().unwrap_or_default()) {
            ("books", "recent") => {
                let reads = self.library.recent(None, today()).await.map_err(resource_error)?;
                if reads.is_empty() {
                    "No books read recently. Use add_read_date to record a read.".to_string()
                } else {
                    format_reads_text(&reads)
                }
            }
            ("books", "summary") => {
                let rows = self.library.summary_by_year(None).await.map_err(resource_error)?;
                to_text(&RowSet::from_rows(&rows))?
            }
            ("books", "search") => {
                let query = BookQuery::from_pairs(url.query_pairs()).map_err(resource_error)?;
                if query.is_empty() {
                    return Err(McpError::invalid_params(
                        "books://search needs at least one Field=value parameter",
                        None,
                    ));
                }
                let books = self.library.search_books(&query).await.map_err(resource_error)?;
                to_text(&RowSet::from_rows(&books))?
            }
            ("tags", "search") => {
                // tags://search?fragment=text or tags://search?text
                let mut pairs = url.query_pairs();
                let fragment = match pairs.clone().find(|(k, _)| k == "fragment") {
                    Some((_, v)) => v.into_owned(),
                    None => pairs.next().map(|(k, _)| k.into_owned()).unwrap_or_default(),
                };
                let records = self.library.tags_search(&fragment).await.map_err(resource_error)?;
                to_text(&RowSet::from_rows(&records))?
            }
            _ => {
                return Err(McpError::resource_not_found(
                    format!("Resource not found: {}", uri),
                    None,
                ))
            }
        };
        Ok(text)
    }
}

fn today() -> chrono::NaiveDate {
    chrono::Local::now().date_naive()
}

// Parameter structs

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct SearchBooksParams {
    /// Field filters, e.g. {"Author": "steinbeck", "Tags": "fiction"}. Supported fields:
    /// BookCollectionID, Title, Author, ISBNNumber, ISBNNumber13, PublisherName, Category,
    /// Location, CoverType, Note, Recycled, Tags, ReadDate
    pub filters: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct GetBookParams {
    /// BookCollectionID of the book (required)
    pub id: i64,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct SearchTagsParams {
    /// Text contained in the tag (required)
    pub fragment: String,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct AddTagParams {
    /// BookCollectionID of the book (required)
    pub book_id: i64,
    /// Tag text; stored trimmed and lower-cased (required)
    pub tag: String,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct AddReadDateParams {
    /// BookCollectionID of the book (required)
    pub book_id: i64,
    /// Date the book was finished, YYYY-MM-DD (required)
    pub read_date: String,
    /// Optional note about this reading
    pub read_note: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct SummaryParams {
    /// Restrict to one year (optional)
    pub year: Option<i32>,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct RecentReadsParams {
    /// Look back this many days (default: configured recent window)
    pub days: Option<i64>,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct EstimateParams {
    /// RecordID of a reading record (required)
    pub record_id: i64,
}

// Helper: convert BooksError to CallToolResult with isError: true
fn books_error_to_result(err: BooksError) -> CallToolResult {
    match err {
        e @ BooksError::NotFound { .. } => CallToolResult::structured_error(json!({
            "isError": true,
            "error": e.to_string(),
            "hint": "Use search_books to find valid BookCollectionIDs"
        })),
        BooksError::Validation { message, field } => {
            let mut obj = json!({
                "isError": true,
                "error": message,
            });
            if let Some(f) = field {
                obj["field"] = json!(f);
            }
            CallToolResult::structured_error(obj)
        }
        other => CallToolResult::structured_error(json!({
            "isError": true,
            "error": other.to_string()
        })),
    }
}

fn rows_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let value = serde_json::to_value(value)
        .map_err(|e| McpError::internal_error(format!("Failed to serialize result: {}", e), None))?;
    Ok(CallToolResult::structured(value))
}

// Tool implementations
#[rmcp::tool_router]
impl BooksService {
    #[tool(description = "Search the book catalog by field filters. Values match by substring (ReadDate by prefix, BookCollectionID and Recycled exactly). Returns {header, data}.")]
    async fn search_books(
        &self,
        Parameters(params): Parameters<SearchBooksParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(
            tool = "search_books",
            fields = ?params.filters.keys().collect::<Vec<_>>(),
            "Tool called"
        );

        let query = match BookQuery::from_pairs(&params.filters) {
            Ok(q) => q,
            Err(e) => return Ok(books_error_to_result(e)),
        };
        if query.is_empty() {
            return Ok(CallToolResult::structured_error(json!({
                "isError": true,
                "error": "Field 'filters' needs at least one non-empty value",
                "field": "filters"
            })));
        }

        match self.library.search_books(&query).await {
            Ok(books) => rows_result(&RowSet::from_rows(&books)),
            Err(e) => Ok(books_error_to_result(e)),
        }
    }

    #[tool(description = "Retrieve one book by BookCollectionID with its tags and read dates.")]
    async fn get_book(
        &self,
        Parameters(params): Parameters<GetBookParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "get_book", id = params.id, "Tool called");

        match self.library.record(params.id).await {
            Ok(view) => rows_result(&view),
            Err(e) => Ok(books_error_to_result(e)),
        }
    }

    #[tool(description = "Find tags containing a text fragment. Returns {header, data} rows of BookCollectionID, TagID, Tag.")]
    async fn search_tags(
        &self,
        Parameters(params): Parameters<SearchTagsParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "search_tags", fragment = %params.fragment, "Tool called");

        if params.fragment.trim().is_empty() {
            return Ok(CallToolResult::structured_error(json!({
                "isError": true,
                "error": "Field 'fragment' is required and cannot be empty",
                "field": "fragment"
            })));
        }

        match self.library.tags_search(&params.fragment).await {
            Ok(records) => rows_result(&RowSet::from_rows(&records)),
            Err(e) => Ok(books_error_to_result(e)),
        }
    }

    #[tool(description = "Tag a book. Adding a tag the book already has returns the existing tag.")]
    async fn add_tag(
        &self,
        Parameters(params): Parameters<AddTagParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "add_tag", book_id = params.book_id, tag = %params.tag, "Tool called");

        match self.library.add_tag(params.book_id, &params.tag).await {
            Ok(record) => rows_result(&record),
            Err(e) => Ok(books_error_to_result(e)),
        }
    }

    #[tool(description = "Record that a book was read on a date (YYYY-MM-DD), with an optional note.")]
    async fn add_read_date(
        &self,
        Parameters(params): Parameters<AddReadDateParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(
            tool = "add_read_date",
            book_id = params.book_id,
            read_date = %params.read_date,
            "Tool called"
        );

        let payload = ReadDatePayload {
            book_id: params.book_id,
            read_date: params.read_date,
            read_note: params.read_note,
        };
        match self.library.add_read_dates(std::slice::from_ref(&payload)).await {
            Ok(results) => rows_result(&json!({ "update_read_dates": results })),
            Err(e) => Ok(books_error_to_result(e)),
        }
    }

    #[tool(description = "Pages and books read per year, ascending. Reads with an unrecorded date are left out.")]
    async fn summary_by_year(
        &self,
        Parameters(params): Parameters<SummaryParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "summary_by_year", year = ?params.year, "Tool called");

        match self.library.summary_by_year(params.year).await {
            Ok(rows) => rows_result(&RowSet::from_rows(&rows)),
            Err(e) => Ok(books_error_to_result(e)),
        }
    }

    #[tool(description = "Books read in the last N days (default 100), oldest first.")]
    async fn recent_reads(
        &self,
        Parameters(params): Parameters<RecentReadsParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "recent_reads", days = ?params.days, "Tool called");

        match self.library.recent(params.days, today()).await {
            Ok(reads) => rows_result(&json!({
                "count": reads.len(),
                "lines": reads.iter().map(recent_line).collect::<Vec<_>>(),
            })),
            Err(e) => Ok(books_error_to_result(e)),
        }
    }

    #[tool(description = "Run a catalog report: filter by Title, Author, ISBNNumber, ISBNNumber13 or Tag, choose columns and order, optionally grouped by read year.")]
    async fn report(
        &self,
        Parameters(query): Parameters<ReportQuery>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(
            tool = "report",
            search_type = ?query.search_type,
            by_year = query.by_year,
            "Tool called"
        );

        match self.library.report(&query).await {
            Ok(output) => rows_result(&output),
            Err(e) => Ok(books_error_to_result(e)),
        }
    }

    #[tool(description = "Estimate the finish date of a reading record from its daily page entries. Returns [finish, earliest, latest].")]
    async fn estimate_completion(
        &self,
        Parameters(params): Parameters<EstimateParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "estimate_completion", record_id = params.record_id, "Tool called");

        match self.library.estimate(params.record_id).await {
            Ok(estimate) => rows_result(&json!({ "estimate": estimate.as_strings() })),
            Err(e) => Ok(books_error_to_result(e)),
        }
    }

    #[tool(description = "Check server health and status")]
    async fn health_check(
        &self,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "health_check", "Tool called");

        if let Err(e) = self.library.health().await {
            return Ok(books_error_to_result(e));
        }

        let response = json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": self.uptime_seconds(),
        });

        Ok(CallToolResult::structured(response))
    }
}

// Helper: format reads into human-readable text for resource consumption
fn format_reads_text(reads: &[ReadBook]) -> String {
    reads.iter().map(recent_line).collect::<Vec<_>>().join("\n")
}

fn to_text<T: Serialize>(value: &T) -> Result<String, McpError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(e.to_string(), None))
}

fn resource_error(e: BooksError) -> McpError {
    match e {
        BooksError::Validation { .. } => McpError::invalid_params(e.to_string(), None),
        e => McpError::resource_not_found(e.to_string(), None),
    }
}

fn text_resource(uri: &str, name: &str, title: &str, description: &str) -> rmcp::model::Resource {
    RawResource {
        uri: uri.to_string(),
        name: name.to_string(),
        title: Some(title.to_string()),
        description: Some(description.to_string()),
        mime_type: Some("text/plain".to_string()),
        size: None,
        icons: None,
        meta: None,
    }
    .no_annotation()
}

// ServerHandler implementation
#[rmcp::tool_handler(router = Self::tool_router())]
impl ServerHandler for BooksService {
    fn get_info(&self) -> rmcp::model::InitializeResult {
        rmcp::model::InitializeResult {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: "booktrack".to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: Some("Personal book collection and reading tracker".to_string()),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Book collection server. Tools: search_books, get_book, search_tags, add_tag, add_read_date, summary_by_year, recent_reads, report, estimate_completion, health_check. Resources: books://recent (recent reads), books://summary (pages read per year), books://search?Field=value, tags://search?text.".to_string()
            ),
        }
    }

    async fn list_resources(
        &self,
        _request: Option<rmcp::model::PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        Ok(ListResourcesResult {
            meta: None,
            resources: vec![
                text_resource(
                    "books://recent",
                    "recent",
                    "Recent Reads",
                    "Books read within the configured recent window",
                ),
                text_resource(
                    "books://summary",
                    "summary",
                    "Reading Summary",
                    "Pages and books read per year",
                ),
            ],
            next_cursor: None,
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        let text = self.resource_text(&request.uri).await?;
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(text, request.uri)],
        })
    }
}

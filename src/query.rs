/// Search and report query building
///
/// Turns search forms into WHERE clauses with `?` placeholders plus the values
/// to bind. Column names and sort orders only ever come from the closed enums
/// below; user text is always bound, never spliced into SQL. Every clause
/// assumes `book_collection` is aliased `b`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::errors::BooksError;
use crate::payload::parse_flag;

/// A value bound to a `?` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Int(i64),
}

/// Accumulated AND-ed conditions and their bind values, in placeholder order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereClause {
    conditions: Vec<String>,
    binds: Vec<SqlValue>,
}

impl WhereClause {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, condition: impl Into<String>, binds: impl IntoIterator<Item = SqlValue>) {
        self.conditions.push(condition.into());
        self.binds.extend(binds);
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// `WHERE a AND b`, or an empty string when there are no conditions.
    pub fn to_sql(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.conditions.join(" AND "))
        }
    }

    /// Conditions joined with AND, for appending to an existing WHERE.
    pub fn and_sql(&self) -> String {
        self.conditions
            .iter()
            .map(|c| format!(" AND {}", c))
            .collect()
    }

    pub fn binds(&self) -> &[SqlValue] {
        &self.binds
    }
}

/// Escape LIKE wildcards so user text matches literally (used with `ESCAPE '\'`).
pub fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub fn like_contains(term: &str) -> SqlValue {
    SqlValue::Text(format!("%{}%", escape_like(term)))
}

pub fn like_prefix(term: &str) -> SqlValue {
    SqlValue::Text(format!("{}%", escape_like(term)))
}

const TAG_MATCH: &str =
    "EXISTS (SELECT 1 FROM tags t WHERE t.book_id = b.book_collection_id AND t.tag LIKE ? ESCAPE '\\')";

const READ_DATE_MATCH: &str =
    "EXISTS (SELECT 1 FROM books_read r WHERE r.book_collection_id = b.book_collection_id AND r.read_date LIKE ? ESCAPE '\\')";

const NEVER_READ: &str =
    "NOT EXISTS (SELECT 1 FROM books_read r WHERE r.book_collection_id = b.book_collection_id)";

// ── books_search ──────────────────────────────────────────────────────

/// Fields accepted by book search, named as the collection names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKey {
    BookCollectionId,
    Title,
    Author,
    IsbnNumber,
    IsbnNumber13,
    PublisherName,
    Category,
    Location,
    CoverType,
    Note,
    Recycled,
    Tags,
    ReadDate,
}

pub const SEARCH_KEYS: [&str; 13] = [
    "BookCollectionID",
    "Title",
    "Author",
    "ISBNNumber",
    "ISBNNumber13",
    "PublisherName",
    "Category",
    "Location",
    "CoverType",
    "Note",
    "Recycled",
    "Tags",
    "ReadDate",
];

impl SearchKey {
    pub fn from_param(name: &str) -> Option<SearchKey> {
        let key = match name {
            "BookCollectionID" => SearchKey::BookCollectionId,
            "Title" => SearchKey::Title,
            "Author" => SearchKey::Author,
            "ISBNNumber" => SearchKey::IsbnNumber,
            "ISBNNumber13" => SearchKey::IsbnNumber13,
            "PublisherName" => SearchKey::PublisherName,
            "Category" => SearchKey::Category,
            "Location" => SearchKey::Location,
            "CoverType" => SearchKey::CoverType,
            "Note" => SearchKey::Note,
            "Recycled" => SearchKey::Recycled,
            "Tags" => SearchKey::Tags,
            "ReadDate" => SearchKey::ReadDate,
            _ => return None,
        };
        Some(key)
    }

    fn text_column(&self) -> Option<&'static str> {
        match self {
            SearchKey::Title => Some("b.title"),
            SearchKey::Author => Some("b.author"),
            SearchKey::IsbnNumber => Some("b.isbn_number"),
            SearchKey::IsbnNumber13 => Some("b.isbn_number13"),
            SearchKey::PublisherName => Some("b.publisher_name"),
            SearchKey::Category => Some("b.category"),
            SearchKey::Location => Some("b.location"),
            SearchKey::CoverType => Some("b.cover_type"),
            SearchKey::Note => Some("b.note"),
            _ => None,
        }
    }
}

/// Field filters for book search. Values are matched by substring except
/// BookCollectionID and Recycled (exact) and ReadDate (prefix).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookQuery {
    filters: Vec<(SearchKey, String)>,
}

impl BookQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from request parameters. Blank values are skipped; unknown names are rejected.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<BookQuery, BooksError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut query = BookQuery::new();
        for (name, value) in pairs {
            let name = name.as_ref();
            let value = value.as_ref().trim();
            let key = SearchKey::from_param(name).ok_or_else(|| BooksError::Validation {
                message: format!(
                    "Unknown search field '{}'. Supported: {}",
                    name,
                    SEARCH_KEYS.join(", ")
                ),
                field: Some(name.to_string()),
            })?;
            if !value.is_empty() {
                query.filters.push((key, value.to_string()));
            }
        }
        Ok(query)
    }

    pub fn with(mut self, key: SearchKey, value: impl Into<String>) -> Self {
        self.filters.push((key, value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn to_where(&self) -> Result<WhereClause, BooksError> {
        let mut clause = WhereClause::new();
        for (key, value) in &self.filters {
            match key {
                SearchKey::BookCollectionId => {
                    let id = value.parse::<i64>().map_err(|_| {
                        BooksError::validation("BookCollectionID", "BookCollectionID must be an integer")
                    })?;
                    clause.push("b.book_collection_id = ?", [SqlValue::Int(id)]);
                }
                SearchKey::Recycled => {
                    let flag = parse_flag(&serde_json::Value::String(value.clone()), "Recycled")?;
                    clause.push("b.recycled = ?", [SqlValue::Int(flag as i64)]);
                }
                SearchKey::Tags => clause.push(TAG_MATCH, [like_contains(value)]),
                SearchKey::ReadDate => clause.push(READ_DATE_MATCH, [like_prefix(value)]),
                other => {
                    // every remaining key has a text column
                    if let Some(column) = other.text_column() {
                        clause.push(format!("{} LIKE ? ESCAPE '\\'", column), [like_contains(value)]);
                    }
                }
            }
        }
        Ok(clause)
    }
}

// ── reports ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum ReportSearchType {
    Author,
    #[default]
    Title,
    #[serde(rename = "ISBNNumber")]
    IsbnNumber,
    #[serde(rename = "ISBNNumber13")]
    IsbnNumber13,
    Tag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum ReportOrder {
    #[default]
    #[serde(rename = "Author, Title")]
    AuthorTitle,
    Title,
    #[serde(rename = "CopyrightDate, Author")]
    CopyrightDateAuthor,
    ReadDate,
    #[serde(rename = "Location, Author")]
    LocationAuthor,
}

impl ReportOrder {
    /// ORDER BY body. `read_date` is the alias every report query selects.
    pub fn sql(&self) -> &'static str {
        match self {
            ReportOrder::AuthorTitle => "b.author, b.title, b.book_collection_id",
            ReportOrder::Title => "b.title, b.book_collection_id",
            ReportOrder::CopyrightDateAuthor => "b.copyright_date, b.author, b.book_collection_id",
            ReportOrder::ReadDate => "read_date, b.book_collection_id",
            ReportOrder::LocationAuthor => "b.location, b.author, b.book_collection_id",
        }
    }
}

/// Display columns a report can project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ReportColumn {
    Author,
    Title,
    #[serde(rename = "ISBNNumber")]
    IsbnNumber,
    #[serde(rename = "ISBNNumber13")]
    IsbnNumber13,
    PublisherName,
    Pages,
    CopyrightDate,
    ReadDate,
    Location,
    Recycled,
    CoverType,
}

impl ReportColumn {
    pub fn name(&self) -> &'static str {
        match self {
            ReportColumn::Author => "Author",
            ReportColumn::Title => "Title",
            ReportColumn::IsbnNumber => "ISBNNumber",
            ReportColumn::IsbnNumber13 => "ISBNNumber13",
            ReportColumn::PublisherName => "PublisherName",
            ReportColumn::Pages => "Pages",
            ReportColumn::CopyrightDate => "CopyrightDate",
            ReportColumn::ReadDate => "ReadDate",
            ReportColumn::Location => "Location",
            ReportColumn::Recycled => "Recycled",
            ReportColumn::CoverType => "CoverType",
        }
    }
}

fn default_columns() -> Vec<ReportColumn> {
    vec![ReportColumn::Author, ReportColumn::Title]
}

/// The "Create Reports" form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReportQuery {
    #[serde(default)]
    pub search_type: ReportSearchType,
    /// Substring to match in the search_type field
    #[serde(default)]
    pub search_term: String,
    /// Restrict to one location ("All" or absent for every location)
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub exclude_recycled: bool,
    #[serde(default)]
    pub exclude_digital: bool,
    /// Only books with no recorded read
    #[serde(default)]
    pub unread_only: bool,
    #[serde(default)]
    pub order: ReportOrder,
    #[serde(default = "default_columns")]
    pub columns: Vec<ReportColumn>,
    /// Group by year read instead of listing books once
    #[serde(default)]
    pub by_year: bool,
}

impl Default for ReportQuery {
    fn default() -> Self {
        ReportQuery {
            search_type: ReportSearchType::default(),
            search_term: String::new(),
            location: None,
            exclude_recycled: false,
            exclude_digital: false,
            unread_only: false,
            order: ReportOrder::default(),
            columns: default_columns(),
            by_year: false,
        }
    }
}

impl ReportQuery {
    pub fn to_where(&self) -> WhereClause {
        let mut clause = WhereClause::new();
        let term = self.search_term.trim();

        match self.search_type {
            // an empty tag term still requires the book to carry some tag
            ReportSearchType::Tag => clause.push(TAG_MATCH, [like_contains(term)]),
            _ if term.is_empty() => {}
            search_type => {
                let column = match search_type {
                    ReportSearchType::Author => "b.author",
                    ReportSearchType::IsbnNumber => "b.isbn_number",
                    ReportSearchType::IsbnNumber13 => "b.isbn_number13",
                    _ => "b.title",
                };
                clause.push(format!("{} LIKE ? ESCAPE '\\'", column), [like_contains(term)]);
            }
        }

        if let Some(location) = self.location.as_deref().map(str::trim) {
            if !location.is_empty() && !location.eq_ignore_ascii_case("all") {
                clause.push("b.location = ?", [SqlValue::Text(location.to_string())]);
            }
        }
        if self.exclude_recycled {
            clause.push("b.recycled = 0", []);
        }
        if self.exclude_digital {
            clause.push("b.cover_type != 'Digital'", []);
        }
        if self.unread_only {
            clause.push(NEVER_READ, []);
        }
        clause
    }
}

/// Book store abstraction layer
///
/// Provides the BookStore trait and the catalog types it persists: books, read
/// records, tags, and reading-progress records used for completion estimates.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::BooksError;
use crate::query::{BookQuery, ReportQuery};

pub mod sqlite;

/// Physical (or not) form of a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CoverType {
    Hard,
    #[default]
    Soft,
    Digital,
}

impl CoverType {
    /// Parse by the first four letters, case-insensitively ("hardcover" -> Hard).
    pub fn parse(s: &str) -> Option<CoverType> {
        let prefix: String = s.trim().chars().take(4).collect::<String>().to_lowercase();
        match prefix.as_str() {
            "hard" => Some(CoverType::Hard),
            "soft" => Some(CoverType::Soft),
            "digi" => Some(CoverType::Digital),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CoverType::Hard => "Hard",
            CoverType::Soft => "Soft",
            CoverType::Digital => "Digital",
        }
    }
}

/// A catalog entry. Serialized with the collection's historical column names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    #[serde(rename = "BookCollectionID")]
    pub id: i64,
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Author")]
    pub author: String,
    #[serde(rename = "CopyrightDate")]
    pub copyright_date: Option<NaiveDate>,
    #[serde(rename = "ISBNNumber")]
    pub isbn: String,
    #[serde(rename = "PublisherName")]
    pub publisher: String,
    #[serde(rename = "CoverType")]
    pub cover_type: CoverType,
    #[serde(rename = "Pages")]
    pub pages: i64,
    #[serde(rename = "Category")]
    pub category: String,
    #[serde(rename = "Note")]
    pub note: String,
    #[serde(rename = "Recycled")]
    pub recycled: bool,
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "ISBNNumber13")]
    pub isbn13: String,
}

/// Input for creating a book, or for replacing every editable field of one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBook {
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Author")]
    pub author: String,
    #[serde(rename = "CopyrightDate")]
    pub copyright_date: Option<NaiveDate>,
    #[serde(rename = "ISBNNumber")]
    pub isbn: String,
    #[serde(rename = "ISBNNumber13")]
    pub isbn13: String,
    #[serde(rename = "PublisherName")]
    pub publisher: String,
    #[serde(rename = "CoverType")]
    pub cover_type: CoverType,
    #[serde(rename = "Pages")]
    pub pages: i64,
    #[serde(rename = "Category")]
    pub category: String,
    #[serde(rename = "Note")]
    pub note: String,
    #[serde(rename = "Recycled")]
    pub recycled: bool,
    #[serde(rename = "Location")]
    pub location: String,
}

/// Partial update of a book's note and recycled flag.
///
/// All fields are optional; only Some fields are written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoteStatusUpdate {
    pub note: Option<String>,
    pub recycled: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Prev,
}

impl Direction {
    pub fn parse(s: &str) -> Option<Direction> {
        match s.trim().to_lowercase().as_str() {
            "next" | ">" | "forward" => Some(Direction::Next),
            "prev" | "previous" | "<" | "back" => Some(Direction::Prev),
            _ => None,
        }
    }
}

/// Fields the record browser can search with "Find".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FindField {
    Title,
    Author,
}

impl FindField {
    pub fn column(&self) -> &'static str {
        match self {
            FindField::Title => "title",
            FindField::Author => "author",
        }
    }
}

/// One reading of a book. (book, date) is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadRecord {
    #[serde(rename = "BookCollectionID")]
    pub book_id: i64,
    #[serde(rename = "ReadDate")]
    pub read_date: NaiveDate,
    #[serde(rename = "ReadNote")]
    pub read_note: String,
}

/// A book joined with one of its reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadBook {
    #[serde(flatten)]
    pub book: Book,
    #[serde(rename = "ReadDate")]
    pub read_date: NaiveDate,
    #[serde(rename = "ReadNote")]
    pub read_note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRecord {
    #[serde(rename = "TagID")]
    pub tag_id: i64,
    #[serde(rename = "BookID")]
    pub book_id: i64,
    #[serde(rename = "Tag")]
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagCount {
    pub tag: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagMaintenance {
    pub tags_before: i64,
    pub tags_after: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationCount {
    pub location: String,
    pub count: i64,
}

/// Pages and books read in one calendar year.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearSummary {
    pub year: i32,
    pub pages: i64,
    pub books: i64,
}

/// Pages of the books finished on one date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PagesOnDate {
    pub read_date: NaiveDate,
    pub pages: i64,
}

/// A started reading of a book, tracked page by page for completion estimates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadingRecord {
    #[serde(rename = "RecordID")]
    pub record_id: i64,
    #[serde(rename = "BookCollectionID")]
    pub book_id: i64,
    #[serde(rename = "StartDate")]
    pub start_date: NaiveDate,
    #[serde(rename = "ReadablePages")]
    pub readable_pages: i64,
}

/// Page reached on a given day of a reading record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyPage {
    #[serde(rename = "RecordID")]
    pub record_id: i64,
    #[serde(rename = "RecordDate")]
    pub record_date: NaiveDate,
    #[serde(rename = "Page")]
    pub page: i64,
}

/// A book row from a report, with the read date that placed it there
/// (latest read for flat reports, the specific read for by-year reports).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub book: Book,
    pub read_date: Option<NaiveDate>,
}

/// Tabular JSON shape: a header naming each column and rows of cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    pub header: Vec<String>,
    pub data: Vec<Vec<Value>>,
}

/// A record type that renders as one row of a RowSet.
pub trait TableRow {
    fn header() -> Vec<&'static str>;
    fn cells(&self) -> Vec<Value>;
}

impl RowSet {
    pub fn from_rows<T: TableRow>(rows: &[T]) -> RowSet {
        RowSet {
            header: T::header().into_iter().map(str::to_string).collect(),
            data: rows.iter().map(TableRow::cells).collect(),
        }
    }
}

pub fn fmt_date(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn date_cell(date: Option<&NaiveDate>) -> Value {
    date.map(|d| json!(fmt_date(d))).unwrap_or(Value::Null)
}

/// Trim and lower-case a tag. Empty tags are rejected.
pub fn normalize_tag(tag: &str) -> Result<String, BooksError> {
    let normalized = tag.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(BooksError::validation("Tag", "Tag cannot be empty"));
    }
    Ok(normalized)
}

pub const BOOK_HEADER: [&str; 13] = [
    "BookCollectionID",
    "Title",
    "Author",
    "CopyrightDate",
    "ISBNNumber",
    "PublisherName",
    "CoverType",
    "Pages",
    "Category",
    "Note",
    "Recycled",
    "Location",
    "ISBNNumber13",
];

impl TableRow for Book {
    fn header() -> Vec<&'static str> {
        BOOK_HEADER.to_vec()
    }

    fn cells(&self) -> Vec<Value> {
        vec![
            json!(self.id),
            json!(self.title),
            json!(self.author),
            date_cell(self.copyright_date.as_ref()),
            json!(self.isbn),
            json!(self.publisher),
            json!(self.cover_type.as_str()),
            json!(self.pages),
            json!(self.category),
            json!(self.note),
            json!(self.recycled as i64),
            json!(self.location),
            json!(self.isbn13),
        ]
    }
}

impl TableRow for ReadBook {
    fn header() -> Vec<&'static str> {
        let mut header = BOOK_HEADER.to_vec();
        header.extend(["ReadDate", "ReadNote"]);
        header
    }

    fn cells(&self) -> Vec<Value> {
        let mut cells = self.book.cells();
        cells.push(json!(fmt_date(&self.read_date)));
        cells.push(json!(self.read_note));
        cells
    }
}

impl TableRow for ReadRecord {
    fn header() -> Vec<&'static str> {
        vec!["BookCollectionID", "ReadDate", "ReadNote"]
    }

    fn cells(&self) -> Vec<Value> {
        vec![
            json!(self.book_id),
            json!(fmt_date(&self.read_date)),
            json!(self.read_note),
        ]
    }
}

impl TableRow for TagRecord {
    fn header() -> Vec<&'static str> {
        vec!["BookCollectionID", "TagID", "Tag"]
    }

    fn cells(&self) -> Vec<Value> {
        vec![json!(self.book_id), json!(self.tag_id), json!(self.tag)]
    }
}

impl TableRow for TagCount {
    fn header() -> Vec<&'static str> {
        vec!["tag", "count"]
    }

    fn cells(&self) -> Vec<Value> {
        vec![json!(self.tag), json!(self.count)]
    }
}

impl TableRow for YearSummary {
    fn header() -> Vec<&'static str> {
        vec!["year", "pages read", "books read"]
    }

    fn cells(&self) -> Vec<Value> {
        vec![json!(self.year), json!(self.pages), json!(self.books)]
    }
}

impl TableRow for LocationCount {
    fn header() -> Vec<&'static str> {
        vec!["location", "count"]
    }

    fn cells(&self) -> Vec<Value> {
        vec![json!(self.location), json!(self.count)]
    }
}

/// Core abstraction for catalog persistence.
///
/// All implementations must be Send + Sync to support concurrent access from
/// the HTTP and MCP front ends.
#[async_trait]
pub trait BookStore: Send + Sync {
    /// Round-trip to the database.
    async fn ping(&self) -> Result<(), BooksError>;

    // --- catalog ---

    /// Insert a book and return it with its assigned id.
    async fn add_book(&self, input: NewBook) -> Result<Book, BooksError>;

    /// Fetch a book by id. Returns NotFound if absent.
    async fn get_book(&self, id: i64) -> Result<Book, BooksError>;

    /// Replace every editable field of a book.
    async fn update_book(&self, id: i64, input: NewBook) -> Result<Book, BooksError>;

    /// Apply a partial note/recycled update.
    async fn update_note_status(&self, id: i64, update: NoteStatusUpdate) -> Result<Book, BooksError>;

    /// Books matching every filter in the query, ordered by id.
    async fn search_books(&self, query: &BookQuery) -> Result<Vec<Book>, BooksError>;

    /// Up to `limit` books with id >= start_id, ordered by id.
    async fn books_from(&self, start_id: i64, limit: i64) -> Result<Vec<Book>, BooksError>;

    /// Ids of books whose category is exactly `category`, ordered by id.
    async fn category_book_ids(&self, category: &str) -> Result<Vec<i64>, BooksError>;

    /// Distinct locations with the number of books in each, largest first.
    async fn locations(&self) -> Result<Vec<LocationCount>, BooksError>;

    // --- browsing ---

    /// Lowest and highest book ids, or None for an empty catalog.
    async fn id_bounds(&self) -> Result<Option<(i64, i64)>, BooksError>;

    /// Nearest existing book strictly after/before `id`, wrapping at the ends.
    async fn neighbor(&self, id: i64, direction: Direction) -> Result<Option<Book>, BooksError>;

    /// First book after `after_id` whose field contains `term`, wrapping once to the start.
    async fn find_next(&self, field: FindField, term: &str, after_id: i64) -> Result<Option<Book>, BooksError>;

    // --- reads ---

    /// Record a read. Returns false if that (book, date) pair already existed.
    async fn add_read(&self, record: &ReadRecord) -> Result<bool, BooksError>;

    /// All reads of one book, oldest first.
    async fn reads_for_book(&self, book_id: i64) -> Result<Vec<ReadRecord>, BooksError>;

    /// Insert the read or replace its note.
    async fn upsert_read_note(&self, record: &ReadRecord) -> Result<ReadRecord, BooksError>;

    /// Books joined with their reads, optionally restricted to one year, by read date.
    async fn books_read(&self, year: Option<i32>) -> Result<Vec<ReadBook>, BooksError>;

    /// Reads strictly after `date`, oldest first.
    async fn reads_since(&self, date: NaiveDate) -> Result<Vec<ReadBook>, BooksError>;

    /// Pages and books read per year, ascending, leaving out `exclude_year`.
    async fn summary_by_year(&self, year: Option<i32>, exclude_year: i32) -> Result<Vec<YearSummary>, BooksError>;

    /// Pages finished per read date, ascending, leaving out `exclude_year`.
    async fn pages_by_read_date(&self, exclude_year: i32) -> Result<Vec<PagesOnDate>, BooksError>;

    // --- reports ---

    /// One row per matching book, carrying its latest read date.
    async fn report_rows(&self, query: &ReportQuery) -> Result<Vec<ReportRow>, BooksError>;

    /// One row per read of each matching book, ordered by read year, then the query order.
    async fn report_reads(&self, query: &ReportQuery) -> Result<Vec<ReportRow>, BooksError>;

    // --- tags ---

    /// Add a normalized tag; returns the existing row if the book already has it.
    async fn add_tag(&self, book_id: i64, tag: &str) -> Result<TagRecord, BooksError>;

    /// Distinct tags of a book, alphabetical.
    async fn tags_for_book(&self, book_id: i64) -> Result<Vec<String>, BooksError>;

    /// Tag rows of a book, alphabetical.
    async fn book_tags(&self, book_id: i64) -> Result<Vec<TagRecord>, BooksError>;

    /// Tag usage counts, most used first, optionally restricted to tags starting with `prefix`.
    async fn tag_counts(&self, prefix: Option<&str>) -> Result<Vec<TagCount>, BooksError>;

    /// Tag rows whose text contains `fragment`.
    async fn tags_search(&self, fragment: &str) -> Result<Vec<TagRecord>, BooksError>;

    /// Rename every occurrence of a tag. Returns the number of rows changed.
    async fn rename_tag(&self, old: &str, new: &str) -> Result<u64, BooksError>;

    /// Lower-case all tags, drop empty ones and duplicates per book.
    async fn tag_maintenance(&self) -> Result<TagMaintenance, BooksError>;

    // --- reading estimates ---

    async fn add_reading_record(&self, book_id: i64, readable_pages: i64, start_date: NaiveDate) -> Result<ReadingRecord, BooksError>;

    async fn reading_record(&self, record_id: i64) -> Result<ReadingRecord, BooksError>;

    /// Reading records of a book, oldest start first.
    async fn reading_records(&self, book_id: i64) -> Result<Vec<ReadingRecord>, BooksError>;

    /// Record the page reached on a date; a second entry for the same date replaces the first.
    async fn add_daily_page(&self, entry: &DailyPage) -> Result<DailyPage, BooksError>;

    /// Daily pages of a record, by date.
    async fn daily_pages(&self, record_id: i64) -> Result<Vec<DailyPage>, BooksError>;
}

/// Library service: the operations behind the HTTP API and the MCP server
///
/// Validates input, composes store calls, and shapes results. Anything that
/// depends on the current date takes `today` explicitly.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::Config;
use crate::errors::BooksError;
use crate::estimate::{day_number, estimate_completion, Estimate};
use crate::isbn::{normalize_isbn, to_new_book, IsbnLookup};
use crate::payload::{
    parse_pages, parse_read_date, BookPayload, DatePagePayload, NoteStatusPayload,
    ReadDatePayload, UpdateBookPayload,
};
use crate::query::{BookQuery, ReportQuery};
use crate::reports::{
    group_by_read_year, rank_years, report_table, year_progress, RankedYear, ReportTable,
    YearProgressPoint, YearTable,
};
use crate::store::{
    fmt_date, normalize_tag, Book, BookStore, DailyPage, Direction, FindField, LocationCount,
    NewBook, ReadBook, ReadRecord, ReadingRecord, RowSet, TableRow, TagCount, TagMaintenance,
    TagRecord, YearSummary,
};

#[derive(Debug, Clone, PartialEq)]
pub struct LibrarySettings {
    pub recent_days: i64,
    pub unrecorded_read_year: i32,
    pub default_location: String,
    pub location_order: Vec<String>,
    pub window_size: i64,
}

impl From<&Config> for LibrarySettings {
    fn from(config: &Config) -> Self {
        LibrarySettings {
            recent_days: config.recent_days,
            unrecorded_read_year: config.unrecorded_read_year,
            default_location: config.default_location.clone(),
            location_order: config.location_order.clone(),
            window_size: config.window_size,
        }
    }
}

impl Default for LibrarySettings {
    fn default() -> Self {
        LibrarySettings::from(&Config::default())
    }
}

/// Result of tagging a whole category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryTagging {
    pub tag: String,
    pub category: String,
    pub book_ids: Vec<i64>,
}

/// A book as the record browser shows it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookView {
    #[serde(flatten)]
    pub book: Book,
    #[serde(rename = "tag_list")]
    pub tags: Vec<String>,
    /// Tags joined for display
    #[serde(rename = "Tags")]
    pub tag_line: String,
    #[serde(rename = "LastRead")]
    pub last_read: Option<String>,
    #[serde(rename = "ReadDates")]
    pub reads: Vec<ReadRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadDateResult {
    #[serde(flatten)]
    pub record: ReadRecord,
    /// False when this book already had a read on that date
    #[serde(rename = "Added")]
    pub added: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReportOutput {
    Flat(ReportTable),
    ByYear { years: Vec<YearTable> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatePageRow {
    pub record_date: NaiveDate,
    pub page: i64,
    pub day: i64,
}

impl TableRow for DatePageRow {
    fn header() -> Vec<&'static str> {
        vec!["RecordDate", "Page", "Day"]
    }

    fn cells(&self) -> Vec<Value> {
        vec![json!(fmt_date(&self.record_date)), json!(self.page), json!(self.day)]
    }
}

/// Reading records of one book with their estimates, index-aligned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordSet {
    /// `[start date, record id]` per record
    #[serde(rename = "RecordID")]
    pub record_ids: Vec<(String, i64)>,
    /// `[finish, earliest, latest]`, or nulls when there is not enough data yet
    #[serde(rename = "Estimate")]
    pub estimates: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompleteRecord {
    pub book: RowSet,
    pub reads: RowSet,
    pub tags: RowSet,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IsbnResults {
    pub book_records: Vec<NewBook>,
    pub errors: BTreeMap<String, String>,
}

pub struct Library {
    store: Arc<dyn BookStore>,
    settings: LibrarySettings,
    isbn: Option<Arc<dyn IsbnLookup>>,
}

impl Library {
    pub fn new(
        store: Arc<dyn BookStore>,
        settings: LibrarySettings,
        isbn: Option<Arc<dyn IsbnLookup>>,
    ) -> Self {
        Library { store, settings, isbn }
    }

    pub fn settings(&self) -> &LibrarySettings {
        &self.settings
    }

    pub fn isbn_enabled(&self) -> bool {
        self.isbn.is_some()
    }

    pub async fn health(&self) -> Result<(), BooksError> {
        self.store.ping().await
    }

    // --- catalog ---

    /// Validate every entry before inserting any.
    pub async fn add_books(&self, payloads: Vec<BookPayload>) -> Result<Vec<Book>, BooksError> {
        if payloads.is_empty() {
            return Err(BooksError::Validation {
                message: "No books to add".to_string(),
                field: None,
            });
        }
        let inputs = payloads
            .into_iter()
            .map(|p| p.into_new_book(&self.settings.default_location))
            .collect::<Result<Vec<_>, _>>()?;

        let mut books = Vec::with_capacity(inputs.len());
        for input in inputs {
            let book = self.store.add_book(input).await?;
            tracing::info!(id = book.id, title = %book.title, "Book added");
            books.push(book);
        }
        Ok(books)
    }

    pub async fn get_book(&self, id: i64) -> Result<Book, BooksError> {
        self.store.get_book(id).await
    }

    pub async fn search_books(&self, query: &BookQuery) -> Result<Vec<Book>, BooksError> {
        self.store.search_books(query).await
    }

    pub async fn locations(&self) -> Result<Vec<LocationCount>, BooksError> {
        self.store.locations().await
    }

    pub async fn valid_locations(&self) -> Result<Vec<String>, BooksError> {
        let mut names: Vec<String> = self
            .store
            .locations()
            .await?
            .into_iter()
            .map(|l| l.location)
            .collect();
        if !names.contains(&self.settings.default_location) {
            names.push(self.settings.default_location.clone());
        }
        let order = &self.settings.location_order;
        names.sort_by_key(|name| {
            let rank = order.iter().position(|o| o == name).unwrap_or(order.len());
            (rank, name.clone())
        });
        Ok(names)
    }

    /// Tag every book filed under exactly `category`.
    pub async fn tag_from_category(&self, tag: &str, category: &str) -> Result<CategoryTagging, BooksError> {
        if category.trim().is_empty() {
            return Err(BooksError::validation("category", "Category cannot be empty"));
        }
        let tag_name = normalize_tag(tag)?;
        let ids = self.store.category_book_ids(category).await?;
        for id in &ids {
            self.store.add_tag(*id, &tag_name).await?;
        }
        tracing::info!(category, tag = %tag_name, books = ids.len(), "Tagged category");
        Ok(CategoryTagging {
            tag: tag_name,
            category: category.to_string(),
            book_ids: ids,
        })
    }

    /// Replace a record's fields, recording a read in the same step when asked.
    pub async fn update_book(
        &self,
        id: i64,
        payload: UpdateBookPayload,
        today: NaiveDate,
    ) -> Result<BookView, BooksError> {
        let read_date = payload.read_date(today)?;
        let input = payload.book.into_new_book(&self.settings.default_location)?;
        self.store.update_book(id, input).await?;

        if let Some(read_date) = read_date {
            let record = ReadRecord {
                book_id: id,
                read_date,
                read_note: String::new(),
            };
            self.store.add_read(&record).await?;
        }
        self.record(id).await
    }

    pub async fn update_note_status(&self, payload: &NoteStatusPayload) -> Result<Book, BooksError> {
        self.store
            .update_note_status(payload.book_id, payload.to_update()?)
            .await
    }

    // --- browsing ---

    /// The record browser's view of one book.
    pub async fn record(&self, id: i64) -> Result<BookView, BooksError> {
        let book = self.store.get_book(id).await?;
        self.view(book).await
    }

    async fn view(&self, book: Book) -> Result<BookView, BooksError> {
        let tags = self.store.tags_for_book(book.id).await?;
        let reads = self.store.reads_for_book(book.id).await?;
        Ok(BookView {
            tag_line: tags.join(", "),
            last_read: reads.last().map(|r| fmt_date(&r.read_date)),
            book,
            tags,
            reads,
        })
    }

    pub async fn browse(&self, id: i64, direction: Direction) -> Result<BookView, BooksError> {
        let book = self
            .store
            .neighbor(id, direction)
            .await?
            .ok_or_else(|| BooksError::not_found("Book", id))?;
        self.view(book).await
    }

    pub async fn first_record(&self) -> Result<Option<BookView>, BooksError> {
        match self.store.id_bounds().await? {
            Some((min_id, _)) => self.record(min_id).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn find(
        &self,
        field: FindField,
        term: &str,
        after_id: i64,
    ) -> Result<Option<BookView>, BooksError> {
        let term = term.trim();
        if term.is_empty() {
            return Err(BooksError::validation("term", "Find term cannot be empty"));
        }
        match self.store.find_next(field, term, after_id).await? {
            Some(book) => self.view(book).await.map(Some),
            None => Ok(None),
        }
    }

    // --- reads ---

    /// Parse every entry before recording any.
    pub async fn add_read_dates(&self, payloads: &[ReadDatePayload]) -> Result<Vec<ReadDateResult>, BooksError> {
        let records = payloads
            .iter()
            .map(ReadDatePayload::to_record)
            .collect::<Result<Vec<_>, _>>()?;

        let mut results = Vec::with_capacity(records.len());
        for record in records {
            let added = self.store.add_read(&record).await?;
            results.push(ReadDateResult { record, added });
        }
        Ok(results)
    }

    pub async fn read_status(&self, book_id: i64) -> Result<Vec<ReadRecord>, BooksError> {
        self.store.get_book(book_id).await?;
        self.store.reads_for_book(book_id).await
    }

    pub async fn update_read_note(&self, payload: &ReadDatePayload) -> Result<ReadRecord, BooksError> {
        self.store.upsert_read_note(&payload.to_record()?).await
    }

    pub async fn books_read(&self, year: Option<i32>) -> Result<Vec<ReadBook>, BooksError> {
        self.store.books_read(year).await
    }

    pub async fn summary_by_year(&self, year: Option<i32>) -> Result<Vec<YearSummary>, BooksError> {
        self.store
            .summary_by_year(year, self.settings.unrecorded_read_year)
            .await
    }

    pub async fn year_rank(&self) -> Result<Vec<RankedYear>, BooksError> {
        Ok(rank_years(&self.summary_by_year(None).await?))
    }

    /// Running pages read within each year, one point per read date.
    pub async fn year_progress(&self) -> Result<Vec<YearProgressPoint>, BooksError> {
        let points = self
            .store
            .pages_by_read_date(self.settings.unrecorded_read_year)
            .await?;
        Ok(year_progress(&points))
    }

    /// Reads within the last `days` days (the configured window by default).
    pub async fn recent(&self, days: Option<i64>, today: NaiveDate) -> Result<Vec<ReadBook>, BooksError> {
        let days = days.unwrap_or(self.settings.recent_days);
        if days < 0 {
            return Err(BooksError::validation("days", "days must not be negative"));
        }
        self.store.reads_since(today - Duration::days(days)).await
    }

    // --- reports ---

    pub async fn report(&self, query: &ReportQuery) -> Result<ReportOutput, BooksError> {
        if query.columns.is_empty() {
            return Err(BooksError::validation("columns", "Choose at least one column"));
        }
        if query.by_year {
            let rows = self.store.report_reads(query).await?;
            Ok(ReportOutput::ByYear {
                years: group_by_read_year(&rows, &query.columns),
            })
        } else {
            let rows = self.store.report_rows(query).await?;
            Ok(ReportOutput::Flat(report_table(&rows, &query.columns)))
        }
    }

    // --- tags ---

    pub async fn add_tag(&self, book_id: i64, tag: &str) -> Result<TagRecord, BooksError> {
        self.store.add_tag(book_id, tag).await
    }

    pub async fn tags_for_book(&self, book_id: i64) -> Result<Vec<String>, BooksError> {
        self.store.get_book(book_id).await?;
        self.store.tags_for_book(book_id).await
    }

    pub async fn tag_counts(&self, prefix: Option<&str>) -> Result<Vec<TagCount>, BooksError> {
        self.store.tag_counts(prefix).await
    }

    pub async fn tags_search(&self, fragment: &str) -> Result<Vec<TagRecord>, BooksError> {
        if fragment.trim().is_empty() {
            return Err(BooksError::validation("fragment", "Tag search text cannot be empty"));
        }
        self.store.tags_search(fragment).await
    }

    pub async fn rename_tag(&self, old: &str, new: &str) -> Result<u64, BooksError> {
        self.store.rename_tag(old, new).await
    }

    pub async fn tag_maintenance(&self) -> Result<TagMaintenance, BooksError> {
        let result = self.store.tag_maintenance().await?;
        tracing::info!(before = result.tags_before, after = result.tags_after, "Tag maintenance done");
        Ok(result)
    }

    // --- reading estimates ---

    pub async fn add_reading_estimate(
        &self,
        book_id: i64,
        readable_pages: i64,
        start_date: Option<NaiveDate>,
        today: NaiveDate,
    ) -> Result<ReadingRecord, BooksError> {
        self.store
            .add_reading_record(book_id, readable_pages, start_date.unwrap_or(today))
            .await
    }

    pub async fn add_date_page(&self, payload: &DatePagePayload, today: NaiveDate) -> Result<DailyPage, BooksError> {
        let record_date = match payload.record_date.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => parse_read_date(raw).map_err(|_| {
                BooksError::validation("RecordDate", "RecordDate must be a YYYY-MM-DD date")
            })?,
            _ => today,
        };
        let entry = DailyPage {
            record_id: payload.record_id,
            record_date,
            page: parse_pages(&payload.page)
                .map_err(|_| BooksError::validation("Page", "Page must be a non-negative whole number"))?,
        };
        self.store.add_daily_page(&entry).await
    }

    pub async fn date_page_records(&self, record_id: i64) -> Result<Vec<DatePageRow>, BooksError> {
        let record = self.store.reading_record(record_id).await?;
        let pages = self.store.daily_pages(record_id).await?;
        Ok(pages
            .into_iter()
            .map(|p| DatePageRow {
                day: day_number(record.start_date, p.record_date),
                record_date: p.record_date,
                page: p.page,
            })
            .collect())
    }

    pub async fn estimate(&self, record_id: i64) -> Result<Estimate, BooksError> {
        let record = self.store.reading_record(record_id).await?;
        let pages = self.store.daily_pages(record_id).await?;
        estimate_completion(record.start_date, record.readable_pages, &pages)
    }

    pub async fn record_set(&self, book_id: i64) -> Result<RecordSet, BooksError> {
        self.store.get_book(book_id).await?;
        let records = self.store.reading_records(book_id).await?;

        let mut set = RecordSet {
            record_ids: Vec::with_capacity(records.len()),
            estimates: Vec::with_capacity(records.len()),
        };
        for record in records {
            let pages = self.store.daily_pages(record.record_id).await?;
            let estimate = match estimate_completion(record.start_date, record.readable_pages, &pages) {
                Ok(est) => json!(est.as_strings()),
                Err(BooksError::Validation { .. }) => json!([null, null, null]),
                Err(e) => return Err(e),
            };
            set.record_ids.push((fmt_date(&record.start_date), record.record_id));
            set.estimates.push(estimate);
        }
        Ok(set)
    }

    pub async fn book_id_from_record_id(&self, record_id: i64) -> Result<i64, BooksError> {
        Ok(self.store.reading_record(record_id).await?.book_id)
    }

    // --- complete records window ---

    pub async fn complete_records_window(
        &self,
        start_id: i64,
        window: Option<i64>,
    ) -> Result<Vec<CompleteRecord>, BooksError> {
        let window = window.unwrap_or(self.settings.window_size);
        if window <= 0 {
            return Err(BooksError::validation("window", "window must be positive"));
        }

        let books = self.store.books_from(start_id, window).await?;
        let mut records = Vec::with_capacity(books.len());
        for book in books {
            let reads = self.store.reads_for_book(book.id).await?;
            let tags = self.store.book_tags(book.id).await?;
            records.push(CompleteRecord {
                book: RowSet::from_rows(std::slice::from_ref(&book)),
                reads: RowSet::from_rows(&reads),
                tags: RowSet::from_rows(&tags),
            });
        }
        Ok(records)
    }

    // --- ISBN lookup ---

    /// Look up each ISBN, collecting per-ISBN failures instead of stopping.
    pub async fn books_by_isbn(&self, isbn_list: &[String]) -> Result<IsbnResults, BooksError> {
        let lookup = self.isbn.as_ref().ok_or_else(|| {
            BooksError::Lookup(
                "ISBN lookup is disabled. Set BOOKTRACK_ISBN__API_KEY to enable it".to_string(),
            )
        })?;

        let mut results = IsbnResults {
            book_records: Vec::new(),
            errors: BTreeMap::new(),
        };
        for raw in isbn_list {
            let outcome = match normalize_isbn(raw) {
                Ok(isbn) => lookup.lookup(&isbn).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(found) => results
                    .book_records
                    .push(to_new_book(&found, &self.settings.default_location)),
                Err(e) => {
                    tracing::warn!(isbn = %raw, error = %e, "ISBN lookup failed");
                    results.errors.insert(raw.clone(), e.to_string());
                }
            }
        }
        Ok(results)
    }
}

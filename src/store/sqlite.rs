/// SQLite-backed implementation of BookStore
///
/// Uses sqlx with WAL mode for file databases. Dates are stored as
/// `YYYY-MM-DD` text so prefix matches and string ordering follow the calendar.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{
    sqlite::{
        SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
        SqliteRow, SqliteSynchronous,
    },
    Row, Sqlite,
};

use crate::errors::BooksError;
use crate::query::{like_contains, like_prefix, BookQuery, ReportQuery, SqlValue};
use crate::store::{
    fmt_date, normalize_tag, Book, BookStore, CoverType, DailyPage, Direction, FindField,
    LocationCount, NewBook, NoteStatusUpdate, PagesOnDate, ReadBook, ReadRecord, ReadingRecord,
    ReportRow, TagCount, TagMaintenance, TagRecord, YearSummary,
};

const BOOK_COLUMNS: &str = "b.book_collection_id AS book_collection_id, b.title AS title, \
     b.author AS author, b.copyright_date AS copyright_date, b.isbn_number AS isbn_number, \
     b.isbn_number13 AS isbn_number13, b.publisher_name AS publisher_name, \
     b.cover_type AS cover_type, b.pages AS pages, b.category AS category, b.note AS note, \
     b.recycled AS recycled, b.location AS location";

const LATEST_READ: &str = "(SELECT MAX(r.read_date) FROM books_read r \
     WHERE r.book_collection_id = b.book_collection_id)";

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// SQLite-backed book store using sqlx connection pool.
pub struct SqliteBookStore {
    pool: SqlitePool,
}

impl SqliteBookStore {
    /// Open (or create) the database at db_path, optionally applying pending migrations.
    ///
    /// In-memory databases get a single long-lived connection so every query
    /// sees the same database.
    pub async fn new(db_path: &str, run_migrations: bool) -> Result<Self, BooksError> {
        let path = db_path.strip_prefix("sqlite://").unwrap_or(db_path);
        let in_memory = path.contains(":memory:");

        let mut opts = path
            .parse::<SqliteConnectOptions>()
            .map_err(|e| BooksError::Config(format!("Invalid db_path '{}': {}", db_path, e)))?
            .create_if_missing(true)
            .foreign_keys(true);
        if !in_memory {
            opts = opts
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(opts)
                .await
        } else {
            SqlitePoolOptions::new().connect_with(opts).await
        }
        .map_err(|e| BooksError::Storage(format!("Failed to connect to database: {}", e)))?;

        let store = SqliteBookStore { pool };
        if run_migrations {
            store.migrate().await?;
        }
        Ok(store)
    }

    /// Fresh migrated in-memory database.
    pub async fn in_memory() -> Result<Self, BooksError> {
        Self::new("sqlite::memory:", true).await
    }

    pub async fn migrate(&self) -> Result<(), BooksError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| BooksError::Storage(format!("Migration failed: {}", e)))
    }

    async fn ensure_book(&self, id: i64) -> Result<(), BooksError> {
        let row = sqlx::query("SELECT 1 FROM book_collection WHERE book_collection_id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(_) => Ok(()),
            None => Err(BooksError::not_found("Book", id)),
        }
    }

    async fn first_book(&self, sql: &str, binds: &[SqlValue]) -> Result<Option<Book>, BooksError> {
        let row = bind_all(sqlx::query(sql), binds)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_book).transpose()
    }

    async fn fetch_books(&self, sql: &str, binds: &[SqlValue]) -> Result<Vec<Book>, BooksError> {
        let rows = bind_all(sqlx::query(sql), binds).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_book).collect()
    }

    async fn fetch_read_books(&self, sql: &str, binds: &[SqlValue]) -> Result<Vec<ReadBook>, BooksError> {
        let rows = bind_all(sqlx::query(sql), binds).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                Ok(ReadBook {
                    book: row_to_book(row)?,
                    read_date: required_date(row, "read_date")?,
                    read_note: row.try_get("read_note")?,
                })
            })
            .collect()
    }

    async fn fetch_report_rows(&self, sql: &str, binds: &[SqlValue]) -> Result<Vec<ReportRow>, BooksError> {
        let rows = bind_all(sqlx::query(sql), binds).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                let read_date: Option<String> = row.try_get("read_date")?;
                Ok(ReportRow {
                    book: row_to_book(row)?,
                    read_date: read_date.as_deref().and_then(parse_stored_date),
                })
            })
            .collect()
    }
}

fn bind_all<'q>(mut q: SqliteQuery<'q>, binds: &[SqlValue]) -> SqliteQuery<'q> {
    for value in binds {
        q = match value {
            SqlValue::Text(s) => q.bind(s.clone()),
            SqlValue::Int(i) => q.bind(*i),
        };
    }
    q
}

/// Parse the date part of a stored value. Legacy placeholders like 0000-00-00 yield None.
fn parse_stored_date(raw: &str) -> Option<NaiveDate> {
    raw.get(..10)
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
}

fn required_date(row: &SqliteRow, column: &str) -> Result<NaiveDate, BooksError> {
    let raw: String = row.try_get(column)?;
    parse_stored_date(&raw)
        .ok_or_else(|| BooksError::Storage(format!("Parse {} '{}'", column, raw)))
}

/// Map a sqlx row to a Book manually (cover type and flags need conversion).
fn row_to_book(row: &SqliteRow) -> Result<Book, BooksError> {
    let copyright_date: Option<String> = row.try_get("copyright_date")?;
    let cover_type: String = row.try_get("cover_type")?;
    let recycled: i64 = row.try_get("recycled")?;

    Ok(Book {
        id: row.try_get("book_collection_id")?,
        title: row.try_get("title")?,
        author: row.try_get("author")?,
        copyright_date: copyright_date.as_deref().and_then(parse_stored_date),
        isbn: row.try_get("isbn_number")?,
        publisher: row.try_get("publisher_name")?,
        cover_type: CoverType::parse(&cover_type).unwrap_or_default(),
        pages: row.try_get("pages")?,
        category: row.try_get("category")?,
        note: row.try_get("note")?,
        recycled: recycled != 0,
        location: row.try_get("location")?,
        isbn13: row.try_get("isbn_number13")?,
    })
}

fn row_to_read(row: &SqliteRow) -> Result<ReadRecord, BooksError> {
    Ok(ReadRecord {
        book_id: row.try_get("book_collection_id")?,
        read_date: required_date(row, "read_date")?,
        read_note: row.try_get("read_note")?,
    })
}

fn row_to_tag(row: &SqliteRow) -> Result<TagRecord, BooksError> {
    Ok(TagRecord {
        tag_id: row.try_get("tag_id")?,
        book_id: row.try_get("book_id")?,
        tag: row.try_get("tag")?,
    })
}

fn row_to_reading_record(row: &SqliteRow) -> Result<ReadingRecord, BooksError> {
    Ok(ReadingRecord {
        record_id: row.try_get("record_id")?,
        book_id: row.try_get("book_collection_id")?,
        start_date: required_date(row, "start_date")?,
        readable_pages: row.try_get("readable_pages")?,
    })
}

#[async_trait]
impl BookStore for SqliteBookStore {
    async fn ping(&self) -> Result<(), BooksError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn add_book(&self, input: NewBook) -> Result<Book, BooksError> {
        let result = sqlx::query(
            "INSERT INTO book_collection (title, author, copyright_date, isbn_number, isbn_number13, \
             publisher_name, cover_type, pages, category, note, recycled, location) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&input.title)
        .bind(&input.author)
        .bind(input.copyright_date.as_ref().map(fmt_date))
        .bind(&input.isbn)
        .bind(&input.isbn13)
        .bind(&input.publisher)
        .bind(input.cover_type.as_str())
        .bind(input.pages)
        .bind(&input.category)
        .bind(&input.note)
        .bind(input.recycled as i64)
        .bind(&input.location)
        .execute(&self.pool)
        .await
        .map_err(|e| BooksError::Storage(format!("Failed to insert book: {}", e)))?;

        Ok(Book {
            id: result.last_insert_rowid(),
            title: input.title,
            author: input.author,
            copyright_date: input.copyright_date,
            isbn: input.isbn,
            publisher: input.publisher,
            cover_type: input.cover_type,
            pages: input.pages,
            category: input.category,
            note: input.note,
            recycled: input.recycled,
            location: input.location,
            isbn13: input.isbn13,
        })
    }

    async fn get_book(&self, id: i64) -> Result<Book, BooksError> {
        let sql = format!(
            "SELECT {} FROM book_collection b WHERE b.book_collection_id = ?",
            BOOK_COLUMNS
        );
        self.first_book(&sql, &[SqlValue::Int(id)])
            .await?
            .ok_or_else(|| BooksError::not_found("Book", id))
    }

    async fn update_book(&self, id: i64, input: NewBook) -> Result<Book, BooksError> {
        let result = sqlx::query(
            "UPDATE book_collection SET title = ?, author = ?, copyright_date = ?, isbn_number = ?, \
             isbn_number13 = ?, publisher_name = ?, cover_type = ?, pages = ?, category = ?, note = ?, \
             recycled = ?, location = ? WHERE book_collection_id = ?",
        )
        .bind(&input.title)
        .bind(&input.author)
        .bind(input.copyright_date.as_ref().map(fmt_date))
        .bind(&input.isbn)
        .bind(&input.isbn13)
        .bind(&input.publisher)
        .bind(input.cover_type.as_str())
        .bind(input.pages)
        .bind(&input.category)
        .bind(&input.note)
        .bind(input.recycled as i64)
        .bind(&input.location)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| BooksError::Storage(format!("Failed to update book: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(BooksError::not_found("Book", id));
        }
        self.get_book(id).await
    }

    async fn update_note_status(&self, id: i64, update: NoteStatusUpdate) -> Result<Book, BooksError> {
        if update.note.is_none() && update.recycled.is_none() {
            return Err(BooksError::Validation {
                message: "At least one of Note or Recycled is required".to_string(),
                field: None,
            });
        }

        // Build dynamic SET clause
        let mut sets = Vec::new();
        if update.note.is_some() {
            sets.push("note = ?");
        }
        if update.recycled.is_some() {
            sets.push("recycled = ?");
        }
        let sql = format!(
            "UPDATE book_collection SET {} WHERE book_collection_id = ?",
            sets.join(", ")
        );

        let mut q = sqlx::query(&sql);
        if let Some(ref note) = update.note {
            q = q.bind(note);
        }
        if let Some(recycled) = update.recycled {
            q = q.bind(recycled as i64);
        }
        let result = q.bind(id).execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            return Err(BooksError::not_found("Book", id));
        }
        self.get_book(id).await
    }

    async fn search_books(&self, query: &BookQuery) -> Result<Vec<Book>, BooksError> {
        let clause = query.to_where()?;
        let sql = format!(
            "SELECT {} FROM book_collection b {} ORDER BY b.book_collection_id",
            BOOK_COLUMNS,
            clause.to_sql()
        );
        self.fetch_books(&sql, clause.binds()).await
    }

    async fn books_from(&self, start_id: i64, limit: i64) -> Result<Vec<Book>, BooksError> {
        let sql = format!(
            "SELECT {} FROM book_collection b WHERE b.book_collection_id >= ? \
             ORDER BY b.book_collection_id LIMIT ?",
            BOOK_COLUMNS
        );
        self.fetch_books(&sql, &[SqlValue::Int(start_id), SqlValue::Int(limit.max(0))])
            .await
    }

    async fn category_book_ids(&self, category: &str) -> Result<Vec<i64>, BooksError> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT book_collection_id FROM book_collection WHERE category = ? \
             ORDER BY book_collection_id",
        )
        .bind(category)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn locations(&self) -> Result<Vec<LocationCount>, BooksError> {
        let rows = sqlx::query(
            "SELECT location, COUNT(*) AS count FROM book_collection \
             GROUP BY location ORDER BY count DESC, location",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(LocationCount {
                    location: row.try_get("location")?,
                    count: row.try_get("count")?,
                })
            })
            .collect()
    }

    async fn id_bounds(&self) -> Result<Option<(i64, i64)>, BooksError> {
        let row = sqlx::query(
            "SELECT MIN(book_collection_id) AS min_id, MAX(book_collection_id) AS max_id FROM book_collection",
        )
        .fetch_one(&self.pool)
        .await?;

        let min_id: Option<i64> = row.try_get("min_id")?;
        let max_id: Option<i64> = row.try_get("max_id")?;
        Ok(min_id.zip(max_id))
    }

    async fn neighbor(&self, id: i64, direction: Direction) -> Result<Option<Book>, BooksError> {
        let (cmp, order) = match direction {
            Direction::Next => (">", "ASC"),
            Direction::Prev => ("<", "DESC"),
        };
        let sql = format!(
            "SELECT {} FROM book_collection b WHERE b.book_collection_id {} ? \
             ORDER BY b.book_collection_id {} LIMIT 1",
            BOOK_COLUMNS, cmp, order
        );
        if let Some(book) = self.first_book(&sql, &[SqlValue::Int(id)]).await? {
            return Ok(Some(book));
        }

        // Past either end: wrap to the other one
        let sql = format!(
            "SELECT {} FROM book_collection b ORDER BY b.book_collection_id {} LIMIT 1",
            BOOK_COLUMNS, order
        );
        self.first_book(&sql, &[]).await
    }

    async fn find_next(&self, field: FindField, term: &str, after_id: i64) -> Result<Option<Book>, BooksError> {
        let pattern = like_contains(term);
        let sql = format!(
            "SELECT {} FROM book_collection b WHERE b.{} LIKE ? ESCAPE '\\' \
             AND b.book_collection_id > ? ORDER BY b.book_collection_id LIMIT 1",
            BOOK_COLUMNS,
            field.column()
        );
        if let Some(book) = self
            .first_book(&sql, &[pattern.clone(), SqlValue::Int(after_id)])
            .await?
        {
            return Ok(Some(book));
        }

        let sql = format!(
            "SELECT {} FROM book_collection b WHERE b.{} LIKE ? ESCAPE '\\' \
             ORDER BY b.book_collection_id LIMIT 1",
            BOOK_COLUMNS,
            field.column()
        );
        self.first_book(&sql, &[pattern]).await
    }

    async fn add_read(&self, record: &ReadRecord) -> Result<bool, BooksError> {
        self.ensure_book(record.book_id).await?;

        let result = sqlx::query(
            "INSERT OR IGNORE INTO books_read (book_collection_id, read_date, read_note) VALUES (?, ?, ?)",
        )
        .bind(record.book_id)
        .bind(fmt_date(&record.read_date))
        .bind(&record.read_note)
        .execute(&self.pool)
        .await
        .map_err(|e| BooksError::Storage(format!("Failed to insert read date: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    async fn reads_for_book(&self, book_id: i64) -> Result<Vec<ReadRecord>, BooksError> {
        let rows = sqlx::query(
            "SELECT book_collection_id, read_date, read_note FROM books_read \
             WHERE book_collection_id = ? ORDER BY read_date",
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_read).collect()
    }

    async fn upsert_read_note(&self, record: &ReadRecord) -> Result<ReadRecord, BooksError> {
        self.ensure_book(record.book_id).await?;

        sqlx::query(
            "INSERT INTO books_read (book_collection_id, read_date, read_note) VALUES (?, ?, ?) \
             ON CONFLICT (book_collection_id, read_date) DO UPDATE SET read_note = excluded.read_note",
        )
        .bind(record.book_id)
        .bind(fmt_date(&record.read_date))
        .bind(&record.read_note)
        .execute(&self.pool)
        .await
        .map_err(|e| BooksError::Storage(format!("Failed to update read note: {}", e)))?;

        Ok(record.clone())
    }

    async fn books_read(&self, year: Option<i32>) -> Result<Vec<ReadBook>, BooksError> {
        let mut binds = Vec::new();
        let filter = match year {
            Some(y) => {
                binds.push(SqlValue::Text(format!("{:04}", y)));
                "WHERE substr(r.read_date, 1, 4) = ?"
            }
            None => "",
        };
        let sql = format!(
            "SELECT {}, r.read_date AS read_date, r.read_note AS read_note \
             FROM book_collection b JOIN books_read r ON r.book_collection_id = b.book_collection_id \
             {} ORDER BY r.read_date, b.book_collection_id",
            BOOK_COLUMNS, filter
        );
        self.fetch_read_books(&sql, &binds).await
    }

    async fn reads_since(&self, date: NaiveDate) -> Result<Vec<ReadBook>, BooksError> {
        let sql = format!(
            "SELECT {}, r.read_date AS read_date, r.read_note AS read_note \
             FROM book_collection b JOIN books_read r ON r.book_collection_id = b.book_collection_id \
             WHERE r.read_date > ? ORDER BY r.read_date, b.book_collection_id",
            BOOK_COLUMNS
        );
        self.fetch_read_books(&sql, &[SqlValue::Text(fmt_date(&date))]).await
    }

    async fn summary_by_year(&self, year: Option<i32>, exclude_year: i32) -> Result<Vec<YearSummary>, BooksError> {
        let mut sql = "SELECT CAST(substr(r.read_date, 1, 4) AS INTEGER) AS year, \
             SUM(b.pages) AS pages, COUNT(*) AS books \
             FROM books_read r JOIN book_collection b ON b.book_collection_id = r.book_collection_id \
             WHERE CAST(substr(r.read_date, 1, 4) AS INTEGER) != ?"
            .to_string();
        let mut binds = vec![SqlValue::Int(exclude_year as i64)];
        if let Some(y) = year {
            sql.push_str(" AND CAST(substr(r.read_date, 1, 4) AS INTEGER) = ?");
            binds.push(SqlValue::Int(y as i64));
        }
        sql.push_str(" GROUP BY year ORDER BY year");

        let rows = bind_all(sqlx::query(&sql), &binds).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                let year: i64 = row.try_get("year")?;
                Ok(YearSummary {
                    year: year as i32,
                    pages: row.try_get("pages")?,
                    books: row.try_get("books")?,
                })
            })
            .collect()
    }

    async fn pages_by_read_date(&self, exclude_year: i32) -> Result<Vec<PagesOnDate>, BooksError> {
        let rows = sqlx::query(
            "SELECT r.read_date AS read_date, SUM(b.pages) AS pages \
             FROM books_read r JOIN book_collection b ON b.book_collection_id = r.book_collection_id \
             WHERE CAST(substr(r.read_date, 1, 4) AS INTEGER) != ? \
             GROUP BY r.read_date ORDER BY r.read_date",
        )
        .bind(exclude_year as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(PagesOnDate {
                    read_date: required_date(row, "read_date")?,
                    pages: row.try_get("pages")?,
                })
            })
            .collect()
    }

    async fn report_rows(&self, query: &ReportQuery) -> Result<Vec<ReportRow>, BooksError> {
        let clause = query.to_where();
        let sql = format!(
            "SELECT {}, {} AS read_date FROM book_collection b {} ORDER BY {}",
            BOOK_COLUMNS,
            LATEST_READ,
            clause.to_sql(),
            query.order.sql()
        );
        self.fetch_report_rows(&sql, clause.binds()).await
    }

    async fn report_reads(&self, query: &ReportQuery) -> Result<Vec<ReportRow>, BooksError> {
        let clause = query.to_where();
        let sql = format!(
            "SELECT {}, r.read_date AS read_date \
             FROM book_collection b JOIN books_read r ON r.book_collection_id = b.book_collection_id \
             {} ORDER BY substr(r.read_date, 1, 4), {}",
            BOOK_COLUMNS,
            clause.to_sql(),
            query.order.sql()
        );
        self.fetch_report_rows(&sql, clause.binds()).await
    }

    async fn add_tag(&self, book_id: i64, tag: &str) -> Result<TagRecord, BooksError> {
        let tag = normalize_tag(tag)?;
        self.ensure_book(book_id).await?;

        let existing = sqlx::query("SELECT tag_id, book_id, tag FROM tags WHERE book_id = ? AND tag = ?")
            .bind(book_id)
            .bind(&tag)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = existing {
            return row_to_tag(&row);
        }

        let result = sqlx::query("INSERT INTO tags (book_id, tag) VALUES (?, ?)")
            .bind(book_id)
            .bind(&tag)
            .execute(&self.pool)
            .await
            .map_err(|e| BooksError::Storage(format!("Failed to insert tag: {}", e)))?;

        Ok(TagRecord {
            tag_id: result.last_insert_rowid(),
            book_id,
            tag,
        })
    }

    async fn tags_for_book(&self, book_id: i64) -> Result<Vec<String>, BooksError> {
        let rows = sqlx::query("SELECT DISTINCT tag FROM tags WHERE book_id = ? ORDER BY tag")
            .bind(book_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get("tag").map_err(BooksError::from))
            .collect()
    }

    async fn book_tags(&self, book_id: i64) -> Result<Vec<TagRecord>, BooksError> {
        let rows = sqlx::query("SELECT tag_id, book_id, tag FROM tags WHERE book_id = ? ORDER BY tag, tag_id")
            .bind(book_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_tag).collect()
    }

    async fn tag_counts(&self, prefix: Option<&str>) -> Result<Vec<TagCount>, BooksError> {
        let mut binds = Vec::new();
        let filter = match prefix.map(str::trim).filter(|p| !p.is_empty()) {
            Some(p) => {
                binds.push(like_prefix(&p.to_lowercase()));
                "WHERE tag LIKE ? ESCAPE '\\'"
            }
            None => "",
        };
        let sql = format!(
            "SELECT tag, COUNT(*) AS count FROM tags {} GROUP BY tag ORDER BY count DESC, tag",
            filter
        );

        let rows = bind_all(sqlx::query(&sql), &binds).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                Ok(TagCount {
                    tag: row.try_get("tag")?,
                    count: row.try_get("count")?,
                })
            })
            .collect()
    }

    async fn tags_search(&self, fragment: &str) -> Result<Vec<TagRecord>, BooksError> {
        let rows = bind_all(
            sqlx::query("SELECT tag_id, book_id, tag FROM tags WHERE tag LIKE ? ESCAPE '\\' ORDER BY tag, book_id"),
            &[like_contains(fragment.trim())],
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_tag).collect()
    }

    async fn rename_tag(&self, old: &str, new: &str) -> Result<u64, BooksError> {
        let new = normalize_tag(new)?;
        let old = old.trim().to_lowercase();
        if old == new {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;

        // books that already carry the new tag keep that row
        let merged = sqlx::query(
            "DELETE FROM tags WHERE tag = ? AND book_id IN (SELECT book_id FROM tags WHERE tag = ?)",
        )
        .bind(&old)
        .bind(&new)
        .execute(&mut *tx)
        .await?;
        let renamed = sqlx::query("UPDATE tags SET tag = ? WHERE tag = ?")
            .bind(&new)
            .bind(&old)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(merged.rows_affected() + renamed.rows_affected())
    }

    async fn tag_maintenance(&self) -> Result<TagMaintenance, BooksError> {
        let mut tx = self.pool.begin().await?;

        let tags_before: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tags")
            .fetch_one(&mut *tx)
            .await?;
        sqlx::query("UPDATE tags SET tag = lower(trim(tag))")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM tags WHERE tag = ''")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM tags WHERE tag_id NOT IN (SELECT MIN(tag_id) FROM tags GROUP BY book_id, tag)")
            .execute(&mut *tx)
            .await?;
        let tags_after: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tags")
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(TagMaintenance { tags_before, tags_after })
    }

    async fn add_reading_record(&self, book_id: i64, readable_pages: i64, start_date: NaiveDate) -> Result<ReadingRecord, BooksError> {
        if readable_pages <= 0 {
            return Err(BooksError::validation("ReadablePages", "Readable pages must be positive"));
        }
        self.ensure_book(book_id).await?;

        let result = sqlx::query(
            "INSERT INTO reading_records (book_collection_id, start_date, readable_pages) VALUES (?, ?, ?)",
        )
        .bind(book_id)
        .bind(fmt_date(&start_date))
        .bind(readable_pages)
        .execute(&self.pool)
        .await
        .map_err(|e| BooksError::Storage(format!("Failed to insert reading record: {}", e)))?;

        Ok(ReadingRecord {
            record_id: result.last_insert_rowid(),
            book_id,
            start_date,
            readable_pages,
        })
    }

    async fn reading_record(&self, record_id: i64) -> Result<ReadingRecord, BooksError> {
        let row = sqlx::query(
            "SELECT record_id, book_collection_id, start_date, readable_pages FROM reading_records WHERE record_id = ?",
        )
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| BooksError::not_found("Reading record", record_id))?;

        row_to_reading_record(&row)
    }

    async fn reading_records(&self, book_id: i64) -> Result<Vec<ReadingRecord>, BooksError> {
        let rows = sqlx::query(
            "SELECT record_id, book_collection_id, start_date, readable_pages FROM reading_records \
             WHERE book_collection_id = ? ORDER BY start_date, record_id",
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_reading_record).collect()
    }

    async fn add_daily_page(&self, entry: &DailyPage) -> Result<DailyPage, BooksError> {
        if entry.page < 0 {
            return Err(BooksError::validation("Page", "Page must not be negative"));
        }
        self.reading_record(entry.record_id).await?;

        sqlx::query(
            "INSERT INTO daily_page_records (record_id, record_date, page) VALUES (?, ?, ?) \
             ON CONFLICT (record_id, record_date) DO UPDATE SET page = excluded.page",
        )
        .bind(entry.record_id)
        .bind(fmt_date(&entry.record_date))
        .bind(entry.page)
        .execute(&self.pool)
        .await
        .map_err(|e| BooksError::Storage(format!("Failed to insert daily page: {}", e)))?;

        Ok(entry.clone())
    }

    async fn daily_pages(&self, record_id: i64) -> Result<Vec<DailyPage>, BooksError> {
        let rows = sqlx::query(
            "SELECT record_id, record_date, page FROM daily_page_records WHERE record_id = ? ORDER BY record_date",
        )
        .bind(record_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(DailyPage {
                    record_id: row.try_get("record_id")?,
                    record_date: required_date(row, "record_date")?,
                    page: row.try_get("page")?,
                })
            })
            .collect()
    }
}

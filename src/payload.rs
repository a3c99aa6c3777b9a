/// Request payloads and lenient field parsing
///
/// Clients send the collection's historical field names and are loose about
/// types: pages arrive as numbers or strings, flags as bools, 0/1 or yes/no,
/// and copyright dates as a bare year or a full date.

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;

use crate::errors::BooksError;
use crate::store::{CoverType, NewBook, NoteStatusUpdate, ReadRecord};

pub fn parse_pages(value: &Value) -> Result<i64, BooksError> {
    let pages = match value {
        Value::Null => 0,
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| BooksError::validation("Pages", "Pages must be a whole number"))?,
        Value::String(s) if s.trim().is_empty() => 0,
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| BooksError::validation("Pages", "Pages must be a whole number"))?,
        _ => return Err(BooksError::validation("Pages", "Pages must be a whole number")),
    };
    if pages < 0 {
        return Err(BooksError::validation("Pages", "Pages must not be negative"));
    }
    Ok(pages)
}

/// Accepts true/false, 0/1, and yes/no spellings. Missing means false.
pub fn parse_flag(value: &Value, field: &str) -> Result<bool, BooksError> {
    let invalid = || BooksError::validation(field, &format!("{} must be 0/1, true/false or yes/no", field));
    match value {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(invalid()),
        },
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "" | "0" | "no" | "n" | "false" => Ok(false),
            "1" | "yes" | "y" | "true" => Ok(true),
            _ => Err(invalid()),
        },
        _ => Err(invalid()),
    }
}

/// A year means January 1st of that year. Blank and all-zero dates mean unknown.
pub fn parse_copyright(value: &Value) -> Result<Option<NaiveDate>, BooksError> {
    let invalid = || BooksError::validation("CopyrightDate", "CopyrightDate must be a year or a YYYY-MM-DD date");
    let text = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_i64().ok_or_else(invalid)?.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return Err(invalid()),
    };
    if text.is_empty() || text.starts_with("0000") {
        return Ok(None);
    }
    if text.len() == 4 {
        let year = text.parse::<i32>().map_err(|_| invalid())?;
        return NaiveDate::from_ymd_opt(year, 1, 1).map(Some).ok_or_else(invalid);
    }
    let date_part = text.get(..10).ok_or_else(invalid)?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| invalid())
}

/// `YYYY-MM-DD`, or any longer datetime starting with one.
pub fn parse_read_date(raw: &str) -> Result<NaiveDate, BooksError> {
    raw.trim()
        .get(..10)
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        .ok_or_else(|| BooksError::Validation {
            message: format!("'{}' is not a YYYY-MM-DD date", raw),
            field: Some("ReadDate".to_string()),
        })
}

fn text_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

fn text(value: Option<String>) -> String {
    value.map(|s| s.trim().to_string()).unwrap_or_default()
}

/// A book as submitted by clients.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BookPayload {
    #[serde(rename = "Title", default)]
    pub title: Option<String>,
    #[serde(rename = "Author", default)]
    pub author: Option<String>,
    #[serde(rename = "CopyrightDate", default)]
    pub copyright_date: Value,
    #[serde(rename = "ISBNNumber", default)]
    pub isbn: Value,
    #[serde(rename = "ISBNNumber13", default)]
    pub isbn13: Value,
    #[serde(rename = "PublisherName", default)]
    pub publisher: Option<String>,
    #[serde(rename = "CoverType", default)]
    pub cover_type: Option<String>,
    #[serde(rename = "Pages", default)]
    pub pages: Value,
    #[serde(rename = "Category", default)]
    pub category: Option<String>,
    #[serde(rename = "Note", default)]
    pub note: Option<String>,
    #[serde(rename = "Recycled", default)]
    pub recycled: Value,
    #[serde(rename = "Location", default)]
    pub location: Option<String>,
}

impl BookPayload {
    pub fn into_new_book(self, default_location: &str) -> Result<NewBook, BooksError> {
        let title = text(self.title);
        if title.is_empty() {
            return Err(BooksError::validation("Title", "Title cannot be empty"));
        }
        let author = text(self.author);
        if author.is_empty() {
            return Err(BooksError::validation("Author", "Author cannot be empty"));
        }

        let cover_type = match self.cover_type.as_deref().map(str::trim) {
            None | Some("") => CoverType::default(),
            Some(raw) => CoverType::parse(raw).ok_or_else(|| {
                BooksError::validation("CoverType", "CoverType must be Hard, Soft or Digital")
            })?,
        };

        let location = text(self.location);
        let location = if location.is_empty() {
            default_location.to_string()
        } else {
            location
        };

        Ok(NewBook {
            title,
            author,
            copyright_date: parse_copyright(&self.copyright_date)?,
            isbn: text_value(&self.isbn),
            isbn13: text_value(&self.isbn13),
            publisher: text(self.publisher),
            cover_type,
            pages: parse_pages(&self.pages)?,
            category: text(self.category),
            note: self.note.unwrap_or_default(),
            recycled: parse_flag(&self.recycled, "Recycled")?,
            location,
        })
    }
}

/// Full edit of a record, optionally stamping a read at the same time.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateBookPayload {
    #[serde(flatten)]
    pub book: BookPayload,
    #[serde(rename = "ReadDate", default)]
    pub read_date: Option<String>,
    /// When true, record a read dated today.
    #[serde(rename = "ReadToday", default)]
    pub read_today: Value,
}

impl UpdateBookPayload {
    /// The read to record with this edit, if any. An explicit date wins over ReadToday.
    pub fn read_date(&self, today: NaiveDate) -> Result<Option<NaiveDate>, BooksError> {
        if let Some(raw) = self.read_date.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
            return parse_read_date(raw).map(Some);
        }
        if parse_flag(&self.read_today, "ReadToday")? {
            Ok(Some(today))
        } else {
            Ok(None)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadDatePayload {
    #[serde(rename = "BookCollectionID")]
    pub book_id: i64,
    #[serde(rename = "ReadDate")]
    pub read_date: String,
    #[serde(rename = "ReadNote", default)]
    pub read_note: Option<String>,
}

impl ReadDatePayload {
    pub fn to_record(&self) -> Result<ReadRecord, BooksError> {
        Ok(ReadRecord {
            book_id: self.book_id,
            read_date: parse_read_date(&self.read_date)?,
            read_note: self.read_note.clone().unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NoteStatusPayload {
    #[serde(rename = "BookCollectionID")]
    pub book_id: i64,
    #[serde(rename = "Note", default)]
    pub note: Option<String>,
    #[serde(rename = "Recycled", default)]
    pub recycled: Option<Value>,
}

impl NoteStatusPayload {
    pub fn to_update(&self) -> Result<NoteStatusUpdate, BooksError> {
        Ok(NoteStatusUpdate {
            note: self.note.clone(),
            recycled: self
                .recycled
                .as_ref()
                .map(|v| parse_flag(v, "Recycled"))
                .transpose()?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatePagePayload {
    #[serde(rename = "RecordID")]
    pub record_id: i64,
    /// Defaults to today
    #[serde(rename = "RecordDate", default)]
    pub record_date: Option<String>,
    #[serde(rename = "Page")]
    pub page: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IsbnListPayload {
    pub isbn_list: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_pages_accepts_numbers_and_strings() {
        assert_eq!(parse_pages(&json!(412)).unwrap(), 412);
        assert_eq!(parse_pages(&json!(" 96 ")).unwrap(), 96);
        assert_eq!(parse_pages(&Value::Null).unwrap(), 0);
        assert!(parse_pages(&json!(-3)).is_err());
        assert!(parse_pages(&json!("many")).is_err());
    }

    #[test]
    fn test_parse_flag_spellings() {
        assert!(parse_flag(&json!(true), "Recycled").unwrap());
        assert!(parse_flag(&json!(1), "Recycled").unwrap());
        assert!(parse_flag(&json!("Yes"), "Recycled").unwrap());
        assert!(!parse_flag(&json!("0"), "Recycled").unwrap());
        assert!(!parse_flag(&Value::Null, "Recycled").unwrap());
        assert!(parse_flag(&json!(7), "Recycled").is_err());
    }

    #[test]
    fn test_parse_copyright_forms() {
        let jan1 = NaiveDate::from_ymd_opt(1999, 1, 1);
        assert_eq!(parse_copyright(&json!("1999")).unwrap(), jan1);
        assert_eq!(parse_copyright(&json!(1999)).unwrap(), jan1);
        assert_eq!(
            parse_copyright(&json!("1999-05-01 00:00:00")).unwrap(),
            NaiveDate::from_ymd_opt(1999, 5, 1)
        );
        assert_eq!(parse_copyright(&json!("0000-00-00")).unwrap(), None);
        assert_eq!(parse_copyright(&json!("")).unwrap(), None);
        assert!(parse_copyright(&json!("spring")).is_err());
    }

    #[test]
    fn test_parse_read_date_takes_prefix() {
        assert_eq!(
            parse_read_date("2021-07-04T10:00:00").unwrap(),
            NaiveDate::from_ymd_opt(2021, 7, 4).unwrap()
        );
        assert!(parse_read_date("07/04/2021").is_err());
    }

    #[test]
    fn test_book_payload_defaults_and_requirements() {
        let payload: BookPayload = serde_json::from_value(json!({
            "Title": " Emma ",
            "Author": "Austen, Jane",
            "Pages": "474",
            "ISBNNumber13": 9780141439587u64,
            "CoverType": "hardcover",
            "Recycled": "no"
        }))
        .unwrap();
        let book = payload.into_new_book("Main Collection").unwrap();
        assert_eq!(book.title, "Emma");
        assert_eq!(book.pages, 474);
        assert_eq!(book.isbn13, "9780141439587");
        assert_eq!(book.cover_type, CoverType::Hard);
        assert_eq!(book.location, "Main Collection");
        assert!(!book.recycled);

        let missing_author: BookPayload = serde_json::from_value(json!({"Title": "Emma"})).unwrap();
        match missing_author.into_new_book("Main Collection") {
            Err(BooksError::Validation { field, .. }) => assert_eq!(field.as_deref(), Some("Author")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_update_payload_read_date() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let payload: UpdateBookPayload = serde_json::from_value(json!({
            "Title": "Emma", "Author": "Austen", "ReadToday": 1
        }))
        .unwrap();
        assert_eq!(payload.read_date(today).unwrap(), Some(today));

        let payload: UpdateBookPayload = serde_json::from_value(json!({
            "Title": "Emma", "Author": "Austen", "ReadDate": "2020-02-02", "ReadToday": true
        }))
        .unwrap();
        assert_eq!(payload.read_date(today).unwrap(), NaiveDate::from_ymd_opt(2020, 2, 2));

        let payload: UpdateBookPayload =
            serde_json::from_value(json!({"Title": "Emma", "Author": "Austen"})).unwrap();
        assert_eq!(payload.read_date(today).unwrap(), None);
    }

    #[test]
    fn test_note_status_payload() {
        let payload: NoteStatusPayload =
            serde_json::from_value(json!({"BookCollectionID": 3, "Recycled": 1})).unwrap();
        let update = payload.to_update().unwrap();
        assert_eq!(update.recycled, Some(true));
        assert_eq!(update.note, None);
    }
}

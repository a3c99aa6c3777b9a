/// Report shaping: column projection, by-year grouping, and year ranking
///
/// Rows come from the store already filtered and ordered; this module only
/// turns them into tables with totals.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use serde_json::{json, Value};

use crate::query::ReportColumn;
use crate::store::{fmt_date, PagesOnDate, ReadBook, ReportRow, RowSet, TableRow, YearSummary};

/// A rendered report table with its entry count and page total.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportTable {
    pub count: usize,
    pub total_pages: i64,
    #[serde(flatten)]
    pub table: RowSet,
}

/// One read year of a by-year report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearTable {
    pub year: i32,
    #[serde(flatten)]
    pub report: ReportTable,
}

pub fn report_table(rows: &[ReportRow], columns: &[ReportColumn]) -> ReportTable {
    ReportTable {
        count: rows.len(),
        total_pages: rows.iter().map(|r| r.book.pages).sum(),
        table: RowSet {
            header: columns.iter().map(|c| c.name().to_string()).collect(),
            data: rows.iter().map(|r| project(r, columns)).collect(),
        },
    }
}

fn project(row: &ReportRow, columns: &[ReportColumn]) -> Vec<Value> {
    let book = &row.book;
    columns
        .iter()
        .map(|column| match column {
            ReportColumn::Author => json!(book.author),
            ReportColumn::Title => json!(book.title),
            ReportColumn::IsbnNumber => json!(book.isbn),
            ReportColumn::IsbnNumber13 => json!(book.isbn13),
            ReportColumn::PublisherName => json!(book.publisher),
            ReportColumn::Pages => json!(book.pages),
            ReportColumn::CopyrightDate => book
                .copyright_date
                .map(|d| json!(d.year()))
                .unwrap_or(Value::Null),
            ReportColumn::ReadDate => json!(row.read_date.as_ref().map(fmt_date).unwrap_or_default()),
            ReportColumn::Location => json!(book.location),
            ReportColumn::Recycled => json!(book.recycled as i64),
            ReportColumn::CoverType => json!(book.cover_type.as_str()),
        })
        .collect()
}

/// Split rows (ordered by read year) into one table per year that has reads.
pub fn group_by_read_year(rows: &[ReportRow], columns: &[ReportColumn]) -> Vec<YearTable> {
    let mut groups: Vec<(i32, Vec<ReportRow>)> = Vec::new();
    for row in rows {
        let Some(year) = row.read_date.map(|d| d.year()) else {
            continue;
        };
        match groups.last_mut() {
            Some((last, members)) if *last == year => members.push(row.clone()),
            _ => groups.push((year, vec![row.clone()])),
        }
    }
    groups.sort_by_key(|(year, _)| *year);

    groups
        .into_iter()
        .map(|(year, members)| YearTable {
            year,
            report: report_table(&members, columns),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedYear {
    pub rank: usize,
    pub year: i32,
    pub books: i64,
    pub pages: i64,
}

/// Rank years by pages read, most first. Ties keep ascending year order.
pub fn rank_years(summaries: &[YearSummary]) -> Vec<RankedYear> {
    let mut sorted = summaries.to_vec();
    sorted.sort_by(|a, b| b.pages.cmp(&a.pages));
    sorted
        .into_iter()
        .enumerate()
        .map(|(i, s)| RankedYear {
            rank: i + 1,
            year: s.year,
            books: s.books,
            pages: s.pages,
        })
        .collect()
}

impl TableRow for RankedYear {
    fn header() -> Vec<&'static str> {
        vec!["rank", "year", "books read", "pages read"]
    }

    fn cells(&self) -> Vec<Value> {
        vec![json!(self.rank), json!(self.year), json!(self.books), json!(self.pages)]
    }
}

/// A point of a year's running page total.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearProgressPoint {
    pub year: i32,
    /// Day of the year, 1 on January 1.
    pub day: u32,
    pub read_date: NaiveDate,
    /// Pages finished so far in `year`, this date included.
    pub pages: i64,
}

/// Running page totals by read date, restarting each year.
pub fn year_progress(points: &[PagesOnDate]) -> Vec<YearProgressPoint> {
    let mut total = 0;
    let mut current = None;
    points
        .iter()
        .map(|p| {
            let year = p.read_date.year();
            if current != Some(year) {
                current = Some(year);
                total = 0;
            }
            total += p.pages;
            YearProgressPoint {
                year,
                day: p.read_date.ordinal(),
                read_date: p.read_date,
                pages: total,
            }
        })
        .collect()
}

impl TableRow for YearProgressPoint {
    fn header() -> Vec<&'static str> {
        vec!["Year", "Day", "ReadDate", "Pages"]
    }

    fn cells(&self) -> Vec<Value> {
        vec![
            json!(self.year),
            json!(self.day),
            json!(fmt_date(&self.read_date)),
            json!(self.pages),
        ]
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let head: String = text.chars().take(max).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

/// One line of the recent-reads listing.
pub fn recent_line(read: &ReadBook) -> String {
    format!(
        "{}  {}  {}",
        fmt_date(&read.read_date),
        truncate(&read.book.title, 28),
        truncate(&read.book.author, 23)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Book, CoverType};

    fn book(id: i64, title: &str, pages: i64) -> Book {
        Book {
            id,
            title: title.to_string(),
            author: "Austen, Jane".to_string(),
            copyright_date: NaiveDate::from_ymd_opt(1815, 12, 23),
            isbn: "0141439580".to_string(),
            publisher: "Penguin".to_string(),
            cover_type: CoverType::Soft,
            pages,
            category: String::new(),
            note: String::new(),
            recycled: false,
            location: "Main Collection".to_string(),
            isbn13: String::new(),
        }
    }

    fn row(id: i64, pages: i64, read: Option<(i32, u32, u32)>) -> ReportRow {
        ReportRow {
            book: book(id, "Emma", pages),
            read_date: read.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
        }
    }

    #[test]
    fn test_report_table_projects_columns_and_totals() {
        let rows = vec![row(1, 474, Some((2020, 1, 2))), row(2, 26, None)];
        let columns = [ReportColumn::Title, ReportColumn::CopyrightDate, ReportColumn::ReadDate];
        let report = report_table(&rows, &columns);

        assert_eq!(report.count, 2);
        assert_eq!(report.total_pages, 500);
        assert_eq!(report.table.header, vec!["Title", "CopyrightDate", "ReadDate"]);
        assert_eq!(report.table.data[0], vec![json!("Emma"), json!(1815), json!("2020-01-02")]);
        assert_eq!(report.table.data[1][2], json!(""));
    }

    #[test]
    fn test_report_table_serializes_flat() {
        let report = report_table(&[row(1, 10, None)], &[ReportColumn::Author]);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["count"], 1);
        assert_eq!(value["header"], json!(["Author"]));
        assert_eq!(value["data"][0][0], "Austen, Jane");
    }

    #[test]
    fn test_group_by_read_year() {
        let rows = vec![
            row(1, 100, Some((2019, 3, 1))),
            row(2, 200, Some((2019, 7, 1))),
            row(3, 50, Some((2022, 1, 1))),
        ];
        let groups = group_by_read_year(&rows, &[ReportColumn::Title]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].year, 2019);
        assert_eq!(groups[0].report.count, 2);
        assert_eq!(groups[0].report.total_pages, 300);
        assert_eq!(groups[1].year, 2022);
    }

    #[test]
    fn test_rank_years_by_pages() {
        let summaries = vec![
            YearSummary { year: 2019, pages: 3000, books: 10 },
            YearSummary { year: 2020, pages: 9000, books: 25 },
            YearSummary { year: 2021, pages: 3000, books: 8 },
        ];
        let ranked = rank_years(&summaries);
        assert_eq!(ranked[0], RankedYear { rank: 1, year: 2020, books: 25, pages: 9000 });
        assert_eq!(ranked[1].year, 2019);
        assert_eq!(ranked[2].rank, 3);

        let set = RowSet::from_rows(&ranked);
        assert_eq!(set.header, vec!["rank", "year", "books read", "pages read"]);
    }

    #[test]
    fn test_recycled_column_renders_as_flag_number() {
        let mut recycled = row(1, 10, None);
        recycled.book.recycled = true;
        let report = report_table(&[recycled, row(2, 10, None)], &[ReportColumn::Recycled]);
        assert_eq!(report.table.data, vec![vec![json!(1)], vec![json!(0)]]);
    }

    #[test]
    fn test_year_progress_restarts_each_year() {
        let on = |y, m, d, pages| PagesOnDate {
            read_date: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
            pages,
        };
        let points = year_progress(&[
            on(2020, 12, 30, 40),
            on(2021, 1, 3, 300),
            on(2021, 2, 1, 120),
        ]);

        assert_eq!(points.len(), 3);
        assert_eq!((points[0].year, points[0].day, points[0].pages), (2020, 365, 40));
        assert_eq!((points[1].year, points[1].day, points[1].pages), (2021, 3, 300));
        assert_eq!((points[2].day, points[2].pages), (32, 420));

        let set = RowSet::from_rows(&points);
        assert_eq!(set.header, vec!["Year", "Day", "ReadDate", "Pages"]);
        assert_eq!(set.data[2], vec![json!(2021), json!(32), json!("2021-02-01"), json!(420)]);
    }

    #[test]
    fn test_recent_line_truncates() {
        let read = ReadBook {
            book: Book {
                author: "Garcia Marquez, Gabriel Jose".to_string(),
                ..book(1, "One Hundred Years of Solitude (Perennial Classics)", 417)
            },
            read_date: NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
            read_note: String::new(),
        };
        assert_eq!(
            recent_line(&read),
            "2024-02-29  One Hundred Years of Solitud...  Garcia Marquez, Gabriel..."
        );
    }
}

/// Reading completion estimates
///
/// Fits a line through (page reached, days since start) and extrapolates to
/// the readable page count. The earliest/latest range comes from the pace
/// between each pair of consecutive entries.

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::errors::BooksError;
use crate::store::{fmt_date, DailyPage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Estimate {
    pub finish: NaiveDate,
    pub earliest: NaiveDate,
    pub latest: NaiveDate,
}

impl Estimate {
    /// `[finish, earliest, latest]` as dates.
    pub fn as_strings(&self) -> [String; 3] {
        [fmt_date(&self.finish), fmt_date(&self.earliest), fmt_date(&self.latest)]
    }
}

pub fn day_number(start: NaiveDate, date: NaiveDate) -> i64 {
    (date - start).num_days()
}

/// Estimate the finish date of a reading started on `start`.
///
/// `pages` must be in date order. A (page 0, day 0) anchor is added unless an
/// entry already falls on or before the start date.
pub fn estimate_completion(
    start: NaiveDate,
    readable_pages: i64,
    pages: &[DailyPage],
) -> Result<Estimate, BooksError> {
    if readable_pages <= 0 {
        return Err(BooksError::validation("ReadablePages", "Readable pages must be positive"));
    }

    let mut points: Vec<(f64, f64)> = Vec::with_capacity(pages.len() + 1);
    if !pages.iter().any(|p| day_number(start, p.record_date) <= 0) {
        points.push((0.0, 0.0));
    }
    points.extend(
        pages
            .iter()
            .map(|p| (p.page as f64, day_number(start, p.record_date) as f64)),
    );

    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
    let sxy: f64 = points.iter().map(|(x, y)| (x - mean_x) * (y - mean_y)).sum();
    if sxx == 0.0 {
        return Err(BooksError::Validation {
            message: "At least two different page entries are needed for an estimate".to_string(),
            field: Some("Page".to_string()),
        });
    }

    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    let total = readable_pages as f64;
    let finish_day = (slope * total + intercept) as i64;

    let max_x = points.iter().map(|(x, _)| *x).fold(f64::MIN, f64::max);
    let max_y = points.iter().map(|(_, y)| *y).fold(f64::MIN, f64::max);
    let mut range: Option<(i64, i64)> = None;
    for pair in points.windows(2) {
        let (dx, dy) = (pair[1].0 - pair[0].0, pair[1].1 - pair[0].1);
        if dx == 0.0 {
            continue;
        }
        let day = ((dy / dx) * (total - max_x) + max_y) as i64;
        range = Some(match range {
            Some((lo, hi)) => (lo.min(day), hi.max(day)),
            None => (day, day),
        });
    }
    let (earliest_day, latest_day) = range.unwrap_or((finish_day, finish_day));

    Ok(Estimate {
        finish: offset_day(start, finish_day)?,
        earliest: offset_day(start, earliest_day)?,
        latest: offset_day(start, latest_day)?,
    })
}

fn offset_day(start: NaiveDate, days: i64) -> Result<NaiveDate, BooksError> {
    Duration::try_days(days)
        .and_then(|d| start.checked_add_signed(d))
        .ok_or_else(|| {
            BooksError::validation("ReadablePages", "Estimated finish date is out of range")
        })
}

//! Window generation.
//!
//! A date range is covered by windows starting at the range start and
//! advancing by a fixed stride until the next start would pass the range
//! end. The iterator is lazy and `Clone`, so a generated sequence can be
//! replayed from the beginning.

use chrono::{Days, NaiveDate};

use crate::model::{DATE_FORMAT, ExtractError, Window};

/// Default stride between window starts, matching the API's 16-day span.
pub const DEFAULT_STRIDE_DAYS: u32 = 16;

/// Parse a `YYYY-MM-DD` calendar date.
pub fn parse_date(value: &str) -> Result<NaiveDate, ExtractError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|_| ExtractError::InvalidDateFormat(value.to_string()))
}

#[derive(Debug, Clone)]
pub struct WindowIter {
    next: Option<NaiveDate>,
    end: NaiveDate,
    stride: Days,
}

impl Iterator for WindowIter {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        let current = self.next?;
        if current > self.end {
            self.next = None;
            return None;
        }
        self.next = current.checked_add_days(self.stride);
        Some(Window::new(current))
    }
}

/// Windows covering `start..=end` (dates as strings). An inverted range
/// yields nothing.
pub fn windows(start: &str, end: &str, stride_days: u32) -> Result<WindowIter, ExtractError> {
    let start = parse_date(start)?;
    let end = parse_date(end)?;
    windows_between(start, end, stride_days)
}

pub fn windows_between(start: NaiveDate, end: NaiveDate, stride_days: u32) -> Result<WindowIter, ExtractError> {
    if stride_days == 0 {
        return Err(ExtractError::InvalidStride);
    }
    Ok(WindowIter {
        next: Some(start),
        end,
        stride: Days::new(u64::from(stride_days)),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

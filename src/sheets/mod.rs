//! Spreadsheet API seam
//!
//! Everything the form core needs from a spreadsheet backend goes through
//! [`SheetsApi`]. [`MemorySheets`] keeps grids in process; the Google client
//! (feature `web`) talks to the Sheets v4 and Drive v3 REST APIs.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{SheetsError, SheetsResult};

#[cfg(feature = "web")]
pub mod google;
pub mod memory;

#[cfg(feature = "web")]
pub use google::GoogleSheetsClient;
pub use memory::MemorySheets;

lazy_static! {
    static ref CELL_REGEX: Regex = Regex::new(r"^([A-Za-z]+)([0-9]+)?$").unwrap();
}

/// Cell values of a range, row by row; rows may be ragged
pub type Grid = Vec<Vec<String>>;

/// Cells of one written row; `None` leaves the cell as it is
pub type Row = Vec<Option<String>>;

/// A spreadsheet visible to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpreadsheetRef {
    pub id: String,
    pub name: String,
}

/// Operations the application needs from a spreadsheet backend
#[async_trait]
pub trait SheetsApi: Send + Sync {
    /// Read the cells of an A1-notation range as formatted strings
    async fn read_range(&self, spreadsheet_id: &str, range: &str) -> SheetsResult<Grid>;

    /// Append one row after the last row of the table found at `range`
    async fn append_row(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: Row,
    ) -> SheetsResult<()>;

    /// Overwrite one row starting at the top-left cell of `range`
    async fn update_row(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: Row,
    ) -> SheetsResult<()>;

    /// Overwrite cells starting at the top-left of `range`
    async fn update_range(
        &self,
        spreadsheet_id: &str,
        range: &str,
        rows: Grid,
    ) -> SheetsResult<()>;

    /// Spreadsheets visible to the client, optionally filtered by name
    async fn list_spreadsheets(&self, filter: Option<&str>) -> SheetsResult<Vec<SpreadsheetRef>>;

    /// Titles of the tabs of a spreadsheet, in order
    async fn sheet_titles(&self, spreadsheet_id: &str) -> SheetsResult<Vec<String>>;
}

/// Quote a tab name for use in A1 notation (`My Tab` -> `'My Tab'`)
pub fn quote_sheet(name: &str) -> String {
    format!("'{}'", name.replace('\'', "''"))
}

/// A1 range covering a whole tab
pub fn sheet_range(name: &str) -> String {
    quote_sheet(name)
}

/// A1 range of the single cell `col` (0-based) / `row` (1-based) in a tab
pub fn cell_range(name: &str, col: usize, row: usize) -> String {
    format!("{}!{}{}", quote_sheet(name), col_to_letter(col + 1), row)
}

/// Convert a 1-based column number to letters (1 -> A, 27 -> AA)
pub fn col_to_letter(col: usize) -> String {
    let mut col = col;
    let mut result = String::new();
    while col > 0 {
        col -= 1;
        result.push(((col % 26) as u8 + b'A') as char);
        col /= 26;
    }
    result.chars().rev().collect()
}

/// Convert column letters to a 1-based column number (A -> 1, AA -> 27)
pub fn letter_to_col(letters: &str) -> usize {
    letters
        .chars()
        .fold(0, |acc, c| acc * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1))
}

/// Parsed A1-notation range: `'Tab'!B2:D10`, `Tab!A:A`, `Tab`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRef {
    pub sheet: String,
    /// 0-based (row, col) of the top-left cell
    pub start: (usize, usize),
    /// 0-based inclusive (row, col) bound; `None` components are unbounded
    pub end: (Option<usize>, Option<usize>),
}

impl RangeRef {
    pub fn parse(range: &str) -> SheetsResult<Self> {
        let invalid = || SheetsError::InvalidRange(range.to_string());
        let (sheet, cells) = split_sheet(range).ok_or_else(invalid)?;
        if sheet.is_empty() {
            return Err(invalid());
        }

        let Some(cells) = cells else {
            return Ok(RangeRef {
                sheet,
                start: (0, 0),
                end: (None, None),
            });
        };

        let (first, second) = match cells.split_once(':') {
            Some((a, b)) => (a, Some(b)),
            None => (cells, None),
        };
        let (start_col, start_row) = parse_cell(first).ok_or_else(invalid)?;
        let start = (start_row.unwrap_or(0), start_col);

        let end = match second {
            Some(cell) => {
                let (col, row) = parse_cell(cell).ok_or_else(invalid)?;
                (row, Some(col))
            }
            None if start_row.is_some() => (Some(start.0), Some(start.1)),
            None => (None, Some(start.1)),
        };

        Ok(RangeRef { sheet, start, end })
    }
}

/// Split `'Tab'!A1` into the unquoted tab name and the cell part
fn split_sheet(range: &str) -> Option<(String, Option<&str>)> {
    let range = range.trim();
    if let Some(rest) = range.strip_prefix('\'') {
        let mut name = String::new();
        let mut chars = rest.char_indices();
        while let Some((i, c)) = chars.next() {
            if c == '\'' {
                if rest[i + 1..].starts_with('\'') {
                    name.push('\'');
                    chars.next();
                    continue;
                }
                let tail = &rest[i + 1..];
                return match tail.strip_prefix('!') {
                    Some(cells) => Some((name, Some(cells))),
                    None if tail.is_empty() => Some((name, None)),
                    None => None,
                };
            }
            name.push(c);
        }
        None
    } else {
        match range.rsplit_once('!') {
            Some((sheet, cells)) => Some((sheet.to_string(), Some(cells))),
            None => Some((range.to_string(), None)),
        }
    }
}

/// Parse `B7` or `B` into (0-based col, optional 0-based row)
fn parse_cell(cell: &str) -> Option<(usize, Option<usize>)> {
    let caps = CELL_REGEX.captures(cell.trim())?;
    let col = letter_to_col(caps.get(1)?.as_str()) - 1;
    let row = match caps.get(2) {
        Some(m) => {
            let row = m.as_str().parse::<usize>().ok()?;
            if row == 0 {
                return None;
            }
            Some(row - 1)
        }
        None => None,
    };
    Some((col, row))
}

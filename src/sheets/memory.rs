use async_trait::async_trait;
use indexmap::IndexMap;
use std::sync::{Mutex, RwLock};

use super::{Grid, RangeRef, Row, SheetsApi, SpreadsheetRef};
use crate::error::{SheetsError, SheetsResult};

#[derive(Debug, Default)]
struct Book {
    name: String,
    tabs: IndexMap<String, Grid>,
}

/// In-process spreadsheet store
///
/// Behaves like the Sheets API for the calls the application makes: reads
/// drop trailing empty rows/cells, appends land after the last non-empty
/// row, a leading `'` on a written cell marks literal text and is not
/// stored. Used by the CLI and the tests.
#[derive(Debug, Default)]
pub struct MemorySheets {
    books: RwLock<IndexMap<String, Book>>,
    fail_next_write: Mutex<Option<SheetsError>>,
}

impl MemorySheets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a spreadsheet (no-op on the name if it already exists)
    pub fn add_spreadsheet(&self, id: &str, name: &str) {
        let mut books = self.books.write().unwrap_or_else(|e| e.into_inner());
        books.entry(id.to_string()).or_insert_with(|| Book {
            name: name.to_string(),
            tabs: IndexMap::new(),
        });
    }

    /// Replace (or create) a tab's contents, creating the spreadsheet if needed
    pub fn set_tab(&self, id: &str, tab: &str, grid: Grid) {
        let mut books = self.books.write().unwrap_or_else(|e| e.into_inner());
        let book = books.entry(id.to_string()).or_insert_with(|| Book {
            name: id.to_string(),
            tabs: IndexMap::new(),
        });
        book.tabs.insert(tab.to_string(), grid);
    }

    /// Current contents of a tab, exactly as stored
    pub fn tab(&self, id: &str, tab: &str) -> Option<Grid> {
        let books = self.books.read().unwrap_or_else(|e| e.into_inner());
        books.get(id).and_then(|b| b.tabs.get(tab)).cloned()
    }

    /// Make the next append/update fail with `err`
    pub fn fail_next_write(&self, err: SheetsError) {
        *self.fail_next_write.lock().unwrap_or_else(|e| e.into_inner()) = Some(err);
    }

    fn take_failure(&self) -> SheetsResult<()> {
        match self
            .fail_next_write
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn with_tab<T>(
        &self,
        id: &str,
        sheet: &str,
        f: impl FnOnce(&mut Grid) -> T,
    ) -> SheetsResult<T> {
        let mut books = self.books.write().unwrap_or_else(|e| e.into_inner());
        let book = books
            .get_mut(id)
            .ok_or_else(|| SheetsError::NotFound(format!("spreadsheet {}", id)))?;
        let grid = book
            .tabs
            .get_mut(sheet)
            .ok_or_else(|| SheetsError::NotFound(format!("sheet {}", sheet)))?;
        Ok(f(grid))
    }
}

fn is_blank(row: &[String]) -> bool {
    row.iter().all(|c| c.trim().is_empty())
}

fn put(grid: &mut Grid, row: usize, col: usize, value: String) {
    let value = match value.strip_prefix('\'') {
        Some(literal) => literal.to_string(),
        None => value,
    };
    if grid.len() <= row {
        grid.resize(row + 1, Vec::new());
    }
    let cells = &mut grid[row];
    if cells.len() <= col {
        cells.resize(col + 1, String::new());
    }
    cells[col] = value;
}

fn put_row(grid: &mut Grid, row: usize, start_col: usize, values: Row) {
    for (j, value) in values.into_iter().enumerate() {
        if let Some(value) = value {
            put(grid, row, start_col + j, value);
        }
    }
}

#[async_trait]
impl SheetsApi for MemorySheets {
    async fn read_range(&self, spreadsheet_id: &str, range: &str) -> SheetsResult<Grid> {
        let range = RangeRef::parse(range)?;
        let (row_end, col_end) = range.end;

        self.with_tab(spreadsheet_id, &range.sheet, |grid| {
            let mut out: Grid = grid
                .iter()
                .enumerate()
                .skip(range.start.0)
                .take_while(|(i, _)| row_end.is_none_or(|end| *i <= end))
                .map(|(_, row)| {
                    let mut cells: Vec<String> = row
                        .iter()
                        .enumerate()
                        .skip(range.start.1)
                        .take_while(|(j, _)| col_end.is_none_or(|end| *j <= end))
                        .map(|(_, c)| c.clone())
                        .collect();
                    while cells.last().is_some_and(|c| c.is_empty()) {
                        cells.pop();
                    }
                    cells
                })
                .collect();
            while out.last().is_some_and(|r| r.is_empty()) {
                out.pop();
            }
            out
        })
    }

    async fn append_row(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: Row,
    ) -> SheetsResult<()> {
        let range = RangeRef::parse(range)?;
        self.take_failure()?;

        self.with_tab(spreadsheet_id, &range.sheet, |grid| {
            let row = grid
                .iter()
                .rposition(|r| !is_blank(r))
                .map(|last| last + 1)
                .unwrap_or(range.start.0);
            put_row(grid, row, range.start.1, values);
        })
    }

    async fn update_row(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: Row,
    ) -> SheetsResult<()> {
        let range = RangeRef::parse(range)?;
        self.take_failure()?;

        self.with_tab(spreadsheet_id, &range.sheet, |grid| {
            put_row(grid, range.start.0, range.start.1, values);
        })
    }

    async fn update_range(
        &self,
        spreadsheet_id: &str,
        range: &str,
        rows: Grid,
    ) -> SheetsResult<()> {
        let range = RangeRef::parse(range)?;
        self.take_failure()?;

        self.with_tab(spreadsheet_id, &range.sheet, |grid| {
            for (i, row) in rows.into_iter().enumerate() {
                for (j, value) in row.into_iter().enumerate() {
                    put(grid, range.start.0 + i, range.start.1 + j, value);
                }
            }
        })
    }

    async fn list_spreadsheets(&self, filter: Option<&str>) -> SheetsResult<Vec<SpreadsheetRef>> {
        let needle = filter.map(|f| f.trim().to_lowercase()).unwrap_or_default();
        let books = self.books.read().unwrap_or_else(|e| e.into_inner());
        Ok(books
            .iter()
            .filter(|(_, b)| b.name.to_lowercase().contains(&needle))
            .map(|(id, b)| SpreadsheetRef {
                id: id.clone(),
                name: b.name.clone(),
            })
            .collect())
    }

    async fn sheet_titles(&self, spreadsheet_id: &str) -> SheetsResult<Vec<String>> {
        let books = self.books.read().unwrap_or_else(|e| e.into_inner());
        books
            .get(spreadsheet_id)
            .map(|b| b.tabs.keys().cloned().collect())
            .ok_or_else(|| SheetsError::NotFound(format!("spreadsheet {}", spreadsheet_id)))
    }
}

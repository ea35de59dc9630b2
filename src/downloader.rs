use crate::sheets::Grid;
use std::error::Error;

/// Convert a grid to CSV format
///
/// Rows are written as they are; ragged rows stay ragged. Fields holding
/// commas, quotes or newlines are quoted.
///
/// # Arguments
/// * `grid` - Rows to export
///
/// # Returns
/// * `Result<String, Box<dyn Error>>` - CSV content as a string or an error
///
/// # Examples
/// ```
/// use sheetforms::downloader::to_csv;
///
/// let grid = vec![vec!["Name".to_string()], vec!["Smith, Ann".to_string()]];
/// assert_eq!(to_csv(&grid).unwrap(), "Name\n\"Smith, Ann\"\n");
/// ```
pub fn to_csv(grid: &Grid) -> Result<String, Box<dyn Error>> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());

    for row in grid {
        writer.write_record(row)?;
    }

    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    Ok(String::from_utf8(bytes)?)
}

/// Convert a grid to XLSX format
///
/// Cells that parse as numbers are written as numbers so they stay numeric
/// in Excel; everything else is written as a string.
///
/// # Arguments
/// * `grid` - Rows to export
/// * `sheet_name` - Name of the single worksheet
///
/// # Returns
/// * `Result<Vec<u8>, Box<dyn Error>>` - XLSX file content as bytes or an error
#[cfg(feature = "web")]
pub fn to_xlsx(grid: &Grid, sheet_name: &str) -> Result<Vec<u8>, Box<dyn Error>> {
    use rust_xlsxwriter::{Workbook, Worksheet};

    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();
    worksheet.set_name(xlsx_sheet_name(sheet_name))?;

    for (r, row) in grid.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            let (r, c) = (u32::try_from(r)?, u16::try_from(c)?);
            match value.trim().parse::<f64>() {
                Ok(number) if number.is_finite() => {
                    worksheet.write_number(r, c, number)?;
                }
                _ => {
                    worksheet.write_string(r, c, value.as_str())?;
                }
            }
        }
    }

    workbook.push_worksheet(worksheet);
    let buffer = workbook.save_to_buffer()?;

    Ok(buffer)
}

/// Excel limits worksheet names to 31 characters without `[]:*?/\`
#[cfg(feature = "web")]
fn xlsx_sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | ':' | '*' | '?' | '/' | '\\'))
        .take(31)
        .collect();
    let cleaned = cleaned.trim_matches('\'').to_string();
    if cleaned.is_empty() {
        "Sheet1".to_string()
    } else {
        cleaned
    }
}

use crate::sheets::Grid;
use std::error::Error;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Load a grid from a CSV file
///
/// Every record becomes one row, the header included. Rows may have
/// different lengths; nothing is trimmed or converted.
///
/// # Arguments
/// * `filepath` - Path to the CSV file to load
///
/// # Returns
/// * `Result<Grid, Box<dyn Error>>` - The rows of the file or an error
///
/// # Examples
/// ```no_run
/// use sheetforms::loader::from_csv;
///
/// match from_csv("input.csv") {
///     Ok(grid) => println!("Loaded {} rows", grid.len()),
///     Err(e) => eprintln!("Error loading CSV: {}", e),
/// }
/// ```
pub fn from_csv(filepath: impl AsRef<Path>) -> Result<Grid, Box<dyn Error>> {
    let file = File::open(filepath)?;
    from_csv_reader(file)
}

/// Load a grid from any CSV source (an uploaded body, a file, ...)
pub fn from_csv_reader<R: Read>(reader: R) -> Result<Grid, Box<dyn Error>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut grid = Grid::new();
    for record in reader.records() {
        let record = record?;
        grid.push(record.iter().map(str::to_string).collect());
    }

    if grid.is_empty() {
        return Err("CSV file is empty".into());
    }

    log::debug!("Loaded {} CSV rows", grid.len());
    Ok(grid)
}

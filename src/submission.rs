use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{SheetsResult, SubmitError, WriteError};
use crate::form::validate;
use crate::schema::{FieldDescriptor, FormSchema};
use crate::sheets::{Row, SheetsApi, cell_range, quote_sheet, sheet_range};
use crate::value::FieldValue;

/// Validated values of one submission, in schema order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubmissionRecord {
    values: IndexMap<String, FieldValue>,
}

impl SubmissionRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: FieldValue) {
        self.values.insert(field.into(), value);
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Lay the record out as sheet cells, one per schema column
    ///
    /// Columns without a field or without a value are blanked; computed
    /// columns are `None` so the write leaves them untouched.
    pub fn to_row(&self, schema: &FormSchema) -> Row {
        let mut row: Row = (0..schema.width())
            .map(|column| (!schema.is_computed(column)).then(String::new))
            .collect();
        for field in schema.fields() {
            if let Some(value) = self.values.get(&field.name) {
                row[field.column] = Some(value.to_cell(&field.kind));
            }
        }
        row
    }
}

/// Spreadsheet and tab a form writes to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetTarget {
    pub spreadsheet_id: String,
    pub sheet: String,
}

impl SheetTarget {
    pub fn new(spreadsheet_id: impl Into<String>, sheet: impl Into<String>) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.into(),
            sheet: sheet.into(),
        }
    }
}

/// What a successful write did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum SubmitOutcome {
    /// A new row was appended
    Appended,

    /// An existing row (1-based sheet row number) was overwritten
    Updated { row: usize },
}

/// Validate raw values and write the resulting record
///
/// # Arguments
/// * `client` - Spreadsheet backend
/// * `schema` - Schema the values are validated against
/// * `values` - Raw input keyed by field name; unknown names are ignored
/// * `target` - Spreadsheet and tab to write to
///
/// # Returns
/// * `Ok(SubmitOutcome)` - The row was written
/// * `Err(SubmitError::Validation)` - Nothing was written
/// * `Err(SubmitError::Write)` - The API call failed; the record is inside the error
pub async fn submit<C: SheetsApi + ?Sized>(
    client: &C,
    schema: &FormSchema,
    values: &HashMap<String, String>,
    target: &SheetTarget,
) -> Result<SubmitOutcome, SubmitError> {
    let record = validate(schema, values)?;
    Ok(write_record(client, schema, &record, target).await?)
}

/// Write a validated record with exactly one API write call
///
/// Appends a row, or when the schema has a key field, overwrites the first
/// data row of the target whose key cell matches (appending when none does).
/// Computed columns are never written. No retry is attempted.
pub async fn write_record<C: SheetsApi + ?Sized>(
    client: &C,
    schema: &FormSchema,
    record: &SubmissionRecord,
    target: &SheetTarget,
) -> Result<SubmitOutcome, WriteError> {
    let row = record.to_row(schema);
    let key = schema
        .key_field()
        .and_then(|field| record.get(&field.name).map(|v| (field, v.to_cell(&field.kind))));

    let result = match key {
        Some((field, key_cell)) => upsert(client, field, &key_cell, row, target).await,
        None => append(client, row, target).await,
    };

    match result {
        Ok(outcome) => {
            log::info!(
                "Wrote submission to {} in spreadsheet {}: {:?}",
                target.sheet,
                target.spreadsheet_id,
                outcome
            );
            Ok(outcome)
        }
        Err(source) => {
            log::error!("Failed to write submission to {}: {}", target.sheet, source);
            Err(WriteError {
                record: record.clone(),
                source,
            })
        }
    }
}

async fn append<C: SheetsApi + ?Sized>(
    client: &C,
    row: Row,
    target: &SheetTarget,
) -> SheetsResult<SubmitOutcome> {
    let range = format!("{}!A1", quote_sheet(&target.sheet));
    client
        .append_row(&target.spreadsheet_id, &range, row)
        .await?;
    Ok(SubmitOutcome::Appended)
}

async fn upsert<C: SheetsApi + ?Sized>(
    client: &C,
    key: &FieldDescriptor,
    key_cell: &str,
    row: Row,
    target: &SheetTarget,
) -> SheetsResult<SubmitOutcome> {
    let grid = client
        .read_range(&target.spreadsheet_id, &sheet_range(&target.sheet))
        .await?;

    // the target's own header decides where the key lives
    let key_col = grid
        .first()
        .and_then(|header| header.iter().position(|c| c.trim() == key.name))
        .unwrap_or(key.column);

    let existing = grid
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, r)| r.get(key_col).map(|c| literal(c)) == Some(literal(key_cell)))
        .map(|(i, _)| i + 1);

    match existing {
        Some(sheet_row) => {
            client
                .update_row(
                    &target.spreadsheet_id,
                    &cell_range(&target.sheet, 0, sheet_row),
                    row,
                )
                .await?;
            Ok(SubmitOutcome::Updated { row: sheet_row })
        }
        None => append(client, row, target).await,
    }
}

/// Cell text as the sheet shows it, without the literal-text mark
fn literal(cell: &str) -> &str {
    let cell = cell.trim();
    cell.strip_prefix('\'').unwrap_or(cell)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::infer_schema;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn rows_follow_schema_columns() {
        let schema = infer_schema(&[
            row(&["Name", "", "Paid", "Fee"]),
            row(&["", "", "boolean", "currency"]),
        ])
        .unwrap();

        let mut record = SubmissionRecord::new();
        record.insert("Name", FieldValue::Text("Ann".into()));
        record.insert("Fee", FieldValue::Number(12.5));

        assert_eq!(
            record.to_row(&schema),
            vec![
                Some("Ann".to_string()),
                Some(String::new()),
                Some(String::new()),
                Some("$12.50".to_string())
            ]
        );
    }

    #[test]
    fn computed_columns_are_left_out_of_rows() {
        let schema = infer_schema(&[
            row(&["Qty", "Total", "Note"]),
            row(&["number", "computed", ""]),
        ])
        .unwrap();

        let mut record = SubmissionRecord::new();
        record.insert("Qty", FieldValue::Number(2.0));

        assert_eq!(
            record.to_row(&schema),
            vec![Some("2".to_string()), None, Some(String::new())]
        );
    }

    #[test]
    fn literal_marks_do_not_affect_key_matching() {
        assert_eq!(literal(" '007 "), "007");
        assert_eq!(literal("007"), "007");
        assert_eq!(literal("''x"), "'x");
    }

    #[test]
    fn targets_compare_by_value() {
        assert_eq!(
            SheetTarget::new("abc", "ENTRIES"),
            SheetTarget {
                spreadsheet_id: "abc".to_string(),
                sheet: "ENTRIES".to_string()
            }
        );
    }
}

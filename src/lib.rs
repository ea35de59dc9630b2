/*!
# Sheet Forms

Dynamic data-entry forms generated from Google Sheets, built in Rust.

## Overview

A designated INPUT tab describes a form: its first row holds the field
names, its second row optional hints. The application infers a typed
schema from that grid, renders one control per field, validates what the
user enters and writes the result back to a target tab as a new row (or
updates an existing row when the form has a key field).

## Hint Row

Each hint cell holds `;`-separated tokens:

- Kinds: `text`, `number`, `number:min..max`, `percentage`, `currency`,
  `boolean` / `checkbox`, `date`, `choice:A,B,C`
- Modifiers: `required`, `key`, `default=<value>`
- `computed` / `formula`: the column is filled by the sheet, gets no
  control and is never written

An empty hint cell means an optional text field. Anything else the parser
does not know is reported as a schema error rather than guessed at.

## Architecture

### Form Core
- **schema**: Schema inference from the INPUT grid
- **value**: Typed field values, parsing and cell formatting
- **form**: Per-instance form state, rendering descriptors and validation
- **submission**: Writing validated records (append or keyed update)

### Spreadsheet Access
- **sheets**: The `SheetsApi` trait, an in-memory backend and the Google
  Sheets / Drive REST client (feature `web`)
- **loader** / **downloader**: CSV import, CSV and XLSX export

### Web Layer (feature `web`)
- **app**: axum router, handlebars pages, CSV upload and export
- **config**: Environment-based settings

## REST Endpoints

- `/` - Lists spreadsheets, `?q=` filters by name
- `/sheets/{id}` - Lists the tabs of a spreadsheet
- `/sheets/{id}/tabs/{tab}` - Shows a tab as a table (`?admin=` adds the upload form)
- `/sheets/{id}/tabs/{tab}/export.csv`, `/export.xlsx` - Downloads a tab
- `/sheets/{id}/tabs/{tab}/upload?admin=` - Replaces a tab from CSV
- `/sheets/{id}/form?target=` - Opens a new form
- `/forms/{form_id}` - Submits a form
- `/api/sheets/{id}/schema` - Inferred schema as JSON
*/

pub mod config;
pub mod downloader;
pub mod error;
pub mod form;
pub mod loader;
pub mod schema;
pub mod sheets;
pub mod submission;
pub mod value;

#[cfg(feature = "web")]
pub mod app;

/// Re-export the core API for convenient use
pub use error::*;
pub use form::{FormId, FormInstance, FormRegistry, FormState, Widget, validate};
pub use schema::{
    ComputedColumn, FieldDescriptor, FieldKind, FormSchema, NumberFormat, infer_schema,
};
pub use sheets::{Grid, MemorySheets, Row, SheetsApi, SpreadsheetRef};
pub use submission::{SheetTarget, SubmissionRecord, SubmitOutcome, submit, write_record};
pub use value::FieldValue;

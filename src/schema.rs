use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;

use crate::error::{SchemaError, SchemaResult};
use crate::value::FieldValue;

lazy_static! {
    static ref BOUNDS_REGEX: Regex =
        Regex::new(r"^\s*(-?[0-9]+(?:\.[0-9]+)?)?\s*\.\.\s*(-?[0-9]+(?:\.[0-9]+)?)?\s*$").unwrap();
}

/// Separator between tokens inside a single hint cell
pub const HINT_SEPARATOR: char = ';';

/// Display format for number fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NumberFormat {
    /// Plain decimal number
    Plain,

    /// Entered and written with a trailing `%`
    Percentage,

    /// Entered with an optional `$` prefix, written as `$0.00`
    Currency,
}

/// Kind of a form field together with its kind-specific constraints
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FieldKind {
    /// Free text
    Text,

    /// Number with optional inclusive bounds
    Number {
        min: Option<f64>,
        max: Option<f64>,
        format: NumberFormat,
    },

    /// Checkbox
    Boolean,

    /// ISO calendar date
    Date,

    /// One value out of a fixed, non-empty list
    Choice { choices: Vec<String> },
}

impl FieldKind {
    /// Short lowercase name of the kind ("text", "number", ...)
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Number { .. } => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::Date => "date",
            FieldKind::Choice { .. } => "choice",
        }
    }

    /// Allowed values for a choice field, `None` for every other kind
    pub fn choices(&self) -> Option<&[String]> {
        match self {
            FieldKind::Choice { choices } => Some(choices),
            _ => None,
        }
    }
}

/// Inferred metadata for one form field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDescriptor {
    /// Header text of the column, trimmed; unique within the schema
    pub name: String,

    /// 0-based column index in the INPUT sheet
    pub column: usize,

    /// Kind and constraints
    #[serde(flatten)]
    pub kind: FieldKind,

    /// Empty input is rejected when set
    pub required: bool,

    /// Identifies the row to update on submit
    pub key: bool,

    /// Value used when the field is left empty
    pub default: Option<FieldValue>,
}

/// Column filled by the spreadsheet itself (formula), never by the form
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComputedColumn {
    pub name: String,
    pub column: usize,
}

/// Ordered list of field descriptors, in sheet column order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormSchema {
    fields: Vec<FieldDescriptor>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    computed: Vec<ComputedColumn>,
}

impl FormSchema {
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The field carrying the `key` hint, if any
    pub fn key_field(&self) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.key)
    }

    /// Columns marked `computed`; they get no control and are never written
    pub fn computed(&self) -> &[ComputedColumn] {
        &self.computed
    }

    pub fn is_computed(&self, column: usize) -> bool {
        self.computed.iter().any(|c| c.column == column)
    }

    /// Number of cells in a row written for this schema
    pub fn width(&self) -> usize {
        self.fields
            .iter()
            .map(|f| f.column + 1)
            .chain(self.computed.iter().map(|c| c.column + 1))
            .max()
            .unwrap_or(0)
    }
}

/// Parsed contents of one hint cell
#[derive(Debug, Clone, PartialEq)]
struct Hint {
    kind: FieldKind,
    required: bool,
    key: bool,
    default: Option<String>,
    computed: bool,
}

/// One token of a hint cell
#[derive(Debug, Clone, PartialEq)]
enum HintToken {
    Kind(FieldKind),
    Required,
    Key,
    Default(String),
    Computed,
}

/// Infer a form schema from the INPUT sheet's cell grid
///
/// The first row holds the column names. The second row, when present, holds
/// one hint cell per column: `;`-separated tokens such as `required`,
/// `number`, `number:0..100`, `percentage`, `currency`, `boolean`, `date`,
/// `choice:A,B,C`, `key` or `default=<value>`. A `computed` (or `formula`)
/// column is left to the spreadsheet: it gets no field and is never written.
///
/// # Arguments
/// * `grid` - Cell values of the INPUT sheet, row by row (rows may be ragged)
///
/// # Returns
/// * `SchemaResult<FormSchema>` - Fields in left-to-right column order
///
/// # Errors
/// * `SchemaError::NoColumns` if the header row is missing or blank
/// * `SchemaError::DuplicateField` if two columns share a name
/// * Hint errors (`UnknownHint`, `EmptyChoices`, ...) naming the column
///
/// # Examples
/// ```
/// use sheetforms::schema::{infer_schema, FieldKind};
///
/// let grid = vec![
///     vec!["Name".to_string(), "Age".to_string()],
///     vec!["required".to_string(), "number".to_string()],
/// ];
/// let schema = infer_schema(&grid).unwrap();
/// assert_eq!(schema.len(), 2);
/// assert!(schema.fields()[0].required);
/// assert_eq!(schema.fields()[1].kind.name(), "number");
/// ```
pub fn infer_schema(grid: &[Vec<String>]) -> SchemaResult<FormSchema> {
    let header = grid.first().ok_or(SchemaError::NoColumns)?;
    let hints = grid.get(1);

    let mut fields: Vec<FieldDescriptor> = Vec::with_capacity(header.len());
    let mut computed = Vec::new();
    let mut seen = HashSet::new();
    let mut key_name: Option<String> = None;

    for (column, cell) in header.iter().enumerate() {
        let name = cell.trim();
        if name.is_empty() {
            continue;
        }
        if !seen.insert(name.to_string()) {
            return Err(SchemaError::DuplicateField(name.to_string()));
        }

        let hint_cell = hints
            .and_then(|row| row.get(column))
            .map(|s| s.as_str())
            .unwrap_or("");
        let hint = parse_hint(name, hint_cell)?;

        if hint.computed {
            computed.push(ComputedColumn {
                name: name.to_string(),
                column,
            });
            continue;
        }

        if hint.key {
            if let Some(existing) = &key_name {
                return Err(SchemaError::MultipleKeys(existing.clone(), name.to_string()));
            }
            key_name = Some(name.to_string());
        }

        let default = match hint.default.as_deref() {
            Some(raw) if !raw.is_empty() => Some(FieldValue::parse(&hint.kind, raw).map_err(
                |reason| SchemaError::InvalidDefault {
                    field: name.to_string(),
                    value: raw.to_string(),
                    reason,
                },
            )?),
            _ => None,
        };

        fields.push(FieldDescriptor {
            name: name.to_string(),
            column,
            kind: hint.kind,
            // a key without a value cannot address a row
            required: hint.required || hint.key,
            key: hint.key,
            default,
        });
    }

    if fields.is_empty() {
        return Err(SchemaError::NoColumns);
    }

    log::debug!(
        "Inferred form schema with {} fields, {} computed columns",
        fields.len(),
        computed.len()
    );
    Ok(FormSchema { fields, computed })
}

fn parse_hint(field: &str, cell: &str) -> SchemaResult<Hint> {
    let mut hint = Hint {
        kind: FieldKind::Text,
        required: false,
        key: false,
        default: None,
        computed: false,
    };
    let mut kind_token: Option<&str> = None;
    let mut input_token: Option<&str> = None;

    for token in cell.split(HINT_SEPARATOR).map(str::trim).filter(|t| !t.is_empty()) {
        let parsed = parse_token(field, token)?;
        if parsed == HintToken::Computed {
            hint.computed = true;
            continue;
        }
        input_token.get_or_insert(token);

        match parsed {
            HintToken::Kind(kind) => {
                if let Some(first) = kind_token {
                    return Err(SchemaError::ConflictingKinds {
                        field: field.to_string(),
                        first: first.to_string(),
                        second: token.to_string(),
                    });
                }
                kind_token = Some(token);
                hint.kind = kind;
            }
            HintToken::Required => hint.required = true,
            HintToken::Key => hint.key = true,
            HintToken::Default(value) => hint.default = Some(value),
            HintToken::Computed => {}
        }
    }

    if let Some(token) = input_token.filter(|_| hint.computed) {
        return Err(SchemaError::ComputedWithHint {
            field: field.to_string(),
            hint: token.to_string(),
        });
    }

    Ok(hint)
}

fn parse_token(field: &str, token: &str) -> SchemaResult<HintToken> {
    // defaults may themselves contain ':' (times, URLs)
    if let Some((prefix, rest)) = token.split_once('=') {
        if prefix.trim().eq_ignore_ascii_case("default") {
            return Ok(HintToken::Default(rest.trim().to_string()));
        }
    }

    if let Some((prefix, rest)) = token.split_once(':') {
        return match prefix.trim().to_ascii_lowercase().as_str() {
            "choice" => {
                let choices: Vec<String> = rest
                    .split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect();
                if choices.is_empty() {
                    Err(SchemaError::EmptyChoices(field.to_string()))
                } else {
                    Ok(HintToken::Kind(FieldKind::Choice { choices }))
                }
            }
            "number" => parse_bounds(field, rest),
            _ => Err(unknown(field, token)),
        };
    }

    let number = |format| {
        HintToken::Kind(FieldKind::Number {
            min: None,
            max: None,
            format,
        })
    };

    match token.to_ascii_lowercase().as_str() {
        "text" => Ok(HintToken::Kind(FieldKind::Text)),
        "number" => Ok(number(NumberFormat::Plain)),
        "percentage" => Ok(number(NumberFormat::Percentage)),
        "currency" => Ok(number(NumberFormat::Currency)),
        "boolean" | "checkbox" => Ok(HintToken::Kind(FieldKind::Boolean)),
        "date" => Ok(HintToken::Kind(FieldKind::Date)),
        "choice" => Err(SchemaError::EmptyChoices(field.to_string())),
        "required" => Ok(HintToken::Required),
        "key" => Ok(HintToken::Key),
        "computed" | "formula" => Ok(HintToken::Computed),
        _ => Err(unknown(field, token)),
    }
}

fn parse_bounds(field: &str, bounds: &str) -> SchemaResult<HintToken> {
    let invalid = || SchemaError::InvalidBounds {
        field: field.to_string(),
        bounds: bounds.trim().to_string(),
    };

    let caps = BOUNDS_REGEX.captures(bounds).ok_or_else(invalid)?;
    let bound = |i: usize| -> SchemaResult<Option<f64>> {
        caps.get(i)
            .map(|m| m.as_str().parse::<f64>().map_err(|_| invalid()))
            .transpose()
    };
    let min = bound(1)?;
    let max = bound(2)?;

    if let (Some(lo), Some(hi)) = (min, max) {
        if lo > hi {
            return Err(invalid());
        }
    }

    Ok(HintToken::Kind(FieldKind::Number {
        min,
        max,
        format: NumberFormat::Plain,
    }))
}

fn unknown(field: &str, token: &str) -> SchemaError {
    SchemaError::UnknownHint {
        field: field.to_string(),
        hint: token.to_string(),
    }
}

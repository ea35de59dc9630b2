use chrono::NaiveDate;
use serde::Serialize;

use crate::schema::{FieldKind, NumberFormat};

/// Date format accepted by date fields and written back to the sheet
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A validated value, typed per field kind
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Boolean(bool),
    Date(NaiveDate),
    Choice(String),
}

impl FieldValue {
    /// Parse raw user input for a field of the given kind.
    ///
    /// `raw` is expected to be trimmed and non-empty; emptiness is handled by
    /// the caller because it depends on `required` and the default.
    ///
    /// # Returns
    /// * `Ok(FieldValue)` - The typed value
    /// * `Err(String)` - Message suitable for showing next to the field
    pub fn parse(kind: &FieldKind, raw: &str) -> Result<Self, String> {
        match kind {
            FieldKind::Text => Ok(FieldValue::Text(raw.to_string())),
            FieldKind::Number { min, max, format } => {
                let number = parse_number(raw, *format)?;
                if let Some(min) = min {
                    if number < *min {
                        return Err(format!("must be at least {}", min));
                    }
                }
                if let Some(max) = max {
                    if number > *max {
                        return Err(format!("must be at most {}", max));
                    }
                }
                Ok(FieldValue::Number(number))
            }
            FieldKind::Boolean => match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" | "checked" => Ok(FieldValue::Boolean(true)),
                "false" | "no" | "off" | "0" => Ok(FieldValue::Boolean(false)),
                _ => Err("must be true or false".to_string()),
            },
            FieldKind::Date => NaiveDate::parse_from_str(raw, DATE_FORMAT)
                .map(FieldValue::Date)
                .map_err(|_| "must be a date (YYYY-MM-DD)".to_string()),
            FieldKind::Choice { choices } => {
                if choices.iter().any(|c| c == raw) {
                    Ok(FieldValue::Choice(raw.to_string()))
                } else {
                    Err(format!("must be one of: {}", choices.join(", ")))
                }
            }
        }
    }

    /// Text placed in the form control when this value is pre-filled.
    /// Parsing the result with [`FieldValue::parse`] yields the same value.
    pub fn to_input(&self) -> String {
        match self {
            FieldValue::Text(s) | FieldValue::Choice(s) => s.clone(),
            FieldValue::Number(n) => n.to_string(),
            FieldValue::Boolean(b) => b.to_string(),
            FieldValue::Date(d) => d.format(DATE_FORMAT).to_string(),
        }
    }

    /// Cell text written to the spreadsheet
    ///
    /// Cells are sent as user-entered input, so text that the sheet would
    /// read as a formula, number, date or boolean gets a leading `'` and is
    /// stored as typed.
    pub fn to_cell(&self, kind: &FieldKind) -> String {
        match (self, kind) {
            (FieldValue::Number(n), FieldKind::Number { format, .. }) => match format {
                NumberFormat::Plain => n.to_string(),
                NumberFormat::Percentage => format!("{}%", n),
                NumberFormat::Currency => {
                    let cents = (n * 100.0).round() / 100.0;
                    let sign = if cents < 0.0 { "-" } else { "" };
                    format!("{}${:.2}", sign, cents.abs())
                }
            },
            (FieldValue::Text(s), _) | (FieldValue::Choice(s), _) => literal_text(s),
            (FieldValue::Boolean(b), _) => {
                if *b {
                    "TRUE".to_string()
                } else {
                    "FALSE".to_string()
                }
            }
            (value, _) => value.to_input(),
        }
    }
}

/// Whether the sheet would interpret `text` instead of storing it verbatim
fn needs_literal_mark(text: &str) -> bool {
    let Some(first) = text.chars().next() else {
        return false;
    };
    matches!(
        first,
        '=' | '+' | '-' | '@' | '\'' | '$' | '.' | '(' | '0'..='9'
    ) || text.ends_with('%')
        || text.eq_ignore_ascii_case("true")
        || text.eq_ignore_ascii_case("false")
}

fn literal_text(text: &str) -> String {
    if needs_literal_mark(text) {
        format!("'{}", text)
    } else {
        text.to_string()
    }
}

/// Currency input: `$1,250.00`, `-$5`, `$-5` or `($5.00)`
fn clean_currency(raw: &str) -> String {
    let raw = raw.replace(',', "");
    let mut rest = raw.trim();
    let mut negative = false;

    if let Some(inner) = rest.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
        negative = true;
        rest = inner.trim();
    }
    if let Some(unsigned) = rest.strip_prefix('-') {
        negative = !negative;
        rest = unsigned.trim_start();
    }
    let rest = rest.strip_prefix('$').unwrap_or(rest).trim();

    if negative {
        format!("-{}", rest)
    } else {
        rest.to_string()
    }
}

fn parse_number(raw: &str, format: NumberFormat) -> Result<f64, String> {
    let cleaned = match format {
        NumberFormat::Plain => raw.to_string(),
        NumberFormat::Percentage => raw.trim_end_matches('%').trim().to_string(),
        NumberFormat::Currency => clean_currency(raw),
    };

    match cleaned.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(n),
        _ => Err("must be a number".to_string()),
    }
}

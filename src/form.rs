use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::{FormError, SubmitError, ValidationErrors};
use crate::schema::{FieldDescriptor, FieldKind, FormSchema, NumberFormat};
use crate::sheets::SheetsApi;
use crate::submission::{SheetTarget, SubmissionRecord, SubmitOutcome, write_record};
use crate::value::FieldValue;

/// How long a [`FormRegistry`] keeps an instance after its last use
pub const FORM_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Most instances a [`FormRegistry`] holds; the least recently used goes first
pub const MAX_FORMS: usize = 10_000;

/// Message attached to an empty required field
pub const REQUIRED: &str = "required";

/// Stable identifier of one form instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FormId(Uuid);

impl FormId {
    pub fn new() -> Self {
        FormId(Uuid::new_v4())
    }
}

impl Default for FormId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FormId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for FormId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(FormId)
    }
}

/// Lifecycle of a form instance
///
/// `Empty -> Editing -> Validating -> Submitted | Rejected`; a rejected form
/// goes back to `Editing` on the next edit, `Submitted` is terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum FormState {
    Empty,
    Editing,
    Validating,
    Submitted,
    Rejected(ValidationErrors),
}

/// Input control matching a field's kind
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "input_type", rename_all = "lowercase")]
pub enum Control {
    Text,
    Number {
        min: Option<f64>,
        max: Option<f64>,
        step: &'static str,
        unit: Option<&'static str>,
    },
    Checkbox,
    Date,
    Select {
        options: Vec<String>,
    },
}

impl Control {
    fn for_kind(kind: &FieldKind) -> Self {
        match kind {
            FieldKind::Text => Control::Text,
            FieldKind::Number { min, max, format } => Control::Number {
                min: *min,
                max: *max,
                step: match format {
                    NumberFormat::Currency => "0.01",
                    _ => "any",
                },
                unit: match format {
                    NumberFormat::Plain => None,
                    NumberFormat::Percentage => Some("%"),
                    NumberFormat::Currency => Some("$"),
                },
            },
            FieldKind::Boolean => Control::Checkbox,
            FieldKind::Date => Control::Date,
            FieldKind::Choice { choices } => Control::Select {
                options: choices.clone(),
            },
        }
    }
}

/// Everything a UI layer needs to draw one field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Widget {
    /// Element id, derived from the form id and the field name
    pub id: String,
    /// Field name, used as the submitted key
    pub name: String,
    pub label: String,
    #[serde(flatten)]
    pub control: Control,
    /// Current raw value (entered, or the default)
    pub value: String,
    /// Checkbox state
    pub checked: bool,
    pub required: bool,
    /// Inline message from the last rejected submit
    pub error: Option<String>,
}

/// Validate raw input against a schema
///
/// Every field is checked; all failures are returned together, keyed by
/// field name. Empty optional fields take their default or are left out of
/// the record. Names not in the schema are ignored.
pub fn validate(
    schema: &FormSchema,
    values: &HashMap<String, String>,
) -> Result<SubmissionRecord, ValidationErrors> {
    let mut record = SubmissionRecord::new();
    let mut errors = ValidationErrors::new();

    for field in schema.fields() {
        let raw = values.get(&field.name).map(|s| s.trim()).unwrap_or("");

        if raw.is_empty() {
            if field.required {
                errors.insert(&field.name, REQUIRED);
            } else if let Some(default) = &field.default {
                record.insert(&field.name, default.clone());
            }
            continue;
        }

        match FieldValue::parse(&field.kind, raw) {
            // a required checkbox has to be ticked
            Ok(FieldValue::Boolean(false)) if field.required => {
                errors.insert(&field.name, REQUIRED);
            }
            Ok(value) => record.insert(&field.name, value),
            Err(message) => errors.insert(&field.name, message),
        }
    }

    if errors.is_empty() {
        Ok(record)
    } else {
        Err(errors)
    }
}

/// Per-form-instance context: schema, target, entered values and state
///
/// Passed explicitly through render, edit and submit so several forms can
/// be live at once without sharing state.
#[derive(Debug, Clone)]
pub struct FormInstance {
    id: FormId,
    schema: FormSchema,
    target: SheetTarget,
    values: HashMap<String, String>,
    state: FormState,
}

impl FormInstance {
    /// Start a new instance with every field pre-filled from its default
    pub fn new(schema: FormSchema, target: SheetTarget) -> Self {
        let values = schema
            .fields()
            .iter()
            .filter_map(|f| f.default.as_ref().map(|d| (f.name.clone(), d.to_input())))
            .collect();

        Self {
            id: FormId::new(),
            schema,
            target,
            values,
            state: FormState::Empty,
        }
    }

    pub fn id(&self) -> FormId {
        self.id
    }

    pub fn schema(&self) -> &FormSchema {
        &self.schema
    }

    pub fn target(&self) -> &SheetTarget {
        &self.target
    }

    pub fn state(&self) -> &FormState {
        &self.state
    }

    pub fn value(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(String::as_str)
    }

    pub fn is_submitted(&self) -> bool {
        self.state == FormState::Submitted
    }

    /// Id of the submit button of this instance
    pub fn submit_id(&self) -> String {
        format!("sf-{}-submit", self.id)
    }

    /// Swap in a freshly inferred schema
    ///
    /// Values of fields that still exist are kept, new fields get their
    /// default, values of removed fields are dropped. Pending errors refer to
    /// the old schema and are cleared.
    pub fn refresh_schema(&mut self, schema: FormSchema) -> Result<(), FormError> {
        if self.is_submitted() {
            return Err(FormError::AlreadySubmitted);
        }
        if schema == self.schema {
            return Ok(());
        }

        self.values.retain(|name, _| schema.field(name).is_some());
        for field in schema.fields() {
            if let Some(default) = &field.default {
                self.values
                    .entry(field.name.clone())
                    .or_insert_with(|| default.to_input());
            }
        }
        if matches!(self.state, FormState::Rejected(_)) {
            self.state = FormState::Editing;
        }
        log::debug!("Form {} picked up a changed schema", self.id);
        self.schema = schema;
        Ok(())
    }

    /// Record raw input for one field
    pub fn set_value(&mut self, field: &str, raw: impl Into<String>) -> Result<(), FormError> {
        if self.is_submitted() {
            return Err(FormError::AlreadySubmitted);
        }
        if self.schema.field(field).is_none() {
            return Err(FormError::UnknownField(field.to_string()));
        }
        self.values.insert(field.to_string(), raw.into());
        self.state = FormState::Editing;
        Ok(())
    }

    /// Record a batch of raw input, e.g. a posted HTML form
    ///
    /// Unknown names are skipped; for repeated names the last one wins.
    pub fn set_values<I, K, V>(&mut self, pairs: I) -> Result<(), FormError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        if self.is_submitted() {
            return Err(FormError::AlreadySubmitted);
        }
        for (name, raw) in pairs {
            let name = name.as_ref();
            if self.schema.field(name).is_some() {
                self.values.insert(name.to_string(), raw.into());
                self.state = FormState::Editing;
            }
        }
        Ok(())
    }

    /// Widgets for every field, in schema order
    pub fn render(&self) -> Vec<Widget> {
        let errors = match &self.state {
            FormState::Rejected(errors) => Some(errors),
            _ => None,
        };

        self.schema
            .fields()
            .iter()
            .map(|field| self.widget(field, errors))
            .collect()
    }

    fn widget(&self, field: &FieldDescriptor, errors: Option<&ValidationErrors>) -> Widget {
        let value = self.values.get(&field.name).cloned().unwrap_or_default();
        let checked = matches!(field.kind, FieldKind::Boolean)
            && matches!(
                FieldValue::parse(&field.kind, value.trim()),
                Ok(FieldValue::Boolean(true))
            );

        Widget {
            id: widget_id(self.id, &field.name),
            name: field.name.clone(),
            label: field.name.clone(),
            control: Control::for_kind(&field.kind),
            value,
            checked,
            required: field.required,
            error: errors.and_then(|e| e.get(&field.name)).map(str::to_string),
        }
    }

    /// Validate the entered values
    ///
    /// On failure the instance moves to `Rejected` with the errors, keeping
    /// the entered values.
    pub fn validate(&mut self) -> Result<SubmissionRecord, SubmitError> {
        if self.is_submitted() {
            return Err(FormError::AlreadySubmitted.into());
        }
        self.state = FormState::Validating;

        match validate(&self.schema, &self.values) {
            Ok(record) => Ok(record),
            Err(errors) => {
                log::warn!(
                    "Rejected submission of form {} ({} field errors)",
                    self.id,
                    errors.len()
                );
                self.state = FormState::Rejected(errors.clone());
                Err(errors.into())
            }
        }
    }

    /// Validate and write in one step
    ///
    /// A write failure puts the instance back into `Editing` with its values
    /// so the same submit can be retried.
    pub async fn submit<C: SheetsApi + ?Sized>(
        &mut self,
        client: &C,
    ) -> Result<SubmitOutcome, SubmitError> {
        let record = self.validate()?;

        match write_record(client, &self.schema, &record, &self.target).await {
            Ok(outcome) => {
                self.state = FormState::Submitted;
                Ok(outcome)
            }
            Err(err) => {
                self.state = FormState::Editing;
                Err(err.into())
            }
        }
    }
}

/// Element id for a field: injective in the field name, independent of order
fn widget_id(form: FormId, field: &str) -> String {
    let mut id = format!("sf-{}-field-", form);
    for c in field.chars() {
        if c.is_ascii_alphanumeric() {
            id.push(c);
        } else {
            let mut buf = [0u8; 4];
            for b in c.encode_utf8(&mut buf).bytes() {
                id.push_str(&format!("_{:02x}", b));
            }
        }
    }
    id
}

pub type SharedForm = Arc<tokio::sync::Mutex<FormInstance>>;

type Entries = HashMap<FormId, (Instant, SharedForm)>;

/// Live form instances keyed by [`FormId`]
///
/// Each instance has its own async lock, so one interaction on a form runs
/// to completion before the next one on the same form starts. Instances
/// unused for longer than the TTL are dropped, and the registry never holds
/// more than its capacity.
#[derive(Debug)]
pub struct FormRegistry {
    forms: Mutex<Entries>,
    ttl: Duration,
    capacity: usize,
}

impl Default for FormRegistry {
    fn default() -> Self {
        Self::new(FORM_TTL, MAX_FORMS)
    }
}

impl FormRegistry {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            forms: Mutex::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    fn prune(&self, forms: &mut Entries, now: Instant) {
        let ttl = self.ttl;
        forms.retain(|_, (last_used, _)| now.saturating_duration_since(*last_used) <= ttl);
    }

    /// Store an instance, dropping expired ones and evicting the least
    /// recently used when full
    pub fn insert(&self, instance: FormInstance) -> FormId {
        let id = instance.id();
        let now = Instant::now();
        let mut forms = self.forms.lock().unwrap_or_else(|e| e.into_inner());

        self.prune(&mut forms, now);
        while forms.len() >= self.capacity {
            let oldest = forms
                .iter()
                .min_by_key(|(_, (last_used, _))| *last_used)
                .map(|(id, _)| *id);
            match oldest {
                Some(oldest) => {
                    log::debug!("Evicting form {}", oldest);
                    forms.remove(&oldest);
                }
                None => break,
            }
        }
        forms.insert(id, (now, Arc::new(tokio::sync::Mutex::new(instance))));
        id
    }

    /// Look up a live instance and mark it as used
    pub fn get(&self, id: &FormId) -> Option<SharedForm> {
        let now = Instant::now();
        let mut forms = self.forms.lock().unwrap_or_else(|e| e.into_inner());

        self.prune(&mut forms, now);
        forms.get_mut(id).map(|(last_used, form)| {
            *last_used = now;
            form.clone()
        })
    }

    pub fn remove(&self, id: &FormId) -> Option<SharedForm> {
        let mut forms = self.forms.lock().unwrap_or_else(|e| e.into_inner());
        forms.remove(id).map(|(_, form)| form)
    }

    pub fn len(&self) -> usize {
        self.forms.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

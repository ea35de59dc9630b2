#![cfg(not(tarpaulin_include))]

use axum::{
    Form, Json, Router,
    extract::{Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::downloader;
use crate::error::{FormError, SchemaError, SheetsError, SubmitError};
use crate::form::{FormId, FormInstance, FormRegistry};
use crate::loader;
use crate::schema::{FormSchema, infer_schema};
use crate::sheets::{GoogleSheetsClient, SheetsApi, cell_range, sheet_range};
use crate::submission::{SheetTarget, SubmitOutcome};

const TEMPLATES: [(&str, &str); 7] = [
    ("header", include_str!("./templates/header.hbs")),
    ("footer", include_str!("./templates/footer.hbs")),
    ("index", include_str!("./templates/index.hbs")),
    ("tabs", include_str!("./templates/tabs.hbs")),
    ("table", include_str!("./templates/table.hbs")),
    ("form", include_str!("./templates/form.hbs")),
    ("submitted", include_str!("./templates/submitted.hbs")),
];

/// Failure of a request, rendered as an error page
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Sheets(#[from] SheetsError),

    #[error(transparent)]
    Form(#[from] FormError),

    #[error("template error: {0}")]
    Render(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("export failed: {0}")]
    Export(String),
}

impl From<handlebars::RenderError> for AppError {
    fn from(err: handlebars::RenderError) -> Self {
        AppError::Render(err.to_string())
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Sheets(err) => match err {
                SheetsError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
                SheetsError::PermissionDenied(_) => StatusCode::FORBIDDEN,
                SheetsError::NotFound(_) => StatusCode::NOT_FOUND,
                SheetsError::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
                SheetsError::InvalidRange(_) => StatusCode::BAD_REQUEST,
                SheetsError::Network(_) | SheetsError::Api { .. } | SheetsError::Parse(_) => {
                    StatusCode::BAD_GATEWAY
                }
            },
            AppError::Form(err) => match err {
                FormError::UnknownForm(_) => StatusCode::NOT_FOUND,
                FormError::UnknownField(_) => StatusCode::BAD_REQUEST,
                FormError::AlreadySubmitted => StatusCode::CONFLICT,
            },
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Render(_) | AppError::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("{}", self);
        } else {
            log::warn!("{}", self);
        }

        let body = format!(
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Error</title></head>\
             <body><nav><a href=\"/\">Spreadsheets</a></nav><h1>{}</h1><p>{}</p></body></html>",
            status,
            handlebars::html_escape(&self.to_string())
        );
        (status, Html(body)).into_response()
    }
}

/// Shared state of the web application
pub struct AppState {
    pub client: Arc<dyn SheetsApi>,
    pub forms: FormRegistry,
    pub config: Config,
    templates: Handlebars<'static>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(client: Arc<dyn SheetsApi>, config: Config) -> Result<Self, AppError> {
        let mut templates = Handlebars::new();
        templates.set_strict_mode(false);
        for (name, source) in TEMPLATES {
            templates
                .register_template_string(name, source)
                .map_err(|e| AppError::Render(e.to_string()))?;
        }

        Ok(Self {
            client,
            forms: FormRegistry::default(),
            config,
            templates,
        })
    }

    fn render<T: Serialize>(&self, name: &str, data: &T) -> Result<Html<String>, AppError> {
        Ok(Html(self.templates.render(name, data)?))
    }
}

#[derive(Deserialize)]
struct ListQuery {
    q: Option<String>,
}

#[derive(Deserialize)]
struct FormQuery {
    target: Option<String>,
}

#[derive(Deserialize)]
struct AdminQuery {
    admin: Option<String>,
}

#[derive(Serialize)]
struct TabLink {
    title: String,
    href: String,
}

fn enc(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

fn tab_href(spreadsheet_id: &str, tab: &str) -> String {
    format!("/sheets/{}/tabs/{}", enc(spreadsheet_id), enc(tab))
}

/// Build the router over the given state
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list_spreadsheets))
        .route("/sheets/:id", get(list_tabs))
        .route("/sheets/:id/tabs/:tab", get(show_tab))
        .route("/sheets/:id/tabs/:tab/export.csv", get(export_csv))
        .route("/sheets/:id/tabs/:tab/export.xlsx", get(export_xlsx))
        .route("/sheets/:id/tabs/:tab/upload", post(upload_csv))
        .route("/sheets/:id/form", get(new_form))
        .route("/forms/:form_id", post(submit_form))
        .route("/api/sheets/:id/schema", get(schema_json))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the server with the Google client
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let client = GoogleSheetsClient::with_endpoints(
        config.access_token.clone(),
        config.http_timeout,
        config
            .sheets_base
            .as_deref()
            .unwrap_or(crate::sheets::google::DEFAULT_SHEETS_BASE),
        config
            .drive_base
            .as_deref()
            .unwrap_or(crate::sheets::google::DEFAULT_DRIVE_BASE),
    )?;

    let addr = config.addr;
    let state = Arc::new(AppState::new(Arc::new(client), config)?);
    let app = router(state);

    let listener = TcpListener::bind(addr).await?;
    log::info!("Listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn list_spreadsheets(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> Result<Html<String>, AppError> {
    let filter = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty());
    let spreadsheets = state.client.list_spreadsheets(filter).await?;

    state.render(
        "index",
        &json!({
            "title": "Spreadsheets",
            "query": filter.unwrap_or(""),
            "spreadsheets": spreadsheets,
        }),
    )
}

async fn list_tabs(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Html<String>, AppError> {
    let titles = state.client.sheet_titles(&id).await?;
    let tabs: Vec<TabLink> = titles
        .into_iter()
        .map(|title| TabLink {
            href: tab_href(&id, &title),
            title,
        })
        .collect();

    state.render(
        "tabs",
        &json!({
            "title": format!("Spreadsheet {}", id),
            "input_sheet": state.config.input_sheet,
            "form_href": format!("/sheets/{}/form", enc(&id)),
            "tabs": tabs,
        }),
    )
}

async fn show_tab(
    State(state): State<SharedState>,
    Path((id, tab)): Path<(String, String)>,
    Query(query): Query<AdminQuery>,
) -> Result<Html<String>, AppError> {
    let grid = state.client.read_range(&id, &sheet_range(&tab)).await?;
    let mut rows = grid.into_iter();
    let header_row = rows.next();
    let href = tab_href(&id, &tab);

    // only an admin sees the upload form, and it posts with their key
    let upload_href = state
        .config
        .admin_key
        .as_deref()
        .filter(|key| query.admin.as_deref() == Some(*key))
        .map(|key| format!("{}/upload?admin={}", href, enc(key)));

    state.render(
        "table",
        &json!({
            "title": tab,
            "header_row": header_row,
            "rows": rows.collect::<Vec<_>>(),
            "back_href": format!("/sheets/{}", enc(&id)),
            "export_href": format!("{}/export", href),
            "upload_href": upload_href,
        }),
    )
}

fn attachment(tab: &str, extension: &str) -> String {
    let stem: String = tab
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("attachment; filename=\"{}.{}\"", stem, extension)
}

async fn export_csv(
    State(state): State<SharedState>,
    Path((id, tab)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let grid = state.client.read_range(&id, &sheet_range(&tab)).await?;
    let csv = downloader::to_csv(&grid).map_err(|e| AppError::Export(e.to_string()))?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, attachment(&tab, "csv")),
        ],
        csv,
    )
        .into_response())
}

async fn export_xlsx(
    State(state): State<SharedState>,
    Path((id, tab)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let grid = state.client.read_range(&id, &sheet_range(&tab)).await?;
    let bytes = downloader::to_xlsx(&grid, &tab).map_err(|e| AppError::Export(e.to_string()))?;

    Ok((
        [
            (
                header::CONTENT_TYPE,
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet".to_string(),
            ),
            (header::CONTENT_DISPOSITION, attachment(&tab, "xlsx")),
        ],
        bytes,
    )
        .into_response())
}

async fn upload_csv(
    State(state): State<SharedState>,
    Path((id, tab)): Path<(String, String)>,
    Query(query): Query<AdminQuery>,
    mut multipart: Multipart,
) -> Result<Redirect, AppError> {
    let Some(expected) = state.config.admin_key.as_deref() else {
        return Err(AppError::Forbidden("uploads are disabled".to_string()));
    };
    if query.admin.as_deref() != Some(expected) {
        return Err(AppError::Forbidden("admin key required".to_string()));
    }

    let mut data = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() == Some("file") {
            data = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?,
            );
        }
    }
    let data = data.ok_or_else(|| AppError::BadRequest("no file received".to_string()))?;
    let grid = loader::from_csv_reader(&data[..]).map_err(|e| AppError::BadRequest(e.to_string()))?;

    let rows = grid.len();
    state
        .client
        .update_range(&id, &cell_range(&tab, 0, 1), grid)
        .await?;
    log::info!("Uploaded {} CSV rows into {} of {}", rows, tab, id);

    Ok(Redirect::to(&tab_href(&id, &tab)))
}

async fn load_schema(state: &AppState, id: &str) -> Result<Result<FormSchema, SchemaError>, AppError> {
    let grid = state
        .client
        .read_range(id, &sheet_range(&state.config.input_sheet))
        .await?;
    Ok(infer_schema(&grid))
}

fn schema_error_page(state: &AppState, id: &str, err: SchemaError) -> Result<Response, AppError> {
    log::warn!("Cannot build form for {}: {}", id, err);
    let page = state.render(
        "form",
        &json!({
            "title": "Form unavailable",
            "schema_error": err.to_string(),
        }),
    )?;
    Ok((StatusCode::UNPROCESSABLE_ENTITY, page).into_response())
}

fn render_form(
    state: &AppState,
    form: &FormInstance,
    write_error: Option<String>,
) -> Result<Html<String>, AppError> {
    let target = form.target();
    state.render(
        "form",
        &json!({
            "title": format!("New entry for {}", target.sheet),
            "form_id": form.id().to_string(),
            "action": format!("/forms/{}", form.id()),
            "widgets": form.render(),
            "submit_id": form.submit_id(),
            "target": target.sheet,
            "write_error": write_error,
        }),
    )
}

async fn new_form(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<FormQuery>,
) -> Result<Response, AppError> {
    let target = query
        .target
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| state.config.target_sheet.clone());

    let schema = match load_schema(&state, &id).await? {
        Ok(schema) => schema,
        Err(err) => return schema_error_page(&state, &id, err),
    };

    let form = FormInstance::new(schema, SheetTarget::new(id, target));
    let page = render_form(&state, &form, None)?;
    let form_id = state.forms.insert(form);
    log::debug!("Created form {}", form_id);

    Ok(page.into_response())
}

async fn submit_form(
    State(state): State<SharedState>,
    Path(form_id): Path<String>,
    Form(pairs): Form<Vec<(String, String)>>,
) -> Result<Response, AppError> {
    let (id, form) = form_id
        .parse::<FormId>()
        .ok()
        .and_then(|id| state.forms.get(&id).map(|form| (id, form)))
        .ok_or_else(|| FormError::UnknownForm(form_id.clone()))?;
    let mut form = form.lock().await;

    // the INPUT sheet may have changed since the form was opened
    let spreadsheet_id = form.target().spreadsheet_id.clone();
    match load_schema(&state, &spreadsheet_id).await? {
        Ok(schema) => form.refresh_schema(schema)?,
        Err(err) => return schema_error_page(&state, &spreadsheet_id, err),
    }

    form.set_values(pairs)?;
    match form.submit(state.client.as_ref()).await {
        Ok(outcome) => {
            state.forms.remove(&id);
            let target = form.target();
            let message = match outcome {
                SubmitOutcome::Appended => format!("Your entry was added to {}.", target.sheet),
                SubmitOutcome::Updated { row } => {
                    format!("Row {} of {} was updated.", row, target.sheet)
                }
            };
            let page = state.render(
                "submitted",
                &json!({
                    "title": "Thank you",
                    "message": message,
                    "target": target.sheet,
                    "again_href": format!(
                        "/sheets/{}/form?target={}",
                        enc(&target.spreadsheet_id),
                        enc(&target.sheet)
                    ),
                    "table_href": tab_href(&target.spreadsheet_id, &target.sheet),
                }),
            )?;
            Ok(page.into_response())
        }
        Err(SubmitError::Validation(_)) => {
            let page = render_form(&state, &form, None)?;
            Ok((StatusCode::UNPROCESSABLE_ENTITY, page).into_response())
        }
        Err(SubmitError::Write(err)) => {
            let page = render_form(&state, &form, Some(err.source.to_string()))?;
            Ok((StatusCode::BAD_GATEWAY, page).into_response())
        }
        Err(SubmitError::Form(err)) => Err(err.into()),
    }
}

async fn schema_json(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    match load_schema(&state, &id).await? {
        Ok(schema) => Ok(Json(schema).into_response()),
        Err(err) => Ok((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": err.to_string() })),
        )
            .into_response()),
    }
}

#![cfg(not(tarpaulin_include))]

//! Google Sheets v4 / Drive v3 REST client

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{Grid, Row, SheetsApi, SpreadsheetRef};
use crate::error::{SheetsError, SheetsResult};

pub const DEFAULT_SHEETS_BASE: &str = "https://sheets.googleapis.com/v4";
pub const DEFAULT_DRIVE_BASE: &str = "https://www.googleapis.com/drive/v3";

const SPREADSHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";

/// Sheets client authenticating with a bearer access token
///
/// Token minting and refresh happen outside the application; the token is
/// sent as is on every call.
pub struct GoogleSheetsClient {
    client: reqwest::Client,
    token: String,
    sheets_base: String,
    drive_base: String,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct DriveFile {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetMeta>,
}

#[derive(Deserialize)]
struct SheetMeta {
    properties: SheetProperties,
}

#[derive(Deserialize)]
struct SheetProperties {
    title: String,
}

impl From<reqwest::Error> for SheetsError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SheetsError::Network(format!("Request timed out: {}", err))
        } else if err.is_connect() {
            SheetsError::Network(format!("Connection error: {}", err))
        } else if err.is_decode() {
            SheetsError::Parse(err.to_string())
        } else {
            SheetsError::Network(err.to_string())
        }
    }
}

/// Map a non-success HTTP status to an error class
pub fn status_error(status: u16, message: String) -> SheetsError {
    match status {
        401 => SheetsError::Unauthorized(message),
        403 => SheetsError::PermissionDenied(message),
        404 => SheetsError::NotFound(message),
        429 => SheetsError::QuotaExceeded(message),
        _ => SheetsError::Api { status, message },
    }
}

fn cell_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl GoogleSheetsClient {
    /// Create a client against the public Google endpoints
    pub fn new(token: impl Into<String>, timeout: Duration) -> SheetsResult<Self> {
        Self::with_endpoints(token, timeout, DEFAULT_SHEETS_BASE, DEFAULT_DRIVE_BASE)
    }

    /// Create a client against custom base URLs (proxies, emulators)
    pub fn with_endpoints(
        token: impl Into<String>,
        timeout: Duration,
        sheets_base: &str,
        drive_base: &str,
    ) -> SheetsResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            token: token.into(),
            sheets_base: sheets_base.trim_end_matches('/').to_string(),
            drive_base: drive_base.trim_end_matches('/').to_string(),
        })
    }

    fn values_url(&self, spreadsheet_id: &str, range: &str) -> String {
        format!(
            "{}/spreadsheets/{}/values/{}",
            self.sheets_base,
            urlencoding::encode(spreadsheet_id),
            urlencoding::encode(range)
        )
    }

    async fn put_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
        body: serde_json::Value,
    ) -> SheetsResult<()> {
        let response = self
            .client
            .put(self.values_url(spreadsheet_id, range))
            .bearer_auth(&self.token)
            .query(&[("valueInputOption", "USER_ENTERED")])
            .json(&body)
            .send()
            .await?;

        Self::check(response).await?;
        log::debug!("Updated {} in {}", range, spreadsheet_id);
        Ok(())
    }

    /// Turn a response into its body, or into an error for non-2xx statuses
    async fn check(response: reqwest::Response) -> SheetsResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        log::warn!("Sheets API returned {}: {}", status, message);
        Err(status_error(status.as_u16(), message))
    }
}

#[async_trait]
impl SheetsApi for GoogleSheetsClient {
    async fn read_range(&self, spreadsheet_id: &str, range: &str) -> SheetsResult<Grid> {
        let response = self
            .client
            .get(self.values_url(spreadsheet_id, range))
            .bearer_auth(&self.token)
            .query(&[("valueRenderOption", "FORMATTED_VALUE")])
            .send()
            .await?;

        let body: ValueRange = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| SheetsError::Parse(format!("Failed to parse value range: {}", e)))?;

        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    async fn append_row(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: Row,
    ) -> SheetsResult<()> {
        // null cells are skipped by the API, which leaves formula columns alone
        let url = format!("{}:append", self.values_url(spreadsheet_id, range));
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .query(&[
                ("valueInputOption", "USER_ENTERED"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&json!({ "values": [values] }))
            .send()
            .await?;

        Self::check(response).await?;
        log::debug!("Appended row to {} in {}", range, spreadsheet_id);
        Ok(())
    }

    async fn update_row(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: Row,
    ) -> SheetsResult<()> {
        self.put_values(spreadsheet_id, range, json!({ "range": range, "values": [values] }))
            .await
    }

    async fn update_range(
        &self,
        spreadsheet_id: &str,
        range: &str,
        rows: Grid,
    ) -> SheetsResult<()> {
        self.put_values(spreadsheet_id, range, json!({ "range": range, "values": rows }))
            .await
    }

    async fn list_spreadsheets(&self, filter: Option<&str>) -> SheetsResult<Vec<SpreadsheetRef>> {
        let mut query = format!("mimeType='{}' and trashed=false", SPREADSHEET_MIME);
        if let Some(name) = filter.map(str::trim).filter(|f| !f.is_empty()) {
            let escaped = name.replace('\\', "\\\\").replace('\'', "\\'");
            query.push_str(&format!(" and name contains '{}'", escaped));
        }

        let mut found = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(format!("{}/files", self.drive_base))
                .bearer_auth(&self.token)
                .query(&[
                    ("q", query.as_str()),
                    ("fields", "nextPageToken, files(id, name)"),
                    ("orderBy", "name"),
                    ("pageSize", "100"),
                    ("includeItemsFromAllDrives", "true"),
                    ("supportsAllDrives", "true"),
                ]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let page: FileList = Self::check(request.send().await?)
                .await?
                .json()
                .await
                .map_err(|e| SheetsError::Parse(format!("Failed to parse file list: {}", e)))?;

            found.extend(page.files.into_iter().map(|f| SpreadsheetRef {
                id: f.id,
                name: f.name,
            }));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(found)
    }

    async fn sheet_titles(&self, spreadsheet_id: &str) -> SheetsResult<Vec<String>> {
        let response = self
            .client
            .get(format!(
                "{}/spreadsheets/{}",
                self.sheets_base,
                urlencoding::encode(spreadsheet_id)
            ))
            .bearer_auth(&self.token)
            .query(&[("fields", "sheets.properties.title")])
            .send()
            .await?;

        let meta: SpreadsheetMeta = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| SheetsError::Parse(format!("Failed to parse spreadsheet: {}", e)))?;

        Ok(meta
            .sheets
            .into_iter()
            .map(|s| s.properties.title)
            .collect())
    }
}

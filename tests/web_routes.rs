#![cfg(feature = "web")]

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use serde_json::Value;
use sheetforms::app::{AppState, router};
use sheetforms::config::Config;
use sheetforms::{MemorySheets, SheetsApi};
use std::sync::Arc;
use tower::util::ServiceExt;

fn row(cells: &[&str]) -> Vec<String> {
    cells.iter().map(|s| s.to_string()).collect()
}

fn setup(admin_key: Option<&str>) -> (Arc<MemorySheets>, Arc<AppState>, Router) {
    let sheets = Arc::new(MemorySheets::new());
    sheets.add_spreadsheet("book", "Club Members");
    sheets.set_tab(
        "book",
        "INPUT",
        vec![
            row(&["Name", "Age", "Plan", "Agree"]),
            row(&["required", "number:0..120", "choice:Basic,Pro", "checkbox"]),
        ],
    );
    sheets.set_tab("book", "ENTRIES", vec![row(&["Name", "Age", "Plan", "Agree"])]);

    let config = Config {
        admin_key: admin_key.map(str::to_string),
        ..Config::default()
    };
    let client: Arc<dyn SheetsApi> = sheets.clone();
    let state = Arc::new(AppState::new(client, config).unwrap());
    let app = router(state.clone());
    (sheets, state, app)
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_form(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("POST")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

const BOUNDARY: &str = "XBOUNDARY";

fn upload(uri: &str) -> Request<Body> {
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"t.csv\"\r\n\
         Content-Type: text/csv\r\n\r\nName,Age\nZoe,40\n\r\n--{b}--\r\n",
        b = BOUNDARY
    );
    Request::builder()
        .uri(uri)
        .method("POST")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

/// Value of the first `action="..."` attribute starting with `prefix`
fn form_action(page: &str, prefix: &str) -> Option<String> {
    let marker = format!("action=\"{}", prefix);
    let start = page.find(&marker)? + "action=\"".len();
    let end = start + page[start..].find('"')?;
    Some(page[start..end].to_string())
}

/// Open a form and return the path it posts to
async fn open_form(app: &Router) -> String {
    let response = app.clone().oneshot(get("/sheets/book/form")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page = body_text(response).await;
    form_action(&page, "/forms/").unwrap()
}

#[tokio::test]
async fn lists_and_filters_spreadsheets() {
    let (_, _, app) = setup(None);

    let page = body_text(app.clone().oneshot(get("/?q=club")).await.unwrap()).await;
    assert!(page.contains("Club Members"));
    assert!(page.contains("/sheets/book"));

    let page = body_text(app.oneshot(get("/?q=nothing")).await.unwrap()).await;
    assert!(page.contains("No spreadsheets found."));
}

#[tokio::test]
async fn shows_tabs_and_table() {
    let (_, _, app) = setup(None);

    let page = body_text(app.clone().oneshot(get("/sheets/book")).await.unwrap()).await;
    assert!(page.contains("/sheets/book/tabs/ENTRIES"));

    let page = body_text(app.clone().oneshot(get("/sheets/book/tabs/INPUT")).await.unwrap()).await;
    assert!(page.contains("<th>Name</th>"));
    assert!(page.contains("<td>choice:Basic,Pro</td>"));
    assert!(!page.contains("Replace from CSV"));

    let response = app.oneshot(get("/sheets/missing/tabs/INPUT")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn form_page_has_a_control_per_kind() {
    let (sheets, _, app) = setup(None);
    sheets.set_tab(
        "book",
        "INPUT",
        vec![
            row(&["Name", "Fee", "Joined", "Plan", "Agree", "Total"]),
            row(&["", "currency", "date", "choice:Basic,Pro", "checkbox", "computed"]),
        ],
    );

    let response = app.oneshot(get("/sheets/book/form")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page = body_text(response).await;

    assert!(page.contains("<input type=\"text\" id=\""));
    assert!(page.contains("inputmode=\"decimal\""));
    assert!(page.contains("<span>$</span>"));
    assert!(page.contains("type=\"date\""));
    assert!(page.contains("<option value=\"Pro\">Pro</option>"));
    assert!(page.contains("type=\"checkbox\""));
    assert!(!page.contains("name=\"Total\""));
}

#[tokio::test]
async fn schema_endpoint_returns_fields() {
    let (sheets, _, app) = setup(None);

    let response = app.clone().oneshot(get("/api/sheets/book/schema")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(json["fields"][0]["name"], "Name");
    assert_eq!(json["fields"][0]["required"], true);
    assert_eq!(json["fields"][1]["kind"], "number");
    assert_eq!(json["fields"][1]["max"], 120.0);
    assert_eq!(json["fields"][2]["choices"][1], "Pro");

    sheets.set_tab("book", "INPUT", vec![row(&["Name"]), row(&["colour"])]);
    let response = app.oneshot(get("/api/sheets/book/schema")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn rejected_submission_renders_inline_errors() {
    let (sheets, _, app) = setup(None);
    let action = open_form(&app).await;

    let response = app
        .oneshot(post_form(&action, "Name=&Age=5&Plan=Basic&Agree=false"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let page = body_text(response).await;
    assert!(page.contains("<div class=\"error\">required</div>"));
    assert!(page.contains("value=\"5\""));

    assert_eq!(sheets.tab("book", "ENTRIES").unwrap().len(), 1);
}

#[tokio::test]
async fn accepted_submission_appends_and_closes_form() {
    let (sheets, state, app) = setup(None);
    let action = open_form(&app).await;
    assert_eq!(state.forms.len(), 1);

    let response = app
        .clone()
        .oneshot(post_form(
            &action,
            "Name=Ann+Lee&Age=31&Plan=Pro&Agree=false&Agree=true",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("added to ENTRIES"));

    assert_eq!(
        sheets.tab("book", "ENTRIES").unwrap()[1],
        row(&["Ann Lee", "31", "Pro", "TRUE"])
    );

    // a submitted form is done and no longer held
    assert!(state.forms.is_empty());
    let response = app.oneshot(post_form(&action, "Name=Bob")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(sheets.tab("book", "ENTRIES").unwrap().len(), 2);
}

#[tokio::test]
async fn submission_uses_the_current_input_sheet() {
    let (sheets, _, app) = setup(None);
    let action = open_form(&app).await;

    sheets.set_tab(
        "book",
        "INPUT",
        vec![
            row(&["Name", "Age", "Plan", "Agree"]),
            row(&["required", "number:0..120", "choice:Basic,Gold", "checkbox"]),
        ],
    );
    let response = app
        .clone()
        .oneshot(post_form(&action, "Name=Ann&Plan=Gold&Agree=false"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        sheets.tab("book", "ENTRIES").unwrap()[1],
        row(&["Ann", "", "Gold", "FALSE"])
    );

    let action = open_form(&app).await;
    sheets.set_tab("book", "INPUT", vec![row(&["Name"]), row(&["colour"])]);
    let response = app
        .oneshot(post_form(&action, "Name=Bob"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body_text(response).await.contains("The form cannot be built"));
    assert_eq!(sheets.tab("book", "ENTRIES").unwrap().len(), 2);
}

#[tokio::test]
async fn unknown_form_is_not_found() {
    let (_, _, app) = setup(None);
    let response = app
        .oneshot(post_form("/forms/not-a-form", "Name=Ann"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn exports_tab_as_csv() {
    let (_, _, app) = setup(None);
    let response = app
        .oneshot(get("/sheets/book/tabs/INPUT/export.csv"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/csv; charset=utf-8"
    );
    let body = body_text(response).await;
    assert!(body.starts_with("Name,Age,Plan,Agree\n"));
}

#[tokio::test]
async fn upload_requires_admin_key() {
    let (sheets, _, app) = setup(Some("s3cret"));

    let response = app
        .clone()
        .oneshot(upload("/sheets/book/tabs/ENTRIES/upload?admin=wrong"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .oneshot(upload("/sheets/book/tabs/ENTRIES/upload?admin=s3cret"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        sheets.tab("book", "ENTRIES").unwrap()[1],
        row(&["Zoe", "40"])
    );
}

#[tokio::test]
async fn upload_form_is_shown_to_admins_and_posts_with_the_key() {
    let (sheets, _, app) = setup(Some("s3cret"));

    for uri in ["/sheets/book/tabs/ENTRIES", "/sheets/book/tabs/ENTRIES?admin=wrong"] {
        let page = body_text(app.clone().oneshot(get(uri)).await.unwrap()).await;
        assert!(!page.contains("Replace from CSV"), "{}", uri);
    }

    let page = body_text(
        app.clone()
            .oneshot(get("/sheets/book/tabs/ENTRIES?admin=s3cret"))
            .await
            .unwrap(),
    )
    .await;
    assert!(page.contains("Replace from CSV"));
    let action = form_action(&page, "/sheets/book/tabs/ENTRIES/upload").unwrap();
    assert_eq!(action, "/sheets/book/tabs/ENTRIES/upload?admin=s3cret");

    let response = app.oneshot(upload(&action)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        sheets.tab("book", "ENTRIES").unwrap()[1],
        row(&["Zoe", "40"])
    );
}

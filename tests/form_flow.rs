use sheetforms::{
    FieldValue, FormInstance, FormState, MemorySheets, SheetTarget, SheetsError, SubmitError,
    SubmitOutcome, infer_schema, submit,
};
use std::collections::HashMap;

fn row(cells: &[&str]) -> Vec<String> {
    cells.iter().map(|s| s.to_string()).collect()
}

fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn sheets_with_entries(entries: Vec<Vec<String>>) -> MemorySheets {
    let sheets = MemorySheets::new();
    sheets.set_tab(
        "book",
        "INPUT",
        vec![
            row(&["Name", "Age", "Plan"]),
            row(&["required", "number", "choice:Basic,Pro"]),
        ],
    );
    sheets.set_tab("book", "ENTRIES", entries);
    sheets
}

#[tokio::test]
async fn valid_submission_appends_one_row() {
    let sheets = sheets_with_entries(vec![row(&["Name", "Age", "Plan"])]);
    let schema = infer_schema(&sheets.tab("book", "INPUT").unwrap()).unwrap();

    let outcome = submit(
        &sheets,
        &schema,
        &values(&[("Name", "Ann"), ("Age", "31"), ("Plan", "Pro")]),
        &SheetTarget::new("book", "ENTRIES"),
    )
    .await
    .unwrap();

    assert_eq!(outcome, SubmitOutcome::Appended);
    let entries = sheets.tab("book", "ENTRIES").unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1], row(&["Ann", "31", "Pro"]));
}

#[tokio::test]
async fn invalid_submission_writes_nothing() {
    let sheets = sheets_with_entries(vec![row(&["Name", "Age", "Plan"])]);
    let schema = infer_schema(&sheets.tab("book", "INPUT").unwrap()).unwrap();

    let err = submit(
        &sheets,
        &schema,
        &values(&[("Name", ""), ("Age", "5"), ("Plan", "Basic")]),
        &SheetTarget::new("book", "ENTRIES"),
    )
    .await
    .unwrap_err();

    match err {
        SubmitError::Validation(errors) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors.get("Name"), Some("required"));
        }
        other => panic!("expected validation errors, got {:?}", other),
    }
    assert_eq!(sheets.tab("book", "ENTRIES").unwrap().len(), 1);
}

#[tokio::test]
async fn key_field_updates_the_matching_row() {
    let sheets = MemorySheets::new();
    let schema = infer_schema(&[
        row(&["Email", "Status"]),
        row(&["key", "choice:Open,Closed"]),
    ])
    .unwrap();
    sheets.set_tab(
        "book",
        "ENTRIES",
        vec![
            row(&["Email", "Status"]),
            row(&["a@x.org", "Open"]),
            row(&["b@x.org", "Open"]),
        ],
    );
    let target = SheetTarget::new("book", "ENTRIES");

    let outcome = submit(
        &sheets,
        &schema,
        &values(&[("Email", "b@x.org"), ("Status", "Closed")]),
        &target,
    )
    .await
    .unwrap();
    assert_eq!(outcome, SubmitOutcome::Updated { row: 3 });

    let outcome = submit(
        &sheets,
        &schema,
        &values(&[("Email", "c@x.org"), ("Status", "Open")]),
        &target,
    )
    .await
    .unwrap();
    assert_eq!(outcome, SubmitOutcome::Appended);

    let entries = sheets.tab("book", "ENTRIES").unwrap();
    assert_eq!(
        entries,
        vec![
            row(&["Email", "Status"]),
            row(&["a@x.org", "Open"]),
            row(&["b@x.org", "Closed"]),
            row(&["c@x.org", "Open"]),
        ]
    );
}

#[tokio::test]
async fn write_failure_keeps_record_and_values() {
    let sheets = sheets_with_entries(vec![row(&["Name", "Age", "Plan"])]);
    let schema = infer_schema(&sheets.tab("book", "INPUT").unwrap()).unwrap();
    let mut form = FormInstance::new(schema, SheetTarget::new("book", "ENTRIES"));

    form.set_value("Name", "Ann").unwrap();
    form.set_value("Age", "31").unwrap();

    sheets.fail_next_write(SheetsError::PermissionDenied("read-only".into()));
    match form.submit(&sheets).await {
        Err(SubmitError::Write(err)) => {
            assert_eq!(err.source, SheetsError::PermissionDenied("read-only".into()));
            assert_eq!(err.record.get("Name"), Some(&FieldValue::Text("Ann".into())));
            assert_eq!(err.record.get("Age"), Some(&FieldValue::Number(31.0)));
        }
        other => panic!("expected a write error, got {:?}", other),
    }
    assert_eq!(form.state(), &FormState::Editing);
    assert_eq!(form.value("Name"), Some("Ann"));
    assert_eq!(sheets.tab("book", "ENTRIES").unwrap().len(), 1);

    // same instance, no re-entry
    assert_eq!(form.submit(&sheets).await.unwrap(), SubmitOutcome::Appended);
    assert_eq!(form.state(), &FormState::Submitted);
    assert_eq!(
        sheets.tab("book", "ENTRIES").unwrap()[1],
        row(&["Ann", "31", ""])
    );
}

#[tokio::test]
async fn submitted_form_refuses_further_edits() {
    let sheets = sheets_with_entries(Vec::new());
    let schema = infer_schema(&sheets.tab("book", "INPUT").unwrap()).unwrap();
    let mut form = FormInstance::new(schema, SheetTarget::new("book", "ENTRIES"));

    form.set_value("Name", "Ann").unwrap();
    form.submit(&sheets).await.unwrap();

    assert!(form.set_value("Name", "Bob").is_err());
    assert!(matches!(
        form.submit(&sheets).await,
        Err(SubmitError::Form(_))
    ));
    assert_eq!(sheets.tab("book", "ENTRIES").unwrap(), vec![row(&["Ann", "", ""])]);
}

#[tokio::test]
async fn independent_instances_do_not_share_values() {
    let sheets = sheets_with_entries(Vec::new());
    let schema = infer_schema(&sheets.tab("book", "INPUT").unwrap()).unwrap();
    let target = SheetTarget::new("book", "ENTRIES");

    let mut first = FormInstance::new(schema.clone(), target.clone());
    let mut second = FormInstance::new(schema, target);
    first.set_value("Name", "Ann").unwrap();
    second.set_value("Name", "Bob").unwrap();

    assert_ne!(first.id(), second.id());
    assert_eq!(first.value("Name"), Some("Ann"));
    assert_eq!(second.value("Name"), Some("Bob"));
}

#[tokio::test]
async fn computed_columns_are_never_written() {
    let sheets = MemorySheets::new();
    let schema = infer_schema(&[
        row(&["Email", "Qty", "Total"]),
        row(&["key", "number", "computed"]),
    ])
    .unwrap();
    sheets.set_tab(
        "book",
        "ENTRIES",
        vec![
            row(&["Email", "Qty", "Total"]),
            row(&["a@x.org", "1", "=B2*10"]),
        ],
    );
    let target = SheetTarget::new("book", "ENTRIES");

    let outcome = submit(
        &sheets,
        &schema,
        &values(&[("Email", "a@x.org"), ("Qty", "3"), ("Total", "999")]),
        &target,
    )
    .await
    .unwrap();
    assert_eq!(outcome, SubmitOutcome::Updated { row: 2 });

    submit(
        &sheets,
        &schema,
        &values(&[("Email", "b@x.org"), ("Qty", "2")]),
        &target,
    )
    .await
    .unwrap();

    assert_eq!(
        sheets.tab("book", "ENTRIES").unwrap(),
        vec![
            row(&["Email", "Qty", "Total"]),
            row(&["a@x.org", "3", "=B2*10"]),
            row(&["b@x.org", "2"]),
        ]
    );
}

#[tokio::test]
async fn text_that_looks_like_a_number_is_kept_and_still_matches_keys() {
    let sheets = MemorySheets::new();
    let schema = infer_schema(&[row(&["Code", "Note"]), row(&["key", ""])]).unwrap();
    sheets.set_tab(
        "book",
        "ENTRIES",
        vec![row(&["Code", "Note"]), row(&["007", "old"])],
    );
    let target = SheetTarget::new("book", "ENTRIES");

    let outcome = submit(
        &sheets,
        &schema,
        &values(&[("Code", "007"), ("Note", "=1+1")]),
        &target,
    )
    .await
    .unwrap();

    assert_eq!(outcome, SubmitOutcome::Updated { row: 2 });
    assert_eq!(
        sheets.tab("book", "ENTRIES").unwrap()[1],
        row(&["007", "=1+1"])
    );
}

#![cfg(not(tarpaulin_include))]

use sheetforms::downloader::to_csv;
use sheetforms::loader::from_csv;
use sheetforms::schema::{FormSchema, infer_schema};
use sheetforms::sheets::{Grid, MemorySheets};
use sheetforms::submission::{SheetTarget, SubmitOutcome, submit};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::process;

const LOCAL_ID: &str = "local";
const TARGET_TAB: &str = "TARGET";

fn usage(program: &str) {
    eprintln!("Usage:");
    eprintln!("  {} schema <input.csv>", program);
    eprintln!("  {} submit <input.csv> <target.csv> name=value...", program);
}

fn load_schema(path: &str) -> Result<FormSchema, Box<dyn std::error::Error>> {
    let grid = from_csv(path)?;
    Ok(infer_schema(&grid)?)
}

/// Header row for a target file that does not exist yet
fn header_for(schema: &FormSchema) -> Vec<String> {
    let mut header = vec![String::new(); schema.width()];
    for field in schema.fields() {
        header[field.column] = field.name.clone();
    }
    for computed in schema.computed() {
        header[computed.column] = computed.name.clone();
    }
    header
}

fn parse_pairs(args: &[String]) -> Result<HashMap<String, String>, String> {
    args.iter()
        .map(|arg| {
            arg.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.to_string()))
                .ok_or_else(|| format!("expected name=value, got '{}'", arg))
        })
        .collect()
}

async fn run_submit(
    input: &str,
    target: &str,
    pairs: &[String],
) -> Result<SubmitOutcome, Box<dyn std::error::Error>> {
    let schema = load_schema(input)?;
    let values = parse_pairs(pairs)?;

    let grid: Grid = if Path::new(target).exists() {
        from_csv(target)?
    } else {
        vec![header_for(&schema)]
    };

    let sheets = MemorySheets::new();
    sheets.set_tab(LOCAL_ID, TARGET_TAB, grid);

    let target_ref = SheetTarget::new(LOCAL_ID, TARGET_TAB);
    let outcome = submit(&sheets, &schema, &values, &target_ref).await?;

    let updated = sheets.tab(LOCAL_ID, TARGET_TAB).unwrap_or_default();
    fs::write(target, to_csv(&updated)?)?;
    Ok(outcome)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("sheetforms-cli");

    match args.get(1).map(String::as_str) {
        Some("schema") if args.len() == 3 => match load_schema(&args[2]) {
            Ok(schema) => println!("{}", serde_json::to_string_pretty(&schema)?),
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        },
        Some("submit") if args.len() >= 4 => {
            match run_submit(&args[2], &args[3], &args[4..]).await {
                Ok(SubmitOutcome::Appended) => println!("Appended a row to {}", args[3]),
                Ok(SubmitOutcome::Updated { row }) => println!("Updated row {} of {}", row, args[3]),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    process::exit(1);
                }
            }
        }
        _ => {
            usage(program);
            process::exit(2);
        }
    }

    Ok(())
}

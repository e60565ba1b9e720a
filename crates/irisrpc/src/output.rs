use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use irisrpc_u64json::{json, Value};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

fn to_json_line<T: Serialize>(out: &T) -> String {
    serde_json::to_string(out).unwrap_or_else(|_| "{}".to_string())
}

/// Print a fixed-shape record: JSON object, two-column table, or `key: value` lines.
pub fn print_record<T: Serialize>(out: &T, fields: &[(&str, String)], format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", to_json_line(out)),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (name, value) in fields {
                table.add_row(vec![name.to_string(), value.clone()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let width = fields.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
            for (name, value) in fields {
                println!("{name:<width$}  {value}");
            }
        }
    }
}

/// Print an RPC result value.
pub fn print_value(value: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", to_json_line(&json::to_json(value))),
        OutputFormat::Table => println!("{}", value_table(value)),
        OutputFormat::Pretty => println!(
            "{}",
            serde_json::to_string_pretty(&json::to_json(value)).unwrap_or_else(|_| value.to_string())
        ),
    }
}

/// Objects become KEY/VALUE rows, arrays of objects one row per element.
fn value_table(value: &Value) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    match value {
        Value::Object(obj) => {
            table.set_header(vec!["KEY", "VALUE"]);
            for (key, member) in obj {
                table.add_row(vec![key.clone(), member.to_string()]);
            }
        }
        Value::Array(items) if !items.is_empty() && items.iter().all(|i| i.as_object().is_some()) => {
            let mut columns: Vec<String> = Vec::new();
            for item in items.iter().filter_map(Value::as_object) {
                for key in item.keys() {
                    if !columns.contains(key) {
                        columns.push(key.clone());
                    }
                }
            }
            table.set_header(columns.iter().map(|c| c.to_uppercase()).collect::<Vec<_>>());
            for item in items.iter().filter_map(Value::as_object) {
                table.add_row(
                    columns
                        .iter()
                        .map(|c| item.get(c).map(Value::to_string).unwrap_or_default())
                        .collect::<Vec<_>>(),
                );
            }
        }
        other => {
            table.set_header(vec!["RESULT"]);
            table.add_row(vec![other.to_string()]);
        }
    }
    table
}

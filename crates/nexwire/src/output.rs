use std::io::{IsTerminal, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
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

#[derive(Serialize)]
struct ResultOutput<'a> {
    session_id: &'a str,
    method: u16,
    payload_size: usize,
    payload: String,
    elapsed_ms: f64,
    timestamp: String,
}

/// Print the result of one invocation.
pub fn print_result(
    payload: &[u8],
    session_id: &str,
    method: u16,
    elapsed: Duration,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => {
            let out = ResultOutput {
                session_id,
                method,
                payload_size: payload.len(),
                payload: payload_preview(payload),
                elapsed_ms: millis(elapsed),
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            print_table(
                &["METHOD", "SIZE", "SESSION", "ELAPSED", "RESULT"],
                vec![vec![
                    method.to_string(),
                    payload.len().to_string(),
                    session_id.to_string(),
                    format!("{:.2}ms", millis(elapsed)),
                    payload_preview(payload),
                ]],
            );
        }
        OutputFormat::Pretty => {
            println!(
                "method={} size={} session={} elapsed={:.2}ms result={}",
                method,
                payload.len(),
                session_id,
                millis(elapsed),
                payload_preview(payload)
            );
        }
        OutputFormat::Raw => print_raw(payload),
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_table(header: &[&str], rows: Vec<Vec<String>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.to_vec());
    for row in rows {
        table.add_row(row);
    }
    println!("{table}");
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

/// Milliseconds rounded to two decimals.
pub fn millis(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 1000.0 * 100.0).round() / 100.0
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

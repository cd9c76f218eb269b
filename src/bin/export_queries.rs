//! Export every user-authored question to a CSV report.
//!
//! Usage: cargo run --bin export_queries [config.json] [output_dir]
//!
//! Reads from the same store the bot uses (Supabase when configured, otherwise
//! the local SQLite file) and writes `user_queries_<timestamp>.csv` into
//! `output_dir` (default `reports/`).

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use chrono::Local;

use startup_advisor::advisor::export::{csv_file_name, write_csv_header, write_csv_rows};
use startup_advisor::advisor::open_store;
use startup_advisor::advisor::store::QueryCursor;
use startup_advisor::config::Config;

const PAGE_SIZE: usize = 2000;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 3 || args.iter().any(|a| a == "-h" || a == "--help") {
        eprintln!("Usage: {} [config.json] [output_dir]", args[0]);
        eprintln!();
        eprintln!("Export all user queries (role = user) ordered by creation time.");
        std::process::exit(1);
    }

    let config_path = args.get(1).map(String::as_str).unwrap_or("advisor.json");
    let out_dir = PathBuf::from(args.get(2).map(String::as_str).unwrap_or("reports"));

    let config = match Config::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };
    let store = match open_store(&config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to open store: {e}");
            std::process::exit(1);
        }
    };
    println!("Reading from {} store...", store.backend_name());

    if let Err(e) = std::fs::create_dir_all(&out_dir) {
        eprintln!("Failed to create {:?}: {e}", out_dir);
        std::process::exit(1);
    }
    let out_path = out_dir.join(csv_file_name(Local::now()));
    let file = match File::create(&out_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Failed to create {:?}: {e}", out_path);
            std::process::exit(1);
        }
    };
    let mut out = BufWriter::new(file);

    let mut cursor: Option<QueryCursor> = None;
    let mut total = 0usize;
    let result: Result<(), String> = async {
        write_csv_header(&mut out).map_err(|e| e.to_string())?;
        loop {
            let page = store
                .user_queries_page(cursor.as_ref(), PAGE_SIZE)
                .await
                .map_err(|e| e.to_string())?;
            let Some(last) = page.last() else { break };
            cursor = Some(last.cursor());
            write_csv_rows(&mut out, &page).map_err(|e| e.to_string())?;
            total += page.len();
            println!("  {} rows...", total);
        }
        out.flush().map_err(|e| e.to_string())
    }
    .await;

    if let Err(e) = result {
        eprintln!("Export failed after {total} rows: {e}");
        std::process::exit(1);
    }
    println!("✅ Exported {total} user queries to: {}", out_path.display());
}

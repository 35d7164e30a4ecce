//! Logs command - view and manage pipeline logs

use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};
use clap::Subcommand;
use colored::Colorize;

use super::get_data_dir;
use crate::output;
use ledgerflow_core::services::{LogEntry, LoggingService};
use ledgerflow_core::EntryPoint;

#[derive(Subcommand)]
pub enum LogsCommands {
    /// Show recent log entries
    List {
        /// Number of entries to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
        /// Show only errors
        #[arg(long)]
        errors: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show every entry written by one pipeline run
    Run {
        /// Run identifier printed by `process`
        run_id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Clear old log entries
    Clear {
        /// Delete logs older than N days
        #[arg(long, default_value = "30")]
        older_than_days: u32,
        /// Skip confirmation prompt
        #[arg(long, short = 'f')]
        force: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show log statistics and database path
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn get_logging_service() -> Result<LoggingService> {
    let data_dir = get_data_dir()?;
    std::fs::create_dir_all(&data_dir)?;
    Ok(LoggingService::new(
        &data_dir,
        EntryPoint::Cli,
        env!("CARGO_PKG_VERSION"),
    )?)
}

fn format_timestamp(timestamp_ms: i64) -> String {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp_ms.to_string())
}

fn context_column(entry: &LogEntry) -> String {
    let state = entry.state.as_ref().map(|s| format!("state={}", s));
    [
        entry.command.clone(),
        entry.institution.clone(),
        state,
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(", ")
}

fn counts_column(entry: &LogEntry) -> String {
    match (entry.files_processed, entry.rows_inserted, entry.new_categories) {
        (None, None, None) => String::new(),
        (files, rows, categories) => format!(
            "{}f / {}r / {}c",
            files.unwrap_or(0),
            rows.unwrap_or(0),
            categories.unwrap_or(0)
        ),
    }
}

fn print_entries(entries: &[LogEntry]) {
    let mut table = output::create_table();
    table.set_header(vec!["Time", "Entry", "Event", "Run", "Context", "Counts", "Error"]);

    for entry in entries {
        let run = entry
            .run_id
            .as_deref()
            .map(|id| id.chars().take(8).collect::<String>())
            .unwrap_or_default();
        let error_indicator = if entry.error_message.is_some() {
            "!".red().to_string()
        } else {
            String::new()
        };

        table.add_row(vec![
            format_timestamp(entry.timestamp),
            entry.entry_point.clone(),
            entry.event.clone(),
            run,
            context_column(entry),
            counts_column(entry),
            error_indicator,
        ]);
    }

    println!("{}", table);
}

pub fn run(command: LogsCommands) -> Result<()> {
    match command {
        LogsCommands::List {
            limit,
            errors,
            json,
        } => {
            let service = get_logging_service()?;
            let entries = if errors {
                service.get_errors(limit)?
            } else {
                service.get_recent(limit)?
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
                return Ok(());
            }

            if entries.is_empty() {
                println!("No log entries found.");
                return Ok(());
            }

            print_entries(&entries);

            if !errors {
                let recent_errors = service.get_errors(3)?;
                if !recent_errors.is_empty() {
                    println!();
                    println!("{}", "Recent Errors:".red().bold());
                    for err in &recent_errors {
                        println!(
                            "  {} [{}]: {}",
                            format_timestamp(err.timestamp).dimmed(),
                            err.event,
                            err.error_message.as_deref().unwrap_or("Unknown error")
                        );
                    }
                }
            }
        }
        LogsCommands::Run { run_id, json } => {
            let service = get_logging_service()?;
            let entries = service.get_run(&run_id)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
                return Ok(());
            }

            if entries.is_empty() {
                output::warning(&format!("No log entries for run {}", run_id));
                return Ok(());
            }

            print_entries(&entries);
            for entry in entries.iter().filter(|e| e.error_details.is_some()) {
                println!();
                println!("{} {}", "Details for".bold(), entry.event.bold());
                println!("{}", entry.error_details.as_deref().unwrap_or_default());
            }
        }
        LogsCommands::Clear {
            older_than_days,
            force,
            json,
        } => {
            let service = get_logging_service()?;
            let cutoff_ms =
                (Utc::now() - Duration::days(i64::from(older_than_days))).timestamp_millis();

            if !force && !json {
                use dialoguer::Confirm;
                if !Confirm::new()
                    .with_prompt(format!("Delete logs older than {} days?", older_than_days))
                    .default(false)
                    .interact()?
                {
                    println!("Cancelled.");
                    return Ok(());
                }
            }

            let deleted = service.delete_before(cutoff_ms)?;

            if json {
                println!("{}", serde_json::json!({ "deleted": deleted }));
            } else {
                println!("Deleted {} log entries", deleted);
            }
        }
        LogsCommands::Stats { json } => {
            let service = get_logging_service()?;
            let total = service.count()?;
            let errors = service.count_errors()?;
            let db_path = service.db_path().to_path_buf();
            let size_bytes = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "total_entries": total,
                        "error_count": errors,
                        "database_path": db_path.to_string_lossy(),
                        "database_size_bytes": size_bytes
                    })
                );
            } else {
                println!("{}", "Log Statistics".bold());
                println!("  Total entries: {}", total);
                println!("  Errors: {}", errors);
                println!("  Database: {}", db_path.display());
                println!("  Size: {} bytes", size_bytes);
            }
        }
    }

    Ok(())
}

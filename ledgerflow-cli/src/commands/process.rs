//! Process command - run the pipeline over statement files

use anyhow::Result;
use colored::Colorize;

use ledgerflow_core::{Institution, ProcessRequest, ProcessingResult};

use super::{get_context, log_command};
use crate::output;

pub fn run(
    institution: &str,
    files: Vec<String>,
    force: bool,
    until_empty: bool,
    max_rounds: usize,
    json: bool,
) -> Result<()> {
    let institution: Institution = institution.parse()?;
    let ctx = get_context()?;
    log_command(&ctx, "process");
    let pipeline = ctx.pipeline()?;

    let mut request = ProcessRequest {
        institution,
        file_paths: files,
        force_reprocess: force,
    };
    let rounds = if until_empty { max_rounds.max(1) } else { 1 };
    let mut results: Vec<ProcessingResult> = Vec::new();

    for round in 1..=rounds {
        let bar = if json {
            indicatif::ProgressBar::hidden()
        } else {
            output::spinner(&format!("Round {}: processing {} file(s)...", round, request.file_paths.len()))
        };
        let result = pipeline.process(&request);
        bar.finish_and_clear();
        let result = result?;

        let more = result.gap_remaining;
        if !json {
            print_result(round, &result);
        }
        results.push(result);

        if !more {
            break;
        }
        // later rounds only drain the gap
        request.file_paths.clear();
        request.force_reprocess = false;
    }

    if json {
        if until_empty {
            println!("{}", serde_json::to_string_pretty(&results)?);
        } else if let Some(result) = results.first() {
            println!("{}", serde_json::to_string_pretty(result)?);
        }
        return Ok(());
    }

    if let Some(last) = results.last() {
        if last.gap_remaining {
            if until_empty {
                output::warning(&format!(
                    "Stopped after {} rounds with descriptions still uncategorized.",
                    results.len()
                ));
            } else {
                output::info("More uncategorized descriptions remain. Run again or use --until-empty.");
            }
        }
    }
    Ok(())
}

fn print_result(round: usize, result: &ProcessingResult) {
    println!(
        "{} {} {}",
        format!("Round {}", round).bold(),
        "run".dimmed(),
        result.run_id.dimmed()
    );

    let mut table = output::create_table();
    table.add_row(vec!["Files processed", &result.files_processed.to_string()]);
    table.add_row(vec!["Files skipped", &result.files_skipped.to_string()]);
    table.add_row(vec!["Rows inserted", &result.rows_inserted.to_string()]);
    table.add_row(vec!["Rows skipped (overlap)", &result.rows_skipped.to_string()]);
    table.add_row(vec!["New categories", &result.new_categories.to_string()]);
    table.add_row(vec!["Models built", &result.transform_models_built.to_string()]);
    table.add_row(vec![
        "Time",
        &output::format_duration(result.processing_time_seconds),
    ]);
    println!("{}", table);

    if result.files_processed == 0 && result.new_categories == 0 {
        output::success("Nothing new to process.");
    } else {
        output::success("Processing completed successfully.");
    }
    println!();
}

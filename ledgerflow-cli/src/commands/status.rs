//! Status command - show warehouse status and summary

use anyhow::Result;
use colored::Colorize;

use super::get_context;
use crate::output;

pub fn run(json: bool) -> Result<()> {
    let ctx = get_context()?;
    let status = ctx.status_service.get_status()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("{}", "Warehouse Status".bold());
    println!("  {}", ctx.repository.db_path().display().to_string().dimmed());
    println!();

    let mut table = output::create_table();
    for institution in &status.institutions {
        table.add_row(vec![
            format!("Raw rows ({})", institution.institution),
            institution.raw_rows.to_string(),
        ]);
    }
    table.add_row(vec!["Ingested files".to_string(), status.ingested_files.to_string()]);
    table.add_row(vec![
        "Cached descriptions".to_string(),
        status.cached_descriptions.to_string(),
    ]);
    table.add_row(vec![
        "Taxonomy categories".to_string(),
        status.taxonomy_categories.to_string(),
    ]);
    table.add_row(vec![
        "Uncategorized".to_string(),
        status.uncategorized_descriptions.to_string(),
    ]);
    println!("{}", table);

    if let Some(last) = &status.last_ingested_at {
        println!();
        println!("Last ingested: {}", last);
    }
    if status.taxonomy_categories == 0 {
        println!();
        output::warning("Taxonomy not seeded yet. Run 'ledgerflow init-categories'.");
    }
    Ok(())
}

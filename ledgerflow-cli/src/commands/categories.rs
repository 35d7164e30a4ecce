//! Init-categories command - seed the taxonomy

use anyhow::Result;
use colored::Colorize;

use super::{get_context, log_command};
use crate::output;

pub fn run(json: bool) -> Result<()> {
    let ctx = get_context()?;
    log_command(&ctx, "init-categories");
    let result = ctx.taxonomy_service.init()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if result.already_initialized {
        output::info("Categories already initialized, nothing to do.");
        return Ok(());
    }

    output::success(&format!("Inserted {} categories", result.inserted));
    let mut current = String::new();
    for category in ctx.taxonomy_service.categories()? {
        if category.general_category != current {
            println!("{}", category.general_category.bold());
            current = category.general_category.clone();
        }
        println!("  {} {}", category.category_id.dimmed(), category.detailed_category);
    }
    Ok(())
}

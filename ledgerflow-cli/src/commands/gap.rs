//! Gap command - descriptions waiting for a category

use anyhow::Result;

use ledgerflow_core::services::UncategorizedFinder;

use super::get_context;
use crate::output;

pub fn run(limit: Option<usize>, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let finder = match limit {
        Some(limit) => UncategorizedFinder::new(ctx.repository.clone(), limit.max(1)),
        None => ctx.finder(),
    };
    let gap = finder.find_gap()?;
    let total = finder.gap_size()?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "descriptions": gap,
                "shown": gap.len(),
                "total": total,
            })
        );
        return Ok(());
    }

    if gap.is_empty() {
        output::success("Every description has a category.");
        return Ok(());
    }

    for key in &gap {
        println!("  {}", key);
    }
    println!();
    output::info(&format!("{} of {} uncategorized descriptions shown", gap.len(), total));
    Ok(())
}

//! Forget command - remove a file's rows so it can be reloaded

use anyhow::Result;

use super::{get_context, log_command};
use crate::output;

pub fn run(path: &str, json: bool) -> Result<()> {
    let ctx = get_context()?;
    log_command(&ctx, "forget");

    let bar = if json {
        indicatif::ProgressBar::hidden()
    } else {
        output::spinner(&format!("Forgetting {}...", path))
    };
    let result = ctx.pipeline().and_then(|pipeline| pipeline.forget_file(path));
    bar.finish_and_clear();
    let result = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if result.rows_deleted == 0 {
        output::warning(&format!("No rows were loaded from {}", result.file_path));
    } else {
        output::success(&format!(
            "Deleted {} rows from {} ({})",
            result.rows_deleted,
            result.file_path,
            &result.file_fingerprint[..result.file_fingerprint.len().min(12)]
        ));
    }
    for reloaded in &result.reloaded_files {
        output::info(&format!("Reloaded {} (its overlap rows lived in the forgotten file)", reloaded));
    }
    for stale in &result.stale_files {
        output::warning(&format!(
            "Could not reload {}; process it again with --force",
            stale
        ));
    }
    Ok(())
}

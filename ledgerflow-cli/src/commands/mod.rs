//! CLI command implementations

pub mod categories;
pub mod forget;
pub mod gap;
pub mod logs;
pub mod process;
pub mod status;

use std::path::PathBuf;

use anyhow::{Context, Result};
use ledgerflow_core::services::LogEvent;
use ledgerflow_core::{EntryPoint, LedgerflowContext};

/// Get the data directory from environment or default
pub fn get_data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("LEDGERFLOW_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let home = dirs::home_dir().context("Could not find home directory (set LEDGERFLOW_DIR)")?;
    Ok(home.join(".ledgerflow"))
}

/// Open the project context for a CLI command
pub fn get_context() -> Result<LedgerflowContext> {
    let data_dir = get_data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

    LedgerflowContext::new(&data_dir, EntryPoint::Cli)
        .context("Failed to initialize ledgerflow context")
}

/// Record that a command ran; never fails the command
pub fn log_command(ctx: &LedgerflowContext, command: &str) {
    ctx.logging.record(LogEvent::new("command_executed").with_command(command));
}

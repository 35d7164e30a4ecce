//! HTTP boundary - `ledgerflow serve`
//!
//! The project context is opened lazily on the first request that needs it,
//! so `/health` answers even when the warehouse is misconfigured.

mod error;
mod handlers;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::OnceCell;

use ledgerflow_core::{EntryPoint, LedgerflowContext};

use crate::commands::get_data_dir;
use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    data_dir: PathBuf,
    context: Arc<OnceCell<Arc<LedgerflowContext>>>,
}

impl AppState {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            context: Arc::new(OnceCell::new()),
        }
    }

    #[cfg(test)]
    fn with_context(ctx: LedgerflowContext) -> Self {
        Self {
            data_dir: ctx.data_dir.clone(),
            context: Arc::new(OnceCell::new_with(Some(Arc::new(ctx)))),
        }
    }

    async fn context(&self) -> Result<Arc<LedgerflowContext>, ApiError> {
        let ctx = self
            .context
            .get_or_try_init(|| async {
                let data_dir = self.data_dir.clone();
                let ctx = tokio::task::spawn_blocking(move || {
                    std::fs::create_dir_all(&data_dir).map_err(ledgerflow_core::Error::from)?;
                    LedgerflowContext::new(&data_dir, EntryPoint::Server)
                })
                .await??;
                Ok::<_, ApiError>(Arc::new(ctx))
            })
            .await?;
        Ok(ctx.clone())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/status/:job_id", get(handlers::job_status))
        .route("/process-data", post(handlers::process_data))
        .route("/init-categories", post(handlers::init_categories))
        .route("/forget-file", post(handlers::forget_file))
        .with_state(state)
}

/// Bind and serve until the process is stopped
pub fn serve(host: &str, port: u16) -> anyhow::Result<()> {
    let state = AppState::new(get_data_dir()?);
    let addr = format!("{}:{}", host, port);

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        tracing::info!(addr = %addr, "ledgerflow server listening");
        axum::serve(listener, router(state))
            .await
            .context("HTTP server stopped")
    })
}

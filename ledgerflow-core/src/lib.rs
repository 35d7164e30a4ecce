//! LedgerFlow Core - statement ingestion, dedup and category enrichment
//!
//! This crate implements the core pipeline following hexagonal architecture:
//!
//! - **domain**: Statement rows, fingerprints, categories, run accounting
//! - **ports**: Trait definitions for external collaborators (FileSource, TransformRunner, LlmClient)
//! - **services**: Pipeline stages and their orchestration
//! - **adapters**: Concrete implementations (DuckDB, statement parser, dbt, Gemini, local files)

pub mod adapters;
pub mod config;
pub mod domain;
pub mod log_migrations;
pub mod migrations;
pub mod ports;
pub mod services;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use adapters::dbt::DbtRunner;
use adapters::duckdb::DuckDbRepository;
use adapters::gemini::GeminiClient;
use adapters::local_store::LocalFileStore;
use config::Config;
use ports::{FileSource, LlmClient, NoopTransformRunner, TransformRunner};
use services::*;

// Re-export commonly used types at crate root
pub use domain::result::{Error, Result};
pub use domain::{
    Categorization, Category, DescriptionKey, FileFingerprint, ForgetResult, Institution,
    PipelineState, ProcessingResult, StatementRow,
};
pub use services::{EntryPoint, ProcessRequest};

/// Env var exported to dbt so its profile can locate the warehouse file
///
/// The pipeline releases the file for the duration of every dbt run.
pub const ENV_WAREHOUSE_PATH: &str = "LEDGERFLOW_WAREHOUSE";

/// External collaborators of the pipeline
#[derive(Clone)]
pub struct Ports {
    pub files: Arc<dyn FileSource>,
    pub transforms: Arc<dyn TransformRunner>,
    pub llm: Arc<dyn LlmClient>,
}

impl Ports {
    /// Build the production adapters described by `config`
    ///
    /// Fails when the LLM key is missing or dbt is enabled without a project directory.
    pub fn from_config(config: &Config, warehouse_path: &Path) -> Result<Self> {
        let files: Arc<dyn FileSource> = Arc::new(LocalFileStore::new(&config.files_root));

        let transforms: Arc<dyn TransformRunner> = if config.dbt.enabled {
            let project_dir = config.dbt.project_dir.as_ref().ok_or_else(|| {
                Error::config(format!(
                    "dbt.projectDir is not configured (set it in settings.json or {})",
                    config::ENV_DBT_DIR
                ))
            })?;
            Arc::new(
                DbtRunner::new(&config.dbt.program, project_dir, config.dbt.install_deps)
                    .with_env(ENV_WAREHOUSE_PATH, warehouse_path.display().to_string()),
            )
        } else {
            Arc::new(NoopTransformRunner)
        };

        let llm: Arc<dyn LlmClient> = Arc::new(GeminiClient::new(
            &config.llm.base_url,
            config.llm.api_key.as_deref().unwrap_or_default(),
            &config.llm.model,
            config.llm.timeout_secs,
        )?);

        Ok(Self {
            files,
            transforms,
            llm,
        })
    }
}

/// Main context for LedgerFlow operations
///
/// Holds the warehouse, the run log and the services that need nothing
/// beyond them. The pipeline is built on demand because it also needs the
/// external ports, which status and gap queries do not.
pub struct LedgerflowContext {
    pub config: Config,
    pub data_dir: PathBuf,
    pub repository: Arc<DuckDbRepository>,
    pub logging: Arc<LoggingService>,
    pub status_service: StatusService,
    pub taxonomy_service: TaxonomyService,
    ports: Option<Ports>,
}

impl LedgerflowContext {
    /// Open the project's warehouse and run log under `data_dir`
    pub fn new(data_dir: &Path, entry_point: EntryPoint) -> Result<Self> {
        let config = Config::load(data_dir)?;
        Self::with_config(data_dir, config, entry_point)
    }

    pub fn with_config(data_dir: &Path, config: Config, entry_point: EntryPoint) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = config.warehouse_path(data_dir)?;
        let repository = Arc::new(DuckDbRepository::new(&db_path)?);
        repository.ensure_schema()?;

        let logging = Arc::new(LoggingService::new(
            data_dir,
            entry_point,
            env!("CARGO_PKG_VERSION"),
        )?);

        let status_service = StatusService::new(Arc::clone(&repository));
        let taxonomy_service = TaxonomyService::new(Arc::clone(&repository), Arc::clone(&logging));

        Ok(Self {
            config,
            data_dir: data_dir.to_path_buf(),
            repository,
            logging,
            status_service,
            taxonomy_service,
            ports: None,
        })
    }

    /// Use these ports instead of the ones described by the config
    pub fn with_ports(mut self, ports: Ports) -> Self {
        self.ports = Some(ports);
        self
    }

    /// Pipeline wired to the configured (or injected) ports
    pub fn pipeline(&self) -> Result<PipelineService> {
        let ports = match &self.ports {
            Some(ports) => ports.clone(),
            None => Ports::from_config(&self.config, self.repository.db_path())?,
        };
        Ok(PipelineService::new(
            Arc::clone(&self.repository),
            ports.files,
            ports.transforms,
            ports.llm,
            Arc::clone(&self.logging),
            self.config.pipeline.clone(),
        ))
    }

    /// Gap query capped at the configured limit
    pub fn finder(&self) -> UncategorizedFinder {
        UncategorizedFinder::new(Arc::clone(&self.repository), self.config.pipeline.gap_limit)
    }
}

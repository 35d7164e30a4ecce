//! Service layer - business logic orchestration
//!
//! Services coordinate domain logic and port interactions. Each service
//! focuses on one stage of the pipeline or one operator task.

mod classifier;
mod finder;
mod ledger;
pub mod logging;
mod merger;
pub mod migration;
mod pipeline;
mod status;
mod taxonomy;

pub use classifier::{build_prompt, parse_response, Classifier};
pub use finder::UncategorizedFinder;
pub use ledger::DedupLedger;
pub use logging::{EntryPoint, LogEntry, LogEvent, LoggingService};
pub use merger::CategoryMerger;
pub use migration::{MigrationResult, MigrationService};
pub use pipeline::{PipelineService, ProcessRequest};
pub use status::{InstitutionSummary, StatusService, StatusSummary};
pub use taxonomy::{InitCategoriesResult, TaxonomyService};

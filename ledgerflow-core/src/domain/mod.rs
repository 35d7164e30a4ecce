//! Core domain entities
//!
//! Pure data structures with validation logic - no I/O.

pub mod category;
pub mod fingerprint;
pub mod processing;
pub mod result;
pub mod statement;

pub use category::{
    taxonomy_rows, Categorization, Category, CategoryCacheEntry, DescriptionKey, TAXONOMY,
    UNCATEGORIZED,
};
pub use fingerprint::{row_fingerprint, FileFingerprint};
pub use processing::{ForgetResult, PipelineState, ProcessingResult, RunTracker};
pub use statement::{AmexRow, Institution, RawRecord, StatementRow, WealthsimpleRow};

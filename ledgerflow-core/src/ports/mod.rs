//! Port definitions (hexagonal architecture)
//!
//! Ports define the interfaces for external collaborators. The services
//! depend only on these traits, not on concrete implementations.

mod file_source;
mod llm;
mod transform;

pub use file_source::{file_name, FileSource};
pub use llm::LlmClient;
pub use transform::{tag_set, NoopTransformRunner, TransformOutcome, TransformRunner};

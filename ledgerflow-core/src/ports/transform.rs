//! Transform trigger port
//!
//! The SQL transformation layer is an external job selected by model tags.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::domain::result::Result;

/// What a transform job reported after a successful run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransformOutcome {
    pub models_built: usize,
}

/// Runs the models carrying any of the given tags
///
/// A non-zero exit is an `Error::Transform` carrying the job's output.
/// Callers never retry.
pub trait TransformRunner: Send + Sync {
    fn run(&self, tags: &BTreeSet<String>) -> Result<TransformOutcome>;
}

/// Runner used when no transform project is configured
#[derive(Debug, Default)]
pub struct NoopTransformRunner;

impl TransformRunner for NoopTransformRunner {
    fn run(&self, tags: &BTreeSet<String>) -> Result<TransformOutcome> {
        tracing::debug!(?tags, "transform runner disabled, skipping");
        Ok(TransformOutcome::default())
    }
}

/// Build a tag set from string slices
pub fn tag_set<S: AsRef<str>>(tags: &[S]) -> BTreeSet<String> {
    tags.iter().map(|t| t.as_ref().to_string()).collect()
}

//! Classifier - maps normalized descriptions onto the taxonomy with an LLM
//!
//! Descriptions are sent in chunks. A chunk whose call or response is unusable
//! falls back to `Uncategorized` as a whole; classification never fails a run.

use std::fmt::Write as _;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::domain::result::{Error, Result};
use crate::domain::{Categorization, DescriptionKey, TAXONOMY, UNCATEGORIZED};
use crate::ports::LlmClient;

pub struct Classifier {
    llm: Arc<dyn LlmClient>,
    batch_size: usize,
}

impl Classifier {
    pub fn new(llm: Arc<dyn LlmClient>, batch_size: usize) -> Self {
        Self {
            llm,
            batch_size: batch_size.max(1),
        }
    }

    pub fn model_version(&self) -> &str {
        self.llm.model_version()
    }

    /// Classify every description, one LLM call per chunk of `batch_size`
    ///
    /// Output order follows input order. A short model response leaves the
    /// trailing descriptions out so a later run picks them up again.
    pub fn categorize(&self, descriptions: &[DescriptionKey]) -> Vec<Categorization> {
        let mut results = Vec::with_capacity(descriptions.len());
        for (index, chunk) in descriptions.chunks(self.batch_size).enumerate() {
            results.extend(self.categorize_chunk(index, chunk));
        }
        tracing::info!(
            requested = descriptions.len(),
            categorized = results.len(),
            uncategorized = results.iter().filter(|c| c.is_uncategorized()).count(),
            "classification finished"
        );
        results
    }

    fn categorize_chunk(&self, index: usize, chunk: &[DescriptionKey]) -> Vec<Categorization> {
        let model = self.llm.model_version();
        let prompt = build_prompt(chunk);

        let parsed = self
            .llm
            .generate(&prompt)
            .and_then(|text| parse_response(&text, chunk, model));

        match parsed {
            Ok(results) => {
                if results.len() < chunk.len() {
                    tracing::warn!(
                        chunk = index,
                        expected = chunk.len(),
                        received = results.len(),
                        "model returned fewer categorizations than descriptions; the rest stay in the gap"
                    );
                }
                results
            }
            Err(e) => {
                tracing::warn!(chunk = index, size = chunk.len(), error = %e, "classification fell back to Uncategorized");
                chunk
                    .iter()
                    .map(|key| Categorization::uncategorized(key, model))
                    .collect()
            }
        }
    }
}

/// Prompt listing the taxonomy and the numbered descriptions
pub fn build_prompt(descriptions: &[DescriptionKey]) -> String {
    let mut taxonomy = String::new();
    for (general, details) in TAXONOMY {
        let _ = writeln!(taxonomy, "**{}:**", general);
        for detailed in *details {
            let _ = writeln!(taxonomy, "  - {}", detailed);
        }
        taxonomy.push('\n');
    }

    let mut numbered = String::new();
    for (i, description) in descriptions.iter().enumerate() {
        let _ = writeln!(numbered, "{}. {}", i + 1, description);
    }

    format!(
        r#"You categorize personal finance transactions. Assign each description below to one category from this taxonomy.

**CATEGORY TAXONOMY:**
{taxonomy}
**RULES:**
1. Pick the most specific detailed category that matches.
2. When nothing specific fits, keep the general category and use "Uncategorized" as the detailed category.
3. Give a confidence_score between 0.0 and 1.0.
4. Answer with a JSON array, one object per description, in the same order:

```json
[
  {{
    "description_number": 1,
    "general_category": "Dining & Restaurants",
    "detailed_category": "Coffee Shops",
    "confidence_score": 0.9
  }}
]
```

**DESCRIPTIONS:**
{numbered}
Respond ONLY with the JSON array, no additional text.
"#
    )
}

/// Pair the model's JSON array with `descriptions` by position
///
/// Elements beyond the input are ignored. Missing or mistyped fields fall back
/// to `Uncategorized` and a confidence of 0.0.
pub fn parse_response(
    text: &str,
    descriptions: &[DescriptionKey],
    model_version: &str,
) -> Result<Vec<Categorization>> {
    let body = strip_code_fence(text);
    let items: Vec<JsonValue> = serde_json::from_str(body).map_err(|e| {
        Error::Classification(format!("response is not a JSON array: {}", e))
    })?;

    Ok(items
        .iter()
        .zip(descriptions)
        .map(|(item, key)| Categorization {
            description_key: key.clone(),
            original_description: key.as_str().to_string(),
            general_category: string_field(item, "general_category"),
            detailed_category: string_field(item, "detailed_category"),
            confidence_score: confidence(item),
            model_version: model_version.to_string(),
        })
        .collect())
}

fn strip_code_fence(text: &str) -> &str {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```json") {
        body = rest;
    } else if let Some(rest) = body.strip_prefix("```") {
        body = rest;
    }
    if let Some(rest) = body.strip_suffix("```") {
        body = rest;
    }
    body.trim()
}

fn string_field(item: &JsonValue, field: &str) -> String {
    item.get(field)
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNCATEGORIZED)
        .to_string()
}

fn confidence(item: &JsonValue) -> f64 {
    match item.get("confidence_score") {
        Some(JsonValue::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(JsonValue::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

//! Optional schema enrichment from an external collaborator.
//!
//! The enricher may improve descriptions, guess enumerations, and supply
//! example arguments. The merge is strictly additive: structural facts
//! (`type`, `required`) always come from the descriptor, and any enricher
//! failure or slowness falls back to the unenriched schema.

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::generate::ToolSchema;

#[derive(Debug, Error)]
#[error("enrichment failed: {0}")]
pub struct EnrichError(pub String);

/// Partial schema improvements returned by the collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaPatch {
    pub description: Option<String>,
    pub param_descriptions: BTreeMap<String, String>,
    pub param_enums: BTreeMap<String, Vec<Value>>,
    pub examples: Vec<Value>,
}

/// External text-generation collaborator interface.
#[async_trait]
pub trait SchemaEnricher: Send + Sync {
    async fn enrich(&self, schema: &ToolSchema) -> Result<SchemaPatch, EnrichError>;
}

/// Run the enricher under a bounded timeout; on any failure the structural
/// schema is returned unchanged.
pub async fn apply_enrichment(
    schema: ToolSchema,
    enricher: &dyn SchemaEnricher,
    timeout: Duration,
) -> ToolSchema {
    match tokio::time::timeout(timeout, enricher.enrich(&schema)).await {
        Ok(Ok(patch)) => merge_patch(schema, patch),
        Ok(Err(e)) => {
            debug!(tool = %schema.name, error = %e, "enrichment failed, using structural schema");
            schema
        }
        Err(_) => {
            debug!(tool = %schema.name, "enrichment timed out, using structural schema");
            schema
        }
    }
}

/// Merge a patch into a schema. Descriptions may be added or improved;
/// enum guesses and examples are only added; `type` and `required` are
/// never touched.
pub fn merge_patch(mut schema: ToolSchema, patch: SchemaPatch) -> ToolSchema {
    if let Some(description) = patch.description {
        if !description.trim().is_empty() {
            schema.description = Some(description);
        }
    }

    if let Some(properties) = schema
        .input_schema
        .get_mut("properties")
        .and_then(Value::as_object_mut)
    {
        for (param, description) in patch.param_descriptions {
            if let Some(prop) = properties.get_mut(&param).and_then(Value::as_object_mut) {
                prop.insert("description".to_string(), Value::String(description));
            }
        }
        for (param, values) in patch.param_enums {
            if values.is_empty() {
                continue;
            }
            if let Some(prop) = properties.get_mut(&param).and_then(Value::as_object_mut) {
                prop.entry("enum".to_string())
                    .or_insert_with(|| Value::Array(values));
            }
        }
    }

    if !patch.examples.is_empty() {
        if let Some(root) = schema.input_schema.as_object_mut() {
            root.entry("examples".to_string())
                .or_insert_with(|| Value::Array(patch.examples));
        }
    }

    schema
}

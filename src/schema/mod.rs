//! JSON-Schema generation for discovered tools, plus optional additive
//! enrichment from an external collaborator.

mod enrich;
mod generate;

pub use enrich::{apply_enrichment, merge_patch, EnrichError, SchemaEnricher, SchemaPatch};
pub use generate::{clean_doc, schema_for, ToolSchema};

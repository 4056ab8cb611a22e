//! Tool catalog: descriptor types, the namespace-graph builder, and the
//! read-only index consulted by every request.

mod builder;
mod index;
mod types;

pub use builder::{BuildDiagnostic, CatalogBuilder};
pub use index::Catalog;
pub use types::{ParamSpec, ParamType, RiskClass, ToolDescriptor, ToolName};

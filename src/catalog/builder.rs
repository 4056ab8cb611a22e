//! Catalog construction by walking adapter namespace graphs.
//!
//! The walk is depth-first, cycle-safe (visited namespaces are tracked by
//! pointer identity), and never fatal: a child namespace that cannot be
//! opened becomes a diagnostic, as does a duplicate canonical name.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{
    index::Catalog,
    types::{ToolDescriptor, ToolName},
};
use crate::sdk::{NamespaceChild, SdkLibrary, SdkNamespace};

/// Backstop for adapters that return fresh namespace objects on every
/// `children()` call, defeating pointer-identity cycle detection.
const MAX_DEPTH: usize = 32;

/// Non-fatal problem recorded during a catalog build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum BuildDiagnostic {
    NamespaceSkipped { path: String, reason: String },
    DuplicateName { name: String },
    DepthExceeded { path: String },
}

impl fmt::Display for BuildDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildDiagnostic::NamespaceSkipped { path, reason } => {
                write!(f, "namespace '{}' skipped: {}", path, reason)
            }
            BuildDiagnostic::DuplicateName { name } => {
                write!(f, "duplicate tool name '{}' ignored", name)
            }
            BuildDiagnostic::DepthExceeded { path } => {
                write!(f, "namespace '{}' exceeds max nesting depth", path)
            }
        }
    }
}

/// Builds a [`Catalog`] from one or more library adapters.
pub struct CatalogBuilder {
    libraries: Vec<Arc<dyn SdkLibrary>>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self {
            libraries: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_library(mut self, library: Arc<dyn SdkLibrary>) -> Self {
        self.libraries.push(library);
        self
    }

    /// Walk every registered library and produce the immutable catalog.
    pub fn build(self) -> Catalog {
        let mut tools: HashMap<ToolName, Arc<ToolDescriptor>> = HashMap::new();
        let mut diagnostics = Vec::new();

        for library in &self.libraries {
            let before = tools.len();
            let mut visited = HashSet::new();
            walk(
                library.root(),
                vec![library.name().to_string()],
                &mut visited,
                &mut tools,
                &mut diagnostics,
            );
            info!(
                library = library.name(),
                tools = tools.len() - before,
                "discovered callables"
            );
        }

        for diagnostic in &diagnostics {
            warn!("{}", diagnostic);
        }

        Catalog::new(tools, diagnostics)
    }
}

impl Default for CatalogBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn walk(
    namespace: Arc<dyn SdkNamespace>,
    path: Vec<String>,
    visited: &mut HashSet<usize>,
    tools: &mut HashMap<ToolName, Arc<ToolDescriptor>>,
    diagnostics: &mut Vec<BuildDiagnostic>,
) {
    // Re-visiting a previously seen namespace (cyclic graph) is a no-op.
    let identity = Arc::as_ptr(&namespace) as *const () as usize;
    if !visited.insert(identity) {
        debug!(path = path.join("."), "namespace already visited");
        return;
    }
    if path.len() > MAX_DEPTH {
        diagnostics.push(BuildDiagnostic::DepthExceeded {
            path: path.join("."),
        });
        return;
    }

    for callable in namespace.callables() {
        let name = ToolName::from_path(&path, callable.name());
        if tools.contains_key(&name) {
            diagnostics.push(BuildDiagnostic::DuplicateName {
                name: name.to_string(),
            });
            continue;
        }
        let descriptor = ToolDescriptor::from_callable(name.clone(), callable);
        tools.insert(name, Arc::new(descriptor));
    }

    for child in namespace.children() {
        match child {
            NamespaceChild::Ready { segment, namespace } => {
                let mut child_path = path.clone();
                child_path.push(segment);
                walk(namespace, child_path, visited, tools, diagnostics);
            }
            NamespaceChild::Unavailable { segment, reason } => {
                let mut child_path = path.clone();
                child_path.push(segment);
                diagnostics.push(BuildDiagnostic::NamespaceSkipped {
                    path: child_path.join("."),
                    reason,
                });
            }
        }
    }
}

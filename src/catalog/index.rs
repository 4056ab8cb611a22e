//! Read-only tool index.
//!
//! Built once per process lifetime (or per explicit reload) and shared
//! across all request handlers without locking.

use std::{collections::HashMap, sync::Arc};

use super::{
    builder::BuildDiagnostic,
    types::{RiskClass, ToolDescriptor, ToolName},
};

pub struct Catalog {
    tools: HashMap<ToolName, Arc<ToolDescriptor>>,
    diagnostics: Vec<BuildDiagnostic>,
}

impl Catalog {
    pub(crate) fn new(
        tools: HashMap<ToolName, Arc<ToolDescriptor>>,
        diagnostics: Vec<BuildDiagnostic>,
    ) -> Self {
        Self { tools, diagnostics }
    }

    pub fn get(&self, name: &ToolName) -> Option<&Arc<ToolDescriptor>> {
        self.tools.get(name)
    }

    /// Lookup by raw string; returns `None` for malformed names too.
    pub fn lookup(&self, name: &str) -> Option<&Arc<ToolDescriptor>> {
        let name = ToolName::parse(name).ok()?;
        self.tools.get(&name)
    }

    pub fn contains(&self, name: &ToolName) -> bool {
        self.tools.contains_key(name)
    }

    /// All descriptors, sorted by canonical name for stable listings.
    pub fn list(&self) -> Vec<&Arc<ToolDescriptor>> {
        let mut all: Vec<_> = self.tools.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn count_by_risk(&self, risk: RiskClass) -> usize {
        self.tools.values().filter(|d| d.risk == risk).count()
    }

    pub fn diagnostics(&self) -> &[BuildDiagnostic] {
        &self.diagnostics
    }
}

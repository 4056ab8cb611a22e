//! Core types for the tool catalog.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{GatewayError, GatewayResult},
    paginate::PageShape,
    sdk::SdkCallable,
};

/// Canonical dotted tool name: `<library>.<path...>.<method>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolName(String);

impl ToolName {
    /// Parse and validate a dotted name. At least two segments; each
    /// segment starts with a letter or underscore.
    pub fn parse(s: &str) -> GatewayResult<Self> {
        let segments: Vec<&str> = s.split('.').collect();
        if segments.len() < 2 || !segments.iter().all(|seg| Self::valid_segment(seg)) {
            return Err(GatewayError::InvalidArguments(format!(
                "invalid tool name format: '{}'",
                s
            )));
        }
        Ok(Self(s.to_string()))
    }

    /// Join a namespace path and a method name into a canonical name.
    /// Assumes segments were validated when the adapter was walked.
    pub(crate) fn from_path(path: &[String], method: &str) -> Self {
        let mut name = path.join(".");
        name.push('.');
        name.push_str(method);
        Self(name)
    }

    fn valid_segment(seg: &str) -> bool {
        let mut chars = seg.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return false,
        }
        chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First segment: the originating library family.
    pub fn library(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }

    /// Last segment: the method name used for risk classification.
    pub fn method(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Risk classification of a tool, derived from verb stems in the method
/// segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskClass {
    Safe,
    Mutating,
    Destructive,
    #[default]
    Unknown,
}

const DESTRUCTIVE_STEMS: &[&str] = &["delete", "remove", "destroy", "drop", "purge"];
const MUTATING_STEMS: &[&str] = &["create", "update", "patch", "write", "set", "put", "post"];
const SAFE_STEMS: &[&str] = &[
    "get", "list", "read", "describe", "fetch", "find", "search", "head", "stat", "watch",
];

impl RiskClass {
    /// Classify by the method segment, case-insensitively. Destructive
    /// stems win over mutating ones.
    pub fn classify(method: &str) -> Self {
        let lower = method.to_ascii_lowercase();
        if DESTRUCTIVE_STEMS.iter().any(|stem| lower.contains(stem)) {
            return RiskClass::Destructive;
        }
        if MUTATING_STEMS.iter().any(|stem| lower.contains(stem)) {
            return RiskClass::Mutating;
        }
        if SAFE_STEMS.iter().any(|stem| lower.starts_with(stem)) {
            return RiskClass::Safe;
        }
        RiskClass::Unknown
    }

    /// Mutating and destructive tools require the dangerous-operations
    /// switch (or dry-run) to execute.
    pub fn is_dangerous(self) -> bool {
        matches!(self, RiskClass::Mutating | RiskClass::Destructive)
    }
}

/// Inferred parameter type tag, JSON-Schema compatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    /// No type information; accepts any JSON value.
    #[default]
    Any,
}

impl ParamType {
    /// JSON-Schema `type` keyword, or `None` for untyped parameters.
    pub fn json_type(self) -> Option<&'static str> {
        match self {
            ParamType::String => Some("string"),
            ParamType::Integer => Some("integer"),
            ParamType::Number => Some("number"),
            ParamType::Boolean => Some("boolean"),
            ParamType::Array => Some("array"),
            ParamType::Object => Some("object"),
            ParamType::Any => None,
        }
    }

    pub fn label(self) -> &'static str {
        self.json_type().unwrap_or("any")
    }
}

/// One declared parameter of a callable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub ty: ParamType,
    pub required: bool,
    pub default: Option<Value>,
    pub doc: Option<String>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
            default: None,
            doc: None,
        }
    }

    /// Untyped parameters degrade to optional `any`.
    pub fn untyped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ParamType::Any,
            required: false,
            default: None,
            doc: None,
        }
    }

    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// A declared default also makes the parameter optional.
    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self.required = false;
        self
    }

    #[must_use]
    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }
}

/// Immutable descriptor for one discovered tool, owned by the catalog.
#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: ToolName,
    pub params: Vec<ParamSpec>,
    pub summary: Option<String>,
    pub doc: Option<String>,
    pub risk: RiskClass,
    pub is_async: bool,
    pub accepts_extra_args: bool,
    pub page_shape: Option<PageShape>,
    binding: Arc<dyn SdkCallable>,
}

impl ToolDescriptor {
    pub fn from_callable(name: ToolName, callable: Arc<dyn SdkCallable>) -> Self {
        let params = callable.params();
        let doc = callable.doc();
        let summary = doc.as_deref().and_then(summarize);
        let risk = RiskClass::classify(name.method());
        let page_shape = PageShape::detect(&params);
        Self {
            name,
            params,
            summary,
            doc,
            risk,
            is_async: callable.is_async(),
            accepts_extra_args: callable.accepts_extra_args(),
            page_shape,
            binding: callable,
        }
    }

    pub fn binding(&self) -> &Arc<dyn SdkCallable> {
        &self.binding
    }

    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("risk", &self.risk)
            .field("is_async", &self.is_async)
            .field("page_shape", &self.page_shape)
            .finish_non_exhaustive()
    }
}

/// First non-empty line of a doc block, clipped for listings.
fn summarize(doc: &str) -> Option<String> {
    let line = doc.lines().map(str::trim).find(|l| !l.is_empty())?;
    let mut summary: String = line.chars().take(200).collect();
    if line.chars().count() > 200 {
        summary.push('…');
    }
    Some(summary)
}

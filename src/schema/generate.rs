//! Structural schema derivation from tool descriptors.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::catalog::{RiskClass, ToolDescriptor, ToolName};

const MAX_DOC_LEN: usize = 1000;

/// JSON-Schema view of one tool, the shape returned by tool listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: ToolName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    pub risk: RiskClass,
    #[serde(rename = "async")]
    pub is_async: bool,
    pub paginated: bool,
}

/// Derive the structural schema for a descriptor. Parameter types and the
/// required list come straight from the descriptor; documentation is
/// cleaned of markup and truncated.
pub fn schema_for(descriptor: &ToolDescriptor) -> ToolSchema {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for param in &descriptor.params {
        let mut prop = Map::new();
        if let Some(ty) = param.ty.json_type() {
            prop.insert("type".to_string(), Value::String(ty.to_string()));
        }
        if let Some(doc) = &param.doc {
            prop.insert("description".to_string(), Value::String(clean_doc(doc)));
        }
        if let Some(default) = &param.default {
            prop.insert("default".to_string(), default.clone());
        }
        if param.required {
            required.push(Value::String(param.name.clone()));
        }
        properties.insert(param.name.clone(), Value::Object(prop));
    }

    let description = descriptor
        .doc
        .as_deref()
        .map(clean_doc)
        .filter(|d| !d.is_empty())
        .or_else(|| descriptor.summary.clone());

    ToolSchema {
        name: descriptor.name.clone(),
        description,
        input_schema: json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }),
        risk: descriptor.risk,
        is_async: descriptor.is_async,
        paginated: descriptor.page_shape.is_some(),
    }
}

/// Strip formatting markup and control characters from documentation text,
/// collapse runs of whitespace, and clip to a bounded length.
pub fn clean_doc(raw: &str) -> String {
    let mut cleaned = String::with_capacity(raw.len().min(MAX_DOC_LEN));
    let mut last_was_space = true;
    let mut len = 0;

    for c in raw.chars() {
        let c = match c {
            '`' | '*' => continue,
            c if c.is_control() || c.is_whitespace() => ' ',
            c => c,
        };
        if c == ' ' {
            if last_was_space {
                continue;
            }
            last_was_space = true;
        } else {
            last_was_space = false;
        }
        cleaned.push(c);
        len += 1;
        if len >= MAX_DOC_LEN {
            break;
        }
    }

    cleaned.trim_end().to_string()
}

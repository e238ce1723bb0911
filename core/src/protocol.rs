//! Payloads exchanged with the tool-invocation protocol layer.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::config::ToolDefinition;
use crate::params::ParamType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
}

/// Result of one tool call as handed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<ContentBlock>,
    #[serde(rename = "isError", default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl CallToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
            is_error: None,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
            is_error: Some(true),
        }
    }

    pub fn is_error(&self) -> bool {
        self.is_error.unwrap_or(false)
    }

    /// Concatenated text of every content block.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// JSON-Schema subset used to describe tool parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JsonSchema {
    String {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Number {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Boolean {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Object {
        properties: BTreeMap<String, JsonSchema>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        required: Vec<String>,
    },
}

/// What the protocol layer advertises for one tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: JsonSchema,
}

impl ToolSpec {
    pub fn from_definition(tool: &ToolDefinition) -> Self {
        let mut properties = BTreeMap::new();
        let mut required = Vec::new();
        for (name, spec) in &tool.params {
            let description = Some(spec.description.clone()).filter(|d| !d.is_empty());
            let schema = match spec.param_type().unwrap_or(ParamType::String) {
                ParamType::String => JsonSchema::String { description },
                ParamType::Number => JsonSchema::Number { description },
                ParamType::Boolean => JsonSchema::Boolean { description },
            };
            properties.insert(name.clone(), schema);
            if spec.required {
                required.push(name.clone());
            }
        }
        Self {
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: JsonSchema::Object {
                properties,
                required,
            },
        }
    }
}

//! Operation descriptors exposed to the calling agent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// JSON type accepted for an argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    String,
    Boolean,
    Integer,
}

impl ArgKind {
    #[must_use]
    pub const fn json_type(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
        }
    }
}

/// One declared argument of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgumentSpec {
    pub name: &'static str,
    pub kind: ArgKind,
    pub required: bool,
    pub description: &'static str,
}

impl ArgumentSpec {
    #[must_use]
    pub const fn required(name: &'static str, kind: ArgKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            description,
        }
    }

    #[must_use]
    pub const fn optional(name: &'static str, kind: ArgKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            description,
        }
    }
}

/// Build a JSON-Schema object from an argument table.
#[must_use]
pub fn schema_for(args: &[ArgumentSpec]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for arg in args {
        properties.insert(
            arg.name.to_string(),
            json!({
                "type": arg.kind.json_type(),
                "description": arg.description,
            }),
        );
        if arg.required {
            required.push(Value::String(arg.name.to_string()));
        }
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

/// Definition of an operation the agent may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the operation's arguments.
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    pub fn from_args(
        name: impl Into<String>,
        description: impl Into<String>,
        args: &[ArgumentSpec],
    ) -> Self {
        Self::new(name, description, schema_for(args))
    }
}

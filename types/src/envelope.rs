//! The uniform result envelope returned by every operation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ErrorKind;

/// `{success: true, ..payload}` or `{success: false, error, error_kind}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ToolResult {
    #[must_use]
    pub fn success(fields: Map<String, Value>) -> Self {
        Self {
            success: true,
            fields,
            error: None,
            error_kind: None,
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            fields: Map::new(),
            error: Some(message.into()),
            error_kind: Some(kind),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({
                "success": false,
                "error": "Failed to encode result",
                "error_kind": ErrorKind::IoFailure,
            })
        })
    }
}

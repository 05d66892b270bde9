//! Caller-facing result record: `success`, a stable failure `kind`, a human
//! `message` and the operation payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GameResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub success: bool,
    pub op: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Value::is_null", default)]
    pub data: Value,
}

impl Reply {
    pub fn ok(op: &str, data: Value) -> Self {
        Self { success: true, op: op.to_string(), kind: None, message: None, data }
    }

    pub fn failure(op: &str, kind: &str, message: String) -> Self {
        Self {
            success: false,
            op: op.to_string(),
            kind: Some(kind.to_string()),
            message: Some(message),
            data: Value::Null,
        }
    }

    pub fn from_result<T: Serialize>(op: &str, result: GameResult<T>) -> Self {
        match result {
            Ok(payload) => match serde_json::to_value(payload) {
                Ok(data) => Self::ok(op, data),
                Err(err) => Self::failure(op, "encode_error", err.to_string()),
            },
            Err(err) => Self::failure(op, err.kind(), err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GameError;

    #[test]
    fn test_success_shape() {
        let reply = Reply::from_result("tap", Ok(serde_json::json!({"gain": 1})));
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["data"]["gain"], 1);
        assert!(value.get("kind").is_none());
    }

    #[test]
    fn test_failure_shape() {
        let reply = Reply::from_result::<()>("tap", Err(GameError::InsufficientEnergy { needed: 1, available: 0 }));
        assert!(!reply.success);
        assert_eq!(reply.kind.as_deref(), Some("insufficient_energy"));
        assert_eq!(reply.message.as_deref(), Some("not enough energy: need 1, have 0"));
        let value = serde_json::to_value(&reply).unwrap();
        assert!(value.get("data").is_none());
    }
}

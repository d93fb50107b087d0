/// Shared types used across the codebase

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Access level granted to a consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumerType {
    #[serde(rename = "RW")]
    ReadWrite,
    #[serde(rename = "RO")]
    ReadOnly,
}

impl ConsumerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumerType::ReadWrite => "RW",
            ConsumerType::ReadOnly => "RO",
        }
    }
}

/// The authenticated principal behind a request (API key holder)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consumer {
    pub id: Uuid,
    pub key: String,
    pub name: String,
    pub consumer_type: ConsumerType,
}

impl Consumer {
    pub fn new(key: impl Into<String>, name: impl Into<String>, consumer_type: ConsumerType) -> Self {
        Self {
            id: Uuid::new_v4(),
            key: key.into(),
            name: name.into(),
            consumer_type,
        }
    }

    /// Field lookup used by consumer-bound endpoint attributes
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::String(self.id.to_string())),
            "key" => Some(Value::String(self.key.clone())),
            "name" => Some(Value::String(self.name.clone())),
            "type" | "consumer_type" => Some(Value::String(self.consumer_type.as_str().to_string())),
            _ => None,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.consumer_type == ConsumerType::ReadOnly
    }
}

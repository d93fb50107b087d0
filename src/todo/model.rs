use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::filter::{Expandable, FieldPolicy, ResponseFilter, TypeRule};
use crate::resource::{ApiObject, Resource, ResourceError};
use crate::types::Consumer;

pub const PRIORITIES: [&str; 3] = ["low", "medium", "high"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    pub key: String,
    pub name: String,
}

impl From<&Consumer> for Owner {
    fn from(consumer: &Consumer) -> Self {
        Self {
            key: consumer.key.clone(),
            name: consumer.name.clone(),
        }
    }
}

impl ApiObject for Owner {
    fn type_name(&self) -> &'static str {
        "Owner"
    }

    fn field_names(&self) -> Vec<&'static str> {
        vec!["key", "name"]
    }

    fn field(&self, name: &str) -> Option<Resource> {
        match name {
            "key" => Some(self.key.as_str().into()),
            "name" => Some(self.name.as_str().into()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub task: String,
    pub priority: String,
    pub completed: bool,
    pub owner: Option<Owner>,
    pub created_at: DateTime<Utc>,
}

impl Todo {
    pub fn new(task: impl Into<String>, priority: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task: task.into(),
            priority: priority.into(),
            completed: false,
            owner: None,
            created_at: Utc::now(),
        }
    }
}

pub fn validate_priority(value: &str) -> Result<(), String> {
    if PRIORITIES.contains(&value) {
        Ok(())
    } else {
        Err(format!("priority must be one of: {}", PRIORITIES.join(", ")))
    }
}

impl ApiObject for Todo {
    fn type_name(&self) -> &'static str {
        "Todo"
    }

    fn field_names(&self) -> Vec<&'static str> {
        vec!["id", "task", "priority", "completed", "owner", "created_at"]
    }

    fn field(&self, name: &str) -> Option<Resource> {
        match name {
            "id" => Some(self.id.as_str().into()),
            "task" => Some(self.task.as_str().into()),
            "priority" => Some(self.priority.as_str().into()),
            "completed" => Some(self.completed.into()),
            "owner" => Some(self.owner.clone().map(Resource::object).unwrap_or_else(Resource::null)),
            "created_at" => Some(self.created_at.to_rfc3339().into()),
            _ => None,
        }
    }

    fn set_field(&mut self, name: &str, value: Value) -> Result<(), ResourceError> {
        let invalid = |message: &str| ResourceError::InvalidValue {
            field: name.to_string(),
            message: message.to_string(),
        };
        match name {
            "task" => {
                let task = value.as_str().ok_or_else(|| invalid("expected a string"))?;
                self.task = task.to_string();
            }
            "priority" => {
                let priority = value.as_str().ok_or_else(|| invalid("expected a string"))?;
                validate_priority(priority).map_err(|m| invalid(&m))?;
                self.priority = priority.to_string();
            }
            "completed" => {
                self.completed = value.as_bool().ok_or_else(|| invalid("expected a boolean"))?;
            }
            _ => {
                return Err(ResourceError::ReadOnlyField {
                    type_name: self.type_name(),
                    field: name.to_string(),
                })
            }
        }
        Ok(())
    }

    fn id(&self) -> Option<String> {
        Some(self.id.clone())
    }
}

/// Framework-wide default: the task and its priority, plus completion when set.
pub fn default_filter() -> ResponseFilter {
    ResponseFilter::new()
        .rule(
            "Todo",
            TypeRule::fields([
                ("task", FieldPolicy::Always),
                ("priority", FieldPolicy::Always),
                ("completed", FieldPolicy::IfTruthy),
            ]),
        )
        .rule("Owner", TypeRule::fields([("name", FieldPolicy::Always)]))
}

/// Detail views add the id, a creation timestamp and an expandable owner.
pub fn detail_filter() -> ResponseFilter {
    ResponseFilter::new().rule(
        "Todo",
        TypeRule::fields([
            ("id", FieldPolicy::Always),
            ("task", FieldPolicy::Always),
            ("priority", FieldPolicy::Always),
            ("completed", FieldPolicy::Always),
            ("created_at", FieldPolicy::Always),
            ("owner", Expandable::new().display_key("key").into()),
        ]),
    )
}

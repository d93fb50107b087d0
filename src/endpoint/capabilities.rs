//! Reusable endpoint behaviours, composed onto definitions by trait impls.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::Method;
use serde_json::Value;

use crate::endpoint::bound::BoundEndpoint;
use crate::endpoint::error::EndpointError;
use crate::resource::{Resource, ResourceStore};
use crate::tasks::Task;

pub const READ_ONLY_MESSAGE: &str = "Action not allowed for read-only consumer";

/// Consumer-based authorization.
pub trait HasConsumerAuth {
    /// Endpoints that never modify state admit read-only consumers.
    fn is_read_only(&self) -> bool {
        false
    }

    fn consumer_authorized(&self, bound: &BoundEndpoint) -> bool {
        bound.consumer().is_some()
    }

    fn consumer_permitted(&self, bound: &mut BoundEndpoint) -> bool {
        let read_only_consumer = match bound.consumer() {
            None => return false,
            Some(consumer) => consumer.is_read_only(),
        };
        if read_only_consumer && bound.request().method() != Method::GET && !self.is_read_only() {
            bound.set_validation_message(READ_ONLY_MESSAGE);
            return false;
        }
        true
    }
}

/// The resource id comes from the URL.
pub trait HasUrlBoundId {
    fn id_field(&self) -> &'static str {
        "id"
    }

    fn resource_id(&self, bound: &BoundEndpoint) -> Result<String, EndpointError> {
        match bound.value(self.id_field()) {
            Some(Value::String(id)) => Ok(id.clone()),
            Some(other) => Ok(other.to_string()),
            None => Err(EndpointError::missing([self.id_field()])),
        }
    }
}

/// The endpoint operates on a stored model.
#[async_trait]
pub trait HasResource: Send + Sync {
    fn model_name(&self) -> &'static str;

    fn store(&self) -> Arc<dyn ResourceStore>;

    async fn load_resource(&self, id: &str) -> Result<Resource, EndpointError> {
        self.store()
            .fetch(id)
            .await?
            .ok_or_else(|| EndpointError::not_found(format!("{} {} not found", self.model_name(), id)))
    }

    async fn save_resource(&self, bound: &BoundEndpoint) -> Result<(), EndpointError> {
        if let Some(resource) = bound.cached_resource() {
            tracing::debug!("Saving {} for {}", self.model_name(), bound.endpoint_name());
            self.store().save(resource).await?;
        }
        Ok(())
    }
}

/// The endpoint updates its resource from request fields.
///
/// Pair with `SchemaBuilder::mutation()`, which installs the input check
/// and field-copy tasks, and call `persist` from `finalize`.
#[async_trait]
pub trait HasMutation: HasResource + HasUrlBoundId {
    async fn persist(&self, bound: &mut BoundEndpoint) -> Result<(), EndpointError> {
        self.save_resource(bound).await
    }
}

/// Reject body fields the endpoint does not declare.
pub fn validate_input_task() -> Task {
    Task::immediate("validate_input", |bound| {
        Box::pin(async move {
            let known = bound.schema().field_names();
            let mut unexpected: Vec<String> = bound
                .request()
                .body_field_names()
                .filter(|name| !known.contains(name))
                .map(str::to_string)
                .collect();
            if unexpected.is_empty() {
                return Ok(());
            }
            unexpected.sort();
            Err(EndpointError::UnexpectedFields(unexpected))
        })
    })
    .priority(-101)
}

/// Copy present resource fields onto the resource.
pub fn mutate_task() -> Task {
    Task::immediate("mutate", |bound| {
        Box::pin(async move {
            let schema = bound.schema().clone();
            let updates: Vec<(String, Value)> = schema
                .attributes()
                .iter()
                .filter(|a| a.resource_field)
                .filter_map(|a| match bound.value(&a.name) {
                    None | Some(Value::Null) => None,
                    Some(value) => Some((a.name.clone(), value.clone())),
                })
                .collect();
            if updates.is_empty() {
                return Ok(());
            }

            let object = bound.resource().await?.object_mut()?;
            for (field, value) in updates {
                object.set_field(&field, value)?;
            }
            Ok(())
        })
    })
    .priority(-100)
    .depends_on("validate_input")
}

pub fn mutation_tasks() -> Vec<Task> {
    vec![validate_input_task(), mutate_task()]
}

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::endpoint::attributes::{AggregateValue, Resolution};
use crate::endpoint::definition::EndpointDefinition;
use crate::endpoint::error::EndpointError;
use crate::endpoint::request::EndpointRequest;
use crate::endpoint::schema::EndpointSchema;
use crate::resource::Resource;
use crate::types::Consumer;

/// One endpoint definition bound to one request.
///
/// Owns the resolved attribute values, the aggregate memo and the computed
/// resource for the lifetime of the request.
pub struct BoundEndpoint {
    definition: Arc<dyn EndpointDefinition>,
    schema: Arc<EndpointSchema>,
    request: Arc<EndpointRequest>,
    values: HashMap<String, Value>,
    supplied: HashSet<String>,
    aggregates: HashMap<String, Option<AggregateValue>>,
    resolving: Vec<String>,
    resource: Option<Resource>,
    validation_message: Option<String>,
}

impl BoundEndpoint {
    pub(crate) fn new(definition: Arc<dyn EndpointDefinition>, request: Arc<EndpointRequest>) -> Self {
        let schema = definition.schema();
        Self {
            definition,
            schema,
            request,
            values: HashMap::new(),
            supplied: HashSet::new(),
            aggregates: HashMap::new(),
            resolving: Vec::new(),
            resource: None,
            validation_message: None,
        }
    }

    pub fn definition(&self) -> &Arc<dyn EndpointDefinition> {
        &self.definition
    }

    pub fn schema(&self) -> &Arc<EndpointSchema> {
        &self.schema
    }

    pub fn endpoint_name(&self) -> &str {
        self.schema.endpoint()
    }

    pub fn request(&self) -> &EndpointRequest {
        &self.request
    }

    pub fn consumer(&self) -> Option<&Consumer> {
        self.request.consumer()
    }

    /// Resolved value of an attribute, or its default.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.value(name).and_then(Value::as_str)
    }

    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, EndpointError> {
        match self.value(name) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| EndpointError::InvalidFieldValues {
                    fields: vec![name.to_string()],
                    detail: Some(e.to_string()),
                }),
        }
    }

    pub fn require<T: DeserializeOwned>(&self, name: &str) -> Result<T, EndpointError> {
        self.get(name)?.ok_or_else(|| EndpointError::missing([name]))
    }

    pub fn is_present(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Whether the request itself carried the attribute; defaults don't count.
    pub fn is_supplied(&self, name: &str) -> bool {
        self.supplied.contains(name)
    }

    pub fn set_value(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// Resolved values keyed by attribute name.
    pub fn values_json(&self) -> Value {
        let map: Map<String, Value> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Value::Object(map)
    }

    /// Read an aggregate, computing it (and its dependencies) on first use.
    ///
    /// Optional aggregates that fail resolve to their default, or `None`.
    /// A required aggregate's failure is returned.
    pub fn aggregate<T: Send + Sync + 'static>(&mut self, name: &str) -> Result<Option<Arc<T>>, EndpointError> {
        let value = self.aggregate_value(name)?;
        Ok(value.and_then(|v| v.downcast::<T>().ok()))
    }

    fn aggregate_value(&mut self, name: &str) -> Result<Option<AggregateValue>, EndpointError> {
        if let Some(cached) = self.aggregates.get(name) {
            tracing::debug!("Aggregate cache hit: {}.{}", self.schema.endpoint(), name);
            return Ok(cached.clone());
        }

        let schema = self.schema.clone();
        let aggregate = schema
            .aggregate(name)
            .ok_or_else(|| EndpointError::internal(format!("unknown aggregate '{}'", name)))?;

        if self.resolving.iter().any(|n| n == name) {
            return Err(EndpointError::internal(format!("aggregate '{}' depends on itself", name)));
        }
        self.resolving.push(name.to_string());

        let mut result = Ok(());
        for dep in &aggregate.depends_on {
            if let Err(err) = self.aggregate_value(dep) {
                result = Err(err);
                break;
            }
        }
        let computed = result.and_then(|_| (aggregate.compute)(self));
        self.resolving.pop();

        let value = match computed {
            Ok(value) => Some(value),
            Err(err) if aggregate.required => return Err(err),
            Err(err) => {
                tracing::debug!("Optional aggregate {} failed, using default: {}", name, err);
                aggregate.default.clone()
            }
        };

        self.aggregates.insert(name.to_string(), value.clone());
        Ok(value)
    }

    /// The resource, if it has been computed.
    pub fn cached_resource(&self) -> Option<&Resource> {
        self.resource.as_ref()
    }

    pub fn set_resource(&mut self, resource: Resource) {
        self.resource = Some(resource);
    }

    /// Compute the resource through the definition unless already cached.
    pub async fn ensure_resource(&mut self) -> Result<(), EndpointError> {
        if self.resource.is_none() {
            let definition = self.definition.clone();
            let resource = definition.resource(self).await?;
            self.resource = Some(resource);
        }
        Ok(())
    }

    /// Mutable access to the computed resource.
    pub async fn resource(&mut self) -> Result<&mut Resource, EndpointError> {
        self.ensure_resource().await?;
        self.resource
            .as_mut()
            .ok_or_else(|| EndpointError::internal("resource was not computed"))
    }

    pub fn set_validation_message(&mut self, message: impl Into<String>) {
        self.validation_message = Some(message.into());
    }

    pub fn take_validation_message(&mut self) -> Option<String> {
        self.validation_message.take()
    }

    /// Resolve every declared attribute from the request.
    pub(crate) fn bind_attributes(&mut self) -> Result<(), EndpointError> {
        let schema = self.schema.clone();
        let mut missing = Vec::new();
        let mut invalid = Vec::new();
        let mut invalid_detail = None;
        let mut consumer_missing = false;

        for attribute in schema.attributes() {
            let resolution = attribute.resolve(&self.request);
            tracing::debug!(
                "Resolved {}.{}: {:?}",
                schema.endpoint(),
                attribute.name,
                resolution
            );
            match resolution {
                Resolution::Value(value) => {
                    self.supplied.insert(attribute.name.clone());
                    self.values.insert(attribute.name.clone(), value);
                }
                Resolution::Absent if attribute.required => {
                    if attribute.is_consumer_bound() {
                        consumer_missing = true;
                    } else {
                        missing.push(attribute.api_name.clone());
                    }
                }
                Resolution::Invalid(message) if attribute.required => {
                    invalid.push(attribute.api_name.clone());
                    invalid_detail.get_or_insert(message);
                }
                Resolution::Absent | Resolution::Invalid(_) => {
                    if let Some(default) = &attribute.default {
                        self.values.insert(attribute.name.clone(), default.clone());
                    }
                }
            }
        }

        if !missing.is_empty() {
            return Err(EndpointError::MissingFields {
                fields: missing,
                detail: None,
            });
        }
        if consumer_missing {
            return Err(EndpointError::forbidden("Consumer required"));
        }
        if !invalid.is_empty() {
            return Err(EndpointError::InvalidFieldValues {
                fields: invalid,
                detail: invalid_detail,
            });
        }

        for group in schema.groups() {
            group.check(|field| self.supplied.contains(field))?;
        }
        Ok(())
    }

    /// Resolve required aggregates; a failure rejects the candidate.
    pub(crate) fn bind_required_aggregates(&mut self) -> Result<(), EndpointError> {
        let schema = self.schema.clone();
        for aggregate in schema.aggregates().iter().filter(|a| a.required) {
            self.aggregate_value(&aggregate.name).map_err(|err| match err {
                EndpointError::Validation(_)
                | EndpointError::MissingFields { .. }
                | EndpointError::InvalidFieldValues { .. } => err,
                other => EndpointError::validation(other.to_string()),
            })?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for BoundEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundEndpoint")
            .field("endpoint", &self.schema.endpoint())
            .field("values", &self.values)
            .field("resource", &self.resource)
            .finish()
    }
}

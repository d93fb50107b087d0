use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use serde_json::{json, Value};

use crate::endpoint::bound::BoundEndpoint;
use crate::endpoint::error::EndpointError;
use crate::endpoint::schema::EndpointSchema;
use crate::filter::ResponseFilter;
use crate::resource::Resource;

/// A declarative request handler.
///
/// Implementors declare their attributes and tasks once through
/// [`EndpointSchema`] and override the hooks they need. The binder calls
/// `is_authorized`, `is_permitted` and `is_valid` in that order; the
/// pipeline then computes `resource`, runs tasks, and renders `response`.
#[async_trait]
pub trait EndpointDefinition: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn schema(&self) -> Arc<EndpointSchema>;

    fn description(&self) -> Option<&'static str> {
        None
    }

    async fn is_authorized(&self, bound: &mut BoundEndpoint) -> Result<bool, EndpointError>;

    /// A `false` result may carry a reason via `set_validation_message`.
    async fn is_permitted(&self, _bound: &mut BoundEndpoint) -> Result<bool, EndpointError> {
        Ok(true)
    }

    async fn is_valid(&self, _bound: &mut BoundEndpoint) -> Result<bool, EndpointError> {
        Ok(true)
    }

    /// `None` disables rate limiting.
    fn rate_limit_key(&self, _bound: &BoundEndpoint) -> Option<String> {
        None
    }

    fn rate_limit_period(&self) -> Duration {
        Duration::from_secs(1)
    }

    async fn resource(&self, _bound: &mut BoundEndpoint) -> Result<Resource, EndpointError> {
        Err(EndpointError::NotImplemented {
            endpoint: self.name(),
            member: "resource",
        })
    }

    /// What gets filtered and returned; the resource by default.
    ///
    /// Definitions that implement neither this nor `resource` fail with
    /// `NotImplemented`.
    async fn response(&self, bound: &mut BoundEndpoint) -> Result<Resource, EndpointError> {
        Ok(bound.resource().await?.clone())
    }

    fn http_status(&self, _bound: &BoundEndpoint) -> StatusCode {
        StatusCode::OK
    }

    /// Class-level response filter.
    fn response_filter(&self) -> Option<Arc<ResponseFilter>> {
        None
    }

    /// Runs after immediate tasks and before deferred tasks are dispatched.
    async fn finalize(&self, _bound: &mut BoundEndpoint) -> Result<(), EndpointError> {
        Ok(())
    }

    fn documentation(&self) -> Value {
        let mut doc = self.schema().documentation();
        if let Value::Object(map) = &mut doc {
            map.insert("description".into(), json!(self.description()));
        }
        doc
    }
}

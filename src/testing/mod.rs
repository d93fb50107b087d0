//! Helpers shared by unit and integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{Method, StatusCode};

use crate::auth::jwt::{generate_jwt, Claims};
use crate::config::AppConfig;
use crate::endpoint::{BoundEndpoint, EndpointDefinition, EndpointError, EndpointRequest, EndpointSchema};
use crate::filter::ResponseFilter;
use crate::resource::Resource;
use crate::types::{Consumer, ConsumerType};

pub const TEST_JWT_SECRET: &str = "test-secret";

/// Development preset with deferred tasks run inside the request.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.tasks.force_synchronous = true;
    config.security.jwt_secret = TEST_JWT_SECRET.to_string();
    config
}

pub fn consumer(key: &str) -> Consumer {
    Consumer::new(key, format!("{} user", key), ConsumerType::ReadWrite)
}

pub fn read_only_consumer(key: &str) -> Consumer {
    Consumer::new(key, format!("{} user", key), ConsumerType::ReadOnly)
}

/// `Authorization` header value for a consumer, signed with the test secret.
pub fn bearer(consumer: &Consumer) -> anyhow::Result<String> {
    let token = generate_jwt(&Claims::for_consumer(consumer, 1), TEST_JWT_SECRET)?;
    Ok(format!("Bearer {}", token))
}

pub fn request(method: Method, path: &str) -> EndpointRequest {
    EndpointRequest::new(method, path)
}

/// An endpoint whose gates and outputs are set per test.
///
/// Gate calls are recorded by name so tests can assert ordering.
pub struct TestEndpoint {
    name: &'static str,
    schema: Arc<EndpointSchema>,
    authorized: bool,
    forbidden: Option<String>,
    invalid: Option<String>,
    rate_limit: Option<(String, Duration)>,
    resource: Option<Resource>,
    filter: Option<Arc<ResponseFilter>>,
    status: StatusCode,
    finalized: Arc<AtomicUsize>,
    calls: Arc<Mutex<Vec<&'static str>>>,
}

impl TestEndpoint {
    pub fn new(name: &'static str, schema: EndpointSchema) -> Self {
        Self {
            name,
            schema: Arc::new(schema),
            authorized: true,
            forbidden: None,
            invalid: None,
            rate_limit: None,
            resource: None,
            filter: None,
            status: StatusCode::OK,
            finalized: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A schema-less endpoint.
    pub fn named(name: &'static str) -> Self {
        Self::new(name, EndpointSchema::builder(name).build().unwrap_or_else(|e| panic!("{}", e)))
    }

    pub fn unauthorized(mut self) -> Self {
        self.authorized = false;
        self
    }

    pub fn forbidden(mut self, message: impl Into<String>) -> Self {
        self.forbidden = Some(message.into());
        self
    }

    pub fn invalid(mut self, message: impl Into<String>) -> Self {
        self.invalid = Some(message.into());
        self
    }

    pub fn rate_limited(mut self, key: impl Into<String>, period: Duration) -> Self {
        self.rate_limit = Some((key.into(), period));
        self
    }

    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn with_filter(mut self, filter: ResponseFilter) -> Self {
        self.filter = Some(filter.shared());
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// How many times `finalize` has run.
    pub fn finalized(&self) -> Arc<AtomicUsize> {
        self.finalized.clone()
    }

    /// Gate names in call order.
    pub fn calls(&self) -> Arc<Mutex<Vec<&'static str>>> {
        self.calls.clone()
    }

    pub fn shared(self) -> Arc<dyn EndpointDefinition> {
        Arc::new(self)
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }
}

#[async_trait]
impl EndpointDefinition for TestEndpoint {
    fn name(&self) -> &'static str {
        self.name
    }

    fn schema(&self) -> Arc<EndpointSchema> {
        self.schema.clone()
    }

    async fn is_authorized(&self, _bound: &mut BoundEndpoint) -> Result<bool, EndpointError> {
        self.record("authorize");
        Ok(self.authorized)
    }

    async fn is_permitted(&self, bound: &mut BoundEndpoint) -> Result<bool, EndpointError> {
        self.record("permit");
        match &self.forbidden {
            Some(message) => {
                bound.set_validation_message(message.clone());
                Ok(false)
            }
            None => Ok(true),
        }
    }

    async fn is_valid(&self, bound: &mut BoundEndpoint) -> Result<bool, EndpointError> {
        self.record("valid");
        match &self.invalid {
            Some(message) => {
                bound.set_validation_message(message.clone());
                Ok(false)
            }
            None => Ok(true),
        }
    }

    fn rate_limit_key(&self, _bound: &BoundEndpoint) -> Option<String> {
        self.rate_limit.as_ref().map(|(key, _)| key.clone())
    }

    fn rate_limit_period(&self) -> Duration {
        self.rate_limit
            .as_ref()
            .map(|(_, period)| *period)
            .unwrap_or(Duration::from_secs(1))
    }

    async fn resource(&self, _bound: &mut BoundEndpoint) -> Result<Resource, EndpointError> {
        match &self.resource {
            Some(resource) => Ok(resource.clone()),
            None => Err(EndpointError::NotImplemented {
                endpoint: self.name,
                member: "resource",
            }),
        }
    }

    fn http_status(&self, _bound: &BoundEndpoint) -> StatusCode {
        self.status
    }

    fn response_filter(&self) -> Option<Arc<ResponseFilter>> {
        self.filter.clone()
    }

    async fn finalize(&self, _bound: &mut BoundEndpoint) -> Result<(), EndpointError> {
        self.finalized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

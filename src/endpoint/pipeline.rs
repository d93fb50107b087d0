use std::time::Instant;

use axum::http::StatusCode;
use serde_json::Value;

use crate::endpoint::bound::BoundEndpoint;
use crate::endpoint::error::EndpointError;
use crate::filter::FilterEngine;
use crate::tasks::{ExecutionReport, TaskExecutor};

/// A filtered response body with its status.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointResponse {
    pub status: StatusCode,
    pub body: Value,
}

/// Drives a bound endpoint from resource computation to filtered output.
#[derive(Clone)]
pub struct EndpointPipeline {
    executor: TaskExecutor,
    filters: FilterEngine,
}

impl EndpointPipeline {
    pub fn new(executor: TaskExecutor, filters: FilterEngine) -> Self {
        Self { executor, filters }
    }

    pub fn executor(&self) -> &TaskExecutor {
        &self.executor
    }

    pub fn filters(&self) -> &FilterEngine {
        &self.filters
    }

    pub async fn process(&self, bound: BoundEndpoint) -> Result<EndpointResponse, EndpointError> {
        self.process_with_report(bound).await.map(|(response, _)| response)
    }

    pub async fn process_with_report(
        &self,
        mut bound: BoundEndpoint,
    ) -> Result<(EndpointResponse, ExecutionReport), EndpointError> {
        let start_time = Instant::now();
        let definition = bound.definition().clone();

        tracing::info!("Endpoint pipeline starting: endpoint={}", definition.name());

        // Endpoints that override `response` may leave `resource` unimplemented.
        match bound.ensure_resource().await {
            Ok(()) | Err(EndpointError::NotImplemented { .. }) => {}
            Err(err) => return Err(err),
        }

        let report = self.executor.run(&mut bound).await?;
        let status = definition.http_status(&bound);
        let response = definition.response(&mut bound).await?;

        let body = self.filters.apply(
            &response,
            definition.response_filter(),
            bound.request().expand(),
        );

        tracing::info!(
            "Endpoint pipeline complete: endpoint={}, status={}, tasks={}, deferred={}, elapsed={:?}",
            definition.name(),
            status.as_u16(),
            report.executed.len(),
            report.enqueued.len() + report.inline.len(),
            start_time.elapsed()
        );

        Ok((EndpointResponse { status, body }, report))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::http::Method;
    use serde_json::json;

    use super::*;
    use crate::config::TaskConfig;
    use crate::endpoint::{EndpointBinder, EndpointDefinition, EndpointSchema, MemoryRateLimitStore};
    use crate::error::ApiError;
    use crate::resource::Resource;
    use crate::testing::{request, TestEndpoint};

    struct Status {
        schema: Arc<EndpointSchema>,
    }

    #[async_trait]
    impl EndpointDefinition for Status {
        fn name(&self) -> &'static str {
            "Status"
        }

        fn schema(&self) -> Arc<EndpointSchema> {
            self.schema.clone()
        }

        async fn is_authorized(&self, _bound: &mut BoundEndpoint) -> Result<bool, EndpointError> {
            Ok(true)
        }

        async fn response(&self, _bound: &mut BoundEndpoint) -> Result<Resource, EndpointError> {
            Ok(Resource::map([("status", Resource::from("up"))]))
        }
    }

    fn pipeline() -> EndpointPipeline {
        EndpointPipeline::new(TaskExecutor::synchronous(TaskConfig::default()), FilterEngine::new(None))
    }

    async fn bind(definition: Arc<dyn EndpointDefinition>) -> BoundEndpoint {
        EndpointBinder::new(vec![definition], Arc::new(MemoryRateLimitStore::new()))
            .bind(Arc::new(request(Method::GET, "/things")))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn returns_the_filtered_resource() {
        let endpoint = TestEndpoint::named("Thing").with_resource(Resource::map([("name", Resource::from("widget"))]));
        let response = pipeline().process(bind(endpoint.shared()).await).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, json!({"name": "widget"}));
    }

    #[tokio::test]
    async fn endpoint_without_resource_or_response_is_a_server_error() {
        let err = pipeline()
            .process(bind(TestEndpoint::named("Bare").shared()).await)
            .await
            .unwrap_err();
        assert!(matches!(err, EndpointError::NotImplemented { endpoint: "Bare", member: "resource" }));
        assert_eq!(ApiError::from(err).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn overridden_response_needs_no_resource() {
        let schema = EndpointSchema::builder("Status").build().unwrap();
        let endpoint = Arc::new(Status { schema: Arc::new(schema) });
        let response = pipeline().process(bind(endpoint).await).await.unwrap();
        assert_eq!(response.body, json!({"status": "up"}));
    }
}

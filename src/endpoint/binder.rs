use std::sync::Arc;

use crate::endpoint::bound::BoundEndpoint;
use crate::endpoint::definition::EndpointDefinition;
use crate::endpoint::error::{EndpointError, Rejection};
use crate::endpoint::rate_limit::RateLimitStore;
use crate::endpoint::request::EndpointRequest;

/// Picks which of several candidate definitions handles a request.
#[derive(Clone)]
pub struct EndpointBinder {
    candidates: Vec<Arc<dyn EndpointDefinition>>,
    rate_limiter: Arc<dyn RateLimitStore>,
}

impl EndpointBinder {
    pub fn new(candidates: Vec<Arc<dyn EndpointDefinition>>, rate_limiter: Arc<dyn RateLimitStore>) -> Self {
        Self {
            candidates,
            rate_limiter,
        }
    }

    pub fn candidates(&self) -> &[Arc<dyn EndpointDefinition>] {
        &self.candidates
    }

    /// Bind the first candidate that accepts the request.
    ///
    /// Candidates are tried in order; each rejection is kept. A rate-limit
    /// hit fails the whole request without trying later candidates.
    pub async fn bind(&self, request: Arc<EndpointRequest>) -> Result<BoundEndpoint, EndpointError> {
        let mut rejections = Vec::new();

        for definition in &self.candidates {
            match self.try_bind(definition.clone(), request.clone()).await {
                Ok(bound) => {
                    tracing::info!(
                        "Bound {} {} to {}",
                        request.method(),
                        request.path(),
                        definition.name()
                    );
                    return Ok(bound);
                }
                Err(err @ EndpointError::RateLimited { .. }) => {
                    tracing::warn!("Rate limit hit for {}: {}", definition.name(), err);
                    return Err(err);
                }
                Err(err) => {
                    tracing::debug!("Candidate {} rejected: {}", definition.name(), err);
                    rejections.push(Rejection {
                        endpoint: definition.name(),
                        error: err,
                    });
                }
            }
        }

        Err(match rejections.len() {
            0 => EndpointError::internal(format!("no endpoint registered for {} {}", request.method(), request.path())),
            1 => rejections.remove(0).error,
            _ => EndpointError::NoMatch { rejections },
        })
    }

    async fn try_bind(
        &self,
        definition: Arc<dyn EndpointDefinition>,
        request: Arc<EndpointRequest>,
    ) -> Result<BoundEndpoint, EndpointError> {
        let mut bound = BoundEndpoint::new(definition.clone(), request);
        bound.bind_attributes()?;
        bound.bind_required_aggregates()?;

        if !definition.is_authorized(&mut bound).await? {
            return Err(EndpointError::Unauthenticated {
                detail: bound.take_validation_message(),
                challenge: None,
            });
        }
        if !definition.is_permitted(&mut bound).await? {
            return Err(EndpointError::Forbidden {
                detail: bound.take_validation_message(),
            });
        }
        if !definition.is_valid(&mut bound).await? {
            let message = bound
                .take_validation_message()
                .unwrap_or_else(|| "Request is not valid".to_string());
            return Err(EndpointError::Validation(message));
        }

        if let Some(key) = definition.rate_limit_key(&bound) {
            let key = format!("ratelimit:{}", key);
            if !self
                .rate_limiter
                .check_and_set(&key, definition.rate_limit_period())
                .await
            {
                return Err(EndpointError::RateLimited { key });
            }
        }

        Ok(bound)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use axum::http::Method;
    use serde_json::json;

    use super::*;
    use crate::endpoint::attributes::{Aggregate, Attribute, FieldGroup};
    use crate::endpoint::rate_limit::MemoryRateLimitStore;
    use crate::endpoint::schema::EndpointSchema;
    use crate::testing::{consumer, request, TestEndpoint};

    fn binder(candidates: Vec<Arc<dyn EndpointDefinition>>) -> EndpointBinder {
        EndpointBinder::new(candidates, Arc::new(MemoryRateLimitStore::new()))
    }

    fn get() -> Arc<EndpointRequest> {
        Arc::new(request(Method::GET, "/things"))
    }

    #[tokio::test]
    async fn first_accepting_candidate_wins() {
        let rejected = TestEndpoint::named("First").unauthorized();
        let accepted = TestEndpoint::named("Second");
        let rejected_calls = rejected.calls();
        let accepted_calls = accepted.calls();

        let bound = binder(vec![rejected.shared(), accepted.shared()])
            .bind(get())
            .await
            .unwrap();

        assert_eq!(bound.endpoint_name(), "Second");
        assert_eq!(*rejected_calls.lock().unwrap(), vec!["authorize"]);
        assert_eq!(*accepted_calls.lock().unwrap(), vec!["authorize", "permit", "valid"]);
    }

    #[tokio::test]
    async fn single_candidate_rejection_is_returned_as_is() {
        let endpoint = TestEndpoint::named("Only").forbidden("members only");
        let err = binder(vec![endpoint.shared()]).bind(get()).await.unwrap_err();
        assert!(matches!(
            err,
            EndpointError::Forbidden { detail: Some(ref d) } if d == "members only"
        ));
    }

    #[tokio::test]
    async fn invalid_request_carries_validation_message() {
        let endpoint = TestEndpoint::named("Only").invalid("dates out of order");
        let err = binder(vec![endpoint.shared()]).bind(get()).await.unwrap_err();
        assert_eq!(err.to_string(), "Validation failed: dates out of order");
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn all_rejections_are_collected() {
        let schema = EndpointSchema::builder("NeedsName")
            .attribute(Attribute::field("name").required())
            .build()
            .unwrap();
        let err = binder(vec![
            TestEndpoint::new("NeedsName", schema).shared(),
            TestEndpoint::named("Locked").unauthorized().shared(),
        ])
        .bind(get())
        .await
        .unwrap_err();

        let EndpointError::NoMatch { rejections } = err else {
            panic!("expected NoMatch, got {:?}", err);
        };
        assert_eq!(rejections.len(), 2);
        assert_eq!(rejections[0].endpoint, "NeedsName");
        assert!(matches!(rejections[0].error, EndpointError::MissingFields { .. }));
        assert!(matches!(rejections[1].error, EndpointError::Unauthenticated { .. }));
    }

    #[tokio::test]
    async fn missing_consumer_attribute_is_forbidden() {
        let schema = EndpointSchema::builder("Private").consumer_auth().build().unwrap();
        let endpoint = binder(vec![TestEndpoint::new("Private", schema).shared()]);

        let err = endpoint.bind(get()).await.unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::FORBIDDEN);

        let with_consumer = request(Method::GET, "/things").with_consumer(consumer("alice"));
        let bound = endpoint.bind(Arc::new(with_consumer)).await.unwrap();
        assert_eq!(bound.str("consumer_key"), Some("alice"));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_stops_the_search() {
        let limited = TestEndpoint::named("Limited").rate_limited("alice", Duration::from_secs(5));
        let fallback = TestEndpoint::named("Fallback");
        let fallback_calls = fallback.calls();
        let binder = binder(vec![limited.shared(), fallback.shared()]);

        assert_eq!(binder.bind(get()).await.unwrap().endpoint_name(), "Limited");

        let err = binder.bind(get()).await.unwrap_err();
        assert!(matches!(err, EndpointError::RateLimited { ref key } if key == "ratelimit:alice"));
        assert!(fallback_calls.lock().unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(binder.bind(get()).await.unwrap().endpoint_name(), "Limited");
    }

    #[tokio::test]
    async fn required_aggregates_are_computed_once() {
        let computed = Arc::new(AtomicUsize::new(0));
        let counter = computed.clone();
        let schema = EndpointSchema::builder("Totals")
            .attribute(Attribute::field("limit").of_type(crate::endpoint::FieldType::Integer).default(10))
            .aggregate(
                Aggregate::new("page_size", move |bound| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let limit: i64 = bound.require("limit")?;
                    Ok(limit.min(50))
                })
                .required(),
            )
            .build()
            .unwrap();

        let mut bound = binder(vec![TestEndpoint::new("Totals", schema).shared()])
            .bind(Arc::new(request(Method::GET, "/things").with_query("limit", "80")))
            .await
            .unwrap();

        assert_eq!(*bound.aggregate::<i64>("page_size").unwrap().unwrap(), 50);
        assert_eq!(*bound.aggregate::<i64>("page_size").unwrap().unwrap(), 50);
        assert_eq!(computed.load(Ordering::SeqCst), 1);
        assert_eq!(bound.value("limit"), Some(&json!(80)));
    }

    #[tokio::test]
    async fn failing_required_aggregate_rejects_candidate() {
        let schema = EndpointSchema::builder("Broken")
            .aggregate(Aggregate::new("lookup", |_bound| -> Result<u8, EndpointError> {
                Err(EndpointError::internal("lookup table unavailable"))
            })
            .required())
            .build()
            .unwrap();

        let err = binder(vec![TestEndpoint::new("Broken", schema).shared()])
            .bind(get())
            .await
            .unwrap_err();
        assert!(matches!(err, EndpointError::Validation(_)));
    }

    fn grouped(group: FieldGroup) -> EndpointBinder {
        let schema = EndpointSchema::builder("Window")
            .attribute(Attribute::field("start").default("2024-01-01"))
            .attribute(Attribute::field("end"))
            .group(group)
            .build()
            .unwrap();
        binder(vec![TestEndpoint::new("Window", schema).shared()])
    }

    fn with_end() -> Arc<EndpointRequest> {
        Arc::new(request(Method::GET, "/things").with_query("end", "2024-02-01"))
    }

    #[tokio::test]
    async fn defaults_do_not_satisfy_require_one() {
        let binder = grouped(FieldGroup::require_one(["start", "end"]));

        let err = binder.bind(get()).await.unwrap_err();
        assert!(matches!(err, EndpointError::MissingFields { .. }));

        let bound = binder.bind(with_end()).await.unwrap();
        assert_eq!(bound.str("start"), Some("2024-01-01"));
        assert!(!bound.is_supplied("start"));
    }

    #[tokio::test]
    async fn require_one_rejects_two_supplied_fields() {
        let both = request(Method::GET, "/things")
            .with_query("start", "2024-01-15")
            .with_query("end", "2024-02-01");
        let err = grouped(FieldGroup::require_one(["start", "end"]))
            .bind(Arc::new(both))
            .await
            .unwrap_err();
        assert!(matches!(err, EndpointError::MissingFields { .. }));
        assert_eq!(err.error_code(), crate::endpoint::codes::MISSING_FIELDS);
    }

    #[tokio::test]
    async fn defaults_do_not_satisfy_require_all() {
        let err = grouped(FieldGroup::require_all(["start", "end"]))
            .bind(with_end())
            .await
            .unwrap_err();
        match err {
            EndpointError::MissingFields { fields, .. } => assert_eq!(fields, vec!["start".to_string()]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn defaults_do_not_trigger_require_all_if_any() {
        let binder = grouped(FieldGroup::require_all_if_any(["start", "end"]));
        assert!(binder.bind(get()).await.is_ok());
        assert!(binder.bind(with_end()).await.is_err());
    }
}

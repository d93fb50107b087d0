//! Declarative endpoints: attribute declarations, candidate binding and the
//! request pipeline.

pub mod attributes;
pub mod binder;
pub mod bound;
pub mod capabilities;
pub mod definition;
pub mod error;
pub mod pipeline;
pub mod rate_limit;
pub mod request;
pub mod schema;

pub use attributes::{Aggregate, Attribute, AttributeSource, FieldGroup, FieldType, Resolution};
pub use binder::EndpointBinder;
pub use bound::BoundEndpoint;
pub use capabilities::{HasConsumerAuth, HasMutation, HasResource, HasUrlBoundId};
pub use definition::EndpointDefinition;
pub use error::{codes, EndpointError, Rejection};
pub use pipeline::{EndpointPipeline, EndpointResponse};
pub use rate_limit::{MemoryRateLimitStore, RateLimitStore};
pub use request::EndpointRequest;
pub use schema::{EndpointSchema, SchemaBuilder, SchemaError};

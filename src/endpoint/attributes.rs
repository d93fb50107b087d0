use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Number, Value};

use crate::config::parse_flag;
use crate::endpoint::bound::BoundEndpoint;
use crate::endpoint::error::EndpointError;
use crate::endpoint::request::EndpointRequest;

pub type PostProcessFn = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;
pub type RequestGetter = Arc<dyn Fn(&EndpointRequest) -> Option<Value> + Send + Sync>;
pub type AggregateValue = Arc<dyn Any + Send + Sync>;
pub type AggregateFn = Arc<dyn Fn(&mut BoundEndpoint) -> Result<AggregateValue, EndpointError> + Send + Sync>;

/// Declared type of an attribute; raw request strings are coerced into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Bool,
    Integer,
    Float,
    String,
    Object,
    Any,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Bool => "bool",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::String => "string",
            FieldType::Object => "object",
            FieldType::Any => "any",
        }
    }

    pub fn coerce(&self, value: Value) -> Result<Value, String> {
        match (self, value) {
            (FieldType::Any, v) => Ok(v),
            (FieldType::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
            (FieldType::Bool, Value::Number(n)) => Ok(Value::Bool(n.as_f64().unwrap_or(0.0) != 0.0)),
            (FieldType::Bool, Value::String(s)) => parse_flag(&s)
                .map(Value::Bool)
                .ok_or_else(|| format!("'{}' is not a boolean", s)),
            (FieldType::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(Value::Number(n)),
            (FieldType::Integer, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| format!("'{}' is not an integer", s)),
            (FieldType::Float, Value::Number(n)) => Ok(Value::Number(n)),
            (FieldType::Float, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("'{}' is not a number", s)),
            (FieldType::String, Value::String(s)) => Ok(Value::String(s)),
            (FieldType::String, Value::Number(n)) => Ok(Value::String(n.to_string())),
            (FieldType::String, Value::Bool(b)) => Ok(Value::String(b.to_string())),
            (FieldType::Object, Value::Object(map)) => Ok(Value::Object(map)),
            (FieldType::Object, Value::String(s)) => match serde_json::from_str::<Value>(&s) {
                Ok(Value::Object(map)) => Ok(Value::Object(map)),
                _ => Err("expected a JSON object".to_string()),
            },
            (ty, other) => Err(format!("expected {}, got {}", ty.as_str(), other)),
        }
    }
}

/// Where an attribute's value comes from.
#[derive(Clone)]
pub enum AttributeSource {
    /// Request body (POST/PUT/PATCH) or query string.
    Field,
    /// A path parameter captured by the router.
    Url,
    Header(String),
    /// A field of the authenticated consumer.
    Consumer(String),
    /// An arbitrary accessor on the request.
    Request(RequestGetter),
    /// Every query parameter whose name starts with a prefix, collected
    /// into an object keyed by the remainder of the name.
    AdhocQuery(String),
}

impl fmt::Debug for AttributeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeSource::Field => write!(f, "Field"),
            AttributeSource::Url => write!(f, "Url"),
            AttributeSource::Header(h) => write!(f, "Header({})", h),
            AttributeSource::Consumer(c) => write!(f, "Consumer({})", c),
            AttributeSource::Request(_) => write!(f, "Request"),
            AttributeSource::AdhocQuery(p) => write!(f, "AdhocQuery({})", p),
        }
    }
}

impl AttributeSource {
    fn kind(&self) -> &'static str {
        match self {
            AttributeSource::Field => "field",
            AttributeSource::Url => "url",
            AttributeSource::Header(_) => "header",
            AttributeSource::Consumer(_) => "consumer",
            AttributeSource::Request(_) => "request",
            AttributeSource::AdhocQuery(_) => "adhoc_query",
        }
    }
}

/// Outcome of resolving one attribute against a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Absent,
    Value(Value),
    Invalid(String),
}

/// A declared request attribute.
#[derive(Clone)]
pub struct Attribute {
    pub name: String,
    /// Name of the parameter in the request; defaults to `name`.
    pub api_name: String,
    pub source: AttributeSource,
    pub field_type: FieldType,
    pub required: bool,
    pub default: Option<Value>,
    pub multivalued: bool,
    pub description: Option<String>,
    pub post_processor: Option<PostProcessFn>,
    /// Copied onto the resource by mutation endpoints.
    pub resource_field: bool,
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("name", &self.name)
            .field("api_name", &self.api_name)
            .field("source", &self.source)
            .field("field_type", &self.field_type)
            .field("required", &self.required)
            .field("multivalued", &self.multivalued)
            .finish()
    }
}

impl Attribute {
    fn with_source(name: impl Into<String>, source: AttributeSource) -> Self {
        let name = name.into();
        Self {
            api_name: name.clone(),
            name,
            source,
            field_type: FieldType::String,
            required: false,
            default: None,
            multivalued: false,
            description: None,
            post_processor: None,
            resource_field: false,
        }
    }

    pub fn field(name: impl Into<String>) -> Self {
        Self::with_source(name, AttributeSource::Field)
    }

    /// A field mirrored onto the resource by mutation endpoints.
    pub fn resource_field(name: impl Into<String>) -> Self {
        let mut attr = Self::field(name);
        attr.resource_field = true;
        attr
    }

    pub fn url(name: impl Into<String>) -> Self {
        let mut attr = Self::with_source(name, AttributeSource::Url);
        attr.required = true;
        attr
    }

    pub fn header(name: impl Into<String>, header: impl Into<String>) -> Self {
        Self::with_source(name, AttributeSource::Header(header.into().to_ascii_lowercase()))
    }

    pub fn consumer(name: impl Into<String>, consumer_field: impl Into<String>) -> Self {
        let mut attr = Self::with_source(name, AttributeSource::Consumer(consumer_field.into()));
        attr.field_type = FieldType::Any;
        attr
    }

    pub fn request<F>(name: impl Into<String>, getter: F) -> Self
    where
        F: Fn(&EndpointRequest) -> Option<Value> + Send + Sync + 'static,
    {
        let mut attr = Self::with_source(name, AttributeSource::Request(Arc::new(getter)));
        attr.field_type = FieldType::Any;
        attr
    }

    pub fn adhoc_query(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        let mut attr = Self::with_source(name, AttributeSource::AdhocQuery(prefix.into()));
        attr.field_type = FieldType::Object;
        attr
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn of_type(mut self, field_type: FieldType) -> Self {
        self.field_type = field_type;
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn multivalued(mut self) -> Self {
        self.multivalued = true;
        self
    }

    pub fn api_name(mut self, api_name: impl Into<String>) -> Self {
        self.api_name = api_name.into();
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Validate or transform the coerced value. An `Err` marks it invalid.
    pub fn post_process<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.post_processor = Some(Arc::new(f));
        self
    }

    pub fn is_consumer_bound(&self) -> bool {
        matches!(self.source, AttributeSource::Consumer(_))
    }

    pub fn is_request_field(&self) -> bool {
        matches!(self.source, AttributeSource::Field)
    }

    pub fn resolve(&self, request: &EndpointRequest) -> Resolution {
        let raw = match &self.source {
            AttributeSource::Field if self.multivalued => {
                let values = request.params(&self.api_name);
                if values.is_empty() {
                    None
                } else {
                    Some(Value::Array(values))
                }
            }
            AttributeSource::Field => request.param(&self.api_name),
            AttributeSource::Url => request
                .path_param(&self.api_name)
                .map(|v| Value::String(v.to_string())),
            AttributeSource::Header(header) => request
                .header(header)
                .map(|v| Value::String(v.to_string())),
            AttributeSource::Consumer(field) => request.consumer().and_then(|c| c.field(field)),
            AttributeSource::Request(getter) => getter(request),
            AttributeSource::AdhocQuery(prefix) => {
                let map: Map<String, Value> = request
                    .query_pairs()
                    .iter()
                    .filter_map(|(k, v)| {
                        k.strip_prefix(prefix.as_str())
                            .filter(|rest| !rest.is_empty())
                            .map(|rest| (rest.to_string(), Value::String(v.clone())))
                    })
                    .collect();
                if map.is_empty() {
                    None
                } else {
                    Some(Value::Object(map))
                }
            }
        };

        let raw = match raw {
            None | Some(Value::Null) => return Resolution::Absent,
            Some(raw) => raw,
        };

        let coerced = if self.multivalued {
            match raw {
                Value::Array(items) => items
                    .into_iter()
                    .map(|item| self.field_type.coerce(item))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array),
                single => self.field_type.coerce(single).map(|v| Value::Array(vec![v])),
            }
        } else {
            self.field_type.coerce(raw)
        };

        let value = match coerced {
            Ok(value) => value,
            Err(message) => return Resolution::Invalid(message),
        };

        match &self.post_processor {
            Some(post) => match post(value) {
                Ok(value) => Resolution::Value(value),
                Err(message) => Resolution::Invalid(message),
            },
            None => Resolution::Value(value),
        }
    }

    pub fn documentation(&self) -> Value {
        let mut doc = Map::new();
        doc.insert("name".into(), Value::String(self.api_name.clone()));
        doc.insert("source".into(), Value::String(self.source.kind().to_string()));
        doc.insert("type".into(), Value::String(self.field_type.as_str().to_string()));
        doc.insert("required".into(), Value::Bool(self.required));
        doc.insert("multivalued".into(), Value::Bool(self.multivalued));
        if let Some(default) = &self.default {
            doc.insert("default".into(), default.clone());
        }
        if let Some(description) = &self.description {
            doc.insert("description".into(), Value::String(description.clone()));
        }
        Value::Object(doc)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupRule {
    /// Exactly one of the fields must be present.
    RequireOne,
    /// Every field must be present.
    RequireAll,
    /// If any field is present, all must be.
    RequireAllIfAny,
}

/// A constraint over several optional fields.
#[derive(Debug, Clone)]
pub struct FieldGroup {
    pub rule: GroupRule,
    pub fields: Vec<String>,
}

impl FieldGroup {
    fn new<I, S>(rule: GroupRule, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rule,
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn require_one<I: IntoIterator<Item = S>, S: Into<String>>(fields: I) -> Self {
        Self::new(GroupRule::RequireOne, fields)
    }

    pub fn require_all<I: IntoIterator<Item = S>, S: Into<String>>(fields: I) -> Self {
        Self::new(GroupRule::RequireAll, fields)
    }

    pub fn require_all_if_any<I: IntoIterator<Item = S>, S: Into<String>>(fields: I) -> Self {
        Self::new(GroupRule::RequireAllIfAny, fields)
    }

    /// Check the group against the set of present fields.
    pub fn check(&self, is_present: impl Fn(&str) -> bool) -> Result<(), EndpointError> {
        let missing: Vec<String> = self
            .fields
            .iter()
            .filter(|f| !is_present(f))
            .cloned()
            .collect();
        let present = self.fields.len() - missing.len();
        let any_present = present > 0;

        let detail = match self.rule {
            GroupRule::RequireOne if present != 1 => {
                format!("Exactly one of the following fields must be populated: {}", self.fields.join(", "))
            }
            GroupRule::RequireAll if !missing.is_empty() => {
                format!("All of the following fields are required: {}", self.fields.join(", "))
            }
            GroupRule::RequireAllIfAny if any_present && !missing.is_empty() => format!(
                "If any of the following fields are given, all are required: {}",
                self.fields.join(", ")
            ),
            _ => return Ok(()),
        };

        let fields = match self.rule {
            GroupRule::RequireOne => self.fields.clone(),
            _ => missing,
        };
        Err(EndpointError::MissingFields {
            fields,
            detail: Some(detail),
        })
    }
}

/// A lazily computed, memoized per-request value.
#[derive(Clone)]
pub struct Aggregate {
    pub name: String,
    pub depends_on: Vec<String>,
    pub required: bool,
    pub default: Option<AggregateValue>,
    pub compute: AggregateFn,
}

impl fmt::Debug for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregate")
            .field("name", &self.name)
            .field("depends_on", &self.depends_on)
            .field("required", &self.required)
            .finish()
    }
}

impl Aggregate {
    pub fn new<T, F>(name: impl Into<String>, compute: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&mut BoundEndpoint) -> Result<T, EndpointError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            required: false,
            default: None,
            compute: Arc::new(move |ep| compute(ep).map(|v| Arc::new(v) as AggregateValue)),
        }
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    /// Resolve during binding; a failure rejects the candidate.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.default = Some(Arc::new(value));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Consumer, ConsumerType};
    use axum::http::Method;
    use serde_json::json;

    #[test]
    fn coerces_query_strings_to_declared_types() {
        assert_eq!(FieldType::Integer.coerce(json!("42")), Ok(json!(42)));
        assert_eq!(FieldType::Bool.coerce(json!("yes")), Ok(json!(true)));
        assert_eq!(FieldType::Float.coerce(json!("1.5")), Ok(json!(1.5)));
        assert!(FieldType::Integer.coerce(json!("forty")).is_err());
        assert!(FieldType::String.coerce(json!({"a": 1})).is_err());
    }

    #[test]
    fn resolves_each_source() {
        let request = EndpointRequest::new(Method::GET, "/todos/7")
            .with_path_param("id", "7")
            .with_query("tag", "home")
            .with_query("tag", "work")
            .with_query("meta_color", "red")
            .with_header("x-client", "cli")
            .with_consumer(Consumer::new("k1", "alice", ConsumerType::ReadOnly));

        let id = Attribute::url("id").of_type(FieldType::Integer);
        assert_eq!(id.resolve(&request), Resolution::Value(json!(7)));

        let tags = Attribute::field("tags").api_name("tag").multivalued();
        assert_eq!(tags.resolve(&request), Resolution::Value(json!(["home", "work"])));

        let client = Attribute::header("client", "X-Client");
        assert_eq!(client.resolve(&request), Resolution::Value(json!("cli")));

        let consumer = Attribute::consumer("consumer_name", "name");
        assert_eq!(consumer.resolve(&request), Resolution::Value(json!("alice")));

        let meta = Attribute::adhoc_query("meta", "meta_");
        assert_eq!(meta.resolve(&request), Resolution::Value(json!({"color": "red"})));

        let path = Attribute::request("path", |r| Some(json!(r.path())));
        assert_eq!(path.resolve(&request), Resolution::Value(json!("/todos/7")));

        assert_eq!(Attribute::field("missing").resolve(&request), Resolution::Absent);
    }

    #[test]
    fn post_processor_can_reject_values() {
        let request = EndpointRequest::new(Method::POST, "/todos").with_body_param("priority", json!("urgent"));
        let attr = Attribute::field("priority").post_process(|v| match v.as_str() {
            Some("low") | Some("high") => Ok(v),
            _ => Err("priority must be low or high".to_string()),
        });
        assert!(matches!(attr.resolve(&request), Resolution::Invalid(_)));
    }

    #[test]
    fn field_groups() {
        let present = |name: &str| name == "a";

        assert!(FieldGroup::require_one(["a", "b"]).check(present).is_ok());
        assert!(FieldGroup::require_one(["b", "c"]).check(present).is_err());
        assert!(FieldGroup::require_all(["a"]).check(present).is_ok());
        assert!(FieldGroup::require_all(["a", "b"]).check(present).is_err());
        assert!(FieldGroup::require_all_if_any(["b", "c"]).check(present).is_ok());

        let err = FieldGroup::require_all_if_any(["a", "b"]).check(present).unwrap_err();
        match err {
            EndpointError::MissingFields { fields, detail } => {
                assert_eq!(fields, vec!["b".to_string()]);
                assert!(detail.is_some());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn require_one_rejects_more_than_one() {
        let present = |name: &str| name == "a" || name == "b";

        let err = FieldGroup::require_one(["a", "b", "c"]).check(present).unwrap_err();
        match err {
            EndpointError::MissingFields { fields, detail } => {
                assert_eq!(fields, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
                assert!(detail.unwrap_or_default().starts_with("Exactly one"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(FieldGroup::require_one(["a", "c"]).check(present).is_ok());
    }
}

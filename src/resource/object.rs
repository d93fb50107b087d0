use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::filter::ResponseFilter;
use crate::resource::error::ResourceError;

/// Downcasting support for domain objects held behind `dyn ApiObject`.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A domain object the response filter can introspect.
///
/// Objects are identified by their `type_name`, which is the key used in
/// filter specifications. `base_types` lists ancestor type names, most
/// specific first, and is consulted when a filter has no entry for the
/// object's own type.
pub trait ApiObject: AsAny + Send + Sync {
    fn type_name(&self) -> &'static str;

    fn base_types(&self) -> &'static [&'static str] {
        &[]
    }

    /// Every readable field, in a stable order.
    fn field_names(&self) -> Vec<&'static str>;

    fn field(&self, name: &str) -> Option<Resource>;

    fn set_field(&mut self, name: &str, _value: Value) -> Result<(), ResourceError> {
        Err(ResourceError::ReadOnlyField {
            type_name: self.type_name(),
            field: name.to_string(),
        })
    }

    /// Persistence identity, if the object has one.
    fn id(&self) -> Option<String> {
        None
    }

    /// Instance-level filter, overriding class and default filters.
    fn api_filter(&self) -> Option<Arc<ResponseFilter>> {
        None
    }
}

/// The result of a resource computation.
///
/// Plain values and maps are ad-hoc data and pass through filtering
/// untouched; `Object` entries are domain objects subject to the filter.
#[derive(Clone)]
pub enum Resource {
    Value(Value),
    Map(BTreeMap<String, Resource>),
    List(Vec<Resource>),
    Object(Arc<dyn ApiObject>),
    /// Attaches an instance-level filter to any resource.
    Filtered {
        filter: Arc<ResponseFilter>,
        inner: Box<Resource>,
    },
}

impl Resource {
    pub fn null() -> Self {
        Resource::Value(Value::Null)
    }

    pub fn object<T: ApiObject + 'static>(object: T) -> Self {
        Resource::Object(Arc::new(object))
    }

    pub fn map<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Resource)>,
        K: Into<String>,
    {
        Resource::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn with_filter(self, filter: Arc<ResponseFilter>) -> Self {
        Resource::Filtered {
            filter,
            inner: Box::new(self),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Resource::Value(Value::Null))
    }

    /// The domain object behind this resource, looking through filter wrappers.
    pub fn as_object(&self) -> Option<&dyn ApiObject> {
        match self {
            Resource::Object(object) => Some(&**object),
            Resource::Filtered { inner, .. } => inner.as_object(),
            _ => None,
        }
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.as_object()?.as_any().downcast_ref::<T>()
    }

    /// Mutable access to the domain object. Fails when the object is shared.
    pub fn object_mut(&mut self) -> Result<&mut (dyn ApiObject + 'static), ResourceError> {
        match self {
            Resource::Object(object) => Arc::get_mut(object).ok_or(ResourceError::Shared),
            Resource::Filtered { inner, .. } => inner.object_mut(),
            _ => Err(ResourceError::TypeMismatch { expected: "domain object" }),
        }
    }

    pub fn downcast_mut<T: 'static>(&mut self) -> Result<&mut T, ResourceError> {
        self.object_mut()?
            .as_any_mut()
            .downcast_mut::<T>()
            .ok_or(ResourceError::TypeMismatch {
                expected: std::any::type_name::<T>(),
            })
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Resource::Value(value) => is_truthy(value),
            Resource::Map(map) => !map.is_empty(),
            Resource::List(items) => !items.is_empty(),
            Resource::Object(_) => true,
            Resource::Filtered { inner, .. } => inner.is_truthy(),
        }
    }
}

/// Null, false, zero, and empty strings/arrays/objects are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Value(value) => write!(f, "Value({})", value),
            Resource::Map(map) => f.debug_map().entries(map.iter()).finish(),
            Resource::List(items) => f.debug_list().entries(items.iter()).finish(),
            Resource::Object(object) => {
                write!(f, "Object({}", object.type_name())?;
                if let Some(id) = object.id() {
                    write!(f, " id={}", id)?;
                }
                write!(f, ")")
            }
            Resource::Filtered { inner, .. } => write!(f, "Filtered({:?})", inner),
        }
    }
}

impl From<Value> for Resource {
    fn from(value: Value) -> Self {
        Resource::Value(value)
    }
}

impl From<&str> for Resource {
    fn from(value: &str) -> Self {
        Resource::Value(Value::String(value.to_string()))
    }
}

impl From<String> for Resource {
    fn from(value: String) -> Self {
        Resource::Value(Value::String(value))
    }
}

impl From<bool> for Resource {
    fn from(value: bool) -> Self {
        Resource::Value(Value::Bool(value))
    }
}

impl From<i64> for Resource {
    fn from(value: i64) -> Self {
        Resource::Value(Value::from(value))
    }
}

impl<T: Into<Resource>> From<Option<T>> for Resource {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_else(Resource::null)
    }
}

impl From<Vec<Resource>> for Resource {
    fn from(items: Vec<Resource>) -> Self {
        Resource::List(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Note {
        body: String,
    }

    impl ApiObject for Note {
        fn type_name(&self) -> &'static str {
            "Note"
        }

        fn field_names(&self) -> Vec<&'static str> {
            vec!["body"]
        }

        fn field(&self, name: &str) -> Option<Resource> {
            match name {
                "body" => Some(self.body.clone().into()),
                _ => None,
            }
        }
    }

    #[test]
    fn truthiness_of_json_values() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!([])));
        assert!(!is_truthy(&json!({})));
        assert!(is_truthy(&json!("x")));
        assert!(is_truthy(&json!(0.5)));
    }

    #[test]
    fn downcast_mut_requires_unique_ownership() {
        let mut resource = Resource::object(Note { body: "a".into() });
        resource.downcast_mut::<Note>().unwrap().body = "b".into();
        assert_eq!(resource.downcast_ref::<Note>().unwrap().body, "b");

        let _shared = resource.clone();
        assert!(matches!(resource.object_mut(), Err(ResourceError::Shared)));
    }

    #[test]
    fn default_set_field_is_read_only() {
        let mut note = Note { body: "a".into() };
        let err = note.set_field("body", json!("b")).unwrap_err();
        assert!(matches!(err, ResourceError::ReadOnlyField { .. }));
    }
}

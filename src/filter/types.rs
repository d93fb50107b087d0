use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::resource::{ApiObject, Resource};

static NEXT_FILTER_ID: AtomicU64 = AtomicU64::new(1);

fn next_filter_id() -> u64 {
    NEXT_FILTER_ID.fetch_add(1, Ordering::Relaxed)
}

pub type ComputeFn = Arc<dyn Fn(&dyn ApiObject) -> Resource + Send + Sync>;
pub type RenderFn = Arc<dyn Fn(&dyn ApiObject) -> Value + Send + Sync>;

/// Visibility policy for a single field.
#[derive(Clone)]
pub enum FieldPolicy {
    Never,
    Always,
    /// Emit only when the filtered value is truthy.
    IfTruthy,
    /// Emit the result of a function of the object.
    Computed(ComputeFn),
    /// Emit the field, filtering its value with an additional layer.
    Nested(Arc<ResponseFilter>),
    /// Emit fully only when named in the `X-Expand` header.
    Expandable(Expandable),
}

impl FieldPolicy {
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&dyn ApiObject) -> Resource + Send + Sync + 'static,
    {
        FieldPolicy::Computed(Arc::new(f))
    }

    pub fn nested(filter: ResponseFilter) -> Self {
        FieldPolicy::Nested(Arc::new(filter))
    }
}

impl fmt::Debug for FieldPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldPolicy::Never => write!(f, "Never"),
            FieldPolicy::Always => write!(f, "Always"),
            FieldPolicy::IfTruthy => write!(f, "IfTruthy"),
            FieldPolicy::Computed(_) => write!(f, "Computed"),
            FieldPolicy::Nested(filter) => write!(f, "Nested({})", filter.id()),
            FieldPolicy::Expandable(e) => write!(f, "{:?}", e),
        }
    }
}

/// An expandable field. Unexpanded, it renders as a reference
/// `{display_key: value}` built from the related object, or is omitted
/// when no display key is set.
#[derive(Debug, Clone, Default)]
pub struct Expandable {
    pub display_key: Option<String>,
    /// Field to read on the object, when it differs from the output name.
    pub source_field: Option<String>,
}

impl Expandable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn display_key(mut self, key: impl Into<String>) -> Self {
        self.display_key = Some(key.into());
        self
    }

    pub fn source_field(mut self, field: impl Into<String>) -> Self {
        self.source_field = Some(field.into());
        self
    }
}

impl From<Expandable> for FieldPolicy {
    fn from(e: Expandable) -> Self {
        FieldPolicy::Expandable(e)
    }
}

/// How objects of one type are rendered.
#[derive(Clone)]
pub enum TypeRule {
    /// Every field the object reports.
    All,
    /// Only the listed fields, in declaration order.
    Fields(Vec<(String, FieldPolicy)>),
    /// Render the object with a function, bypassing field policies.
    Custom(RenderFn),
}

impl TypeRule {
    pub fn fields<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, FieldPolicy)>,
        K: Into<String>,
    {
        TypeRule::Fields(fields.into_iter().map(|(k, p)| (k.into(), p)).collect())
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&dyn ApiObject) -> Value + Send + Sync + 'static,
    {
        TypeRule::Custom(Arc::new(f))
    }
}

impl fmt::Debug for TypeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRule::All => write!(f, "All"),
            TypeRule::Fields(fields) => f.debug_map().entries(fields.iter().map(|(k, v)| (k, v))).finish(),
            TypeRule::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// Per-type field visibility rules.
///
/// Every distinct filter carries an identity used by the filter engine's
/// per-pass memo; adding a rule produces a new identity.
#[derive(Debug, Clone)]
pub struct ResponseFilter {
    id: u64,
    rules: HashMap<String, TypeRule>,
}

impl ResponseFilter {
    pub fn new() -> Self {
        Self {
            id: next_filter_id(),
            rules: HashMap::new(),
        }
    }

    pub fn rule(mut self, type_name: impl Into<String>, rule: TypeRule) -> Self {
        self.rules.insert(type_name.into(), rule);
        self.id = next_filter_id();
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn rule_for(&self, type_name: &str) -> Option<&TypeRule> {
        self.rules.get(type_name)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl Default for ResponseFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Named filters selectable from configuration.
#[derive(Debug, Default, Clone)]
pub struct FilterRegistry {
    filters: HashMap<String, Arc<ResponseFilter>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, filter: ResponseFilter) {
        let name = name.into();
        tracing::debug!("Registered response filter '{}'", name);
        self.filters.insert(name, Arc::new(filter));
    }

    pub fn get(&self, name: &str) -> Option<Arc<ResponseFilter>> {
        self.filters.get(name).cloned()
    }
}

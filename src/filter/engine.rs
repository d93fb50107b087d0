use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::config::FilterConfig;
use crate::filter::error::FilterError;
use crate::filter::expand::ExpandTree;
use crate::filter::types::{FieldPolicy, FilterRegistry, ResponseFilter, TypeRule};
use crate::resource::{is_truthy, ApiObject, Resource};

/// Output key listing the expandable fields of an object.
pub const EXPANDABLE_KEY: &str = "__expandable__";

/// Serializes resource graphs through layered response filters.
///
/// Layers are consulted from the most recent to the oldest: default filter,
/// then the endpoint's class-level filter, then any instance-level filter an
/// object carries. A nested object inherits its parent's layers.
#[derive(Debug, Clone, Default)]
pub struct FilterEngine {
    default_filter: Option<Arc<ResponseFilter>>,
    cache_computed: bool,
}

impl FilterEngine {
    pub fn new(default_filter: Option<Arc<ResponseFilter>>) -> Self {
        Self {
            default_filter,
            cache_computed: false,
        }
    }

    pub fn from_config(config: &FilterConfig, registry: &FilterRegistry) -> Result<Self, FilterError> {
        let default_filter = match &config.default_filter {
            Some(name) => Some(
                registry
                    .get(name)
                    .ok_or_else(|| FilterError::UnknownFilter(name.clone()))?,
            ),
            None => None,
        };

        Ok(Self {
            default_filter,
            cache_computed: config.model_caching_enabled,
        })
    }

    pub fn with_computed_cache(mut self, enabled: bool) -> Self {
        self.cache_computed = enabled;
        self
    }

    pub fn default_filter(&self) -> Option<&Arc<ResponseFilter>> {
        self.default_filter.as_ref()
    }

    /// Filter a resource in one pass. `expand` is the raw `X-Expand` header.
    pub fn apply(
        &self,
        resource: &Resource,
        class_filter: Option<Arc<ResponseFilter>>,
        expand: Option<&str>,
    ) -> Value {
        let mut layers = Vec::with_capacity(2);
        layers.extend(self.default_filter.clone());
        layers.extend(class_filter);

        let expand = ExpandTree::parse(expand.unwrap_or(""));
        let mut pass = FilterPass::new(self.cache_computed);
        let value = pass.filter(resource, &layers, &expand);

        tracing::debug!(
            "Response filter pass complete: objects={}, memo_hits={}",
            pass.misses,
            pass.hits
        );
        value
    }
}

#[derive(Debug, Hash, PartialEq, Eq)]
struct MemoKey {
    object: usize,
    layers: Vec<u64>,
    expand: String,
}

/// State for a single serialization pass; never reused across requests.
struct FilterPass {
    memo: HashMap<MemoKey, Value>,
    in_progress: HashSet<MemoKey>,
    computed: HashMap<(usize, String), Resource>,
    cache_computed: bool,
    hits: usize,
    misses: usize,
}

impl FilterPass {
    fn new(cache_computed: bool) -> Self {
        Self {
            memo: HashMap::new(),
            in_progress: HashSet::new(),
            computed: HashMap::new(),
            cache_computed,
            hits: 0,
            misses: 0,
        }
    }

    fn filter(&mut self, resource: &Resource, layers: &[Arc<ResponseFilter>], expand: &ExpandTree) -> Value {
        match resource {
            Resource::Value(value) => value.clone(),
            Resource::Map(map) => {
                let mut out = Map::new();
                for (key, value) in map {
                    out.insert(key.clone(), self.filter(value, layers, expand.child(key)));
                }
                Value::Object(out)
            }
            Resource::List(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.filter(item, layers, expand))
                    .collect(),
            ),
            Resource::Filtered { filter, inner } => {
                let layers = with_layer(layers, filter.clone());
                self.filter(inner, &layers, expand)
            }
            Resource::Object(object) => self.filter_object(object, layers, expand),
        }
    }

    fn filter_object(
        &mut self,
        object: &Arc<dyn ApiObject>,
        layers: &[Arc<ResponseFilter>],
        expand: &ExpandTree,
    ) -> Value {
        let layers = match object.api_filter() {
            Some(own) => with_layer(layers, own),
            None => layers.to_vec(),
        };

        let key = MemoKey {
            object: object_key(object),
            layers: layers.iter().map(|l| l.id()).collect(),
            expand: expand.key(),
        };

        if let Some(value) = self.memo.get(&key) {
            self.hits += 1;
            return value.clone();
        }
        // Reference cycle back to an object still being rendered.
        if self.in_progress.contains(&key) {
            return Value::Null;
        }

        self.misses += 1;
        self.in_progress.insert(MemoKey {
            object: key.object,
            layers: key.layers.clone(),
            expand: key.expand.clone(),
        });
        let value = self.render(object, &layers, expand);
        self.in_progress.remove(&key);
        self.memo.insert(key, value.clone());
        value
    }

    fn render(&mut self, object: &Arc<dyn ApiObject>, layers: &[Arc<ResponseFilter>], expand: &ExpandTree) -> Value {
        let type_name = object.type_name();
        let rule = lookup(layers, type_name).or_else(|| {
            object
                .base_types()
                .iter()
                .find_map(|base| lookup(layers, base))
        });

        match rule {
            None => {
                tracing::debug!("No response filter for type '{}'; emitting empty object", type_name);
                Value::Object(Map::new())
            }
            Some(TypeRule::Custom(render)) => render(&**object),
            Some(TypeRule::All) => {
                let mut out = Map::new();
                for name in object.field_names() {
                    if let Some(value) = object.field(name) {
                        out.insert(name.to_string(), self.filter(&value, layers, expand.child(name)));
                    }
                }
                Value::Object(out)
            }
            Some(TypeRule::Fields(_)) => {
                let policies = merged_fields(layers, &**object);
                self.render_fields(object, &policies, layers, expand)
            }
        }
    }

    fn render_fields(
        &mut self,
        object: &Arc<dyn ApiObject>,
        policies: &[(String, FieldPolicy)],
        layers: &[Arc<ResponseFilter>],
        expand: &ExpandTree,
    ) -> Value {
        let mut out = Map::new();
        let mut expandable = Vec::new();

        for (name, policy) in policies {
            let child_expand = expand.child(name);
            match policy {
                FieldPolicy::Never => {}
                FieldPolicy::Always => {
                    if let Some(value) = object.field(name) {
                        let value = self.filter(&value, layers, child_expand);
                        if !value.is_null() {
                            out.insert(name.clone(), value);
                        }
                    }
                }
                FieldPolicy::IfTruthy => {
                    if let Some(value) = object.field(name) {
                        let value = self.filter(&value, layers, child_expand);
                        if is_truthy(&value) {
                            out.insert(name.clone(), value);
                        }
                    }
                }
                FieldPolicy::Computed(compute) => {
                    let value = if self.cache_computed {
                        let key = (object_key(object), name.clone());
                        match self.computed.get(&key) {
                            Some(cached) => cached.clone(),
                            None => {
                                let value = compute(&**object);
                                self.computed.insert(key, value.clone());
                                value
                            }
                        }
                    } else {
                        compute(&**object)
                    };
                    out.insert(name.clone(), self.filter(&value, layers, child_expand));
                }
                FieldPolicy::Nested(filter) => {
                    if let Some(value) = object.field(name) {
                        let nested = with_layer(layers, filter.clone());
                        out.insert(name.clone(), self.filter(&value, &nested, child_expand));
                    }
                }
                FieldPolicy::Expandable(spec) => {
                    expandable.push(Value::String(name.clone()));
                    let source = spec.source_field.as_deref().unwrap_or(name);
                    let Some(value) = object.field(source) else {
                        continue;
                    };
                    if expand.contains(name) {
                        out.insert(name.clone(), self.filter(&value, layers, child_expand));
                    } else if let Some(display_key) = &spec.display_key {
                        out.insert(name.clone(), self.reference(&value, display_key, layers));
                    }
                }
            }
        }

        if !expandable.is_empty() {
            out.insert(EXPANDABLE_KEY.to_string(), Value::Array(expandable));
        }
        Value::Object(out)
    }

    /// Unexpanded rendering of a related object: only its display key.
    fn reference(&mut self, value: &Resource, display_key: &str, layers: &[Arc<ResponseFilter>]) -> Value {
        match value {
            Resource::Object(related) => {
                let mut out = Map::new();
                if let Some(key_value) = related.field(display_key) {
                    let rendered = self.filter(&key_value, layers, &ExpandTree::default());
                    out.insert(display_key.to_string(), rendered);
                }
                Value::Object(out)
            }
            Resource::List(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.reference(item, display_key, layers))
                    .collect(),
            ),
            Resource::Filtered { inner, .. } => self.reference(inner, display_key, layers),
            other => self.filter(other, layers, &ExpandTree::default()),
        }
    }
}

fn object_key(object: &Arc<dyn ApiObject>) -> usize {
    Arc::as_ptr(object) as *const () as usize
}

fn with_layer(layers: &[Arc<ResponseFilter>], layer: Arc<ResponseFilter>) -> Vec<Arc<ResponseFilter>> {
    let mut out = layers.to_vec();
    out.push(layer);
    out
}

/// The most recent layer with a rule for `type_name`.
fn lookup<'a>(layers: &'a [Arc<ResponseFilter>], type_name: &str) -> Option<&'a TypeRule> {
    layers.iter().rev().find_map(|layer| layer.rule_for(type_name))
}

/// Field policies for an object, with ancestor field lists merged underneath
/// the object's own list.
fn merged_fields(layers: &[Arc<ResponseFilter>], object: &dyn ApiObject) -> Vec<(String, FieldPolicy)> {
    let mut merged: Vec<(String, FieldPolicy)> = Vec::new();
    let own = std::iter::once(object.type_name());
    let chain: Vec<&str> = object.base_types().iter().rev().copied().chain(own).collect();

    for type_name in chain {
        if let Some(TypeRule::Fields(fields)) = lookup(layers, type_name) {
            for (name, policy) in fields {
                match merged.iter_mut().find(|(existing, _)| existing == name) {
                    Some(entry) => entry.1 = policy.clone(),
                    None => merged.push((name.clone(), policy.clone())),
                }
            }
        }
    }
    merged
}

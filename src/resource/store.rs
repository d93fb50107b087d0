use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::resource::error::ResourceError;
use crate::resource::object::{ApiObject, Resource};

/// Persistence collaborator for one model type.
///
/// Resource computations load through `fetch`/`list`, and the endpoint
/// pipeline persists the finished resource through `save`.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn fetch(&self, id: &str) -> Result<Option<Resource>, ResourceError>;

    async fn list(&self) -> Result<Vec<Resource>, ResourceError>;

    async fn save(&self, resource: &Resource) -> Result<(), ResourceError>;

    async fn delete(&self, id: &str) -> Result<bool, ResourceError>;
}

/// In-memory store keeping independent copies of each record, so resources
/// handed out are uniquely owned and can be mutated by endpoint tasks.
pub struct MemoryStore<T> {
    records: RwLock<Vec<T>>,
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ApiObject + Clone + 'static> MemoryStore<T> {
    pub async fn insert(&self, record: T) {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| r.id() == record.id()) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Ids in insertion order.
    pub async fn ids(&self) -> Vec<String> {
        self.records.read().await.iter().filter_map(|r| r.id()).collect()
    }

    pub async fn all(&self) -> Vec<T> {
        self.records.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<T> {
        self.records
            .read()
            .await
            .iter()
            .find(|r| r.id().as_deref() == Some(id))
            .cloned()
    }
}

#[async_trait]
impl<T: ApiObject + Clone + 'static> ResourceStore for MemoryStore<T> {
    async fn fetch(&self, id: &str) -> Result<Option<Resource>, ResourceError> {
        Ok(self.get(id).await.map(Resource::object))
    }

    async fn list(&self) -> Result<Vec<Resource>, ResourceError> {
        let records = self.records.read().await;
        Ok(records.iter().cloned().map(Resource::object).collect())
    }

    async fn save(&self, resource: &Resource) -> Result<(), ResourceError> {
        let record = resource
            .downcast_ref::<T>()
            .ok_or(ResourceError::TypeMismatch {
                expected: std::any::type_name::<T>(),
            })?;
        if record.id().is_none() {
            return Err(ResourceError::MissingId);
        }
        self.insert(record.clone()).await;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, ResourceError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.id().as_deref() != Some(id));
        Ok(records.len() != before)
    }
}

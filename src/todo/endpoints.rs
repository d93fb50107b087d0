use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::endpoint::{
    Aggregate, Attribute, BoundEndpoint, EndpointDefinition, EndpointError, EndpointSchema, FieldGroup, FieldType,
    HasConsumerAuth, HasMutation, HasResource, HasUrlBoundId, SchemaError,
};
use crate::filter::ResponseFilter;
use crate::resource::{MemoryStore, Resource, ResourceStore};
use crate::tasks::{DeferredTask, Task};
use crate::todo::model::{detail_filter, validate_priority, Owner, Todo};

pub type TodoStore = Arc<MemoryStore<Todo>>;

/// Where the `notify` task delivers new-todo notifications.
#[derive(Debug, Clone, Default)]
pub struct Notifications(Arc<Mutex<Vec<Value>>>);

impl Notifications {
    pub fn push(&self, notification: Value) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).push(notification);
    }

    pub fn all(&self) -> Vec<Value> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

fn priority_attribute() -> Attribute {
    Attribute::resource_field("priority").post_process(|value| {
        let priority = value.as_str().unwrap_or_default().to_ascii_lowercase();
        validate_priority(&priority)?;
        Ok(Value::String(priority))
    })
}

fn todo_store(store: &TodoStore) -> Arc<dyn ResourceStore> {
    store.clone()
}

/// Liveness probe mounted without authentication.
pub struct Ping {
    schema: Arc<EndpointSchema>,
}

impl Ping {
    pub fn new() -> Result<Self, SchemaError> {
        Ok(Self {
            schema: Arc::new(EndpointSchema::builder("Ping").build()?),
        })
    }
}

#[async_trait]
impl EndpointDefinition for Ping {
    fn name(&self) -> &'static str {
        "Ping"
    }

    fn schema(&self) -> Arc<EndpointSchema> {
        self.schema.clone()
    }

    async fn is_authorized(&self, _bound: &mut BoundEndpoint) -> Result<bool, EndpointError> {
        Ok(true)
    }

    async fn resource(&self, _bound: &mut BoundEndpoint) -> Result<Resource, EndpointError> {
        Ok(Resource::map([("ping", Resource::from("pong"))]))
    }
}

/// POST /todos with `task` and `priority`.
pub struct TodoCreate {
    schema: Arc<EndpointSchema>,
    store: TodoStore,
}

impl TodoCreate {
    pub fn new(store: TodoStore, notifications: Notifications) -> Result<Self, SchemaError> {
        let schema = EndpointSchema::builder("TodoCreate")
            .consumer_auth()
            .attribute(Attribute::field("task").required().describe("What needs doing"))
            .attribute(priority_attribute().required().describe("low, medium or high"))
            .task(Task::immediate("assign_owner", |bound| {
                Box::pin(async move {
                    let owner = bound.consumer().map(Owner::from);
                    bound.resource().await?.downcast_mut::<Todo>()?.owner = owner;
                    Ok(())
                })
            }))
            .task(Task::deferred("notify", notify_task(notifications)))
            .build()?;

        Ok(Self {
            schema: Arc::new(schema),
            store,
        })
    }
}

fn notify_task(notifications: Notifications) -> DeferredTask {
    DeferredTask::new(move |args: Value| {
        let notifications = notifications.clone();
        async move {
            tracing::info!("New todo created: {}", args);
            notifications.push(args);
            Ok(())
        }
    })
    .args(|bound| {
        json!({
            "todo_id": bound.cached_resource().and_then(|r| r.as_object()).and_then(|o| o.id()),
            "task": bound.str("task"),
            "priority": bound.str("priority"),
        })
    })
    .execute_unless(|bound| bound.str("priority") == Some("low"))
    .retries(2)
    .retry_on("TransientError")
}

impl HasConsumerAuth for TodoCreate {}

#[async_trait]
impl HasResource for TodoCreate {
    fn model_name(&self) -> &'static str {
        "Todo"
    }

    fn store(&self) -> Arc<dyn ResourceStore> {
        todo_store(&self.store)
    }
}

#[async_trait]
impl EndpointDefinition for TodoCreate {
    fn name(&self) -> &'static str {
        "TodoCreate"
    }

    fn schema(&self) -> Arc<EndpointSchema> {
        self.schema.clone()
    }

    fn description(&self) -> Option<&'static str> {
        Some("Create a todo")
    }

    async fn is_authorized(&self, bound: &mut BoundEndpoint) -> Result<bool, EndpointError> {
        Ok(self.consumer_authorized(bound))
    }

    async fn is_permitted(&self, bound: &mut BoundEndpoint) -> Result<bool, EndpointError> {
        Ok(self.consumer_permitted(bound))
    }

    async fn is_valid(&self, bound: &mut BoundEndpoint) -> Result<bool, EndpointError> {
        let task: String = bound.require("task")?;
        if task.trim().is_empty() {
            bound.set_validation_message("task must not be blank");
            return Ok(false);
        }
        Ok(true)
    }

    async fn resource(&self, bound: &mut BoundEndpoint) -> Result<Resource, EndpointError> {
        let task: String = bound.require("task")?;
        let priority: String = bound.require("priority")?;
        Ok(Resource::object(Todo::new(task.trim(), priority)))
    }

    async fn finalize(&self, bound: &mut BoundEndpoint) -> Result<(), EndpointError> {
        self.save_resource(bound).await
    }
}

/// POST /todos with `complete_all`; marks every todo complete.
pub struct TodoBulkComplete {
    schema: Arc<EndpointSchema>,
    store: TodoStore,
}

impl TodoBulkComplete {
    pub fn new(store: TodoStore) -> Result<Self, SchemaError> {
        let schema = EndpointSchema::builder("TodoBulkComplete")
            .consumer_auth()
            .attribute(Attribute::field("complete_all").of_type(FieldType::Bool).required())
            .task(Task::immediate("complete", |bound| {
                Box::pin(async move {
                    if bound.value("complete_all") != Some(&Value::Bool(true)) {
                        return Ok(());
                    }
                    if let Resource::List(items) = bound.resource().await? {
                        for item in items.iter_mut() {
                            item.downcast_mut::<Todo>()?.completed = true;
                        }
                    }
                    Ok(())
                })
            }))
            .build()?;

        Ok(Self {
            schema: Arc::new(schema),
            store,
        })
    }
}

impl HasConsumerAuth for TodoBulkComplete {}

#[async_trait]
impl EndpointDefinition for TodoBulkComplete {
    fn name(&self) -> &'static str {
        "TodoBulkComplete"
    }

    fn schema(&self) -> Arc<EndpointSchema> {
        self.schema.clone()
    }

    async fn is_authorized(&self, bound: &mut BoundEndpoint) -> Result<bool, EndpointError> {
        Ok(self.consumer_authorized(bound))
    }

    async fn is_permitted(&self, bound: &mut BoundEndpoint) -> Result<bool, EndpointError> {
        Ok(self.consumer_permitted(bound))
    }

    async fn resource(&self, _bound: &mut BoundEndpoint) -> Result<Resource, EndpointError> {
        Ok(Resource::List(self.store.list().await?))
    }

    async fn finalize(&self, bound: &mut BoundEndpoint) -> Result<(), EndpointError> {
        if let Some(Resource::List(items)) = bound.cached_resource() {
            for item in items {
                self.store.save(item).await?;
            }
        }
        Ok(())
    }

    async fn response(&self, bound: &mut BoundEndpoint) -> Result<Resource, EndpointError> {
        let count = match bound.cached_resource() {
            Some(Resource::List(items)) if bound.value("complete_all") == Some(&Value::Bool(true)) => items.len(),
            _ => 0,
        };
        Ok(Resource::map([("completed", Resource::from(Value::from(count)))]))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListCriteria {
    pub priority: Option<String>,
    pub completed: Option<bool>,
}

impl ListCriteria {
    pub fn matches(&self, todo: &Todo) -> bool {
        self.priority.as_ref().map_or(true, |p| *p == todo.priority)
            && self.completed.map_or(true, |c| c == todo.completed)
    }
}

/// GET /todos, optionally narrowed by `priority` and `completed`.
pub struct TodoList {
    schema: Arc<EndpointSchema>,
    store: TodoStore,
}

impl TodoList {
    pub fn new(store: TodoStore) -> Result<Self, SchemaError> {
        let schema = EndpointSchema::builder("TodoList")
            .consumer_auth()
            .attribute(priority_attribute())
            .attribute(Attribute::field("completed").of_type(FieldType::Bool))
            .aggregate(Aggregate::new("criteria", |bound| {
                Ok(ListCriteria {
                    priority: bound.get("priority")?,
                    completed: bound.get("completed")?,
                })
            }))
            .build()?;

        Ok(Self {
            schema: Arc::new(schema),
            store,
        })
    }
}

impl HasConsumerAuth for TodoList {
    fn is_read_only(&self) -> bool {
        true
    }
}

#[async_trait]
impl EndpointDefinition for TodoList {
    fn name(&self) -> &'static str {
        "TodoList"
    }

    fn schema(&self) -> Arc<EndpointSchema> {
        self.schema.clone()
    }

    async fn is_authorized(&self, bound: &mut BoundEndpoint) -> Result<bool, EndpointError> {
        Ok(self.consumer_authorized(bound))
    }

    async fn is_permitted(&self, bound: &mut BoundEndpoint) -> Result<bool, EndpointError> {
        Ok(self.consumer_permitted(bound))
    }

    async fn resource(&self, bound: &mut BoundEndpoint) -> Result<Resource, EndpointError> {
        let criteria = bound
            .aggregate::<ListCriteria>("criteria")?
            .unwrap_or_default();
        let todos = self.store.list().await?;
        Ok(Resource::List(
            todos
                .into_iter()
                .filter(|r| r.downcast_ref::<Todo>().is_some_and(|t| criteria.matches(t)))
                .collect(),
        ))
    }
}

/// GET /todos/:id
pub struct TodoDetail {
    schema: Arc<EndpointSchema>,
    store: TodoStore,
    filter: Arc<ResponseFilter>,
}

impl TodoDetail {
    pub fn new(store: TodoStore) -> Result<Self, SchemaError> {
        let schema = EndpointSchema::builder("TodoDetail")
            .consumer_auth()
            .url_id("id")
            .build()?;

        Ok(Self {
            schema: Arc::new(schema),
            store,
            filter: detail_filter().shared(),
        })
    }
}

impl HasConsumerAuth for TodoDetail {
    fn is_read_only(&self) -> bool {
        true
    }
}

impl HasUrlBoundId for TodoDetail {}

#[async_trait]
impl HasResource for TodoDetail {
    fn model_name(&self) -> &'static str {
        "Todo"
    }

    fn store(&self) -> Arc<dyn ResourceStore> {
        todo_store(&self.store)
    }
}

#[async_trait]
impl EndpointDefinition for TodoDetail {
    fn name(&self) -> &'static str {
        "TodoDetail"
    }

    fn schema(&self) -> Arc<EndpointSchema> {
        self.schema.clone()
    }

    async fn is_authorized(&self, bound: &mut BoundEndpoint) -> Result<bool, EndpointError> {
        Ok(self.consumer_authorized(bound))
    }

    async fn is_permitted(&self, bound: &mut BoundEndpoint) -> Result<bool, EndpointError> {
        Ok(self.consumer_permitted(bound))
    }

    async fn resource(&self, bound: &mut BoundEndpoint) -> Result<Resource, EndpointError> {
        let id = self.resource_id(bound)?;
        self.load_resource(&id).await
    }

    fn response_filter(&self) -> Option<Arc<ResponseFilter>> {
        Some(self.filter.clone())
    }
}

/// GET /todos/lookup: find one todo by id or by its exact task text.
pub struct TodoLookup {
    schema: Arc<EndpointSchema>,
    store: TodoStore,
    filter: Arc<ResponseFilter>,
}

impl TodoLookup {
    pub fn new(store: TodoStore) -> Result<Self, SchemaError> {
        let schema = EndpointSchema::builder("TodoLookup")
            .consumer_auth()
            .attribute(Attribute::field("id"))
            .attribute(Attribute::field("task"))
            .group(FieldGroup::require_one(["id", "task"]))
            .build()?;

        Ok(Self {
            schema: Arc::new(schema),
            store,
            filter: detail_filter().shared(),
        })
    }
}

impl HasConsumerAuth for TodoLookup {
    fn is_read_only(&self) -> bool {
        true
    }
}

#[async_trait]
impl HasResource for TodoLookup {
    fn model_name(&self) -> &'static str {
        "Todo"
    }

    fn store(&self) -> Arc<dyn ResourceStore> {
        todo_store(&self.store)
    }
}

#[async_trait]
impl EndpointDefinition for TodoLookup {
    fn name(&self) -> &'static str {
        "TodoLookup"
    }

    fn schema(&self) -> Arc<EndpointSchema> {
        self.schema.clone()
    }

    async fn is_authorized(&self, bound: &mut BoundEndpoint) -> Result<bool, EndpointError> {
        Ok(self.consumer_authorized(bound))
    }

    async fn is_permitted(&self, bound: &mut BoundEndpoint) -> Result<bool, EndpointError> {
        Ok(self.consumer_permitted(bound))
    }

    async fn resource(&self, bound: &mut BoundEndpoint) -> Result<Resource, EndpointError> {
        if let Some(id) = bound.str("id") {
            return self.load_resource(id).await;
        }
        let task = bound.require::<String>("task")?;
        self.store
            .all()
            .await
            .into_iter()
            .find(|todo| todo.task == task)
            .map(Resource::object)
            .ok_or_else(|| EndpointError::not_found(format!("No todo with task '{}'", task)))
    }

    fn response_filter(&self) -> Option<Arc<ResponseFilter>> {
        Some(self.filter.clone())
    }
}

/// PUT/PATCH /todos/:id
pub struct TodoUpdate {
    schema: Arc<EndpointSchema>,
    store: TodoStore,
    filter: Arc<ResponseFilter>,
}

impl TodoUpdate {
    pub fn new(store: TodoStore) -> Result<Self, SchemaError> {
        let schema = EndpointSchema::builder("TodoUpdate")
            .consumer_auth()
            .url_id("id")
            .attribute(Attribute::resource_field("task"))
            .attribute(priority_attribute())
            .attribute(Attribute::resource_field("completed").of_type(FieldType::Bool))
            .mutation()
            .build()?;

        Ok(Self {
            schema: Arc::new(schema),
            store,
            filter: detail_filter().shared(),
        })
    }
}

impl HasConsumerAuth for TodoUpdate {}

impl HasUrlBoundId for TodoUpdate {}

#[async_trait]
impl HasResource for TodoUpdate {
    fn model_name(&self) -> &'static str {
        "Todo"
    }

    fn store(&self) -> Arc<dyn ResourceStore> {
        todo_store(&self.store)
    }
}

impl HasMutation for TodoUpdate {}

#[async_trait]
impl EndpointDefinition for TodoUpdate {
    fn name(&self) -> &'static str {
        "TodoUpdate"
    }

    fn schema(&self) -> Arc<EndpointSchema> {
        self.schema.clone()
    }

    async fn is_authorized(&self, bound: &mut BoundEndpoint) -> Result<bool, EndpointError> {
        Ok(self.consumer_authorized(bound))
    }

    async fn is_permitted(&self, bound: &mut BoundEndpoint) -> Result<bool, EndpointError> {
        Ok(self.consumer_permitted(bound))
    }

    async fn resource(&self, bound: &mut BoundEndpoint) -> Result<Resource, EndpointError> {
        let id = self.resource_id(bound)?;
        self.load_resource(&id).await
    }

    async fn finalize(&self, bound: &mut BoundEndpoint) -> Result<(), EndpointError> {
        self.persist(bound).await
    }

    fn response_filter(&self) -> Option<Arc<ResponseFilter>> {
        Some(self.filter.clone())
    }
}

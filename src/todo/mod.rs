//! Todo demo application: the endpoints the binary serves.

pub mod endpoints;
pub mod model;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use thiserror::Error;

use crate::adapter::{AdapterError, EndpointResource, EndpointRuntime};
use crate::auth::AuthenticatorRegistry;
use crate::config::AppConfig;
use crate::endpoint::{EndpointDefinition, SchemaError};
use crate::filter::FilterRegistry;
use crate::resource::MemoryStore;
use crate::tasks::{DisabledQueue, InProcessQueue, TaskQueue, TaskRegistry, TracingMonitor};

pub use endpoints::{
    ListCriteria, Notifications, Ping, TodoBulkComplete, TodoCreate, TodoDetail, TodoList, TodoLookup, TodoStore,
    TodoUpdate,
};
pub use model::{Owner, Todo};

/// Filter registered for the todo models; used as the default layer when
/// configuration names none.
pub const TODO_FILTER: &str = "todo";

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("Invalid endpoint declaration: {0}")]
    Schema(#[from] SchemaError),
}

/// The mounted router plus handles tests and operators inspect.
pub struct TodoApp {
    pub router: Router,
    pub store: TodoStore,
    pub notifications: Notifications,
    /// `None` when deferred tasks are forced synchronous.
    pub queue: Option<InProcessQueue>,
}

/// Build the application. Must be called inside a tokio runtime.
pub fn build_app(config: &AppConfig) -> Result<TodoApp, AppError> {
    let mut config = config.clone();
    if config.filter.default_filter.is_none() {
        config.filter.default_filter = Some(TODO_FILTER.to_string());
    }

    let mut filters = FilterRegistry::new();
    filters.register(TODO_FILTER, model::default_filter());
    let authenticators = AuthenticatorRegistry::with_defaults(&config.security.jwt_secret);

    let registry = Arc::new(TaskRegistry::new());
    let (queue, worker): (Arc<dyn TaskQueue>, Option<InProcessQueue>) = if config.tasks.force_synchronous {
        (Arc::new(DisabledQueue), None)
    } else {
        let worker = InProcessQueue::start(registry.clone(), Arc::new(TracingMonitor));
        (Arc::new(worker.clone()), Some(worker))
    };

    let runtime = EndpointRuntime::from_config(&config, &filters, &authenticators, queue, registry)?.shared();

    let store: TodoStore = Arc::new(MemoryStore::new());
    let notifications = Notifications::default();

    let ping_def: Arc<dyn EndpointDefinition> = Arc::new(Ping::new()?);
    let ping = EndpointResource::new(runtime.clone())
        .get(vec![ping_def])
        .allow_anonymous()
        .build();

    let create: Arc<dyn EndpointDefinition> = Arc::new(TodoCreate::new(store.clone(), notifications.clone())?);
    let list: Arc<dyn EndpointDefinition> = Arc::new(TodoList::new(store.clone())?);
    let todos = EndpointResource::new(runtime.clone())
        .get(vec![list])
        .post(vec![create, Arc::new(TodoBulkComplete::new(store.clone())?)])
        .build();

    let lookup: Arc<dyn EndpointDefinition> = Arc::new(TodoLookup::new(store.clone())?);
    let todo_lookup = EndpointResource::new(runtime.clone()).get(vec![lookup]).build();

    let update: Arc<dyn EndpointDefinition> = Arc::new(TodoUpdate::new(store.clone())?);
    let detail: Arc<dyn EndpointDefinition> = Arc::new(TodoDetail::new(store.clone())?);
    let todo = EndpointResource::new(runtime)
        .get(vec![detail])
        .put(vec![update.clone()])
        .patch(vec![update])
        .build();

    let docs = json!({
        "/ping": ping.documentation(),
        "/todos": todos.documentation(),
        "/todos/lookup": todo_lookup.documentation(),
        "/todos/:id": todo.documentation(),
    });

    tracing::info!(
        "Mounted todo endpoints (default filter: {:?}, synchronous tasks: {})",
        config.filter.default_filter,
        config.tasks.force_synchronous
    );

    let router = Router::new()
        .route("/health", get(health))
        .route("/docs", get(move || async move { Json(docs) }))
        .route("/ping", ping.method_router())
        .route("/todos", todos.method_router())
        .route("/todos/lookup", todo_lookup.method_router())
        .route("/todos/:id", todo.method_router())
        .layer(DefaultBodyLimit::max(config.api.max_request_size_bytes));

    Ok(TodoApp {
        router,
        store,
        notifications,
        queue: worker,
    })
}

async fn health() -> impl IntoResponse {
    Json::<Value>(json!({
        "success": true,
        "data": {
            "status": "ok",
            "timestamp": chrono::Utc::now(),
        }
    }))
}

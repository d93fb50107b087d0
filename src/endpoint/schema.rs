use std::collections::{HashMap, HashSet};

use serde_json::{json, Value};
use thiserror::Error;

use crate::endpoint::attributes::{Aggregate, Attribute, FieldGroup};
use crate::endpoint::capabilities::mutation_tasks;
use crate::tasks::Task;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("{endpoint}: duplicate {kind} '{name}'")]
    Duplicate {
        endpoint: String,
        kind: &'static str,
        name: String,
    },

    #[error("{endpoint}: '{owner}' depends on unknown {kind} '{dependency}'")]
    UnknownDependency {
        endpoint: String,
        kind: &'static str,
        owner: String,
        dependency: String,
    },

    #[error("{endpoint}: dependency cycle through {kind} '{name}'")]
    Cycle {
        endpoint: String,
        kind: &'static str,
        name: String,
    },

    #[error("{endpoint}: immediate task '{task}' cannot depend on deferred task '{dependency}'")]
    PhaseOrder {
        endpoint: String,
        task: String,
        dependency: String,
    },

    #[error("{endpoint}: field group references unknown field '{field}'")]
    UnknownGroupField { endpoint: String, field: String },
}

/// The declared attributes, aggregates and tasks of one endpoint
/// definition, validated and ordered once when the definition is built.
#[derive(Debug)]
pub struct EndpointSchema {
    endpoint: String,
    attributes: Vec<Attribute>,
    groups: Vec<FieldGroup>,
    aggregates: Vec<Aggregate>,
    tasks: Vec<Task>,
    immediate_order: Vec<usize>,
    deferred_order: Vec<usize>,
}

impl EndpointSchema {
    pub fn builder(endpoint: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(endpoint)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn groups(&self) -> &[FieldGroup] {
        &self.groups
    }

    pub fn aggregates(&self) -> &[Aggregate] {
        &self.aggregates
    }

    pub fn aggregate(&self, name: &str) -> Option<&Aggregate> {
        self.aggregates.iter().find(|a| a.name == name)
    }

    /// Every task, in declaration order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Immediate tasks in execution order.
    pub fn immediate_tasks(&self) -> impl Iterator<Item = &Task> {
        self.immediate_order.iter().map(move |&i| &self.tasks[i])
    }

    /// Deferred tasks in dispatch order.
    pub fn deferred_tasks(&self) -> impl Iterator<Item = &Task> {
        self.deferred_order.iter().map(move |&i| &self.tasks[i])
    }

    /// Api names of the request fields this endpoint accepts.
    pub fn field_names(&self) -> HashSet<&str> {
        self.attributes
            .iter()
            .filter(|a| a.is_request_field())
            .map(|a| a.api_name.as_str())
            .collect()
    }

    pub fn documentation(&self) -> Value {
        json!({
            "endpoint": self.endpoint,
            "attributes": self.attributes.iter().map(Attribute::documentation).collect::<Vec<_>>(),
            "aggregates": self.aggregates.iter().map(|a| json!({
                "name": a.name,
                "depends_on": a.depends_on,
                "required": a.required,
            })).collect::<Vec<_>>(),
            "tasks": self.immediate_tasks().chain(self.deferred_tasks()).map(|t| json!({
                "name": t.name,
                "priority": t.priority,
                "depends_on": t.depends_on,
                "deferred": t.is_deferred(),
            })).collect::<Vec<_>>(),
        })
    }
}

pub struct SchemaBuilder {
    endpoint: String,
    attributes: Vec<Attribute>,
    groups: Vec<FieldGroup>,
    aggregates: Vec<Aggregate>,
    tasks: Vec<Task>,
}

impl SchemaBuilder {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            attributes: Vec::new(),
            groups: Vec::new(),
            aggregates: Vec::new(),
            tasks: Vec::new(),
        }
    }

    pub fn attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn group(mut self, group: FieldGroup) -> Self {
        self.groups.push(group);
        self
    }

    pub fn aggregate(mut self, aggregate: Aggregate) -> Self {
        self.aggregates.push(aggregate);
        self
    }

    pub fn task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    /// Require an authenticated consumer; binding without one is forbidden.
    pub fn consumer_auth(self) -> Self {
        self.attribute(Attribute::consumer("consumer_key", "key").required())
    }

    /// Bind a required path parameter as the resource id.
    pub fn url_id(self, name: impl Into<String>) -> Self {
        self.attribute(Attribute::url(name))
    }

    /// Reject unexpected body fields and copy resource fields onto the resource.
    pub fn mutation(mut self) -> Self {
        self.tasks.extend(mutation_tasks());
        self
    }

    pub fn build(self) -> Result<EndpointSchema, SchemaError> {
        let endpoint = self.endpoint;

        check_unique(&endpoint, "attribute", self.attributes.iter().map(|a| a.name.as_str()))?;
        check_unique(&endpoint, "aggregate", self.aggregates.iter().map(|a| a.name.as_str()))?;
        check_unique(&endpoint, "task", self.tasks.iter().map(|t| t.name.as_str()))?;

        for group in &self.groups {
            for field in &group.fields {
                if !self.attributes.iter().any(|a| &a.name == field) {
                    return Err(SchemaError::UnknownGroupField {
                        endpoint: endpoint.clone(),
                        field: field.clone(),
                    });
                }
            }
        }

        let aggregate_deps: HashMap<&str, Vec<&str>> = self
            .aggregates
            .iter()
            .map(|a| (a.name.as_str(), a.depends_on.iter().map(String::as_str).collect()))
            .collect();
        check_acyclic(&endpoint, "aggregate", &aggregate_deps)?;

        let task_index: HashMap<&str, usize> = self
            .tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.as_str(), i))
            .collect();
        let task_deps: HashMap<&str, Vec<&str>> = self
            .tasks
            .iter()
            .map(|t| (t.name.as_str(), t.depends_on.iter().map(String::as_str).collect()))
            .collect();
        check_acyclic(&endpoint, "task", &task_deps)?;

        for task in &self.tasks {
            if let Some(dep) = &task.depends_on {
                let dep_task = &self.tasks[task_index[dep.as_str()]];
                if !task.is_deferred() && dep_task.is_deferred() {
                    return Err(SchemaError::PhaseOrder {
                        endpoint: endpoint.clone(),
                        task: task.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let immediate_order = order_tasks(&self.tasks, |t| !t.is_deferred());
        let deferred_order = order_tasks(&self.tasks, Task::is_deferred);

        Ok(EndpointSchema {
            endpoint,
            attributes: self.attributes,
            groups: self.groups,
            aggregates: self.aggregates,
            tasks: self.tasks,
            immediate_order,
            deferred_order,
        })
    }
}

fn check_unique<'a>(
    endpoint: &str,
    kind: &'static str,
    names: impl Iterator<Item = &'a str>,
) -> Result<(), SchemaError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(SchemaError::Duplicate {
                endpoint: endpoint.to_string(),
                kind,
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

fn check_acyclic(
    endpoint: &str,
    kind: &'static str,
    deps: &HashMap<&str, Vec<&str>>,
) -> Result<(), SchemaError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        name: &'a str,
        endpoint: &str,
        kind: &'static str,
        deps: &HashMap<&'a str, Vec<&'a str>>,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> Result<(), SchemaError> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                return Err(SchemaError::Cycle {
                    endpoint: endpoint.to_string(),
                    kind,
                    name: name.to_string(),
                })
            }
            None => {}
        }
        marks.insert(name, Mark::Visiting);
        for &dep in deps.get(name).map(Vec::as_slice).unwrap_or(&[]) {
            if !deps.contains_key(dep) {
                return Err(SchemaError::UnknownDependency {
                    endpoint: endpoint.to_string(),
                    kind,
                    owner: name.to_string(),
                    dependency: dep.to_string(),
                });
            }
            visit(dep, endpoint, kind, deps, marks)?;
        }
        marks.insert(name, Mark::Done);
        Ok(())
    }

    let mut marks = HashMap::new();
    let mut names: Vec<&str> = deps.keys().copied().collect();
    names.sort_unstable();
    for name in names {
        visit(name, endpoint, kind, deps, &mut marks)?;
    }
    Ok(())
}

/// Stable sort by priority, then pull each task's dependency in ahead of it.
/// Dependencies outside the selected phase are already satisfied.
fn order_tasks(tasks: &[Task], in_phase: impl Fn(&Task) -> bool) -> Vec<usize> {
    let mut by_priority: Vec<usize> = (0..tasks.len()).filter(|&i| in_phase(&tasks[i])).collect();
    by_priority.sort_by_key(|&i| tasks[i].priority);

    let index: HashMap<&str, usize> = tasks.iter().enumerate().map(|(i, t)| (t.name.as_str(), i)).collect();
    let mut placed = vec![false; tasks.len()];
    let mut order = Vec::with_capacity(by_priority.len());

    fn place(
        i: usize,
        tasks: &[Task],
        index: &HashMap<&str, usize>,
        in_phase: &dyn Fn(&Task) -> bool,
        placed: &mut [bool],
        order: &mut Vec<usize>,
    ) {
        if placed[i] {
            return;
        }
        placed[i] = true;
        if let Some(dep) = tasks[i].depends_on.as_deref().and_then(|d| index.get(d)) {
            if in_phase(&tasks[*dep]) {
                place(*dep, tasks, index, in_phase, placed, order);
            }
        }
        order.push(i);
    }

    for i in by_priority {
        place(i, tasks, &index, &in_phase, &mut placed, &mut order);
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::DeferredTask;

    fn noop(name: &str) -> Task {
        Task::immediate(name, |_| Box::pin(async { Ok(()) }))
    }

    fn names(schema: &EndpointSchema) -> Vec<&str> {
        schema.immediate_tasks().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn orders_by_priority_with_stable_ties() {
        let schema = EndpointSchema::builder("E")
            .task(noop("c").priority(5))
            .task(noop("a").priority(1))
            .task(noop("b").priority(1))
            .build()
            .unwrap();
        assert_eq!(names(&schema), vec!["a", "b", "c"]);
    }

    fn permutations(items: &[i32]) -> Vec<Vec<i32>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let head = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head);
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn dependency_runs_first_for_every_priority_permutation() {
        for priorities in permutations(&[-3, 0, 2, 7]) {
            let schema = EndpointSchema::builder("E")
                .task(noop("w").priority(priorities[0]))
                .task(noop("dependent").priority(priorities[1]).depends_on("dependency"))
                .task(noop("x").priority(priorities[2]))
                .task(noop("dependency").priority(priorities[3]))
                .build()
                .unwrap();
            let order = names(&schema);
            let dep = order.iter().position(|n| *n == "dependency").unwrap();
            let dependent = order.iter().position(|n| *n == "dependent").unwrap();
            assert!(dep < dependent, "priorities {:?} gave order {:?}", priorities, order);
            assert_eq!(order.len(), 4);
        }
    }

    #[test]
    fn separates_immediate_and_deferred_phases() {
        let schema = EndpointSchema::builder("E")
            .task(Task::deferred("notify", DeferredTask::new(|_| async { Ok(()) })).priority(-10))
            .task(noop("save"))
            .build()
            .unwrap();
        assert_eq!(names(&schema), vec!["save"]);
        let deferred: Vec<_> = schema.deferred_tasks().map(|t| t.name.as_str()).collect();
        assert_eq!(deferred, vec!["notify"]);
    }

    #[test]
    fn rejects_cycles_and_unknown_dependencies() {
        let cycle = EndpointSchema::builder("E")
            .task(noop("a").depends_on("b"))
            .task(noop("b").depends_on("a"))
            .build();
        assert!(matches!(cycle, Err(SchemaError::Cycle { kind: "task", .. })));

        let unknown = EndpointSchema::builder("E").task(noop("a").depends_on("zzz")).build();
        assert!(matches!(unknown, Err(SchemaError::UnknownDependency { .. })));

        let aggregates = EndpointSchema::builder("E")
            .aggregate(Aggregate::new("x", |_| Ok(1)).depends_on("y"))
            .aggregate(Aggregate::new("y", |_| Ok(2)).depends_on("x"))
            .build();
        assert!(matches!(aggregates, Err(SchemaError::Cycle { kind: "aggregate", .. })));
    }

    #[test]
    fn rejects_duplicates_and_phase_inversions() {
        let dup = EndpointSchema::builder("E")
            .attribute(Attribute::field("task"))
            .attribute(Attribute::field("task"))
            .build();
        assert!(matches!(dup, Err(SchemaError::Duplicate { kind: "attribute", .. })));

        let inverted = EndpointSchema::builder("E")
            .task(Task::deferred("later", DeferredTask::new(|_| async { Ok(()) })))
            .task(noop("now").depends_on("later"))
            .build();
        assert!(matches!(inverted, Err(SchemaError::PhaseOrder { .. })));
    }
}

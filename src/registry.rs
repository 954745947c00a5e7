use std::collections::HashMap;
use std::sync::Arc;

use crate::error::CrawlError;
use crate::script::{ScriptEngine, TaskModel};
use crate::task::{Seed, Task};

/// Configured tasks by name.
///
/// Filled in at startup; once handed to the engine it is only read, so it
/// needs no locking.
#[derive(Clone, Debug, Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, Arc<Task>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the task, replacing any task of the same name.
    pub fn register(&mut self, task: Task) -> Arc<Task> {
        let task = Arc::new(task);
        if self.tasks.insert(task.name().to_owned(), task.clone()).is_some() {
            log::warn!("task `{}` registered twice, keeping the latest", task.name());
        }
        task
    }

    /// Builds a script-backed task from `model` and registers it.
    pub fn register_script_task(
        &mut self,
        model: TaskModel,
        engine: Arc<dyn ScriptEngine>,
    ) -> Arc<Task> {
        self.register(model.into_task(engine))
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<Task>, CrawlError> {
        self.tasks
            .get(name)
            .cloned()
            .ok_or_else(|| CrawlError::TaskNotFound(name.to_owned()))
    }

    /// Field names produced by rule `rule` of task `task`.
    pub fn item_fields(&self, task: &str, rule: &str) -> Option<&[String]> {
        self.tasks
            .get(task)?
            .rule
            .trunk
            .get(rule)
            .map(|r| r.item_fields.as_slice())
    }

    /// Rewires a registered task with the collaborators carried by `seed`.
    pub fn bind(&mut self, seed: &Seed) -> Result<Arc<Task>, CrawlError> {
        let registered = self.lookup(&seed.name)?;
        let mut task = Task::clone(&registered);
        seed.apply(&mut task);
        let task = Arc::new(task);
        self.tasks.insert(seed.name.clone(), task.clone());
        Ok(task)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }
}

//! Converts task names to runnable task code.
//!
//! Master and workers run the same executable, so both sides populate an
//! identical registry at startup. Registration needs `&mut Registry`; once
//! setup is done the registry goes behind an [`Arc`] and is only read.
//!
//! # Example
//! ```
//! use gridmap::{task, Registry};
//!
//! let mut registry = Registry::new();
//! registry.register("square", task::func(|x: f64| x * x)).unwrap();
//! assert!(registry.register("square", task::func(|x: f64| x)).is_err());
//! assert!(registry.get("square").is_ok());
//! ```

use crate::error::{Error, Result};
use crate::partition::ChunkOptions;
use crate::task::{ChunkTask, DynTask, Task};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Per-task settings that travel with the registration.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    /// Resource request handed to the job driver (e.g. `h_vmem=4G`).
    pub resources: Option<String>,
    /// Batch items into chunks before dispatch.
    pub chunk: Option<ChunkOptions>,
    /// Keep the workers' stdout; the job driver discards it otherwise.
    pub keep_stdout: bool,
    /// Keep the workers' stderr; the job driver discards it otherwise.
    pub keep_stderr: bool,
}

/// A registered task.
#[derive(Clone)]
pub struct Entry {
    task: Arc<dyn DynTask>,
    options: TaskOptions,
}

impl Entry {
    pub fn task(&self) -> &Arc<dyn DynTask> {
        &self.task
    }

    pub fn options(&self) -> &TaskOptions {
        &self.options
    }

    pub fn chunk(&self) -> Option<ChunkOptions> {
        self.options.chunk
    }
}

#[derive(Clone, Default)]
pub struct Registry {
    tasks: BTreeMap<String, Entry>,
}

/// Names end up on a worker's command line, so keep them to characters
/// that survive any shell or scheduler unquoted.
fn validate_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidTaskName(name.to_string()))
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `task` under `name`.
    ///
    /// Fails if the name is already taken or cannot be passed as a process
    /// argument.
    pub fn register<T: Task>(&mut self, name: &str, task: T) -> Result<()> {
        self.register_with(name, task, TaskOptions::default())
    }

    /// Registers a task whose items are batched into chunks before dispatch.
    pub fn register_chunked<T: Task>(&mut self, name: &str, task: T, chunk: ChunkOptions) -> Result<()> {
        let options = TaskOptions {
            chunk: Some(chunk),
            ..TaskOptions::default()
        };
        self.register_with(name, task, options)
    }

    pub fn register_with<T: Task>(&mut self, name: &str, task: T, options: TaskOptions) -> Result<()> {
        validate_name(name)?;
        if self.tasks.contains_key(name) {
            return Err(Error::DuplicateTask(name.to_string()));
        }
        // A chunked task runs over whole groups on the worker side.
        let task: Arc<dyn DynTask> = match options.chunk {
            Some(_) => Arc::new(ChunkTask::new(task)),
            None => Arc::new(task),
        };
        self.tasks.insert(name.to_string(), Entry { task, options });
        tracing::debug!(task = name, "registered task");
        Ok(())
    }

    /// Looks up a task by name.
    pub fn get(&self, name: &str) -> Result<&Entry> {
        self.tasks
            .get(name)
            .ok_or_else(|| Error::TaskNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

use serde::{Deserialize, Serialize};

/// A unit of work supplied by a task source.
///
/// `id` is assigned by the source: a line number for markdown files, a list
/// index for YAML files, an issue number for GitHub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_group: Option<u32>,
}

impl Task {
    pub fn new(id: u64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            completed: false,
            parallel_group: None,
        }
    }
}

/// Ordered partition of pending tasks into groups of at most `max_parallel`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPlan {
    pub batches: Vec<Vec<Task>>,
}

impl BatchPlan {
    /// Split `tasks` positionally. A `max_parallel` of 0 is treated as 1.
    ///
    /// `parallel_group` is not consulted; batch membership is determined by
    /// list position alone.
    pub fn plan(tasks: &[Task], max_parallel: usize) -> Self {
        let size = max_parallel.max(1);
        Self {
            batches: tasks.chunks(size).map(|chunk| chunk.to_vec()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.batches.iter().map(Vec::len).collect()
    }
}

/// Convenience wrapper around [`BatchPlan::plan`].
pub fn plan_batches(tasks: &[Task], max_parallel: usize) -> BatchPlan {
    BatchPlan::plan(tasks, max_parallel)
}

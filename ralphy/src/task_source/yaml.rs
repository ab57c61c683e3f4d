use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::{TaskSource, TaskSourceError};
use crate::types::Task;

#[derive(Debug, Default, Serialize, Deserialize)]
struct TaskFile {
    #[serde(default)]
    tasks: Vec<TaskEntry>,
    /// Top-level keys other than `tasks`, kept so rewrites don't drop them.
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TaskEntry {
    title: String,
    #[serde(default)]
    completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parallel_group: Option<u32>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

/// Task list stored as `tasks: [{title, completed, parallel_group}]`.
/// Task id is the entry's index in the list.
pub struct YamlSource {
    path: PathBuf,
}

impl YamlSource {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.is_file() {
            return Err(TaskSourceError::NotFound(path).into());
        }
        let source = Self { path };
        // Surface syntax errors at open time rather than mid-run
        source.load()?;
        Ok(source)
    }

    fn load(&self) -> Result<TaskFile> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(TaskFile::default());
        }
        serde_yaml::from_str(&content).map_err(|e| {
            TaskSourceError::Parse {
                path: self.path.clone(),
                message: e.to_string(),
            }
            .into()
        })
    }

    fn tasks(&self) -> Result<Vec<Task>> {
        Ok(self
            .load()?
            .tasks
            .into_iter()
            .enumerate()
            .map(|(i, entry)| Task {
                id: i as u64,
                title: entry.title,
                completed: entry.completed,
                parallel_group: entry.parallel_group,
            })
            .collect())
    }
}

impl TaskSource for YamlSource {
    fn all_pending(&self) -> Result<Vec<Task>> {
        Ok(self.tasks()?.into_iter().filter(|t| !t.completed).collect())
    }

    fn mark_complete(&mut self, id: u64) -> Result<()> {
        let mut file = self.load()?;
        let entry = file
            .tasks
            .get_mut(id as usize)
            .ok_or(TaskSourceError::UnknownTask(id))?;
        if entry.completed {
            return Ok(());
        }
        entry.completed = true;
        let yaml = serde_yaml::to_string(&file)?;
        std::fs::write(&self.path, yaml)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }

    fn count_completed(&self) -> Result<usize> {
        Ok(self.tasks()?.iter().filter(|t| t.completed).count())
    }

    fn artifact_path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn describe(&self) -> String {
        format!("yaml ({})", self.path.display())
    }
}

//! Task sources - ordered pending work plus completion recording
//!
//! The orchestrator only talks to [`TaskSource`]; storage details stay in the
//! concrete implementations.

pub mod github;
pub mod markdown;
pub mod yaml;

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::types::{SourceConfig, SourceKind, Task};

pub use github::GithubSource;
pub use markdown::MarkdownSource;
pub use yaml::YamlSource;

/// Errors specific to task source storage
#[derive(Debug, thiserror::Error)]
pub enum TaskSourceError {
    #[error("Task file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("Failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("No task with id {0}")]
    UnknownTask(u64),
    #[error("{command} failed: {stderr}")]
    Command { command: String, stderr: String },
    #[error(transparent)]
    Pattern(#[from] regex::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub trait TaskSource: Send {
    /// Pending tasks in priority order.
    fn all_pending(&self) -> Result<Vec<Task>>;

    /// Record a task as done. Marking an already completed task is a no-op.
    fn mark_complete(&mut self, id: u64) -> Result<()>;

    fn count_completed(&self) -> Result<usize>;

    fn next_task(&self) -> Result<Option<Task>> {
        Ok(self.all_pending()?.into_iter().next())
    }

    fn count_remaining(&self) -> Result<usize> {
        Ok(self.all_pending()?.len())
    }

    /// Backing file an agent needs inside its workspace, if any.
    fn artifact_path(&self) -> Option<&Path> {
        None
    }

    /// Short human-readable label for banners.
    fn describe(&self) -> String;
}

/// Open the configured source. Relative file paths resolve against `root`.
pub fn open_source(config: &SourceConfig, root: &Path) -> Result<Box<dyn TaskSource>> {
    match config.kind {
        SourceKind::Markdown | SourceKind::Yaml => {
            let file = config.resolved_path().unwrap_or_default();
            let path = if Path::new(&file).is_absolute() {
                PathBuf::from(&file)
            } else {
                root.join(&file)
            };
            if config.kind == SourceKind::Markdown {
                Ok(Box::new(MarkdownSource::open(path)?))
            } else {
                Ok(Box::new(YamlSource::open(path)?))
            }
        }
        SourceKind::Github => {
            let repo = config.github_repo.clone().ok_or_else(|| {
                anyhow::anyhow!("source.github_repo is required for the github source")
            })?;
            Ok(Box::new(GithubSource::new(
                repo,
                config.github_label.clone(),
            )))
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use super::*;

    /// In-memory source that records how often each id is marked.
    pub struct MemorySource {
        pub tasks: Vec<Task>,
        pub marks: Arc<Mutex<HashMap<u64, u32>>>,
    }

    impl MemorySource {
        pub fn with_titles(titles: &[&str]) -> Self {
            Self {
                tasks: titles
                    .iter()
                    .enumerate()
                    .map(|(i, t)| Task::new(i as u64, *t))
                    .collect(),
                marks: Arc::new(Mutex::new(HashMap::new())),
            }
        }
    }

    impl TaskSource for MemorySource {
        fn all_pending(&self) -> Result<Vec<Task>> {
            Ok(self.tasks.iter().filter(|t| !t.completed).cloned().collect())
        }

        fn mark_complete(&mut self, id: u64) -> Result<()> {
            let task = self
                .tasks
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or(TaskSourceError::UnknownTask(id))?;
            if !task.completed {
                task.completed = true;
                *self.marks.lock().unwrap().entry(id).or_insert(0) += 1;
            }
            Ok(())
        }

        fn count_completed(&self) -> Result<usize> {
            Ok(self.tasks.iter().filter(|t| t.completed).count())
        }

        fn describe(&self) -> String {
            "memory".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_markdown_relative_to_root() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("PRD.md"), "- [ ] First\n").unwrap();
        let source = open_source(&SourceConfig::default(), tmp.path()).unwrap();
        assert_eq!(source.count_remaining().unwrap(), 1);
        assert_eq!(source.artifact_path(), Some(tmp.path().join("PRD.md").as_path()));
    }

    #[test]
    fn test_open_missing_file_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let err = open_source(&SourceConfig::default(), tmp.path()).err().unwrap();
        assert!(err.to_string().contains("PRD.md"));
    }

    #[test]
    fn test_open_github_requires_repo() {
        let config = SourceConfig {
            kind: SourceKind::Github,
            ..Default::default()
        };
        assert!(open_source(&config, Path::new(".")).is_err());
    }

    #[test]
    fn test_default_next_task_is_first_pending() {
        let mut source = testing::MemorySource::with_titles(&["a", "b"]);
        source.mark_complete(0).unwrap();
        assert_eq!(source.next_task().unwrap().map(|t| t.title), Some("b".into()));
        assert_eq!(source.count_remaining().unwrap(), 1);
    }
}

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;

use super::{TaskSource, TaskSourceError};
use crate::types::Task;

const CHECKBOX_PATTERN: &str = r"^\s*[-*] \[([ xX])\] (.+?)\s*$";

fn checkbox_re() -> Result<Regex, TaskSourceError> {
    Ok(Regex::new(CHECKBOX_PATTERN)?)
}

/// Checkbox list in a markdown document.
///
/// Each `- [ ] title` line is a pending task whose id is its zero-based line
/// number. The file is re-read on every query so edits made by the agent are
/// picked up.
pub struct MarkdownSource {
    path: PathBuf,
}

impl MarkdownSource {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.is_file() {
            return Err(TaskSourceError::NotFound(path).into());
        }
        Ok(Self { path })
    }

    fn read(&self) -> Result<String> {
        std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))
    }

    fn tasks(&self) -> Result<Vec<Task>> {
        Ok(parse_checkboxes(&self.read()?)?)
    }
}

/// Extract checkbox tasks from markdown text.
pub fn parse_checkboxes(content: &str) -> Result<Vec<Task>, TaskSourceError> {
    let re = checkbox_re()?;
    Ok(content
        .lines()
        .enumerate()
        .filter_map(|(line_no, line)| {
            let caps = re.captures(line)?;
            Some(Task {
                id: line_no as u64,
                title: caps[2].to_string(),
                completed: &caps[1] != " ",
                parallel_group: None,
            })
        })
        .collect())
}

/// Tick the checkbox on `line_no`, preserving every other byte.
///
/// Returns `Ok(None)` when the line is already ticked.
fn tick_line(content: &str, line_no: usize) -> Result<Option<String>, TaskSourceError> {
    let re = checkbox_re()?;
    let mut out = String::with_capacity(content.len());
    let mut changed = None;

    for (i, line) in content.split_inclusive('\n').enumerate() {
        if i != line_no {
            out.push_str(line);
            continue;
        }
        let body = line.trim_end_matches(['\n', '\r']);
        let caps = re
            .captures(body)
            .ok_or(TaskSourceError::UnknownTask(line_no as u64))?;
        if &caps[1] != " " {
            changed = Some(false);
            out.push_str(line);
        } else {
            changed = Some(true);
            out.push_str(&line.replacen("[ ]", "[x]", 1));
        }
    }

    match changed {
        Some(true) => Ok(Some(out)),
        Some(false) => Ok(None),
        None => Err(TaskSourceError::UnknownTask(line_no as u64)),
    }
}

impl TaskSource for MarkdownSource {
    fn all_pending(&self) -> Result<Vec<Task>> {
        Ok(self.tasks()?.into_iter().filter(|t| !t.completed).collect())
    }

    fn mark_complete(&mut self, id: u64) -> Result<()> {
        let content = self.read()?;
        if let Some(updated) = tick_line(&content, id as usize)? {
            std::fs::write(&self.path, updated)
                .with_context(|| format!("Failed to write {}", self.path.display()))?;
        }
        Ok(())
    }

    fn count_completed(&self) -> Result<usize> {
        Ok(self.tasks()?.iter().filter(|t| t.completed).count())
    }

    fn artifact_path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn describe(&self) -> String {
        format!("markdown ({})", self.path.display())
    }
}

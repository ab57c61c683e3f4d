use std::collections::HashSet;
use std::process::Command;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use super::{TaskSource, TaskSourceError};
use crate::types::Task;

#[derive(Debug, Deserialize)]
struct IssueSummary {
    number: u64,
    title: String,
}

/// Open issues of a GitHub repository, read and closed through the `gh` CLI.
pub struct GithubSource {
    repo: String,
    label: Option<String>,
    closed: HashSet<u64>,
}

impl GithubSource {
    pub fn new(repo: String, label: Option<String>) -> Self {
        Self {
            repo,
            label,
            closed: HashSet::new(),
        }
    }

    fn list_args(&self) -> Vec<String> {
        let mut args = vec![
            "issue".to_string(),
            "list".to_string(),
            "--repo".to_string(),
            self.repo.clone(),
            "--state".to_string(),
            "open".to_string(),
            "--json".to_string(),
            "number,title".to_string(),
            "--limit".to_string(),
            "500".to_string(),
        ];
        if let Some(ref label) = self.label {
            args.push("--label".to_string());
            args.push(label.clone());
        }
        args
    }

    fn gh(&self, args: &[String]) -> Result<String> {
        debug!(repo = %self.repo, ?args, "Running gh");
        let output = Command::new("gh")
            .args(args)
            .output()
            .context("Failed to run gh")?;
        if !output.status.success() {
            return Err(TaskSourceError::Command {
                command: format!("gh {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Parse `gh issue list --json number,title` output, ascending by number.
pub fn parse_issue_list(json: &str) -> Result<Vec<Task>> {
    let mut issues: Vec<IssueSummary> =
        serde_json::from_str(json).context("Failed to parse gh issue list output")?;
    issues.sort_by_key(|issue| issue.number);
    Ok(issues
        .into_iter()
        .map(|issue| Task::new(issue.number, issue.title))
        .collect())
}

impl TaskSource for GithubSource {
    fn all_pending(&self) -> Result<Vec<Task>> {
        let stdout = self.gh(&self.list_args())?;
        let tasks = parse_issue_list(&stdout)?;
        // gh may briefly still list an issue that was just closed
        Ok(tasks
            .into_iter()
            .filter(|t| !self.closed.contains(&t.id))
            .collect())
    }

    fn mark_complete(&mut self, id: u64) -> Result<()> {
        if self.closed.contains(&id) {
            return Ok(());
        }
        let args = vec![
            "issue".to_string(),
            "close".to_string(),
            id.to_string(),
            "--repo".to_string(),
            self.repo.clone(),
        ];
        self.gh(&args)?;
        self.closed.insert(id);
        Ok(())
    }

    fn count_completed(&self) -> Result<usize> {
        Ok(self.closed.len())
    }

    fn describe(&self) -> String {
        match self.label {
            Some(ref label) => format!("github ({}, label {})", self.repo, label),
            None => format!("github ({})", self.repo),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_issue_list_sorted() {
        let json = r#"[{"number":12,"title":"Fix footer"},{"number":3,"title":"Add login"}]"#;
        let tasks = parse_issue_list(json).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, 3);
        assert_eq!(tasks[0].title, "Add login");
        assert_eq!(tasks[1].id, 12);
        assert!(!tasks[1].completed);
    }

    #[test]
    fn test_parse_issue_list_empty() {
        assert!(parse_issue_list("[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_issue_list_invalid() {
        assert!(parse_issue_list("not json").is_err());
    }

    #[test]
    fn test_list_args_with_label() {
        let source = GithubSource::new("acme/widgets".into(), Some("ralphy".into()));
        let args = source.list_args();
        assert!(args.windows(2).any(|w| w == ["--repo", "acme/widgets"]));
        assert!(args.windows(2).any(|w| w == ["--label", "ralphy"]));
        assert_eq!(source.describe(), "github (acme/widgets, label ralphy)");
    }

    #[test]
    fn test_list_args_without_label() {
        let source = GithubSource::new("acme/widgets".into(), None);
        assert!(!source.list_args().contains(&"--label".to_string()));
        assert_eq!(source.count_completed().unwrap(), 0);
    }
}

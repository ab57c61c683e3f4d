//! Prompt text handed to the agent for a single task.

use crate::output_parser::COMPLETION_MARKER;
use crate::types::Task;
use crate::worktree::PROGRESS_FILE;

#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    /// Task file name as the agent sees it, if the source is file-backed
    pub task_file: Option<String>,
    pub skip_tests: bool,
    pub skip_lint: bool,
    /// Offer the completion marker (sequential runs only)
    pub allow_completion_marker: bool,
}

impl PromptBuilder {
    pub fn build(&self, task: &Task) -> String {
        let mut steps = vec!["Implement the task described above.".to_string()];
        if !self.skip_tests {
            steps.push("Write or update tests covering the change and make sure they pass.".into());
        }
        if !self.skip_lint {
            steps.push("Run the project's linter and fix any issues it reports.".into());
        }
        steps.push(format!(
            "Append a short note about what you did to {PROGRESS_FILE}."
        ));
        if let Some(ref file) = self.task_file {
            steps.push(format!(
                "Do not edit {file}; completion is recorded for you."
            ));
        }
        steps.push("Commit your changes with a descriptive message.".into());

        let mut prompt = format!("## Task\n{}\n\n## Instructions\n", task.title);
        for (i, step) in steps.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, step));
        }
        prompt.push_str("\nWork on this single task only.\n");

        if self.allow_completion_marker {
            let scope = self
                .task_file
                .as_deref()
                .map(|f| format!(" in {f}"))
                .unwrap_or_default();
            prompt.push_str(&format!(
                "If every task{scope} is now finished, end your reply with {COMPLETION_MARKER}\n"
            ));
        }
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new(4, "Add login page")
    }

    #[test]
    fn test_default_prompt_mentions_everything() {
        let prompt = PromptBuilder {
            task_file: Some("PRD.md".into()),
            allow_completion_marker: true,
            ..Default::default()
        }
        .build(&task());
        assert!(prompt.starts_with("## Task\nAdd login page\n"));
        assert!(prompt.contains("tests"));
        assert!(prompt.contains("linter"));
        assert!(prompt.contains("progress.txt"));
        assert!(prompt.contains("Do not edit PRD.md"));
        assert!(prompt.contains("in PRD.md is now finished"));
        assert!(prompt.trim_end().ends_with(COMPLETION_MARKER));
    }

    #[test]
    fn test_skips_drop_steps_and_renumber() {
        let prompt = PromptBuilder {
            skip_tests: true,
            skip_lint: true,
            ..Default::default()
        }
        .build(&task());
        assert!(!prompt.contains("tests covering"));
        assert!(!prompt.contains("linter"));
        assert!(prompt.contains("2. Append a short note"));
        assert!(prompt.contains("3. Commit"));
    }

    #[test]
    fn test_parallel_prompt_has_no_marker() {
        let prompt = PromptBuilder::default().build(&task());
        assert!(!prompt.contains(COMPLETION_MARKER));
    }
}

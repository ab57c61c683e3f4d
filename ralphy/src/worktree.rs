//! Git worktree management for parallel agent execution.
//!
//! Every agent slot gets its own worktree directory and branch under a
//! per-run base directory. Slots never share a directory or a branch name
//! (both embed the agent index). Registry changes (add, remove, prune) are
//! serialized inside the manager so a prune never races a half-made add.

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::OrchestratorError;
use crate::git::{run_git, slugify};
use crate::types::Task;

/// Progress log every worktree is guaranteed to contain.
pub const PROGRESS_FILE: &str = "progress.txt";

/// Branch prefix for agent branches.
pub const BRANCH_PREFIX: &str = "ralphy";

/// Exclusive ownership of one worktree directory and one branch.
///
/// The branch outlives the handle; the directory registration does not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeHandle {
    pub directory: PathBuf,
    pub branch_name: String,
    pub base_branch: String,
}

/// A parsed worktree entry from `git worktree list --porcelain`.
#[derive(Debug, Clone)]
pub struct WorktreeEntry {
    pub path: String,
    pub branch: String,
    pub head: String,
}

pub struct WorktreeManager {
    repo_root: PathBuf,
    base_dir: PathBuf,
    /// Task-source artifacts copied into each new worktree.
    seeds: Vec<PathBuf>,
    /// Serializes worktree registry changes between slots.
    registry: Mutex<()>,
    /// Keeps an auto-created base directory alive for the run.
    _temp: Option<tempfile::TempDir>,
}

impl WorktreeManager {
    /// Manager with a fresh temporary base directory.
    pub fn new(repo_root: impl Into<PathBuf>, seeds: Vec<PathBuf>) -> Result<Self> {
        let temp = tempfile::Builder::new()
            .prefix("ralphy-worktrees-")
            .tempdir()
            .context("failed to create worktree base directory")?;
        let base_dir = temp
            .path()
            .canonicalize()
            .context("failed to resolve worktree base directory")?;
        Ok(Self {
            repo_root: repo_root.into(),
            base_dir,
            seeds,
            registry: Mutex::new(()),
            _temp: Some(temp),
        })
    }

    /// Manager rooted at an explicit base directory.
    pub fn with_base_dir(
        repo_root: impl Into<PathBuf>,
        base_dir: impl Into<PathBuf>,
        seeds: Vec<PathBuf>,
    ) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)
            .with_context(|| format!("failed to create {}", base_dir.display()))?;
        let base_dir = base_dir.canonicalize()?;
        Ok(Self {
            repo_root: repo_root.into(),
            base_dir,
            seeds,
            registry: Mutex::new(()),
            _temp: None,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// `ralphy/agent-{index}-{slug}`
    pub fn branch_name(task: &Task, agent_index: usize) -> String {
        let slug = slugify(&task.title);
        if slug.is_empty() {
            format!("{BRANCH_PREFIX}/agent-{agent_index}")
        } else {
            format!("{BRANCH_PREFIX}/agent-{agent_index}-{slug}")
        }
    }

    pub fn worktree_dir(&self, agent_index: usize) -> PathBuf {
        self.base_dir.join(format!("agent-{agent_index}"))
    }

    /// Create a fresh worktree for `task` in slot `agent_index`.
    ///
    /// Safe to repeat for the same slot: any stale directory is removed and
    /// the branch is force-reset to `base_branch`.
    pub async fn create(
        &self,
        task: &Task,
        agent_index: usize,
        base_branch: &str,
    ) -> Result<WorktreeHandle> {
        let directory = self.worktree_dir(agent_index);
        let branch_name = Self::branch_name(task, agent_index);

        let _registry = self.registry.lock().await;
        self.try_create(&directory, &branch_name, base_branch)
            .await
            .map_err(|e| OrchestratorError::workspace(&directory, format!("{e:#}")))?;

        info!(
            agent = agent_index,
            branch = %branch_name,
            dir = %directory.display(),
            "Created worktree"
        );

        Ok(WorktreeHandle {
            directory,
            branch_name,
            base_branch: base_branch.to_string(),
        })
    }

    async fn try_create(&self, directory: &Path, branch: &str, base: &str) -> Result<()> {
        // A stale worktree may still hold the branch, which blocks `branch -f`
        self.remove_stale(directory).await?;

        run_git(&self.repo_root, &["branch", "-f", branch, base]).await?;
        let dir = directory.to_string_lossy();
        run_git(&self.repo_root, &["worktree", "add", &dir, branch]).await?;

        self.seed(directory)?;
        Ok(())
    }

    async fn remove_stale(&self, directory: &Path) -> Result<()> {
        if directory.exists() {
            debug!(dir = %directory.display(), "Removing stale worktree directory");
            let dir = directory.to_string_lossy();
            if let Err(e) = run_git(&self.repo_root, &["worktree", "remove", "--force", &dir]).await
            {
                debug!(error = %e, "git worktree remove failed for stale directory");
            }
            if directory.exists() {
                std::fs::remove_dir_all(directory)
                    .with_context(|| format!("failed to remove {}", directory.display()))?;
            }
        }
        run_git(&self.repo_root, &["worktree", "prune"]).await?;
        Ok(())
    }

    /// Copy task-source artifacts in and make sure the progress log exists.
    fn seed(&self, directory: &Path) -> Result<()> {
        for seed in &self.seeds {
            let relative = seed
                .strip_prefix(&self.repo_root)
                .ok()
                .map(Path::to_path_buf)
                .or_else(|| seed.file_name().map(PathBuf::from));
            let Some(relative) = relative else {
                continue;
            };
            let target = directory.join(&relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(seed, &target).with_context(|| {
                format!(
                    "failed to seed {} into {}",
                    seed.display(),
                    directory.display()
                )
            })?;
        }

        let progress = directory.join(PROGRESS_FILE);
        if !progress.exists() {
            std::fs::write(&progress, "")
                .with_context(|| format!("failed to create {}", progress.display()))?;
        }
        Ok(())
    }

    /// Remove the worktree registration and directory. The branch is kept.
    pub async fn release(&self, handle: &WorktreeHandle) -> Result<()> {
        let _registry = self.registry.lock().await;
        let dir = handle.directory.to_string_lossy();
        let removed = run_git(&self.repo_root, &["worktree", "remove", "--force", &dir]).await;
        if handle.directory.exists() {
            std::fs::remove_dir_all(&handle.directory).with_context(|| {
                format!("failed to remove {}", handle.directory.display())
            })?;
        }
        run_git(&self.repo_root, &["worktree", "prune"]).await?;
        if let Err(e) = removed {
            debug!(error = %e, "git worktree remove failed, directory removed manually");
        }
        debug!(branch = %handle.branch_name, "Released worktree");
        Ok(())
    }

    /// Create a worktree, run `f` in it, and release it afterwards.
    ///
    /// Release failures are logged, not returned; the shutdown sweep picks
    /// up anything left behind.
    pub async fn with_worktree<F, Fut, T>(
        &self,
        task: &Task,
        agent_index: usize,
        base_branch: &str,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(WorktreeHandle) -> Fut,
        Fut: Future<Output = T>,
    {
        let handle = self.create(task, agent_index, base_branch).await?;
        let output = f(handle.clone()).await;
        if let Err(e) = self.release(&handle).await {
            warn!(
                agent = agent_index,
                dir = %handle.directory.display(),
                error = %e,
                "Failed to release worktree"
            );
        }
        Ok(output)
    }

    /// Force-remove every worktree under the base directory, then the base
    /// directory itself. Never fails; problems are logged.
    pub async fn cleanup_all(&self) {
        let _registry = self.registry.lock().await;
        match list_worktrees(&self.repo_root).await {
            Ok(entries) => {
                for entry in entries {
                    if !Path::new(&entry.path).starts_with(&self.base_dir) {
                        continue;
                    }
                    if let Err(e) =
                        run_git(&self.repo_root, &["worktree", "remove", "--force", &entry.path])
                            .await
                    {
                        warn!(path = %entry.path, error = %e, "Failed to remove worktree");
                    }
                }
            }
            Err(e) => warn!(error = %e, "Failed to list worktrees during cleanup"),
        }

        if self.base_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.base_dir) {
                warn!(dir = %self.base_dir.display(), error = %e, "Failed to remove worktree base directory");
            }
        }
        if let Err(e) = run_git(&self.repo_root, &["worktree", "prune"]).await {
            warn!(error = %e, "git worktree prune failed during cleanup");
        }
    }
}

/// Parse `git worktree list --porcelain` output.
pub fn parse_worktree_list(stdout: &str) -> Vec<WorktreeEntry> {
    let mut worktrees = Vec::new();
    let mut current_path: Option<String> = None;
    let mut current_head: Option<String> = None;
    let mut current_branch: Option<String> = None;

    let mut flush = |path: &mut Option<String>,
                     branch: &mut Option<String>,
                     head: &mut Option<String>| {
        if let (Some(path), Some(branch), Some(head)) = (path.take(), branch.take(), head.take())
        {
            worktrees.push(WorktreeEntry { path, branch, head });
        }
    };

    for line in stdout.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            current_path = Some(path.to_string());
        } else if let Some(head) = line.strip_prefix("HEAD ") {
            current_head = Some(head.to_string());
        } else if let Some(branch) = line.strip_prefix("branch ") {
            current_branch = Some(branch.replace("refs/heads/", ""));
        } else if line == "detached" {
            current_branch = Some("(detached)".to_string());
        } else if line.is_empty() {
            flush(&mut current_path, &mut current_branch, &mut current_head);
            current_path = None;
            current_head = None;
            current_branch = None;
        }
    }

    // Output may not end with a blank line
    flush(&mut current_path, &mut current_branch, &mut current_head);

    worktrees
}

/// List all worktrees registered with the repository.
pub async fn list_worktrees(repo_root: &Path) -> Result<Vec<WorktreeEntry>> {
    let stdout = run_git(repo_root, &["worktree", "list", "--porcelain"]).await?;
    Ok(parse_worktree_list(&stdout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::{list_branches, test_support::init_repo};

    fn canonical(path: &str) -> PathBuf {
        PathBuf::from(path).canonicalize().unwrap()
    }

    #[test]
    fn test_parse_worktree_list() {
        let stdout = "worktree /repo\nHEAD abc123\nbranch refs/heads/main\n\nworktree /tmp/agent-1\nHEAD def456\nbranch refs/heads/ralphy/agent-1-x\n\nworktree /tmp/detached\nHEAD 999\ndetached\n";
        let entries = parse_worktree_list(stdout);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].branch, "main");
        assert_eq!(entries[1].path, "/tmp/agent-1");
        assert_eq!(entries[1].branch, "ralphy/agent-1-x");
        assert_eq!(entries[2].branch, "(detached)");
        assert_eq!(entries[2].head, "999");
    }

    #[test]
    fn test_branch_name() {
        let task = Task::new(4, "Add login page!");
        assert_eq!(
            WorktreeManager::branch_name(&task, 2),
            "ralphy/agent-2-add-login-page"
        );
        let blank = Task::new(5, "???");
        assert_eq!(WorktreeManager::branch_name(&blank, 0), "ralphy/agent-0");
    }

    #[tokio::test]
    async fn test_create_seeds_and_registers() {
        let repo = init_repo();
        let prd = repo.path().join("PRD.md");
        std::fs::write(&prd, "- [ ] Add login page\n").unwrap();
        let manager = WorktreeManager::new(repo.path(), vec![prd]).unwrap();
        let task = Task::new(0, "Add login page");

        let handle = manager.create(&task, 1, "main").await.unwrap();

        assert!(handle.directory.join("PRD.md").exists());
        assert!(handle.directory.join(PROGRESS_FILE).exists());
        assert_eq!(handle.branch_name, "ralphy/agent-1-add-login-page");
        assert_eq!(handle.base_branch, "main");

        let registered = list_worktrees(repo.path()).await.unwrap();
        assert!(registered
            .iter()
            .any(|e| canonical(&e.path) == handle.directory));

        manager.cleanup_all().await;
    }

    #[tokio::test]
    async fn test_create_twice_same_slot() {
        let repo = init_repo();
        let manager = WorktreeManager::new(repo.path(), vec![]).unwrap();
        let task = Task::new(0, "Retry me");

        let first = manager.create(&task, 0, "main").await.unwrap();
        std::fs::write(first.directory.join("scratch.txt"), "stale").unwrap();
        let second = manager.create(&task, 0, "main").await.unwrap();

        assert_eq!(first, second);
        assert!(!second.directory.join("scratch.txt").exists());
        let under_base = list_worktrees(repo.path())
            .await
            .unwrap()
            .into_iter()
            .filter(|e| canonical(&e.path).starts_with(manager.base_dir()))
            .count();
        assert_eq!(under_base, 1);

        manager.cleanup_all().await;
    }

    #[tokio::test]
    async fn test_release_keeps_branch() {
        let repo = init_repo();
        let manager = WorktreeManager::new(repo.path(), vec![]).unwrap();
        let handle = manager
            .create(&Task::new(0, "Keep my branch"), 3, "main")
            .await
            .unwrap();

        manager.release(&handle).await.unwrap();

        assert!(!handle.directory.exists());
        let registered = list_worktrees(repo.path()).await.unwrap();
        assert_eq!(registered.len(), 1);
        let branches = list_branches(repo.path()).await.unwrap();
        assert!(branches.contains(&handle.branch_name));
    }

    #[tokio::test]
    async fn test_create_with_unknown_base_is_workspace_error() {
        let repo = init_repo();
        let manager = WorktreeManager::new(repo.path(), vec![]).unwrap();
        let err = manager
            .create(&Task::new(0, "Nope"), 0, "no-such-branch")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OrchestratorError>(),
            Some(OrchestratorError::Workspace { .. })
        ));
    }

    #[tokio::test]
    async fn test_with_worktree_always_releases() {
        let repo = init_repo();
        let manager = WorktreeManager::new(repo.path(), vec![]).unwrap();
        let seen = manager
            .with_worktree(&Task::new(0, "Scoped"), 0, "main", |handle| async move {
                handle.directory.exists()
            })
            .await
            .unwrap();

        assert!(seen);
        assert!(!manager.worktree_dir(0).exists());
        assert_eq!(list_worktrees(repo.path()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_all_removes_everything_under_base() {
        let repo = init_repo();
        let manager = WorktreeManager::new(repo.path(), vec![]).unwrap();
        for i in 0..3 {
            manager
                .create(&Task::new(i, format!("task {i}")), i as usize, "main")
                .await
                .unwrap();
        }
        assert_eq!(list_worktrees(repo.path()).await.unwrap().len(), 4);

        manager.cleanup_all().await;

        assert_eq!(list_worktrees(repo.path()).await.unwrap().len(), 1);
        assert!(!manager.base_dir().exists());
        let branches = list_branches(repo.path()).await.unwrap();
        assert_eq!(branches.len(), 4);
    }
}

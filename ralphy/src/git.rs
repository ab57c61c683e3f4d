//! Git and GitHub CLI plumbing shared by both orchestrators.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::debug;

/// Longest slug produced by [`slugify`].
pub const MAX_SLUG_LEN: usize = 50;

/// Run `git <args>` in `dir`, returning trimmed stdout.
pub async fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    debug!(dir = %dir.display(), ?args, "git");
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .with_context(|| format!("failed to run git {}", args.join(" ")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git {} failed: {}", args.join(" "), stderr.trim());
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Normalize free text into a branch-name fragment.
///
/// Lower-cases, collapses runs of non-alphanumerics to a single `-`, trims
/// separators from both ends and caps the length at [`MAX_SLUG_LEN`].
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_sep = false;
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('-');
            }
            pending_sep = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    slug.truncate(MAX_SLUG_LEN);
    slug.trim_matches('-').to_string()
}

/// Get the main repository root, even when called from inside a worktree.
pub async fn get_git_repo_root(dir: &Path) -> Result<PathBuf> {
    let git_dir = run_git(dir, &["rev-parse", "--git-dir"]).await?;
    let common_dir = run_git(dir, &["rev-parse", "--git-common-dir"]).await?;

    // Inside a linked worktree the common dir is the main repo's .git
    if common_dir != git_dir && common_dir != ".git" {
        let common_path = PathBuf::from(&common_dir);
        let resolved = if common_path.is_absolute() {
            common_path
        } else {
            dir.join(&common_path)
                .canonicalize()
                .context("failed to resolve git common dir")?
        };
        if let Some(parent) = resolved.parent() {
            return Ok(parent.to_path_buf());
        }
    }

    let toplevel = run_git(dir, &["rev-parse", "--show-toplevel"]).await?;
    Ok(PathBuf::from(toplevel))
}

pub async fn current_branch(dir: &Path) -> Result<String> {
    run_git(dir, &["rev-parse", "--abbrev-ref", "HEAD"]).await
}

/// `true` if the working tree has uncommitted changes.
pub async fn is_dirty(dir: &Path) -> Result<bool> {
    let status = run_git(dir, &["status", "--porcelain"]).await?;
    Ok(!status.is_empty())
}

/// Stash uncommitted changes. Returns `true` if anything was stashed.
pub async fn stash(dir: &Path) -> Result<bool> {
    if !is_dirty(dir).await? {
        return Ok(false);
    }
    run_git(dir, &["stash", "push", "--include-untracked", "-m", "ralphy"]).await?;
    Ok(true)
}

pub async fn stash_pop(dir: &Path) -> Result<()> {
    run_git(dir, &["stash", "pop"]).await.map(|_| ())
}

pub async fn checkout(dir: &Path, branch: &str) -> Result<()> {
    run_git(dir, &["checkout", branch]).await.map(|_| ())
}

/// Create (or reset) `branch` at `base` and check it out.
pub async fn checkout_fresh_branch(dir: &Path, branch: &str, base: &str) -> Result<()> {
    run_git(dir, &["checkout", "-B", branch, base]).await.map(|_| ())
}

/// Switch to a dedicated task branch, carrying any dirty state across.
pub async fn switch_to_task_branch(dir: &Path, branch: &str, base: &str) -> Result<()> {
    let stashed = stash(dir).await?;
    let switched = checkout_fresh_branch(dir, branch, base).await;
    if stashed {
        stash_pop(dir)
            .await
            .context("failed to restore stashed changes")?;
    }
    switched
}

/// Local branch names.
pub async fn list_branches(dir: &Path) -> Result<Vec<String>> {
    let stdout = run_git(dir, &["branch", "--format=%(refname:short)"]).await?;
    Ok(stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

#[derive(Debug)]
pub struct BranchExistence {
    pub local: bool,
    pub remote: bool,
}

/// Check if a git branch exists (locally or remotely).
pub async fn branch_exists(dir: &Path, branch_name: &str) -> Result<BranchExistence> {
    let local = run_git(dir, &["branch", "--list", branch_name])
        .await
        .map(|out| !out.is_empty())
        .unwrap_or(false);

    let remote_ref = format!("origin/{}", branch_name);
    let remote = run_git(dir, &["branch", "-r", "--list", &remote_ref])
        .await
        .map(|out| !out.is_empty())
        .unwrap_or(false);

    Ok(BranchExistence { local, remote })
}

/// `true` if `rev` names a commit (branch, remote branch, tag or SHA).
pub async fn resolves_to_commit(dir: &Path, rev: &str) -> bool {
    let spec = format!("{rev}^{{commit}}");
    run_git(dir, &["rev-parse", "--verify", "--quiet", &spec])
        .await
        .is_ok()
}

pub async fn push_branch(dir: &Path, branch: &str) -> Result<()> {
    run_git(dir, &["push", "-u", "origin", branch])
        .await
        .map(|_| ())
}

/// Pull request to open with `gh pr create`
#[derive(Debug, Clone)]
pub struct PullRequest {
    pub base: String,
    pub head: String,
    pub title: String,
    pub body: String,
    pub draft: bool,
}

impl PullRequest {
    fn args(&self) -> Vec<&str> {
        let mut args = vec![
            "pr",
            "create",
            "--base",
            &self.base,
            "--head",
            &self.head,
            "--title",
            &self.title,
            "--body",
            &self.body,
        ];
        if self.draft {
            args.push("--draft");
        }
        args
    }
}

/// Open a pull request. Returns the URL printed by `gh`.
pub async fn create_pull_request(dir: &Path, pr: &PullRequest) -> Result<String> {
    let args = pr.args();
    debug!(head = %pr.head, base = %pr.base, draft = pr.draft, "gh pr create");
    let output = Command::new("gh")
        .args(&args)
        .current_dir(dir)
        .output()
        .await
        .context("failed to run gh pr create")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("gh pr create failed: {}", stderr.trim());
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Push `branch` and optionally open a pull request for it.
pub async fn publish_branch(
    dir: &Path,
    branch: &str,
    base: &str,
    title: &str,
    create_pr: bool,
    draft: bool,
) -> Result<Option<String>> {
    push_branch(dir, branch).await?;
    if !create_pr {
        return Ok(None);
    }
    let pr = PullRequest {
        base: base.to_string(),
        head: branch.to_string(),
        title: title.to_string(),
        body: format!("Automated changes for: {title}"),
        draft,
    };
    create_pull_request(dir, &pr).await.map(Some)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;
    use std::process::Command;

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(
            status.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&status.stderr)
        );
    }

    /// Scratch repository on `main` with one commit.
    pub fn init_repo() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        git(dir, &["init", "-q"]);
        git(dir, &["checkout", "-q", "-b", "main"]);
        git(dir, &["config", "user.email", "dev@example.com"]);
        git(dir, &["config", "user.name", "Dev"]);
        git(dir, &["config", "commit.gpgsign", "false"]);
        std::fs::write(dir.join("README.md"), "# scratch\n").unwrap();
        git(dir, &["add", "README.md"]);
        git(dir, &["commit", "-q", "-m", "init"]);
        tmp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_basic() {
        assert_eq!(slugify("Add Login Page"), "add-login-page");
        assert_eq!(slugify("  Fix: the *bug*!! "), "fix-the-bug");
        assert_eq!(slugify("a---b___c"), "a-b-c");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_slugify_caps_length() {
        let title = "implement the very long feature title that keeps going and going forever";
        let slug = slugify(title);
        assert!(slug.len() <= MAX_SLUG_LEN);
        assert!(!slug.ends_with('-'));
        assert!(slug.starts_with("implement-the-very-long"));
    }

    #[test]
    fn test_slugify_non_ascii() {
        assert_eq!(slugify("Café résumé"), "caf-r-sum");
    }

    #[test]
    fn test_pull_request_args() {
        let pr = PullRequest {
            base: "main".into(),
            head: "ralphy/add-login".into(),
            title: "Add login".into(),
            body: "body".into(),
            draft: true,
        };
        let args = pr.args();
        assert_eq!(args[..2], ["pr", "create"]);
        assert!(args.windows(2).any(|w| w == ["--base", "main"]));
        assert!(args.windows(2).any(|w| w == ["--head", "ralphy/add-login"]));
        assert_eq!(args.last(), Some(&"--draft"));
    }

    #[tokio::test]
    async fn test_current_branch_and_list() {
        let repo = test_support::init_repo();
        assert_eq!(current_branch(repo.path()).await.unwrap(), "main");
        assert_eq!(list_branches(repo.path()).await.unwrap(), vec!["main"]);
    }

    #[tokio::test]
    async fn test_switch_to_task_branch_carries_dirty_state() {
        let repo = test_support::init_repo();
        let dir = repo.path();
        std::fs::write(dir.join("notes.txt"), "wip\n").unwrap();

        switch_to_task_branch(dir, "ralphy/task-one", "main")
            .await
            .unwrap();

        assert_eq!(current_branch(dir).await.unwrap(), "ralphy/task-one");
        assert!(dir.join("notes.txt").exists());
        assert!(is_dirty(dir).await.unwrap());
    }

    #[tokio::test]
    async fn test_branch_exists_local() {
        let repo = test_support::init_repo();
        let found = branch_exists(repo.path(), "main").await.unwrap();
        assert!(found.local);
        assert!(!found.remote);
        let missing = branch_exists(repo.path(), "nope").await.unwrap();
        assert!(!missing.local);
    }

    #[tokio::test]
    async fn test_resolves_to_commit() {
        let repo = test_support::init_repo();
        assert!(resolves_to_commit(repo.path(), "main").await);
        assert!(resolves_to_commit(repo.path(), "HEAD").await);
        assert!(!resolves_to_commit(repo.path(), "no-such-branch").await);
    }

    #[tokio::test]
    async fn test_run_git_reports_stderr() {
        let repo = test_support::init_repo();
        let err = run_git(repo.path(), &["checkout", "does-not-exist"])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("git checkout does-not-exist failed"));
    }

    #[tokio::test]
    async fn test_get_git_repo_root() {
        let repo = test_support::init_repo();
        let sub = repo.path().join("src");
        std::fs::create_dir_all(&sub).unwrap();
        let root = get_git_repo_root(&sub).await.unwrap();
        assert_eq!(
            root.canonicalize().unwrap(),
            repo.path().canonicalize().unwrap()
        );
    }
}

//! Version-control backend seam.
//!
//! The engine needs exactly four operations from the VCS: create an isolated
//! copy at a ref, remove it, delete its branch, and diff it against its
//! base. `GitCli` shells out to `git`; tests use a recording fake.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;

use crate::error::WorktreeError;

/// Operations the worktree manager needs from the version-control system.
#[async_trait]
pub trait VcsBackend: Send + Sync {
    /// Create an isolated working copy at `path` on a new `branch` rooted
    /// at `base_ref`.
    async fn add_worktree(
        &self,
        repo: &Path,
        path: &Path,
        branch: &str,
        base_ref: &str,
    ) -> Result<(), WorktreeError>;

    /// Remove the working copy at `path`.
    async fn remove_worktree(&self, repo: &Path, path: &Path) -> Result<(), WorktreeError>;

    /// Delete a branch created for a working copy.
    async fn delete_branch(&self, repo: &Path, branch: &str) -> Result<(), WorktreeError>;

    /// Patch-format diff of the working copy against `base_ref`.
    async fn diff_against(&self, worktree: &Path, base_ref: &str)
    -> Result<String, WorktreeError>;
}

/// Production backend: linked git worktrees via the `git` CLI.
#[derive(Debug, Default)]
pub struct GitCli;

impl GitCli {
    async fn git(&self, cwd: &Path, args: &[&str]) -> Result<String, WorktreeError> {
        let output = tokio::process::Command::new("git")
            .arg("-C")
            .arg(cwd)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| WorktreeError::Vcs(format!("failed to run git: {e}")))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(WorktreeError::Vcs(format!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

#[async_trait]
impl VcsBackend for GitCli {
    async fn add_worktree(
        &self,
        repo: &Path,
        path: &Path,
        branch: &str,
        base_ref: &str,
    ) -> Result<(), WorktreeError> {
        let path = path.to_string_lossy();
        self.git(repo, &["worktree", "add", "-b", branch, &path, base_ref])
            .await?;
        Ok(())
    }

    async fn remove_worktree(&self, repo: &Path, path: &Path) -> Result<(), WorktreeError> {
        let path = path.to_string_lossy();
        self.git(repo, &["worktree", "remove", "--force", &path])
            .await?;
        Ok(())
    }

    async fn delete_branch(&self, repo: &Path, branch: &str) -> Result<(), WorktreeError> {
        self.git(repo, &["branch", "-D", branch]).await?;
        Ok(())
    }

    async fn diff_against(
        &self,
        worktree: &Path,
        base_ref: &str,
    ) -> Result<String, WorktreeError> {
        self.git(worktree, &["diff", base_ref]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    /// Initialise a repo with one commit on `main`.
    async fn init_repo(dir: &Path) -> PathBuf {
        let repo = dir.join("repo");
        tokio::fs::create_dir_all(&repo).await.unwrap();
        let git = |args: Vec<String>| {
            let repo = repo.clone();
            async move {
                let status = tokio::process::Command::new("git")
                    .arg("-C")
                    .arg(&repo)
                    .args(&args)
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await
                    .unwrap();
                assert!(status.success(), "git {args:?} failed");
            }
        };

        git(vec!["init".into(), "-b".into(), "main".into()]).await;
        tokio::fs::write(repo.join("README.md"), "# test\n")
            .await
            .unwrap();
        git(vec!["add".into(), ".".into()]).await;
        git(vec![
            "-c".into(),
            "user.name=taskforge-test".into(),
            "-c".into(),
            "user.email=test@localhost".into(),
            "commit".into(),
            "-m".into(),
            "init".into(),
        ])
        .await;
        repo
    }

    #[tokio::test]
    async fn worktree_lifecycle_against_real_git() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path()).await;
        let vcs = GitCli;

        let wt_path = dir.path().join("wt-1");
        vcs.add_worktree(&repo, &wt_path, "taskforge/test-1", "main")
            .await
            .unwrap();
        assert!(wt_path.join("README.md").exists());

        // A change in the worktree shows up in the diff against base.
        tokio::fs::write(wt_path.join("README.md"), "# changed\n")
            .await
            .unwrap();
        let diff = vcs.diff_against(&wt_path, "main").await.unwrap();
        assert!(diff.contains("-# test"));
        assert!(diff.contains("+# changed"));

        vcs.remove_worktree(&repo, &wt_path).await.unwrap();
        assert!(!wt_path.exists());
        vcs.delete_branch(&repo, "taskforge/test-1").await.unwrap();
    }

    #[tokio::test]
    async fn missing_repo_surfaces_vcs_error() {
        let vcs = GitCli;
        let result = vcs
            .add_worktree(
                Path::new("/nonexistent/repo"),
                Path::new("/tmp/never"),
                "b",
                "main",
            )
            .await;
        assert!(matches!(result, Err(WorktreeError::Vcs(_))));
    }
}

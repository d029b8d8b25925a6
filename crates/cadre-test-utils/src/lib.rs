//! Shared test fixtures for cadre's integration tests: a real `git init`
//! repo, and builders for the core model types.

use std::path::{Path, PathBuf};
use std::process::Command;

use cadre_core::model::{Issue, IssueState, Task};
use chrono::Utc;
use tempfile::TempDir;

/// A throwaway git repository with one commit on its default branch,
/// suitable as the main repo backing a [`cadre_core::worktree::WorktreeManager`]
/// in tests.
pub struct TestRepo {
    _dir: TempDir,
    path: PathBuf,
}

impl TestRepo {
    /// `git init` a new repo with a single commit.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().to_path_buf();

        run_git(&path, &["init", "-q", "-b", "main"]);
        run_git(&path, &["config", "user.email", "test@cadre.dev"]);
        run_git(&path, &["config", "user.name", "cadre-test"]);
        std::fs::write(path.join("README.md"), "test repo").expect("write README");
        run_git(&path, &["add", "."]);
        run_git(&path, &["commit", "-q", "-m", "init"]);

        Self { _dir: dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add a bare remote named `origin`, for tests that exercise a force-push.
    pub fn add_bare_origin(&self) -> TempDir {
        let origin = TempDir::new().expect("tempdir");
        run_git(origin.path(), &["init", "--bare", "-q"]);
        run_git(
            &self.path,
            &["remote", "add", "origin", origin.path().to_str().expect("utf8 path")],
        );
        origin
    }

    /// Commit a file on whatever branch is currently checked out at `at`
    /// (the main repo path, or a worktree path sharing its git dir).
    pub fn commit_file(at: &Path, file_name: &str, contents: &str) {
        std::fs::write(at.join(file_name), contents).expect("write file");
        run_git(at, &["add", "."]);
        run_git(at, &["commit", "-q", "-m", &format!("add {file_name}")]);
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

fn run_git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap_or_else(|e| panic!("failed to run git {args:?}: {e}"));
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Build an [`Issue`] fixture with the given number, everything else
/// defaulted to plausible values.
pub fn issue_fixture(number: u64) -> Issue {
    Issue {
        number,
        title: format!("Test issue #{number}"),
        body: "Fixture issue body.".to_string(),
        labels: Default::default(),
        assignees: vec![],
        state: IssueState::Open,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        comments: vec![],
    }
}

/// Build a single-task [`Task`] fixture touching the given files.
pub fn task_fixture(id: &str, files: Vec<PathBuf>) -> Task {
    Task {
        id: id.to_string(),
        name: format!("task {id}"),
        description: "Fixture task.".to_string(),
        files,
        dependencies: vec![],
        acceptance_criteria: vec![],
        complexity: Some("small".to_string()),
    }
}

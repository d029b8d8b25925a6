//! File-backed `PlatformProvider`: reads the issue snapshot the operator
//! drops at `.cadre/issues/<n>/issue.json` and persists PR/review-thread
//! state to `.cadre/platform-state.json`. Stands in for a real GitHub/Azure
//! DevOps adapter (out of scope for the engine itself) when running cadre
//! against a repo with no live tracker connection.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use cadre_core::model::{Issue, PrState, PullRequest, ReviewThread};
use cadre_core::platform::PlatformProvider;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    pull_requests: BTreeMap<u64, PullRequest>,
    review_threads: BTreeMap<u64, Vec<ReviewThread>>,
    next_pr_number: Option<u64>,
    comments: Vec<(u64, String)>,
}

/// A `PlatformProvider` backed by files under a `.cadre` root rather than a
/// network call. Issues are read-only snapshots the operator (or a separate
/// sync step) places at `issues/<n>/issue.json`; PR and review-thread state
/// is this provider's own persisted record of what it has done.
pub struct LocalPlatformProvider {
    root: PathBuf,
    state: Mutex<PersistedState>,
}

impl LocalPlatformProvider {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let state = Self::load_state(&root)?;
        Ok(Self {
            root,
            state: Mutex::new(state),
        })
    }

    fn state_path(root: &Path) -> PathBuf {
        root.join("platform-state.json")
    }

    fn load_state(root: &Path) -> Result<PersistedState> {
        let path = Self::state_path(root);
        if !path.exists() {
            return Ok(PersistedState::default());
        }
        let bytes = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
    }

    fn save_state(&self, state: &PersistedState) -> Result<()> {
        fs::create_dir_all(&self.root).with_context(|| format!("creating {}", self.root.display()))?;
        let bytes = serde_json::to_vec_pretty(state).context("serializing platform state")?;
        let final_path = Self::state_path(&self.root);
        let temp_path = final_path.with_extension("json.tmp");
        {
            use std::io::Write;
            let mut file = File::create(&temp_path).with_context(|| format!("creating {}", temp_path.display()))?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &final_path).with_context(|| format!("renaming to {}", final_path.display()))?;
        Ok(())
    }

    fn issue_path(&self, issue_number: u64) -> PathBuf {
        self.root.join("issues").join(issue_number.to_string()).join("issue.json")
    }
}

#[async_trait]
impl PlatformProvider for LocalPlatformProvider {
    fn name(&self) -> &str {
        "local-file-platform"
    }

    async fn fetch_issue(&self, issue_number: u64) -> Result<Issue> {
        let path = self.issue_path(issue_number);
        let bytes = fs::read(&path)
            .with_context(|| format!("no issue snapshot at {} -- seed it before running cadre", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
    }

    async fn post_comment(&self, issue_number: u64, body: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.comments.push((issue_number, body.to_string()));
        self.save_state(&state)
    }

    async fn find_open_pull_request(&self, _issue_number: u64, head: &str) -> Result<Option<PullRequest>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .pull_requests
            .values()
            .find(|pr| pr.head == head && pr.state == PrState::Open)
            .cloned())
    }

    async fn open_pull_request(
        &self,
        issue_number: u64,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
        draft: bool,
    ) -> Result<PullRequest> {
        let mut state = self.state.lock().unwrap();
        let number = state.next_pr_number.unwrap_or(1);
        state.next_pr_number = Some(number + 1);

        let pr = PullRequest {
            number,
            title: title.to_string(),
            body: body.to_string(),
            head: head.to_string(),
            base: base.to_string(),
            draft,
            labels: vec![format!("issue-{issue_number}")],
            state: PrState::Open,
        };
        state.pull_requests.insert(number, pr.clone());
        self.save_state(&state)?;
        Ok(pr)
    }

    async fn update_pull_request(&self, pr_number: u64, title: &str, body: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let pr = state
            .pull_requests
            .get_mut(&pr_number)
            .ok_or_else(|| anyhow!("no such pull request #{pr_number}"))?;
        pr.title = title.to_string();
        pr.body = body.to_string();
        self.save_state(&state)
    }

    async fn set_pull_request_state(&self, pr_number: u64, new_state: PrState) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let pr = state
            .pull_requests
            .get_mut(&pr_number)
            .ok_or_else(|| anyhow!("no such pull request #{pr_number}"))?;
        pr.state = new_state;
        self.save_state(&state)
    }

    async fn list_review_threads(&self, pr_number: u64) -> Result<Vec<ReviewThread>> {
        let state = self.state.lock().unwrap();
        Ok(state.review_threads.get(&pr_number).cloned().unwrap_or_default())
    }

    async fn resolve_review_thread(&self, pr_number: u64, thread_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let threads = state
            .review_threads
            .get_mut(&pr_number)
            .ok_or_else(|| anyhow!("no review threads recorded for pr #{pr_number}"))?;
        let thread = threads
            .iter_mut()
            .find(|t| t.id == thread_id)
            .ok_or_else(|| anyhow!("no such thread {thread_id} on pr #{pr_number}"))?;
        thread.resolved = true;
        self.save_state(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadre_core::model::IssueState;
    use chrono::Utc;

    fn write_issue(root: &Path, number: u64) {
        let dir = root.join("issues").join(number.to_string());
        fs::create_dir_all(&dir).unwrap();
        let issue = Issue {
            number,
            title: "Fix the thing".into(),
            body: "details".into(),
            labels: Default::default(),
            assignees: vec![],
            state: IssueState::Open,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            comments: vec![],
        };
        fs::write(dir.join("issue.json"), serde_json::to_vec_pretty(&issue).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn fetch_reads_seeded_snapshot() {
        let dir = tempfile::TempDir::new().unwrap();
        write_issue(dir.path(), 7);
        let provider = LocalPlatformProvider::new(dir.path()).unwrap();
        let issue = provider.fetch_issue(7).await.unwrap();
        assert_eq!(issue.title, "Fix the thing");
    }

    #[tokio::test]
    async fn fetch_missing_snapshot_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let provider = LocalPlatformProvider::new(dir.path()).unwrap();
        assert!(provider.fetch_issue(404).await.is_err());
    }

    #[tokio::test]
    async fn pull_request_lifecycle_persists_across_instances() {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let provider = LocalPlatformProvider::new(dir.path()).unwrap();
            provider
                .open_pull_request(1, "t", "b", "cadre/issue-1", "main", false)
                .await
                .unwrap();
        }
        let reopened = LocalPlatformProvider::new(dir.path()).unwrap();
        let found = reopened.find_open_pull_request(1, "cadre/issue-1").await.unwrap();
        assert_eq!(found.unwrap().number, 1);
    }

    #[tokio::test]
    async fn resolve_missing_thread_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let provider = LocalPlatformProvider::new(dir.path()).unwrap();
        assert!(provider.resolve_review_thread(1, "rt1").await.is_err());
    }
}

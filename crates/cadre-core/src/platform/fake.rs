//! `FakePlatformProvider` -- an in-memory test double for
//! [`PlatformProvider`], used in place of a real GitHub/Azure DevOps
//! integration (out of scope per §6).

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::trait_def::PlatformProvider;
use crate::model::{Issue, PrState, PullRequest, ReviewThread};

#[derive(Default)]
struct State {
    issues: BTreeMap<u64, Issue>,
    pull_requests: BTreeMap<u64, PullRequest>,
    review_threads: BTreeMap<u64, Vec<ReviewThread>>,
    next_pr_number: u64,
    comments: Vec<(u64, String)>,
}

/// An in-memory platform used by integration tests to script issue
/// content, PR lifecycle, and review threads without any network access.
pub struct FakePlatformProvider {
    name: String,
    state: Mutex<State>,
}

impl FakePlatformProvider {
    pub fn new() -> Self {
        Self {
            name: "fake-platform".to_string(),
            state: Mutex::new(State {
                next_pr_number: 1,
                ..State::default()
            }),
        }
    }

    pub fn seed_issue(&self, issue: Issue) {
        let mut state = self.state.lock().unwrap();
        state.issues.insert(issue.number, issue);
    }

    pub fn seed_review_threads(&self, pr_number: u64, threads: Vec<ReviewThread>) {
        let mut state = self.state.lock().unwrap();
        state.review_threads.insert(pr_number, threads);
    }

    pub fn comments_for(&self, issue_number: u64) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .comments
            .iter()
            .filter(|(n, _)| *n == issue_number)
            .map(|(_, body)| body.clone())
            .collect()
    }

    pub fn pull_request(&self, pr_number: u64) -> Option<PullRequest> {
        self.state.lock().unwrap().pull_requests.get(&pr_number).cloned()
    }

    /// Seed an already-open pull request directly, for tests that start
    /// from an existing PR rather than one opened via
    /// [`PlatformProvider::open_pull_request`].
    pub fn seed_pull_request(&self, pr: PullRequest) {
        let mut state = self.state.lock().unwrap();
        state.next_pr_number = state.next_pr_number.max(pr.number + 1);
        state.pull_requests.insert(pr.number, pr);
    }
}

impl Default for FakePlatformProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformProvider for FakePlatformProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_issue(&self, issue_number: u64) -> Result<Issue> {
        let state = self.state.lock().unwrap();
        state
            .issues
            .get(&issue_number)
            .cloned()
            .ok_or_else(|| anyhow!("no such issue #{issue_number}"))
    }

    async fn post_comment(&self, issue_number: u64, body: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.comments.push((issue_number, body.to_string()));
        Ok(())
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
        let number = state.next_pr_number;
        state.next_pr_number += 1;

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
        Ok(())
    }

    async fn set_pull_request_state(&self, pr_number: u64, state_value: PrState) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let pr = state
            .pull_requests
            .get_mut(&pr_number)
            .ok_or_else(|| anyhow!("no such pull request #{pr_number}"))?;
        pr.state = state_value;
        Ok(())
    }

    async fn list_review_threads(&self, pr_number: u64) -> Result<Vec<ReviewThread>> {
        let state = self.state.lock().unwrap();
        Ok(state.review_threads.get(&pr_number).cloned().unwrap_or_default())
    }

    async fn resolve_review_thread(&self, pr_number: u64, thread_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(threads) = state.review_threads.get_mut(&pr_number) {
            if let Some(t) = threads.iter_mut().find(|t| t.id == thread_id) {
                t.resolved = true;
                return Ok(());
            }
        }
        Err(anyhow!("no such thread {thread_id} on pr #{pr_number}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IssueState;
    use chrono::Utc;

    fn issue(number: u64) -> Issue {
        Issue {
            number,
            title: "Fix the thing".into(),
            body: "details".into(),
            labels: Default::default(),
            assignees: vec![],
            state: IssueState::Open,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            comments: vec![],
        }
    }

    #[tokio::test]
    async fn fetch_seeded_issue() {
        let provider = FakePlatformProvider::new();
        provider.seed_issue(issue(1));
        let fetched = provider.fetch_issue(1).await.unwrap();
        assert_eq!(fetched.title, "Fix the thing");
    }

    #[tokio::test]
    async fn fetch_missing_issue_errors() {
        let provider = FakePlatformProvider::new();
        assert!(provider.fetch_issue(99).await.is_err());
    }

    #[tokio::test]
    async fn open_pull_request_assigns_increasing_numbers() {
        let provider = FakePlatformProvider::new();
        let pr1 = provider
            .open_pull_request(1, "t", "b", "cadre/issue-1", "main", false)
            .await
            .unwrap();
        let pr2 = provider
            .open_pull_request(2, "t2", "b2", "cadre/issue-2", "main", false)
            .await
            .unwrap();
        assert_eq!(pr1.number, 1);
        assert_eq!(pr2.number, 2);
    }

    #[tokio::test]
    async fn resolve_review_thread_marks_resolved() {
        let provider = FakePlatformProvider::new();
        provider.seed_review_threads(
            1,
            vec![ReviewThread {
                id: "rt1".into(),
                resolved: false,
                outdated: false,
            }],
        );
        provider.resolve_review_thread(1, "rt1").await.unwrap();
        let threads = provider.list_review_threads(1).await.unwrap();
        assert!(threads[0].resolved);
    }

    #[tokio::test]
    async fn post_comment_is_recorded() {
        let provider = FakePlatformProvider::new();
        provider.post_comment(1, "hello").await.unwrap();
        assert_eq!(provider.comments_for(1), vec!["hello".to_string()]);
    }
}

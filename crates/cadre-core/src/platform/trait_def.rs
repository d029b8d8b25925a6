//! The `PlatformProvider` trait -- the contract-only interface to the
//! issue tracker and pull request platform (GitHub, Azure DevOps, etc.),
//! per §6. No concrete production adapter is in scope; only the trait and
//! a fake test double are implemented here.

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{Issue, PrState, PullRequest, ReviewThread};

/// Adapter interface to a tracker/PR platform. Every method is phrased in
/// terms of the engine's normalized types so the orchestrator never
/// branches on which platform it is talking to.
#[async_trait]
pub trait PlatformProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_issue(&self, issue_number: u64) -> Result<Issue>;

    async fn post_comment(&self, issue_number: u64, body: &str) -> Result<()>;

    /// Find the open pull request for an issue on the given head branch, if
    /// one exists. Used by the Review-Response Orchestrator to locate the
    /// PR to rebase without assuming a PR number is already known.
    async fn find_open_pull_request(&self, issue_number: u64, head: &str) -> Result<Option<PullRequest>>;

    async fn open_pull_request(
        &self,
        issue_number: u64,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
        draft: bool,
    ) -> Result<PullRequest>;

    async fn update_pull_request(&self, pr_number: u64, title: &str, body: &str) -> Result<()>;

    async fn set_pull_request_state(&self, pr_number: u64, state: PrState) -> Result<()>;

    async fn list_review_threads(&self, pr_number: u64) -> Result<Vec<ReviewThread>>;

    async fn resolve_review_thread(&self, pr_number: u64, thread_id: &str) -> Result<()>;
}

// Compile-time assertion: PlatformProvider must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn PlatformProvider) {}
};

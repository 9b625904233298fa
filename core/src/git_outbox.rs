//! Git outbox (C8) — durable queue for repo mutations: surface commits,
//! backend-artifact commits, PR opens and auto-merges. Same claim/
//! complete/reclaim-stale state machine as [`crate::tx_outbox`] but the
//! worker shells out to a repo host instead of a chain client.
//!
//! Grounded on `api/v1/oracle_git_outbox.py`'s claim/complete handlers
//! and the merge-gating rule in spec.md §4.8: auto-merge is only ever
//! attempted when every required check currently passes, the required
//! approval count is met, and (if configured) the PR is not a draft —
//! any other outcome completes the task as `failed` with a structured
//! hint rather than leaving it to retry forever.

use crate::error::Result;
use crate::models::{GitOutboxTask, GitTaskType};
use crate::store::{ClaimOutcome, GitOutboxStore};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct GitFileChange {
    pub path: String,
    pub contents_base64: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergePolicy {
    #[serde(default)]
    pub required_checks: Vec<String>,
    #[serde(default)]
    pub required_approvals: i32,
    #[serde(default)]
    pub require_non_draft: bool,
}

/// The task payload shape shared by all four [`GitTaskType`] variants;
/// which optional steps run is driven by `open_pr`/`auto_merge`, not by
/// the task type itself (the type just labels which agent surface
/// produced the task).
#[derive(Debug, Clone, Deserialize)]
pub struct GitTaskPayload {
    pub slug: String,
    #[serde(default)]
    pub bounty_id: Option<String>,
    pub branch_name: String,
    pub files: Vec<GitFileChange>,
    pub commit_message: String,
    #[serde(default)]
    pub open_pr: bool,
    #[serde(default)]
    pub pr_title: Option<String>,
    #[serde(default)]
    pub pr_body: Option<String>,
    #[serde(default)]
    pub auto_merge: bool,
    #[serde(default)]
    pub merge_policy: Option<MergePolicy>,
}

#[derive(Debug, Clone)]
pub struct CheckStatus {
    pub name: String,
    pub passed: bool,
}

#[derive(Debug, Clone)]
pub struct PullRequestState {
    pub checks: Vec<CheckStatus>,
    pub approvals: i32,
    pub is_draft: bool,
    pub mergeable: bool,
}

/// Abstracts local `git` + a repo host CLI (`gh`), implemented by the
/// sibling `git` crate.
#[async_trait]
pub trait GitHost: Send + Sync {
    async fn commit_files(&self, branch_name: &str, files: &[GitFileChange], message: &str) -> Result<String>;
    async fn open_pull_request(&self, branch_name: &str, title: &str, body: &str) -> Result<String>;
    async fn pull_request_state(&self, pr_url: &str) -> Result<PullRequestState>;
    async fn merge_pull_request(&self, pr_url: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct GitTaskResult {
    pub branch_name: Option<String>,
    pub commit_sha: Option<String>,
    pub pr_url: Option<String>,
}

fn merge_policy_hint(policy: &MergePolicy, state: &PullRequestState) -> Option<String> {
    for required in &policy.required_checks {
        let passed = state.checks.iter().any(|c| c.name == *required && c.passed);
        if !passed {
            return Some(format!("merge_policy_checks_missing:{required}"));
        }
    }
    if state.approvals < policy.required_approvals {
        return Some(format!("merge_policy_approvals_missing:{}", policy.required_approvals));
    }
    if policy.require_non_draft && state.is_draft {
        return Some("merge_policy_draft_not_allowed".to_string());
    }
    if !state.mergeable {
        return Some("merge_policy_not_mergeable".to_string());
    }
    None
}

/// Runs the commit / open-PR / auto-merge sequence a payload asks for.
/// Returns `Err` (as a plain string hint, via the caller wrapping it)
/// only for the merge-gating case — every other failure bubbles up
/// through `Result` from the underlying `GitHost` calls.
async fn execute(host: &dyn GitHost, payload: &GitTaskPayload) -> std::result::Result<GitTaskResult, String> {
    let commit_sha = host
        .commit_files(&payload.branch_name, &payload.files, &payload.commit_message)
        .await
        .map_err(|err| err.to_string())?;

    let mut pr_url = None;
    if payload.open_pr {
        let title = payload.pr_title.clone().unwrap_or_else(|| payload.commit_message.clone());
        let body = payload.pr_body.clone().unwrap_or_default();
        pr_url = Some(
            host.open_pull_request(&payload.branch_name, &title, &body)
                .await
                .map_err(|err| err.to_string())?,
        );
    }

    if payload.auto_merge {
        let url = pr_url.as_deref().ok_or_else(|| "merge_policy_no_pull_request".to_string())?;
        let state = host.pull_request_state(url).await.map_err(|err| err.to_string())?;
        if let Some(policy) = &payload.merge_policy {
            if let Some(hint) = merge_policy_hint(policy, &state) {
                return Err(hint);
            }
        } else if !state.mergeable {
            return Err("merge_policy_not_mergeable".to_string());
        }
        host.merge_pull_request(url).await.map_err(|err| err.to_string())?;
    }

    Ok(GitTaskResult { branch_name: Some(payload.branch_name.clone()), commit_sha: Some(commit_sha), pr_url })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitWorkerOutcome {
    NoTasks,
    RaceLost,
    Succeeded { task_id: String },
    Failed { task_id: String, hint: String },
}

/// Claims and runs a single git-outbox task end to end. Parse failures
/// and host errors both complete the task as `failed` rather than
/// propagating — a malformed or permanently-rejected task should not
/// wedge the worker loop.
pub async fn process_next(store: &dyn GitOutboxStore, host: &dyn GitHost, worker_id: &str, lock_ttl_seconds: i64) -> Result<GitWorkerOutcome> {
    let task: GitOutboxTask = match store.claim_next(worker_id, lock_ttl_seconds).await? {
        ClaimOutcome::NoTasks => return Ok(GitWorkerOutcome::NoTasks),
        ClaimOutcome::RaceLost => return Ok(GitWorkerOutcome::RaceLost),
        ClaimOutcome::Claimed(task) => task,
    };

    let payload: GitTaskPayload = match serde_json::from_value(task.payload.clone()) {
        Ok(payload) => payload,
        Err(err) => {
            let hint = format!("invalid_payload:{err}");
            store.mark_failed(&task.task_id, worker_id, &hint).await?;
            return Ok(GitWorkerOutcome::Failed { task_id: task.task_id, hint });
        }
    };

    match execute(host, &payload).await {
        Ok(result) => {
            store
                .mark_succeeded(&task.task_id, worker_id, result.branch_name, result.commit_sha, result.pr_url)
                .await?;
            Ok(GitWorkerOutcome::Succeeded { task_id: task.task_id })
        }
        Err(hint) => {
            store.mark_failed(&task.task_id, worker_id, &hint).await?;
            Ok(GitWorkerOutcome::Failed { task_id: task.task_id, hint })
        }
    }
}

/// Maps the originating agent API surface to a [`GitTaskType`] label,
/// matching `surface-commit` / `backend-artifact-commit` in the agent
/// API (spec.md §6).
pub fn task_type_for_surface(surface: &str) -> Option<GitTaskType> {
    match surface {
        "surface-commit" => Some(GitTaskType::SurfaceCommit),
        "backend-artifact-commit" => Some(GitTaskType::ArtifactCommit),
        "pr-open" => Some(GitTaskType::PrOpen),
        "auto-merge" => Some(GitTaskType::AutoMerge),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(passed: bool, approvals: i32, is_draft: bool, mergeable: bool) -> PullRequestState {
        PullRequestState { checks: vec![CheckStatus { name: "ci".to_string(), passed }], approvals, is_draft, mergeable }
    }

    #[test]
    fn missing_required_check_blocks_merge() {
        let policy = MergePolicy { required_checks: vec!["ci".to_string()], required_approvals: 0, require_non_draft: false };
        let hint = merge_policy_hint(&policy, &state(false, 0, false, true));
        assert_eq!(hint.as_deref(), Some("merge_policy_checks_missing:ci"));
    }

    #[test]
    fn insufficient_approvals_blocks_merge() {
        let policy = MergePolicy { required_checks: vec![], required_approvals: 2, require_non_draft: false };
        let hint = merge_policy_hint(&policy, &state(true, 1, false, true));
        assert_eq!(hint.as_deref(), Some("merge_policy_approvals_missing:2"));
    }

    #[test]
    fn draft_blocks_merge_when_required_non_draft() {
        let policy = MergePolicy { required_checks: vec![], required_approvals: 0, require_non_draft: true };
        let hint = merge_policy_hint(&policy, &state(true, 0, true, true));
        assert_eq!(hint.as_deref(), Some("merge_policy_draft_not_allowed"));
    }

    #[test]
    fn satisfied_policy_allows_merge() {
        let policy = MergePolicy { required_checks: vec!["ci".to_string()], required_approvals: 1, require_non_draft: true };
        assert!(merge_policy_hint(&policy, &state(true, 1, false, true)).is_none());
    }

    #[test]
    fn surface_names_map_to_task_types() {
        assert_eq!(task_type_for_surface("surface-commit"), Some(GitTaskType::SurfaceCommit));
        assert_eq!(task_type_for_surface("backend-artifact-commit"), Some(GitTaskType::ArtifactCommit));
        assert_eq!(task_type_for_surface("unknown"), None);
    }
}

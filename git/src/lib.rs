//! `GitHost` (C8) implementation shelling out to a local `git` checkout
//! and the `gh` CLI for pull-request operations, the same subprocess
//! idiom `synod-chain` uses for its Node/`ethers` signer — the git
//! outbox worker needs no library-level git implementation, just a
//! thin, testable wrapper around the two CLIs already present on any
//! operator host.

use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use synod_core::git_outbox::{CheckStatus, GitFileChange, GitHost, PullRequestState};
use synod_core::{Error, Result};
use tokio::fs;
use tokio::process::Command;
use tokio::time::timeout;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Drives `git` and `gh` against a single checked-out repository.
/// `remote_name` is almost always `"origin"`; `repo_slug` (`owner/name`)
/// is required for `gh pr` subcommands that don't infer it from the
/// working directory's remote in a headless checkout.
pub struct LocalGitHost {
    pub repo_dir: String,
    pub remote_name: String,
    pub repo_slug: String,
    pub base_branch: String,
}

impl LocalGitHost {
    pub fn new(repo_dir: impl Into<String>, repo_slug: impl Into<String>) -> Self {
        Self { repo_dir: repo_dir.into(), remote_name: "origin".to_string(), repo_slug: repo_slug.into(), base_branch: "main".to_string() }
    }

    pub fn from_config(config: &synod_core::config::Config) -> Self {
        let mut host = Self::new(config.git_repo_dir.clone(), config.git_repo_slug.clone().unwrap_or_default());
        host.base_branch = config.git_base_branch.clone();
        host
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let mut command = Command::new(program);
        command.args(args).current_dir(&self.repo_dir).stdout(Stdio::piped()).stderr(Stdio::piped());

        let output = timeout(COMMAND_TIMEOUT, command.output())
            .await
            .map_err(|_| Error::Internal(anyhow::anyhow!("{program}_timed_out")))?
            .map_err(|err| Error::Internal(anyhow::anyhow!("{program}_spawn_failed:{err}")))?;

        if !output.status.success() {
            let hint = sanitize_subprocess_error(program, &String::from_utf8_lossy(&output.stdout), &String::from_utf8_lossy(&output.stderr));
            return Err(Error::Internal(anyhow::anyhow!(hint)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl GitHost for LocalGitHost {
    /// Checks out `branch_name` off `base_branch` (creating it if
    /// absent), writes every `files` entry, commits, and pushes. Returns
    /// the new commit SHA.
    async fn commit_files(&self, branch_name: &str, files: &[GitFileChange], message: &str) -> Result<String> {
        self.run("git", &["fetch", &self.remote_name, &self.base_branch]).await?;
        let checkout = self.run("git", &["checkout", "-B", branch_name, &format!("{}/{}", self.remote_name, self.base_branch)]).await;
        checkout?;

        for file in files {
            let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &file.contents_base64)
                .map_err(|err| Error::Internal(anyhow::anyhow!("invalid_payload:bad_base64_file_contents:{err}")))?;
            let full_path = std::path::Path::new(&self.repo_dir).join(&file.path);
            if let Some(parent) = full_path.parent() {
                fs::create_dir_all(parent).await.map_err(|err| Error::Internal(anyhow::anyhow!("file_write_failed:{err}")))?;
            }
            fs::write(&full_path, bytes).await.map_err(|err| Error::Internal(anyhow::anyhow!("file_write_failed:{err}")))?;
        }

        self.run("git", &["add", "-A"]).await?;
        self.run("git", &["commit", "-m", message]).await?;
        self.run("git", &["push", "--force-with-lease", &self.remote_name, branch_name]).await?;
        self.run("git", &["rev-parse", "HEAD"]).await
    }

    async fn open_pull_request(&self, branch_name: &str, title: &str, body: &str) -> Result<String> {
        self.run(
            "gh",
            &["pr", "create", "--repo", &self.repo_slug, "--head", branch_name, "--base", &self.base_branch, "--title", title, "--body", body],
        )
        .await
    }

    async fn pull_request_state(&self, pr_url: &str) -> Result<PullRequestState> {
        let raw = self
            .run("gh", &["pr", "view", pr_url, "--repo", &self.repo_slug, "--json", "statusCheckRollup,reviews,isDraft,mergeable"])
            .await?;
        let parsed: Value = serde_json::from_str(&raw).map_err(|err| Error::Internal(anyhow::anyhow!("invalid_payload:unparseable_pr_state:{err}")))?;

        let checks = parsed
            .get("statusCheckRollup")
            .and_then(|v| v.as_array())
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        let name = entry.get("name").and_then(|v| v.as_str())?;
                        let conclusion = entry.get("conclusion").and_then(|v| v.as_str()).unwrap_or("");
                        Some(CheckStatus { name: name.to_string(), passed: conclusion.eq_ignore_ascii_case("success") })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let approvals = parsed
            .get("reviews")
            .and_then(|v| v.as_array())
            .map(|entries| entries.iter().filter(|r| r.get("state").and_then(|s| s.as_str()) == Some("APPROVED")).count() as i32)
            .unwrap_or(0);

        let is_draft = parsed.get("isDraft").and_then(|v| v.as_bool()).unwrap_or(false);
        let mergeable = parsed.get("mergeable").and_then(|v| v.as_str()).is_some_and(|state| state.eq_ignore_ascii_case("mergeable"));

        Ok(PullRequestState { checks, approvals, is_draft, mergeable })
    }

    async fn merge_pull_request(&self, pr_url: &str) -> Result<()> {
        self.run("gh", &["pr", "merge", pr_url, "--repo", &self.repo_slug, "--merge", "--delete-branch"]).await?;
        Ok(())
    }
}

/// Maps raw `git`/`gh` subprocess output onto a small fixed hint
/// vocabulary, the same treatment `synod-chain`'s signer gives Node
/// subprocess failures.
fn sanitize_subprocess_error(program: &str, stdout: &str, stderr: &str) -> String {
    let combined = [stderr.trim(), stdout.trim()].into_iter().filter(|s| !s.is_empty()).collect::<Vec<_>>().join(" ");
    if combined.is_empty() {
        return format!("unknown_{program}_error");
    }
    let lowered = combined.to_lowercase();
    if lowered.contains("not found") && lowered.contains(program) {
        return format!("{program}_not_installed");
    }
    if lowered.contains("authentication") || lowered.contains("401") || lowered.contains("403") {
        return format!("{program}_auth_failed");
    }
    if lowered.contains("conflict") {
        return format!("{program}_conflict");
    }
    if lowered.contains("already exists") {
        return format!("{program}_already_exists");
    }
    let compact: String = combined.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("{program}_error:{}", compact.chars().take(160).collect::<String>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_missing_binary() {
        assert_eq!(sanitize_subprocess_error("gh", "", "gh: command not found"), "gh_not_installed");
    }

    #[test]
    fn sanitizes_auth_failure() {
        assert_eq!(sanitize_subprocess_error("gh", "", "HTTP 401: Bad credentials"), "gh_auth_failed");
    }

    #[test]
    fn sanitizes_merge_conflict() {
        assert_eq!(sanitize_subprocess_error("git", "", "CONFLICT (content): Merge conflict in file.rs"), "git_conflict");
    }

    #[test]
    fn empty_output_yields_unknown() {
        assert_eq!(sanitize_subprocess_error("git", "", ""), "unknown_git_error");
    }
}

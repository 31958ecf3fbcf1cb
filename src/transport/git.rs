//! Git transport: a shared bare upstream repo as the medium (spec §4.3).
//!
//! Each envelope becomes exactly one commit on the sender's branch,
//! carrying a single blob `frame.json`. Shelling out to `git` mirrors
//! the teacher's own git integration (`git.rs`): every call is a
//! synchronous `Command::new("git")`, run off the async executor via
//! `spawn_blocking` since the git CLI has no async story of its own.

use crate::constants::{GIT_BRANCH_C2S, GIT_BRANCH_S2C, GIT_CURSOR_REF, GIT_FRAME_BLOB, GIT_RETRY_INITIAL_BACKOFF, GIT_RETRY_MAX_BACKOFF, GIT_SYNC_INTERVAL};
use crate::session::dedup::DedupWindow;
use crate::session::envelope::{Envelope, Role};
use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Duration;
use tokio::time::timeout as tokio_timeout;

pub struct GitTransport {
    local_repo: PathBuf,
    upstream_url: String,
    send_branch: &'static str,
    recv_branch: &'static str,
    cursor: Option<String>,
    dedup: DedupWindow,
    pending: VecDeque<Envelope>,
}

impl GitTransport {
    pub async fn open(role: Role, local_repo: PathBuf, upstream_url: String) -> Result<Self, TransportError> {
        let (send_branch, recv_branch) = match role {
            Role::Client => (GIT_BRANCH_C2S, GIT_BRANCH_S2C),
            Role::Server => (GIT_BRANCH_S2C, GIT_BRANCH_C2S),
        };
        let repo = local_repo.clone();
        let cursor = tokio::task::spawn_blocking(move || init_mirror(&repo))
            .await
            .map_err(|e| TransportError::TransportSetup(format!("git mirror init task panicked: {e}")))??;

        Ok(Self {
            local_repo,
            upstream_url,
            send_branch,
            recv_branch,
            cursor,
            dedup: DedupWindow::new(crate::constants::DEDUP_WINDOW_CAPACITY),
            pending: VecDeque::new(),
        })
    }
}

#[async_trait]
impl Transport for GitTransport {
    async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        let repo = self.local_repo.clone();
        let upstream = self.upstream_url.clone();
        let branch = self.send_branch;
        let json = envelope
            .encode()
            .map_err(|e| TransportError::Encoding(format!("failed to encode envelope: {e}")))?;
        let message = format!("gitssh2 seq={} msg_id={}", envelope.seq, envelope.msg_id);

        tokio::task::spawn_blocking(move || commit_and_push(&repo, &upstream, branch, &json, &message))
            .await
            .map_err(|e| TransportError::TransportBroken(format!("git push task panicked: {e}")))?
    }

    async fn recv(&mut self, timeout: Duration) -> Result<Envelope, TransportError> {
        if let Some(envelope) = self.pending.pop_front() {
            return Ok(envelope);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let repo = self.local_repo.clone();
            let upstream = self.upstream_url.clone();
            let branch = self.recv_branch;
            let cursor = self.cursor.clone();

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout("git transport: no new commits".into()));
            }

            let fetched = tokio_timeout(remaining.min(GIT_SYNC_INTERVAL), tokio::task::spawn_blocking(move || fetch_new_envelopes(&repo, &upstream, branch, cursor.as_deref())))
                .await
                .ok()
                .transpose()
                .map_err(|e| TransportError::TransportBroken(format!("git fetch task panicked: {e}")))?;

            if let Some(Ok((new_cursor, envelopes))) = fetched {
                if let Some(new_cursor) = new_cursor {
                    self.cursor = Some(new_cursor);
                }
                for envelope in envelopes {
                    if !self.dedup.is_duplicate(&envelope.msg_id) {
                        self.pending.push_back(envelope);
                    }
                }
                if let Some(envelope) = self.pending.pop_front() {
                    return Ok(envelope);
                }
            } else if let Some(Err(e)) = fetched {
                return Err(e);
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn close(&mut self) {}
}

fn run_git(repo: &Path, args: &[&str]) -> Result<Output, TransportError> {
    Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .map_err(|e| TransportError::TransportBroken(format!("failed to run git {args:?}: {e}")))
}

fn init_mirror(repo: &Path) -> Result<Option<String>, TransportError> {
    if !repo.join("HEAD").exists() {
        std::fs::create_dir_all(repo)
            .map_err(|e| TransportError::TransportSetup(format!("failed to create local mirror dir: {e}")))?;
        let output = Command::new("git")
            .args(["init", "--bare", "."])
            .current_dir(repo)
            .output()
            .map_err(|e| TransportError::TransportSetup(format!("git init --bare failed: {e}")))?;
        if !output.status.success() {
            return Err(TransportError::TransportSetup(format!(
                "git init --bare failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
    }

    let output = run_git(repo, &["rev-parse", GIT_CURSOR_REF])?;
    if output.status.success() {
        Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
    } else {
        Ok(None)
    }
}

/// Commit `json` as `frame.json` on `branch` and push to `upstream`,
/// rebasing onto a fresh fetch on non-fast-forward (spec §4.3), with
/// capped exponential backoff on transient failure.
fn commit_and_push(repo: &Path, upstream: &str, branch: &str, json: &str, message: &str) -> Result<(), TransportError> {
    let mut backoff = GIT_RETRY_INITIAL_BACKOFF;
    loop {
        let parent = run_git(repo, &["rev-parse", branch]).ok().filter(|o| o.status.success()).map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string());

        let blob_sha = run_hash_object(repo, json)?;
        let tree_sha = run_mktree(repo, &blob_sha)?;
        let commit_sha = run_commit_tree(repo, &tree_sha, parent.as_deref(), message)?;

        let update = run_git(repo, &["update-ref", &format!("refs/heads/{branch}"), &commit_sha])?;
        if !update.status.success() {
            return Err(TransportError::TransportBroken(format!(
                "git update-ref failed: {}",
                String::from_utf8_lossy(&update.stderr)
            )));
        }

        let push = run_git(repo, &["push", upstream, &format!("{branch}:{branch}")])?;
        if push.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&push.stderr);
        if !stderr.contains("non-fast-forward") && !stderr.contains("fetch first") {
            if backoff >= GIT_RETRY_MAX_BACKOFF {
                return Err(TransportError::TransportBroken(format!("git push failed persistently: {stderr}")));
            }
            std::thread::sleep(backoff);
            backoff = (backoff * 2).min(GIT_RETRY_MAX_BACKOFF);
            continue;
        }

        // Non-fast-forward: fetch the new tip and retry with it as parent.
        let _ = run_git(repo, &["fetch", upstream, &format!("{branch}:refs/remotes/upstream/{branch}")]);
    }
}

fn run_hash_object(repo: &Path, content: &str) -> Result<String, TransportError> {
    use std::io::Write as _;
    use std::process::Stdio;
    let mut child = Command::new("git")
        .args(["hash-object", "-w", "--stdin"])
        .current_dir(repo)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|e| TransportError::TransportBroken(format!("git hash-object spawn failed: {e}")))?;
    child
        .stdin
        .take()
        .expect("stdin was piped")
        .write_all(content.as_bytes())
        .map_err(|e| TransportError::TransportBroken(format!("git hash-object write failed: {e}")))?;
    let output = child
        .wait_with_output()
        .map_err(|e| TransportError::TransportBroken(format!("git hash-object wait failed: {e}")))?;
    if !output.status.success() {
        return Err(TransportError::TransportBroken("git hash-object failed".into()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn run_mktree(repo: &Path, blob_sha: &str) -> Result<String, TransportError> {
    use std::io::Write as _;
    use std::process::Stdio;
    let entry = format!("100644 blob {blob_sha}\t{GIT_FRAME_BLOB}\n");
    let mut child = Command::new("git")
        .args(["mktree"])
        .current_dir(repo)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|e| TransportError::TransportBroken(format!("git mktree spawn failed: {e}")))?;
    child
        .stdin
        .take()
        .expect("stdin was piped")
        .write_all(entry.as_bytes())
        .map_err(|e| TransportError::TransportBroken(format!("git mktree write failed: {e}")))?;
    let output = child
        .wait_with_output()
        .map_err(|e| TransportError::TransportBroken(format!("git mktree wait failed: {e}")))?;
    if !output.status.success() {
        return Err(TransportError::TransportBroken("git mktree failed".into()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn run_commit_tree(repo: &Path, tree_sha: &str, parent: Option<&str>, message: &str) -> Result<String, TransportError> {
    let mut args = vec!["commit-tree".to_string(), tree_sha.to_string()];
    if let Some(parent) = parent {
        args.push("-p".to_string());
        args.push(parent.to_string());
    }
    args.push("-m".to_string());
    args.push(message.to_string());
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = run_git(repo, &arg_refs)?;
    if !output.status.success() {
        return Err(TransportError::TransportBroken(format!(
            "git commit-tree failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Fetch `branch` and walk every new commit since `cursor`, decoding
/// each one's `frame.json` blob into an [`Envelope`].
fn fetch_new_envelopes(repo: &Path, upstream: &str, branch: &str, cursor: Option<&str>) -> Result<(Option<String>, Vec<Envelope>), TransportError> {
    let tracking_ref = format!("refs/remotes/upstream/{branch}");
    let fetch = run_git(repo, &["fetch", upstream, &format!("{branch}:{tracking_ref}")])?;
    if !fetch.status.success() {
        let stderr = String::from_utf8_lossy(&fetch.stderr);
        if stderr.contains("couldn't find remote ref") {
            return Ok((None, Vec::new()));
        }
        return Err(TransportError::TransportBroken(format!("git fetch failed: {stderr}")));
    }

    let range = match cursor {
        Some(sha) => format!("{sha}..{tracking_ref}"),
        None => tracking_ref.clone(),
    };
    let rev_list = run_git(repo, &["rev-list", "--reverse", &range])?;
    if !rev_list.status.success() {
        return Ok((None, Vec::new()));
    }

    let shas: Vec<String> = String::from_utf8_lossy(&rev_list.stdout).lines().map(str::to_string).collect();
    let mut envelopes = Vec::new();
    let mut last_sha = cursor.map(str::to_string);

    for sha in &shas {
        let show = run_git(repo, &["show", &format!("{sha}:{GIT_FRAME_BLOB}")])?;
        if show.status.success() {
            let json = String::from_utf8_lossy(&show.stdout);
            match Envelope::decode(&json) {
                Ok(envelope) => envelopes.push(envelope),
                Err(e) => log::debug!("clipssh: dropped malformed git frame {sha}: {e}"),
            }
        }
        last_sha = Some(sha.clone());
    }

    if let Some(sha) = &last_sha {
        let _ = run_git(repo, &["update-ref", GIT_CURSOR_REF, sha]);
    }

    Ok((last_sha, envelopes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branches_are_assigned_by_role() {
        // Pure mapping check; exercising `open` needs a real git binary
        // and a scratch bare repo, covered by the scenario tests.
        let (client_send, client_recv) = match Role::Client {
            Role::Client => (GIT_BRANCH_C2S, GIT_BRANCH_S2C),
            Role::Server => (GIT_BRANCH_S2C, GIT_BRANCH_C2S),
        };
        assert_eq!(client_send, GIT_BRANCH_C2S);
        assert_eq!(client_recv, GIT_BRANCH_S2C);
    }
}

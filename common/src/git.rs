// Thin async wrapper over the git command line
//
// Every invocation is self-contained: identity and credentials travel with
// the single child process that needs them and are never written to any git
// config file.

use crate::errors::PublishError;
use crate::models::{AuthorIdentity, CommitId, CommitOutcome};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::OnceLock;
use tokio::process::Command;
use tracing::debug;

/// Markers git prints when a push loses a race for the branch head
const REJECTION_MARKERS: &[&str] = &["[rejected]", "non-fast-forward", "fetch first", "stale info"];

/// Replace credentials in git output before it reaches logs or errors
pub fn mask_secrets(text: &str) -> String {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            (r"(?i)(authorization:\s*(basic|bearer))\s+[A-Za-z0-9+/=._\-]+", "$1 [MASKED]"),
            (r"(https?://)[^/@\s]+@", "$1[MASKED]@"),
            (r"gh[pousr]_[A-Za-z0-9]{20,}", "[MASKED]"),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
        .collect()
    });

    let mut result = text.to_string();
    for (re, replacement) in patterns {
        result = re.replace_all(&result, *replacement).into_owned();
    }
    result
}

/// Header value git sends for token authentication over HTTPS
fn auth_header(token: &str) -> String {
    let encoded = STANDARD.encode(format!("x-access-token:{}", token));
    format!("AUTHORIZATION: basic {}", encoded)
}

/// Config overrides that leave `token` as the only credential on push.
///
/// An empty value clears headers already configured for the key. Keying on
/// the full remote URL outranks headers stored for a broader URL prefix,
/// such as the one a CI checkout step persists for the host.
fn credential_args(remote_url: Option<&str>, token: &str) -> Vec<String> {
    let key = match remote_url {
        Some(url) if url.starts_with("https://") || url.starts_with("http://") => {
            format!("http.{}.extraheader", url)
        }
        _ => "http.extraheader".to_string(),
    };
    vec![
        "-c".to_string(),
        format!("{}=", key),
        "-c".to_string(),
        format!("{}={}", key, auth_header(token)),
    ]
}

fn output_text(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    mask_secrets(format!("{}\n{}", stdout.trim(), stderr.trim()).trim())
}

/// A git working tree
#[derive(Debug, Clone)]
pub struct GitRepo {
    workdir: PathBuf,
}

impl GitRepo {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn command(&self) -> Command {
        let mut command = Command::new("git");
        command
            .current_dir(&self.workdir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);
        command
    }

    async fn output(&self, mut command: Command) -> Result<Output, PublishError> {
        command
            .output()
            .await
            .map_err(|e| PublishError::GitUnavailable(e.to_string()))
    }

    /// Stage tracked and untracked changes
    pub async fn stage_all(&self) -> Result<(), PublishError> {
        let mut command = self.command();
        command.args(["add", "--all"]);
        let output = self.output(command).await?;
        if !output.status.success() {
            return Err(PublishError::StageFailed(output_text(&output)));
        }
        Ok(())
    }

    /// Whether the index differs from HEAD
    pub async fn has_staged_changes(&self) -> Result<bool, PublishError> {
        let mut command = self.command();
        command.args(["diff", "--cached", "--quiet"]);
        let output = self.output(command).await?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(PublishError::DiffFailed(output_text(&output))),
        }
    }

    pub async fn head(&self) -> Result<CommitId, PublishError> {
        let mut command = self.command();
        command.args(["rev-parse", "HEAD"]);
        let output = self.output(command).await?;
        if !output.status.success() {
            return Err(PublishError::CommitFailed(output_text(&output)));
        }
        Ok(CommitId(
            String::from_utf8_lossy(&output.stdout).trim().to_string(),
        ))
    }

    /// Commit the index as `author`.
    ///
    /// "Nothing to commit" is reported as `NoChange`, not as an error.
    pub async fn commit(
        &self,
        author: &AuthorIdentity,
        message: &str,
    ) -> Result<CommitOutcome, PublishError> {
        let mut command = self.command();
        command
            .args(["commit", "--quiet", "-m", message])
            .env("GIT_AUTHOR_NAME", &author.name)
            .env("GIT_AUTHOR_EMAIL", &author.email)
            .env("GIT_COMMITTER_NAME", &author.name)
            .env("GIT_COMMITTER_EMAIL", &author.email);

        let output = self.output(command).await?;
        if !output.status.success() {
            let text = output_text(&output);
            if is_nothing_to_commit(&text) {
                debug!("git reported nothing to commit");
                return Ok(CommitOutcome::NoChange);
            }
            return Err(PublishError::CommitFailed(text));
        }

        Ok(CommitOutcome::Committed(self.head().await?))
    }

    /// URL behind a remote name; a remote given as a URL is returned as is
    async fn remote_url(&self, remote: &str) -> Option<String> {
        if remote.contains("://") {
            return Some(remote.to_string());
        }
        let mut command = self.command();
        command.args(["remote", "get-url", remote]);
        let output = self.output(command).await.ok()?;
        output
            .status
            .success()
            .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Push HEAD to `branch` on `remote`; never forces
    pub async fn push(
        &self,
        remote: &str,
        branch: &str,
        token: Option<&str>,
    ) -> Result<(), PublishError> {
        let mut command = self.command();
        if let Some(token) = token {
            let url = self.remote_url(remote).await;
            command.args(credential_args(url.as_deref(), token));
        }
        command
            .args(["push", remote])
            .arg(format!("HEAD:refs/heads/{}", branch));

        let output = self.output(command).await?;
        if output.status.success() {
            return Ok(());
        }

        let text = output_text(&output);
        if is_rejection(&text) {
            Err(PublishError::PushRejected(text))
        } else {
            Err(PublishError::PushFailed(text))
        }
    }
}

pub fn is_nothing_to_commit(text: &str) -> bool {
    text.contains("nothing to commit") || text.contains("nothing added to commit")
}

pub fn is_rejection(text: &str) -> bool {
    REJECTION_MARKERS.iter().any(|marker| text.contains(marker))
}

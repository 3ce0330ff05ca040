// Change publisher
//
// Commits whatever the producer left in the working tree and pushes it to the
// target branch. A clean tree is a successful no-op.

use crate::config::PublishConfig;
use crate::errors::PublishError;
use crate::git::GitRepo;
use crate::models::{AuthorIdentity, CommitId, CommitOutcome};
use async_trait::async_trait;
use std::path::Path;
use tracing::{info, instrument, warn};

/// What publishing did for a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published(CommitId),
    NoChange,
}

/// ChangePublisher turns working tree changes into a pushed commit
#[async_trait]
pub trait ChangePublisher: Send + Sync {
    async fn publish(&self, workdir: &Path) -> Result<PublishOutcome, PublishError>;
}

pub struct GitPublisher {
    author: AuthorIdentity,
    message: String,
    remote: String,
    branch: String,
    token: Option<String>,
}

impl GitPublisher {
    pub fn new(config: &PublishConfig, token: Option<String>) -> Self {
        Self {
            author: AuthorIdentity {
                name: config.author_name.clone(),
                email: config.author_email.clone(),
            },
            message: config.message.clone(),
            remote: config.remote.clone(),
            branch: config.branch.clone(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    /// Build a publisher reading the push token from `config.token_env`
    pub fn from_env(config: &PublishConfig) -> Self {
        let token = std::env::var(&config.token_env).ok();
        if token.is_none() {
            warn!(
                token_env = %config.token_env,
                "No push token in environment, pushing with ambient credentials"
            );
        }
        Self::new(config, token)
    }

    /// Stage everything and commit it; the first half of publishing
    pub async fn commit_changes(&self, repo: &GitRepo) -> Result<CommitOutcome, PublishError> {
        repo.stage_all().await?;

        if !repo.has_staged_changes().await? {
            return Ok(CommitOutcome::NoChange);
        }

        repo.commit(&self.author, &self.message).await
    }
}

#[async_trait]
impl ChangePublisher for GitPublisher {
    #[instrument(skip(self), fields(remote = %self.remote, branch = %self.branch))]
    async fn publish(&self, workdir: &Path) -> Result<PublishOutcome, PublishError> {
        let repo = GitRepo::new(workdir);

        let commit = match self.commit_changes(&repo).await? {
            CommitOutcome::NoChange => {
                info!("Working tree matches HEAD, nothing to publish");
                return Ok(PublishOutcome::NoChange);
            }
            CommitOutcome::Committed(commit) => commit,
        };

        info!(commit = %commit.short(), author = %self.author.email, "Commit created");

        repo.push(&self.remote, &self.branch, self.token.as_deref())
            .await?;

        info!(commit = %commit.short(), "Pushed to {}/{}", self.remote, self.branch);
        Ok(PublishOutcome::Published(commit))
    }
}

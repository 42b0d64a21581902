//! One feedsync run: ensure the feeds directory, download the feed, store
//! it, then stage/commit/push it.
//!
//! Failure policy: a failed download, write, `git add` or `git commit`
//! aborts the run. A failed push is logged as a warning and reported in
//! [`PushOutcome::Failed`]; the commit stays local and the next successful
//! run pushes it.

use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::feed::{fetch_feed, FeedSummary, FetchError};
use crate::storage::{self, PersistError};
use crate::vcs::{commit_message, VcsError, VersionControl};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Failed to download feed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Failed to store feed: {0}")]
    Persist(#[from] PersistError),

    #[error("Failed to stage changes: {0}")]
    Stage(#[source] VcsError),

    #[error("Failed to check for changes: {0}")]
    ChangeCheck(#[source] VcsError),

    #[error("Failed to commit feed: {0}")]
    Commit(#[source] VcsError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Push disabled with `--no-push`.
    Skipped,
    Pushed,
    /// Push attempted and failed; holds the error message.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Version control disabled with `--no-commit`.
    Disabled,
    /// Staged tree matched the last commit; commit and push skipped.
    NothingToCommit,
    Committed { message: String, push: PushOutcome },
}

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub file: PathBuf,
    pub bytes: usize,
    pub summary: FeedSummary,
    pub sync: SyncOutcome,
}

/// Executes a full run. `now` names the feed file.
pub async fn run<V: VersionControl>(
    config: &Config,
    client: &reqwest::Client,
    vcs: &V,
    now: NaiveDateTime,
) -> Result<RunReport, RunError> {
    storage::ensure_dir(&config.feeds_dir)?;

    let feed = fetch_feed(client, &config.feed_url, &config.fetch).await?;

    let summary = FeedSummary::from_text(&feed.text());
    info!(
        lines = summary.lines,
        columns = summary.columns,
        header = %summary.preview(),
        "Feed contents"
    );

    let file = storage::write_feed(&config.feeds_dir, &feed.body, config.fetch.write_bom, &now)?;
    let outcome = sync(config, vcs, &file).await?;

    Ok(RunReport {
        file,
        bytes: feed.body.len(),
        summary,
        sync: outcome,
    })
}

/// Stages, commits and pushes after `file` has been written.
///
/// Nothing is invoked on `vcs` when committing is disabled.
pub async fn sync<V: VersionControl>(
    config: &Config,
    vcs: &V,
    file: &Path,
) -> Result<SyncOutcome, RunError> {
    if !config.commit {
        info!("Commit disabled, leaving changes unstaged");
        return Ok(SyncOutcome::Disabled);
    }

    info!("Staging changes");
    vcs.add_all().await.map_err(RunError::Stage)?;

    if !vcs
        .has_staged_changes()
        .await
        .map_err(RunError::ChangeCheck)?
    {
        info!("No changes to commit, nothing to do");
        return Ok(SyncOutcome::NothingToCommit);
    }

    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let message = commit_message(&config.git.commit_template, &file_name);
    vcs.commit(&message).await.map_err(RunError::Commit)?;
    info!(commit_message = %message, "Committed feed");

    if !config.push {
        info!("Push disabled, commit stays local");
        return Ok(SyncOutcome::Committed {
            message,
            push: PushOutcome::Skipped,
        });
    }

    info!(remote = %config.git.remote, branch = %config.git.branch, "Pushing");
    let push = match vcs.push(&config.git.remote, &config.git.branch).await {
        Ok(()) => {
            info!("Push complete");
            PushOutcome::Pushed
        }
        Err(e) => {
            warn!(error = %e, "Push failed, commit stays local");
            PushOutcome::Failed(e.to_string())
        }
    };

    Ok(SyncOutcome::Committed { message, push })
}

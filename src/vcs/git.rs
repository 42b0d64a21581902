use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, instrument};

use super::{GitOp, VcsError, VersionControl};

/// Runs `git` subprocesses in a repository working directory.
///
/// Every invocation is bounded by `timeout`; the child is killed when it
/// overruns. Credential prompts are disabled so a push without stored
/// credentials fails instead of waiting on a terminal.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    timeout: Duration,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            workdir: workdir.into(),
            timeout,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    #[instrument(skip_all, fields(op = op.name()))]
    async fn run(&self, op: &GitOp) -> Result<Output, VcsError> {
        let args = op.args();
        debug!(args = ?args, workdir = %self.workdir.display(), "running git");

        let mut cmd = Command::new("git");
        cmd.args(&args)
            .current_dir(&self.workdir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| VcsError::Timeout {
                op: op.name(),
                timeout: self.timeout,
            })?
            .map_err(|source| VcsError::Spawn {
                op: op.name(),
                source,
            })?;

        debug!(exit_code = ?output.status.code(), "git finished");
        Ok(output)
    }

    async fn run_checked(&self, op: &GitOp) -> Result<Output, VcsError> {
        let output = self.run(op).await?;
        if !output.status.success() {
            return Err(failure(op, &output));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!(op = op.name(), stdout = %stdout.trim(), "git output");
        }
        Ok(output)
    }
}

fn failure(op: &GitOp, output: &Output) -> VcsError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let text = if stderr.trim().is_empty() {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    } else {
        stderr.trim().to_string()
    };
    VcsError::CommandFailed {
        op: op.name(),
        code: output.status.code(),
        output: text,
    }
}

impl VersionControl for Git {
    async fn add_all(&self) -> Result<(), VcsError> {
        self.run_checked(&GitOp::Add).await?;
        Ok(())
    }

    async fn has_staged_changes(&self) -> Result<bool, VcsError> {
        let op = GitOp::HasStagedChanges;
        let output = self.run(&op).await?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(failure(&op, &output)),
        }
    }

    async fn commit(&self, message: &str) -> Result<(), VcsError> {
        debug!(commit_message = %message, "committing staged changes");
        self.run_checked(&GitOp::Commit {
            message: message.to_string(),
        })
        .await?;
        Ok(())
    }

    async fn push(&self, remote: &str, branch: &str) -> Result<(), VcsError> {
        debug!(remote, branch, "pushing");
        self.run_checked(&GitOp::Push {
            remote: remote.to_string(),
            branch: branch.to_string(),
        })
        .await?;
        Ok(())
    }
}

//! Version-control sync for stored feed files.
//!
//! The pipeline talks to version control through the [`VersionControl`]
//! trait; [`Git`] is the production implementation and shells out to the
//! `git` binary. Each operation the pipeline needs is a typed method backed
//! by a [`GitOp`] variant.

mod git;

use std::future::Future;
use thiserror::Error;

pub use git::Git;

/// The git invocations feedsync performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitOp {
    /// Stage every working-tree change (respects .gitignore).
    Add,
    /// Exit status 1 when the index differs from HEAD.
    HasStagedChanges,
    Commit { message: String },
    Push { remote: String, branch: String },
}

impl GitOp {
    pub fn name(&self) -> &'static str {
        match self {
            GitOp::Add => "add",
            GitOp::HasStagedChanges => "diff",
            GitOp::Commit { .. } => "commit",
            GitOp::Push { .. } => "push",
        }
    }

    pub fn args(&self) -> Vec<&str> {
        match self {
            GitOp::Add => vec!["add", "-A"],
            GitOp::HasStagedChanges => vec!["diff", "--cached", "--quiet"],
            GitOp::Commit { message } => vec!["commit", "-m", message.as_str()],
            GitOp::Push { remote, branch } => vec!["push", remote.as_str(), branch.as_str()],
        }
    }
}

impl std::fmt::Display for GitOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("Failed to run git {op}: {source}")]
    Spawn {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("git {op} failed (exit code {}): {output}", exit_code(.code))]
    CommandFailed {
        op: &'static str,
        code: Option<i32>,
        /// stderr of the command, or stdout when stderr was empty
        output: String,
    },

    /// The child is killed when the timeout elapses.
    #[error("git {op} timed out after {timeout:?}")]
    Timeout {
        op: &'static str,
        timeout: std::time::Duration,
    },
}

fn exit_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none".to_string(), |c| c.to_string())
}

/// Operations the sync step needs from a version-control system.
pub trait VersionControl {
    /// Stage all working-tree changes.
    fn add_all(&self) -> impl Future<Output = Result<(), VcsError>> + Send;

    /// True if the staged tree differs from the last commit.
    fn has_staged_changes(&self) -> impl Future<Output = Result<bool, VcsError>> + Send;

    fn commit(&self, message: &str) -> impl Future<Output = Result<(), VcsError>> + Send;

    fn push(&self, remote: &str, branch: &str)
        -> impl Future<Output = Result<(), VcsError>> + Send;
}

/// Renders the commit message, replacing `{file}` with the feed file name.
pub fn commit_message(template: &str, file_name: &str) -> String {
    template.replace("{file}", file_name)
}

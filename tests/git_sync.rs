//! Integration tests against a real `git` binary.
//!
//! Each test builds a scratch working repository plus a bare remote in a
//! temp directory. Tests return early when `git` is not installed.

use chrono::{NaiveDate, NaiveDateTime};
use feedsync::config::{Config, FileConfig, Overrides};
use feedsync::pipeline::{self, PushOutcome, SyncOutcome};
use feedsync::vcs::{Git, VcsError, VersionControl};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

const FEED_BODY: &str = "indicator,iocType,risk\n203.0.113.7,ip,high\n";

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Creates `work/` (one initial commit on `main`) and a bare `remote.git/`
/// wired up as `origin`.
fn scratch_repo(root: &Path) -> (PathBuf, PathBuf) {
    let work = root.join("work");
    let remote = root.join("remote.git");
    std::fs::create_dir_all(&work).unwrap();
    std::fs::create_dir_all(&remote).unwrap();

    git(&remote, &["init", "--bare", "--quiet"]);
    git(&work, &["init", "--quiet"]);
    git(&work, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    git(&work, &["config", "user.email", "feeds@example.com"]);
    git(&work, &["config", "user.name", "Feed Bot"]);
    git(&work, &["config", "commit.gpgsign", "false"]);
    git(&work, &["remote", "add", "origin", remote.to_str().unwrap()]);

    std::fs::write(work.join("README.md"), "threat feeds\n").unwrap();
    git(&work, &["add", "README.md"]);
    git(&work, &["commit", "--quiet", "-m", "init"]);

    (work, remote)
}

fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 1, 15)
        .unwrap()
        .and_hms_opt(23, 59, 59)
        .unwrap()
}

fn config(server: &MockServer, work: &Path) -> Config {
    Config::resolve(
        Overrides {
            feed_url: Some(format!("{}/feeds/IoC_IP_Output", server.uri())),
            repo_dir: work.to_path_buf(),
            ..Overrides::default()
        },
        None,
        FileConfig::default(),
    )
    .unwrap()
}

async fn feed_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(FEED_BODY, "text/csv"))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_run_commits_and_pushes_feed() {
    if !git_available() {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let (work, remote) = scratch_repo(root.path());
    let server = feed_server().await;
    let config = config(&server, &work);
    let vcs = Git::new(&work, Duration::from_secs(30));

    let report = pipeline::run(&config, &reqwest::Client::new(), &vcs, now())
        .await
        .unwrap();

    assert!(matches!(
        report.sync,
        SyncOutcome::Committed {
            push: PushOutcome::Pushed,
            ..
        }
    ));
    let log = git(&remote, &["log", "--format=%s", "main"]);
    assert_eq!(
        log.lines().next(),
        Some("feat: automatic feed update feed_20250115_235959.csv")
    );
    let tracked = git(&work, &["ls-files", "feeds"]);
    assert_eq!(tracked.trim(), "feeds/feed_20250115_235959.csv");
}

#[tokio::test]
async fn test_ignored_feeds_dir_means_nothing_to_commit() {
    if !git_available() {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let (work, _remote) = scratch_repo(root.path());
    std::fs::write(work.join(".gitignore"), "feeds/\n").unwrap();
    git(&work, &["add", ".gitignore"]);
    git(&work, &["commit", "--quiet", "-m", "ignore feeds"]);

    let server = feed_server().await;
    let config = config(&server, &work);
    let vcs = Git::new(&work, Duration::from_secs(30));

    let report = pipeline::run(&config, &reqwest::Client::new(), &vcs, now())
        .await
        .unwrap();

    assert_eq!(report.sync, SyncOutcome::NothingToCommit);
    let count = git(&work, &["rev-list", "--count", "HEAD"]);
    assert_eq!(count.trim(), "2");
}

#[tokio::test]
async fn test_unreachable_remote_keeps_local_commit() {
    if !git_available() {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let (work, _remote) = scratch_repo(root.path());
    let missing = root.path().join("missing.git");
    git(&work, &["remote", "set-url", "origin", missing.to_str().unwrap()]);

    let server = feed_server().await;
    let config = config(&server, &work);
    let vcs = Git::new(&work, Duration::from_secs(30));

    let report = pipeline::run(&config, &reqwest::Client::new(), &vcs, now())
        .await
        .unwrap();

    assert!(matches!(
        report.sync,
        SyncOutcome::Committed {
            push: PushOutcome::Failed(_),
            ..
        }
    ));
    let subject = git(&work, &["log", "-1", "--format=%s"]);
    assert_eq!(
        subject.trim(),
        "feat: automatic feed update feed_20250115_235959.csv"
    );
}

#[tokio::test]
async fn test_staged_change_detection() {
    if !git_available() {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let (work, _remote) = scratch_repo(root.path());
    let vcs = Git::new(&work, Duration::from_secs(30));

    vcs.add_all().await.unwrap();
    assert!(!vcs.has_staged_changes().await.unwrap());

    std::fs::write(work.join("new.csv"), "a,b\n").unwrap();
    vcs.add_all().await.unwrap();
    assert!(vcs.has_staged_changes().await.unwrap());
}

#[tokio::test]
async fn test_commit_with_nothing_staged_fails() {
    if !git_available() {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let (work, _remote) = scratch_repo(root.path());
    let vcs = Git::new(&work, Duration::from_secs(30));

    let err = vcs.commit("empty").await.unwrap_err();
    assert!(
        matches!(err, VcsError::CommandFailed { op: "commit", .. }),
        "got {:?}",
        err
    );
}

#[tokio::test]
async fn test_overrunning_git_is_timed_out() {
    if !git_available() {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let (work, _remote) = scratch_repo(root.path());
    let vcs = Git::new(&work, Duration::from_nanos(1));

    let err = vcs.add_all().await.unwrap_err();
    match &err {
        VcsError::Timeout { op, timeout } => {
            assert_eq!(*op, "add");
            assert_eq!(*timeout, Duration::from_nanos(1));
        }
        e => panic!("Expected Timeout, got {:?}", e),
    }
    assert_eq!(err.to_string(), "git add timed out after 1ns");
}

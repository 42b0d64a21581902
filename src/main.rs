use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use feedsync::config::{Config, FileConfig, Overrides, CONFIG_FILE_NAME, FEED_URL_ENV};
use feedsync::feed::{build_client, redact_url};
use feedsync::pipeline::{self, PushOutcome, RunReport, SyncOutcome};
use feedsync::vcs::Git;

#[derive(Parser, Debug)]
#[command(
    name = "feedsync",
    about = "Download the threat-intelligence feed and commit it to the repository"
)]
struct Args {
    /// Store the feed without staging, committing or pushing
    #[arg(long)]
    no_commit: bool,

    /// Commit the feed but do not push it
    #[arg(long)]
    no_push: bool,

    /// Debug logging, and the full error chain with backtrace on failure
    #[arg(long)]
    debug: bool,

    /// Feed endpoint (overrides the FEED_URL environment variable)
    #[arg(long, value_name = "URL")]
    feed_url: Option<String>,

    /// Repository root
    #[arg(long, value_name = "DIR", default_value = ".")]
    repo_dir: PathBuf,

    /// Output directory, relative to the repository root unless absolute
    #[arg(long, value_name = "DIR")]
    feeds_dir: Option<PathBuf>,

    /// Config file [default: <repo-dir>/feedsync.toml]
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let debug = args.debug;

    if debug && std::env::var_os("RUST_LIB_BACKTRACE").is_none() {
        // Set before any thread exists
        std::env::set_var("RUST_LIB_BACKTRACE", "1");
    }
    init_tracing(debug);

    let result = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
        .and_then(|runtime| runtime.block_on(execute(args)));

    match result {
        Ok(report) => {
            print_report(&report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            let _ = write_failure(&mut std::io::stderr().lock(), &e, debug);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("feedsync=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(debug)
        .init();
}

async fn execute(args: Args) -> Result<RunReport> {
    let config_path = match &args.config {
        Some(path) => {
            if !path.is_file() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            path.clone()
        }
        None => args.repo_dir.join(CONFIG_FILE_NAME),
    };
    let file_config = FileConfig::load(&config_path)?;

    let env_feed_url = match std::env::var(FEED_URL_ENV) {
        Ok(url) => Some(url),
        Err(std::env::VarError::NotPresent) => None,
        Err(std::env::VarError::NotUnicode(_)) => {
            anyhow::bail!("{FEED_URL_ENV} contains invalid UTF-8")
        }
    };

    let config = Config::resolve(
        Overrides {
            feed_url: args.feed_url,
            repo_dir: args.repo_dir,
            feeds_dir: args.feeds_dir,
            no_commit: args.no_commit,
            no_push: args.no_push,
        },
        env_feed_url,
        file_config,
    )?;

    tracing::info!(
        source = %config.feed_url_source,
        url = %redact_url(&config.feed_url),
        feeds_dir = %config.feeds_dir.display(),
        commit = config.commit,
        push = config.push,
        "Starting feed update"
    );

    let client = build_client(&config.fetch).context("Failed to build HTTP client")?;
    let git = Git::new(&config.repo_dir, config.git.timeout);
    tracing::debug!(repo = %git.workdir().display(), "Using git repository");

    let now = chrono::Local::now().naive_local();
    let report = pipeline::run(&config, &client, &git, now).await?;
    Ok(report)
}

fn print_report(report: &RunReport) {
    println!(
        "Saved {} ({} bytes, {} lines)",
        report.file.display(),
        report.bytes,
        report.summary.lines
    );
    match &report.sync {
        SyncOutcome::Disabled => println!("Commit skipped (--no-commit)"),
        SyncOutcome::NothingToCommit => println!("No changes to commit"),
        SyncOutcome::Committed { message, push } => {
            println!("Committed: {message}");
            match push {
                PushOutcome::Pushed => println!("Pushed"),
                PushOutcome::Skipped => println!("Push skipped (--no-push)"),
                PushOutcome::Failed(e) => eprintln!("Warning: push failed: {e}"),
            }
        }
    }
}

/// The only place a fatal error is reported; it is not also logged.
fn write_failure(out: &mut impl Write, err: &anyhow::Error, debug: bool) -> std::io::Result<()> {
    writeln!(out, "Error: {}", render_error(err))?;
    if debug {
        writeln!(out)?;
        writeln!(out, "{err:?}")?;
    }
    Ok(())
}

/// Joins the error chain, dropping causes already quoted by their parent.
fn render_error(err: &anyhow::Error) -> String {
    let mut out = err.to_string();
    for cause in err.chain().skip(1) {
        let text = cause.to_string();
        if !out.contains(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
    }
    out
}

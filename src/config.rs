//! Run configuration for feedsync.
//!
//! A run is configured from three sources, highest precedence first:
//! command-line flags, the `FEED_URL` environment variable, and an optional
//! TOML file (`feedsync.toml` in the repository root). Anything left unset
//! falls back to a built-in default. The result is a single immutable
//! [`Config`] that is handed to every pipeline step.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Endpoint used when neither the CLI, the environment, nor the config file name one.
pub const DEFAULT_FEED_URL: &str = "https://192.168.106.235/feeds/IoC_IP_Output";

/// Name of the config file looked up in the repository root.
pub const CONFIG_FILE_NAME: &str = "feedsync.toml";

/// Environment variable holding the feed endpoint.
pub const FEED_URL_ENV: &str = "FEED_URL";

/// Output directory, relative to the repository root.
pub const DEFAULT_FEEDS_DIR: &str = "feeds";

/// Columns requested from the feed endpoint, in request order.
pub const DEFAULT_FIELDS: [&str; 9] = [
    "indicator|ioc",
    "iocType",
    "mail|response",
    "mail",
    "origin",
    "requester|Requester",
    "stix_title|info",
    "confidence",
    "risk",
];

/// Some feed appliances reject non-browser clients, so we look like one.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

pub const DEFAULT_COMMIT_TEMPLATE: &str = "feat: automatic feed update {file}";

const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_GIT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024; // 64MB

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// The winning source supplied an empty feed URL.
    #[error("Feed URL is not configured: set FEED_URL or pass --feed-url")]
    MissingFeedUrl,

    #[error("Invalid feed URL '{url}': {reason}")]
    InvalidFeedUrl { url: String, reason: String },
}

// ============================================================================
// File Configuration
// ============================================================================

/// Contents of `feedsync.toml`. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub feed_url: Option<String>,
    pub feeds_dir: Option<PathBuf>,
    pub fetch: FetchFileConfig,
    pub git: GitFileConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FetchFileConfig {
    pub fields: Option<Vec<String>>,
    pub user_agent: Option<String>,
    pub accept_invalid_certs: Option<bool>,
    pub timeout_secs: Option<u64>,
    pub max_body_bytes: Option<usize>,
    pub write_bom: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GitFileConfig {
    pub remote: Option<String>,
    pub branch: Option<String>,
    pub commit_template: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(FileConfig::default())`
    /// - Empty file → `Ok(FileConfig::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw);
        }

        let config: FileConfig = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }
}

fn warn_unknown_keys(raw: &toml::Table) {
    const TOP: [&str; 4] = ["feed_url", "feeds_dir", "fetch", "git"];
    const FETCH: [&str; 6] = [
        "fields",
        "user_agent",
        "accept_invalid_certs",
        "timeout_secs",
        "max_body_bytes",
        "write_bom",
    ];
    const GIT: [&str; 4] = ["remote", "branch", "commit_template", "timeout_secs"];

    for (key, value) in raw {
        let nested: Option<&[&str]> = match key.as_str() {
            "fetch" => Some(&FETCH[..]),
            "git" => Some(&GIT[..]),
            _ => None,
        };
        if !TOP.contains(&key.as_str()) {
            tracing::warn!(key = %key, "Unknown key in config file, ignoring");
            continue;
        }
        if let (Some(known), Some(table)) = (nested, value.as_table()) {
            for sub in table.keys() {
                if !known.contains(&sub.as_str()) {
                    tracing::warn!(key = %format!("{key}.{sub}"), "Unknown key in config file, ignoring");
                }
            }
        }
    }
}

// ============================================================================
// Resolved Configuration
// ============================================================================

/// Values supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub feed_url: Option<String>,
    pub repo_dir: PathBuf,
    pub feeds_dir: Option<PathBuf>,
    pub no_commit: bool,
    pub no_push: bool,
}

/// Where the feed URL was taken from. Logged at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedUrlSource {
    CommandLine,
    Environment,
    ConfigFile,
    BuiltIn,
}

impl std::fmt::Display for FeedUrlSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FeedUrlSource::CommandLine => "command line",
            FeedUrlSource::Environment => FEED_URL_ENV,
            FeedUrlSource::ConfigFile => "config file",
            FeedUrlSource::BuiltIn => "built-in default",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Value of the `v` query parameter.
    pub format: String,
    /// Values of the repeated `f` query parameter, in order.
    pub fields: Vec<String>,
    pub user_agent: String,
    /// Feed appliances usually sit behind self-signed certificates.
    pub accept_invalid_certs: bool,
    pub timeout: Duration,
    pub max_body_bytes: usize,
    /// Prefix the stored file with a UTF-8 byte-order mark.
    pub write_bom: bool,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            format: "csv".to_string(),
            fields: DEFAULT_FIELDS.iter().map(|f| f.to_string()).collect(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_invalid_certs: true,
            timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            write_bom: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GitSettings {
    pub remote: String,
    pub branch: String,
    /// Commit message; `{file}` is replaced by the feed file name.
    pub commit_template: String,
    pub timeout: Duration,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
            branch: "main".to_string(),
            commit_template: DEFAULT_COMMIT_TEMPLATE.to_string(),
            timeout: Duration::from_secs(DEFAULT_GIT_TIMEOUT_SECS),
        }
    }
}

/// Fully resolved run configuration. Never mutated after [`Config::resolve`].
#[derive(Debug, Clone)]
pub struct Config {
    pub feed_url: Url,
    pub feed_url_source: FeedUrlSource,
    pub repo_dir: PathBuf,
    pub feeds_dir: PathBuf,
    pub commit: bool,
    pub push: bool,
    pub fetch: FetchSettings,
    pub git: GitSettings,
}

impl Config {
    /// Merge the three configuration sources.
    ///
    /// The feed URL comes from the first source that sets it. A source that
    /// sets it to an empty string wins and fails with
    /// [`ConfigError::MissingFeedUrl`]; it does not fall through.
    pub fn resolve(
        overrides: Overrides,
        env_feed_url: Option<String>,
        file: FileConfig,
    ) -> Result<Self, ConfigError> {
        let (raw_url, feed_url_source) = if let Some(url) = overrides.feed_url {
            (url, FeedUrlSource::CommandLine)
        } else if let Some(url) = env_feed_url {
            (url, FeedUrlSource::Environment)
        } else if let Some(url) = file.feed_url {
            (url, FeedUrlSource::ConfigFile)
        } else {
            (DEFAULT_FEED_URL.to_string(), FeedUrlSource::BuiltIn)
        };
        let feed_url = parse_feed_url(&raw_url)?;

        let feeds_dir = overrides
            .feeds_dir
            .or(file.feeds_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FEEDS_DIR));
        let feeds_dir = if feeds_dir.is_absolute() {
            feeds_dir
        } else {
            overrides.repo_dir.join(feeds_dir)
        };

        let defaults = FetchSettings::default();
        let fetch = FetchSettings {
            format: defaults.format,
            fields: file.fetch.fields.unwrap_or(defaults.fields),
            user_agent: file.fetch.user_agent.unwrap_or(defaults.user_agent),
            accept_invalid_certs: file
                .fetch
                .accept_invalid_certs
                .unwrap_or(defaults.accept_invalid_certs),
            timeout: file
                .fetch
                .timeout_secs
                .map(|s| Duration::from_secs(s.max(1)))
                .unwrap_or(defaults.timeout),
            max_body_bytes: file.fetch.max_body_bytes.unwrap_or(defaults.max_body_bytes),
            write_bom: file.fetch.write_bom.unwrap_or(defaults.write_bom),
        };

        let defaults = GitSettings::default();
        let git = GitSettings {
            remote: file.git.remote.unwrap_or(defaults.remote),
            branch: file.git.branch.unwrap_or(defaults.branch),
            commit_template: file.git.commit_template.unwrap_or(defaults.commit_template),
            timeout: file
                .git
                .timeout_secs
                .map(|s| Duration::from_secs(s.max(1)))
                .unwrap_or(defaults.timeout),
        };

        Ok(Self {
            feed_url,
            feed_url_source,
            repo_dir: overrides.repo_dir,
            feeds_dir,
            commit: !overrides.no_commit,
            push: !overrides.no_commit && !overrides.no_push,
            fetch,
            git,
        })
    }
}

fn parse_feed_url(raw: &str) -> Result<Url, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::MissingFeedUrl);
    }
    let url = Url::parse(trimmed).map_err(|e| ConfigError::InvalidFeedUrl {
        url: trimmed.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ConfigError::InvalidFeedUrl {
            url: trimmed.to_string(),
            reason: format!("unsupported scheme '{scheme}' (only http/https allowed)"),
        }),
    }
}

// ============================================================================
// Tests
// ============================================================================

use crate::config::FetchSettings;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use std::borrow::Cow;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors that can occur while downloading the feed.
///
/// None of these are retried; the run aborts on the first one.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Response body exceeded the configured size limit
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    /// Connection closed before Content-Length bytes arrived
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// A successfully downloaded feed.
#[derive(Debug, Clone)]
pub struct FetchedFeed {
    /// Full request URL, query string included.
    pub url: Url,
    pub status: u16,
    pub content_type: Option<String>,
    /// Response body exactly as received.
    pub body: Vec<u8>,
}

impl FetchedFeed {
    /// Best-effort check of the `Content-Type` header. Advisory only.
    pub fn is_csv(&self) -> bool {
        self.content_type.as_deref().is_some_and(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.contains("text/csv") || ct.contains("application/csv")
        })
    }

    /// Body decoded as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Builds the HTTP client used for the feed download.
///
/// Certificate verification is disabled unless `accept_invalid_certs` is
/// turned off: feed appliances are typically reached over internal
/// addresses with self-signed certificates.
pub fn build_client(settings: &FetchSettings) -> Result<reqwest::Client, FetchError> {
    if settings.accept_invalid_certs {
        tracing::debug!("TLS certificate verification disabled for feed requests");
    }
    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(settings.accept_invalid_certs)
        .timeout(settings.timeout)
        .build()?;
    Ok(client)
}

/// Appends `v=<format>` and one `f=<field>` per requested field to `base`.
///
/// The query is assembled by hand so that separators such as `|` inside
/// field names reach the server unescaped. Any query already present on
/// `base` is kept in front.
pub fn feed_request_url(base: &Url, settings: &FetchSettings) -> Url {
    let mut query = format!("v={}", settings.format);
    for field in &settings.fields {
        query.push_str("&f=");
        query.push_str(field);
    }

    let query = match base.query() {
        Some(existing) if !existing.is_empty() => format!("{existing}&{query}"),
        _ => query,
    };

    let mut url = base.clone();
    url.set_query(Some(&query));
    url
}

/// Renders `url` for logs. Credentials are dropped and every query value
/// except the `v`/`f` feed parameters is masked.
pub fn redact_url(url: &Url) -> String {
    let mut shown = url.clone();
    if !shown.username().is_empty() || shown.password().is_some() {
        let _ = shown.set_password(None);
        let _ = shown.set_username("REDACTED");
    }
    if let Some(query) = url.query() {
        let masked: Vec<String> = query
            .split('&')
            .map(|pair| match pair.split_once('=') {
                Some(("v" | "f", _)) => pair.to_string(),
                Some((key, _)) => format!("{key}=REDACTED"),
                None if pair.is_empty() => String::new(),
                None => "REDACTED".to_string(),
            })
            .collect();
        shown.set_query(Some(&masked.join("&")));
    }
    shown.set_fragment(None);
    shown.to_string()
}

/// Downloads the feed with a single GET request.
///
/// # Errors
///
/// - [`FetchError::Network`] - Connection or TLS errors
/// - [`FetchError::Timeout`] - Request exceeded `settings.timeout`
/// - [`FetchError::HttpStatus`] - Non-2xx HTTP response
/// - [`FetchError::ResponseTooLarge`] - Body exceeded `settings.max_body_bytes`
/// - [`FetchError::IncompleteResponse`] - Body shorter than Content-Length
pub async fn fetch_feed(
    client: &reqwest::Client,
    base: &Url,
    settings: &FetchSettings,
) -> Result<FetchedFeed, FetchError> {
    let url = feed_request_url(base, settings);
    tracing::info!(url = %redact_url(base), fields = settings.fields.len(), "Downloading feed");
    tracing::debug!(
        full_url = %redact_url(&url),
        accept = "text/csv",
        user_agent = %settings.user_agent,
        "Feed request"
    );

    let feed = tokio::time::timeout(settings.timeout, request(client, &url, settings))
        .await
        .map_err(|_| FetchError::Timeout(settings.timeout))??;

    if !feed.is_csv() {
        tracing::warn!(
            content_type = feed.content_type.as_deref().unwrap_or("unspecified"),
            "Content-Type does not indicate CSV, storing body anyway"
        );
    }
    tracing::info!(status = feed.status, bytes = feed.body.len(), "Feed downloaded");

    Ok(feed)
}

async fn request(
    client: &reqwest::Client,
    url: &Url,
    settings: &FetchSettings,
) -> Result<FetchedFeed, FetchError> {
    let response = client
        .get(url.clone())
        .header(ACCEPT, "text/csv")
        .header(USER_AGENT, &settings.user_agent)
        .send()
        .await
        .map_err(|e| classify(e, settings.timeout))?;

    let status = response.status();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    tracing::debug!(
        status = status.as_u16(),
        content_type = content_type.as_deref().unwrap_or("unspecified"),
        content_length = ?response.content_length(),
        "Feed response received"
    );

    if !status.is_success() {
        return Err(FetchError::HttpStatus(status.as_u16()));
    }

    let body = read_limited_bytes(response, settings.max_body_bytes, settings.timeout).await?;
    Ok(FetchedFeed {
        url: url.clone(),
        status: status.as_u16(),
        content_type,
        body,
    })
}

/// Maps a transport error. The URL is stripped since it may carry credentials.
fn classify(err: reqwest::Error, timeout: Duration) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(timeout)
    } else {
        FetchError::Network(err.without_url())
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
    timeout: Duration,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = match (chunk, expected_length) {
            (Ok(chunk), _) => chunk,
            // hyper reports an early close as a body error
            (Err(e), Some(expected)) if !e.is_timeout() && (e.is_body() || e.is_decode()) => {
                tracing::debug!(error = %e.without_url(), "Feed body ended early");
                return Err(FetchError::IncompleteResponse {
                    expected,
                    received: bytes.len(),
                });
            }
            (Err(e), _) => return Err(classify(e, timeout)),
        };
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

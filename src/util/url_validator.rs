use thiserror::Error;
use url::Url;

/// Errors that can occur during feed URL validation.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The string is not an absolute URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
}

/// Validates a URL string for use as a feed source.
///
/// Accepts absolute URLs whose scheme is exactly `http` or `https`.
/// Relative references, empty strings and any other scheme
/// (`ftp://`, `file://`, `mailto:`) are rejected.
///
/// # Errors
///
/// Returns [`UrlValidationError`] if:
/// - The string cannot be parsed as an absolute URL ([`UrlValidationError::InvalidUrl`])
/// - The scheme is not `http` or `https` ([`UrlValidationError::UnsupportedScheme`])
/// - The URL carries no host ([`UrlValidationError::MissingHost`])
///
/// # Examples
///
/// ```
/// use feedkeeper::util::validate_url;
///
/// let url = validate_url("https://example.com/feed.xml").unwrap();
/// assert_eq!(url.host_str(), Some("example.com"));
///
/// assert!(validate_url("ftp://example.com/feed").is_err());
/// assert!(validate_url("not a url").is_err());
/// ```
pub fn validate_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(UrlValidationError::MissingHost),
    }
}

/// Boolean form of [`validate_url`], logging the rejection reason at debug level.
pub fn is_valid_feed_url(url_str: &str) -> bool {
    match validate_url(url_str) {
        Ok(_) => true,
        Err(e) => {
            tracing::debug!(url = %url_str, error = %e, "Rejected feed URL");
            false
        }
    }
}

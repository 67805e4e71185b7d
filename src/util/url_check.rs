use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum UrlCheckError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
}

/// Parses a URL that is about to be fetched and rejects anything that is not
/// plain `http` or `https`.
///
/// Unlike a feed-source validator this accepts loopback hosts: requests may
/// be routed through a local SOCKS proxy, and test servers bind to 127.0.0.1.
pub fn validate_fetch_url(url_str: &str) -> Result<Url, UrlCheckError> {
    let url = Url::parse(url_str)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(UrlCheckError::UnsupportedScheme(scheme.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_and_https_accepted() {
        assert!(validate_fetch_url("https://www.youtube.com/feeds/videos.xml").is_ok());
        assert!(validate_fetch_url("http://127.0.0.1:8080/feed").is_ok());
    }

    #[test]
    fn test_other_schemes_rejected() {
        assert!(matches!(
            validate_fetch_url("file:///etc/passwd"),
            Err(UrlCheckError::UnsupportedScheme(s)) if s == "file"
        ));
        assert!(validate_fetch_url("ftp://example.com").is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            validate_fetch_url("not a url"),
            Err(UrlCheckError::InvalidUrl(_))
        ));
    }
}

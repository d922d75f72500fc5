//! URL and input validation utilities

use std::path::Path;
use url::Url;

use crate::core::models::{WorkflowError, WorkflowResult};

/// Validate a playlist URL: absolute http(s) with a file name
pub fn validate_playlist_url(url: &str) -> WorkflowResult<Url> {
    let parsed =
        Url::parse(url).map_err(|e| WorkflowError::InvalidUrl(format!("{}: {}", url, e)))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(WorkflowError::InvalidUrl(format!(
                "unsupported scheme '{}' in {}",
                other, url
            )))
        }
    }

    derive_name(&parsed)?;
    Ok(parsed)
}

/// Playlist name: last path component without extension
pub fn derive_name(url: &Url) -> WorkflowResult<String> {
    let last = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();

    let stem = Path::new(last)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default();

    if stem.is_empty() {
        return Err(WorkflowError::InvalidUrl(format!(
            "no file name in {}",
            url
        )));
    }
    Ok(stem.to_string())
}

/// Base URI: the URL with its last path component (and query) stripped
pub fn derive_base_uri(url: &Url) -> WorkflowResult<Url> {
    let mut base = url.clone();
    base.set_query(None);
    base.set_fragment(None);
    base.join("./")
        .map_err(|e| WorkflowError::InvalidUrl(format!("{}: {}", url, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_playlist_url() {
        assert!(validate_playlist_url("https://cdn.example.com/v/index.m3u8").is_ok());
        assert!(validate_playlist_url("http://cdn.example.com/index").is_ok());

        assert!(matches!(
            validate_playlist_url("not a url"),
            Err(WorkflowError::InvalidUrl(_))
        ));
        assert!(matches!(
            validate_playlist_url("ftp://cdn.example.com/index.m3u8"),
            Err(WorkflowError::InvalidUrl(_))
        ));
        assert!(matches!(
            validate_playlist_url("https://cdn.example.com/"),
            Err(WorkflowError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_derive_name_strips_extension() {
        let url = Url::parse("https://cdn.example.com/course/lesson-01.m3u8?token=abc").unwrap();
        assert_eq!(derive_name(&url).unwrap(), "lesson-01");
    }

    #[test]
    fn test_derive_base_uri() {
        let url = Url::parse("https://cdn.example.com/course/lesson-01.m3u8?token=abc").unwrap();
        let base = derive_base_uri(&url).unwrap();
        assert_eq!(base.as_str(), "https://cdn.example.com/course/");
        assert_eq!(
            base.join("ts/lesson-01-0.ts").unwrap().as_str(),
            "https://cdn.example.com/course/ts/lesson-01-0.ts"
        );
    }
}

use std::path::{Path, PathBuf};

use url::Url;

/// Where a retrieved page is saved: `{root}/{host[:port]}/{file_name}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLocation {
    /// `host[:port]` as written in the URL.
    pub site: String,
    pub dir: PathBuf,
    pub file_name: String,
}

impl PageLocation {
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LocationError {
    #[error("cannot parse url {url}: {message}")]
    InvalidUrl { url: String, message: String },
    #[error("url {0} has no host")]
    MissingHost(String),
}

/// Derives the save location of `url` below `root`.
///
/// The file is named after the last non-empty path segment, or after the
/// site when the path is empty. Names without an extension get `.html`.
pub fn page_location(root: &Path, url: &str) -> Result<PageLocation, LocationError> {
    let parsed = Url::parse(url).map_err(|err| LocationError::InvalidUrl {
        url: url.to_string(),
        message: err.to_string(),
    })?;
    let host = parsed
        .host_str()
        .ok_or_else(|| LocationError::MissingHost(url.to_string()))?;
    let site = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let site_dir = sanitize_component(&site);

    let file_name = parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(sanitize_component)
        .filter(|name| !name.is_empty())
        .map(|name| {
            if name.contains('.') {
                name
            } else {
                format!("{name}.html")
            }
        })
        .unwrap_or_else(|| format!("{site_dir}.html"));

    Ok(PageLocation {
        dir: root.join(&site_dir),
        site,
        file_name,
    })
}

fn sanitize_component(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .map(|c| if is_forbidden(c) { '_' } else { c })
        .collect();
    let trimmed = cleaned.trim_matches(&[' ', '.'][..]);
    if trimmed.is_empty() {
        return String::new();
    }
    if is_reserved_windows_name(trimmed) {
        return format!("{trimmed}_");
    }
    trimmed.to_string()
}

fn is_forbidden(c: char) -> bool {
    matches!(c,
        '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0'..='\u{1F}'
    )
}

fn is_reserved_windows_name(name: &str) -> bool {
    const RESERVED: &[&str] = &[
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(name))
}

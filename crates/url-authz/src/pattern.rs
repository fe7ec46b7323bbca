use globset::{Glob, GlobMatcher};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("empty URL pattern")]
    Empty,
    #[error("invalid URL pattern '{pattern}': {source}")]
    Invalid {
        pattern: String,
        source: globset::Error,
    },
}

/// A compiled wildcard URL pattern.
///
/// `*` matches any sequence of characters in any component.  A pattern
/// without a scheme (`intranet.example.com/cam/*`) matches any scheme; a
/// pattern without a path (`http://intranet.example.com`) matches any path
/// on that authority.  The target's query string only participates in the
/// match when the pattern itself contains a `?`.
///
/// Compilation uses the `globset` machinery, so `?` and character classes
/// behave as in ordinary globs; `*` deliberately matches across `/`.
#[derive(Debug, Clone)]
pub struct UrlPattern {
    raw: String,
    matcher: GlobMatcher,
    match_query: bool,
}

impl UrlPattern {
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            return Err(PatternError::Empty);
        }

        let match_query = trimmed.contains('?');

        let mut normalized = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("*://{trimmed}")
        };

        // A pattern with no path component matches any path on the
        // authority it names.
        let after_scheme = normalized
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or_default();
        if !after_scheme.contains('/') && !match_query {
            normalized.push_str("/*");
        }

        let glob = Glob::new(&normalized).map_err(|source| PatternError::Invalid {
            pattern: trimmed.to_string(),
            source,
        })?;

        Ok(Self {
            raw: trimmed.to_string(),
            matcher: glob.compile_matcher(),
            match_query,
        })
    }

    /// Test a parsed target URL against this pattern.
    pub fn matches(&self, url: &Url) -> bool {
        let mut subject = String::new();
        subject.push_str(url.scheme());
        subject.push_str("://");
        if let Some(host) = url.host_str() {
            subject.push_str(host);
        }
        if let Some(port) = url.port() {
            subject.push(':');
            subject.push_str(&port.to_string());
        }
        subject.push_str(url.path());
        if self.match_query {
            if let Some(query) = url.query() {
                subject.push('?');
                subject.push_str(query);
            }
        }
        self.matcher.is_match(&subject)
    }

    /// The pattern as originally written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

//! Request-side `cache-control` directive.

use reqwest::header::{HeaderMap, CACHE_CONTROL};

/// Value assumed when the request carries no `cache-control` header.
pub const DEFAULT_DIRECTIVE: &str = "public";

/// How a single call may use the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Bypass the cache: never read, never write.
    NoStore,
    /// Drop any stored entry, then recompute and store.
    NoCache,
    /// Normal read-through (`public` when the header is absent).
    Other(String),
}

impl Directive {
    /// Parse a raw header value. The whole value is compared
    /// case-insensitively; anything unrecognised is a normal read-through.
    pub fn parse(value: Option<&str>) -> Self {
        let raw = value.map(str::trim).unwrap_or(DEFAULT_DIRECTIVE);
        if raw.eq_ignore_ascii_case("no-store") {
            Directive::NoStore
        } else if raw.eq_ignore_ascii_case("no-cache") {
            Directive::NoCache
        } else {
            Directive::Other(raw.to_string())
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self::parse(headers.get(CACHE_CONTROL).and_then(|v| v.to_str().ok()))
    }

    pub fn bypasses_cache(&self) -> bool {
        matches!(self, Directive::NoStore)
    }

    pub fn forces_refresh(&self) -> bool {
        matches!(self, Directive::NoCache)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Directive::NoStore => "no-store",
            Directive::NoCache => "no-cache",
            Directive::Other(s) => s,
        }
    }
}

impl Default for Directive {
    fn default() -> Self {
        Directive::Other(DEFAULT_DIRECTIVE.to_string())
    }
}

impl std::fmt::Display for Directive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

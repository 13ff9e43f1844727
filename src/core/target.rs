// src/core/target.rs

use std::fmt;
use std::net::IpAddr;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use url::Url;

static RE_HOSTNAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9_]([a-z0-9_-]{0,61}[a-z0-9])?(\.[a-z0-9_]([a-z0-9_-]{0,61}[a-z0-9])?)*$")
        .expect("hostname regex is valid")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("target domain must not be empty")]
    Empty,
    #[error("`{0}` is an IP address, a domain name is required")]
    IpAddress(String),
    #[error("`{0}` is not a valid domain name")]
    Invalid(String),
}

/// Returns true when `name` is a syntactically valid, lowercase DNS hostname.
pub fn is_hostname(name: &str) -> bool {
    name.len() <= 253 && RE_HOSTNAME.is_match(name)
}

/// A normalized scan subject. Immutable for the duration of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target(String);

impl Target {
    /// Accepts `example.com`, ` Example.COM. ` or `https://example.com/path`.
    pub fn parse(input: &str) -> Result<Self, TargetError> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(TargetError::Empty);
        }

        // Same trick the URL bar uses: give bare names a scheme so `Url` extracts the host.
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("https://{}", raw)
        };
        let host = Url::parse(&with_scheme)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .ok_or_else(|| TargetError::Invalid(raw.to_string()))?;

        let host = host.trim_end_matches('.').to_lowercase();
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if bare.parse::<IpAddr>().is_ok() {
            return Err(TargetError::IpAddress(bare.to_string()));
        }
        if !host.contains('.') || !is_hostname(&host) {
            return Err(TargetError::Invalid(raw.to_string()));
        }
        Ok(Self(host))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Target {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

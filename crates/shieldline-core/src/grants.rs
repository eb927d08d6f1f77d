//! Host permission grants: origin pattern parsing and coverage checks.

use std::collections::BTreeSet;

/// Marker hostname produced by broad origin patterns.
pub const ALL_URLS: &str = "all-urls";

/// Extract hostnames from origin match patterns.
///
/// `*://*.example.com/*` and `https://example.com/*` both yield
/// `example.com`. Broad patterns (`<all_urls>`, `*://*/*`) yield [`ALL_URLS`].
/// Unparseable patterns are skipped.
pub fn hostnames_from_matches<S: AsRef<str>>(matches: &[S]) -> BTreeSet<String> {
    matches
        .iter()
        .filter_map(|m| hostname_from_match(m.as_ref()))
        .collect()
}

fn hostname_from_match(pattern: &str) -> Option<String> {
    if pattern == "<all_urls>" {
        return Some(ALL_URLS.to_string());
    }
    let (_, rest) = pattern.split_once("://")?;
    let host = rest.split('/').next()?;
    let host = host.split(':').next()?;
    if host == "*" {
        return Some(ALL_URLS.to_string());
    }
    let host = host.strip_prefix("*.").unwrap_or(host);
    if host.is_empty() || host.contains('*') {
        return None;
    }
    Some(host.to_ascii_lowercase())
}

/// Snapshot of the hostnames the user granted broad access to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantSet {
    hostnames: BTreeSet<String>,
}

impl GrantSet {
    pub fn from_origins<S: AsRef<str>>(origins: &[S]) -> Self {
        Self {
            hostnames: hostnames_from_matches(origins),
        }
    }

    /// Grant covering every site.
    pub fn is_broad(&self) -> bool {
        self.hostnames.contains(ALL_URLS)
    }

    /// Whether `hostname` is covered, directly or through a parent domain.
    pub fn covers(&self, hostname: &str) -> bool {
        if self.is_broad() {
            return true;
        }
        parent_domains(hostname).any(|h| self.hostnames.contains(h))
    }

    pub fn hostnames(&self) -> &BTreeSet<String> {
        &self.hostnames
    }
}

/// Iterate `a.b.example.com`, `b.example.com`, `example.com`, `com`.
pub fn parent_domains(hostname: &str) -> impl Iterator<Item = &str> {
    let mut next = Some(hostname);
    std::iter::from_fn(move || {
        let current = next?;
        next = current.split_once('.').map(|(_, rest)| rest).filter(|r| !r.is_empty());
        Some(current)
    })
}

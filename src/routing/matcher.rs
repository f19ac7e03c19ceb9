//! Request matching against route specs.
//!
//! Follows Gateway API matching priority:
//! - Hostname: Exact > Wildcard > Empty (match all)
//! - Path: Exact > Prefix (longer wins) > none (match all)
//!
//! Header predicates are a required filter and do not add specificity.

use crate::model::{HeaderMatch, HeaderMatchType, PathMatch, PathMatchType, RouteSpec};

/// Match specificity, compared lexicographically: hostname first, then path.
pub type Specificity = (usize, usize);

/// Returns the specificity with which `spec` matches the request, or
/// `None` if it does not match.
pub fn match_specificity(
    spec: &RouteSpec,
    host: &str,
    path: &str,
    headers: &[(&str, &str)],
) -> Option<Specificity> {
    let hostname_score = best_hostname_score(&spec.hostnames, host)?;
    let path_score = path_score(spec.path.as_ref(), path)?;
    if !spec.headers.iter().all(|m| header_matches(m, headers)) {
        return None;
    }
    Some((hostname_score, path_score))
}

/// Returns the best hostname score for a list of patterns.
/// Returns None if no pattern matches.
fn best_hostname_score(hostnames: &[String], host: &str) -> Option<usize> {
    if hostnames.is_empty() {
        // Empty hostnames = match all hosts with lowest priority
        return Some(0);
    }
    let host = normalize_hostname(host);
    hostnames
        .iter()
        .filter_map(|h| hostname_score(h, &host))
        .max()
}

/// Scores a hostname match (higher = better match).
fn hostname_score(pattern: &str, host: &str) -> Option<usize> {
    if !hostname_matches(pattern, host) {
        return None;
    }

    if pattern.starts_with("*.") {
        Some(pattern.len())
    } else {
        Some(pattern.len() + 1000)
    }
}

/// Checks a normalized host against a pattern.
/// Supports exact match and single-label wildcard (*.example.com).
fn hostname_matches(pattern: &str, host: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();

    if pattern.starts_with("*.") {
        let suffix = &pattern[1..];
        // *.example.com matches foo.example.com but neither example.com
        // nor foo.bar.example.com
        if !host.ends_with(suffix) {
            return false;
        }
        let prefix = &host[..host.len() - suffix.len()];
        !prefix.is_empty() && !prefix.contains('.')
    } else {
        host == pattern
    }
}

/// Lowercases and strips the port.
fn normalize_hostname(host: &str) -> String {
    host.split(':').next().unwrap_or(host).to_ascii_lowercase()
}

/// Scores a path match (higher = better). Exact > longer prefix > shorter prefix.
fn path_score(path_match: Option<&PathMatch>, path: &str) -> Option<usize> {
    let Some(pm) = path_match else {
        return Some(0);
    };
    match pm.match_type {
        PathMatchType::Exact if path == pm.value => Some(10000 + pm.value.len()),
        PathMatchType::Prefix if prefix_matches(&pm.value, path) => Some(1000 + pm.value.len()),
        _ => None,
    }
}

/// Prefix matching respecting segment boundaries.
/// /api matches /api, /api/, /api/users
/// /api does NOT match /apikeys
fn prefix_matches(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || prefix.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}

fn header_matches(header_match: &HeaderMatch, headers: &[(&str, &str)]) -> bool {
    headers
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case(&header_match.name))
        .any(|(_, value)| match header_match.match_type {
            HeaderMatchType::Exact => *value == header_match.value,
            HeaderMatchType::Prefix => value.starts_with(&header_match.value),
        })
}

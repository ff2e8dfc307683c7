//! URL identity-key canonicalization.
//!
//! Hundreds of independently built announcement boards encode the post
//! identity in wildly different places: a `nttId` query parameter on one
//! site, a trailing numeric path segment on the next, a vendor-specific
//! `wr_id` on a third. [`identity_key`] maps any announcement URL to a
//! stable `{domain}|{discriminator}` string so the registry can answer
//! "have we seen this before" without caring which convention a site uses.
//!
//! The function is pure and never fails: a URL that cannot be parsed
//! degrades to an `error|<digest>` key instead of aborting the caller.

mod params;

use sha2::{Digest, Sha256};
use url::Url;

pub use params::KNOWN_ID_PARAMS;

/// Query strings and paths longer than this are hashed instead of being
/// embedded verbatim in the key.
const HASH_THRESHOLD: usize = 200;

/// Truncated digest width, in hex characters. An accepted, bounded
/// collision risk; the untruncated origin URL stays on the registry row.
const DIGEST_LEN: usize = 16;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Tunable canonicalization behavior.
#[derive(Debug, Clone, Default)]
pub struct KeyOptions {
    /// Sort query pairs by name before keying a raw query string.
    ///
    /// Off by default: the raw-query branch keeps parameter order
    /// significant, so reordered URLs over-collect rather than over-merge.
    pub sort_query: bool,
}

// ---------------------------------------------------------------------------
// Key derivation
// ---------------------------------------------------------------------------

/// Derive the identity key for an announcement URL with default options.
///
/// Returns `None` only for an empty (or whitespace-only) input.
pub fn identity_key(url: &str) -> Option<String> {
    identity_key_with(url, &KeyOptions::default())
}

/// Derive the identity key with explicit [`KeyOptions`].
///
/// Priority order:
/// 1. first known identifier query parameter (`domain|name=value`)
/// 2. trailing numeric path segment (`domain|path=segment`)
/// 3. raw query string, hashed past the length threshold
/// 4. raw path, hashed past the length threshold
/// 5. `domain|root`
///
/// The scheme never participates, so http/https variants of the same URL
/// always agree. A URL that fails to parse yields `error|<digest>`.
pub fn identity_key_with(url: &str, opts: &KeyOptions) -> Option<String> {
    let raw = url.trim();
    if raw.is_empty() {
        return None;
    }

    let parsed = match parse_lenient(raw) {
        Some(u) => u,
        None => return Some(format!("error|{}", short_digest(raw))),
    };

    let domain = match parsed.host_str() {
        Some(h) => h.to_ascii_lowercase(),
        None => return Some(format!("error|{}", short_digest(raw))),
    };

    // 1. Known identifier parameters, in priority order.
    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    for name in KNOWN_ID_PARAMS {
        if let Some((k, v)) = pairs.iter().find(|(k, _)| k == name) {
            if !v.is_empty() {
                return Some(format!("{domain}|{k}={v}"));
            }
        }
    }

    // 2. Trailing numeric path segment, extension stripped.
    if let Some(segment) = last_path_segment(&parsed) {
        let bare = strip_extension(segment);
        if !bare.is_empty() && bare.bytes().all(|b| b.is_ascii_digit()) {
            return Some(format!("{domain}|path={bare}"));
        }
    }

    // 3. Raw query string, hashed when excessively long.
    if let Some(query) = parsed.query().filter(|q| !q.is_empty()) {
        let query = if opts.sort_query {
            let mut sorted = pairs;
            sorted.sort();
            sorted
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("&")
        } else {
            query.to_string()
        };
        return Some(if query.len() > HASH_THRESHOLD {
            format!("{domain}|query_hash={}", short_digest(&query))
        } else {
            format!("{domain}|query={query}")
        });
    }

    // 4. Non-trivial path, same threshold treatment.
    let path = parsed.path();
    if !path.is_empty() && path != "/" {
        return Some(if path.len() > HASH_THRESHOLD {
            format!("{domain}|path_hash={}", short_digest(path))
        } else {
            format!("{domain}|{path}")
        });
    }

    // 5. Nothing discriminating left.
    Some(format!("{domain}|root"))
}

/// Parse a URL, tolerating a missing scheme.
fn parse_lenient(raw: &str) -> Option<Url> {
    match Url::parse(raw) {
        Ok(u) if u.has_host() => Some(u),
        Ok(_) => None,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            Url::parse(&format!("http://{raw}")).ok().filter(Url::has_host)
        }
        Err(_) => None,
    }
}

/// Last non-empty path segment.
fn last_path_segment(url: &Url) -> Option<&str> {
    url.path_segments()?.filter(|s| !s.is_empty()).next_back()
}

/// Strip a file-extension-like suffix (short, alphanumeric) from a segment.
fn strip_extension(segment: &str) -> &str {
    match segment.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty() && (1..=5).contains(&ext.len())
                && ext.bytes().all(|b| b.is_ascii_alphanumeric()) =>
        {
            stem
        }
        _ => segment,
    }
}

/// First [`DIGEST_LEN`] hex chars of the SHA-256 of `input`.
fn short_digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..DIGEST_LEN].to_string()
}

// ---------------------------------------------------------------------------
// Key decomposition
// ---------------------------------------------------------------------------

/// Denormalized view of an identity key for registry columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyParts {
    /// Domain portion (or `"error"` for the parse-failure fallback).
    pub domain: String,
    /// Which discriminator produced the key: a known parameter name,
    /// `path`, `query`, `query_hash`, `path_hash`, `root`, or `error`.
    pub param_type: String,
    /// Discriminator value, empty for `root`.
    pub param_value: String,
}

/// Split a key produced by [`identity_key`] back into queryable parts.
pub fn decompose(key: &str) -> KeyParts {
    let (domain, rest) = key.split_once('|').unwrap_or((key, ""));

    let (param_type, param_value) = match rest {
        "" | "root" => ("root".to_string(), String::new()),
        _ if domain == "error" => ("error".to_string(), rest.to_string()),
        _ => match rest.split_once('=') {
            Some((name, value)) => (name.to_string(), value.to_string()),
            // Raw-path branch keys carry the path itself after the pipe.
            None => ("path_raw".to_string(), rest.to_string()),
        },
    };

    KeyParts {
        domain: domain.to_string(),
        param_type,
        param_value,
    }
}

//! Normalizes an incoming HTTP request into bucket/key/query form.
//!
//! Supports both path-style (`host/bucket/key`) and virtual-host-style
//! (`bucket.host/key`) bucket addressing.

use std::collections::BTreeMap;

use http::HeaderMap;
use s3gate_common::Error;

/// A request reduced to the fields the dispatcher and signer need, independent of whether
/// the client addressed the bucket path-style (`host/bucket/key`) or virtual-host style
/// (`bucket.host/key`).
#[derive(Debug, Clone)]
pub struct CanonicalRequest {
    pub bucket: Option<String>,
    pub key: Option<String>,
    pub query: BTreeMap<String, String>,
}

/// Splits `host` on the first dot and returns `(subdomain, rest)` when `host` has at least
/// two labels — e.g. `photos.s3.example.com` → `Some(("photos", "s3.example.com"))`.
fn split_virtual_host(host: &str) -> Option<(&str, &str)> {
    let host = host.split(':').next().unwrap_or(host);
    let (bucket, rest) = host.split_once('.')?;
    if bucket.is_empty() || rest.is_empty() {
        return None;
    }
    Some((bucket, rest))
}

/// Builds a [`CanonicalRequest`] from the raw path and headers. `base_host` (if configured)
/// is the gateway's own hostname; when the request's `Host` header has a leading label that
/// is not a prefix of `base_host`, path style is assumed not to apply and the leading label
/// is treated as the bucket (virtual-host style).
pub fn canonicalize(path: &str, query_str: Option<&str>, headers: &HeaderMap, base_host: Option<&str>) -> Result<CanonicalRequest, Error> {
    let query = parse_query(query_str.unwrap_or(""));

    let host = headers.get(http::header::HOST).and_then(|v| v.to_str().ok());

    let virtual_host_bucket = host.and_then(|host| {
        let (label, rest) = split_virtual_host(host)?;
        match base_host {
            Some(base) if rest.eq_ignore_ascii_case(base) => Some(label.to_string()),
            None => None,
            Some(_) => None,
        }
    });

    let trimmed = path.trim_start_matches('/');
    let (path_bucket, path_key) = match trimmed.split_once('/') {
        Some((bucket, rest)) if !bucket.is_empty() => {
            (Some(bucket.to_string()), if rest.is_empty() { None } else { Some(rest.to_string()) })
        }
        _ if !trimmed.is_empty() => (Some(trimmed.to_string()), None),
        _ => (None, None),
    };

    let (bucket, key) = match virtual_host_bucket {
        Some(bucket) => (Some(bucket), if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }),
        None => (path_bucket, path_key),
    };

    let key = key.map(percent_decode).transpose()?;

    if let Some(key) = &key {
        if key.as_bytes().contains(&0) {
            return Err(Error::invalid_argument("object key must not contain a NUL byte"));
        }
        if key.len() > 1024 {
            return Err(Error::invalid_argument("object key must be at most 1024 bytes"));
        }
        if key.split('/').any(|segment| segment == "..") {
            return Err(Error::invalid_argument("object key must not contain a '..' path segment"));
        }
    }

    Ok(CanonicalRequest { bucket, key, query })
}

/// Parses a query string into a deduplicated map, preserving the S3 convention that bare
/// parameters (`?acl`, `?uploads`) carry an empty value rather than being absent.
fn parse_query(query: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    if query.is_empty() {
        return map;
    }
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().unwrap_or("");
        let value = parts.next().unwrap_or("");
        let key = percent_decode(key).unwrap_or_else(|_| key.to_string());
        let value = percent_decode(value).unwrap_or_else(|_| value.to_string());
        map.insert(key, value);
    }
    map
}

fn percent_decode(s: impl AsRef<str>) -> Result<String, Error> {
    urlencoding::decode(s.as_ref())
        .map(|cow| cow.into_owned())
        .map_err(|err| Error::invalid_argument(format!("invalid percent-encoding: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_host(host: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::HOST, host.parse().unwrap());
        headers
    }

    #[test]
    fn path_style_splits_bucket_and_key() {
        let headers = headers_with_host("s3.example.com");
        let canonical = canonicalize("/photos/a/b.txt", None, &headers, Some("s3.example.com")).unwrap();
        assert_eq!(canonical.bucket.as_deref(), Some("photos"));
        assert_eq!(canonical.key.as_deref(), Some("a/b.txt"));
    }

    #[test]
    fn path_style_bucket_only_has_no_key() {
        let headers = headers_with_host("s3.example.com");
        let canonical = canonicalize("/photos", None, &headers, Some("s3.example.com")).unwrap();
        assert_eq!(canonical.bucket.as_deref(), Some("photos"));
        assert!(canonical.key.is_none());
    }

    #[test]
    fn virtual_host_style_splits_bucket_from_host() {
        let headers = headers_with_host("photos.s3.example.com");
        let canonical = canonicalize("/a/b.txt", None, &headers, Some("s3.example.com")).unwrap();
        assert_eq!(canonical.bucket.as_deref(), Some("photos"));
        assert_eq!(canonical.key.as_deref(), Some("a/b.txt"));
    }

    #[test]
    fn service_root_has_no_bucket_or_key() {
        let headers = headers_with_host("s3.example.com");
        let canonical = canonicalize("/", None, &headers, Some("s3.example.com")).unwrap();
        assert!(canonical.bucket.is_none());
        assert!(canonical.key.is_none());
    }

    #[test]
    fn bare_query_param_has_empty_value() {
        let headers = headers_with_host("s3.example.com");
        let canonical = canonicalize("/photos", Some("list-type=2"), &headers, Some("s3.example.com")).unwrap();
        assert_eq!(canonical.query.get("list-type"), Some(&"2".to_string()));
    }

    #[test]
    fn key_with_nul_byte_is_rejected() {
        let headers = headers_with_host("s3.example.com");
        let err = canonicalize("/photos/a%00b", None, &headers, Some("s3.example.com")).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn key_percent_decodes_while_preserving_slashes() {
        let headers = headers_with_host("s3.example.com");
        let canonical = canonicalize("/photos/a%20b/c.txt", None, &headers, Some("s3.example.com")).unwrap();
        assert_eq!(canonical.key.as_deref(), Some("a b/c.txt"));
    }

    #[test]
    fn key_with_parent_segment_is_rejected() {
        let headers = headers_with_host("s3.example.com");
        let err = canonicalize("/photos/../../etc/passwd", None, &headers, Some("s3.example.com")).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn key_with_embedded_parent_segment_is_rejected() {
        let headers = headers_with_host("s3.example.com");
        let err = canonicalize("/photos/a/../b", None, &headers, Some("s3.example.com")).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}

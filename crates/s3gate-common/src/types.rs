//! Validated newtypes for the gateway's data model (§3).

use derive_more::Display;
use thiserror::Error;

/// A bucket name, validated against the S3 naming rules named in §3:
/// 3-63 characters, lowercase letters/digits/hyphens/periods, must start and
/// end with a letter or digit, and no period may sit next to a hyphen.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
pub struct BucketName(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BucketNameError {
    #[error("bucket name must be at least 3 characters")]
    TooShort,
    #[error("bucket name must be at most 63 characters")]
    TooLong,
    #[error("bucket name must start with a lowercase letter or digit")]
    InvalidStartChar,
    #[error("bucket name must end with a lowercase letter or digit")]
    InvalidEndChar,
    #[error("bucket name may only contain lowercase letters, digits, hyphens, and periods")]
    InvalidChar,
    #[error("bucket name must not have a period adjacent to a hyphen")]
    DotAdjacentToHyphen,
}

impl BucketName {
    pub fn new(name: impl Into<String>) -> Result<Self, BucketNameError> {
        let name = name.into();

        if name.len() < 3 {
            return Err(BucketNameError::TooShort);
        }
        if name.len() > 63 {
            return Err(BucketNameError::TooLong);
        }

        let first = name.as_bytes()[0];
        if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
            return Err(BucketNameError::InvalidStartChar);
        }
        let last = name.as_bytes()[name.len() - 1];
        if !last.is_ascii_lowercase() && !last.is_ascii_digit() {
            return Err(BucketNameError::InvalidEndChar);
        }

        for c in name.chars() {
            if !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.') {
                return Err(BucketNameError::InvalidChar);
            }
        }

        for window in name.as_bytes().windows(2) {
            let (a, b) = (window[0], window[1]);
            if (a == b'.' && b == b'-') || (a == b'-' && b == b'.') {
                return Err(BucketNameError::DotAdjacentToHyphen);
            }
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for BucketName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// An object key: an arbitrary byte string after percent-decoding, non-empty,
/// at most 1024 bytes, with no interior NUL byte (§3, §4.1).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
pub struct ObjectKey(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ObjectKeyError {
    #[error("object key must not be empty")]
    Empty,
    #[error("object key must be at most 1024 bytes")]
    TooLong,
    #[error("object key must not contain a NUL byte")]
    ContainsNul,
    #[error("object key must not contain a '..' path segment")]
    ContainsParentSegment,
}

impl ObjectKey {
    pub fn new(key: impl Into<String>) -> Result<Self, ObjectKeyError> {
        let key = key.into();
        if key.is_empty() {
            return Err(ObjectKeyError::Empty);
        }
        if key.len() > 1024 {
            return Err(ObjectKeyError::TooLong);
        }
        if key.bytes().any(|b| b == 0) {
            return Err(ObjectKeyError::ContainsNul);
        }
        if key.split('/').any(|segment| segment == "..") {
            return Err(ObjectKeyError::ContainsParentSegment);
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_bucket_names() {
        assert!(BucketName::new("my-bucket").is_ok());
        assert!(BucketName::new("my.bucket.1").is_ok());
        assert!(BucketName::new("abc").is_ok());
    }

    #[test]
    fn rejects_short_and_long_names() {
        assert_eq!(BucketName::new("ab").unwrap_err(), BucketNameError::TooShort);
        assert_eq!(
            BucketName::new("a".repeat(64)).unwrap_err(),
            BucketNameError::TooLong
        );
    }

    #[test]
    fn rejects_leading_trailing_hyphen() {
        assert_eq!(
            BucketName::new("-bucket").unwrap_err(),
            BucketNameError::InvalidStartChar
        );
        assert_eq!(
            BucketName::new("bucket-").unwrap_err(),
            BucketNameError::InvalidEndChar
        );
    }

    #[test]
    fn rejects_dot_adjacent_to_hyphen() {
        assert_eq!(
            BucketName::new("my-.bucket").unwrap_err(),
            BucketNameError::DotAdjacentToHyphen
        );
        assert_eq!(
            BucketName::new("my.-bucket").unwrap_err(),
            BucketNameError::DotAdjacentToHyphen
        );
    }

    #[test]
    fn rejects_uppercase_and_invalid_chars() {
        assert_eq!(
            BucketName::new("MyBucket").unwrap_err(),
            BucketNameError::InvalidChar
        );
        assert_eq!(
            BucketName::new("my_bucket").unwrap_err(),
            BucketNameError::InvalidChar
        );
    }

    #[test]
    fn object_key_roundtrip() {
        let key = ObjectKey::new("a/b/c.txt").unwrap();
        assert_eq!(key.as_str(), "a/b/c.txt");
    }

    #[test]
    fn object_key_rejects_empty_too_long_and_nul() {
        assert_eq!(ObjectKey::new("").unwrap_err(), ObjectKeyError::Empty);
        assert_eq!(
            ObjectKey::new("a".repeat(1025)).unwrap_err(),
            ObjectKeyError::TooLong
        );
        assert_eq!(
            ObjectKey::new("a\0b").unwrap_err(),
            ObjectKeyError::ContainsNul
        );
    }

    #[test]
    fn object_key_rejects_parent_segments() {
        assert_eq!(
            ObjectKey::new("../../etc/passwd").unwrap_err(),
            ObjectKeyError::ContainsParentSegment
        );
        assert_eq!(
            ObjectKey::new("a/../b").unwrap_err(),
            ObjectKeyError::ContainsParentSegment
        );
        assert_eq!(
            ObjectKey::new("..").unwrap_err(),
            ObjectKeyError::ContainsParentSegment
        );
    }
}

//! Unified error type for the S3 gateway
//!
//! Every failure that can reach an HTTP response is a variant of [`Error`]. Each
//! variant maps to exactly one HTTP status code and one S3 error code, mirroring
//! how AWS S3 itself reports failures.

use thiserror::Error;

use crate::types::{BucketNameError, ObjectKeyError};

#[derive(Debug, Error)]
pub enum Error {
    #[error("bucket does not exist: {0}")]
    NoSuchBucket(String),

    #[error("key does not exist: {bucket}/{key}")]
    NoSuchKey { bucket: String, key: String },

    #[error("bucket is not empty: {0}")]
    BucketNotEmpty(String),

    #[error("bucket already owned by you: {0}")]
    BucketAlreadyOwnedByYou(String),

    #[error("invalid bucket name: {0}")]
    InvalidBucketName(#[from] BucketNameError),

    #[error("invalid object key: {0}")]
    InvalidObjectKey(#[from] ObjectKeyError),

    #[error("the request signature we calculated does not match the signature provided")]
    SignatureDoesNotMatch,

    #[error("the difference between the request time and the server's time is too large")]
    RequestTimeTooSkewed,

    #[error("the Content-MD5 or x-amz-content-sha256 you specified did not match what we received")]
    BadDigest,

    #[error("at least one of the preconditions you specified did not hold")]
    PreconditionFailed,

    #[error("not modified")]
    NotModified,

    #[error("the requested range is not satisfiable")]
    InvalidRange,

    #[error("the request could not be completed because of a transient backend failure")]
    ServiceUnavailable,

    #[error("your request was missing a required header")]
    MissingSecurityHeader,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("the XML you provided was not well-formed or did not validate against our schema")]
    MalformedXml,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// HTTP status code this error is reported under.
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::NoSuchBucket(_) | Self::NoSuchKey { .. } => 404,
            Self::BucketNotEmpty(_) | Self::BucketAlreadyOwnedByYou(_) => 409,
            Self::InvalidBucketName(_)
            | Self::InvalidObjectKey(_)
            | Self::BadDigest
            | Self::MissingSecurityHeader
            | Self::InvalidArgument(_)
            | Self::MalformedXml => 400,
            Self::SignatureDoesNotMatch | Self::RequestTimeTooSkewed => 403,
            Self::NotModified => 304,
            Self::PreconditionFailed => 412,
            Self::InvalidRange => 416,
            Self::ServiceUnavailable => 503,
            Self::Internal(_) => 500,
        }
    }

    /// S3 error code string returned in the `<Code>` element of an error document.
    pub fn s3_error_code(&self) -> &'static str {
        match self {
            Self::NoSuchBucket(_) => "NoSuchBucket",
            Self::NoSuchKey { .. } => "NoSuchKey",
            Self::BucketNotEmpty(_) => "BucketNotEmpty",
            Self::BucketAlreadyOwnedByYou(_) => "BucketAlreadyOwnedByYou",
            Self::InvalidBucketName(_) => "InvalidBucketName",
            Self::InvalidObjectKey(_) | Self::InvalidArgument(_) => "InvalidArgument",
            Self::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            Self::RequestTimeTooSkewed => "RequestTimeTooSkewed",
            Self::BadDigest => "BadDigest",
            Self::PreconditionFailed => "PreconditionFailed",
            Self::NotModified => "NotModified",
            Self::InvalidRange => "InvalidRange",
            Self::ServiceUnavailable => "ServiceUnavailable",
            Self::MissingSecurityHeader => "MissingSecurityHeader",
            Self::MalformedXml => "MalformedXML",
            Self::Internal(_) => "InternalError",
        }
    }
}

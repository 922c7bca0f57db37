//! Authentication error types.
//!
//! Trimmed from a multi-tenant identity-provider error set down to the
//! variants a single-credential signer actually produces (§4.2, §7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingAuthHeader,

    #[error("invalid authorization header format")]
    InvalidAuthHeader,

    #[error("invalid signature version")]
    InvalidSignatureVersion,

    #[error("access key not found: {0}")]
    AccessKeyNotFound(String),

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("request has expired")]
    RequestExpired,

    #[error("missing required signed header: {0}")]
    MissingSignedHeader(String),

    #[error("invalid date format")]
    InvalidDateFormat,

    #[error("missing x-amz-date or date header")]
    MissingDateHeader,

    #[error("missing security credentials")]
    MissingSecurityHeader,

    #[error("chunk signature mismatch")]
    ChunkSignatureMismatch,

    #[error("malformed chunked upload framing")]
    MalformedChunkFraming,
}

impl From<AuthError> for s3gate_common::Error {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::RequestExpired => s3gate_common::Error::RequestTimeTooSkewed,
            AuthError::MissingAuthHeader
            | AuthError::MissingDateHeader
            | AuthError::MissingSecurityHeader => s3gate_common::Error::MissingSecurityHeader,
            _ => s3gate_common::Error::SignatureDoesNotMatch,
        }
    }
}

//! AWS Signature V2/V4 request verification and presigned URL support (§4.2).
//!
//! The gateway is single-tenant: there is exactly one [`Credentials`] value, fixed at
//! startup, rather than a user store keyed by access key.

pub mod credentials;
pub mod error;
pub mod presign;
pub mod sigv2;
pub mod sigv4;

pub use credentials::Credentials;
pub use error::AuthError;
pub use presign::{presign_get, verify_presigned};
pub use sigv2::SigV2Verifier;
pub use sigv4::{SigV4Verifier, VerifiedRequest, seed_signature, verify_chunk_signature};

//! Shared types, error taxonomy, configuration, and checksum helpers for the
//! S3-compatible gateway.

pub mod checksum;
pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::Error;
pub use types::{BucketName, BucketNameError, ObjectKey, ObjectKeyError};

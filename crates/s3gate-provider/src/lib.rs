//! Pluggable storage backend contract (§4.5).
//!
//! A [`StorageProvider`] is the seam between the HTTP dispatcher and a concrete backend
//! (local filesystem, remote API). The dispatcher is generic over this trait so that
//! swapping backends never touches request handling, canonicalization, or auth.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use s3gate_common::Error;

pub type ByteStream = BoxStream<'static, Result<Bytes, Error>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bucket {
    pub name: String,
    pub created_at_millis: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub key: String,
    pub size: u64,
    pub etag: String,
    pub content_type: String,
    pub last_modified_millis: u64,
    pub user_metadata: HashMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Object {
    pub metadata: ObjectMetadata,
}

/// An inclusive byte range, as parsed from a `Range: bytes=start-end` header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct ListObjectsOptions {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub continuation_token: Option<String>,
    pub max_keys: u32,
}

#[derive(Clone, Debug, Default)]
pub struct ListObjectsPage {
    pub objects: Vec<ObjectMetadata>,
    pub common_prefixes: Vec<String>,
    pub next_continuation_token: Option<String>,
    pub is_truncated: bool,
}

#[derive(Clone, Debug)]
pub enum DeleteOutcome {
    Deleted { key: String },
    Error { key: String, code: String, message: String },
}

/// Capability contract every storage backend satisfies (§4.5).
///
/// Implementors stream bodies rather than buffering whole objects, so large uploads and
/// downloads stay bounded in memory.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    async fn list_buckets(&self) -> Result<Vec<Bucket>, Error>;

    /// Fails with [`Error::BucketAlreadyOwnedByYou`] if the bucket already exists.
    async fn create_bucket(&self, bucket: &str) -> Result<(), Error>;

    /// Fails with [`Error::BucketNotEmpty`] if any object remains, or
    /// [`Error::NoSuchBucket`] if the bucket is absent.
    async fn delete_bucket(&self, bucket: &str) -> Result<(), Error>;

    async fn head_bucket(&self, bucket: &str) -> Result<(), Error>;

    /// If `expected_md5` is present and does not match the MD5 of the streamed body, the
    /// write is discarded and [`Error::BadDigest`] is returned.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        content_type: &str,
        user_metadata: HashMap<String, String>,
        expected_md5: Option<String>,
    ) -> Result<Object, Error>;

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<(ObjectMetadata, ByteStream), Error>;

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMetadata, Error>;

    /// Idempotent: deleting an absent key is a success (§4.5).
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), Error>;

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<Vec<DeleteOutcome>, Error>;

    /// If `src` and `dst` are the same key, only metadata may be replaced.
    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<Object, Error>;

    async fn list_objects(&self, bucket: &str, options: ListObjectsOptions) -> Result<ListObjectsPage, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_range_models_inclusive_bounds() {
        let range = ByteRange { start: 0, end: Some(9) };
        assert_eq!(range.start, 0);
        assert_eq!(range.end, Some(9));
    }

    #[test]
    fn delete_outcome_variants_carry_key() {
        let deleted = DeleteOutcome::Deleted { key: "a.txt".to_string() };
        let error = DeleteOutcome::Error {
            key: "b.txt".to_string(),
            code: "InternalError".to_string(),
            message: "boom".to_string(),
        };
        match (deleted, error) {
            (DeleteOutcome::Deleted { key }, DeleteOutcome::Error { key: k2, .. }) => {
                assert_eq!(key, "a.txt");
                assert_eq!(k2, "b.txt");
            }
            _ => unreachable!(),
        }
    }
}

//! Narrow trait capturing exactly the remote-API primitives §4.7 needs (ambient detail,
//! SPEC_FULL.md §4.7). A real vendor SDK is a single adapter implementing this trait;
//! nothing outside the adapter changes.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use s3gate_common::Error;

pub type RemoteByteStream = BoxStream<'static, Result<Bytes, Error>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteFileStat {
    pub remote_id: String,
    pub size: u64,
    /// The remote API's own content hash. Not MD5 — the cache exists precisely because
    /// this is not directly usable as an S3 ETag.
    pub native_hash: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteFileEntry {
    pub name: String,
    pub remote_id: String,
    pub is_folder: bool,
}

/// Primitives a remote object-storage-like API must expose for the gateway to bridge
/// S3 semantics onto it: folder resolve-or-create, streaming upload/download, delete,
/// stat, and folder listing.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Resolves the folder for `workspace_id`/`path_segments`, creating it if absent.
    /// Concurrent creation of the same folder must be tolerated by re-resolving on
    /// conflict rather than erroring.
    async fn resolve_or_create_folder(
        &self,
        workspace_id: &str,
        path_segments: &[String],
    ) -> Result<String, Error>;

    /// Looks up a folder without creating it.
    async fn find_folder(&self, workspace_id: &str, path_segments: &[String]) -> Result<Option<String>, Error>;

    /// Deletes an empty folder. Implementations may assume the caller has already
    /// verified the folder has no children.
    async fn delete_folder(&self, workspace_id: &str, folder_id: &str) -> Result<(), Error>;

    async fn upload(
        &self,
        workspace_id: &str,
        folder_id: &str,
        name: &str,
        body: RemoteByteStream,
    ) -> Result<RemoteFileStat, Error>;

    async fn download(
        &self,
        workspace_id: &str,
        remote_id: &str,
        range: Option<(u64, Option<u64>)>,
    ) -> Result<RemoteByteStream, Error>;

    async fn delete(&self, workspace_id: &str, remote_id: &str) -> Result<(), Error>;

    async fn stat(&self, workspace_id: &str, remote_id: &str) -> Result<RemoteFileStat, Error>;

    /// Server-side copy, if the backend supports it without a round trip through this
    /// process. Returns `None` when the backend has no such primitive, signalling the
    /// caller to fall back to stream-download-then-upload.
    async fn copy(&self, workspace_id: &str, remote_id: &str, dst_folder_id: &str, dst_name: &str)
    -> Result<Option<RemoteFileStat>, Error>;

    async fn list_folder(&self, workspace_id: &str, folder_id: &str) -> Result<Vec<RemoteFileEntry>, Error>;
}

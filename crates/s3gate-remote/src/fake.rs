//! In-memory [`RemoteClient`] fake for tests.
//!
//! Gives isolated, dependency-free tests a stand-in for the remote API; there is no
//! filesystem to sandbox on the remote side, so a `dashmap`-backed in-process map
//! serves the purpose instead.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use s3gate_common::Error;

use crate::client::{RemoteByteStream, RemoteClient, RemoteFileEntry, RemoteFileStat};

#[derive(Clone)]
struct FakeFile {
    folder_id: String,
    name: String,
    bytes: Bytes,
    native_hash: String,
}

#[derive(Clone)]
struct FakeFolder {
    workspace_id: String,
    parent_id: Option<String>,
    name: String,
}

/// In-memory remote backend. `next_id` hands out monotonically increasing opaque ids for
/// both folders and files, matching the "opaque IDs" contract in SPEC_FULL.md §4.7.
pub struct FakeRemoteClient {
    folders: DashMap<String, FakeFolder>,
    files: DashMap<String, FakeFile>,
    next_id: AtomicU64,
}

impl FakeRemoteClient {
    pub fn new() -> Self {
        let folders = DashMap::new();
        folders.insert(
            "root".to_string(),
            FakeFolder { workspace_id: String::new(), parent_id: None, name: String::new() },
        );
        Self { folders, files: DashMap::new(), next_id: AtomicU64::new(1) }
    }

    fn new_id(&self, prefix: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        format!("{prefix}-{n}")
    }

    fn find_child_folder(&self, parent_id: &str, name: &str) -> Option<String> {
        self.folders
            .iter()
            .find(|entry| entry.value().parent_id.as_deref() == Some(parent_id) && entry.value().name == name)
            .map(|entry| entry.key().clone())
    }

    fn native_hash_of(data: &[u8]) -> String {
        format!("native-{:x}", data.iter().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(*b as u64)))
    }
}

impl Default for FakeRemoteClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteClient for FakeRemoteClient {
    async fn resolve_or_create_folder(&self, workspace_id: &str, path_segments: &[String]) -> Result<String, Error> {
        let mut current = "root".to_string();
        for segment in path_segments {
            current = match self.find_child_folder(&current, segment) {
                Some(id) => id,
                None => {
                    let id = self.new_id("folder");
                    self.folders.insert(
                        id.clone(),
                        FakeFolder {
                            workspace_id: workspace_id.to_string(),
                            parent_id: Some(current.clone()),
                            name: segment.clone(),
                        },
                    );
                    id
                }
            };
        }
        Ok(current)
    }

    async fn find_folder(&self, _workspace_id: &str, path_segments: &[String]) -> Result<Option<String>, Error> {
        let mut current = "root".to_string();
        for segment in path_segments {
            match self.find_child_folder(&current, segment) {
                Some(id) => current = id,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    async fn delete_folder(&self, _workspace_id: &str, folder_id: &str) -> Result<(), Error> {
        self.folders.remove(folder_id);
        Ok(())
    }

    async fn upload(
        &self,
        _workspace_id: &str,
        folder_id: &str,
        name: &str,
        mut body: RemoteByteStream,
    ) -> Result<RemoteFileStat, Error> {
        let mut data = Vec::new();
        while let Some(chunk) = body.next().await.transpose()? {
            data.extend_from_slice(&chunk);
        }
        let native_hash = Self::native_hash_of(&data);
        let remote_id = self.new_id("file");
        let size = data.len() as u64;
        self.files.insert(
            remote_id.clone(),
            FakeFile { folder_id: folder_id.to_string(), name: name.to_string(), bytes: Bytes::from(data), native_hash: native_hash.clone() },
        );
        Ok(RemoteFileStat { remote_id, size, native_hash })
    }

    async fn download(
        &self,
        _workspace_id: &str,
        remote_id: &str,
        range: Option<(u64, Option<u64>)>,
    ) -> Result<RemoteByteStream, Error> {
        let file = self
            .files
            .get(remote_id)
            .ok_or_else(|| Error::internal(format!("fake remote: no such file {remote_id}")))?;

        let bytes = match range {
            Some((start, end)) => {
                let start = start as usize;
                let end = end.map(|e| (e as usize + 1).min(file.bytes.len())).unwrap_or(file.bytes.len());
                file.bytes.slice(start.min(file.bytes.len())..end.max(start.min(file.bytes.len())))
            }
            None => file.bytes.clone(),
        };

        let stream: BoxStream<'static, Result<Bytes, Error>> = stream::once(async move { Ok(bytes) }).boxed();
        Ok(stream)
    }

    async fn delete(&self, _workspace_id: &str, remote_id: &str) -> Result<(), Error> {
        self.files.remove(remote_id);
        Ok(())
    }

    async fn stat(&self, _workspace_id: &str, remote_id: &str) -> Result<RemoteFileStat, Error> {
        let file = self
            .files
            .get(remote_id)
            .ok_or_else(|| Error::internal(format!("fake remote: no such file {remote_id}")))?;
        Ok(RemoteFileStat {
            remote_id: remote_id.to_string(),
            size: file.bytes.len() as u64,
            native_hash: file.native_hash.clone(),
        })
    }

    async fn copy(
        &self,
        _workspace_id: &str,
        remote_id: &str,
        dst_folder_id: &str,
        dst_name: &str,
    ) -> Result<Option<RemoteFileStat>, Error> {
        let file = self
            .files
            .get(remote_id)
            .ok_or_else(|| Error::internal(format!("fake remote: no such file {remote_id}")))?
            .clone();

        let new_id = self.new_id("file");
        self.files.insert(
            new_id.clone(),
            FakeFile {
                folder_id: dst_folder_id.to_string(),
                name: dst_name.to_string(),
                bytes: file.bytes.clone(),
                native_hash: file.native_hash.clone(),
            },
        );
        Ok(Some(RemoteFileStat { remote_id: new_id, size: file.bytes.len() as u64, native_hash: file.native_hash }))
    }

    async fn list_folder(&self, _workspace_id: &str, folder_id: &str) -> Result<Vec<RemoteFileEntry>, Error> {
        let mut entries: Vec<RemoteFileEntry> = self
            .files
            .iter()
            .filter(|entry| entry.value().folder_id == folder_id)
            .map(|entry| RemoteFileEntry { name: entry.value().name.clone(), remote_id: entry.key().clone(), is_folder: false })
            .collect();

        entries.extend(self.folders.iter().filter(|entry| entry.value().parent_id.as_deref() == Some(folder_id)).map(
            |entry| RemoteFileEntry { name: entry.value().name.clone(), remote_id: entry.key().clone(), is_folder: true },
        ));

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(data: &'static [u8]) -> RemoteByteStream {
        stream::once(async move { Ok(Bytes::from_static(data)) }).boxed()
    }

    #[tokio::test]
    async fn resolve_or_create_folder_is_idempotent() {
        let client = FakeRemoteClient::new();
        let segments = vec!["ws".to_string(), "photos".to_string()];
        let first = client.resolve_or_create_folder("ws1", &segments).await.unwrap();
        let second = client.resolve_or_create_folder("ws1", &segments).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn find_folder_returns_none_when_absent() {
        let client = FakeRemoteClient::new();
        let found = client.find_folder("ws1", &["nope".to_string()]).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn delete_folder_removes_it_from_later_lookups() {
        let client = FakeRemoteClient::new();
        let segments = vec!["photos".to_string()];
        let folder_id = client.resolve_or_create_folder("ws1", &segments).await.unwrap();
        client.delete_folder("ws1", &folder_id).await.unwrap();
        assert!(client.find_folder("ws1", &segments).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upload_then_download_round_trips_bytes() {
        let client = FakeRemoteClient::new();
        let stat = client.upload("ws1", "root", "a.txt", body(b"hello world")).await.unwrap();
        assert_eq!(stat.size, 11);

        let mut stream = client.download("ws1", &stat.remote_id, None).await.unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await.transpose().unwrap() {
            collected.extend_from_slice(&chunk);
        }
        assert_eq!(collected, b"hello world");
    }

    #[tokio::test]
    async fn download_honors_byte_range() {
        let client = FakeRemoteClient::new();
        let stat = client.upload("ws1", "root", "a.txt", body(b"hello world")).await.unwrap();

        let mut stream = client.download("ws1", &stat.remote_id, Some((6, Some(10)))).await.unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await.transpose().unwrap() {
            collected.extend_from_slice(&chunk);
        }
        assert_eq!(collected, b"world");
    }

    #[tokio::test]
    async fn stat_reflects_uploaded_size_and_hash() {
        let client = FakeRemoteClient::new();
        let stat = client.upload("ws1", "root", "a.txt", body(b"hello")).await.unwrap();
        let fetched = client.stat("ws1", &stat.remote_id).await.unwrap();
        assert_eq!(fetched, stat);
    }

    #[tokio::test]
    async fn delete_then_stat_fails() {
        let client = FakeRemoteClient::new();
        let stat = client.upload("ws1", "root", "a.txt", body(b"hello")).await.unwrap();
        client.delete("ws1", &stat.remote_id).await.unwrap();
        assert!(client.stat("ws1", &stat.remote_id).await.is_err());
    }

    #[tokio::test]
    async fn copy_produces_independent_file_with_same_hash() {
        let client = FakeRemoteClient::new();
        let stat = client.upload("ws1", "root", "a.txt", body(b"hello")).await.unwrap();
        let copied = client.copy("ws1", &stat.remote_id, "root", "b.txt").await.unwrap().unwrap();

        assert_ne!(copied.remote_id, stat.remote_id);
        assert_eq!(copied.native_hash, stat.native_hash);
        client.delete("ws1", &stat.remote_id).await.unwrap();
        assert!(client.stat("ws1", &copied.remote_id).await.is_ok());
    }

    #[tokio::test]
    async fn list_folder_includes_files_and_subfolders_sorted_by_name() {
        let client = FakeRemoteClient::new();
        client.upload("ws1", "root", "b.txt", body(b"b")).await.unwrap();
        client.upload("ws1", "root", "a.txt", body(b"a")).await.unwrap();
        client.resolve_or_create_folder("ws1", &["sub".to_string()]).await.unwrap();

        let entries = client.list_folder("ws1", "root").await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "sub"]);
    }
}

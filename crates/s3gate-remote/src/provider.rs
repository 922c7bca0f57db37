//! [`StorageProvider`] bridging S3 semantics onto a [`RemoteClient`] backend.
//!
//! Uploads are teed through an MD5 hasher while streaming to the remote API, and the
//! computed digest is consulted from the side-cache before trusting the remote's own
//! native hash, matching how `put_object` on the filesystem backend computes its own
//! MD5 inline rather than trusting whatever the client sent.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashSet;
use futures::{StreamExt, TryStreamExt};
use s3gate_cache::{CacheEntry, Md5Cache, now_millis};
use s3gate_common::Error;
use s3gate_common::checksum::{Md5Hasher, quoted_etag};
use s3gate_provider::{
    Bucket, ByteRange, ByteStream, DeleteOutcome, ListObjectsOptions, ListObjectsPage, Object,
    ObjectMetadata, StorageProvider,
};

use crate::client::RemoteClient;

const MAX_FOLDER_CREATE_ATTEMPTS: usize = 3;

pub struct RemoteProvider {
    client: Arc<dyn RemoteClient>,
    cache: Arc<Md5Cache>,
    workspace_id: String,
    warned_keys: DashSet<String>,
}

impl RemoteProvider {
    pub fn new(client: Arc<dyn RemoteClient>, cache: Arc<Md5Cache>, workspace_id: String) -> Self {
        Self { client, cache, workspace_id, warned_keys: DashSet::new() }
    }

    fn key_segments(key: &str) -> Vec<String> {
        key.split('/').map(|s| s.to_string()).collect()
    }

    /// Resolves the folder for `bucket/dir_segments`, retrying resolve-or-create up to
    /// [`MAX_FOLDER_CREATE_ATTEMPTS`] times to absorb concurrent-creation races (§4.7).
    async fn resolve_folder_with_retry(&self, bucket: &str, dir_segments: &[String]) -> Result<String, Error> {
        let mut segments = vec![bucket.to_string()];
        segments.extend(dir_segments.iter().cloned());

        let mut last_err = None;
        for _ in 0..MAX_FOLDER_CREATE_ATTEMPTS {
            match self.client.resolve_or_create_folder(&self.workspace_id, &segments).await {
                Ok(id) => return Ok(id),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::internal("folder resolution exhausted retries")))
    }

    fn warn_once(&self, bucket: &str, key: &str) {
        let cache_key = format!("{bucket}/{key}");
        if self.warned_keys.insert(cache_key) {
            tracing::warn!(bucket, key, "no MD5 cache entry for remote object; falling back to native hash");
        }
    }
}

#[async_trait]
impl StorageProvider for RemoteProvider {
    async fn list_buckets(&self) -> Result<Vec<Bucket>, Error> {
        let entries = self.client.list_folder(&self.workspace_id, "root").await?;
        Ok(entries
            .into_iter()
            .filter(|e| e.is_folder)
            .map(|e| Bucket { name: e.name, created_at_millis: 0 })
            .collect())
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), Error> {
        if self.client.find_folder(&self.workspace_id, &[bucket.to_string()]).await?.is_some() {
            return Err(Error::BucketAlreadyOwnedByYou(bucket.to_string()));
        }
        self.client.resolve_or_create_folder(&self.workspace_id, &[bucket.to_string()]).await?;
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), Error> {
        let folder_id = self
            .client
            .find_folder(&self.workspace_id, &[bucket.to_string()])
            .await?
            .ok_or_else(|| Error::NoSuchBucket(bucket.to_string()))?;

        let children = self.client.list_folder(&self.workspace_id, &folder_id).await?;
        if !children.is_empty() {
            return Err(Error::BucketNotEmpty(bucket.to_string()));
        }

        self.client.delete_folder(&self.workspace_id, &folder_id).await
    }

    async fn head_bucket(&self, bucket: &str) -> Result<(), Error> {
        match self.client.find_folder(&self.workspace_id, &[bucket.to_string()]).await? {
            Some(_) => Ok(()),
            None => Err(Error::NoSuchBucket(bucket.to_string())),
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        content_type: &str,
        _user_metadata: HashMap<String, String>,
        expected_md5: Option<String>,
    ) -> Result<Object, Error> {
        let mut segments = Self::key_segments(key);
        let name = segments.pop().unwrap_or_default();
        let folder_id = self.resolve_folder_with_retry(bucket, &segments).await?;

        // Tee the upload body through an MD5 hasher: the remote API's own content hash
        // is not MD5 (§4.7), so the hash S3 clients expect as the ETag has to be computed
        // here, alongside the upload rather than as a separate pass over the bytes.
        let hasher = Arc::new(std::sync::Mutex::new(Md5Hasher::new()));
        let hasher_for_tee = hasher.clone();
        let tee_stream: ByteStream = body
            .inspect_ok(move |chunk| hasher_for_tee.lock().expect("hasher mutex poisoned").update(chunk))
            .boxed();

        let stat = self.client.upload(&self.workspace_id, &folder_id, &name, tee_stream).await?;

        let md5_hex = Arc::try_unwrap(hasher)
            .expect("upload fully drains the tee stream before returning")
            .into_inner()
            .expect("hasher mutex poisoned")
            .finalize_hex();

        if let Some(expected) = &expected_md5
            && !expected.eq_ignore_ascii_case(&md5_hex)
        {
            let _ = self.client.delete(&self.workspace_id, &stat.remote_id).await;
            return Err(Error::BadDigest);
        }

        let entry = CacheEntry {
            workspace_id: self.workspace_id.clone(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            md5_hex: md5_hex.clone(),
            size: stat.size,
            remote_id: stat.remote_id.clone(),
            updated_at_millis: now_millis(),
        };

        if let Err(err) = self.cache.put(&entry).await {
            tracing::warn!(bucket, key, error = %err, "failed to write MD5 cache entry after successful upload");
        }

        Ok(Object {
            metadata: ObjectMetadata {
                key: key.to_string(),
                size: stat.size,
                etag: quoted_etag(&md5_hex),
                content_type: content_type.to_string(),
                last_modified_millis: now_millis(),
                user_metadata: HashMap::new(),
            },
        })
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<(ObjectMetadata, ByteStream), Error> {
        let metadata = self.head_object(bucket, key).await?;
        let remote_id = self.remote_id_for(bucket, key).await?;

        let remote_range = range.map(|r| (r.start, r.end));
        let stream = self.client.download(&self.workspace_id, &remote_id, remote_range).await?;
        Ok((metadata, stream))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMetadata, Error> {
        let remote_id = self.remote_id_for(bucket, key).await?;

        if let Some(entry) = self.cache.get(&self.workspace_id, bucket, key).await? {
            let stat = self.client.stat(&self.workspace_id, &remote_id).await?;
            if stat.size == entry.size {
                return Ok(ObjectMetadata {
                    key: key.to_string(),
                    size: entry.size,
                    etag: quoted_etag(&entry.md5_hex),
                    content_type: String::new(),
                    last_modified_millis: entry.updated_at_millis,
                    user_metadata: HashMap::new(),
                });
            }
            // The remote file changed size out from under the cache; the cached MD5 no
            // longer applies to it, so drop the stale entry rather than keep recomputing
            // this mismatch on every future stat of the same key.
            self.cache.delete(&self.workspace_id, bucket, key).await?;
        }

        self.warn_once(bucket, key);
        let stat = self.client.stat(&self.workspace_id, &remote_id).await?;
        Ok(ObjectMetadata {
            key: key.to_string(),
            size: stat.size,
            etag: quoted_etag(&stat.native_hash),
            content_type: String::new(),
            last_modified_millis: now_millis(),
            user_metadata: HashMap::new(),
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), Error> {
        if let Ok(remote_id) = self.remote_id_for(bucket, key).await {
            self.client.delete(&self.workspace_id, &remote_id).await?;
        }
        self.cache.delete(&self.workspace_id, bucket, key).await?;
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<Vec<DeleteOutcome>, Error> {
        let mut outcomes = Vec::with_capacity(keys.len());
        for key in keys {
            match self.delete_object(bucket, key).await {
                Ok(()) => outcomes.push(DeleteOutcome::Deleted { key: key.clone() }),
                Err(err) => outcomes.push(DeleteOutcome::Error {
                    key: key.clone(),
                    code: err.s3_error_code().to_string(),
                    message: err.to_string(),
                }),
            }
        }
        Ok(outcomes)
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<Object, Error> {
        // Per the `StorageProvider::copy_object` contract: a same-key copy replaces
        // metadata only, so this just refreshes the cache entry's timestamp rather than
        // re-uploading the file. A real remote copy here would produce a new remote id
        // and leave the original file orphaned.
        if src_bucket == dst_bucket && src_key == dst_key {
            let (md5_hex, size, remote_id) = match self.cache.get(&self.workspace_id, src_bucket, src_key).await? {
                Some(entry) => (entry.md5_hex, entry.size, entry.remote_id),
                None => {
                    let remote_id = self.remote_id_for(src_bucket, src_key).await?;
                    let stat = self.client.stat(&self.workspace_id, &remote_id).await?;
                    (stat.native_hash, stat.size, remote_id)
                }
            };

            let updated_at_millis = now_millis();
            let entry = CacheEntry {
                workspace_id: self.workspace_id.clone(),
                bucket: dst_bucket.to_string(),
                key: dst_key.to_string(),
                md5_hex: md5_hex.clone(),
                size,
                remote_id,
                updated_at_millis,
            };
            self.cache.put(&entry).await?;

            return Ok(Object {
                metadata: ObjectMetadata {
                    key: dst_key.to_string(),
                    size,
                    etag: quoted_etag(&md5_hex),
                    content_type: String::new(),
                    last_modified_millis: updated_at_millis,
                    user_metadata: HashMap::new(),
                },
            });
        }

        let src_remote_id = self.remote_id_for(src_bucket, src_key).await?;

        let mut dst_segments = Self::key_segments(dst_key);
        let dst_name = dst_segments.pop().unwrap_or_default();
        let dst_folder_id = self.resolve_folder_with_retry(dst_bucket, &dst_segments).await?;

        let stat = match self.client.copy(&self.workspace_id, &src_remote_id, &dst_folder_id, &dst_name).await? {
            Some(stat) => stat,
            None => {
                let body = self.client.download(&self.workspace_id, &src_remote_id, None).await?;
                self.client.upload(&self.workspace_id, &dst_folder_id, &dst_name, body).await?
            }
        };

        let md5_hex = if let Some(entry) = self.cache.get(&self.workspace_id, src_bucket, src_key).await? {
            entry.md5_hex
        } else {
            stat.native_hash.clone()
        };

        let entry = CacheEntry {
            workspace_id: self.workspace_id.clone(),
            bucket: dst_bucket.to_string(),
            key: dst_key.to_string(),
            md5_hex: md5_hex.clone(),
            size: stat.size,
            remote_id: stat.remote_id.clone(),
            updated_at_millis: now_millis(),
        };
        self.cache.put(&entry).await?;

        Ok(Object {
            metadata: ObjectMetadata {
                key: dst_key.to_string(),
                size: stat.size,
                etag: quoted_etag(&md5_hex),
                content_type: String::new(),
                last_modified_millis: now_millis(),
                user_metadata: HashMap::new(),
            },
        })
    }

    async fn list_objects(&self, bucket: &str, options: ListObjectsOptions) -> Result<ListObjectsPage, Error> {
        let folder_id = self
            .client
            .find_folder(&self.workspace_id, &[bucket.to_string()])
            .await?
            .ok_or_else(|| Error::NoSuchBucket(bucket.to_string()))?;

        // Nested keys map to nested folders on this backend (§4.7), so listing has to
        // recurse the same way `LocalProvider` walks subdirectories rather than reading
        // one folder's direct children.
        let mut all_keys = Vec::new();
        self.walk_remote_keys(&folder_id, "", &mut all_keys).await?;
        all_keys.sort();

        let prefix = options.prefix.as_deref().unwrap_or("");
        let mut matching: Vec<String> = all_keys.into_iter().filter(|k| k.starts_with(prefix)).collect();

        if let Some(token) = &options.continuation_token {
            matching.retain(|k| k.as_str() > token.as_str());
        }

        let max_keys = if options.max_keys == 0 { 1000 } else { options.max_keys } as usize;

        let mut common_prefixes = Vec::new();
        let mut objects = Vec::new();
        let mut seen_prefixes = std::collections::BTreeSet::new();
        let mut last_consumed: Option<usize> = None;

        for (idx, key) in matching.iter().enumerate() {
            if objects.len() + common_prefixes.len() >= max_keys {
                break;
            }

            last_consumed = Some(idx);

            if let Some(delimiter) = options.delimiter.as_deref().filter(|d| !d.is_empty()) {
                let rest = &key[prefix.len()..];
                if let Some(pos) = rest.find(delimiter) {
                    let common_prefix = format!("{prefix}{}", &rest[..pos + delimiter.len()]);
                    if seen_prefixes.insert(common_prefix.clone()) {
                        common_prefixes.push(common_prefix);
                    }
                    continue;
                }
            }

            let metadata = self.head_object(bucket, key).await?;
            objects.push(metadata);
        }

        let is_truncated = match last_consumed {
            Some(idx) => idx + 1 < matching.len(),
            None => false,
        };
        let next_continuation_token = if is_truncated { last_consumed.and_then(|idx| matching.get(idx).cloned()) } else { None };

        Ok(ListObjectsPage { objects, common_prefixes, next_continuation_token, is_truncated })
    }
}

impl RemoteProvider {
    /// Recursively walks `folder_id`, collecting the full `/`-joined key for every file
    /// beneath it, mirroring how `LocalProvider::list_objects` walks subdirectories.
    fn walk_remote_keys<'a>(
        &'a self,
        folder_id: &'a str,
        prefix_path: &'a str,
        out: &'a mut Vec<String>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), Error>> + Send + 'a>> {
        Box::pin(async move {
            let entries = self.client.list_folder(&self.workspace_id, folder_id).await?;
            for entry in entries {
                let key = if prefix_path.is_empty() { entry.name.clone() } else { format!("{prefix_path}/{}", entry.name) };
                if entry.is_folder {
                    self.walk_remote_keys(&entry.remote_id, &key, out).await?;
                } else {
                    out.push(key);
                }
            }
            Ok(())
        })
    }

    async fn remote_id_for(&self, bucket: &str, key: &str) -> Result<String, Error> {
        if let Some(entry) = self.cache.get(&self.workspace_id, bucket, key).await? {
            return Ok(entry.remote_id);
        }

        let mut segments = vec![bucket.to_string()];
        segments.extend(Self::key_segments(key));
        let name = segments.pop().unwrap_or_default();

        let folder_id = self
            .client
            .find_folder(&self.workspace_id, &segments)
            .await?
            .ok_or_else(|| Error::NoSuchKey { bucket: bucket.to_string(), key: key.to_string() })?;

        let entries = self.client.list_folder(&self.workspace_id, &folder_id).await?;
        entries
            .into_iter()
            .find(|e| !e.is_folder && e.name == name)
            .map(|e| e.remote_id)
            .ok_or_else(|| Error::NoSuchKey { bucket: bucket.to_string(), key: key.to_string() })
    }

    /// Walks the remote backend populating missing cache entries by streaming each file
    /// and computing its MD5 (§4.8 `migrate`). `dry_run` enumerates without writing.
    pub async fn migrate(&self, bucket: Option<&str>, dry_run: bool) -> Result<MigrationReport, Error> {
        let buckets = match bucket {
            Some(b) => vec![Bucket { name: b.to_string(), created_at_millis: 0 }],
            None => self.list_buckets().await?,
        };

        let mut report = MigrationReport::default();
        for bucket in buckets {
            let folder_id = match self.client.find_folder(&self.workspace_id, &[bucket.name.clone()]).await? {
                Some(id) => id,
                None => continue,
            };
            let entries = self.client.list_folder(&self.workspace_id, &folder_id).await?;

            for entry in entries.into_iter().filter(|e| !e.is_folder) {
                report.scanned += 1;
                if self.cache.get(&self.workspace_id, &bucket.name, &entry.name).await?.is_some() {
                    continue;
                }

                let mut body = self.client.download(&self.workspace_id, &entry.remote_id, None).await?;
                let mut hasher = Md5Hasher::new();
                let mut size = 0u64;
                while let Some(chunk) = body.next().await.transpose()? {
                    hasher.update(&chunk);
                    size += chunk.len() as u64;
                }
                let md5_hex = hasher.finalize_hex();

                report.populated += 1;
                if !dry_run {
                    let cache_entry = CacheEntry {
                        workspace_id: self.workspace_id.clone(),
                        bucket: bucket.name.clone(),
                        key: entry.name.clone(),
                        md5_hex,
                        size,
                        remote_id: entry.remote_id.clone(),
                        updated_at_millis: now_millis(),
                    };
                    self.cache.put(&cache_entry).await?;
                }
            }
        }

        Ok(report)
    }
}

#[derive(Clone, Debug, Default)]
pub struct MigrationReport {
    pub scanned: u64,
    pub populated: u64,
}

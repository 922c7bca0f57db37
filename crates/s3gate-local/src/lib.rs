//! Filesystem-backed [`StorageProvider`] (§4.6).
//!
//! Each bucket is a directory under the configured root. `objects/<key>` holds payload
//! bytes (subdirectories introduced by `/` in the key are created on demand);
//! `.metadata/<key>.json` holds a sidecar record of content-type, MD5, size, and
//! last-modified. Writes land via a temp-file-then-rename sequence so a reader never
//! observes a half-written object.

use std::collections::HashMap;
use std::io;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use s3gate_common::checksum::Md5Hasher;
use s3gate_common::Error;
use s3gate_provider::{
    Bucket, ByteRange, ByteStream, DeleteOutcome, ListObjectsOptions, ListObjectsPage, Object,
    ObjectMetadata, StorageProvider,
};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

const DIR_MODE: u32 = 0o700;
const FILE_MODE: u32 = 0o600;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Sidecar {
    content_type: String,
    md5_hex: String,
    size: u64,
    last_modified_millis: u64,
    #[serde(default)]
    user_metadata: HashMap<String, String>,
}

pub struct LocalProvider {
    root: PathBuf,
}

impl LocalProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    fn objects_dir(&self, bucket: &str) -> PathBuf {
        self.bucket_dir(bucket).join("objects")
    }

    fn metadata_dir(&self, bucket: &str) -> PathBuf {
        self.bucket_dir(bucket).join(".metadata")
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.objects_dir(bucket).join(key)
    }

    fn sidecar_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.metadata_dir(bucket).join(format!("{key}.json"))
    }

    async fn create_parent_dirs(path: &Path) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            create_dir_mode(parent).await?;
        }
        Ok(())
    }

    async fn read_sidecar(&self, bucket: &str, key: &str) -> Result<Sidecar, Error> {
        let path = self.sidecar_path(bucket, key);
        let bytes = fs::read(&path).await.map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                Error::NoSuchKey { bucket: bucket.to_string(), key: key.to_string() }
            } else {
                Error::Internal(err.to_string())
            }
        })?;
        serde_json::from_slice(&bytes).map_err(|err| {
            tracing::error!(bucket, key, error = %err, "corrupt metadata sidecar");
            Error::Internal(format!("corrupt sidecar for {bucket}/{key}"))
        })
    }

    fn metadata_from_sidecar(key: &str, sidecar: &Sidecar) -> ObjectMetadata {
        ObjectMetadata {
            key: key.to_string(),
            size: sidecar.size,
            etag: s3gate_common::checksum::quoted_etag(&sidecar.md5_hex),
            content_type: sidecar.content_type.clone(),
            last_modified_millis: sidecar.last_modified_millis,
            user_metadata: sidecar.user_metadata.clone(),
        }
    }
}

async fn create_dir_mode(path: &Path) -> Result<(), Error> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_MODE);
    }
    builder.create(path).await.map_err(|err| Error::Internal(err.to_string()))
}

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

fn normalize_key_separators(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace(std::path::MAIN_SEPARATOR, "/")
}

#[async_trait]
impl StorageProvider for LocalProvider {
    async fn list_buckets(&self) -> Result<Vec<Bucket>, Error> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(Error::Internal(err.to_string())),
        };

        let mut buckets = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|err| Error::Internal(err.to_string()))? {
            if !entry.file_type().await.map_err(|err| Error::Internal(err.to_string()))?.is_dir() {
                continue;
            }
            let metadata = entry.metadata().await.map_err(|err| Error::Internal(err.to_string()))?;
            let created_at_millis = metadata
                .created()
                .or_else(|_| metadata.modified())
                .map(|t| t.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64)
                .unwrap_or(0);
            buckets.push(Bucket {
                name: entry.file_name().to_string_lossy().to_string(),
                created_at_millis,
            });
        }
        buckets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(buckets)
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), Error> {
        let dir = self.bucket_dir(bucket);
        if fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(Error::BucketAlreadyOwnedByYou(bucket.to_string()));
        }
        create_dir_mode(&self.objects_dir(bucket)).await?;
        create_dir_mode(&self.metadata_dir(bucket)).await?;
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), Error> {
        let dir = self.bucket_dir(bucket);
        if !fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(Error::NoSuchBucket(bucket.to_string()));
        }

        let objects_empty = dir_is_empty(&self.objects_dir(bucket)).await?;
        let metadata_empty = dir_is_empty(&self.metadata_dir(bucket)).await?;
        if !objects_empty || !metadata_empty {
            return Err(Error::BucketNotEmpty(bucket.to_string()));
        }

        fs::remove_dir_all(&dir).await.map_err(|err| Error::Internal(err.to_string()))?;
        Ok(())
    }

    async fn head_bucket(&self, bucket: &str) -> Result<(), Error> {
        if fs::try_exists(self.bucket_dir(bucket)).await.unwrap_or(false) {
            Ok(())
        } else {
            Err(Error::NoSuchBucket(bucket.to_string()))
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        mut body: ByteStream,
        content_type: &str,
        user_metadata: HashMap<String, String>,
        expected_md5: Option<String>,
    ) -> Result<Object, Error> {
        if !fs::try_exists(self.bucket_dir(bucket)).await.unwrap_or(false) {
            return Err(Error::NoSuchBucket(bucket.to_string()));
        }

        let final_path = self.object_path(bucket, key);
        Self::create_parent_dirs(&final_path).await?;

        let tmp_path = final_path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        let mut file = open_with_mode(&tmp_path).await?;

        let mut hasher = Md5Hasher::new();
        let mut size: u64 = 0;
        while let Some(chunk) = body.next().await.transpose()? {
            hasher.update(&chunk);
            size += chunk.len() as u64;
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(Error::Internal(err.to_string()));
            }
        }

        let md5_hex = hasher.finalize_hex();

        if let Some(expected) = &expected_md5
            && !expected.eq_ignore_ascii_case(&md5_hex)
        {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(Error::BadDigest);
        }

        file.sync_all().await.map_err(|err| Error::Internal(err.to_string()))?;
        drop(file);
        fs::rename(&tmp_path, &final_path).await.map_err(|err| Error::Internal(err.to_string()))?;

        let sidecar = Sidecar {
            content_type: content_type.to_string(),
            md5_hex: md5_hex.clone(),
            size,
            last_modified_millis: now_millis(),
            user_metadata,
        };

        let sidecar_path = self.sidecar_path(bucket, key);
        Self::create_parent_dirs(&sidecar_path).await?;
        let sidecar_tmp = sidecar_path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        let json = serde_json::to_vec(&sidecar).map_err(|err| Error::Internal(err.to_string()))?;

        let mut sidecar_file = open_with_mode(&sidecar_tmp).await?;
        if let Err(err) = sidecar_file.write_all(&json).await {
            let _ = fs::remove_file(&sidecar_tmp).await;
            let _ = fs::remove_file(&final_path).await;
            return Err(Error::Internal(err.to_string()));
        }
        sidecar_file.sync_all().await.map_err(|err| Error::Internal(err.to_string()))?;
        drop(sidecar_file);
        fs::rename(&sidecar_tmp, &sidecar_path).await.map_err(|err| Error::Internal(err.to_string()))?;

        Ok(Object { metadata: Self::metadata_from_sidecar(key, &sidecar) })
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<(ObjectMetadata, ByteStream), Error> {
        let sidecar = self.read_sidecar(bucket, key).await?;
        let metadata = Self::metadata_from_sidecar(key, &sidecar);

        let path = self.object_path(bucket, key);
        let mut file = fs::File::open(&path).await.map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                tracing::error!(bucket, key, "sidecar present but payload missing");
                Error::Internal(format!("missing payload for {bucket}/{key}"))
            } else {
                Error::Internal(err.to_string())
            }
        })?;

        if let Some(range) = range {
            use tokio::io::{AsyncSeekExt, AsyncReadExt};
            file.seek(io::SeekFrom::Start(range.start)).await.map_err(|err| Error::Internal(err.to_string()))?;
            let take_len = match range.end {
                Some(end) => end.saturating_sub(range.start) + 1,
                None => metadata.size.saturating_sub(range.start),
            };
            let limited = file.take(take_len);
            let stream = ReaderStream::new(limited).map_err(|err| Error::Internal(err.to_string())).boxed();
            return Ok((metadata, stream));
        }

        let stream = ReaderStream::new(file).map_err(|err| Error::Internal(err.to_string())).boxed();
        Ok((metadata, stream))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMetadata, Error> {
        let sidecar = self.read_sidecar(bucket, key).await?;
        Ok(Self::metadata_from_sidecar(key, &sidecar))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), Error> {
        let path = self.object_path(bucket, key);
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(Error::Internal(err.to_string())),
        }
        let sidecar_path = self.sidecar_path(bucket, key);
        match fs::remove_file(&sidecar_path).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(Error::Internal(err.to_string())),
        }
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
        let sidecar = self.read_sidecar(src_bucket, src_key).await?;

        if !fs::try_exists(self.bucket_dir(dst_bucket)).await.unwrap_or(false) {
            return Err(Error::NoSuchBucket(dst_bucket.to_string()));
        }

        let dst_path = self.object_path(dst_bucket, dst_key);
        Self::create_parent_dirs(&dst_path).await?;

        if src_bucket != dst_bucket || src_key != dst_key {
            let src_path = self.object_path(src_bucket, src_key);
            fs::copy(&src_path, &dst_path).await.map_err(|err| Error::Internal(err.to_string()))?;
        }

        let mut new_sidecar = sidecar;
        new_sidecar.last_modified_millis = now_millis();

        let dst_sidecar_path = self.sidecar_path(dst_bucket, dst_key);
        Self::create_parent_dirs(&dst_sidecar_path).await?;
        let json = serde_json::to_vec(&new_sidecar).map_err(|err| Error::Internal(err.to_string()))?;
        let tmp = dst_sidecar_path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        let mut sidecar_file = open_with_mode(&tmp).await?;
        sidecar_file.write_all(&json).await.map_err(|err| Error::Internal(err.to_string()))?;
        sidecar_file.sync_all().await.map_err(|err| Error::Internal(err.to_string()))?;
        drop(sidecar_file);
        fs::rename(&tmp, &dst_sidecar_path).await.map_err(|err| Error::Internal(err.to_string()))?;

        Ok(Object { metadata: Self::metadata_from_sidecar(dst_key, &new_sidecar) })
    }

    async fn list_objects(&self, bucket: &str, options: ListObjectsOptions) -> Result<ListObjectsPage, Error> {
        if !fs::try_exists(self.bucket_dir(bucket)).await.unwrap_or(false) {
            return Err(Error::NoSuchBucket(bucket.to_string()));
        }

        let objects_root = self.objects_dir(bucket);
        let mut all_keys = Vec::new();
        walk_keys(&objects_root, &objects_root, &mut all_keys).await?;
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

            let sidecar = self.read_sidecar(bucket, key).await?;
            objects.push(Self::metadata_from_sidecar(key, &sidecar));
        }

        // `last_consumed` is the index of the last `matching` item the loop actually
        // processed, which can be far beyond `objects.len() + common_prefixes.len()`
        // when a delimiter collapses many keys into one common prefix — using the
        // emitted-item count here instead would undercount consumption and could loop
        // forever on a continuation token that never advances past a grouped prefix.
        let is_truncated = match last_consumed {
            Some(idx) => idx + 1 < matching.len(),
            None => false,
        };
        let next_continuation_token = if is_truncated { last_consumed.and_then(|idx| matching.get(idx).cloned()) } else { None };

        Ok(ListObjectsPage {
            objects,
            common_prefixes,
            next_continuation_token,
            is_truncated,
        })
    }
}

async fn dir_is_empty(path: &Path) -> Result<bool, Error> {
    match fs::read_dir(path).await {
        Ok(mut entries) => Ok(entries.next_entry().await.map_err(|err| Error::Internal(err.to_string()))?.is_none()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(true),
        Err(err) => Err(Error::Internal(err.to_string())),
    }
}

async fn open_with_mode(path: &Path) -> Result<fs::File, Error> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(FILE_MODE);
    options.open(path).await.map_err(|err| Error::Internal(err.to_string()))
}

fn walk_keys<'a>(
    dir: &'a Path,
    root: &'a Path,
    out: &'a mut Vec<String>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), Error>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(Error::Internal(err.to_string())),
        };

        while let Some(entry) = entries.next_entry().await.map_err(|err| Error::Internal(err.to_string()))? {
            let path = entry.path();
            let file_type = entry.file_type().await.map_err(|err| Error::Internal(err.to_string()))?;
            if file_type.is_dir() {
                walk_keys(&path, root, out).await?;
            } else if !path.extension().is_some_and(|ext| ext.to_string_lossy().starts_with("tmp-")) {
                out.push(normalize_key_separators(&path, root));
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;

    fn body_of(data: &'static [u8]) -> ByteStream {
        stream::once(async move { Ok(Bytes::from_static(data)) }).boxed()
    }

    #[tokio::test]
    async fn put_then_get_round_trips_etag() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::new(dir.path());
        provider.create_bucket("photos").await.unwrap();

        let object = provider
            .put_object("photos", "a/b.txt", body_of(b"hello world"), "text/plain", HashMap::new(), None)
            .await
            .unwrap();

        let expected_etag = s3gate_common::checksum::quoted_etag(&s3gate_common::checksum::md5_hex(b"hello world"));
        assert_eq!(object.metadata.etag, expected_etag);

        let (metadata, mut stream) = provider.get_object("photos", "a/b.txt", None).await.unwrap();
        assert_eq!(metadata.etag, expected_etag);

        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"hello world");
    }

    #[tokio::test]
    async fn put_object_rejects_mismatched_expected_md5() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::new(dir.path());
        provider.create_bucket("photos").await.unwrap();

        let result = provider
            .put_object(
                "photos",
                "a.txt",
                body_of(b"hello"),
                "text/plain",
                HashMap::new(),
                Some("00000000000000000000000000000000".to_string()),
            )
            .await;

        assert!(matches!(result, Err(Error::BadDigest)));
    }

    #[tokio::test]
    async fn delete_object_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::new(dir.path());
        provider.create_bucket("photos").await.unwrap();
        provider.delete_object("photos", "missing.txt").await.unwrap();
    }

    #[tokio::test]
    async fn delete_bucket_fails_when_not_empty() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::new(dir.path());
        provider.create_bucket("photos").await.unwrap();
        provider.put_object("photos", "a.txt", body_of(b"x"), "text/plain", HashMap::new(), None).await.unwrap();

        let result = provider.delete_bucket("photos").await;
        assert!(matches!(result, Err(Error::BucketNotEmpty(_))));
    }

    #[tokio::test]
    async fn create_bucket_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::new(dir.path());
        provider.create_bucket("photos").await.unwrap();
        let result = provider.create_bucket("photos").await;
        assert!(matches!(result, Err(Error::BucketAlreadyOwnedByYou(_))));
    }

    #[tokio::test]
    async fn list_objects_groups_common_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::new(dir.path());
        provider.create_bucket("photos").await.unwrap();
        for key in ["a/1.txt", "a/2.txt", "b.txt"] {
            provider.put_object("photos", key, body_of(b"x"), "text/plain", HashMap::new(), None).await.unwrap();
        }

        let page = provider
            .list_objects(
                "photos",
                ListObjectsOptions { delimiter: Some("/".to_string()), max_keys: 1000, ..Default::default() },
            )
            .await
            .unwrap();

        assert_eq!(page.common_prefixes, vec!["a/".to_string()]);
        assert_eq!(page.objects.len(), 1);
        assert_eq!(page.objects[0].key, "b.txt");
    }

    #[tokio::test]
    async fn list_objects_delimiter_grouping_terminates_pagination() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::new(dir.path());
        provider.create_bucket("photos").await.unwrap();
        for key in ["a/1.txt", "a/2.txt", "a/3.txt"] {
            provider.put_object("photos", key, body_of(b"x"), "text/plain", HashMap::new(), None).await.unwrap();
        }

        let page = provider
            .list_objects(
                "photos",
                ListObjectsOptions { delimiter: Some("/".to_string()), max_keys: 1000, ..Default::default() },
            )
            .await
            .unwrap();

        // All three keys collapse into one common prefix; the loop consumed every
        // `matching` entry, so this must not be reported as truncated.
        assert_eq!(page.common_prefixes, vec!["a/".to_string()]);
        assert!(!page.is_truncated);
        assert!(page.next_continuation_token.is_none());
    }

    #[tokio::test]
    async fn list_objects_resumes_from_continuation_token() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::new(dir.path());
        provider.create_bucket("photos").await.unwrap();
        for key in ["a.txt", "b.txt", "c.txt"] {
            provider.put_object("photos", key, body_of(b"x"), "text/plain", HashMap::new(), None).await.unwrap();
        }

        let first_page = provider
            .list_objects("photos", ListObjectsOptions { max_keys: 2, ..Default::default() })
            .await
            .unwrap();
        assert!(first_page.is_truncated);
        let token = first_page.next_continuation_token.unwrap();

        let second_page = provider
            .list_objects(
                "photos",
                ListObjectsOptions { max_keys: 2, continuation_token: Some(token), ..Default::default() },
            )
            .await
            .unwrap();
        assert_eq!(second_page.objects.len(), 1);
        assert_eq!(second_page.objects[0].key, "c.txt");
    }
}

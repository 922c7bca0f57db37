//! Request dispatcher mapping (method, bucket, key, query) to a [`StorageProvider`]
//! operation.
//!
//! Routing is collapsed into one entry point ([`route_request`]) rather than a
//! handler per route, because virtual-host addressing means the bucket is not always
//! a path segment axum's router can match on; `dispatch` canonicalizes first and then
//! switches on the resolved `(method, bucket, key)` tuple.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use bytes::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::stream::{self, StreamExt};
use s3gate_auth::sigv4::STREAMING_PAYLOAD;
use s3gate_auth::verify_chunk_signature;
use s3gate_common::Error;
use s3gate_common::checksum::quoted_etag;
use s3gate_provider::{ByteRange, ByteStream, DeleteOutcome, ListObjectsOptions, ObjectMetadata, StorageProvider};
use s3gate_xml::{
    Bucket as XmlBucket, Buckets, CommonPrefix, CopyObjectResult, DeleteError, DeleteObjectsRequest, DeleteResult, DeletedObject,
    ListAllMyBucketsResult, ListBucketResult, ObjectContent, Owner, timestamp_to_http_date, timestamp_to_iso, to_xml_body,
};
use sha2::{Digest, Sha256};

use crate::auth_layer::StreamingAuthContext;
use crate::canonical::canonicalize;
use crate::response::error_response;

pub struct AppState {
    pub provider: Arc<dyn StorageProvider>,
    pub base_host: Option<String>,
}

pub async fn health() -> &'static str {
    "OK"
}

struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error_response(&self.0)
    }
}

type ApiResult = Result<Response, ApiError>;

/// Single entry point for every S3 request. Canonicalizes bucket/key/query from the raw
/// path, `Host` header, and query string, then dispatches on `(method, bucket?, key?)`
/// per the table in §4.4.
pub async fn route_request(State(state): State<Arc<AppState>>, request: axum::http::Request<Body>) -> Response {
    let (parts, body) = request.into_parts();
    let streaming = parts.extensions.get::<StreamingAuthContext>().cloned();

    match dispatch(state, parts.method, parts.uri, parts.headers, body, streaming).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn dispatch(
    state: Arc<AppState>,
    method: Method,
    uri: axum::http::Uri,
    headers: HeaderMap,
    body: Body,
    streaming: Option<StreamingAuthContext>,
) -> ApiResult {
    let canonical = canonicalize(uri.path(), uri.query(), &headers, state.base_host.as_deref())?;

    match (method, canonical.bucket, canonical.key) {
        (Method::GET, None, None) => list_buckets(&state).await,
        (Method::PUT, Some(bucket), None) => create_bucket(&state, &bucket).await,
        (Method::DELETE, Some(bucket), None) => delete_bucket(&state, &bucket).await,
        (Method::HEAD, Some(bucket), None) => head_bucket(&state, &bucket).await,
        (Method::POST, Some(bucket), None) if canonical.query.contains_key("delete") => {
            delete_objects(&state, &bucket, body).await
        }
        (Method::GET, Some(bucket), None) => list_objects(&state, &bucket, &canonical.query).await,
        (Method::PUT, Some(bucket), Some(key)) if headers.contains_key("x-amz-copy-source") => {
            copy_object(&state, &bucket, &key, &headers).await
        }
        (Method::PUT, Some(bucket), Some(key)) => put_object(&state, &bucket, &key, &headers, body, streaming).await,
        (Method::GET, Some(bucket), Some(key)) => get_object(&state, &bucket, &key, &headers).await,
        (Method::HEAD, Some(bucket), Some(key)) => head_object(&state, &bucket, &key, &headers).await,
        (Method::DELETE, Some(bucket), Some(key)) => delete_object(&state, &bucket, &key).await,
        _ => Err(Error::invalid_argument("unsupported method/path combination").into()),
    }
}

fn xml_response(status: StatusCode, body: String) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/xml")
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn list_buckets(state: &AppState) -> ApiResult {
    let buckets = state.provider.list_buckets().await?;
    let result = ListAllMyBucketsResult {
        owner: Owner { id: "s3gate".to_string(), display_name: "s3gate".to_string() },
        buckets: Buckets {
            bucket: buckets
                .into_iter()
                .map(|b| XmlBucket { name: b.name, creation_date: timestamp_to_iso(b.created_at_millis / 1000) })
                .collect(),
        },
    };
    let xml = to_xml_body(&result).map_err(|_| Error::internal("failed to serialize ListAllMyBucketsResult"))?;
    Ok(xml_response(StatusCode::OK, xml))
}

async fn create_bucket(state: &AppState, bucket: &str) -> ApiResult {
    s3gate_common::BucketName::new(bucket).map_err(Error::InvalidBucketName)?;
    state.provider.create_bucket(bucket).await?;
    Ok(StatusCode::OK.into_response())
}

async fn delete_bucket(state: &AppState, bucket: &str) -> ApiResult {
    state.provider.delete_bucket(bucket).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn head_bucket(state: &AppState, bucket: &str) -> ApiResult {
    state.provider.head_bucket(bucket).await?;
    Ok(StatusCode::OK.into_response())
}

fn max_keys(query: &std::collections::BTreeMap<String, String>) -> u32 {
    query.get("max-keys").and_then(|v| v.parse::<u32>().ok()).filter(|&n| n > 0).unwrap_or(1000).min(1000)
}

async fn list_objects(state: &AppState, bucket: &str, query: &std::collections::BTreeMap<String, String>) -> ApiResult {
    let is_v2 = query.get("list-type").map(|v| v == "2").unwrap_or(false);
    let continuation_token = if is_v2 {
        query.get("continuation-token").cloned()
    } else {
        query.get("marker").cloned()
    };

    let options = ListObjectsOptions {
        prefix: query.get("prefix").cloned(),
        delimiter: query.get("delimiter").cloned(),
        continuation_token,
        max_keys: max_keys(query),
    };

    let page = state.provider.list_objects(bucket, options).await?;

    let result = ListBucketResult {
        name: bucket.to_string(),
        prefix: query.get("prefix").cloned().unwrap_or_default(),
        delimiter: query.get("delimiter").cloned(),
        max_keys: max_keys(query),
        key_count: is_v2.then(|| page.objects.len() as u32),
        is_truncated: page.is_truncated,
        continuation_token: if is_v2 { query.get("continuation-token").cloned() } else { None },
        next_continuation_token: page.next_continuation_token,
        common_prefixes: page.common_prefixes.into_iter().map(|prefix| CommonPrefix { prefix }).collect(),
        contents: page
            .objects
            .into_iter()
            .map(|o| ObjectContent {
                key: o.key,
                last_modified: timestamp_to_iso(o.last_modified_millis / 1000),
                etag: quoted_etag(&o.etag),
                size: o.size,
                storage_class: "STANDARD".to_string(),
            })
            .collect(),
    };

    let xml = to_xml_body(&result).map_err(|_| Error::internal("failed to serialize ListBucketResult"))?;
    Ok(xml_response(StatusCode::OK, xml))
}

async fn delete_objects(state: &AppState, bucket: &str, body: Body) -> ApiResult {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.map_err(|_| Error::invalid_argument("failed to read request body"))?;
    let request: DeleteObjectsRequest = quick_xml::de::from_str(std::str::from_utf8(&bytes).map_err(|_| Error::MalformedXml)?)
        .map_err(|_| Error::MalformedXml)?;

    if request.objects.len() > 1000 {
        return Err(Error::invalid_argument("DeleteObjects accepts at most 1000 keys").into());
    }

    let keys: Vec<String> = request.objects.iter().map(|o| o.key.clone()).collect();
    let outcomes = state.provider.delete_objects(bucket, &keys).await?;

    let mut deleted = Vec::new();
    let mut errors = Vec::new();
    for outcome in outcomes {
        match outcome {
            DeleteOutcome::Deleted { key } => deleted.push(DeletedObject { key }),
            DeleteOutcome::Error { key, code, message } => errors.push(DeleteError { key, code, message }),
        }
    }

    if request.quiet {
        deleted.clear();
    }

    let result = DeleteResult { deleted, errors };
    let xml = to_xml_body(&result).map_err(|_| Error::internal("failed to serialize DeleteResult"))?;
    Ok(xml_response(StatusCode::OK, xml))
}

fn extract_user_metadata(headers: &HeaderMap) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    for (name, value) in headers.iter() {
        let name_str = name.as_str().to_lowercase();
        if let Some(key) = name_str.strip_prefix("x-amz-meta-")
            && let Ok(value_str) = value.to_str()
        {
            metadata.insert(key.to_string(), value_str.to_string());
        }
    }
    metadata
}

fn add_metadata_headers(mut builder: axum::http::response::Builder, user_metadata: &HashMap<String, String>) -> axum::http::response::Builder {
    for (key, value) in user_metadata {
        builder = builder.header(format!("x-amz-meta-{key}"), value);
    }
    builder
}

fn content_md5_hex(headers: &HeaderMap) -> Result<Option<String>, Error> {
    let Some(header) = headers.get("content-md5") else { return Ok(None) };
    let header = header.to_str().map_err(|_| Error::invalid_argument("Content-MD5 header is not valid UTF-8"))?;
    let decoded = BASE64.decode(header).map_err(|_| Error::invalid_argument("Content-MD5 header is not valid base64"))?;
    Ok(Some(hex::encode(decoded)))
}

/// Converts an axum request body into a [`ByteStream`], decoding
/// `STREAMING-AWS4-HMAC-SHA256-PAYLOAD` chunk framing and verifying each chunk's rolling
/// signature when `streaming` carries a verified context (§4.2, §9).
///
/// Non-streaming bodies are passed through unchanged; `declared_sha256` (when present and
/// not `UNSIGNED-PAYLOAD`) is compared against the actual payload hash once the whole body
/// has been read, with the dispatcher discarding the write on mismatch.
async fn decode_body(body: Body, streaming: Option<StreamingAuthContext>) -> Result<Bytes, Error> {
    let raw = axum::body::to_bytes(body, 5 * 1024 * 1024 * 1024).await.map_err(|_| Error::invalid_argument("failed to read request body"))?;

    let Some(streaming) = streaming else { return Ok(raw) };

    let mut decoded = Vec::with_capacity(raw.len());
    let mut previous_signature = s3gate_auth::seed_signature(&streaming.verified).to_string();
    let mut remaining = &raw[..];

    loop {
        let header_end = find_crlf(remaining).ok_or_else(|| Error::invalid_argument("malformed chunk header"))?;
        let header_line = std::str::from_utf8(&remaining[..header_end]).map_err(|_| Error::invalid_argument("malformed chunk header"))?;
        let (size_str, signature) = header_line
            .split_once(";chunk-signature=")
            .ok_or_else(|| Error::invalid_argument("malformed chunk header"))?;
        let chunk_len = usize::from_str_radix(size_str.trim(), 16).map_err(|_| Error::invalid_argument("malformed chunk length"))?;

        let chunk_start = header_end + 2;
        let chunk_end = chunk_start + chunk_len;
        if remaining.len() < chunk_end + 2 {
            return Err(Error::invalid_argument("truncated chunk body"));
        }

        let chunk_data = &remaining[chunk_start..chunk_end];
        verify_chunk_signature(&streaming.verified, &streaming.amz_date, &previous_signature, chunk_data, signature)
            .map_err(|_| Error::SignatureDoesNotMatch)?;
        previous_signature = signature.to_string();

        if chunk_len == 0 {
            break;
        }

        decoded.extend_from_slice(chunk_data);
        remaining = &remaining[chunk_end + 2..];
    }

    Ok(Bytes::from(decoded))
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

fn bytes_to_stream(bytes: Bytes) -> ByteStream {
    stream::once(async move { Ok(bytes) }).boxed()
}

async fn put_object(
    state: &AppState,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
    body: Body,
    streaming: Option<StreamingAuthContext>,
) -> ApiResult {
    let content_type = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or("application/octet-stream").to_string();
    let user_metadata = extract_user_metadata(headers);
    let expected_md5 = content_md5_hex(headers)?;

    let declared_sha256 = headers.get("x-amz-content-sha256").and_then(|v| v.to_str().ok()).map(str::to_string);
    let payload = decode_body(body, streaming).await?;

    let needs_sha256_check = matches!(&declared_sha256, Some(h) if h != s3gate_auth::sigv4::UNSIGNED_PAYLOAD && h != STREAMING_PAYLOAD);
    if needs_sha256_check {
        let computed = hex::encode(Sha256::digest(&payload));
        if Some(computed) != declared_sha256 {
            return Err(Error::BadDigest.into());
        }
    }

    let object = state
        .provider
        .put_object(bucket, key, bytes_to_stream(payload), &content_type, user_metadata, expected_md5)
        .await?;

    Ok((
        StatusCode::OK,
        [(header::ETAG, quoted_etag(&object.metadata.etag))],
    )
        .into_response())
}

async fn copy_object(state: &AppState, dst_bucket: &str, dst_key: &str, headers: &HeaderMap) -> ApiResult {
    let source = headers
        .get("x-amz-copy-source")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::invalid_argument("missing x-amz-copy-source header"))?;
    let source = urlencoding::decode(source.trim_start_matches('/')).map_err(|_| Error::invalid_argument("invalid x-amz-copy-source"))?;
    let (src_bucket, src_key) = source.split_once('/').ok_or_else(|| Error::invalid_argument("x-amz-copy-source must be bucket/key"))?;

    let object = state.provider.copy_object(src_bucket, src_key, dst_bucket, dst_key).await?;

    let result = CopyObjectResult {
        etag: quoted_etag(&object.metadata.etag),
        last_modified: timestamp_to_iso(object.metadata.last_modified_millis / 1000),
    };
    let xml = to_xml_body(&result).map_err(|_| Error::internal("failed to serialize CopyObjectResult"))?;
    Ok(xml_response(StatusCode::OK, xml))
}

/// Evaluates `If-Match`/`If-None-Match` against the object's current ETag.
fn check_preconditions(headers: &HeaderMap, etag: &str) -> Result<(), Error> {
    let quoted = quoted_etag(etag);

    if let Some(if_match) = headers.get(header::IF_MATCH).and_then(|v| v.to_str().ok())
        && if_match != "*"
        && !if_match.split(',').any(|candidate| candidate.trim() == quoted)
    {
        return Err(Error::PreconditionFailed);
    }

    if let Some(if_none_match) = headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok())
        && (if_none_match == "*" || if_none_match.split(',').any(|candidate| candidate.trim() == quoted))
    {
        return Err(Error::NotModified);
    }

    Ok(())
}

fn metadata_headers(builder: axum::http::response::Builder, metadata: &ObjectMetadata) -> axum::http::response::Builder {
    let builder = builder
        .header(header::ETAG, quoted_etag(&metadata.etag))
        .header(header::CONTENT_TYPE, &metadata.content_type)
        .header(header::LAST_MODIFIED, timestamp_to_http_date(metadata.last_modified_millis / 1000));
    add_metadata_headers(builder, &metadata.user_metadata)
}

/// Outcome of parsing a `Range` header against an object's size. Kept distinct from a
/// malformed/absent header so `get_object` can tell "serve the full object" apart from
/// "the client asked for bytes this object doesn't have" (§7: the latter is a 416).
enum RangeOutcome {
    /// No `Range` header, or one this gateway doesn't understand — serve the full object.
    None,
    Satisfiable(ByteRange),
    Unsatisfiable,
}

fn parse_range_header(range_header: &str, total_size: u64) -> RangeOutcome {
    let range_header = range_header.trim();
    let Some(range_spec) = range_header.strip_prefix("bytes=") else {
        return RangeOutcome::None;
    };
    let Some((start_str, end_str)) = range_spec.split_once('-') else {
        return RangeOutcome::None;
    };
    let (start_str, end_str) = (start_str.trim(), end_str.trim());

    if start_str.is_empty() && end_str.is_empty() {
        return RangeOutcome::None;
    }

    if start_str.is_empty() {
        let Ok(suffix_len) = end_str.parse::<u64>() else { return RangeOutcome::None };
        if suffix_len == 0 {
            return RangeOutcome::Unsatisfiable;
        }
        let start = total_size.saturating_sub(suffix_len);
        return RangeOutcome::Satisfiable(ByteRange { start, end: Some(total_size.saturating_sub(1)) });
    }

    let Ok(start) = start_str.parse::<u64>() else { return RangeOutcome::None };
    if start >= total_size {
        return RangeOutcome::Unsatisfiable;
    }

    if end_str.is_empty() {
        return RangeOutcome::Satisfiable(ByteRange { start, end: Some(total_size - 1) });
    }

    let Ok(end) = end_str.parse::<u64>() else { return RangeOutcome::None };
    if start > end {
        return RangeOutcome::Unsatisfiable;
    }
    RangeOutcome::Satisfiable(ByteRange { start, end: Some(end.min(total_size - 1)) })
}

async fn get_object(state: &AppState, bucket: &str, key: &str, headers: &HeaderMap) -> ApiResult {
    let metadata = state.provider.head_object(bucket, key).await?;
    check_preconditions(headers, &metadata.etag)?;

    let range = match headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        Some(h) => match parse_range_header(h, metadata.size) {
            RangeOutcome::None => None,
            RangeOutcome::Satisfiable(range) => Some(range),
            RangeOutcome::Unsatisfiable => return Err(Error::InvalidRange.into()),
        },
        None => None,
    };

    let (metadata, body_stream) = state.provider.get_object(bucket, key, range).await?;

    let builder = Response::builder();
    let builder = metadata_headers(builder, &metadata);

    let response = match range {
        Some(r) => {
            let end = r.end.unwrap_or(metadata.size - 1);
            builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_RANGE, format!("bytes {}-{}/{}", r.start, end, metadata.size))
                .header(header::CONTENT_LENGTH, (end - r.start + 1).to_string())
                .body(Body::from_stream(body_stream))
        }
        None => builder.status(StatusCode::OK).header(header::CONTENT_LENGTH, metadata.size.to_string()).body(Body::from_stream(body_stream)),
    };

    response.map_err(|_| Error::internal("failed to build response").into())
}

async fn head_object(state: &AppState, bucket: &str, key: &str, headers: &HeaderMap) -> ApiResult {
    let metadata = state.provider.head_object(bucket, key).await?;
    check_preconditions(headers, &metadata.etag)?;

    let builder = Response::builder().status(StatusCode::OK).header(header::CONTENT_LENGTH, metadata.size.to_string());
    let builder = metadata_headers(builder, &metadata);
    builder.body(Body::empty()).map_err(|_| Error::internal("failed to build response").into())
}

async fn delete_object(state: &AppState, bucket: &str, key: &str) -> ApiResult {
    state.provider.delete_object(bucket, key).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn satisfiable(outcome: RangeOutcome) -> ByteRange {
        match outcome {
            RangeOutcome::Satisfiable(range) => range,
            _ => panic!("expected a satisfiable range"),
        }
    }

    #[test]
    fn parse_range_header_explicit_range() {
        let range = satisfiable(parse_range_header("bytes=0-99", 1000));
        assert_eq!(range.start, 0);
        assert_eq!(range.end, Some(99));
    }

    #[test]
    fn parse_range_header_open_ended() {
        let range = satisfiable(parse_range_header("bytes=100-", 1000));
        assert_eq!(range.start, 100);
        assert_eq!(range.end, Some(999));
    }

    #[test]
    fn parse_range_header_suffix() {
        let range = satisfiable(parse_range_header("bytes=-50", 1000));
        assert_eq!(range.start, 950);
        assert_eq!(range.end, Some(999));
    }

    #[test]
    fn parse_range_header_rejects_start_past_end() {
        assert!(matches!(parse_range_header("bytes=2000-", 1000), RangeOutcome::Unsatisfiable));
    }

    #[test]
    fn parse_range_header_zero_length_suffix_is_unsatisfiable() {
        assert!(matches!(parse_range_header("bytes=-0", 1000), RangeOutcome::Unsatisfiable));
    }

    #[test]
    fn parse_range_header_absent_bytes_prefix_is_none() {
        assert!(matches!(parse_range_header("items=0-5", 1000), RangeOutcome::None));
    }

    #[test]
    fn parse_range_header_clamps_end_to_total_size() {
        let range = satisfiable(parse_range_header("bytes=0-5000", 1000));
        assert_eq!(range.end, Some(999));
    }

    #[tokio::test]
    async fn get_object_returns_416_for_unsatisfiable_range() {
        let dir = tempfile::tempdir().unwrap();
        let provider: Arc<dyn StorageProvider> = Arc::new(s3gate_local::LocalProvider::new(dir.path()));
        provider.create_bucket("photos").await.unwrap();
        provider
            .put_object(
                "photos",
                "a.txt",
                stream::once(async { Ok(Bytes::from_static(b"hello")) }).boxed(),
                "text/plain",
                HashMap::new(),
                None,
            )
            .await
            .unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, "bytes=9999-".parse().unwrap());

        let state = AppState { provider, base_host: None };
        let response = get_object(&state, "photos", "a.txt", &headers).await;

        match response {
            Err(ApiError(err)) => assert_eq!(err.http_status_code(), 416),
            Ok(_) => panic!("expected a 416 InvalidRange error"),
        }
    }

    #[test]
    fn extract_user_metadata_strips_prefix_and_lowercases() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Amz-Meta-Author", "alice".parse().unwrap());
        headers.insert("Content-Type", "text/plain".parse().unwrap());
        let metadata = extract_user_metadata(&headers);
        assert_eq!(metadata.get("author"), Some(&"alice".to_string()));
        assert_eq!(metadata.len(), 1);
    }

    #[test]
    fn check_preconditions_if_none_match_star_yields_not_modified() {
        let mut headers = HeaderMap::new();
        headers.insert(header::IF_NONE_MATCH, "*".parse().unwrap());
        assert!(matches!(check_preconditions(&headers, "abc").unwrap_err(), Error::NotModified));
    }

    #[test]
    fn check_preconditions_if_match_mismatch_yields_precondition_failed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::IF_MATCH, "\"zzz\"".parse().unwrap());
        assert!(matches!(check_preconditions(&headers, "abc").unwrap_err(), Error::PreconditionFailed));
    }

    #[test]
    fn check_preconditions_matching_if_match_passes() {
        let mut headers = HeaderMap::new();
        headers.insert(header::IF_MATCH, "\"abc\"".parse().unwrap());
        assert!(check_preconditions(&headers, "abc").is_ok());
    }
}

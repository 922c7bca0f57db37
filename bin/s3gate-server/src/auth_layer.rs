//! Axum middleware verifying AWS Signature V2/V4, including presigned URLs, before a
//! request reaches the dispatcher.
//!
//! Skips health checks, parses the `Authorization` header, and rejects on mismatch;
//! all signing math is delegated to `s3gate-auth` rather than reimplemented inline.

use std::sync::Arc;
use std::time::SystemTime;

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use s3gate_auth::sigv4::{STREAMING_PAYLOAD, UNSIGNED_PAYLOAD};
use s3gate_auth::{AuthError, Credentials, SigV2Verifier, SigV4Verifier, VerifiedRequest, verify_presigned};

use crate::canonical::canonicalize;
use crate::response::error_response;

/// State for the auth middleware: credentials plus the gateway's own hostname, needed
/// to resolve virtual-host-addressed buckets before SigV2 verification.
pub struct AuthState {
    pub credentials: Credentials,
    pub base_host: Option<String>,
}

/// Per-request SigV4 streaming-chunk context, stashed in request extensions so the
/// `PutObject` handler can continue the rolling chunk-signature chain for
/// `STREAMING-AWS4-HMAC-SHA256-PAYLOAD` bodies (§4.2, §9).
#[derive(Clone)]
pub struct StreamingAuthContext {
    pub verified: Arc<VerifiedRequest>,
    pub amz_date: String,
}

pub async fn auth_layer(State(auth_state): State<Arc<AuthState>>, mut request: Request<Body>, next: Next) -> Response {
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    if let Err(err) = authenticate(&auth_state, &mut request) {
        return AuthRejection(err).into_response();
    }

    next.run(request).await
}

fn authenticate(auth_state: &AuthState, request: &mut Request<Body>) -> Result<(), AuthError> {
    let credentials = &auth_state.credentials;
    let query_params = parse_query_params(request.uri().query().unwrap_or(""));
    let has_presign_params = query_params.contains_key("X-Amz-Algorithm") || query_params.contains_key("AWSAccessKeyId");

    if has_presign_params {
        return verify_presigned(credentials, &*request, SystemTime::now());
    }

    let auth_header = request.headers().get(http::header::AUTHORIZATION).ok_or(AuthError::MissingAuthHeader)?;
    let auth_header = auth_header.to_str().map_err(|_| AuthError::InvalidAuthHeader)?;

    if auth_header.starts_with("AWS4-HMAC-SHA256") {
        let payload_hash = request
            .headers()
            .get("x-amz-content-sha256")
            .and_then(|v| v.to_str().ok())
            .unwrap_or(UNSIGNED_PAYLOAD)
            .to_string();

        let verified = SigV4Verifier::new(credentials).verify(&*request, &payload_hash)?;

        if payload_hash == STREAMING_PAYLOAD {
            let amz_date = request.headers().get("x-amz-date").and_then(|v| v.to_str().ok()).unwrap_or_default().to_string();
            request.extensions_mut().insert(StreamingAuthContext { verified: Arc::new(verified), amz_date });
        }

        Ok(())
    } else if auth_header.starts_with("AWS ") {
        // The V2 string-to-sign needs the bucket name even for virtual-host-addressed
        // requests, whose URI path never contains it (it lives in `Host` instead).
        let canonical = canonicalize(request.uri().path(), request.uri().query(), request.headers(), auth_state.base_host.as_deref())
            .map_err(|_| AuthError::InvalidAuthHeader)?;
        SigV2Verifier::new(credentials).verify(&*request, canonical.bucket.as_deref())
    } else {
        Err(AuthError::InvalidAuthHeader)
    }
}

fn parse_query_params(query: &str) -> std::collections::HashMap<String, String> {
    let mut map = std::collections::HashMap::new();
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().unwrap_or("").to_string();
        let value = parts.next().unwrap_or("").to_string();
        map.insert(key, value);
    }
    map
}

struct AuthRejection(AuthError);

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        error_response(&self.0.into())
    }
}

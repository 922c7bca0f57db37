//! Shared error-to-HTTP-response rendering.
//!
//! Every handler and the auth layer funnel failures through [`error_response`] so the
//! `<Error>` XML document is built in exactly one place.

use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::Response;
use s3gate_common::Error;
use s3gate_xml::{S3Error, to_xml_body};
use uuid::Uuid;

pub fn error_response(err: &Error) -> Response {
    let status = StatusCode::from_u16(err.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if status == StatusCode::NOT_MODIFIED {
        return Response::builder().status(status).body(Body::empty()).unwrap_or_else(|_| fallback_error());
    }

    let document = S3Error {
        code: err.s3_error_code().to_string(),
        message: err.to_string(),
        resource: None,
        request_id: Uuid::new_v4().to_string(),
    };

    let xml = match to_xml_body(&document) {
        Ok(xml) => xml,
        Err(_) => return fallback_error(),
    };

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/xml")
        .body(Body::from(xml))
        .unwrap_or_else(|_| fallback_error())
}

fn fallback_error() -> Response {
    Response::builder().status(StatusCode::INTERNAL_SERVER_ERROR).body(Body::empty()).unwrap()
}

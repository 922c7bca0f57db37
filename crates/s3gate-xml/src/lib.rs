//! XML request/response bodies for the S3 REST surface (§4.4).

pub mod request;
pub mod response;
pub mod time;

pub use request::{DeleteObjectIdentifier, DeleteObjectsRequest};
pub use response::{
    Bucket, Buckets, CommonPrefix, CopyObjectResult, DeleteError, DeleteResult, DeletedObject,
    ListAllMyBucketsResult, ListBucketResult, ObjectContent, Owner, S3Error, to_xml_body,
};
pub use time::{timestamp_to_http_date, timestamp_to_iso};

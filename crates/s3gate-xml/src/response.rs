//! Response XML bodies for the S3 REST surface (§4.4).

use serde::Serialize;

#[derive(Serialize)]
#[serde(rename = "ListAllMyBucketsResult")]
pub struct ListAllMyBucketsResult {
    #[serde(rename = "Owner")]
    pub owner: Owner,
    #[serde(rename = "Buckets")]
    pub buckets: Buckets,
}

#[derive(Serialize)]
pub struct Owner {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "DisplayName")]
    pub display_name: String,
}

#[derive(Serialize)]
pub struct Buckets {
    #[serde(rename = "Bucket")]
    pub bucket: Vec<Bucket>,
}

#[derive(Serialize)]
pub struct Bucket {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "CreationDate")]
    pub creation_date: String,
}

#[derive(Serialize)]
#[serde(rename = "ListBucketResult")]
pub struct ListBucketResult {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Prefix")]
    pub prefix: String,
    #[serde(rename = "Delimiter", skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
    #[serde(rename = "MaxKeys")]
    pub max_keys: u32,
    #[serde(rename = "KeyCount", skip_serializing_if = "Option::is_none")]
    pub key_count: Option<u32>,
    #[serde(rename = "IsTruncated")]
    pub is_truncated: bool,
    #[serde(rename = "ContinuationToken", skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<String>,
    #[serde(rename = "NextContinuationToken", skip_serializing_if = "Option::is_none")]
    pub next_continuation_token: Option<String>,
    #[serde(rename = "CommonPrefixes", skip_serializing_if = "Vec::is_empty")]
    pub common_prefixes: Vec<CommonPrefix>,
    #[serde(rename = "Contents", skip_serializing_if = "Vec::is_empty")]
    pub contents: Vec<ObjectContent>,
}

#[derive(Serialize)]
pub struct CommonPrefix {
    #[serde(rename = "Prefix")]
    pub prefix: String,
}

#[derive(Serialize)]
pub struct ObjectContent {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "LastModified")]
    pub last_modified: String,
    #[serde(rename = "ETag")]
    pub etag: String,
    #[serde(rename = "Size")]
    pub size: u64,
    #[serde(rename = "StorageClass")]
    pub storage_class: String,
}

#[derive(Serialize)]
#[serde(rename = "CopyObjectResult")]
pub struct CopyObjectResult {
    #[serde(rename = "ETag")]
    pub etag: String,
    #[serde(rename = "LastModified")]
    pub last_modified: String,
}

#[derive(Serialize)]
#[serde(rename = "DeleteResult")]
pub struct DeleteResult {
    #[serde(rename = "Deleted", skip_serializing_if = "Vec::is_empty")]
    pub deleted: Vec<DeletedObject>,
    #[serde(rename = "Error", skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<DeleteError>,
}

#[derive(Serialize)]
pub struct DeletedObject {
    #[serde(rename = "Key")]
    pub key: String,
}

#[derive(Serialize)]
pub struct DeleteError {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Code")]
    pub code: String,
    #[serde(rename = "Message")]
    pub message: String,
}

#[derive(Serialize)]
#[serde(rename = "Error")]
pub struct S3Error {
    #[serde(rename = "Code")]
    pub code: String,
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "Resource", skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(rename = "RequestId")]
    pub request_id: String,
}

/// Serializes `value` with the standard XML prolog, matching what S3 clients expect on
/// every response body (the prolog is not emitted by `quick_xml::se::to_string` itself).
pub fn to_xml_body<T: Serialize>(value: &T) -> Result<String, quick_xml::SeError> {
    let body = quick_xml::se::to_string(value)?;
    Ok(format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{body}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_buckets_result_serializes_expected_shape() {
        let result = ListAllMyBucketsResult {
            owner: Owner {
                id: "s3gate".to_string(),
                display_name: "s3gate".to_string(),
            },
            buckets: Buckets {
                bucket: vec![Bucket {
                    name: "photos".to_string(),
                    creation_date: "2024-01-01T00:00:00.000Z".to_string(),
                }],
            },
        };

        let xml = to_xml_body(&result).unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n"));
        assert!(xml.contains("<Name>photos</Name>"));
        assert!(xml.contains("<ID>s3gate</ID>"));
    }

    #[test]
    fn list_bucket_result_omits_empty_optional_fields() {
        let result = ListBucketResult {
            name: "photos".to_string(),
            prefix: String::new(),
            delimiter: None,
            max_keys: 1000,
            key_count: None,
            is_truncated: false,
            continuation_token: None,
            next_continuation_token: None,
            common_prefixes: Vec::new(),
            contents: Vec::new(),
        };

        let xml = to_xml_body(&result).unwrap();
        assert!(!xml.contains("Delimiter"));
        assert!(!xml.contains("NextContinuationToken"));
        assert!(!xml.contains("CommonPrefixes"));
    }

    #[test]
    fn s3_error_serializes_with_code_and_message() {
        let error = S3Error {
            code: "NoSuchBucket".to_string(),
            message: "The specified bucket does not exist".to_string(),
            resource: Some("/missing-bucket".to_string()),
            request_id: "req-1".to_string(),
        };

        let xml = to_xml_body(&error).unwrap();
        assert!(xml.contains("<Code>NoSuchBucket</Code>"));
        assert!(xml.contains("<Resource>/missing-bucket</Resource>"));
    }
}

//! Request XML bodies parsed from client uploads (§4.4).

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename = "Delete")]
pub struct DeleteObjectsRequest {
    #[serde(rename = "Quiet", default)]
    pub quiet: bool,
    #[serde(rename = "Object", default)]
    pub objects: Vec<DeleteObjectIdentifier>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteObjectIdentifier {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "VersionId", default)]
    pub version_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_delete_objects_body() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<Delete>
  <Quiet>true</Quiet>
  <Object><Key>a.txt</Key></Object>
  <Object><Key>b.txt</Key><VersionId>v1</VersionId></Object>
</Delete>"#;

        let parsed: DeleteObjectsRequest = quick_xml::de::from_str(xml).unwrap();
        assert!(parsed.quiet);
        assert_eq!(parsed.objects.len(), 2);
        assert_eq!(parsed.objects[0].key, "a.txt");
        assert_eq!(parsed.objects[1].version_id.as_deref(), Some("v1"));
    }

    #[test]
    fn defaults_quiet_to_false_when_absent() {
        let xml = r#"<Delete><Object><Key>a.txt</Key></Object></Delete>"#;
        let parsed: DeleteObjectsRequest = quick_xml::de::from_str(xml).unwrap();
        assert!(!parsed.quiet);
    }

    #[test]
    fn rejects_more_than_limit_is_caller_responsibility() {
        // The 1000-entry cap (§4.4) is enforced by the dispatcher, not the parser --
        // the parser accepts any number of `Object` entries.
        let xml = "<Delete></Delete>";
        let parsed: DeleteObjectsRequest = quick_xml::de::from_str(xml).unwrap();
        assert!(parsed.objects.is_empty());
    }
}

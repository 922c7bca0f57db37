//! MD5 helpers.
//!
//! ETag = quoted lowercase hex MD5 of the payload (§3). This wraps the real
//! `md5` crate behind an incremental interface so callers can tee writes
//! through it (§9 "streaming MD5 alongside writes") instead of buffering the
//! whole body before hashing.

/// Incremental MD5 hasher fed chunk-by-chunk as bytes are written elsewhere.
pub struct Md5Hasher(md5::Context);

impl std::fmt::Debug for Md5Hasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Md5Hasher").finish_non_exhaustive()
    }
}

impl Default for Md5Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Md5Hasher {
    pub fn new() -> Self {
        Self(md5::Context::new())
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.0.consume(chunk);
    }

    /// Finalize and return the lowercase hex digest (unquoted).
    pub fn finalize_hex(self) -> String {
        format_md5_hex(&self.0.compute().0)
    }
}

pub fn format_md5_hex(digest: &[u8; 16]) -> String {
    hex::encode(digest)
}

/// MD5 of a single in-memory buffer, as a lowercase hex string.
pub fn md5_hex(data: &[u8]) -> String {
    format_md5_hex(&md5::compute(data).0)
}

/// Wrap a hex MD5 string in the double quotes S3 puts on the wire (§3).
pub fn quoted_etag(md5_hex: &str) -> String {
    format!("\"{md5_hex}\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_of_known_input() {
        assert_eq!(md5_hex(b"Hi"), "c1a5298f939e87e8f962a5edfc206918");
    }

    #[test]
    fn incremental_matches_one_shot() {
        let mut hasher = Md5Hasher::new();
        hasher.update(b"Hi, ");
        hasher.update(b"there");
        assert_eq!(hasher.finalize_hex(), md5_hex(b"Hi, there"));
    }

    #[test]
    fn quoted_etag_wraps_in_quotes() {
        assert_eq!(quoted_etag("abc"), "\"abc\"");
    }
}

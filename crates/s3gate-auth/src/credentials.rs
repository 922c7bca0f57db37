//! Single-tenant storage credential (§3, §9 "Global credential state").
//!
//! The server is single-tenant: one access-key/secret-key pair and one region,
//! fixed at construction time and handed by value into the signer and
//! dispatcher. There is no user store, no per-request credential lookup.

use s3gate_common::config::CredentialsConfig;

#[derive(Clone, Debug)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
}

impl From<CredentialsConfig> for Credentials {
    fn from(config: CredentialsConfig) -> Self {
        Self {
            access_key_id: config.access_key_id,
            secret_access_key: config.secret_access_key,
            region: config.region,
        }
    }
}

impl Credentials {
    pub fn matches_access_key(&self, access_key_id: &str) -> bool {
        self.access_key_id == access_key_id
    }
}

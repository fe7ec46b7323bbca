use std::time::SystemTime;

use serde::Deserialize;
use tls_policy::CipherProfile;

use crate::pattern::UrlPattern;

// ---- service request schema ----

fn default_true() -> bool {
    true
}

fn default_open_limit() -> u64 {
    1
}

fn default_ttl() -> u64 {
    60
}

/// Parameters of a `create_proxied_url` call.
#[derive(Debug, Clone, Deserialize)]
pub struct GrantRequest {
    pub url_pattern: String,
    #[serde(default)]
    pub url_id: Option<String>,
    #[serde(default = "default_true")]
    pub ssl_verification: bool,
    #[serde(default)]
    pub ssl_ciphers: CipherProfile,
    /// Number of admitted requests before the grant is removed.  Zero
    /// means unlimited.
    #[serde(default = "default_open_limit")]
    pub open_limit: u64,
    /// Lifetime in seconds.  Zero means the grant never expires.
    #[serde(default = "default_ttl")]
    pub ttl: u64,
    #[serde(default)]
    pub allow_unauthenticated: bool,
}

// ---- registry state ----

/// A live dynamic grant held by the registry.
#[derive(Debug)]
pub struct Grant {
    pub id: String,
    pub pattern: UrlPattern,
    pub verify_tls: bool,
    pub cipher_profile: CipherProfile,
    pub remaining_uses: u64,
    pub expires_at: Option<SystemTime>,
    pub allow_unauthenticated: bool,
}

/// Snapshot of the grant fields that drive relay behavior, taken at the
/// moment the grant was matched and consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrantMatch {
    pub verify_tls: bool,
    pub cipher_profile: CipherProfile,
    pub allow_unauthenticated: bool,
}

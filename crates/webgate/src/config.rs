use serde::Deserialize;
use std::path::Path;
use tls_policy::CipherProfile;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_listen")]
    pub listen_addr: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Path prefix all proxy routes hang off.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Whether dynamically registered URLs participate in admission.
    #[serde(default = "default_true")]
    pub dynamic_urls: bool,
    /// TLS verification for statically allowed targets.
    #[serde(default = "default_true")]
    pub ssl_verification: bool,
    /// Cipher profile for statically allowed targets.
    #[serde(default)]
    pub ssl_ciphers: CipherProfile,
    /// Statically allowed URL patterns.
    #[serde(default)]
    pub url_patterns: Vec<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            dynamic_urls: default_true(),
            ssl_verification: default_true(),
            ssl_ciphers: CipherProfile::default(),
            url_patterns: Vec::new(),
        }
    }
}

/// Stand-in for the host's authentication layer: a request counts as
/// authenticated when it presents this bearer token. With no token
/// configured, every caller counts as authenticated.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default-value functions used by serde
// ---------------------------------------------------------------------------

fn default_listen() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_prefix() -> String {
    "/api/proxy".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load configuration from a YAML file.
///
/// A missing file yields the default configuration, so webgate can start
/// before any config has been written. The caller decides whether that is
/// worth a log line; this runs before the subscriber is installed.
pub fn load(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

    let config: Config = serde_yml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;

    Ok(config)
}

use std::sync::Arc;
use std::time::SystemTime;

use thiserror::Error;
use tls_policy::{CipherProfile, ClientTlsConfig, TlsPolicyResolver};
use tracing::debug;
use url::Url;

use crate::pattern::{PatternError, UrlPattern};
use crate::registry::GrantRegistry;

/// Why a target URL was refused admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DenyReason {
    #[error("missing or unparseable target URL")]
    BadRequest,
    #[error("target URL matches no proxied URL")]
    NotFound,
    #[error("authentication required")]
    Unauthorized,
    #[error("target URL not permitted")]
    Forbidden,
}

/// A granted admission: the parsed target plus the TLS client
/// configuration to reach it with.
#[derive(Debug, Clone)]
pub struct Decision {
    pub url: Url,
    pub tls: ClientTlsConfig,
    /// True when the matched grant waives caller authentication.
    pub bypass_auth: bool,
}

/// Static configuration of the authorizer.
#[derive(Debug, Clone, Default)]
pub struct AuthorizerOptions {
    /// Whether dynamically registered grants participate in admission.
    pub dynamic_urls: bool,
    /// TLS verification applied to statically allowed targets.
    pub ssl_verification: bool,
    /// Cipher profile applied to statically allowed targets.
    pub ssl_ciphers: CipherProfile,
    /// Statically allowed URL patterns.
    pub url_patterns: Vec<String>,
}

/// Two-tier URL admission: dynamic grants first, then the static
/// pattern list from configuration.
pub struct UrlAuthorizer {
    registry: Arc<GrantRegistry>,
    tls: Arc<TlsPolicyResolver>,
    dynamic_urls: bool,
    static_verify: bool,
    static_ciphers: CipherProfile,
    static_patterns: Vec<UrlPattern>,
}

impl UrlAuthorizer {
    pub fn new(
        registry: Arc<GrantRegistry>,
        tls: Arc<TlsPolicyResolver>,
        options: AuthorizerOptions,
    ) -> Result<Self, PatternError> {
        let static_patterns = options
            .url_patterns
            .iter()
            .map(|p| UrlPattern::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            registry,
            tls,
            dynamic_urls: options.dynamic_urls,
            static_verify: options.ssl_verification,
            static_ciphers: options.ssl_ciphers,
            static_patterns,
        })
    }

    pub fn registry(&self) -> &Arc<GrantRegistry> {
        &self.registry
    }

    pub fn dynamic_urls_enabled(&self) -> bool {
        self.dynamic_urls
    }

    /// Admit or refuse a target URL.
    ///
    /// Dynamic grants are checked first and a matching grant is consumed
    /// even when the caller then turns out to be unauthenticated.  The
    /// static tier always requires an authenticated caller.
    pub fn authorize(
        &self,
        target: Option<&str>,
        caller_authenticated: bool,
        now: SystemTime,
    ) -> Result<Decision, DenyReason> {
        let target = target.ok_or(DenyReason::BadRequest)?;
        let url = Url::parse(target).map_err(|_| DenyReason::BadRequest)?;
        if url.host_str().is_none() {
            return Err(DenyReason::BadRequest);
        }

        if self.dynamic_urls {
            if let Some(grant) = self.registry.find_and_consume(&url, now) {
                if !caller_authenticated && !grant.allow_unauthenticated {
                    debug!(%url, "unauthenticated caller refused for dynamic grant");
                    return Err(DenyReason::Unauthorized);
                }
                return Ok(Decision {
                    url,
                    tls: self.tls.resolve(grant.verify_tls, grant.cipher_profile),
                    bypass_auth: grant.allow_unauthenticated,
                });
            }
        }

        if self.static_patterns.iter().any(|p| p.matches(&url)) {
            if !caller_authenticated {
                debug!(%url, "unauthenticated caller refused for static pattern");
                return Err(DenyReason::Unauthorized);
            }
            return Ok(Decision {
                url,
                tls: self.tls.resolve(self.static_verify, self.static_ciphers),
                bypass_auth: false,
            });
        }

        debug!(%url, "target matches no proxied URL");
        Err(DenyReason::NotFound)
    }
}

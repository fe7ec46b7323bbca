//! # url-authz
//!
//! Admission control for the webgate proxy.  Decides, per inbound request,
//! whether a caller-supplied target URL may be proxied and under which TLS
//! trust policy, consulting two tiers:
//!
//! 1. **Dynamic grants** -- volatile, time- and/or use-limited authorizations
//!    installed at runtime through the host's service layer and owned by the
//!    [`GrantRegistry`].
//! 2. **Static rules** -- configuration-time URL patterns with the ambient
//!    TLS settings, unlimited and non-expiring.
//!
//! The dynamic tier is always consulted first when enabled.  Matching uses
//! glob-style `*` wildcards across scheme, host, port, path, and query, with
//! the path segment optional in a pattern.
//!
//! Grants live only in memory; nothing survives a restart.

mod authorizer;
mod grant;
mod pattern;
mod registry;

pub use authorizer::{AuthorizerOptions, Decision, DenyReason, UrlAuthorizer};
pub use grant::{Grant, GrantMatch, GrantRequest};
pub use pattern::{PatternError, UrlPattern};
pub use registry::{GrantError, GrantRegistry};

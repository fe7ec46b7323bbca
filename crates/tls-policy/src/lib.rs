//! # tls-policy
//!
//! Client TLS trust policies for upstream proxy connections.  Each proxied
//! request carries two TLS knobs: whether to verify the upstream certificate
//! chain and hostname at all, and which named cipher profile to use.  This
//! crate maps the `(verify, profile)` pair to a ready-to-use
//! [`rustls::ClientConfig`].
//!
//! The profile set is closed: `default`, `modern`, `intermediate`, and
//! `insecure`.  Unknown profile names fall back to `default` rather than
//! erroring, so a stale caller can never take down a proxy rule.
//!
//! All eight `(verify, profile)` combinations are built once by
//! [`TlsPolicyResolver::new`] and handed out as cheap `Arc` clones.

mod profile;
mod resolver;

pub use profile::CipherProfile;
pub use resolver::{TlsPolicyError, TlsPolicyResolver};

use std::sync::Arc;

/// A resolved client TLS configuration, shared between the HTTP and
/// WebSocket relay paths.
pub type ClientTlsConfig = Arc<rustls::ClientConfig>;

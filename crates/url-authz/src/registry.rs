use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::grant::{Grant, GrantMatch, GrantRequest};
use crate::pattern::{PatternError, UrlPattern};

#[derive(Debug, Error)]
pub enum GrantError {
    #[error("proxied URL id '{url_id}' not found")]
    NotFound { url_id: String },
    #[error(transparent)]
    InvalidPattern(#[from] PatternError),
}

/// Registry of dynamic URL grants.
///
/// Grants expire lazily: every lookup first sweeps entries whose deadline
/// has passed, so an expired grant is indistinguishable from one that was
/// never created.
#[derive(Debug, Default)]
pub struct GrantRegistry {
    grants: Mutex<HashMap<String, Grant>>,
}

impl GrantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Grant>> {
        self.grants
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Register a grant and return its id.  An explicit `url_id` replaces
    /// any existing grant with the same id.
    pub fn create(&self, request: GrantRequest, now: SystemTime) -> Result<String, GrantError> {
        let pattern = UrlPattern::new(&request.url_pattern)?;
        let id = request
            .url_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        // A ttl too large to represent as a deadline means no expiry, same
        // as ttl zero.
        let expires_at = (request.ttl > 0)
            .then(|| Duration::from_secs(request.ttl))
            .and_then(|ttl| now.checked_add(ttl));

        let grant = Grant {
            id: id.clone(),
            pattern,
            verify_tls: request.ssl_verification,
            cipher_profile: request.ssl_ciphers,
            remaining_uses: request.open_limit,
            expires_at,
            allow_unauthenticated: request.allow_unauthenticated,
        };

        debug!(
            url_id = %id,
            pattern = %request.url_pattern,
            open_limit = request.open_limit,
            ttl = request.ttl,
            "registered proxied URL"
        );
        self.lock().insert(id.clone(), grant);
        Ok(id)
    }

    /// Remove a grant by id.  Expired grants are swept first, so deleting
    /// an already-expired id reports not-found.
    pub fn delete(&self, url_id: &str, now: SystemTime) -> Result<(), GrantError> {
        let mut grants = self.lock();
        sweep(&mut grants, now);
        grants
            .remove(url_id)
            .map(|_| {
                debug!(url_id = %url_id, "removed proxied URL");
            })
            .ok_or_else(|| GrantError::NotFound {
                url_id: url_id.to_string(),
            })
    }

    /// Find the first live grant matching `url` and consume one use from
    /// it.  A grant whose last use this was is removed; the snapshot of
    /// its fields is still returned.
    pub fn find_and_consume(&self, url: &Url, now: SystemTime) -> Option<GrantMatch> {
        let mut grants = self.lock();
        sweep(&mut grants, now);

        let id = grants
            .values()
            .find(|g| g.pattern.matches(url))
            .map(|g| g.id.clone())?;

        let grant = grants.get_mut(&id)?;
        let snapshot = GrantMatch {
            verify_tls: grant.verify_tls,
            cipher_profile: grant.cipher_profile,
            allow_unauthenticated: grant.allow_unauthenticated,
        };

        // open_limit of zero means unlimited admissions.
        if grant.remaining_uses > 0 {
            grant.remaining_uses -= 1;
            if grant.remaining_uses == 0 {
                debug!(url_id = %id, "proxied URL exhausted");
                grants.remove(&id);
            }
        }

        Some(snapshot)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

fn sweep(grants: &mut HashMap<String, Grant>, now: SystemTime) {
    grants.retain(|_, g| g.expires_at.map_or(true, |deadline| deadline > now));
}

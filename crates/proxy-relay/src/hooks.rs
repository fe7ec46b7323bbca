use http::header::HeaderMap;
use http::Uri;
use url::Url;
use url_authz::DenyReason;

use crate::RequestContext;

/// Query parameter carrying the encoded target URL.
pub const TARGET_PARAM: &str = "url";

/// Query parameter carrying the caller's signed-path token. It is consumed
/// by the host before the request reaches us and must never leak upstream.
pub const AUTH_SIG_PARAM: &str = "authSig";

/// Host-overridable points in the relay flow.
///
/// The defaults implement the query-parameter convention: the target comes
/// from `?url=` and every admitted target is permitted.
pub trait RelayHooks: Send + Sync {
    /// Resolve the target URL for an inbound request.
    fn target(&self, uri: &Uri, _headers: &HeaderMap) -> Option<String> {
        target_from_query(uri)
    }

    /// Final veto over an already-admitted target. An `Err` maps to the
    /// corresponding HTTP status, `Forbidden` being the usual choice.
    fn permit(&self, _url: &Url, _ctx: &RequestContext) -> Result<(), DenyReason> {
        Ok(())
    }
}

/// The stock hook set.
pub struct DefaultHooks;

impl RelayHooks for DefaultHooks {}

/// Extract the decoded `url` query parameter.
pub fn target_from_query(uri: &Uri) -> Option<String> {
    let query = uri.query()?;
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == TARGET_PARAM)
        .map(|(_, value)| value.into_owned())
}

/// Re-encode the inbound query for the upstream request, with the
/// proxy-control parameters removed. `None` when nothing is left.
pub fn upstream_query(uri: &Uri) -> Option<String> {
    let query = uri.query()?;
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    let mut kept = false;
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        if key == TARGET_PARAM || key == AUTH_SIG_PARAM {
            continue;
        }
        serializer.append_pair(&key, &value);
        kept = true;
    }
    kept.then(|| serializer.finish())
}

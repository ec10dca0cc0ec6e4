// Header policy applied between the caller and the upstreams. The gateway owns
// `Host`, `Authorization` and `x-user-sub` on the way out; everything else is
// passed through apart from hop-by-hop headers.

use http::header::{AUTHORIZATION, CONTENT_LENGTH, HOST, HeaderMap, HeaderName, HeaderValue};
use http::{Method, Version};
use shared::http::{add_via_header, filter_hop_by_hop};

use crate::config::RouteAction;
use crate::session::Credential;

pub static X_USER_SUB: HeaderName = HeaderName::from_static("x-user-sub");

/// Builds the headers sent upstream from the inbound ones.
pub fn outbound_headers(
    mut headers: HeaderMap,
    version: Version,
    credential: Option<&Credential>,
    action: RouteAction,
) -> HeaderMap {
    filter_hop_by_hop(&mut headers, version);
    // Regenerated by the HTTP client for the target origin and buffered body
    headers.remove(HOST);
    headers.remove(CONTENT_LENGTH);

    match credential
        .and_then(Credential::bearer_token)
        .and_then(|token| HeaderValue::from_str(&format!("Bearer {token}")).ok())
    {
        Some(value) => {
            headers.insert(AUTHORIZATION, value);
        }
        None => {
            headers.remove(AUTHORIZATION);
        }
    }

    headers.remove(&X_USER_SUB);
    if action == RouteAction::Authenticated
        && let Some(subject) = credential
            .and_then(Credential::subject)
            .and_then(|s| HeaderValue::from_str(s).ok())
    {
        headers.insert(X_USER_SUB.clone(), subject);
    }

    add_via_header(&mut headers, version);
    headers
}

/// Normalizes upstream response headers before they go back to the caller.
///
/// `method` is the method of the request the response answers. A HEAD
/// response has no body to derive a length from, so its `Content-Length` is
/// passed through as the upstream sent it.
pub fn inbound_response_headers(headers: &mut HeaderMap, version: Version, method: &Method) {
    filter_hop_by_hop(headers, version);
    if method != Method::HEAD {
        // The body is buffered; the server derives the length from it
        headers.remove(CONTENT_LENGTH);
    }
}

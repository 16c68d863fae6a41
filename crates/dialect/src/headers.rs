//! Outbound header construction
//!
//! Builds the header set for an upstream call from the resolved credential
//! value and a selected subset of client headers. Client identity headers
//! are forwarded so upstream session attribution keeps working; everything
//! else from the inbound request is dropped.

use http::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use tracing::warn;

use crate::BackendFamily;

/// Client headers forwarded to the backend verbatim.
pub const FORWARDED_HEADERS: [&str; 3] = ["x-session-id", "x-assistant-message-id", "user-agent"];

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Build the outbound header map for one upstream request.
///
/// `auth_value` is the full header value (`Bearer <secret>` or a verbatim
/// client header).
pub fn backend_headers(
    family: BackendFamily,
    auth_value: &str,
    client_headers: &HeaderMap,
    streaming: bool,
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    match HeaderValue::from_str(auth_value) {
        Ok(value) => {
            headers.insert(AUTHORIZATION, value);
        }
        Err(_) => {
            warn!("authorization value contains invalid header characters, omitting");
        }
    }

    if family == BackendFamily::Anthropic {
        headers.insert(
            HeaderName::from_static("anthropic-version"),
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        let accept = if streaming {
            "text/event-stream"
        } else {
            "application/json"
        };
        headers.insert(ACCEPT, HeaderValue::from_static(accept));
    }

    for name in FORWARDED_HEADERS {
        let name = HeaderName::from_static(name);
        if let Some(value) = client_headers.get(&name) {
            headers.insert(name, value.clone());
        }
    }
    headers
}

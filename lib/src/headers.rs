use hyper::{header, HeaderMap};

pub fn filter_outgoing_headers(headers: &mut HeaderMap) {
    // Remove framing-related headers; we rely on the transport to insert the
    // appropriate framing headers automatically, and do not allow scripts to
    // include them.
    headers.remove(header::CONTENT_LENGTH);
    headers.remove(header::TRANSFER_ENCODING);
}

/// Apply the engine's default `User-Agent` unless the caller set one.
pub fn apply_user_agent(headers: &mut HeaderMap, user_agent: &str) {
    if !headers.contains_key(header::USER_AGENT) {
        if let Ok(value) = header::HeaderValue::from_str(user_agent) {
            headers.insert(header::USER_AGENT, value);
        }
    }
}

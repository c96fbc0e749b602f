use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use std::net::SocketAddr;

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Append the direct peer to `X-Forwarded-For`, creating the header if missing
pub fn add_forwarded_for(headers: &mut HeaderMap, peer: SocketAddr) {
    let client_ip = peer.ip().to_string();
    let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{existing}, {client_ip}"),
        None => client_ip,
    };
    if let Ok(header_value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, header_value);
    }
}

//! Caller identities.
//!
//! General traffic is keyed by network address, quotas by the authenticated
//! user id that the upstream auth layer places in a header. An identity is
//! never empty; a request without one is a client error, not an anonymous allow.

use http::HeaderMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;

use crate::config::IdentityConfig;

/// Non-empty key scoping every counter of one caller
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    /// Returns `None` for empty or whitespace-only input
    pub fn new(raw: impl AsRef<str>) -> Option<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A request whose caller cannot be identified
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityError {
    #[error("could not determine the caller's {0}")]
    Missing(&'static str),
}

impl IdentityError {
    pub const NETWORK: Self = Self::Missing("network address");
    pub const USER: Self = Self::Missing("authenticated user");
}

/// Derives identities from request metadata
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    config: IdentityConfig,
    user_header: http::HeaderName,
}

impl IdentityResolver {
    /// Fails if `user_header` is not a valid header name
    pub fn new(config: IdentityConfig) -> Result<Self, String> {
        let user_header = http::HeaderName::from_bytes(config.user_header.as_bytes())
            .map_err(|e| format!("invalid identity.user_header '{}': {e}", config.user_header))?;
        Ok(Self { config, user_header })
    }

    /// Network identity for general traffic
    ///
    /// Uses the first `X-Forwarded-For` hop only when the direct peer is a
    /// trusted proxy, otherwise the peer address itself.
    pub fn network(&self, peer: Option<SocketAddr>, headers: &HeaderMap) -> Option<Identity> {
        let peer_ip = peer.map(|p| p.ip());

        if self.config.trust_forwarded_for && self.is_trusted(peer_ip) {
            if let Some(ip) = first_forwarded_for(headers) {
                return Some(Identity(ip.to_string()));
            }
        }

        peer_ip.map(|ip| Identity(ip.to_string()))
    }

    /// Authenticated user identity for quotas
    pub fn user(&self, headers: &HeaderMap) -> Option<Identity> {
        headers
            .get(&self.user_header)
            .and_then(|v| v.to_str().ok())
            .and_then(Identity::new)
    }

    fn is_trusted(&self, peer_ip: Option<IpAddr>) -> bool {
        if self.config.trusted_proxies.is_empty() {
            return true;
        }
        peer_ip.is_some_and(|ip| self.config.trusted_proxies.iter().any(|net| net.contains(&ip)))
    }
}

fn first_forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

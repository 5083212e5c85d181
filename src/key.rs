//! Throttle key resolution.
//!
//! A request is throttled by its caller identity when one is known, by its
//! network address otherwise, and not at all when neither is available.

use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderMap;
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;

/// Maximum stored length of an action name
pub const MAX_ACTION_LEN: usize = 60;

/// Stable caller identity inserted into request extensions by an upstream
/// authentication layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity(pub String);

/// The throttling subject of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum ThrottleKey {
    Identity(String),
    Address(String),
}

impl ThrottleKey {
    /// Identity wins over address; blank values count as absent.
    pub fn resolve(identity: Option<&str>, address: Option<&str>) -> Option<Self> {
        fn present(value: Option<&str>) -> Option<&str> {
            value.map(str::trim).filter(|v| !v.is_empty())
        }

        if let Some(identity) = present(identity) {
            Some(ThrottleKey::Identity(identity.to_string()))
        } else {
            present(address).map(|address| ThrottleKey::Address(address.to_string()))
        }
    }

    /// Namespaced key used in the event store, so an identity can never share
    /// a budget with an identical address string.
    pub fn storage_key(&self) -> String {
        match self {
            ThrottleKey::Identity(id) => format!("identity:{}", id),
            ThrottleKey::Address(addr) => format!("address:{}", addr),
        }
    }
}

impl fmt::Display for ThrottleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// Per-request attributes the gate needs, with the timestamp captured once
/// when the request entered the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    key: Option<ThrottleKey>,
    action: Option<String>,
    requested_at_ms: i64,
}

impl RequestContext {
    pub fn new(
        identity: Option<&str>,
        address: Option<&str>,
        action: Option<&str>,
        requested_at_ms: i64,
    ) -> Self {
        Self {
            key: ThrottleKey::resolve(identity, address),
            action: action.map(truncate_action).filter(|a| !a.is_empty()),
            requested_at_ms,
        }
    }

    pub fn key(&self) -> Option<&ThrottleKey> {
        self.key.as_ref()
    }

    /// Requests with no resolvable key are never throttled nor logged
    pub fn is_throttleable(&self) -> bool {
        self.key.is_some()
    }

    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    pub fn requested_at_ms(&self) -> i64 {
        self.requested_at_ms
    }
}

/// Last path segment, truncated to [`MAX_ACTION_LEN`] characters.
pub fn action_from_path(path: &str) -> String {
    let action = match path.rfind('/') {
        Some(position) => &path[position + 1..],
        None => path,
    };
    truncate_action(action)
}

fn truncate_action(action: &str) -> String {
    action.chars().take(MAX_ACTION_LEN).collect()
}

/// How the network address of a request is resolved.
#[derive(Debug, Clone, Default)]
pub struct AddressResolver {
    trust_forwarded_headers: bool,
}

impl AddressResolver {
    pub fn new(trust_forwarded_headers: bool) -> Self {
        Self {
            trust_forwarded_headers,
        }
    }

    /// Forwarded headers are only consulted when the service sits behind a
    /// trusted proxy; otherwise the socket peer address is used.
    pub fn resolve(&self, request: &Request) -> Option<String> {
        if self.trust_forwarded_headers {
            if let Some(forwarded) = forwarded_address(request.headers()) {
                return Some(forwarded);
            }
        }

        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .or_else(|| {
                request
                    .extensions()
                    .get::<SocketAddr>()
                    .map(|addr| addr.ip().to_string())
            })
    }
}

fn forwarded_address(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(first_ip) = forwarded_str.split(',').next() {
                let first_ip = first_ip.trim();
                if !first_ip.is_empty() {
                    return Some(first_ip.to_string());
                }
            }
        }
    }

    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}

/// How the caller identity of a request is resolved.
#[derive(Debug, Clone, Default)]
pub struct IdentityResolver {
    header: Option<String>,
}

impl IdentityResolver {
    /// `header` names a request header trusted to carry the caller identity,
    /// set by a gateway in front of the service.
    pub fn new(header: Option<String>) -> Self {
        Self {
            header: header.map(|h| h.to_ascii_lowercase()),
        }
    }

    pub fn resolve(&self, request: &Request) -> Option<String> {
        if let Some(Identity(identity)) = request.extensions().get::<Identity>() {
            return Some(identity.clone());
        }

        let header = self.header.as_deref()?;
        request
            .headers()
            .get(header)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }
}

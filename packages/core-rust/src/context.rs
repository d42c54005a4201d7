use std::net::{IpAddr, SocketAddr};

use uuid::Uuid;

use crate::types::Principal;

/// Per-connection context carrying identity and client metadata.
/// Threaded through every command for auth, audit, and fail point matching.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Application name the client reported in its handshake.
    pub app_name: Option<String>,
    /// Peer address. `None` for in-process callers.
    pub remote_addr: Option<SocketAddr>,
    /// Authenticated principal, if the connection is authenticated.
    pub principal: Option<Principal>,
    /// Set for node-to-node traffic; internal clients skip most fail points.
    pub internal: bool,
    /// Logical session the request belongs to, if any.
    pub session_id: Option<Uuid>,
}

impl RequestContext {
    /// Context for an unauthenticated external client.
    #[must_use]
    pub fn external(app_name: Option<&str>) -> Self {
        Self {
            app_name: app_name.map(str::to_string),
            ..Self::default()
        }
    }

    /// Context for node-to-node traffic.
    #[must_use]
    pub fn internal() -> Self {
        Self {
            internal: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// In-process callers and loopback peers count as local.
    #[must_use]
    pub fn is_local_host(&self) -> bool {
        let Some(addr) = self.remote_addr else {
            return true;
        };
        match addr.ip() {
            IpAddr::V4(ip) => ip.is_loopback(),
            IpAddr::V6(ip) => {
                ip.is_loopback() || ip.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
            }
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.principal.is_some()
    }
}

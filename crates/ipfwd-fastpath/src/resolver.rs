//! The authoritative next-hop resolution seam.
//!
//! The real resolver is owned by the host (kernel FIB, neighbor tables);
//! the engine only ever sees this trait. Implementations must be bounded
//! in cost per call: resolution runs on the packet path and may not block
//! on I/O or sleep.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use ipfwd_core::InterfaceId;

use crate::types::ForwardingAction;

/// Everything the authoritative lookup needs about one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteQuery {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: u8,
    pub tos: u8,
    pub total_len: u16,
    pub ingress: InterfaceId,
}

/// Failure modes of an authoritative resolution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// No usable route: destination unreachable, blackholed, needs
    /// fragmentation, or a route type the fast path does not handle.
    #[error("no route to destination")]
    NoRoute,

    /// The resolving collaborator itself failed; transient.
    #[error("next-hop lookup failed: {0}")]
    LookupFailed(String),
}

/// Authoritative "resolve next hop" operation.
///
/// Treated as expensive: the engine calls it only on a cache miss and
/// caches every success write-through. Duplicate concurrent resolutions
/// for one destination are acceptable; the cache replaces whole values
/// atomically, so last writer wins.
pub trait NextHopResolver: Send + Sync {
    fn resolve(&self, query: &RouteQuery) -> Result<ForwardingAction, ResolveError>;
}

/// Map-backed resolver with exact destination matching.
///
/// Serves two roles: the node daemon builds one from its `[[routes]]`
/// configuration, and tests use it as a deterministic stand-in for the
/// kernel. Unknown destinations resolve to [`ResolveError::NoRoute`].
#[derive(Debug, Default)]
pub struct StaticResolver {
    routes: HashMap<Ipv4Addr, ForwardingAction>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style route registration.
    pub fn with_route(mut self, dst: Ipv4Addr, action: ForwardingAction) -> Self {
        self.routes.insert(dst, action);
        self
    }

    pub fn add_route(&mut self, dst: Ipv4Addr, action: ForwardingAction) {
        self.routes.insert(dst, action);
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl NextHopResolver for StaticResolver {
    fn resolve(&self, query: &RouteQuery) -> Result<ForwardingAction, ResolveError> {
        self.routes.get(&query.dst).copied().ok_or(ResolveError::NoRoute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipfwd_core::MacAddr;

    fn make_query(dst: Ipv4Addr) -> RouteQuery {
        RouteQuery {
            src: Ipv4Addr::new(10, 0, 0, 1),
            dst,
            protocol: 6,
            tos: 0,
            total_len: 60,
            ingress: InterfaceId(1),
        }
    }

    #[test]
    fn static_resolver_hits_known_destination() {
        let dst = Ipv4Addr::new(10, 0, 0, 5);
        let action = ForwardingAction::new(
            InterfaceId(3),
            MacAddr::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]),
            MacAddr::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]),
        );
        let resolver = StaticResolver::new().with_route(dst, action);
        assert_eq!(resolver.resolve(&make_query(dst)), Ok(action));
    }

    #[test]
    fn static_resolver_misses_with_no_route() {
        let resolver = StaticResolver::new();
        assert_eq!(
            resolver.resolve(&make_query(Ipv4Addr::new(192, 0, 2, 1))),
            Err(ResolveError::NoRoute)
        );
    }

    #[test]
    fn error_display() {
        assert_eq!(ResolveError::NoRoute.to_string(), "no route to destination");
        assert_eq!(
            ResolveError::LookupFailed("netlink timeout".into()).to_string(),
            "next-hop lookup failed: netlink timeout"
        );
    }
}

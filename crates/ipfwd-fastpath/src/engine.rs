//! Per-packet forwarding decision engine.

use std::sync::Arc;

use tracing::{debug, trace};

use ipfwd_core::{FrameError, FrameView, InterfaceId};

use crate::cache::RewriteCache;
use crate::resolver::{NextHopResolver, RouteQuery};
use crate::types::{ForwardingAction, Verdict};

/// Orchestrates parse → fast lookup → slow lookup → cache population →
/// frame mutation → verdict.
///
/// One engine instance is shared by every packet-processing context; the
/// cache and resolver behind it are the only shared state. Processing is
/// synchronous and runs to a verdict within the invocation that delivered
/// the packet.
pub struct ForwardingEngine {
    cache: Arc<RewriteCache>,
    resolver: Arc<dyn NextHopResolver>,
}

impl ForwardingEngine {
    pub fn new(cache: Arc<RewriteCache>, resolver: Arc<dyn NextHopResolver>) -> Self {
        Self { cache, resolver }
    }

    /// The shared rewrite cache, for control-plane access.
    pub fn cache(&self) -> &Arc<RewriteCache> {
        &self.cache
    }

    /// Decide and apply the fate of one received frame.
    ///
    /// On `Redirect` the frame has been mutated in place: MACs restamped,
    /// TTL decremented, checksum fixed up. On `PassThrough` and `Drop` the
    /// frame is untouched. Every resolution failure fails open to
    /// `PassThrough`; only frames too short to interpret are dropped.
    pub fn process(&self, frame: &mut [u8], ingress: InterfaceId) -> Verdict {
        let mut view = match FrameView::parse(frame) {
            Ok(view) => view,
            Err(FrameError::Truncated { need, actual }) => {
                trace!(need, actual, "dropping truncated frame");
                return Verdict::Drop;
            }
            Err(FrameError::Unsupported { ether_type }) => {
                trace!(ether_type, "passing non-ipv4 frame to normal stack");
                return Verdict::PassThrough;
            }
        };

        let dst = view.dst_ip();
        if let Some(action) = self.cache.lookup(dst) {
            trace!(%dst, egress = %action.egress, "fast path hit");
            apply(&mut view, &action);
            return Verdict::Redirect(action.egress);
        }

        let query = RouteQuery {
            src: view.src_ip(),
            dst,
            protocol: view.protocol(),
            tos: view.tos(),
            total_len: view.total_len(),
            ingress,
        };
        match self.resolver.resolve(&query) {
            Ok(action) => {
                // Write-through before the verdict so the next packet for
                // this destination takes the fast path.
                self.cache.insert(dst, action);
                trace!(%dst, egress = %action.egress, "slow path resolved");
                apply(&mut view, &action);
                Verdict::Redirect(action.egress)
            }
            Err(err) => {
                debug!(%dst, %err, "resolution failed, passing through");
                Verdict::PassThrough
            }
        }
    }
}

/// Stamp both MACs and decrement the TTL with its checksum fixup.
fn apply(view: &mut FrameView<'_>, action: &ForwardingAction) {
    view.set_src_mac(action.src_mac);
    view.set_dst_mac(action.dst_mac);
    view.decrement_ttl();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    use ipfwd_core::MacAddr;

    use crate::resolver::StaticResolver;
    use crate::testing::{build_ipv4_frame, CountingResolver, FailingResolver};

    fn make_action(egress: u32) -> ForwardingAction {
        ForwardingAction::new(
            InterfaceId(egress),
            MacAddr::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]),
            MacAddr::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]),
        )
    }

    fn make_engine(resolver: Arc<dyn NextHopResolver>) -> ForwardingEngine {
        ForwardingEngine::new(Arc::new(RewriteCache::new(128)), resolver)
    }

    #[test]
    fn truncated_frame_is_dropped() {
        let engine = make_engine(Arc::new(StaticResolver::new()));
        let mut runt = vec![0u8; 10];
        assert_eq!(engine.process(&mut runt, InterfaceId(1)), Verdict::Drop);

        // Ethernet header present, IPv4 header cut short.
        let mut frame = build_ipv4_frame([10, 0, 0, 1], [10, 0, 0, 5], 64);
        frame.truncate(14 + 10);
        assert_eq!(engine.process(&mut frame, InterfaceId(1)), Verdict::Drop);
    }

    #[test]
    fn non_ipv4_frame_passes_through() {
        let engine = make_engine(Arc::new(StaticResolver::new()));
        let mut frame = build_ipv4_frame([10, 0, 0, 1], [10, 0, 0, 5], 64);
        frame[12..14].copy_from_slice(&0x0806u16.to_be_bytes()); // ARP
        let before = frame.clone();
        assert_eq!(
            engine.process(&mut frame, InterfaceId(1)),
            Verdict::PassThrough
        );
        assert_eq!(frame, before, "pass-through must not mutate the frame");
    }

    #[test]
    fn miss_resolves_and_populates_cache() {
        let dst = Ipv4Addr::new(10, 0, 0, 5);
        let resolver = Arc::new(CountingResolver::new(
            StaticResolver::new().with_route(dst, make_action(3)),
        ));
        let engine = make_engine(resolver.clone());

        let mut frame = build_ipv4_frame([10, 0, 0, 1], [10, 0, 0, 5], 64);
        assert_eq!(
            engine.process(&mut frame, InterfaceId(1)),
            Verdict::Redirect(InterfaceId(3))
        );
        assert_eq!(resolver.calls(), 1);
        assert_eq!(engine.cache().lookup(dst), Some(make_action(3)));
    }

    #[test]
    fn second_packet_takes_fast_path() {
        let dst = Ipv4Addr::new(10, 0, 0, 5);
        let resolver = Arc::new(CountingResolver::new(
            StaticResolver::new().with_route(dst, make_action(3)),
        ));
        let engine = make_engine(resolver.clone());

        for _ in 0..5 {
            let mut frame = build_ipv4_frame([10, 0, 0, 1], [10, 0, 0, 5], 64);
            assert_eq!(
                engine.process(&mut frame, InterfaceId(1)),
                Verdict::Redirect(InterfaceId(3))
            );
        }
        assert_eq!(resolver.calls(), 1, "write-through must absorb repeats");
    }

    #[test]
    fn redirect_mutates_frame() {
        let dst = Ipv4Addr::new(10, 0, 0, 5);
        let resolver =
            Arc::new(StaticResolver::new().with_route(dst, make_action(3)));
        let engine = make_engine(resolver);

        let mut frame = build_ipv4_frame([10, 0, 0, 1], [10, 0, 0, 5], 64);
        engine.process(&mut frame, InterfaceId(1));

        assert_eq!(&frame[0..6], &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert_eq!(&frame[6..12], &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        assert_eq!(frame[22], 63);
        let recomputed = ipfwd_core::checksum::header_checksum(&frame[14..]);
        assert_eq!(u16::from_be_bytes([frame[24], frame[25]]), recomputed);
    }

    #[test]
    fn no_route_passes_through_without_caching() {
        let dst = Ipv4Addr::new(192, 0, 2, 9);
        let engine = make_engine(Arc::new(StaticResolver::new()));
        let mut frame = build_ipv4_frame([10, 0, 0, 1], [192, 0, 2, 9], 64);
        let before = frame.clone();
        assert_eq!(
            engine.process(&mut frame, InterfaceId(1)),
            Verdict::PassThrough
        );
        assert_eq!(frame, before);
        assert!(engine.cache().lookup(dst).is_none());
    }

    #[test]
    fn lookup_failure_passes_through() {
        let engine = make_engine(Arc::new(FailingResolver));
        let mut frame = build_ipv4_frame([10, 0, 0, 1], [10, 0, 0, 5], 64);
        assert_eq!(
            engine.process(&mut frame, InterfaceId(1)),
            Verdict::PassThrough
        );
        assert!(engine.cache().is_empty());
    }

    #[test]
    fn invalidation_forces_fresh_resolution() {
        let dst = Ipv4Addr::new(10, 0, 0, 5);
        let resolver = Arc::new(CountingResolver::new(
            StaticResolver::new().with_route(dst, make_action(3)),
        ));
        let engine = make_engine(resolver.clone());

        let mut frame = build_ipv4_frame([10, 0, 0, 1], [10, 0, 0, 5], 64);
        engine.process(&mut frame, InterfaceId(1));
        let mut frame = build_ipv4_frame([10, 0, 0, 1], [10, 0, 0, 5], 64);
        engine.process(&mut frame, InterfaceId(1));
        assert_eq!(resolver.calls(), 1);

        engine.cache().invalidate(dst);

        let mut frame = build_ipv4_frame([10, 0, 0, 1], [10, 0, 0, 5], 64);
        assert_eq!(
            engine.process(&mut frame, InterfaceId(1)),
            Verdict::Redirect(InterfaceId(3))
        );
        assert_eq!(resolver.calls(), 2);
    }

    #[test]
    fn bad_packet_never_disturbs_cache_state() {
        let dst = Ipv4Addr::new(10, 0, 0, 5);
        let resolver =
            Arc::new(StaticResolver::new().with_route(dst, make_action(3)));
        let engine = make_engine(resolver);

        let mut frame = build_ipv4_frame([10, 0, 0, 1], [10, 0, 0, 5], 64);
        engine.process(&mut frame, InterfaceId(1));
        assert_eq!(engine.cache().len(), 1);

        let mut runt = vec![0u8; 5];
        assert_eq!(engine.process(&mut runt, InterfaceId(1)), Verdict::Drop);
        let mut arp = build_ipv4_frame([10, 0, 0, 1], [10, 0, 0, 6], 64);
        arp[12..14].copy_from_slice(&0x0806u16.to_be_bytes());
        assert_eq!(engine.process(&mut arp, InterfaceId(1)), Verdict::PassThrough);

        assert_eq!(engine.cache().len(), 1);
        assert_eq!(engine.cache().lookup(dst), Some(make_action(3)));
    }
}

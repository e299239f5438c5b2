//! Test doubles and frame builders for exercising the engine without a
//! kernel, a capture socket, or real interfaces.

use std::sync::atomic::{AtomicUsize, Ordering};

use ipfwd_core::checksum;

use crate::resolver::{NextHopResolver, ResolveError, RouteQuery};
use crate::types::ForwardingAction;

/// Wraps any resolver and counts how many times it is consulted.
///
/// The counter is the instrument for write-through assertions: repeated
/// packets to a cached destination must leave it unchanged.
pub struct CountingResolver<R> {
    inner: R,
    calls: AtomicUsize,
}

impl<R> CountingResolver<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `resolve` invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<R: NextHopResolver> NextHopResolver for CountingResolver<R> {
    fn resolve(&self, query: &RouteQuery) -> Result<ForwardingAction, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.resolve(query)
    }
}

/// Resolver that always reports a collaborator-side failure.
pub struct FailingResolver;

impl NextHopResolver for FailingResolver {
    fn resolve(&self, _query: &RouteQuery) -> Result<ForwardingAction, ResolveError> {
        Err(ResolveError::LookupFailed("injected failure".to_string()))
    }
}

/// Build a minimal valid frame: Ethernet header, 20-byte IPv4 header with
/// a correct checksum, UDP protocol, no payload.
pub fn build_ipv4_frame(src: [u8; 4], dst: [u8; 4], ttl: u8) -> Vec<u8> {
    let mut frame = vec![0u8; 14 + 20];
    frame[0..6].copy_from_slice(&[0x02, 0, 0, 0, 0, 0x01]);
    frame[6..12].copy_from_slice(&[0x02, 0, 0, 0, 0, 0x02]);
    frame[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
    frame[14] = 0x45;
    frame[16..18].copy_from_slice(&20u16.to_be_bytes());
    frame[22] = ttl;
    frame[23] = 17;
    frame[26..30].copy_from_slice(&src);
    frame[30..34].copy_from_slice(&dst);
    let check = checksum::header_checksum(&frame[14..]);
    frame[24..26].copy_from_slice(&check.to_be_bytes());
    frame
}

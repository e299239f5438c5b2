//! Forwarding action and verdict types.

use ipfwd_core::{InterfaceId, MacAddr};

/// The unit stored in the rewrite cache and returned by both lookup paths.
///
/// Immutable once constructed; both MAC fields are always populated
/// together. Updates replace the whole value, never a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct ForwardingAction {
    /// Interface to transmit the rewritten frame on.
    pub egress: InterfaceId,
    /// Link-layer source to stamp (the egress interface's own address).
    pub src_mac: MacAddr,
    /// Link-layer destination to stamp (the next hop's address).
    pub dst_mac: MacAddr,
}

impl ForwardingAction {
    pub const fn new(egress: InterfaceId, src_mac: MacAddr, dst_mac: MacAddr) -> Self {
        Self {
            egress,
            src_mac,
            dst_mac,
        }
    }
}

/// Per-packet decision returned to the delivery collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Verdict {
    /// Transmit the mutated frame out the given interface instead of
    /// letting the normal stack see it.
    Redirect(InterfaceId),
    /// Do not intervene; the normal path handles the frame unmodified.
    PassThrough,
    /// The frame is too damaged to be forwarded safely by anyone.
    Drop,
}

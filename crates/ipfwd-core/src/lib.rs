//! Wire-level building blocks for the ipfwd fast path.
//!
//! This crate is the dependency-light leaf of the workspace: link-layer
//! address types, a bounds-checked view over Ethernet + IPv4 headers, and
//! the one's-complement checksum arithmetic needed to mutate frames in
//! place. It performs no I/O and holds no state beyond a single frame.

pub mod checksum;
pub mod error;
pub mod frame;
pub mod types;

pub use error::FrameError;
pub use frame::FrameView;
pub use types::{InterfaceId, MacAddr};

//! Frame parsing error types.

/// Errors produced while validating a raw frame for the fast path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The frame is too short for a mandatory header region. A truncated
    /// frame cannot be forwarded safely by anyone, so callers drop it.
    #[error("frame truncated: need {need} bytes, got {actual}")]
    Truncated { need: usize, actual: usize },

    /// The frame is well-formed but carries traffic the fast path does not
    /// handle (non-IPv4 ether-type). Callers defer it to the normal stack.
    #[error("unsupported ether-type 0x{ether_type:04x}")]
    Unsupported { ether_type: u16 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_truncated() {
        let err = FrameError::Truncated { need: 34, actual: 24 };
        assert_eq!(err.to_string(), "frame truncated: need 34 bytes, got 24");
    }

    #[test]
    fn display_unsupported() {
        let err = FrameError::Unsupported { ether_type: 0x0806 };
        assert_eq!(err.to_string(), "unsupported ether-type 0x0806");
    }
}

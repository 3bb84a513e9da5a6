//! Events the two cores react to, distinct from the packet data plane.
//!
//! These correspond to what arrive as upstream/downstream pad events in the
//! original element: a retransmission request, an SSRC collision notice, and
//! the caps event that carries clock rate. This crate has no pad or event
//! bus of its own; a caller wires these in from whatever transport/session
//! layer it has.

/// A request to retransmit the packet identified by `seqnum` on `ssrc`.
/// Mirrors `GstRTPRetransmissionRequest`, whose `seqnum` field is a `guint`
/// even though RTP sequence numbers are 16 bits; callers are expected to
/// pass a value that fits in `u16` and it is truncated at the core boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransmissionRequest {
    pub seqnum: u32,
    pub ssrc: u32,
}

/// Notice that `ssrc` has collided with another source and must not be
/// reused. Mirrors `GstRTPCollision`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Collision {
    pub ssrc: u32,
}

/// Per-SSRC clock rate, as would arrive via caps negotiation. Signed per
/// §3/§4.1: a clock rate `<= 0` (absent or unparsed) leaves time-based
/// history eviction disabled for that SSRC rather than being rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockRate {
    pub ssrc: u32,
    pub clock_rate: i32,
}

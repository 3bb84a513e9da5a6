//! RFC 4588 RTP retransmission sender/receiver core, for SSRC-multiplexed
//! operation.
//!
//! This crate implements the retransmission state machine and packet
//! rewriting engine shared by a sender-side retransmitter (bounded history +
//! RTX synthesis) and a receiver-side retransmitter (request tracking +
//! association + reconstruction). It does not own a pad graph, a thread, or
//! a socket: callers feed it buffers and events and get buffers and events
//! back.

pub mod config;
pub mod error;
pub mod events;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod serial;

pub use error::RtxError;
pub use events::{ClockRate, Collision, RetransmissionRequest};
pub use receiver::{Receiver, ReceiverStats};
pub use sender::{Sender, SenderStats};

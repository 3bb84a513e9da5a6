use thiserror::Error;

/// Errors raised at the two boundaries where this crate fails fast: parsing a
/// wire-format RTP buffer, and validating configuration before it is installed.
///
/// Every other failure path described by the state machine (unknown SSRC on a
/// request, unknown seqnum, an unassociable RTX packet) is a silent no-op by
/// design and is represented with `Option`/`bool`, never `RtxError`.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RtxError {
    #[error("buffer too short for a fixed RTP header: got {got} bytes, need at least {need}")]
    TruncatedHeader { got: usize, need: usize },

    #[error(
        "extension header declares {declared} bytes of extension data but only {available} remain"
    )]
    TruncatedExtension { declared: usize, available: usize },

    #[error("RTX payload is {got} bytes, too short to hold a 2-byte OSN")]
    TruncatedRtxPayload { got: usize },

    #[error("payload type {value} is out of the valid 0-127 range")]
    InvalidPayloadType { value: u16 },

    #[error("ssrc-map key {key:?} is not a valid u32 SSRC")]
    InvalidSsrcMapEntry { key: String },

    #[error("payload-type-map key {key:?} is not a valid decimal payload type")]
    InvalidPtMapEntry { key: String },
}

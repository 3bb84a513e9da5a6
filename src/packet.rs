//! Read-only projection over a raw RTP packet, and the RFC 4588 packet
//! surgery (§4.3) built on top of it.
//!
//! The four addressable regions (fixed header, extension, payload, padding)
//! are never assumed to be contiguous beyond what RFC 3550 guarantees; every
//! accessor recomputes its slice from the header fields rather than caching
//! offsets that could go stale.

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};

use crate::error::RtxError;

/// https://tools.ietf.org/html/rfc3550#section-5.1
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       sequence number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |           synchronization source (SSRC) identifier            |
/// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// |            contributing source (CSRC) identifiers             |
/// |                             ....                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |              ...extensions (if present)...                    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                   payload                                     |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
const FIXED_HEADER_LEN: usize = 12;

/// A read-only view over a raw RTP buffer. Construction validates that the
/// fixed header and (if present) the extension region actually fit in the
/// buffer; everything past that (payload, padding) is taken on faith the way
/// the original C implementation does, since RFC 3550 gives no further
/// internal length to check.
#[derive(Debug, Clone, Copy)]
pub struct RtpView<'a> {
    buf: &'a [u8],
    extension_len: usize,
}

impl<'a> RtpView<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<Self, RtxError> {
        if buf.len() < FIXED_HEADER_LEN {
            return Err(RtxError::TruncatedHeader {
                got: buf.len(),
                need: FIXED_HEADER_LEN,
            });
        }
        let csrc_count = (buf[0] & 0x0F) as usize;
        let header_len = FIXED_HEADER_LEN + 4 * csrc_count;
        if buf.len() < header_len {
            return Err(RtxError::TruncatedHeader {
                got: buf.len(),
                need: header_len,
            });
        }

        let has_extension = buf[0] & 0x10 != 0;
        let extension_len = if has_extension {
            if buf.len() < header_len + 4 {
                return Err(RtxError::TruncatedExtension {
                    declared: 4,
                    available: buf.len() - header_len,
                });
            }
            let words = BigEndian::read_u16(&buf[header_len + 2..header_len + 4]) as usize;
            let declared = 4 + words * 4;
            if buf.len() < header_len + declared {
                return Err(RtxError::TruncatedExtension {
                    declared,
                    available: buf.len() - header_len,
                });
            }
            declared
        } else {
            0
        };

        Ok(Self { buf, extension_len })
    }

    pub fn version(&self) -> u8 {
        (self.buf[0] & 0xC0) >> 6
    }

    pub fn has_padding(&self) -> bool {
        self.buf[0] & 0x20 != 0
    }

    pub fn has_extension(&self) -> bool {
        self.buf[0] & 0x10 != 0
    }

    pub fn csrc_count(&self) -> u8 {
        self.buf[0] & 0x0F
    }

    pub fn marker(&self) -> bool {
        self.buf[1] & 0x80 != 0
    }

    pub fn payload_type(&self) -> u8 {
        self.buf[1] & 0x7F
    }

    pub fn sequence_number(&self) -> u16 {
        BigEndian::read_u16(&self.buf[2..4])
    }

    pub fn timestamp(&self) -> u32 {
        BigEndian::read_u32(&self.buf[4..8])
    }

    pub fn ssrc(&self) -> u32 {
        BigEndian::read_u32(&self.buf[8..12])
    }

    fn fixed_header_len(&self) -> usize {
        FIXED_HEADER_LEN + 4 * self.csrc_count() as usize
    }

    /// The fixed header plus any CSRCs, verbatim.
    pub fn fixed_header(&self) -> &'a [u8] {
        &self.buf[..self.fixed_header_len()]
    }

    /// The extension region (profile id + length + data), or empty if absent.
    pub fn extension(&self) -> &'a [u8] {
        let start = self.fixed_header_len();
        &self.buf[start..start + self.extension_len]
    }

    fn payload_and_padding(&self) -> &'a [u8] {
        let start = self.fixed_header_len() + self.extension_len;
        &self.buf[start..]
    }

    fn padding_len(&self) -> usize {
        if !self.has_padding() {
            return 0;
        }
        let rest = self.payload_and_padding();
        match rest.last() {
            Some(&n) if (n as usize) <= rest.len() => n as usize,
            _ => 0,
        }
    }

    /// The payload, excluding any trailing padding.
    pub fn payload(&self) -> &'a [u8] {
        let rest = self.payload_and_padding();
        let pad = self.padding_len();
        &rest[..rest.len() - pad]
    }

    /// The padding region (including the trailing length byte), empty if the
    /// P bit is clear.
    pub fn padding(&self) -> &'a [u8] {
        let rest = self.payload_and_padding();
        let pad = self.padding_len();
        &rest[rest.len() - pad..]
    }
}

/// Builds an RFC 4588 RTX packet from an original buffer, per §4.3 "Sender
/// construction". The caller supplies the already-resolved `(rtx_ssrc,
/// rtx_seq, rtx_pt)`; SSRC/seqnum/PT allocation is the sender core's job, not
/// this free function's.
pub fn build_rtx_packet(original: &RtpView<'_>, rtx_ssrc: u32, rtx_seq: u16, rtx_pt: u8) -> Bytes {
    let header = original.fixed_header();
    let extension = original.extension();
    let payload = original.payload();

    let mut out = BytesMut::with_capacity(header.len() + extension.len() + 2 + payload.len());
    out.put_slice(header);
    out.put_slice(extension);
    out.put_u16(original.sequence_number());
    out.put_slice(payload);

    // Clear the P bit: RFC 4588 says let downstream elements re-pad as normal.
    out[0] &= !0x20;
    out[1] = (out[1] & 0x80) | (rtx_pt & 0x7F);
    BigEndian::write_u16(&mut out[2..4], rtx_seq);
    BigEndian::write_u32(&mut out[8..12], rtx_ssrc);

    out.freeze()
}

/// Reconstructs the original RTP packet from an RTX buffer, per §4.3
/// "Receiver reconstruction". `osn`/`origin_pt` must already have been
/// recovered by the caller (the OSN from the first 2 payload bytes, the PT
/// from the RTX->original PT map).
pub fn reconstruct_from_rtx(
    rtx: &RtpView<'_>,
    master_ssrc: u32,
    osn: u16,
    origin_pt: u8,
) -> Result<Bytes, RtxError> {
    let rtx_payload = rtx.payload();
    if rtx_payload.len() < 2 {
        return Err(RtxError::TruncatedRtxPayload {
            got: rtx_payload.len(),
        });
    }

    let header = rtx.fixed_header();
    let extension = rtx.extension();
    let original_payload = &rtx_payload[2..];
    let padding = rtx.padding();

    let mut out = BytesMut::with_capacity(
        header.len() + extension.len() + original_payload.len() + padding.len(),
    );
    out.put_slice(header);
    out.put_slice(extension);
    out.put_slice(original_payload);
    if !padding.is_empty() {
        let pad_len = padding.len();
        out.put_slice(padding);
        let out_len = out.len();
        out[out_len - 1] = pad_len as u8;
    }

    out[1] = (out[1] & 0x80) | (origin_pt & 0x7F);
    BigEndian::write_u16(&mut out[2..4], osn);
    BigEndian::write_u32(&mut out[8..12], master_ssrc);

    Ok(out.freeze())
}

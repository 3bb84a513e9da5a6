//! Round-trip properties for the shared RTP surgery (spec §4.3, P3).

use byteorder::{BigEndian, ByteOrder};
use rtp_rtx::packet::{build_rtx_packet, reconstruct_from_rtx, RtpView};

fn packet_with_extension_and_padding(ssrc: u32, seq: u16, pt: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; 12];
    buf[0] = 0x90; // V=2, P=0 for now, X=1
    buf[1] = pt;
    BigEndian::write_u16(&mut buf[2..4], seq);
    BigEndian::write_u32(&mut buf[4..8], 90000);
    BigEndian::write_u32(&mut buf[8..12], ssrc);
    buf.extend_from_slice(&[0xBE, 0xDE, 0x00, 0x01, 0x10, 0xAA, 0x20, 0xBB]);
    buf.extend_from_slice(payload);
    buf[0] |= 0x20; // P=1
    buf.extend_from_slice(&[0, 0, 0, 4]); // 4 bytes padding
    buf
}

#[test]
fn extension_and_payload_survive_a_full_round_trip() {
    let original = packet_with_extension_and_padding(0x1234_5678, 500, 96, b"codec-payload");
    let original_view = RtpView::parse(&original).unwrap();

    let rtx = build_rtx_packet(&original_view, 0x9999_9999, 3, 97);
    let rtx_view = RtpView::parse(&rtx).unwrap();

    // Sender strips padding and clears P, per §4.3 step 4.
    assert!(!rtx_view.has_padding());
    assert_eq!(rtx_view.extension(), original_view.extension());

    let reconstructed = reconstruct_from_rtx(&rtx_view, 0x1234_5678, 500, 96).unwrap();
    let reconstructed_view = RtpView::parse(&reconstructed).unwrap();

    assert_eq!(reconstructed_view.ssrc(), original_view.ssrc());
    assert_eq!(reconstructed_view.sequence_number(), original_view.sequence_number());
    assert_eq!(reconstructed_view.payload_type(), original_view.payload_type());
    assert_eq!(reconstructed_view.extension(), original_view.extension());
    assert_eq!(reconstructed_view.payload(), original_view.payload());
    // The rtx packet carried no padding (sender cleared it), so none comes back.
    assert_eq!(reconstructed_view.padding(), b"");
}

#[test]
fn receiver_tolerates_padding_on_the_incoming_rtx() {
    // Build an rtx-shaped buffer directly (as if some other sender violated
    // step 4 and left P=1), to exercise the receiver's tolerance path.
    let mut rtx = vec![0u8; 12];
    rtx[0] = 0xA0; // V=2, P=1
    rtx[1] = 97;
    BigEndian::write_u16(&mut rtx[2..4], 7);
    BigEndian::write_u32(&mut rtx[4..8], 0);
    BigEndian::write_u32(&mut rtx[8..12], 0xBBBB_BBBB);
    rtx.extend_from_slice(&[0, 42]); // OSN
    rtx.extend_from_slice(b"hi");
    rtx.extend_from_slice(&[0xCA, 0xFE, 3]); // 3 bytes padding, non-zero leading bytes

    let view = RtpView::parse(&rtx).unwrap();
    let reconstructed = reconstruct_from_rtx(&view, 0xAAAA_AAAA, 42, 96).unwrap();
    let reconstructed_view = RtpView::parse(&reconstructed).unwrap();

    assert_eq!(reconstructed_view.payload(), b"hi");
    assert_eq!(reconstructed_view.padding(), &[0xCA, 0xFE, 3]);
    assert_eq!(reconstructed_view.ssrc(), 0xAAAA_AAAA);
    assert_eq!(reconstructed_view.sequence_number(), 42);
    assert_eq!(reconstructed_view.payload_type(), 96);
}

#[test]
fn truncated_header_is_rejected() {
    let buf = [0x80, 96, 0, 1];
    assert!(RtpView::parse(&buf).is_err());
}

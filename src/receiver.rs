//! Receiver-side RFC 4588 retransmitter core (§4.2).
//!
//! Tracks outstanding retransmission requests by sequence number and
//! associates incoming RTX streams with their master SSRC on first contact,
//! per the RFC 4588 SSRC-association rule (I3/P5).

use std::collections::HashMap;
use std::sync::Mutex;

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use log::{debug, trace, warn};

use crate::config::{PtMap, PtMapState, ReceiverConfig};
use crate::error::RtxError;
use crate::events::RetransmissionRequest;
use crate::packet::{reconstruct_from_rtx, RtpView};

/// Snapshot of the receiver's counters, per §10.4.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub num_rtx_requests: u64,
    pub num_rtx_packets: u64,
    pub num_rtx_assoc_packets: u64,
}

struct ReceiverState {
    seqnum_to_master: HashMap<u16, u32>,
    /// Symmetric: both `m -> r` and `r -> m` are present for every
    /// association, so lookup is direction-agnostic (§3).
    assoc: HashMap<u32, u32>,
    pt_map: PtMapState,
    stats: ReceiverStats,
}

impl ReceiverState {
    fn new() -> Self {
        Self {
            seqnum_to_master: HashMap::new(),
            assoc: HashMap::new(),
            pt_map: PtMapState::default(),
            stats: ReceiverStats::default(),
        }
    }
}

/// Receiver-side retransmission core. All state is behind one coarse
/// [`Mutex`], as required by §5.
pub struct Receiver {
    #[allow(dead_code)]
    cfg: ReceiverConfig,
    state: Mutex<ReceiverState>,
}

impl Receiver {
    pub fn new(cfg: ReceiverConfig) -> Self {
        Self {
            cfg,
            state: Mutex::new(ReceiverState::new()),
        }
    }

    pub fn set_payload_type_map(&self, map: PtMap) {
        self.state.lock().unwrap().pt_map.stage(map);
    }

    /// Handles a retransmission request arriving from the egress side.
    /// Returns `true` if the event should be forwarded upstream unchanged,
    /// `false` if it was rejected and consumed (I4 conflict).
    pub fn on_request_event(&self, seqnum: u16, ssrc: u32) -> bool {
        let mut state = self.state.lock().unwrap();
        state.stats.num_rtx_requests += 1;

        if state.assoc.contains_key(&ssrc) {
            trace!("receiver: request ssrc={:#x} already associated, forwarding", ssrc);
            return true;
        }

        match state.seqnum_to_master.get(&seqnum) {
            Some(&existing) if existing == ssrc => {
                trace!("receiver: duplicate request seq={} ssrc={:#x}", seqnum, ssrc);
                true
            }
            Some(&existing) => {
                warn!(
                    "receiver: rejecting conflicting request seq={}: existing master={:#x}, new={:#x}",
                    seqnum, existing, ssrc
                );
                state.seqnum_to_master.remove(&seqnum);
                false
            }
            None => {
                debug!("receiver: tracking request seq={} ssrc={:#x}", seqnum, ssrc);
                state.seqnum_to_master.insert(seqnum, ssrc);
                true
            }
        }
    }

    /// Ingests an incoming packet, classifying it by payload type. Returns
    /// `Some(buf)` to forward (unchanged for a master packet, reconstructed
    /// for an associated RTX packet), or `None` if the packet was dropped
    /// (malformed, or an RTX packet that could not be associated).
    pub fn on_packet(&self, buf: Bytes) -> Result<Option<Bytes>, RtxError> {
        let view = RtpView::parse(&buf)?;
        let ssrc = view.ssrc();
        let seqnum = view.sequence_number();
        let pt = view.payload_type();

        let mut state = self.state.lock().unwrap();
        state.pt_map.apply_pending();

        let Some(origin_pt) = state.pt_map.live.original_pt_for(pt) else {
            trace!("receiver: pt={} not an rtx pt, forwarding as master", pt);
            return Ok(Some(buf));
        };

        if view.payload().len() < 2 {
            warn!("receiver: dropping rtx packet with payload < 2 bytes");
            return Ok(None);
        }
        state.stats.num_rtx_packets += 1;
        let osn = BigEndian::read_u16(&view.payload()[..2]);

        let master_ssrc = if let Some(&m) = state.assoc.get(&ssrc) {
            m
        } else if let Some(m) = state.seqnum_to_master.remove(&osn) {
            debug_assert_ne!(ssrc, m, "rtx stream associating with its own ssrc");
            if ssrc == m {
                warn!(
                    "receiver: refusing self-association, ssrc={:#x} osn={}",
                    ssrc, osn
                );
                return Ok(None);
            }
            state.assoc.insert(m, ssrc);
            state.assoc.insert(ssrc, m);
            state.stats.num_rtx_assoc_packets += 1;
            debug!(
                "receiver: associated rtx ssrc={:#x} with master={:#x} via osn={}",
                ssrc, m, osn
            );
            m
        } else {
            warn!(
                "receiver: dropping unassociable rtx packet ssrc={:#x} osn={}",
                ssrc, osn
            );
            return Ok(None);
        };

        let reconstructed = reconstruct_from_rtx(&view, master_ssrc, osn, origin_pt)?;
        Ok(Some(reconstructed))
    }

    pub fn reset(&self) {
        *self.state.lock().unwrap() = ReceiverState::new();
    }

    pub fn stats(&self) -> ReceiverStats {
        self.state.lock().unwrap().stats
    }

    /// Convenience entry point taking the wire-shaped event type (§6).
    pub fn handle_request(&self, event: RetransmissionRequest) -> bool {
        self.on_request_event(event.seqnum as u16, event.ssrc)
    }
}

//! Sender-side RFC 4588 retransmitter core (§4.1).
//!
//! Holds a bounded per-SSRC history of outgoing master packets and, on
//! request, synthesises an RTX packet from the stored buffer. All state
//! lives behind one coarse [`Mutex`]; emission happens after the lock has
//! been released, per §5.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use bytes::Bytes;
use log::{debug, error, trace, warn};
use rand::Rng;

use crate::config::{PtMap, PtMapState, SenderConfig};
use crate::error::RtxError;
use crate::events::{ClockRate, Collision, RetransmissionRequest};
use crate::packet::{build_rtx_packet, RtpView};
use crate::serial::{seq_cmp, ts_diff};

#[derive(Debug, Clone)]
struct HistoryEntry {
    seqnum: u16,
    timestamp: u32,
    original_pt: u8,
    buf: Bytes,
}

#[derive(Debug)]
struct SsrcData {
    rtx_ssrc: u32,
    next_rtx_seqnum: u16,
    clock_rate: Option<i32>,
    history: VecDeque<HistoryEntry>,
}

/// A buffer reference awaiting RTX emission (§3: "an ordered sequence of
/// buffer references"). Deliberately does *not* carry `rtx_ssrc`/`rtx_pt`:
/// those are resolved from live state at detachment time, not baked in at
/// request time, so a collision rotation that lands between the request and
/// the next master packet is honored (§5).
struct PendingRtx {
    master_ssrc: u32,
    original: Bytes,
    original_pt: u8,
}

/// A [`PendingRtx`] with its emission target resolved, ready to hand to
/// [`build_rtx_packet`] once the lock has been released.
struct ResolvedRtx {
    original: Bytes,
    rtx_ssrc: u32,
    rtx_seq: u16,
    rtx_pt: u8,
}

/// Snapshot of the sender's counters, per §10.4.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub num_rtx_requests: u64,
    pub num_rtx_packets: u64,
}

struct SenderState {
    ssrc_data: HashMap<u32, SsrcData>,
    rtx_ssrcs: HashMap<u32, u32>,
    external_ssrc_map: HashMap<u32, u32>,
    pt_map: PtMapState,
    pending: VecDeque<PendingRtx>,
    stats: SenderStats,
}

impl SenderState {
    fn new() -> Self {
        Self {
            ssrc_data: HashMap::new(),
            rtx_ssrcs: HashMap::new(),
            external_ssrc_map: HashMap::new(),
            pt_map: PtMapState::default(),
            pending: VecDeque::new(),
            stats: SenderStats::default(),
        }
    }

    /// Implements the rejection sampler from §4.1 "SSRC choice": prefer the
    /// external map's hint, otherwise draw uniformly, redrawing until the
    /// value collides with neither `ssrc_data` nor `rtx_ssrcs`.
    fn choose_rtx_ssrc(&self, master: u32, max_attempts: u32) -> Option<u32> {
        let is_free = |candidate: u32| -> bool {
            candidate != master
                && !self.ssrc_data.contains_key(&candidate)
                && !self.rtx_ssrcs.contains_key(&candidate)
        };

        if let Some(&preferred) = self.external_ssrc_map.get(&master) {
            if is_free(preferred) {
                return Some(preferred);
            }
        }

        let mut rng = rand::thread_rng();
        for _ in 0..max_attempts {
            let candidate: u32 = rng.gen();
            if is_free(candidate) {
                return Some(candidate);
            }
        }
        None
    }

    fn ensure_ssrc_data(&mut self, master: u32, max_attempts: u32) -> Option<&mut SsrcData> {
        if !self.ssrc_data.contains_key(&master) {
            let rtx_ssrc = self.choose_rtx_ssrc(master, max_attempts)?;
            let next_rtx_seqnum = rand::thread_rng().gen();
            self.rtx_ssrcs.insert(rtx_ssrc, master);
            self.ssrc_data.insert(
                master,
                SsrcData {
                    rtx_ssrc,
                    next_rtx_seqnum,
                    clock_rate: None,
                    history: VecDeque::new(),
                },
            );
            debug!("sender: allocated rtx_ssrc={:#x} for master={:#x}", rtx_ssrc, master);
        }
        self.ssrc_data.get_mut(&master)
    }

    fn evict(&mut self, master: u32, cfg: &SenderConfig) {
        let Some(data) = self.ssrc_data.get_mut(&master) else {
            return;
        };
        while cfg.max_history > 0 && data.history.len() > cfg.max_history {
            data.history.pop_front();
        }
        if cfg.max_history_duration_ms > 0 {
            if let Some(clock_rate) = data.clock_rate.filter(|r| *r > 0) {
                while data.history.len() > 1 {
                    let first = data.history.front().unwrap().timestamp;
                    let last = data.history.back().unwrap().timestamp;
                    let span_ms =
                        (ts_diff(first, last) as u64 * 1000) / clock_rate as u64;
                    if span_ms as u32 <= cfg.max_history_duration_ms {
                        break;
                    }
                    data.history.pop_front();
                }
            }
        }
    }
}

/// Sender-side retransmission core. Thread-safe: all state is behind one
/// coarse [`Mutex`], as required by §5.
pub struct Sender {
    cfg: SenderConfig,
    state: Mutex<SenderState>,
}

impl Sender {
    pub fn new(cfg: SenderConfig) -> Self {
        Self {
            cfg,
            state: Mutex::new(SenderState::new()),
        }
    }

    pub fn set_payload_type_map(&self, map: PtMap) {
        self.state.lock().unwrap().pt_map.stage(map);
    }

    pub fn set_ssrc_map(&self, external_ssrc_map: HashMap<u32, u32>) {
        self.state.lock().unwrap().external_ssrc_map = external_ssrc_map;
    }

    /// Parses an `ssrc-map` (§6): textual decimal master-SSRC keys mapped
    /// to a preferred RTX SSRC, the shape this configuration arrives in at
    /// the element boundary. Validated before anything is installed, per
    /// §7's "configuration parse failure at boundary: fail-fast".
    pub fn set_ssrc_map_from_config(&self, entries: &HashMap<String, u32>) -> Result<(), RtxError> {
        let mut parsed = HashMap::with_capacity(entries.len());
        for (key, &preferred_rtx_ssrc) in entries {
            let master: u32 = key
                .parse()
                .map_err(|_| RtxError::InvalidSsrcMapEntry { key: key.clone() })?;
            parsed.insert(master, preferred_rtx_ssrc);
        }
        self.set_ssrc_map(parsed);
        Ok(())
    }

    /// Ingests a master packet. Returns the packets to emit downstream, in
    /// order: any detached pending RTX packets first, then the original
    /// packet last, matching §4.1 and scenario 1 of §8.
    pub fn on_master_packet(&self, buf: Bytes) -> Result<Vec<Bytes>, RtxError> {
        let view = RtpView::parse(&buf)?;
        let ssrc = view.ssrc();
        let seqnum = view.sequence_number();
        let timestamp = view.timestamp();
        let pt = view.payload_type();

        let detached = {
            let mut state = self.state.lock().unwrap();
            state.pt_map.apply_pending();

            if let Some(rtx_pt) = state.pt_map.live.rtx_pt_for(pt) {
                let max_attempts = self.cfg.max_ssrc_choice_attempts;
                match state.ensure_ssrc_data(ssrc, max_attempts) {
                    Some(data) => {
                        data.history.push_back(HistoryEntry {
                            seqnum,
                            timestamp,
                            original_pt: pt,
                            buf: buf.clone(),
                        });
                        let mut i = data.history.len();
                        while i > 1
                            && seq_cmp(data.history[i - 2].seqnum, data.history[i - 1].seqnum)
                                == std::cmp::Ordering::Greater
                        {
                            data.history.swap(i - 2, i - 1);
                            i -= 1;
                        }
                        trace!(
                            "sender: stored master seq={} ssrc={:#x} pt={} (rtx_pt={})",
                            seqnum, ssrc, pt, rtx_pt
                        );
                    }
                    None => {
                        error!(
                            "sender: exhausted {} attempts choosing an rtx_ssrc for master={:#x}",
                            max_attempts, ssrc
                        );
                    }
                }
                state.evict(ssrc, &self.cfg);
            } else {
                trace!("sender: pt={} not in payload-type map, forwarding only", pt);
            }

            // Resolve each pending entry's rtx_ssrc/rtx_seq/rtx_pt from
            // current state while still holding the lock, immediately
            // before detaching — never at request time, so an intervening
            // collision rotation (§4.1 on_collision_event) is reflected in
            // what actually gets emitted.
            let mut resolved = Vec::with_capacity(state.pending.len());
            for pending in std::mem::take(&mut state.pending) {
                let Some(data) = state.ssrc_data.get_mut(&pending.master_ssrc) else {
                    warn!(
                        "sender: dropping queued rtx for master={:#x}: entry evicted before emission",
                        pending.master_ssrc
                    );
                    continue;
                };
                let rtx_ssrc = data.rtx_ssrc;
                let rtx_seq = data.next_rtx_seqnum;
                data.next_rtx_seqnum = data.next_rtx_seqnum.wrapping_add(1);
                let rtx_pt = state
                    .pt_map
                    .live
                    .rtx_pt_for(pending.original_pt)
                    .filter(|pt| *pt >= 96)
                    .unwrap_or(pending.original_pt.wrapping_add(1));
                resolved.push(ResolvedRtx {
                    original: pending.original,
                    rtx_ssrc,
                    rtx_seq,
                    rtx_pt,
                });
            }
            resolved
        };

        let mut out = Vec::with_capacity(detached.len() + 1);
        for entry in detached {
            let original_view = match RtpView::parse(&entry.original) {
                Ok(v) => v,
                Err(e) => {
                    warn!("sender: dropping unparsable history entry: {}", e);
                    continue;
                }
            };
            let rtx = build_rtx_packet(&original_view, entry.rtx_ssrc, entry.rtx_seq, entry.rtx_pt);
            out.push(rtx);
        }
        out.push(buf);
        Ok(out)
    }

    /// Handles a retransmission request arriving from the egress side. The
    /// event is always consumed; the caller never forwards it further
    /// upstream.
    pub fn on_request_event(&self, seqnum: u16, ssrc: u32) {
        let mut state = self.state.lock().unwrap();
        let Some(data) = state.ssrc_data.get(&ssrc) else {
            trace!("sender: request for unknown master ssrc={:#x} ignored", ssrc);
            return;
        };
        state.stats.num_rtx_requests += 1;

        let found = data
            .history
            .iter()
            .find(|e| e.seqnum == seqnum)
            .cloned();

        let Some(entry) = found else {
            debug!("sender: request seq={} ssrc={:#x}: not in history", seqnum, ssrc);
            return;
        };

        debug!("sender: request seq={} ssrc={:#x} matched, queuing for emission", seqnum, ssrc);

        state.pending.push_back(PendingRtx {
            master_ssrc: ssrc,
            original: entry.buf,
            original_pt: entry.original_pt,
        });
        state.stats.num_rtx_packets += 1;
    }

    /// Handles an SSRC collision notice. Returns `true` if the event was
    /// consumed (an RTX SSRC rotated), `false` if it should be forwarded
    /// upstream unchanged (a master SSRC collided and its entry was
    /// evicted).
    pub fn on_collision_event(&self, ssrc: u32) -> bool {
        let mut state = self.state.lock().unwrap();

        if let Some(&master) = state.rtx_ssrcs.get(&ssrc) {
            let new_rtx_ssrc =
                match state.choose_rtx_ssrc(master, self.cfg.max_ssrc_choice_attempts) {
                    Some(s) => s,
                    None => {
                        error!("sender: could not rotate rtx_ssrc for master={:#x}", master);
                        return true;
                    }
                };
            state.rtx_ssrcs.remove(&ssrc);
            state.rtx_ssrcs.insert(new_rtx_ssrc, master);
            if let Some(data) = state.ssrc_data.get_mut(&master) {
                data.rtx_ssrc = new_rtx_ssrc;
            }
            debug!(
                "sender: rotated rtx_ssrc {:#x} -> {:#x} for master={:#x}",
                ssrc, new_rtx_ssrc, master
            );
            return true;
        }

        if state.ssrc_data.remove(&ssrc).is_some() {
            state.rtx_ssrcs.retain(|_, m| *m != ssrc);
            debug!("sender: master ssrc={:#x} collided, entry evicted", ssrc);
        }
        false
    }

    /// Records clock rate learned from caps, per §4.1.
    pub fn on_caps(&self, ssrc: u32, clock_rate: i32) {
        let mut state = self.state.lock().unwrap();
        if let Some(data) = state.ensure_ssrc_data(ssrc, self.cfg.max_ssrc_choice_attempts) {
            data.clock_rate = Some(clock_rate);
        }
    }

    pub fn reset(&self) {
        *self.state.lock().unwrap() = SenderState::new();
    }

    pub fn stats(&self) -> SenderStats {
        self.state.lock().unwrap().stats
    }

    /// Convenience entry point taking the wire-shaped event type (§6).
    pub fn handle_request(&self, event: RetransmissionRequest) {
        self.on_request_event(event.seqnum as u16, event.ssrc);
    }

    /// Convenience entry point taking the wire-shaped event type (§6).
    /// See [`Sender::on_collision_event`] for the consumed/forward contract.
    pub fn handle_collision(&self, event: Collision) -> bool {
        self.on_collision_event(event.ssrc)
    }

    /// Convenience entry point taking the wire-shaped event type (§6).
    pub fn handle_caps(&self, event: ClockRate) {
        self.on_caps(event.ssrc, event.clock_rate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PtMap;
    use byteorder::{BigEndian, ByteOrder};

    fn packet(ssrc: u32, seq: u16, ts: u32, pt: u8) -> Bytes {
        let mut buf = vec![0u8; 12];
        buf[0] = 0x80;
        buf[1] = pt;
        BigEndian::write_u16(&mut buf[2..4], seq);
        BigEndian::write_u32(&mut buf[4..8], ts);
        BigEndian::write_u32(&mut buf[8..12], ssrc);
        Bytes::from(buf)
    }

    fn sender_with_map() -> Sender {
        let sender = Sender::new(SenderConfig::builder().max_history(4).build());
        sender.set_payload_type_map(PtMap::builder().map(96, 97).build().unwrap());
        sender
    }

    #[test]
    fn basic_retransmit_scenario() {
        let sender = sender_with_map();
        let ssrc = 0xAAAA;

        for seq in 10u16..=12 {
            let out = sender
                .on_master_packet(packet(ssrc, seq, seq as u32 * 160, 96))
                .unwrap();
            assert_eq!(out.len(), 1);
        }

        sender.on_request_event(11, ssrc);

        let out = sender.on_master_packet(packet(ssrc, 13, 13 * 160, 96)).unwrap();
        assert_eq!(out.len(), 2);
        let rtx_view = RtpView::parse(&out[0]).unwrap();
        assert_eq!(&rtx_view.payload()[..2], &11u16.to_be_bytes());
        assert_eq!(rtx_view.payload_type(), 97);

        let original_view = RtpView::parse(&out[1]).unwrap();
        assert_eq!(original_view.sequence_number(), 13);

        let stats = sender.stats();
        assert_eq!(stats.num_rtx_requests, 1);
        assert_eq!(stats.num_rtx_packets, 1);
    }

    #[test]
    fn unknown_seqnum_emits_nothing() {
        let sender = sender_with_map();
        let ssrc = 0xAAAA;
        sender.on_master_packet(packet(ssrc, 1, 0, 96)).unwrap();
        sender.on_request_event(99, ssrc);
        let stats = sender.stats();
        assert_eq!(stats.num_rtx_requests, 1);
        assert_eq!(stats.num_rtx_packets, 0);
    }

    #[test]
    fn history_eviction_by_count() {
        let sender = Sender::new(SenderConfig::builder().max_history(2).build());
        sender.set_payload_type_map(PtMap::builder().map(96, 97).build().unwrap());
        let ssrc = 0xAAAA;
        for seq in 1u16..=5 {
            sender.on_master_packet(packet(ssrc, seq, 0, 96)).unwrap();
        }
        sender.on_request_event(1, ssrc);
        assert_eq!(sender.stats().num_rtx_packets, 0);
        sender.on_request_event(4, ssrc);
        assert_eq!(sender.stats().num_rtx_packets, 1);
    }

    #[test]
    fn collision_on_rtx_ssrc_rotates() {
        let sender = sender_with_map();
        let ssrc = 0xAAAA;
        sender.on_master_packet(packet(ssrc, 1, 0, 96)).unwrap();
        let old_rtx_ssrc = {
            let state = sender.state.lock().unwrap();
            state.ssrc_data.get(&ssrc).unwrap().rtx_ssrc
        };
        let consumed = sender.on_collision_event(old_rtx_ssrc);
        assert!(consumed);
        let new_rtx_ssrc = {
            let state = sender.state.lock().unwrap();
            state.ssrc_data.get(&ssrc).unwrap().rtx_ssrc
        };
        assert_ne!(old_rtx_ssrc, new_rtx_ssrc);
    }

    #[test]
    fn collision_rotation_between_request_and_emission_is_honored() {
        // A request queues an rtx against whatever rtx_ssrc is live *right
        // now*. If a collision rotates that ssrc before the next master
        // packet triggers detachment, the emitted rtx must use the new
        // ssrc, not the one that was live at request time.
        let sender = sender_with_map();
        let ssrc = 0xAAAA;
        sender.on_master_packet(packet(ssrc, 1, 0, 96)).unwrap();

        let old_rtx_ssrc = {
            let state = sender.state.lock().unwrap();
            state.ssrc_data.get(&ssrc).unwrap().rtx_ssrc
        };

        sender.on_request_event(1, ssrc);

        let consumed = sender.on_collision_event(old_rtx_ssrc);
        assert!(consumed, "collision on the rtx ssrc is consumed");

        let out = sender.on_master_packet(packet(ssrc, 2, 0, 96)).unwrap();
        assert_eq!(out.len(), 2, "one rtx plus the new master packet");

        let rtx_view = RtpView::parse(&out[0]).unwrap();
        assert_ne!(
            rtx_view.ssrc(),
            old_rtx_ssrc,
            "rtx must be emitted on the rotated ssrc, not the stale one"
        );

        let new_rtx_ssrc = {
            let state = sender.state.lock().unwrap();
            state.ssrc_data.get(&ssrc).unwrap().rtx_ssrc
        };
        assert_eq!(rtx_view.ssrc(), new_rtx_ssrc);
    }

    #[test]
    fn collision_on_master_ssrc_evicts_and_forwards() {
        let sender = sender_with_map();
        let ssrc = 0xAAAA;
        sender.on_master_packet(packet(ssrc, 1, 0, 96)).unwrap();
        let consumed = sender.on_collision_event(ssrc);
        assert!(!consumed);
        assert!(sender.state.lock().unwrap().ssrc_data.get(&ssrc).is_none());
    }

    #[test]
    fn ssrc_map_from_config_parses_textual_keys() {
        let sender = sender_with_map();
        let mut entries = HashMap::new();
        entries.insert("43690".to_string(), 0xBEEFu32); // 43690 == 0xAAAA
        sender.set_ssrc_map_from_config(&entries).unwrap();

        sender.on_master_packet(packet(0xAAAA, 1, 0, 96)).unwrap();
        let rtx_ssrc = sender.state.lock().unwrap().ssrc_data.get(&0xAAAA).unwrap().rtx_ssrc;
        assert_eq!(rtx_ssrc, 0xBEEF);
    }

    #[test]
    fn ssrc_map_from_config_rejects_non_decimal_key() {
        let sender = sender_with_map();
        let mut entries = HashMap::new();
        entries.insert("not-a-number".to_string(), 0xBEEFu32);
        let err = sender.set_ssrc_map_from_config(&entries).unwrap_err();
        assert!(matches!(err, RtxError::InvalidSsrcMapEntry { .. }));
    }

    #[test]
    fn reset_clears_state() {
        let sender = sender_with_map();
        sender.on_master_packet(packet(0xAAAA, 1, 0, 96)).unwrap();
        sender.reset();
        let stats = sender.stats();
        assert_eq!(stats, SenderStats::default());
        assert!(sender.state.lock().unwrap().ssrc_data.is_empty());
    }
}

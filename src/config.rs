//! Configuration surface for both cores: the payload-type map and the
//! per-core limits, validated up front so the hot path never has to.
//!
//! The live/pending split on [`PtMapState`] exists so a config update never
//! blocks a packet in flight: the write side builds the next map off to the
//! side and swaps it in under the lock, mirroring the deferred-swap pattern
//! the sender and receiver cores both use for their pending RTX queues.

use std::collections::HashMap;

use crate::error::RtxError;

fn validate_pt(value: u8) -> Result<(), RtxError> {
    if value > 127 {
        return Err(RtxError::InvalidPayloadType {
            value: value as u16,
        });
    }
    Ok(())
}

/// Maps an original payload type to the payload type used for its RTX
/// stream, and back. Built once at config time, consulted on every packet.
#[derive(Debug, Clone, Default)]
pub struct PtMap {
    original_to_rtx: HashMap<u8, u8>,
    rtx_to_original: HashMap<u8, u8>,
}

impl PtMap {
    pub fn builder() -> PtMapBuilder {
        PtMapBuilder::default()
    }

    /// Parses a `payload-type-map` (§6): textual decimal PT keys mapped to
    /// unsigned PT values, the shape configuration actually arrives in at
    /// the element boundary. This is the "typed map parsed once at set
    /// time, validated" replacement (§9) for the original's runtime-typed
    /// structure; the programmatic [`PtMap::builder`] above is for callers
    /// that already have typed values (e.g. this crate's own tests).
    pub fn from_config(entries: &HashMap<String, u32>) -> Result<PtMap, RtxError> {
        let mut builder = PtMap::builder();
        for (key, &value) in entries {
            let original_pt: u8 = key
                .parse()
                .map_err(|_| RtxError::InvalidPtMapEntry { key: key.clone() })?;
            let rtx_pt =
                u8::try_from(value).map_err(|_| RtxError::InvalidPayloadType { value: value as u16 })?;
            builder = builder.map(original_pt, rtx_pt);
        }
        builder.build()
    }

    pub fn rtx_pt_for(&self, original_pt: u8) -> Option<u8> {
        self.original_to_rtx.get(&original_pt).copied()
    }

    pub fn original_pt_for(&self, rtx_pt: u8) -> Option<u8> {
        self.rtx_to_original.get(&rtx_pt).copied()
    }
}

#[derive(Debug, Default)]
pub struct PtMapBuilder {
    entries: Vec<(u8, u8)>,
}

impl PtMapBuilder {
    pub fn map(mut self, original_pt: u8, rtx_pt: u8) -> Self {
        self.entries.push((original_pt, rtx_pt));
        self
    }

    pub fn build(self) -> Result<PtMap, RtxError> {
        let mut original_to_rtx = HashMap::with_capacity(self.entries.len());
        let mut rtx_to_original = HashMap::with_capacity(self.entries.len());
        for (original_pt, rtx_pt) in self.entries {
            validate_pt(original_pt)?;
            validate_pt(rtx_pt)?;
            original_to_rtx.insert(original_pt, rtx_pt);
            rtx_to_original.insert(rtx_pt, original_pt);
        }
        Ok(PtMap {
            original_to_rtx,
            rtx_to_original,
        })
    }
}

/// Holds the map currently in effect (`live`) plus, briefly, a map that has
/// been validated and is waiting to be swapped in. Both cores keep exactly
/// one of these behind their coarse mutex.
#[derive(Debug, Clone, Default)]
pub struct PtMapState {
    pub live: PtMap,
    pending: Option<PtMap>,
}

impl PtMapState {
    /// Stages `map` for the next time the holder of the lock chooses to
    /// apply it. Kept separate from `live` so an in-flight lookup started
    /// before the update always sees a consistent map.
    pub fn stage(&mut self, map: PtMap) {
        self.pending = Some(map);
    }

    /// Swaps `pending` into `live` if one was staged. Called by the core at
    /// a point where it already holds the lock for other reasons (e.g. at
    /// the top of `on_master_packet`), matching the deferred pt-map swap the
    /// original element performs on its chain function.
    pub fn apply_pending(&mut self) {
        if let Some(map) = self.pending.take() {
            self.live = map;
        }
    }
}

/// Sender core configuration. `max_history` and `max_history_duration_ms`
/// are both enforced; a packet is evicted from the history queue once
/// either bound is exceeded, whichever happens first.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub max_history: usize,
    pub max_history_duration_ms: u32,
    pub max_ssrc_choice_attempts: u32,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            max_history: 100,
            max_history_duration_ms: 0,
            max_ssrc_choice_attempts: 32,
        }
    }
}

impl SenderConfig {
    pub fn builder() -> SenderConfigBuilder {
        SenderConfigBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct SenderConfigBuilder {
    max_history: Option<usize>,
    max_history_duration_ms: Option<u32>,
    max_ssrc_choice_attempts: Option<u32>,
}

impl SenderConfigBuilder {
    pub fn max_history(mut self, n: usize) -> Self {
        self.max_history = Some(n);
        self
    }

    pub fn max_history_duration_ms(mut self, ms: u32) -> Self {
        self.max_history_duration_ms = Some(ms);
        self
    }

    pub fn max_ssrc_choice_attempts(mut self, attempts: u32) -> Self {
        self.max_ssrc_choice_attempts = Some(attempts);
        self
    }

    pub fn build(self) -> SenderConfig {
        let default = SenderConfig::default();
        SenderConfig {
            max_history: self.max_history.unwrap_or(default.max_history),
            max_history_duration_ms: self
                .max_history_duration_ms
                .unwrap_or(default.max_history_duration_ms),
            max_ssrc_choice_attempts: self
                .max_ssrc_choice_attempts
                .unwrap_or(default.max_ssrc_choice_attempts),
        }
    }
}

/// Receiver core configuration. The receiver has no tunables of its own
/// beyond the common payload-type map (see [`PtMapState`]); this struct
/// exists so the receiver's construction matches the sender's builder-style
/// entry point and so a future receiver-only setting has somewhere to land.
#[derive(Debug, Clone, Default)]
pub struct ReceiverConfig {}

impl ReceiverConfig {
    pub fn builder() -> ReceiverConfigBuilder {
        ReceiverConfigBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct ReceiverConfigBuilder {}

impl ReceiverConfigBuilder {
    pub fn build(self) -> ReceiverConfig {
        ReceiverConfig {}
    }
}

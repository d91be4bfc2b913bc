//! Per-channel and per-node PHY statistics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use threadsim_common::{ChannelId, NodeId, SimTime};

/// Running totals for a single channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStats {
    /// Total µs during which at least one node transmitted on the channel.
    pub busy_time_us: u64,
    /// Number of frames transmitted on the channel.
    pub frame_count: u64,
}

/// Per-node PHY counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhyStats {
    pub tx_frames: u64,
    pub tx_bytes: u64,
    pub rx_frames: u64,
    pub rx_bytes: u64,
}

impl PhyStats {
    /// Difference of two snapshots, for windowed reporting.
    pub fn minus(&self, earlier: &PhyStats) -> PhyStats {
        PhyStats {
            tx_frames: self.tx_frames - earlier.tx_frames,
            tx_bytes: self.tx_bytes - earlier.tx_bytes,
            rx_frames: self.rx_frames - earlier.rx_frames,
            rx_bytes: self.rx_bytes - earlier.rx_bytes,
        }
    }
}

/// Busy-time accumulator for all channels.
///
/// When a channel's transmitter set transitions 0 -> 1 the start time is
/// recorded; on the 1 -> 0 transition the elapsed time is added to the busy
/// total.
#[derive(Debug, Default)]
pub struct ChannelStatsAccumulator {
    stats: BTreeMap<ChannelId, ChannelStats>,
    busy_since: BTreeMap<ChannelId, SimTime>,
}

impl ChannelStatsAccumulator {
    pub fn on_channel_busy(&mut self, ch: ChannelId, now: SimTime) {
        self.busy_since.entry(ch).or_insert(now);
    }

    pub fn on_channel_idle(&mut self, ch: ChannelId, now: SimTime) {
        if let Some(start) = self.busy_since.remove(&ch) {
            let entry = self.stats.entry(ch).or_default();
            entry.busy_time_us += now.saturating_sub(start);
        }
    }

    pub fn on_frame(&mut self, ch: ChannelId) {
        self.stats.entry(ch).or_default().frame_count += 1;
    }

    pub fn get(&self, ch: ChannelId) -> ChannelStats {
        self.stats.get(&ch).copied().unwrap_or_default()
    }

    /// All channels with any recorded activity, ascending.
    pub fn channels(&self) -> impl Iterator<Item = (ChannelId, ChannelStats)> + '_ {
        self.stats.iter().map(|(c, s)| (*c, *s))
    }
}

/// Map of per-node PHY stats.
pub type PhyStatsMap = BTreeMap<NodeId, PhyStats>;

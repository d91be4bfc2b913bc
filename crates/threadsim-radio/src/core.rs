//! State shared by all radio model engines: the node records, per-channel
//! transmitter and sampler sets, and the statistics accumulators.

use std::collections::{BTreeMap, BTreeSet};

use threadsim_common::{
    ChannelId, DbValue, NodeId, SimTime, RSSI_INVALID, RSSI_MINUS_INFINITY, UNDEFINED_DB_VALUE,
};

use crate::{
    compute_rssi, ChannelStatsAccumulator, PhyStats, PhyStatsMap, RadioModelParams, RadioNode,
    ShadowFading,
};

#[derive(Debug)]
pub(crate) struct ModelCore {
    pub params: RadioModelParams,
    pub nodes: BTreeMap<NodeId, RadioNode>,
    /// For each channel, the set of nodes currently transmitting. A node
    /// appears in at most one channel's set at a time.
    pub active_transmitters: BTreeMap<ChannelId, BTreeSet<NodeId>>,
    /// For each channel, the set of nodes running an energy-detect sample.
    pub active_samplers: BTreeMap<ChannelId, BTreeSet<NodeId>>,
    pub stats: ChannelStatsAccumulator,
    pub phy: PhyStatsMap,
    pub fading: ShadowFading,
}

impl ModelCore {
    pub fn new(params: RadioModelParams, seed: u64) -> Self {
        ModelCore {
            params,
            nodes: BTreeMap::new(),
            active_transmitters: BTreeMap::new(),
            active_samplers: BTreeMap::new(),
            stats: ChannelStatsAccumulator::default(),
            phy: PhyStatsMap::new(),
            fading: ShadowFading::new(seed),
        }
    }

    pub fn add_node(&mut self, node: RadioNode) {
        self.phy.entry(node.id).or_default();
        self.nodes.insert(node.id, node);
    }

    /// Removes a node and purges it from every transmitter and sampler set,
    /// closing the channel busy window if it was the last transmitter.
    pub fn delete_node(&mut self, id: NodeId, now: SimTime) {
        self.nodes.remove(&id);
        for (ch, set) in self.active_transmitters.iter_mut() {
            if set.remove(&id) && set.is_empty() {
                self.stats.on_channel_idle(*ch, now);
            }
        }
        for set in self.active_samplers.values_mut() {
            set.remove(&id);
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&RadioNode> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut RadioNode> {
        self.nodes.get_mut(&id)
    }

    pub fn is_transmitting(&self, id: NodeId, ch: ChannelId) -> bool {
        self.active_transmitters
            .get(&ch)
            .is_some_and(|s| s.contains(&id))
    }

    pub fn is_sampling(&self, id: NodeId, ch: ChannelId) -> bool {
        self.active_samplers
            .get(&ch)
            .is_some_and(|s| s.contains(&id))
    }

    /// Registers `id` as transmitting on `ch`; opens the channel busy window
    /// on the 0 -> 1 transition.
    pub fn tx_register(&mut self, id: NodeId, ch: ChannelId, now: SimTime) {
        let set = self.active_transmitters.entry(ch).or_default();
        if set.is_empty() {
            self.stats.on_channel_busy(ch, now);
        }
        let inserted = set.insert(id);
        debug_assert!(inserted, "node {id} already in transmitter set of {ch}");
    }

    /// Unregisters `id` from `ch`; closes the busy window on 1 -> 0 and
    /// counts the finished frame.
    pub fn tx_unregister(&mut self, id: NodeId, ch: ChannelId, now: SimTime) {
        let set = self.active_transmitters.entry(ch).or_default();
        let removed = set.remove(&id);
        debug_assert!(removed, "node {id} missing from transmitter set of {ch}");
        if set.is_empty() {
            self.stats.on_channel_idle(ch, now);
        }
        self.stats.on_frame(ch);
    }

    pub fn sampler_register(&mut self, id: NodeId, ch: ChannelId) {
        self.active_samplers.entry(ch).or_default().insert(id);
    }

    pub fn sampler_unregister(&mut self, id: NodeId, ch: ChannelId) {
        self.active_samplers.entry(ch).or_default().remove(&id);
    }

    /// Noiseless RSSI of a transmission from `src` as heard by `dst`, or
    /// `RSSI_MINUS_INFINITY` when undetectable (outside the disc, or below
    /// the receiver's sensitivity). `RSSI_INVALID` for unknown nodes.
    pub fn get_tx_rssi(&self, src: NodeId, dst: NodeId) -> DbValue {
        debug_assert_ne!(src, dst);
        let (Some(s), Some(d)) = (self.nodes.get(&src), self.nodes.get(&dst)) else {
            return RSSI_INVALID;
        };
        let dist = s.distance_to(d);
        if self.params.is_disc_limit && dist > s.radio_range {
            return RSSI_MINUS_INFINITY;
        }
        let sf = self.fading.compute(s.position(), d.position(), &self.params);
        let rssi = compute_rssi(dist, s.tx_power, sf, &self.params);
        if rssi < d.rx_sensitivity {
            return RSSI_MINUS_INFINITY;
        }
        rssi
    }

    /// Peak energy currently detectable by `node` on `ch`: the ambient noise
    /// floor or the strongest active transmitter, whichever is higher.
    pub fn rssi_on_channel(&self, node: NodeId, ch: ChannelId) -> DbValue {
        let mut max = if self.params.noise_floor_dbm != UNDEFINED_DB_VALUE {
            self.params.noise_floor_dbm
        } else {
            RSSI_MINUS_INFINITY
        };
        if let Some(set) = self.active_transmitters.get(&ch) {
            for &tx in set {
                if tx == node {
                    continue;
                }
                let rssi = self.get_tx_rssi(tx, node);
                if rssi != RSSI_INVALID && rssi > max {
                    max = rssi;
                }
            }
        }
        max
    }

    /// Begins an energy-detect sample: registers the sampler and takes the
    /// immediate first sample.
    pub fn sample_begin(&mut self, id: NodeId, ch: ChannelId) {
        self.sampler_register(id, ch);
        let first = self.rssi_on_channel(id, ch);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.set_channel(ch);
            node.rssi_sample_max = first;
        }
    }

    /// Ends the sample window and returns the peak RSSI observed.
    pub fn sample_finish(&mut self, id: NodeId) -> DbValue {
        let Some(ch) = self.nodes.get(&id).map(|n| n.channel) else {
            return RSSI_MINUS_INFINITY;
        };
        let last = self.rssi_on_channel(id, ch);
        self.sampler_unregister(id, ch);
        let node = self.nodes.get_mut(&id).expect("sampler node exists");
        let peak = node.rssi_sample_max.max(last);
        node.rssi_sample_max = RSSI_MINUS_INFINITY;
        peak
    }

    /// Feeds a freshly started transmission into every active sampler on the
    /// same channel.
    pub fn update_samplers_on_tx(&mut self, src: NodeId, ch: ChannelId) {
        let samplers: Vec<NodeId> = self
            .active_samplers
            .get(&ch)
            .map(|s| s.iter().copied().filter(|&id| id != src).collect())
            .unwrap_or_default();
        for id in samplers {
            let rssi = self.get_tx_rssi(src, id);
            if rssi == RSSI_INVALID {
                continue;
            }
            if let Some(node) = self.nodes.get_mut(&id) {
                if rssi > node.rssi_sample_max {
                    node.rssi_sample_max = rssi;
                }
            }
        }
    }

    pub fn phy_stats(&self, id: NodeId) -> PhyStats {
        self.phy.get(&id).copied().unwrap_or_default()
    }

    pub fn count_tx_frame(&mut self, id: NodeId, bytes: usize) {
        let s = self.phy.entry(id).or_default();
        s.tx_frames += 1;
        s.tx_bytes += bytes as u64;
    }

    pub fn count_rx_frame(&mut self, id: NodeId, bytes: usize) {
        let s = self.phy.entry(id).or_default();
        s.rx_frames += 1;
        s.rx_bytes += bytes as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use threadsim_common::NodeConfig;

    fn core_with_nodes(params: RadioModelParams, positions: &[(f64, f64)]) -> ModelCore {
        let mut core = ModelCore::new(params, 42);
        for (i, (x, y)) in positions.iter().enumerate() {
            let cfg = NodeConfig {
                x: *x,
                y: *y,
                radio_range: 250.0,
                ..Default::default()
            };
            core.add_node(RadioNode::new(i as NodeId + 1, &cfg));
        }
        core
    }

    #[test]
    fn transmitter_set_transitions_drive_stats() {
        let mut core = core_with_nodes(RadioModelParams::ideal(), &[(0.0, 0.0), (10.0, 0.0)]);
        core.tx_register(1, 11, 1000);
        core.tx_register(2, 11, 1200);
        core.tx_unregister(1, 11, 1500);
        core.tx_unregister(2, 11, 2000);
        assert_eq!(core.stats.get(11).busy_time_us, 1000);
        assert_eq!(core.stats.get(11).frame_count, 2);
    }

    #[test]
    fn delete_node_purges_sets() {
        let mut core = core_with_nodes(RadioModelParams::ideal(), &[(0.0, 0.0), (10.0, 0.0)]);
        core.tx_register(1, 11, 0);
        core.sampler_register(1, 11);
        core.delete_node(1, 500);
        assert!(!core.is_transmitting(1, 11));
        assert!(!core.is_sampling(1, 11));
        assert_eq!(core.stats.get(11).busy_time_us, 500);
    }

    #[test]
    fn rssi_on_channel_tracks_strongest_transmitter() {
        let mut core = core_with_nodes(
            RadioModelParams::ideal(),
            &[(0.0, 0.0), (100.0, 0.0), (200.0, 0.0)],
        );
        // Nothing transmitting and no noise floor configured.
        assert_eq!(core.rssi_on_channel(1, 11), RSSI_MINUS_INFINITY);
        core.tx_register(2, 11, 0);
        assert_eq!(core.rssi_on_channel(1, 11), -60.0);
        // A node does not hear itself.
        assert_eq!(core.rssi_on_channel(2, 11), RSSI_MINUS_INFINITY);
    }
}

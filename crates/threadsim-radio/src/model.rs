//! The radio model variants behind one operation set.

use threadsim_common::{DbValue, NodeConfig, NodeId, SimTime};
use threadsim_event::{Event, EventQueue, RfSimParam};

use crate::{
    ChannelStats, PhyStats, RadioModelIdeal, RadioModelMutualInterference, RadioModelParams,
    RadioNode,
};

/// A radio model variant, selected by name. All variants implement the same
/// operation set; nodes are referenced by integer id only.
#[derive(Debug)]
pub enum RadioModel {
    Ideal(RadioModelIdeal),
    MutualInterference(RadioModelMutualInterference),
}

impl RadioModel {
    /// Creates a radio model by name (or its short alias), or `None` for an
    /// unknown name. `seed` drives shadow fading and frame-corruption draws.
    pub fn create(name: &str, seed: u64) -> Option<RadioModel> {
        let model = match name {
            "Ideal" | "I" | "1" => {
                RadioModel::Ideal(RadioModelIdeal::new("Ideal", RadioModelParams::ideal(), seed))
            }
            "Ideal_Rssi" | "IR" | "2" | "default" => RadioModel::Ideal(RadioModelIdeal::new(
                "Ideal_Rssi",
                RadioModelParams::itu_indoor(),
                seed,
            )),
            "MutualInterference" | "MI" | "M" | "3" => {
                RadioModel::MutualInterference(RadioModelMutualInterference::new(
                    "MutualInterference",
                    RadioModelParams::indoor_3gpp(),
                    seed,
                ))
            }
            "MIDisc" | "MID" | "4" => {
                let mut params = RadioModelParams::indoor_3gpp();
                params.is_disc_limit = true;
                RadioModel::MutualInterference(RadioModelMutualInterference::new(
                    "MIDisc", params, seed,
                ))
            }
            "Outdoor" | "5" => RadioModel::MutualInterference(RadioModelMutualInterference::new(
                "Outdoor",
                RadioModelParams::outdoor(),
                seed,
            )),
            _ => return None,
        };
        Some(model)
    }

    /// Names accepted by [`RadioModel::create`], for CLI help output.
    pub fn model_names() -> &'static [&'static str] {
        &["Ideal", "Ideal_Rssi", "MutualInterference", "MIDisc", "Outdoor"]
    }

    pub fn name(&self) -> &'static str {
        match self {
            RadioModel::Ideal(m) => m.name(),
            RadioModel::MutualInterference(m) => m.name(),
        }
    }

    /// Registers a new node with the model.
    pub fn add_node(&mut self, id: NodeId, cfg: &NodeConfig) {
        let node = RadioNode::new(id, cfg);
        match self {
            RadioModel::Ideal(m) => m.add_node(node),
            RadioModel::MutualInterference(m) => m.add_node(node),
        }
    }

    /// Removes a node from the model and from every transmitter/interferer
    /// set.
    pub fn delete_node(&mut self, id: NodeId, now: SimTime) {
        match self {
            RadioModel::Ideal(m) => m.delete_node(id, now),
            RadioModel::MutualInterference(m) => m.delete_node(id, now),
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&RadioNode> {
        self.core().node(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut RadioNode> {
        self.core_mut().node_mut(id)
    }

    /// Fast predicate: can `src` reach `dst` with non-zero probability.
    pub fn check_radio_reachable(&self, src: NodeId, dst: NodeId) -> bool {
        match self {
            RadioModel::Ideal(m) => m.check_radio_reachable(src, dst),
            RadioModel::MutualInterference(m) => m.check_radio_reachable(src, dst),
        }
    }

    /// Noiseless RSSI at `dst` for a single transmission from `src`.
    pub fn get_tx_rssi(&self, src: NodeId, dst: NodeId) -> DbValue {
        match self {
            RadioModel::Ideal(m) => m.get_tx_rssi(src, dst),
            RadioModel::MutualInterference(m) => m.get_tx_rssi(src, dst),
        }
    }

    /// Consumes a radio event from the queue and schedules its follow-ons.
    pub fn handle_event(&mut self, q: &mut dyn EventQueue, evt: &Event) {
        match self {
            RadioModel::Ideal(m) => m.handle_event(q, evt),
            RadioModel::MutualInterference(m) => m.handle_event(q, evt),
        }
    }

    /// Per-receiver interlock called by the dispatcher before delivering a
    /// radio event from `src` to `dst`. May rewrite the event's RSSI, mark
    /// it corrupted, or veto delivery by returning false.
    pub fn on_event_dispatch(&mut self, src: NodeId, dst: NodeId, evt: &mut Event) -> bool {
        match self {
            RadioModel::Ideal(m) => m.on_event_dispatch(src, dst, evt),
            RadioModel::MutualInterference(m) => m.on_event_dispatch(src, dst, evt),
        }
    }

    /// Batch hook invoked after every equal-timestamp delivery batch.
    /// Present for model-side precomputation; the current models keep their
    /// per-link state lazily.
    pub fn on_next_event_time(&mut self, _now: SimTime) {}

    pub fn params(&self) -> &RadioModelParams {
        &self.core().params
    }

    pub fn params_mut(&mut self) -> &mut RadioModelParams {
        &mut self.core_mut().params
    }

    pub fn channel_stats(&self, ch: u8) -> ChannelStats {
        self.core().stats.get(ch)
    }

    /// Channels with recorded activity, ascending.
    pub fn active_channels(&self) -> Vec<(u8, ChannelStats)> {
        self.core().stats.channels().collect()
    }

    pub fn node_phy_stats(&self, id: NodeId) -> PhyStats {
        self.core().phy_stats(id)
    }

    /// Writes a per-node RF parameter (rfsim-param-set, or operator command).
    pub fn set_node_param(&mut self, id: NodeId, param: RfSimParam, value: i32) -> bool {
        let Some(node) = self.core_mut().node_mut(id) else {
            return false;
        };
        match param {
            RfSimParam::RxSensitivity => node.rx_sensitivity = value as DbValue,
            RfSimParam::CcaThreshold => node.cca_ed_threshold = value as DbValue,
            RfSimParam::CslAccuracy => node.csl_accuracy_ppm = value,
            RfSimParam::CslUncertainty => node.csl_uncertainty_10us = value,
            RfSimParam::TxPower => node.tx_power = value as DbValue,
        }
        true
    }

    /// Reads a per-node RF parameter.
    pub fn get_node_param(&self, id: NodeId, param: RfSimParam) -> Option<i32> {
        let node = self.core().node(id)?;
        let v = match param {
            RfSimParam::RxSensitivity => node.rx_sensitivity as i32,
            RfSimParam::CcaThreshold => node.cca_ed_threshold as i32,
            RfSimParam::CslAccuracy => node.csl_accuracy_ppm,
            RfSimParam::CslUncertainty => node.csl_uncertainty_10us,
            RfSimParam::TxPower => node.tx_power as i32,
        };
        Some(v)
    }

    fn core(&self) -> &crate::core::ModelCore {
        match self {
            RadioModel::Ideal(m) => &m.core,
            RadioModel::MutualInterference(m) => &m.core,
        }
    }

    fn core_mut(&mut self) -> &mut crate::core::ModelCore {
        match self {
            RadioModel::Ideal(m) => &mut m.core,
            RadioModel::MutualInterference(m) => &mut m.core,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use threadsim_common::{
        OT_ERROR_ABORT, OT_ERROR_FCS, OT_ERROR_NONE, RSSI_MINUS_INFINITY,
    };
    use threadsim_event::{EventKind, RadioCommData};

    fn add_node_at(model: &mut RadioModel, id: NodeId, x: f64, y: f64, range: f64) {
        let cfg = NodeConfig {
            x,
            y,
            radio_range: range,
            ..Default::default()
        };
        model.add_node(id, &cfg);
    }

    fn comm_start(id: NodeId, channel: u8, t: SimTime, duration: u64, psdu_len: usize) -> Event {
        let mut evt = Event::radio(
            EventKind::RadioCommStart,
            id,
            RadioCommData {
                channel,
                power_dbm: 0,
                error: OT_ERROR_NONE,
                duration,
            },
            vec![0x55; psdu_len],
        );
        evt.timestamp = t;
        evt
    }

    #[test]
    fn two_node_ideal_reachability() {
        let mut m = RadioModel::create("Ideal", 1).unwrap();
        add_node_at(&mut m, 1, 0.0, 0.0, 250.0);
        add_node_at(&mut m, 2, 200.0, 0.0, 250.0);
        assert!(m.check_radio_reachable(1, 2));
        assert!(m.check_radio_reachable(2, 1));
        assert_eq!(m.get_tx_rssi(1, 2), -60.0);
    }

    #[test]
    fn disc_limit_blocks_distant_nodes() {
        let mut m = RadioModel::create("MIDisc", 1).unwrap();
        add_node_at(&mut m, 1, 0.0, 0.0, 220.0);
        add_node_at(&mut m, 2, 500.0, 0.0, 220.0);
        assert_eq!(m.get_tx_rssi(1, 2), RSSI_MINUS_INFINITY);
        assert!(!m.check_radio_reachable(1, 2));
    }

    #[test]
    fn unknown_model_name_is_rejected() {
        assert!(RadioModel::create("NoSuchModel", 1).is_none());
        for name in RadioModel::model_names() {
            assert!(RadioModel::create(name, 1).is_some());
        }
    }

    #[test]
    fn self_collision_aborts_the_frame_at_receivers() {
        let mut m = RadioModel::create("MutualInterference", 1).unwrap();
        add_node_at(&mut m, 1, 0.0, 0.0, 220.0);
        add_node_at(&mut m, 2, 50.0, 0.0, 220.0);
        m.node_mut(2).unwrap().set_channel(15);

        let mut q: Vec<Event> = Vec::new();
        let duration = 4256;
        m.handle_event(&mut q, &comm_start(1, 15, 1000, duration, 128));

        // Mid-frame, node 1 requests a second transmission.
        let second = comm_start(1, 15, 1000 + duration / 2, duration, 128);
        m.handle_event(&mut q, &second);
        let bounce = q
            .iter()
            .find(|e| e.kind == EventKind::RadioTxDone && e.must_dispatch)
            .expect("abort bounce for the second request");
        assert_eq!(bounce.radio_error(), OT_ERROR_ABORT);
        assert_eq!(bounce.timestamp, second.timestamp + 1);

        // Finish the first frame and deliver its rx-done to node 2.
        let tx_done_internal = q
            .iter()
            .find(|e| e.kind == EventKind::RadioTxDone && !e.must_dispatch)
            .cloned()
            .unwrap();
        let mut q2: Vec<Event> = Vec::new();
        m.handle_event(&mut q2, &tx_done_internal);
        let mut rx_done = q2
            .iter()
            .find(|e| e.kind == EventKind::RadioRxDone)
            .cloned()
            .unwrap();
        assert!(m.on_event_dispatch(1, 2, &mut rx_done));
        assert_eq!(rx_done.radio_error(), OT_ERROR_ABORT);
    }

    #[test]
    fn interference_induces_fcs_error_with_wanted_rssi() {
        // Two sources transmit overlapping frames heard at -70 and -69 dBm
        // at the receiver; with SnrMinThreshold -4 dB the wanted frame must
        // arrive corrupted but carry its own clipped RSSI.
        let mut m = RadioModel::create("MutualInterference", 1).unwrap();
        add_node_at(&mut m, 1, 0.0, 0.0, 220.0);
        add_node_at(&mut m, 2, 0.0, 120.0, 220.0);
        add_node_at(&mut m, 3, 60.0, 60.0, 220.0);

        // Pin the received levels through the per-frame Tx power: zero
        // pathloss and no fading, so RSSI at the receiver equals Tx power.
        {
            let p = m.params_mut();
            p.exponent_db = 0.0;
            p.fixed_loss_db = 0.0;
            p.nlos_exponent_db = threadsim_common::UNDEFINED_DB_VALUE;
            p.shadow_fading_sigma_db = 0.0;
        }

        let mut q: Vec<Event> = Vec::new();
        let duration = 4256;
        let mut start1 = comm_start(1, 11, 1000, duration, 128);
        start1.radio_comm_mut().unwrap().power_dbm = -70;
        let mut start2 = comm_start(2, 11, 1200, duration, 128);
        start2.radio_comm_mut().unwrap().power_dbm = -69;
        m.handle_event(&mut q, &start1);
        m.handle_event(&mut q, &start2);
        assert!((m.get_tx_rssi(1, 3) - -70.0).abs() < 1e-9);
        assert!((m.get_tx_rssi(2, 3) - -69.0).abs() < 1e-9);

        // End node 1's transmission and deliver its rx-done at node 3.
        let tx_done = q
            .iter()
            .find(|e| e.kind == EventKind::RadioTxDone && !e.must_dispatch && e.node_id == 1)
            .cloned()
            .unwrap();
        let mut q2: Vec<Event> = Vec::new();
        m.handle_event(&mut q2, &tx_done);
        let mut rx_done = q2
            .iter()
            .find(|e| e.kind == EventKind::RadioRxDone)
            .cloned()
            .unwrap();
        assert!(m.on_event_dispatch(1, 3, &mut rx_done));
        assert_eq!(rx_done.radio_error(), OT_ERROR_FCS);
        assert_eq!(rx_done.radio_comm().unwrap().power_dbm, -70);
    }

    #[test]
    fn clean_reception_without_interference() {
        let mut m = RadioModel::create("MutualInterference", 3).unwrap();
        add_node_at(&mut m, 1, 0.0, 0.0, 220.0);
        add_node_at(&mut m, 2, 40.0, 0.0, 220.0);

        let mut q: Vec<Event> = Vec::new();
        m.handle_event(&mut q, &comm_start(1, 11, 0, 4256, 64));
        let tx_done = q
            .iter()
            .find(|e| e.kind == EventKind::RadioTxDone && !e.must_dispatch)
            .cloned()
            .unwrap();
        let mut q2: Vec<Event> = Vec::new();
        m.handle_event(&mut q2, &tx_done);
        let mut rx_done = q2
            .iter()
            .find(|e| e.kind == EventKind::RadioRxDone)
            .cloned()
            .unwrap();
        assert!(m.on_event_dispatch(1, 2, &mut rx_done));
        assert_eq!(rx_done.radio_error(), OT_ERROR_NONE);
        assert_eq!(m.node_phy_stats(2).rx_frames, 1);
        assert_eq!(m.node_phy_stats(1).tx_frames, 1);
    }

    #[test]
    fn channel_sampling_reports_peak_energy() {
        let mut m = RadioModel::create("MutualInterference", 5).unwrap();
        add_node_at(&mut m, 1, 0.0, 0.0, 220.0);
        add_node_at(&mut m, 2, 30.0, 0.0, 220.0);

        // Node 2 samples channel 11 while nothing transmits: noise floor.
        let mut sample = Event::radio(
            EventKind::RadioChannelSample,
            2,
            RadioCommData {
                channel: 11,
                power_dbm: 0,
                error: OT_ERROR_NONE,
                duration: 128,
            },
            Vec::new(),
        );
        sample.timestamp = 0;
        let mut q: Vec<Event> = Vec::new();
        m.handle_event(&mut q, &sample);

        // A transmission starts during the window and raises the peak.
        m.handle_event(&mut q, &comm_start(1, 11, 50, 4256, 64));

        let mut done = q
            .iter()
            .find(|e| e.kind == EventKind::RadioChannelSample && e.must_dispatch)
            .cloned()
            .unwrap();
        assert_eq!(done.timestamp, 128);
        assert!(m.on_event_dispatch(2, 2, &mut done));
        let peak = done.radio_comm().unwrap().power_dbm;
        // The peak is the transmitter's RSSI at the sampler, floored by the
        // ambient noise.
        let expected = m.get_tx_rssi(1, 2).max(-95.0);
        assert_eq!(peak as f64, expected.round());
    }

    #[test]
    fn rfsim_params_read_write() {
        let mut m = RadioModel::create("MutualInterference", 1).unwrap();
        add_node_at(&mut m, 1, 0.0, 0.0, 220.0);
        assert_eq!(m.get_node_param(1, RfSimParam::RxSensitivity), Some(-100));
        assert!(m.set_node_param(1, RfSimParam::RxSensitivity, -90));
        assert_eq!(m.get_node_param(1, RfSimParam::RxSensitivity), Some(-90));
        assert!(!m.set_node_param(99, RfSimParam::TxPower, 0));
    }
}

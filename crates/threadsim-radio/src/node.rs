//! Per-node radio record, shared by all radio models.

use threadsim_common::{
    ChannelId, DbValue, NodeConfig, NodeId, RadioState, DEFAULT_CCA_ED_THRESHOLD_DBM,
    DEFAULT_CHANNEL, DEFAULT_CSL_ACCURACY_PPM, DEFAULT_CSL_UNCERTAINTY_10US,
    DEFAULT_RX_SENSITIVITY_DBM, DEFAULT_TX_POWER_DBM, RSSI_MINUS_INFINITY,
};

/// Radio status of a single node. The model mutates it only on the
/// dispatcher thread, in response to events or operator commands.
#[derive(Debug, Clone)]
pub struct RadioNode {
    pub id: NodeId,

    /// Last Tx power used by the node (dBm).
    pub tx_power: DbValue,

    /// Rx sensitivity (dBm); receptions below it are undetectable.
    pub rx_sensitivity: DbValue,

    /// CCA energy-detect threshold (dBm).
    pub cca_ed_threshold: DbValue,

    /// CSL timing parameters, settable through rfsim-param events.
    pub csl_accuracy_ppm: i32,
    pub csl_uncertainty_10us: i32,

    /// Radio range configured by the simulation, in grid units. Used by the
    /// disc-limited models.
    pub radio_range: f64,

    /// Current radio state; `Tx` only while physically transmitting.
    pub state: RadioState,
    pub sub_state: u8,

    /// Current channel, for Rx, Tx or sampling.
    pub channel: ChannelId,

    /// Position in dimensionless grid units.
    pub x: f64,
    pub y: f64,
    pub z: f64,

    /// Max RSSI seen during an active channel-sampling operation.
    pub(crate) rssi_sample_max: DbValue,
}

impl RadioNode {
    pub fn new(id: NodeId, cfg: &NodeConfig) -> Self {
        RadioNode {
            id,
            tx_power: DEFAULT_TX_POWER_DBM,
            rx_sensitivity: DEFAULT_RX_SENSITIVITY_DBM,
            cca_ed_threshold: DEFAULT_CCA_ED_THRESHOLD_DBM,
            csl_accuracy_ppm: DEFAULT_CSL_ACCURACY_PPM,
            csl_uncertainty_10us: DEFAULT_CSL_UNCERTAINTY_10US,
            radio_range: cfg.radio_range,
            state: RadioState::Rx,
            sub_state: 0,
            channel: DEFAULT_CHANNEL,
            x: cfg.x,
            y: cfg.y,
            z: cfg.z,
            rssi_sample_max: RSSI_MINUS_INFINITY,
        }
    }

    /// Euclidean distance to `other` in grid units.
    pub fn distance_to(&self, other: &RadioNode) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let dz = other.z - self.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn position(&self) -> (f64, f64, f64) {
        (self.x, self.y, self.z)
    }

    pub fn set_position(&mut self, x: f64, y: f64, z: f64) {
        self.x = x;
        self.y = y;
        self.z = z;
    }

    pub fn set_channel(&mut self, ch: ChannelId) {
        self.channel = ch;
    }

    pub fn set_state(&mut self, state: RadioState, sub_state: u8) {
        self.state = state;
        self.sub_state = sub_state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_euclidean() {
        let cfg = NodeConfig::default();
        let a = RadioNode::new(1, &cfg);
        let mut b = RadioNode::new(2, &cfg);
        b.set_position(3.0, 4.0, 0.0);
        assert_eq!(a.distance_to(&b), 5.0);
        assert_eq!(b.distance_to(&a), 5.0);
    }

    #[test]
    fn defaults_from_platform() {
        let n = RadioNode::new(1, &NodeConfig::default());
        assert_eq!(n.tx_power, 0.0);
        assert_eq!(n.rx_sensitivity, -100.0);
        assert_eq!(n.cca_ed_threshold, -75.0);
        assert_eq!(n.state, RadioState::Rx);
        assert_eq!(n.channel, DEFAULT_CHANNEL);
    }
}

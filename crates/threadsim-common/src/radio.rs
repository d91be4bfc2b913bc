//! Radio value domain: dBm values, RSSI wire encoding, radio states and the
//! OpenThread error sentinels carried in radio events.

use crate::ChannelId;

/// A signal level or gain in dB / dBm. Kept as `f64` internally; events carry
/// the clipped `i8` encoding.
pub type DbValue = f64;

/// Marker for a model parameter that has not been configured.
pub const UNDEFINED_DB_VALUE: DbValue = f64::MAX;

/// RSSI encodings shared with the node's radio platform (map to `i8`).
pub const RSSI_INVALID: DbValue = 127.0;
pub const RSSI_MAX: DbValue = 126.0;
pub const RSSI_MIN: DbValue = -126.0;
pub const RSSI_MINUS_INFINITY: DbValue = -127.0;

/// OpenThread error codes used in the `error` field of radio events.
pub const OT_ERROR_NONE: u8 = 0;
pub const OT_ERROR_ABORT: u8 = 11;
pub const OT_ERROR_CHANNEL_ACCESS_FAILURE: u8 = 15;
pub const OT_ERROR_FCS: u8 = 17;

/// Default radio parameters of the simulated RF platform. Individual nodes
/// may override these through the rfsim-param events.
pub const DEFAULT_TX_POWER_DBM: DbValue = 0.0;
pub const DEFAULT_RX_SENSITIVITY_DBM: DbValue = -100.0;
pub const DEFAULT_CCA_ED_THRESHOLD_DBM: DbValue = -75.0;
pub const DEFAULT_CSL_ACCURACY_PPM: i32 = 20;
pub const DEFAULT_CSL_UNCERTAINTY_10US: i32 = 10;

/// Time to transmit one bit on the 2.4 GHz O-QPSK PHY (250 kbit/s).
pub const TIME_US_PER_BIT: u64 = 4;

/// Clips an RSSI value to the `i8` range used on the wire. Values above the
/// valid maximum saturate; values below the minimum become minus-infinity.
pub fn clip_rssi(rssi: DbValue) -> i8 {
    if rssi > RSSI_MAX {
        RSSI_MAX as i8
    } else if rssi < RSSI_MIN {
        RSSI_MINUS_INFINITY as i8
    } else {
        rssi.round() as i8
    }
}

/// Power of two added, uncorrelated signals with powers `p1` and `p2` (dBm).
/// When one signal dominates by more than 15 dB the weaker one is ignored.
pub fn add_signal_powers_dbm(p1: DbValue, p2: DbValue) -> DbValue {
    if p1 > p2 + 15.0 {
        return p1;
    }
    if p2 > p1 + 15.0 {
        return p2;
    }
    10.0 * (10f64.powf(p1 / 10.0) + 10f64.powf(p2 / 10.0)).log10()
}

/// State of a node's radio, as reported through radio-state events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RadioState {
    Disabled = 0,
    Sleep = 1,
    #[default]
    Rx = 2,
    Tx = 3,
    ChannelSampling = 4,
}

impl RadioState {
    /// Decodes a wire value; unknown values are a protocol error handled by
    /// the caller.
    pub fn from_wire(v: u8) -> Option<Self> {
        match v {
            0 => Some(RadioState::Disabled),
            1 => Some(RadioState::Sleep),
            2 => Some(RadioState::Rx),
            3 => Some(RadioState::Tx),
            4 => Some(RadioState::ChannelSampling),
            _ => None,
        }
    }
}

impl std::fmt::Display for RadioState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RadioState::Disabled => "off",
            RadioState::Sleep => "sleep",
            RadioState::Rx => "rx",
            RadioState::Tx => "tx",
            RadioState::ChannelSampling => "sample",
        };
        write!(f, "{s}")
    }
}

/// Checks that a channel is within the 2.4 GHz O-QPSK range.
pub fn is_valid_channel(ch: ChannelId) -> bool {
    (crate::MIN_CHANNEL..=crate::MAX_CHANNEL).contains(&ch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_rssi_ranges() {
        assert_eq!(clip_rssi(-60.4), -60);
        assert_eq!(clip_rssi(300.0), RSSI_MAX as i8);
        assert_eq!(clip_rssi(-200.0), RSSI_MINUS_INFINITY as i8);
        assert_eq!(clip_rssi(RSSI_MIN), RSSI_MIN as i8);
    }

    #[test]
    fn signal_power_addition() {
        // Equal powers add up to +3 dB.
        let sum = add_signal_powers_dbm(-70.0, -70.0);
        assert!((sum - -66.99).abs() < 0.02);
        // A dominant signal swallows the weaker one.
        assert_eq!(add_signal_powers_dbm(-40.0, -90.0), -40.0);
        assert_eq!(add_signal_powers_dbm(-90.0, -40.0), -40.0);
    }

    #[test]
    fn radio_state_wire_roundtrip() {
        for v in 0..=4u8 {
            assert_eq!(RadioState::from_wire(v).unwrap() as u8, v);
        }
        assert!(RadioState::from_wire(9).is_none());
    }
}

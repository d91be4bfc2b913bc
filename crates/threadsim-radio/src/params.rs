//! Radio model parameters and the named presets.

use serde::{Deserialize, Serialize};
use threadsim_common::{DbValue, RSSI_MAX, RSSI_MIN, UNDEFINED_DB_VALUE};

/// Default distance in meters represented by one dimensionless grid unit.
pub const DEFAULT_METER_PER_UNIT: f64 = 0.1;

/// Ambient noise floor of the indoor models (dBm).
pub const DEFAULT_NOISE_FLOOR_INDOOR_DBM: DbValue = -95.0;

/// Tunable parameters of a radio model. All dB/dBm values; a value of
/// `UNDEFINED_DB_VALUE` disables the corresponding term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioModelParams {
    /// Meters represented by a single grid/pixel distance unit.
    pub meter_per_unit: f64,
    /// When set, Tx range is hard-limited to each node's radio range.
    pub is_disc_limit: bool,
    /// Lowest RSSI value returned, overriding other calculations.
    pub rssi_min_dbm: DbValue,
    /// Highest RSSI value returned, overriding other calculations.
    pub rssi_max_dbm: DbValue,
    /// Exponent (dB/decade) of the regular/LOS pathloss model.
    pub exponent_db: DbValue,
    /// Fixed loss (dB) term of the regular/LOS pathloss model.
    pub fixed_loss_db: DbValue,
    /// Exponent (dB/decade) of the NLOS pathloss branch.
    pub nlos_exponent_db: DbValue,
    /// Fixed loss (dB) term of the NLOS pathloss branch.
    pub nlos_fixed_loss_db: DbValue,
    /// Ambient noise floor (dBm).
    pub noise_floor_dbm: DbValue,
    /// Minimum SNR/SINR (dB) at which a frame has a non-zero success
    /// probability.
    pub snr_min_threshold_db: DbValue,
    /// Sigma (stddev) of the shadow fading distribution, in dB.
    pub shadow_fading_sigma_db: DbValue,
}

impl Default for RadioModelParams {
    fn default() -> Self {
        RadioModelParams {
            meter_per_unit: DEFAULT_METER_PER_UNIT,
            is_disc_limit: false,
            rssi_min_dbm: RSSI_MIN,
            rssi_max_dbm: RSSI_MAX,
            exponent_db: UNDEFINED_DB_VALUE,
            fixed_loss_db: UNDEFINED_DB_VALUE,
            nlos_exponent_db: UNDEFINED_DB_VALUE,
            nlos_fixed_loss_db: UNDEFINED_DB_VALUE,
            noise_floor_dbm: UNDEFINED_DB_VALUE,
            snr_min_threshold_db: UNDEFINED_DB_VALUE,
            shadow_fading_sigma_db: UNDEFINED_DB_VALUE,
        }
    }
}

impl RadioModelParams {
    /// Constant-RSSI disc model: every receiver inside the disc hears the
    /// frame at -60 dBm.
    pub fn ideal() -> Self {
        RadioModelParams {
            is_disc_limit: true,
            rssi_min_dbm: -60.0,
            rssi_max_dbm: -60.0,
            ..Default::default()
        }
    }

    /// ITU indoor attenuation, log-distance form.
    pub fn itu_indoor() -> Self {
        RadioModelParams {
            is_disc_limit: true,
            exponent_db: 30.0,
            fixed_loss_db: 38.0,
            ..Default::default()
        }
    }

    /// 3GPP TR 38.901 InH-Office pathloss at 2.4 GHz, with NLOS branch,
    /// noise floor, SNR threshold and shadow fading.
    pub fn indoor_3gpp() -> Self {
        RadioModelParams {
            exponent_db: 17.3,
            fixed_loss_db: 32.4 + 20.0 * 2.4f64.log10(),
            nlos_exponent_db: 38.3,
            nlos_fixed_loss_db: 17.3 + 24.9 * 2.4f64.log10(),
            noise_floor_dbm: DEFAULT_NOISE_FLOOR_INDOOR_DBM,
            snr_min_threshold_db: -4.0,
            shadow_fading_sigma_db: 8.03,
            ..Default::default()
        }
    }

    /// Outdoor variant: LOS exponent with an extra fixed loss, no disc
    /// limit, and a coarser grid scale.
    pub fn outdoor() -> Self {
        let indoor = Self::indoor_3gpp();
        RadioModelParams {
            meter_per_unit: 0.5,
            fixed_loss_db: indoor.fixed_loss_db + 11.0,
            ..indoor
        }
    }

    /// Reads a parameter by its CLI name.
    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            "meter-per-unit" => Some(self.meter_per_unit),
            "disc-limit" => Some(if self.is_disc_limit { 1.0 } else { 0.0 }),
            "rssi-min" => Some(self.rssi_min_dbm),
            "rssi-max" => Some(self.rssi_max_dbm),
            "exponent" => Some(self.exponent_db),
            "fixed-loss" => Some(self.fixed_loss_db),
            "nlos-exponent" => Some(self.nlos_exponent_db),
            "nlos-fixed-loss" => Some(self.nlos_fixed_loss_db),
            "noise-floor" => Some(self.noise_floor_dbm),
            "snr-min" => Some(self.snr_min_threshold_db),
            "shadow-fading-sigma" => Some(self.shadow_fading_sigma_db),
            _ => None,
        }
    }

    /// Writes a parameter by its CLI name. Returns false for unknown names.
    pub fn set(&mut self, name: &str, value: f64) -> bool {
        match name {
            "meter-per-unit" => self.meter_per_unit = value,
            "disc-limit" => self.is_disc_limit = value != 0.0,
            "rssi-min" => self.rssi_min_dbm = value,
            "rssi-max" => self.rssi_max_dbm = value,
            "exponent" => self.exponent_db = value,
            "fixed-loss" => self.fixed_loss_db = value,
            "nlos-exponent" => self.nlos_exponent_db = value,
            "nlos-fixed-loss" => self.nlos_fixed_loss_db = value,
            "noise-floor" => self.noise_floor_dbm = value,
            "snr-min" => self.snr_min_threshold_db = value,
            "shadow-fading-sigma" => self.shadow_fading_sigma_db = value,
            _ => return false,
        }
        true
    }

    /// All parameter names recognized by `get`/`set`.
    pub fn names() -> &'static [&'static str] {
        &[
            "meter-per-unit",
            "disc-limit",
            "rssi-min",
            "rssi-max",
            "exponent",
            "fixed-loss",
            "nlos-exponent",
            "nlos-fixed-loss",
            "noise-floor",
            "snr-min",
            "shadow-fading-sigma",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ideal_preset_is_constant_rssi() {
        let p = RadioModelParams::ideal();
        assert!(p.is_disc_limit);
        assert_eq!(p.rssi_min_dbm, -60.0);
        assert_eq!(p.rssi_max_dbm, -60.0);
    }

    #[test]
    fn indoor_3gpp_preset_has_nlos_branch() {
        let p = RadioModelParams::indoor_3gpp();
        assert!((p.fixed_loss_db - 40.0).abs() < 0.1);
        assert!((p.nlos_fixed_loss_db - 26.77).abs() < 0.1);
        assert_eq!(p.snr_min_threshold_db, -4.0);
        assert!(!p.is_disc_limit);
    }

    #[test]
    fn get_set_by_name_roundtrip() {
        let mut p = RadioModelParams::default();
        for name in RadioModelParams::names() {
            assert!(p.get(name).is_some(), "missing getter for {name}");
        }
        assert!(p.set("noise-floor", -92.0));
        assert_eq!(p.get("noise-floor"), Some(-92.0));
        assert!(!p.set("bogus", 1.0));
        assert!(p.get("bogus").is_none());
    }
}

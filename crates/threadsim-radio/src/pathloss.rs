//! Log-distance pathloss computation.

use threadsim_common::{DbValue, UNDEFINED_DB_VALUE};

use crate::RadioModelParams;

/// Distance below which pathloss is treated as zero (near-field).
const MIN_PATHLOSS_DIST_M: f64 = 0.01;

/// Pathloss in dB for a link of `dist` grid units under `params`.
///
/// `PL = exponent * log10(d_m) + fixed_loss`, clamped to >= 0. When an NLOS
/// branch is configured the larger of the LOS and NLOS losses applies.
pub fn compute_pathloss_db(dist: f64, params: &RadioModelParams) -> DbValue {
    let dist_m = dist * params.meter_per_unit;
    if dist_m < MIN_PATHLOSS_DIST_M || params.exponent_db == UNDEFINED_DB_VALUE {
        return 0.0;
    }
    let mut pl = params.exponent_db * dist_m.log10() + params.fixed_loss_db;
    if pl < 0.0 {
        pl = 0.0;
    }
    if params.nlos_exponent_db != UNDEFINED_DB_VALUE && params.nlos_exponent_db > 0.0 {
        let pl_nlos = params.nlos_exponent_db * dist_m.log10() + params.nlos_fixed_loss_db;
        pl = pl.max(pl_nlos);
    }
    pl
}

/// Noiseless RSSI at the receiver: Tx power minus pathloss minus shadow
/// fading, clipped to the model's RSSI window.
pub fn compute_rssi(
    dist: f64,
    tx_power_dbm: DbValue,
    shadow_fading_db: DbValue,
    params: &RadioModelParams,
) -> DbValue {
    let rssi = tx_power_dbm - compute_pathloss_db(dist, params) - shadow_fading_db;
    rssi.clamp(params.rssi_min_dbm, params.rssi_max_dbm)
}

//! Shadow fading: a fixed, position-dependent attenuation (or gain)
//! modeling multipath effects and static obstacles.
//!
//! In the dB domain it is a normal distribution (mu=0, sigma). The draw is a
//! deterministic function of the unordered pair of link endpoint positions
//! plus a per-model seed, so the fading between two fixed positions is
//! stable over time but varies across links.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use statrs::distribution::Normal;
use threadsim_common::{DbValue, UNDEFINED_DB_VALUE};

use crate::RadioModelParams;

#[derive(Debug, Clone)]
pub struct ShadowFading {
    seed: u64,
}

impl ShadowFading {
    pub fn new(seed: u64) -> Self {
        ShadowFading { seed }
    }

    /// Shadow fading in dB for the link between `a` and `b` (grid units).
    pub fn compute(
        &self,
        a: (f64, f64, f64),
        b: (f64, f64, f64),
        params: &RadioModelParams,
    ) -> DbValue {
        let sigma = params.shadow_fading_sigma_db;
        if sigma == UNDEFINED_DB_VALUE || sigma <= 0.0 {
            return 0.0;
        }

        // Round positions to a 1 m grid so that small moves keep the draw.
        let qa = quantize(a, params.meter_per_unit);
        let qb = quantize(b, params.meter_per_unit);

        // Canonical endpoint order makes the pair unordered.
        let (lo, hi) = if qa <= qb { (qa, qb) } else { (qb, qa) };

        let mut h = self.seed;
        for v in [lo.0, lo.1, lo.2, hi.0, hi.1, hi.2] {
            h = h.wrapping_mul(0x0100_0000_01b3).wrapping_add(v as u64);
        }
        let mut rng = ChaCha8Rng::seed_from_u64(h);
        let normal = Normal::new(0.0, sigma).expect("sigma checked > 0");
        rand::distributions::Distribution::sample(&normal, &mut rng)
    }
}

fn quantize(p: (f64, f64, f64), meter_per_unit: f64) -> (i64, i64, i64) {
    (
        (p.0 * meter_per_unit).round() as i64,
        (p.1 * meter_per_unit).round() as i64,
        (p.2 * meter_per_unit).round() as i64,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params_with_sigma() -> RadioModelParams {
        RadioModelParams::indoor_3gpp()
    }

    #[test]
    fn stable_per_link() {
        let sf = ShadowFading::new(1234);
        let p = params_with_sigma();
        let a = (0.0, 0.0, 0.0);
        let b = (100.0, 40.0, 0.0);
        let v1 = sf.compute(a, b, &p);
        let v2 = sf.compute(a, b, &p);
        assert_eq!(v1.to_bits(), v2.to_bits());
    }

    #[test]
    fn symmetric_in_endpoints() {
        let sf = ShadowFading::new(99);
        let p = params_with_sigma();
        let a = (10.0, 250.0, 0.0);
        let b = (300.0, 12.0, 0.0);
        assert_eq!(
            sf.compute(a, b, &p).to_bits(),
            sf.compute(b, a, &p).to_bits()
        );
    }

    #[test]
    fn varies_across_links_and_seeds() {
        let sf1 = ShadowFading::new(1);
        let sf2 = ShadowFading::new(2);
        let p = params_with_sigma();
        let a = (0.0, 0.0, 0.0);
        let b = (500.0, 0.0, 0.0);
        let c = (0.0, 500.0, 0.0);
        assert_ne!(
            sf1.compute(a, b, &p).to_bits(),
            sf1.compute(a, c, &p).to_bits()
        );
        assert_ne!(
            sf1.compute(a, b, &p).to_bits(),
            sf2.compute(a, b, &p).to_bits()
        );
    }

    #[test]
    fn zero_without_sigma() {
        let sf = ShadowFading::new(7);
        let p = RadioModelParams::ideal();
        assert_eq!(sf.compute((0.0, 0.0, 0.0), (1.0, 1.0, 0.0), &p), 0.0);
    }
}

//! Drift-corrected lognormal binary-option fair-value model.

use crate::types::FairValue;

use super::normal::cdf;

const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 3600.0;
const DEGENERATE_THRESHOLD: f64 = 1e-10;
const SMILE_COEFF: f64 = 0.08;
const SMILE_CAP: f64 = 1.40;
const TAIL_THRESHOLD: f64 = 1.5;
const TAIL_SLOPE: f64 = 1.15;

/// Fair value of the UP outcome given spot `s`, strike `k`, time to
/// expiry in seconds, and annualised volatility `sigma`.
///
/// With `apply_adjustments` set, applies a volatility-smile widening away
/// from at-the-money and compresses extreme standardised distances so the
/// model does not assign near-zero probability to either side this close
/// to expiry.
pub fn fair(s: f64, k: f64, tau_seconds: f64, sigma: f64, apply_adjustments: bool) -> FairValue {
    let tau = tau_seconds / SECONDS_PER_YEAR;

    if sigma * tau.sqrt() < DEGENERATE_THRESHOLD {
        let p_up = if s >= k { 1.0 } else { 0.0 };
        return FairValue {
            p_up,
            p_down: 1.0 - p_up,
            d: if s >= k { f64::INFINITY } else { f64::NEG_INFINITY },
            sigma_sqrt_tau: 0.0,
        };
    }

    let mut sigma_eff = sigma;
    if apply_adjustments {
        let sigma_sqrt_tau = sigma * tau.sqrt();
        let m = (s / k).ln().abs() / sigma_sqrt_tau;
        sigma_eff = sigma * (1.0 + SMILE_COEFF * m * m).min(SMILE_CAP);
    }

    let sigma_t = sigma_eff * tau.sqrt();
    let r = 0.0_f64;
    let mut d = ((s / k).ln() + (r - sigma_eff * sigma_eff / 2.0) * tau) / sigma_t;

    if apply_adjustments && d.abs() > TAIL_THRESHOLD {
        d = d.signum() * (TAIL_THRESHOLD + (d.abs() - TAIL_THRESHOLD) / TAIL_SLOPE);
    }

    let p_up = cdf(d);
    FairValue {
        p_up,
        p_down: 1.0 - p_up,
        d,
        sigma_sqrt_tau: sigma_t,
    }
}

/// Edge of a modelled probability against a quoted ask price.
pub fn edge(p: f64, market_ask: f64) -> f64 {
    p - market_ask
}

//! Standard normal density and cumulative distribution.

const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;

/// Standard normal probability density function.
pub fn pdf(x: f64) -> f64 {
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

/// Standard normal CDF via the Abramowitz & Stegun 26.2.17 polynomial
/// approximation (max absolute error ~7.5e-8).
pub fn cdf(x: f64) -> f64 {
    if x < 0.0 {
        return 1.0 - cdf(-x);
    }

    const P: f64 = 0.231_641_9;
    const B1: f64 = 0.319_381_530;
    const B2: f64 = -0.356_563_782;
    const B3: f64 = 1.781_477_937;
    const B4: f64 = -1.821_255_978;
    const B5: f64 = 1.330_274_429;

    let t = 1.0 / (1.0 + P * x);
    let poly = t * (B1 + t * (B2 + t * (B3 + t * (B4 + t * B5))));
    1.0 - pdf(x) * poly
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario: density evaluated at the mean.
    /// Expected: phi(0) equals 1/sqrt(2*pi).
    #[test]
    fn pdf_at_zero() {
        assert!((pdf(0.0) - 0.398_942_280_401_432_7).abs() < 1e-12);
    }

    /// Scenario: density is an even function.
    /// Expected: phi(x) == phi(-x) for several sample points.
    #[test]
    fn pdf_is_symmetric() {
        for x in [0.3, 1.0, 2.5, 4.0] {
            assert!((pdf(x) - pdf(-x)).abs() < 1e-15);
        }
    }

    /// Scenario: CDF evaluated at the mean.
    /// Expected: Phi(0) == 0.5 to within the approximation's tolerance.
    #[test]
    fn cdf_at_zero() {
        assert!((cdf(0.0) - 0.5).abs() < 1e-7);
    }

    /// Scenario: CDF evaluated at textbook reference points.
    /// Expected: matches published standard-normal table values.
    #[test]
    fn cdf_known_values() {
        assert!((cdf(1.0) - 0.841_344_75).abs() < 1e-6);
        assert!((cdf(-1.0) - 0.158_655_25).abs() < 1e-6);
        assert!((cdf(1.96) - 0.975).abs() < 1e-4);
        assert!((cdf(-1.96) - 0.025).abs() < 1e-4);
    }

    /// Scenario: complementary symmetry of the CDF.
    /// Expected: Phi(x) + Phi(-x) == 1 for several sample points.
    #[test]
    fn cdf_complementary_symmetry() {
        for x in [0.1, 0.75, 1.5, 3.3] {
            assert!((cdf(x) + cdf(-x) - 1.0).abs() < 1e-9);
        }
    }

    /// Scenario: deep tail evaluation.
    /// Expected: CDF saturates to 0 and 1 without overflow or NaN.
    #[test]
    fn cdf_extremes() {
        assert!(cdf(10.0) > 0.999_999);
        assert!(cdf(-10.0) < 0.000_001);
        assert!(cdf(10.0).is_finite());
        assert!(cdf(-10.0).is_finite());
    }
}

//! Special functions used by the sampler and the shape volume formulas.

use std::f64::consts::PI;

const LANCZOS_G: f64 = 7.0;
const LANCZOS: [f64; 9] = [
    0.999_999_999_999_809_9,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_572e-6,
    1.505_632_735_149_311_6e-7,
];

/// Natural logarithm of the gamma function for `x > 0` (Lanczos, g = 7).
pub fn ln_gamma(x: f64) -> f64 {
    if x < 0.5 {
        // Reflection keeps the series in its accurate range.
        return (PI / (PI * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let mut a = LANCZOS[0];
    let t = x + LANCZOS_G + 0.5;
    for (i, c) in LANCZOS.iter().enumerate().skip(1) {
        a += c / (x + i as f64);
    }
    0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + a.ln()
}

/// Gamma function for `x > 0`.
pub fn gamma(x: f64) -> f64 {
    ln_gamma(x).exp()
}

/// Density of `Beta(alpha, beta)` at `x`; zero outside `(0, 1)`.
pub fn beta_pdf(x: f64, alpha: f64, beta: f64) -> f64 {
    if !(x > 0.0 && x < 1.0) {
        return 0.0;
    }
    let ln_norm = ln_gamma(alpha + beta) - ln_gamma(alpha) - ln_gamma(beta);
    (ln_norm + (alpha - 1.0) * x.ln() + (beta - 1.0) * (1.0 - x).ln()).exp()
}

/// Density at `x` of a lognormal law whose logarithm has mean `mu` and
/// standard deviation `sigma`.
pub fn lognormal_pdf(x: f64, mu: f64, sigma: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    let z = (x.ln() - mu) / sigma;
    (-0.5 * z * z).exp() / (x * sigma * (2.0 * PI).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn gamma_matches_factorials() {
        assert_relative_eq!(gamma(1.0), 1.0, epsilon = 1e-12);
        assert_relative_eq!(gamma(5.0), 24.0, epsilon = 1e-9);
        assert_relative_eq!(gamma(0.5), PI.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn uniform_beta_density() {
        assert_relative_eq!(beta_pdf(0.3, 1.0, 1.0), 1.0, epsilon = 1e-12);
        assert_eq!(beta_pdf(1.2, 2.0, 2.0), 0.0);
        assert_eq!(beta_pdf(0.0, 2.0, 2.0), 0.0);
    }

    #[test]
    fn beta_density_peak() {
        // Beta(2, 2) = 6 x (1 - x), maximum 1.5 at 0.5.
        assert_relative_eq!(beta_pdf(0.5, 2.0, 2.0), 1.5, epsilon = 1e-10);
    }

    #[test]
    fn lognormal_density_at_median() {
        let sigma = 0.3;
        let expected = 1.0 / (sigma * (2.0 * PI).sqrt());
        assert_relative_eq!(lognormal_pdf(1.0, 0.0, sigma), expected, epsilon = 1e-12);
        assert_eq!(lognormal_pdf(-1.0, 0.0, sigma), 0.0);
    }
}

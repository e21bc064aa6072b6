//! Pair-BAR free-energy estimation in reduced units.
//!
//! Works follow the `u_kln` sign convention: forward works are `u_B - u_A` on frames
//! sampled at A, reverse works are `u_A - u_B` on frames sampled at B.

use super::config::BootstrapConfig;
use super::decomposition::UKln;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::trace;

const MIN_SAMPLES: usize = 2;
const MAX_BRACKET_EXPANSIONS: usize = 200;
const MAX_ITERATIONS: usize = 500;
const TOLERANCE: f64 = 1e-12;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EstimationError {
    #[error(
        "BAR needs at least {MIN_SAMPLES} samples in each direction, got {n_forward} forward and {n_reverse} reverse"
    )]
    InsufficientData { n_forward: usize, n_reverse: usize },

    #[error("{direction} works contain a non-finite value")]
    NonFiniteWork { direction: &'static str },

    #[error("BAR root search did not converge after {iterations} iterations")]
    NoConvergence { iterations: usize },

    #[error("Bootstrap requires at least one resample")]
    NoBootstrapSamples,
}

/// A free-energy difference with its bootstrapped error and pair overlap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarEstimate {
    pub df: f64,
    pub df_err: f64,
    pub overlap: f64,
}

/// `ln(1 + e^x)` without overflow.
#[inline]
fn softplus(x: f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

#[inline]
fn logaddexp(a: f64, b: f64) -> f64 {
    let hi = a.max(b);
    if hi == f64::NEG_INFINITY {
        return hi;
    }
    hi + ((a - hi).exp() + (b - hi).exp()).ln()
}

/// `ln Σ exp(x_i)` over the iterator.
fn logsumexp(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let hi = values.clone().fold(f64::NEG_INFINITY, f64::max);
    if hi == f64::NEG_INFINITY {
        return hi;
    }
    hi + values.map(|v| (v - hi).exp()).sum::<f64>().ln()
}

fn validate(w_f: &[f64], w_r: &[f64]) -> Result<(), EstimationError> {
    if w_f.len() < MIN_SAMPLES || w_r.len() < MIN_SAMPLES {
        return Err(EstimationError::InsufficientData {
            n_forward: w_f.len(),
            n_reverse: w_r.len(),
        });
    }
    if w_f.iter().any(|w| !w.is_finite()) {
        return Err(EstimationError::NonFiniteWork {
            direction: "Forward",
        });
    }
    if w_r.iter().any(|w| !w.is_finite()) {
        return Err(EstimationError::NonFiniteWork {
            direction: "Reverse",
        });
    }
    Ok(())
}

/// Residual of Bennett's self-consistent equation in log space and its derivative.
///
/// `h(ΔF) = ln Σ_i f(M + w_F,i - ΔF) - ln Σ_j f(-M + w_R,j + ΔF)` with `f(x) = 1/(1+eˣ)`.
/// `h` is strictly increasing, so it has exactly one root.
struct BennettResidual<'a> {
    w_f: &'a [f64],
    w_r: &'a [f64],
    m: f64,
}

impl<'a> BennettResidual<'a> {
    fn new(w_f: &'a [f64], w_r: &'a [f64]) -> Self {
        Self {
            w_f,
            w_r,
            m: (w_f.len() as f64 / w_r.len() as f64).ln(),
        }
    }

    fn eval(&self, df: f64) -> (f64, f64) {
        let log_fwd: Vec<f64> = self.w_f.iter().map(|&w| -softplus(self.m + w - df)).collect();
        let log_rev: Vec<f64> = self.w_r.iter().map(|&w| -softplus(-self.m + w + df)).collect();
        let lhs = logsumexp(log_fwd.iter().copied());
        let rhs = logsumexp(log_rev.iter().copied());
        // Both sums contribute positively: the reverse term enters with ΔF negated.
        let slope = log_slope(&log_fwd, lhs) + log_slope(&log_rev, rhs);
        (lhs - rhs, slope)
    }
}

/// Derivative of `ln Σ f_i` with respect to the shift of the arguments: the
/// `f`-weighted mean of `1 - f_i`.
fn log_slope(log_terms: &[f64], log_total: f64) -> f64 {
    log_terms
        .iter()
        .map(|&lt| (lt - log_total).exp() * (1.0 - lt.exp()))
        .sum()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Finds a bracket `[lo, hi]` with `h(lo) <= 0 <= hi`, starting at `guess`.
fn bracket(residual: &BennettResidual, guess: f64) -> Result<(f64, f64), EstimationError> {
    let mut width = 1.0;
    let (mut lo, mut hi) = (guess - width, guess + width);
    for _ in 0..MAX_BRACKET_EXPANSIONS {
        let h_lo = residual.eval(lo).0;
        let h_hi = residual.eval(hi).0;
        if h_lo <= 0.0 && h_hi >= 0.0 {
            return Ok((lo, hi));
        }
        width *= 2.0;
        if h_lo > 0.0 {
            lo -= width;
        }
        if h_hi < 0.0 {
            hi += width;
        }
    }
    Err(EstimationError::NoConvergence {
        iterations: MAX_BRACKET_EXPANSIONS,
    })
}

/// Solves Bennett's equation for the reduced free-energy difference.
///
/// Uses a Newton iteration safeguarded by bisection on a sign-changing bracket.
pub fn bar(w_f: &[f64], w_r: &[f64]) -> Result<f64, EstimationError> {
    validate(w_f, w_r)?;
    let residual = BennettResidual::new(w_f, w_r);
    let guess = 0.5 * (mean(w_f) - mean(w_r));
    let (mut lo, mut hi) = bracket(&residual, guess)?;

    let mut x = guess.clamp(lo, hi);
    for iteration in 0..MAX_ITERATIONS {
        let (h, dh) = residual.eval(x);
        if h == 0.0 {
            return Ok(x);
        }
        if h < 0.0 {
            lo = x;
        } else {
            hi = x;
        }

        let newton = x - h / dh;
        let next = if dh > 0.0 && newton > lo && newton < hi {
            newton
        } else {
            0.5 * (lo + hi)
        };
        if (next - x).abs() <= TOLERANCE * (1.0 + x.abs()) || hi - lo <= TOLERANCE {
            trace!(iteration, df = next, "BAR converged");
            return Ok(next);
        }
        x = next;
    }
    Err(EstimationError::NoConvergence {
        iterations: MAX_ITERATIONS,
    })
}

fn population_std(values: &[f64]) -> f64 {
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

fn resample(values: &[f64], rng: &mut StdRng) -> Vec<f64> {
    (0..values.len())
        .map(|_| values[rng.gen_range(0..values.len())])
        .collect()
}

/// BAR estimate plus the standard deviation of `n_bootstrap` re-estimates on
/// resampled-with-replacement work arrays.
///
/// The resampling stream is seeded from `bootstrap.seed`, so repeated calls agree.
pub fn bar_with_bootstrapped_uncertainty(
    w_f: &[f64],
    w_r: &[f64],
    bootstrap: &BootstrapConfig,
) -> Result<(f64, f64), EstimationError> {
    let df = bar(w_f, w_r)?;
    if bootstrap.n_bootstrap == 0 {
        return Err(EstimationError::NoBootstrapSamples);
    }
    let mut rng = StdRng::seed_from_u64(bootstrap.seed);
    let estimates = (0..bootstrap.n_bootstrap)
        .map(|_| {
            let f = resample(w_f, &mut rng);
            let r = resample(w_r, &mut rng);
            bar(&f, &r)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((df, population_std(&estimates)))
}

/// Two-state MBAR overlap `O₀₁ + O₁₀` at the free-energy difference `df`.
///
/// 1 when both work distributions describe the same ensemble, approaching 0 as the
/// sampled distributions separate.
pub fn pair_overlap(w_f: &[f64], w_r: &[f64], df: f64) -> Result<f64, EstimationError> {
    validate(w_f, w_r)?;
    let (n0, n1) = (w_f.len() as f64, w_r.len() as f64);
    let (ln_n0, ln_n1) = (n0.ln(), n1.ln());

    // Pooled samples expressed as Δu = u_B - u_A; reverse works enter negated.
    let delta_u = w_f.iter().copied().chain(w_r.iter().map(|w| -w));
    let (mut s00, mut s01, mut s11) = (0.0, 0.0, 0.0);
    for du in delta_u {
        let log_denominator = logaddexp(ln_n0, ln_n1 + df - du);
        let w0 = (-log_denominator).exp();
        let w1 = (df - du - log_denominator).exp();
        s00 += w0 * w0;
        s01 += w0 * w1;
        s11 += w1 * w1;
    }
    trace!(s00, s11, "Pair overlap weights accumulated");
    Ok((s01 * (n0 + n1)).clamp(0.0, 1.0))
}

/// Full estimate for one `u_kln` tensor: BAR, bootstrap error and overlap.
pub fn estimate_from_ukln(
    u_kln: &UKln,
    bootstrap: &BootstrapConfig,
) -> Result<BarEstimate, EstimationError> {
    let w_f = u_kln.forward_work();
    let w_r = u_kln.reverse_work();
    let (df, df_err) = bar_with_bootstrapped_uncertainty(&w_f, &w_r, bootstrap)?;
    let overlap = pair_overlap(&w_f, &w_r, df)?;
    Ok(BarEstimate {
        df,
        df_err,
        overlap,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_distr::{Distribution, Normal};

    /// Gaussian works consistent with a true reduced difference `df` and variance `sigma²`.
    fn gaussian_works(df: f64, sigma: f64, n: usize, seed: u64) -> (Vec<f64>, Vec<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let half_var = 0.5 * sigma * sigma;
        let fwd = Normal::new(df + half_var, sigma).unwrap();
        let rev = Normal::new(-df + half_var, sigma).unwrap();
        let w_f = (0..n).map(|_| fwd.sample(&mut rng)).collect();
        let w_r = (0..n).map(|_| rev.sample(&mut rng)).collect();
        (w_f, w_r)
    }

    #[test]
    fn zero_separation_gives_zero_free_energy() {
        let (w_f, w_r) = gaussian_works(0.0, 1e-3, 200, 1);
        let (df, err) = bar_with_bootstrapped_uncertainty(&w_f, &w_r, &BootstrapConfig::default()).unwrap();
        assert!(df.abs() < 1e-3 + 3.0 * err);
    }

    #[test]
    fn identical_zero_works_give_exactly_zero() {
        let df = bar(&[0.0; 10], &[0.0; 10]).unwrap();
        assert!(df.abs() < 1e-10);
    }

    #[test]
    fn recovers_known_gaussian_free_energy() {
        let (w_f, w_r) = gaussian_works(2.0, 1.0, 5000, 7);
        let df = bar(&w_f, &w_r).unwrap();
        assert!((df - 2.0).abs() < 0.1, "df = {df}");
    }

    #[test]
    fn estimator_is_antisymmetric() {
        let (w_f, w_r) = gaussian_works(1.3, 1.5, 300, 3);
        let forward = bar(&w_f, &w_r).unwrap();
        let backward = bar(&w_r, &w_f).unwrap();
        assert!((forward + backward).abs() < 1e-8);
    }

    #[test]
    fn unequal_sample_counts_are_supported() {
        let (w_f, _) = gaussian_works(0.5, 1.0, 400, 11);
        let (_, w_r) = gaussian_works(0.5, 1.0, 100, 12);
        let df = bar(&w_f, &w_r).unwrap();
        assert!((df - 0.5).abs() < 0.3, "df = {df}");
    }

    #[test]
    fn too_few_samples_is_an_error() {
        assert_eq!(
            bar(&[1.0], &[1.0, 2.0]).unwrap_err(),
            EstimationError::InsufficientData {
                n_forward: 1,
                n_reverse: 2
            }
        );
        assert!(matches!(
            bar(&[], &[]),
            Err(EstimationError::InsufficientData { .. })
        ));
    }

    #[test]
    fn non_finite_works_are_rejected() {
        assert_eq!(
            bar(&[0.0, f64::NAN], &[0.0, 1.0]).unwrap_err(),
            EstimationError::NonFiniteWork {
                direction: "Forward"
            }
        );
    }

    #[test]
    fn bootstrap_is_reproducible_for_a_fixed_seed() {
        let (w_f, w_r) = gaussian_works(1.0, 2.0, 100, 5);
        let config = BootstrapConfig {
            n_bootstrap: 20,
            seed: 99,
        };
        let a = bar_with_bootstrapped_uncertainty(&w_f, &w_r, &config).unwrap();
        let b = bar_with_bootstrapped_uncertainty(&w_f, &w_r, &config).unwrap();
        assert_eq!(a, b);
        assert!(a.1 > 0.0);
    }

    #[test]
    fn bootstrap_error_shrinks_with_more_data() {
        let config = BootstrapConfig::default();
        let (f_small, r_small) = gaussian_works(1.0, 1.5, 50, 21);
        let (f_large, r_large) = gaussian_works(1.0, 1.5, 2000, 22);
        let (_, err_small) = bar_with_bootstrapped_uncertainty(&f_small, &r_small, &config).unwrap();
        let (_, err_large) = bar_with_bootstrapped_uncertainty(&f_large, &r_large, &config).unwrap();
        assert!(err_large < err_small);
    }

    #[test]
    fn overlap_of_identical_ensembles_is_one() {
        let works = vec![0.0; 50];
        let overlap = pair_overlap(&works, &works, 0.0).unwrap();
        assert!((overlap - 1.0).abs() < 1e-12);
    }

    #[test]
    fn overlap_vanishes_for_disjoint_distributions() {
        let (w_f, w_r) = gaussian_works(0.0, 30.0, 200, 4);
        let df = bar(&w_f, &w_r).unwrap();
        let overlap = pair_overlap(&w_f, &w_r, df).unwrap();
        assert!(overlap < 0.05, "overlap = {overlap}");
    }

    #[test]
    fn overlap_is_bounded_for_varied_inputs() {
        for (i, sigma) in [0.1, 0.5, 1.0, 3.0, 10.0].into_iter().enumerate() {
            let (w_f, w_r) = gaussian_works(i as f64 - 2.0, sigma, 100, i as u64);
            let df = bar(&w_f, &w_r).unwrap();
            let overlap = pair_overlap(&w_f, &w_r, df).unwrap();
            assert!((0.0..=1.0).contains(&overlap));
        }
    }

    #[test]
    fn estimate_from_ukln_uses_work_convention() {
        let u = UKln::new(
            "PositionRestraint",
            [[vec![0.0, 0.1, 0.2], vec![1.0, 1.1, 0.9]], [vec![1.0, 1.2, 0.8], vec![0.0, 0.1, 0.0]]],
        );
        let estimate = estimate_from_ukln(&u, &BootstrapConfig::default()).unwrap();
        let direct = bar(&u.forward_work(), &u.reverse_work()).unwrap();
        assert_eq!(estimate.df, direct);
        assert!((0.0..=1.0).contains(&estimate.overlap));
    }
}

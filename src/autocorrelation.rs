// autocorrelation.rs - Autocorrelation analysis for correlated Monte Carlo time series
//
// FFT autocorrelation, integrated autocorrelation time with Sokal's automatic
// window, effective sample size, burn-in detection, thinning and the corrected
// standard error of the mean.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::error::{Result, SqmError};

/// Sokal window constant: stop summing once M >= C * tau(M).
pub const SOKAL_C: f64 = 5.0;

fn mean(data: &[f64]) -> f64 {
    data.iter().sum::<f64>() / data.len() as f64
}

/// Population variance (ddof = 0).
fn pvariance(data: &[f64]) -> f64 {
    let m = mean(data);
    data.iter().map(|&x| (x - m).powi(2)).sum::<f64>() / data.len() as f64
}

/// Normalised autocorrelation function rho(0..=max_lag), rho(0) = 1.
///
/// The mean-subtracted series is zero-padded to `2n` before the transform so the
/// spectral product gives the linear (not circular) autocovariance. A constant
/// series has no defined normalisation and yields all ones.
///
/// `max_lag` defaults to `n - 1` and is clamped to it.
pub fn autocorrelation(data: &[f64], max_lag: Option<usize>) -> Vec<f64> {
    let n = data.len();
    if n == 0 {
        return Vec::new();
    }
    let max_lag = max_lag.unwrap_or(n - 1).min(n - 1);

    if pvariance(data) == 0.0 {
        return vec![1.0; max_lag + 1];
    }

    let m = mean(data);
    let size = 2 * n;
    let mut buf: Vec<Complex<f64>> = data
        .iter()
        .map(|&x| Complex::new(x - m, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)).take(size - n))
        .collect();

    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_forward(size).process(&mut buf);
    for z in buf.iter_mut() {
        *z = Complex::new(z.norm_sqr(), 0.0);
    }
    planner.plan_fft_inverse(size).process(&mut buf);

    // The unnormalised inverse carries a factor `size` that cancels below.
    let c0 = buf[0].re;
    buf[..=max_lag].iter().map(|z| z.re / c0).collect()
}

/// Integrated autocorrelation time tau_int = 0.5 + sum_{k=1}^{M} rho(k).
///
/// The window M is the smallest M >= 1 with M >= 5 * tau(M), searched up to
/// `min(n - 1, n / 2)`. When no lag satisfies the condition the last partial
/// sum is returned. Independent data gives tau_int close to 0.5.
pub fn integrated_autocorr_time(data: &[f64]) -> Result<f64> {
    let n = data.len();
    if n == 0 {
        return Err(SqmError::Statistical(
            "integrated autocorrelation time of an empty series".into(),
        ));
    }
    let max_lag = (n - 1).min(n / 2);
    if max_lag == 0 {
        return Ok(0.5);
    }

    let rho = autocorrelation(data, Some(max_lag));
    let mut tau = 0.5;
    for (m, &r) in rho.iter().enumerate().skip(1) {
        tau += r;
        if m as f64 >= SOKAL_C * tau {
            return Ok(tau);
        }
    }
    Ok(tau)
}

/// N_eff = n / (2 tau_int), never below one.
pub fn effective_sample_size(data: &[f64]) -> Result<f64> {
    let tau = integrated_autocorr_time(data)?;
    Ok(effective_size_for_tau(data.len(), tau))
}

/// N_eff for `n` samples with an already estimated tau_int.
pub fn effective_size_for_tau(n: usize, tau: f64) -> f64 {
    (n as f64 / (2.0 * tau)).max(1.0)
}

/// Knobs for [`detect_thermalization_with`]. The defaults are empirically tuned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThermalizationPolicy {
    /// Samples per averaging window
    pub window_size: usize,
    /// Upper bound on consecutive in-range windows required
    pub consecutive: usize,
    /// Width of the acceptance band in units of the stationary spread
    pub n_sigma: f64,
}

impl Default for ThermalizationPolicy {
    fn default() -> Self {
        Self { window_size: 10, consecutive: 3, n_sigma: 3.0 }
    }
}

/// Burn-in length (in samples) with the default policy and the given window size.
pub fn detect_thermalization(data: &[f64], window_size: usize) -> usize {
    detect_thermalization_with(
        data,
        ThermalizationPolicy { window_size, ..ThermalizationPolicy::default() },
    )
}

/// Burn-in length in samples, always a multiple of the window size.
///
/// The later half of the window means is taken as the stationary regime. Scanning
/// from the start, the first run of `min(consecutive, n_windows / 3)` windows whose
/// means lie within `n_sigma` standard deviations of the stationary mean marks the
/// end of thermalization. If no run qualifies, the start of the later half is used.
pub fn detect_thermalization_with(data: &[f64], policy: ThermalizationPolicy) -> usize {
    let w = policy.window_size;
    let n = data.len();
    if w == 0 || n < 2 * w {
        return 0;
    }
    let n_windows = n / w;
    if n_windows < 3 {
        return 0;
    }

    let window_means: Vec<f64> = data.chunks_exact(w).take(n_windows).map(mean).collect();

    let stationary_start = n_windows / 2;
    let stationary = &window_means[stationary_start..];
    let st_mean = mean(stationary);
    let st_std = pvariance(stationary).sqrt();

    let threshold = if st_std < 1e-15 { 1e-10 } else { policy.n_sigma * st_std };
    let run = policy.consecutive.min(n_windows / 3).max(1);

    window_means
        .windows(run)
        .position(|block| block.iter().all(|&m| (m - st_mean).abs() <= threshold))
        .map_or(stationary_start * w, |i| i * w)
}

/// Every `thin_interval`-th element starting at index 0.
///
/// Without an explicit interval, `max(1, ceil(2 tau_int))` is used.
pub fn thin_data(data: &[f64], thin_interval: Option<usize>) -> Result<Vec<f64>> {
    let step = match thin_interval {
        Some(0) => {
            return Err(SqmError::Statistical("thinning interval must be positive".into()))
        }
        Some(k) => k,
        None if data.is_empty() => 1,
        None => ((2.0 * integrated_autocorr_time(data)?).ceil() as usize).max(1),
    };
    Ok(data.iter().step_by(step).copied().collect())
}

/// Mean and autocorrelation-corrected standard error sqrt(s^2 * 2 tau_int / n).
///
/// For tau_int >= 0.5 this is never smaller than the naive error s / sqrt(n).
/// Strongly anti-correlated series can drive the Sokal sum below zero, and the
/// error is then NaN.
pub fn corrected_error(data: &[f64]) -> Result<(f64, f64)> {
    check_error_len(data.len())?;
    let tau = integrated_autocorr_time(data)?;
    corrected_error_for_tau(data, tau)
}

/// [`corrected_error`] with an already estimated tau_int.
pub fn corrected_error_for_tau(data: &[f64], tau: f64) -> Result<(f64, f64)> {
    let n = data.len();
    check_error_len(n)?;
    let m = mean(data);
    let var = data.iter().map(|&x| (x - m).powi(2)).sum::<f64>() / (n as f64 - 1.0);
    Ok((m, (var * 2.0 * tau / n as f64).sqrt()))
}

fn check_error_len(n: usize) -> Result<()> {
    if n < 2 {
        return Err(SqmError::Statistical(format!(
            "corrected error needs at least 2 samples, got {n}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Direct O(n^2) estimator used to cross-check the FFT path.
    fn naive_acf(data: &[f64], max_lag: usize) -> Vec<f64> {
        let n = data.len();
        let m = mean(data);
        let c = |k: usize| (0..n - k).map(|i| (data[i] - m) * (data[i + k] - m)).sum::<f64>();
        let c0 = c(0);
        (0..=max_lag).map(|k| c(k) / c0).collect()
    }

    #[test]
    fn fft_matches_direct_sum() {
        let data: Vec<f64> = (0..64).map(|i| ((i * 7919) % 31) as f64 - 0.3 * i as f64).collect();
        let fast = autocorrelation(&data, Some(20));
        let slow = naive_acf(&data, 20);
        assert_eq!(fast.len(), 21);
        for (a, b) in fast.iter().zip(&slow) {
            assert!((a - b).abs() < 1e-10, "{a} vs {b}");
        }
    }

    #[test]
    fn padding_prevents_wraparound() {
        // A linear ramp has strong positive lag-1 correlation and, without
        // padding, a spurious negative tail would fold back onto small lags.
        let data: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let rho = autocorrelation(&data, None);
        assert_eq!(rho.len(), 50);
        assert!(rho[1] > 0.9);
        let slow = naive_acf(&data, 49);
        assert!((rho[49] - slow[49]).abs() < 1e-10);
    }

    #[test]
    fn constant_series_is_all_ones() {
        assert_eq!(autocorrelation(&[3.0; 8], Some(4)), vec![1.0; 5]);
        assert_eq!(autocorrelation(&[3.0; 8], None).len(), 8);
    }

    #[test]
    fn short_series_have_half_tau() {
        assert_eq!(integrated_autocorr_time(&[1.0]).unwrap(), 0.5);
        assert!(integrated_autocorr_time(&[]).is_err());
    }

    #[test]
    fn thin_interval_zero_is_rejected() {
        assert!(thin_data(&[1.0, 2.0], Some(0)).is_err());
    }

    #[test]
    fn thermalization_short_inputs() {
        assert_eq!(detect_thermalization(&[0.0; 19], 10), 0);
        assert_eq!(detect_thermalization(&[0.0; 25], 10), 0);
        assert_eq!(detect_thermalization(&[0.0; 100], 0), 0);
    }
}

//! Double-gamma hemodynamic response function.
//!
//! The measured signal lags neural events by several seconds; predictions are
//! convolved with a kernel modeling that lag. The canonical form is a
//! difference of two gamma densities: a positive lobe peaking ~5 s
//! post-stimulus and a smaller undershoot peaking ~15 s, both shifted by the
//! unit's estimated delay.
//!
//! Numerical notes:
//! - The gamma density is evaluated in log space (`exp(p*ln t - t - lnΓ(p+1))`)
//!   to avoid overflow for large shape parameters.
//! - The kernel is normalized by its trapezoidal integral so amplitude
//!   estimates stay comparable across delays and sampling rates.

use statrs::function::gamma::ln_gamma;

use crate::error::{Error, Result};

/// Kernel duration in seconds.
const KERNEL_SECONDS: f64 = 33.0;

/// Undershoot amplitude relative to the positive lobe.
const UNDERSHOOT_RATIO: f64 = 0.35;

/// Signature of a kernel generator: `(delay, tr_length) -> kernel`.
pub type HrfModelFn = fn(f64, f64) -> Result<Vec<f64>>;

/// Generate the double-gamma kernel for a given delay, sampled at `tr_length`.
pub fn double_gamma_hrf(delay: f64, tr_length: f64) -> Result<Vec<f64>> {
    if !(tr_length.is_finite() && tr_length > 0.0) {
        return Err(Error::Config(format!(
            "Invalid repetition time: {tr_length} (must be finite and > 0)."
        )));
    }
    let peak = 5.0 + delay;
    let under = 15.0 + delay;
    if !(delay.is_finite() && peak > 0.0) {
        return Err(Error::Config(format!(
            "Invalid response delay: {delay} (peak time must stay positive)."
        )));
    }

    let n = (KERNEL_SECONDS / tr_length).ceil() as usize;
    let mut kernel = Vec::with_capacity(n);
    for i in 0..n {
        let t = i as f64 * tr_length;
        kernel.push(gamma_density(t, peak) - UNDERSHOOT_RATIO * gamma_density(t, under));
    }

    // Normalize by the trapezoidal integral.
    let mut integral = 0.0;
    for w in kernel.windows(2) {
        integral += 0.5 * (w[0] + w[1]) * tr_length;
    }
    if integral.abs() > 1e-12 {
        for v in &mut kernel {
            *v /= integral;
        }
    }

    Ok(kernel)
}

/// Unit-rate gamma density with mode at `peak`, evaluated in log space.
fn gamma_density(t: f64, peak: f64) -> f64 {
    if t <= 0.0 {
        return 0.0;
    }
    (peak * t.ln() - t - ln_gamma(peak + 1.0)).exp()
}

/// Convolve a signal with a kernel, truncating to the signal's length.
pub fn convolve_truncated(signal: &[f64], kernel: &[f64]) -> Vec<f64> {
    let n = signal.len();
    let mut out = vec![0.0; n];
    for (t, o) in out.iter_mut().enumerate() {
        let k_max = kernel.len().min(t + 1);
        let mut acc = 0.0;
        for k in 0..k_max {
            acc += kernel[k] * signal[t - k];
        }
        *o = acc;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_peaks_near_five_seconds() {
        let tr = 1.0;
        let kernel = double_gamma_hrf(0.0, tr).unwrap();
        let (peak_idx, _) = kernel
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap();
        let peak_t = peak_idx as f64 * tr;
        assert!((peak_t - 5.0).abs() <= 1.0, "peak at {peak_t}s");
    }

    #[test]
    fn delay_shifts_the_peak() {
        let base = double_gamma_hrf(0.0, 0.5).unwrap();
        let delayed = double_gamma_hrf(2.0, 0.5).unwrap();
        let argmax = |k: &[f64]| {
            k.iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
                .map(|(i, _)| i)
                .unwrap()
        };
        assert!(argmax(&delayed) > argmax(&base));
    }

    #[test]
    fn kernel_integral_is_unity() {
        let tr = 0.5;
        let kernel = double_gamma_hrf(0.0, tr).unwrap();
        let mut integral = 0.0;
        for w in kernel.windows(2) {
            integral += 0.5 * (w[0] + w[1]) * tr;
        }
        assert!((integral - 1.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_bad_sampling() {
        assert!(double_gamma_hrf(0.0, 0.0).is_err());
        assert!(double_gamma_hrf(-6.0, 1.0).is_err());
    }

    #[test]
    fn convolution_with_delta_is_identity() {
        let signal = vec![1.0, 2.0, 3.0, 4.0];
        let out = convolve_truncated(&signal, &[1.0]);
        assert_eq!(out, signal);
    }

    #[test]
    fn convolution_delays_the_signal() {
        let signal = vec![1.0, 0.0, 0.0, 0.0];
        let out = convolve_truncated(&signal, &[0.0, 1.0]);
        assert_eq!(out, vec![0.0, 1.0, 0.0, 0.0]);
    }
}

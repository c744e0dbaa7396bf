//! Circular 2-D Gaussian receptive field model.
//!
//! The field is an isotropic Gaussian over display coordinates with center
//! `(x, y)` and dispersion `sigma`. A prediction is built in three steps:
//!
//! 1. weight every stimulus pixel by the field and sum per timepoint
//! 2. convolve the projected series with the hemodynamic kernel
//! 3. normalize (coarse prediction) or scale by amplitude + baseline (full)

use std::sync::Arc;

use crate::math::convolve_truncated;
use crate::models::context::{EncodingModel, ModelContext};
use crate::stimulus::Stimulus;

/// Pixels whose field weight falls below this fraction of the peak are
/// skipped during projection.
const RF_CUTOFF: f64 = 1e-6;

pub struct GaussianModel {
    ctx: ModelContext,
}

impl GaussianModel {
    pub fn new(stimulus: Arc<Stimulus>) -> Self {
        Self { ctx: ModelContext::new(stimulus) }
    }

    /// Build from an already-configured context (custom kernel, cache path,
    /// bounded amplitudes).
    pub fn with_context(ctx: ModelContext) -> Self {
        Self { ctx }
    }

    pub fn context_mut(&mut self) -> &mut ModelContext {
        &mut self.ctx
    }

    /// Per-pixel field weights, normalized by the Gaussian integral so
    /// dispersion changes do not masquerade as amplitude changes.
    pub fn receptive_field(&self, x: f64, y: f64, sigma: f64) -> Vec<f64> {
        let stim = &self.ctx.stimulus;
        let two_sigma_sq = 2.0 * sigma * sigma;
        let norm = 2.0 * std::f64::consts::PI * sigma * sigma;
        stim.deg_x()
            .iter()
            .zip(stim.deg_y().iter())
            .map(|(&dx, &dy)| {
                let d = (dx - x) * (dx - x) + (dy - y) * (dy - y);
                (-d / two_sigma_sq).exp() / norm
            })
            .collect()
    }

    /// Project the stimulus through the field and convolve with the kernel,
    /// returning the normalized series. Degenerate parameters yield NaN
    /// samples, which downstream search stages discard.
    fn base_response(&self, x: f64, y: f64, sigma: f64) -> Vec<f64> {
        let stim = &self.ctx.stimulus;
        let n_t = stim.n_timepoints();

        if !(sigma.is_finite() && sigma > 0.0 && x.is_finite() && y.is_finite()) {
            return vec![f64::NAN; n_t];
        }

        let rf = self.receptive_field(x, y, sigma);
        let peak = rf.iter().cloned().fold(0.0_f64, f64::max);
        let cutoff = peak * RF_CUTOFF;

        let mut response = vec![0.0; n_t];
        for (pix, &w) in rf.iter().enumerate() {
            if w <= cutoff {
                continue;
            }
            let row = stim.frames().row(pix);
            for (t, r) in response.iter_mut().enumerate() {
                *r += w * row[t];
            }
        }

        let kernel = match self.ctx.hemodynamic_kernel() {
            Ok(k) => k,
            Err(_) => return vec![f64::NAN; n_t],
        };
        let convolved = convolve_truncated(&response, &kernel);
        (self.ctx.normalizer)(&convolved)
    }
}

impl EncodingModel for GaussianModel {
    fn context(&self) -> &ModelContext {
        &self.ctx
    }

    fn free_params(&self) -> usize {
        3
    }

    /// # Panics
    /// Panics if `params` has fewer than 3 entries.
    fn ballpark_prediction(&self, params: &[f64]) -> Vec<f64> {
        self.base_response(params[0], params[1], params[2])
    }

    /// # Panics
    /// Panics if `params` has fewer than 5 entries.
    fn prediction(&self, params: &[f64]) -> Vec<f64> {
        let beta = params[3];
        let baseline = params[4];
        self.base_response(params[0], params[1], params[2])
            .into_iter()
            .map(|v| v * beta + baseline)
            .collect()
    }
}

/// A drifting-bar stimulus: a vertical bar sweeping left to right for the
/// first half of the run, then a horizontal bar sweeping top to bottom. The
/// two passes identify both center coordinates. Shared by the unit tests of
/// several fitting modules.
#[cfg(test)]
pub(crate) fn sweeping_bar_stimulus(screen_dva: f64, side: usize, n_t: usize) -> Arc<Stimulus> {
    use crate::mem::SharedMatrix;
    use crate::stimulus::coordinate_grid;

    let (deg_x, deg_y) = coordinate_grid(screen_dva, side);
    let half = (n_t / 2).max(1);
    let mut frames = vec![0.0; side * side * n_t];
    for t in 0..n_t {
        if t < half {
            let col = (t * side) / half;
            for row in 0..side {
                frames[(row * side + col) * n_t + t] = 1.0;
            }
        } else {
            let row = ((t - half) * side) / (n_t - half).max(1);
            for col in 0..side {
                frames[(row * side + col) * n_t + t] = 1.0;
            }
        }
    }
    let frames = SharedMatrix::new(frames, side * side, n_t).unwrap();
    Arc::new(Stimulus::new(frames, deg_x.into(), deg_y.into(), 1.0, screen_dva).unwrap())
}

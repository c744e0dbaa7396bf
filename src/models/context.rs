//! Shared model state and the model capability trait.

use std::path::PathBuf;
use std::sync::Arc;

use crate::domain::SearchGrid;
use crate::error::{Error, Result};
use crate::math::{self, HrfModelFn, NormalizerFn};
use crate::mem::{Memo, SharedMatrix};
use crate::models::cache::{self, CacheEntry, CachedModelTable};
use crate::stimulus::Stimulus;

/// State every model family binds: the stimulus, the response-kernel
/// generator and its delay, the normalizer applied to raw predictions, an
/// optional nuisance design matrix, and an optional precomputed model table.
pub struct ModelContext {
    pub stimulus: Arc<Stimulus>,
    /// Generates the convolution kernel for a given response delay.
    pub hrf_model: HrfModelFn,
    /// Response delay in seconds; `None` until set.
    pub hrf_delay: Option<f64>,
    /// Normalization applied to raw predicted series.
    pub normalizer: NormalizerFn,
    /// Confound design matrix (regressors x timepoints). Currently an unused
    /// hook: callers regress confounds out of the data up front instead.
    pub nuisance: Option<SharedMatrix>,
    /// Path to a serialized model table for nearest-neighbor ballpark lookup.
    pub cached_model_path: Option<PathBuf>,
    /// When set, regression slopes are reported as magnitudes (one-signed
    /// amplitudes).
    pub bounded_amplitude: bool,
    cache: Memo<Result<CachedModelTable>>,
}

impl ModelContext {
    pub fn new(stimulus: Arc<Stimulus>) -> Self {
        Self {
            stimulus,
            hrf_model: math::double_gamma_hrf,
            hrf_delay: Some(0.0),
            normalizer: math::zscore,
            nuisance: None,
            cached_model_path: None,
            bounded_amplitude: false,
            cache: Memo::new(),
        }
    }

    pub fn with_cached_model_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cached_model_path = Some(path.into());
        self
    }

    /// The convolution kernel for the configured response delay.
    pub fn hemodynamic_kernel(&self) -> Result<Vec<f64>> {
        let delay = self.hrf_delay.ok_or_else(|| {
            Error::Config("No response delay set; cannot generate the hemodynamic kernel.".to_string())
        })?;
        (self.hrf_model)(delay, self.stimulus.tr_length)
    }

    /// Ordinary least squares of `data` onto `prediction`.
    ///
    /// Returns `(slope, intercept)`; the slope is reported as its absolute
    /// value when the model is configured for one-signed amplitudes.
    pub fn regress(&self, prediction: &[f64], data: &[f64]) -> Result<(f64, f64)> {
        let (slope, intercept) = math::regress(prediction, data).ok_or_else(|| {
            Error::Data("Degenerate regression of data onto prediction.".to_string())
        })?;
        if self.bounded_amplitude {
            Ok((slope.abs(), intercept))
        } else {
            Ok((slope, intercept))
        }
    }

    /// The deserialized model table, loaded from disk exactly once.
    pub fn cached_model(&self) -> Result<&CachedModelTable> {
        let path = self
            .cached_model_path
            .clone()
            .ok_or_else(|| Error::Cache("No cached model path configured.".to_string()))?;
        self.cache
            .get_or_compute(|| cache::load_cached_model(&path))
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Derived view: the cached predicted series (entries x timepoints).
    pub fn cached_timeseries(&self) -> Result<&SharedMatrix> {
        Ok(self.cached_model()?.timeseries())
    }

    /// Derived view: the cached generating parameters (entries x params).
    pub fn cached_parameters(&self) -> Result<&SharedMatrix> {
        Ok(self.cached_model()?.parameters())
    }

    pub fn has_cached_model(&self) -> bool {
        self.cached_model_path.is_some()
    }
}

impl std::fmt::Debug for ModelContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelContext")
            .field("hrf_delay", &self.hrf_delay)
            .field("cached_model_path", &self.cached_model_path)
            .field("bounded_amplitude", &self.bounded_amplitude)
            .finish()
    }
}

/// Capability interface every model family implements.
///
/// Both prediction functions are pure given `params` and the model's fixed
/// state, and both return a series the same length as the data being fit.
/// Degenerate parameter combinations may produce non-finite samples; search
/// and cache-building stages discard those combinations rather than failing.
pub trait EncodingModel: Send + Sync {
    fn context(&self) -> &ModelContext;

    /// Number of intrinsic model parameters (amplitude and baseline are
    /// appended by regression and refinement, not counted here).
    fn free_params(&self) -> usize;

    /// Coarse, unscaled prediction used by the grid search. `params` holds
    /// the intrinsic parameters only.
    fn ballpark_prediction(&self, params: &[f64]) -> Vec<f64>;

    /// Full prediction. `params` holds the intrinsic parameters followed by
    /// amplitude and baseline.
    fn prediction(&self, params: &[f64]) -> Vec<f64>;

    /// Evaluate the coarse prediction over every grid combination (randomized
    /// order, distributed over `workers`), discarding combinations with
    /// non-finite output. Supports pre-building a model table for
    /// nearest-neighbor ballpark lookup.
    fn cache_model(
        &self,
        grid: &SearchGrid,
        ns: Option<usize>,
        workers: usize,
        seed: u64,
    ) -> Result<Vec<CacheEntry>> {
        cache::build_cache(self, grid, ns, workers, seed)
    }
}

//! Per-unit fit engine.
//!
//! A [`VoxelFit`] drives every stage of one unit's estimation:
//!
//! 1. trend removal (exactly once, before any stage reads the data)
//! 2. ballpark estimate: grid search, cached-table lookup, or a placeholder
//!    when the whole search is deferred to the global stage
//! 3. refinement: bounded, constrained local descent seeded at the ballpark,
//!    or a bounded, constrained global search over the full space
//! 4. goodness of fit and a fixed-layout summary line
//!
//! Every derived field is computed at most once and is pure given the fit's
//! initial configuration; forcing a recomputation would produce identical
//! values. A fit owns its data exclusively, so a batch can hand whole fits to
//! worker threads without any locking.

use std::sync::Arc;
use std::time::Instant;

use crate::domain::{position_constraints, Constraint, FitMethod, FitSettings, VoxelIndex};
use crate::error::{Error, Result};
use crate::fit::brute::{brute_force_search, BruteResult};
use crate::fit::global::{differential_evolution, GlobalConfig};
use crate::fit::refine::{LocalOptimizer, Objective, OptimizationOutcome, RefineConfig};
use crate::math;
use crate::mem::Memo;
use crate::models::EncodingModel;

/// Weight of the quadratic penalty applied to constraint violations inside
/// the refinement objectives.
const CONSTRAINT_PENALTY: f64 = 1e6;

/// Residual objective for the refinement stages: sum of squared residuals of
/// the full prediction, plus quadratic penalties for constraint violations.
struct PenalizedResiduals<'a, M: ?Sized> {
    model: &'a M,
    data: &'a [f64],
    constraints: &'a [Constraint],
}

impl<M: EncodingModel + ?Sized> Objective for PenalizedResiduals<'_, M> {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        let pred = self.model.prediction(params);
        let mut cost = math::sum_squared_error(self.data, &pred);
        if !cost.is_finite() {
            // Degenerate parameter regions lose to any feasible point.
            return Ok(f64::INFINITY);
        }
        for c in self.constraints {
            let v = c.violation(params);
            if v > 0.0 {
                cost += CONSTRAINT_PENALTY * v * v;
            }
        }
        Ok(cost)
    }
}

/// The fit state machine for a single unit of data.
pub struct VoxelFit<M: EncodingModel> {
    model: Arc<M>,
    data: Vec<f64>,
    settings: FitSettings,
    constraints: Vec<Constraint>,
    /// Concrete refinement boxes, padded to intrinsic parameters + 2.
    boxes: Vec<(f64, f64)>,
    brute: Memo<Result<BruteResult>>,
    ballpark: Memo<Result<Vec<f64>>>,
    ballpark_pred: Memo<Result<Vec<f64>>>,
    scaling: Memo<Result<(f64, f64)>>,
    refined: Memo<Result<OptimizationOutcome>>,
    global: Memo<Result<OptimizationOutcome>>,
    prediction: Memo<Result<Vec<f64>>>,
    rss: Memo<Result<f64>>,
    rsquared: Memo<Result<f64>>,
    rsquared_adj: Memo<Result<f64>>,
    rsquared0: Memo<Result<Option<f64>>>,
    elapsed_ms: Memo<u128>,
}

impl<M: EncodingModel> VoxelFit<M> {
    /// Construct a fit for one unit.
    ///
    /// Configuration problems (grid/bounds shape, missing sample count) fail
    /// here rather than mid-pipeline. If `auto_fit` is set, every stage of
    /// the configured method runs immediately, in dependency order.
    pub fn new(model: Arc<M>, data: Vec<f64>, settings: FitSettings) -> Result<Self> {
        let free = model.free_params();
        let terminal = free + 2;

        if data.len() < 2 {
            return Err(Error::Data(format!(
                "Unit data has {} samples; at least 2 are required.",
                data.len()
            )));
        }
        if settings.grid.len() != free {
            return Err(Error::Config(format!(
                "Grid has {} dimensions but the model has {free} parameters.",
                settings.grid.len()
            )));
        }
        if settings.bounds.len() != free && settings.bounds.len() != terminal {
            return Err(Error::Config(format!(
                "Bounds cover {} dimensions; expected {free} or {terminal}.",
                settings.bounds.len()
            )));
        }
        let boxes = settings.bounds.padded(terminal).to_boxes();
        for (i, &(lo, hi)) in boxes.iter().enumerate() {
            if lo > hi {
                return Err(Error::Config(format!(
                    "Bounds for dimension {i} are inverted: ({lo}, {hi})."
                )));
            }
        }
        if settings.fit_method != FitMethod::GlobalOpt
            && !model.context().has_cached_model()
            && settings.grid.needs_sample_count()
            && settings.ns.is_none()
        {
            return Err(Error::Config(
                "Grid spans require a sample count (Ns) for the ballpark search.".to_string(),
            ));
        }

        // Trend removal happens exactly once, before any stage reads the data.
        let data = match settings.nuisance {
            Some(f) => {
                let processed = f(&data);
                if processed.len() != data.len() {
                    return Err(Error::Data(format!(
                        "Trend removal changed the data length: {} -> {}.",
                        data.len(),
                        processed.len()
                    )));
                }
                processed
            }
            None => data,
        };

        let constraints = if free >= 3 {
            position_constraints(model.context().stimulus.screen_dva, settings.outer_limit)
        } else {
            Vec::new()
        };

        let fit = Self {
            model,
            data,
            settings,
            constraints,
            boxes,
            brute: Memo::new(),
            ballpark: Memo::new(),
            ballpark_pred: Memo::new(),
            scaling: Memo::new(),
            refined: Memo::new(),
            global: Memo::new(),
            prediction: Memo::new(),
            rss: Memo::new(),
            rsquared: Memo::new(),
            rsquared_adj: Memo::new(),
            rsquared0: Memo::new(),
            elapsed_ms: Memo::new(),
        };

        if fit.settings.auto_fit {
            fit.run()?;
        }

        Ok(fit)
    }

    /// Execute the configured pipeline stages in dependency order.
    pub fn run(&self) -> Result<()> {
        let start = Instant::now();

        match self.settings.fit_method {
            FitMethod::GridOnly => {
                self.ballpark()?;
            }
            FitMethod::TwoStep => {
                self.ballpark()?;
                self.estimate()?;
            }
            FitMethod::GlobalOpt => {
                self.estimate()?;
            }
        }

        self.elapsed_ms.get_or_compute(|| start.elapsed().as_millis());

        if self.settings.fit_method != FitMethod::GridOnly {
            self.rss()?;
            self.rsquared()?;
        }

        Ok(())
    }

    /// The coarse estimate: intrinsic parameters + amplitude + baseline.
    ///
    /// Under `global_opt` this is a placeholder of unset (NaN) values; the
    /// whole search is deferred to the global stage.
    pub fn ballpark(&self) -> Result<Vec<f64>> {
        self.ballpark.get_or_compute(|| self.compute_ballpark()).clone()
    }

    fn compute_ballpark(&self) -> Result<Vec<f64>> {
        if self.settings.fit_method == FitMethod::GlobalOpt {
            return Ok(vec![f64::NAN; self.model.free_params() + 2]);
        }
        if self.model.context().has_cached_model() {
            return self.best_cached_parameters();
        }

        let brute = self.brute_force()?;
        let (slope, intercept) = self.scaling()?;
        let mut out = brute.params;
        out.push(slope);
        out.push(intercept);
        Ok(out)
    }

    /// Winner of the exhaustive grid search.
    pub fn brute_force(&self) -> Result<BruteResult> {
        self.brute
            .get_or_compute(|| {
                brute_force_search(
                    self.model.as_ref(),
                    &self.data,
                    &self.settings.grid,
                    self.settings.ns,
                )
            })
            .clone()
    }

    /// Nearest cached entry by squared error; first minimum wins ties.
    fn best_cached_parameters(&self) -> Result<Vec<f64>> {
        let ctx = self.model.context();
        let series = ctx.cached_timeseries()?;
        if series.cols() != self.data.len() {
            return Err(Error::Data(format!(
                "Cached series length {} does not match data length {}.",
                series.cols(),
                self.data.len()
            )));
        }

        let mut best = 0;
        let mut best_err = f64::INFINITY;
        for i in 0..series.rows() {
            let err = math::sum_squared_error(series.row(i), &self.data);
            if err < best_err {
                best_err = err;
                best = i;
            }
        }

        let mut out = ctx.cached_parameters()?.row(best).to_vec();
        if out.len() == self.model.free_params() {
            // Tables persist intrinsic parameters only; amplitude and
            // baseline come from regressing the winning series on the data.
            let (slope, intercept) = ctx.regress(series.row(best), &self.data)?;
            out.push(slope);
            out.push(intercept);
        }
        Ok(out)
    }

    /// The model's coarse prediction at the grid winner.
    pub fn ballpark_prediction(&self) -> Result<Vec<f64>> {
        self.ballpark_pred
            .get_or_compute(|| {
                let brute = self.brute_force()?;
                Ok(self.model.ballpark_prediction(&brute.params))
            })
            .clone()
    }

    fn scaling(&self) -> Result<(f64, f64)> {
        self.scaling
            .get_or_compute(|| {
                let pred = self.ballpark_prediction()?;
                self.model.context().regress(&pred, &self.data)
            })
            .clone()
    }

    /// Amplitude of the ballpark prediction obtained by regression.
    pub fn slope(&self) -> Result<f64> {
        self.scaling().map(|s| s.0)
    }

    /// Baseline of the ballpark prediction obtained by regression.
    pub fn intercept(&self) -> Result<f64> {
        self.scaling().map(|s| s.1)
    }

    /// The ballpark prediction brought to the data's scale.
    pub fn scaled_ballpark_prediction(&self) -> Result<Vec<f64>> {
        let (slope, intercept) = self.scaling()?;
        Ok(self.ballpark_prediction()?.iter().map(|v| v * slope + intercept).collect())
    }

    /// Constrained local descent seeded at the ballpark estimate.
    pub fn refine(&self) -> Result<OptimizationOutcome> {
        self.refined
            .get_or_compute(|| {
                let seed = self.ballpark()?;
                let objective = PenalizedResiduals {
                    model: self.model.as_ref(),
                    data: &self.data,
                    constraints: &self.constraints,
                };
                LocalOptimizer::new(RefineConfig::default()).minimize(&objective, &seed, &self.boxes)
            })
            .clone()
    }

    /// Constrained global search over the full bounded space.
    pub fn global_search(&self) -> Result<OptimizationOutcome> {
        self.global
            .get_or_compute(|| {
                let objective = PenalizedResiduals {
                    model: self.model.as_ref(),
                    data: &self.data,
                    constraints: &self.constraints,
                };
                let config = GlobalConfig {
                    popsize: self.settings.popsize,
                    seed: self.settings.seed,
                    ..GlobalConfig::default()
                };
                differential_evolution(&objective, &self.boxes, &config)
            })
            .clone()
    }

    /// The terminal parameter vector of the configured method.
    pub fn estimate(&self) -> Result<Vec<f64>> {
        match self.settings.fit_method {
            FitMethod::GlobalOpt => self.global_search().map(|o| o.parameters),
            FitMethod::TwoStep => self.refine().map(|o| o.parameters),
            // No refinement stage: the grid winner is terminal.
            FitMethod::GridOnly => self.ballpark(),
        }
    }

    /// The model's full prediction at the terminal parameters.
    pub fn prediction(&self) -> Result<Vec<f64>> {
        self.prediction
            .get_or_compute(|| {
                let params = match self.settings.fit_method {
                    FitMethod::GridOnly => self.ballpark()?,
                    _ => self.estimate()?,
                };
                Ok(self.model.prediction(&params))
            })
            .clone()
    }

    /// Residual sum of squares of the terminal prediction.
    pub fn rss(&self) -> Result<f64> {
        self.rss
            .get_or_compute(|| Ok(math::sum_squared_error(&self.data, &self.prediction()?)))
            .clone()
    }

    /// Fraction of variance explained, forced into `[0, 1]`.
    ///
    /// Zero-variance data would make this undefined; any non-finite value is
    /// reported as 0 rather than propagated.
    pub fn rsquared(&self) -> Result<f64> {
        self.rsquared
            .get_or_compute(|| {
                let rss = self.rss()?;
                let m = math::mean(&self.data);
                let tss: f64 = self.data.iter().map(|v| (v - m) * (v - m)).sum();
                let r2 = 1.0 - rss / tss;
                if !r2.is_finite() {
                    return Ok(0.0);
                }
                Ok(r2.clamp(0.0, 1.0))
            })
            .clone()
    }

    /// R² corrected for the number of fitted parameters.
    pub fn rsquared_adj(&self) -> Result<f64> {
        self.rsquared_adj
            .get_or_compute(|| {
                let r2 = self.rsquared()?;
                let n = self.data.len() as f64;
                let k = self.estimate()?.len() as f64;
                let denom = n - k - 1.0;
                if denom <= 0.0 {
                    return Err(Error::Data(format!(
                        "Too few samples ({n}) to adjust R² for {k} parameters."
                    )));
                }
                Ok(1.0 - (1.0 - r2) * (n - 1.0) / denom)
            })
            .clone()
    }

    /// Squared correlation between the scaled ballpark prediction and the
    /// data: how much of the final fit the coarse stage already explained.
    /// Absent under `global_opt`, which has no coarse stage.
    pub fn rsquared0(&self) -> Result<Option<f64>> {
        self.rsquared0
            .get_or_compute(|| {
                if self.settings.fit_method == FitMethod::GlobalOpt {
                    return Ok(None);
                }
                let scaled = self.scaled_ballpark_prediction()?;
                let r = math::pearson(&self.data, &scaled);
                Ok(Some(r * r))
            })
            .clone()
    }

    /// Wall-clock milliseconds of the pipeline, once [`run`](Self::run) has
    /// completed.
    pub fn elapsed_ms(&self) -> Option<u128> {
        self.elapsed_ms.get().copied()
    }

    /// Fixed-layout one-line summary for external logging.
    pub fn summary(&self) -> Result<String> {
        let (x, y, z) = self.settings.voxel_index;
        let rsq = self.rsquared()?;
        let rounded: Vec<f64> =
            self.estimate()?.iter().map(|v| (v * 1e4).round() / 1e4).collect();

        Ok(match self.elapsed_ms() {
            Some(ms) => format!(
                "VOXEL=({x:03},{y:03},{z:03})   TIMEMS={ms:04}   RSQ={rsq:.2}  EST={rounded:?}"
            ),
            None => format!("VOXEL=({x:03},{y:03},{z:03})   RSQ={rsq:.2}  EST={rounded:?}"),
        })
    }

    pub fn voxel_index(&self) -> VoxelIndex {
        self.settings.voxel_index
    }

    /// The data as every stage sees it (after trend removal).
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn settings(&self) -> &FitSettings {
        &self.settings
    }

    pub fn model(&self) -> &Arc<M> {
        &self.model
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }
}

impl<M: EncodingModel> std::fmt::Debug for VoxelFit<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoxelFit")
            .field("voxel_index", &self.settings.voxel_index)
            .field("fit_method", &self.settings.fit_method)
            .field("n_samples", &self.data.len())
            .field("fitted", &self.elapsed_ms.is_computed())
            .finish()
    }
}

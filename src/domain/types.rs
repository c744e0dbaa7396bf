//! Shared domain types.
//!
//! These types are intentionally kept lightweight so they can be cloned into
//! every worker of a batch without dragging model state along.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Index of the unit (voxel) being fit inside its parent volume.
///
/// The fitting procedure itself never looks at this; it exists so results
/// collected from an unordered worker pool can be keyed back to their spatial
/// position by the caller.
pub type VoxelIndex = (usize, usize, usize);

/// Trend-removal callable applied to the data before any fitting stage.
pub type NuisanceFn = fn(&[f64]) -> Vec<f64>;

/// Fit strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitMethod {
    /// Coarse grid search followed by constrained local refinement.
    #[serde(rename = "2step")]
    TwoStep,
    /// Coarse grid search only; the grid winner is the terminal estimate.
    #[serde(rename = "grid_only")]
    GridOnly,
    /// Population-based global search over the full bounded space; no grid
    /// stage.
    #[serde(rename = "global_opt")]
    GlobalOpt,
}

impl FitMethod {
    /// Parse the canonical string form.
    ///
    /// An unrecognized name is a configuration error, never silently
    /// corrected.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "2step" => Ok(FitMethod::TwoStep),
            "grid_only" => Ok(FitMethod::GridOnly),
            "global_opt" => Ok(FitMethod::GlobalOpt),
            other => Err(Error::Config(format!(
                "Invalid fit method '{other}': must be one of \"2step\", \"grid_only\", \"global_opt\"."
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FitMethod::TwoStep => "2step",
            FitMethod::GridOnly => "grid_only",
            FitMethod::GlobalOpt => "global_opt",
        }
    }
}

impl std::str::FromStr for FitMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        FitMethod::parse(s)
    }
}

/// One dimension of the coarse search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GridDim {
    /// A `(low, high)` span sampled at `Ns` evenly spaced points.
    Span(f64, f64),
    /// An explicit list of sample values.
    Explicit(Vec<f64>),
}

/// The coarse search space: one `GridDim` per model parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchGrid {
    dims: Vec<GridDim>,
}

impl SearchGrid {
    pub fn new(dims: Vec<GridDim>) -> Self {
        Self { dims }
    }

    /// Build a grid of `(low, high)` spans.
    pub fn from_spans(spans: &[(f64, f64)]) -> Self {
        Self { dims: spans.iter().map(|&(lo, hi)| GridDim::Span(lo, hi)).collect() }
    }

    pub fn len(&self) -> usize {
        self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    /// Whether any dimension needs a sample count to be materialized.
    pub fn needs_sample_count(&self) -> bool {
        self.dims.iter().any(|d| matches!(d, GridDim::Span(_, _)))
    }

    /// Materialize per-dimension sample values.
    pub fn sample(&self, ns: Option<usize>) -> Result<Vec<Vec<f64>>> {
        self.dims.iter().map(|dim| sample_dim(dim, ns)).collect()
    }

    /// Every combination of the sampled dimensions (Cartesian product).
    pub fn combinations(&self, ns: Option<usize>) -> Result<Vec<Vec<f64>>> {
        let values = self.sample(ns)?;
        let mut combos: Vec<Vec<f64>> = vec![Vec::new()];
        for dim_values in &values {
            let mut next = Vec::with_capacity(combos.len() * dim_values.len());
            for combo in &combos {
                for &v in dim_values {
                    let mut extended = combo.clone();
                    extended.push(v);
                    next.push(extended);
                }
            }
            combos = next;
        }
        Ok(combos)
    }
}

fn sample_dim(dim: &GridDim, ns: Option<usize>) -> Result<Vec<f64>> {
    match dim {
        GridDim::Explicit(values) => {
            if values.is_empty() {
                return Err(Error::Config("Explicit grid dimension is empty.".to_string()));
            }
            if values.iter().any(|v| !v.is_finite()) {
                return Err(Error::Config("Explicit grid dimension contains non-finite values.".to_string()));
            }
            Ok(values.clone())
        }
        GridDim::Span(lo, hi) => {
            let steps = ns.ok_or_else(|| {
                Error::Config("Grid spans require a sample count (Ns).".to_string())
            })?;
            lin_space(*lo, *hi, steps)
        }
    }
}

/// Generate `steps` evenly spaced points between `min` and `max` (inclusive).
pub fn lin_space(min: f64, max: f64, steps: usize) -> Result<Vec<f64>> {
    if !(min.is_finite() && max.is_finite() && max > min) {
        return Err(Error::Config(format!(
            "Invalid grid span: min={min}, max={max} (must be finite and max>min)."
        )));
    }
    if steps < 2 {
        return Err(Error::Config("Grid sample count must be >= 2.".to_string()));
    }

    let step = (max - min) / (steps as f64 - 1.0);
    Ok((0..steps).map(|i| min + step * i as f64).collect())
}

/// Per-parameter box bounds for the refinement stages.
///
/// `None` on either side means that side is unbounded. Bounds may be given
/// for the model's intrinsic parameters only; the amplitude and baseline
/// dimensions are padded as unbounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamBounds {
    dims: Vec<(Option<f64>, Option<f64>)>,
}

impl ParamBounds {
    pub fn new(dims: Vec<(Option<f64>, Option<f64>)>) -> Self {
        Self { dims }
    }

    /// Fully unbounded in `len` dimensions.
    pub fn unbounded(len: usize) -> Self {
        Self { dims: vec![(None, None); len] }
    }

    pub fn len(&self) -> usize {
        self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    /// Extend with unbounded dimensions up to `len`.
    pub fn padded(&self, len: usize) -> Self {
        let mut dims = self.dims.clone();
        while dims.len() < len {
            dims.push((None, None));
        }
        Self { dims }
    }

    /// Concrete `(low, high)` boxes with unbounded sides mapped to infinities.
    pub fn to_boxes(&self) -> Vec<(f64, f64)> {
        self.dims
            .iter()
            .map(|&(lo, hi)| (lo.unwrap_or(f64::NEG_INFINITY), hi.unwrap_or(f64::INFINITY)))
            .collect()
    }

    /// Whether every dimension is bounded on both sides.
    pub fn all_finite(&self) -> bool {
        self.dims.iter().all(|(lo, hi)| lo.is_some() && hi.is_some())
    }
}

/// A nonlinear inequality constraint: `lower <= fun(params) <= upper`.
///
/// Constraints are plain data triples so any optimizer backend with general
/// nonlinear-constraint support can consume them.
#[derive(Clone)]
pub struct Constraint {
    fun: Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>,
    pub lower: f64,
    pub upper: f64,
}

impl Constraint {
    pub fn new(fun: impl Fn(&[f64]) -> f64 + Send + Sync + 'static, lower: f64, upper: f64) -> Self {
        Self { fun: Arc::new(fun), lower, upper }
    }

    pub fn value(&self, params: &[f64]) -> f64 {
        (self.fun)(params)
    }

    /// Distance outside the feasible interval (0 when satisfied).
    pub fn violation(&self, params: &[f64]) -> f64 {
        let v = self.value(params);
        if !v.is_finite() {
            return f64::INFINITY;
        }
        if v < self.lower {
            self.lower - v
        } else if v > self.upper {
            v - self.upper
        } else {
            0.0
        }
    }
}

impl std::fmt::Debug for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Constraint")
            .field("lower", &self.lower)
            .field("upper", &self.upper)
            .finish()
    }
}

/// The two spatial constraints applied during refinement.
///
/// Parameter layout is `[x, y, sigma, ...]`. The receptive-field center must
/// stay within the display's angular extent, and the center pushed outward by
/// `outer_limit` dispersions must stay within half of it. Together these keep
/// fitted fields in a physically plausible region of the display.
pub fn position_constraints(screen_dva: f64, outer_limit: f64) -> Vec<Constraint> {
    vec![
        Constraint::new(
            |p: &[f64]| (p[0] * p[0] + p[1] * p[1]).sqrt(),
            f64::NEG_INFINITY,
            screen_dva,
        ),
        Constraint::new(
            move |p: &[f64]| (p[0] * p[0] + p[1] * p[1]).sqrt() - outer_limit * p[2],
            f64::NEG_INFINITY,
            screen_dva / 2.0,
        ),
    ]
}

/// Per-unit fit configuration.
#[derive(Debug, Clone)]
pub struct FitSettings {
    /// Coarse search space, one dimension per model parameter.
    pub grid: SearchGrid,
    /// Box bounds for refinement (intrinsic parameters, optionally + 2).
    pub bounds: ParamBounds,
    /// Samples per `Span` grid dimension.
    pub ns: Option<usize>,
    pub fit_method: FitMethod,
    pub voxel_index: VoxelIndex,
    /// Scales how far outside the display a field may spread (see
    /// [`position_constraints`]).
    pub outer_limit: f64,
    /// Run every pipeline stage at construction time.
    pub auto_fit: bool,
    /// Trend removal applied to the data exactly once, before any stage
    /// reads it.
    pub nuisance: Option<NuisanceFn>,
    /// Population multiplier for the global search.
    pub popsize: usize,
    /// Seed for the global search.
    pub seed: u64,
}

impl FitSettings {
    pub fn new(grid: SearchGrid, bounds: ParamBounds, fit_method: FitMethod) -> Self {
        Self {
            grid,
            bounds,
            ns: None,
            fit_method,
            voxel_index: (0, 0, 0),
            outer_limit: 2.0,
            auto_fit: true,
            nuisance: Some(crate::math::detrend_psc),
            popsize: 8,
            seed: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_method_parses_canonical_names() {
        assert_eq!(FitMethod::parse("2step").unwrap(), FitMethod::TwoStep);
        assert_eq!(FitMethod::parse("grid_only").unwrap(), FitMethod::GridOnly);
        assert_eq!(FitMethod::parse("global_opt").unwrap(), FitMethod::GlobalOpt);
    }

    #[test]
    fn fit_method_rejects_unknown_names() {
        let err = FitMethod::parse("simplex").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn lin_space_includes_endpoints() {
        let v = lin_space(-5.0, 5.0, 5).unwrap();
        assert_eq!(v.len(), 5);
        assert!((v[0] + 5.0).abs() < 1e-12);
        assert!((v[4] - 5.0).abs() < 1e-12);
        assert!((v[2]).abs() < 1e-12);
    }

    #[test]
    fn combinations_cover_the_product() {
        let grid = SearchGrid::from_spans(&[(0.0, 1.0), (0.0, 2.0)]);
        let combos = grid.combinations(Some(3)).unwrap();
        assert_eq!(combos.len(), 9);
        assert!(combos.contains(&vec![0.5, 2.0]));
    }

    #[test]
    fn explicit_dims_ignore_sample_count() {
        let grid = SearchGrid::new(vec![
            GridDim::Explicit(vec![1.0, 2.0]),
            GridDim::Span(0.0, 1.0),
        ]);
        let combos = grid.combinations(Some(2)).unwrap();
        assert_eq!(combos.len(), 4);
    }

    #[test]
    fn span_without_sample_count_is_an_error() {
        let grid = SearchGrid::from_spans(&[(0.0, 1.0)]);
        assert!(grid.combinations(None).is_err());
    }

    #[test]
    fn bounds_pad_and_box() {
        let bounds = ParamBounds::new(vec![(Some(0.1), None)]);
        let padded = bounds.padded(3);
        assert_eq!(padded.len(), 3);
        let boxes = padded.to_boxes();
        assert_eq!(boxes[0], (0.1, f64::INFINITY));
        assert_eq!(boxes[2], (f64::NEG_INFINITY, f64::INFINITY));
        assert!(!padded.all_finite());
    }

    #[test]
    fn constraint_violation_is_one_sided() {
        let c = Constraint::new(|p: &[f64]| p[0], f64::NEG_INFINITY, 2.0);
        assert_eq!(c.violation(&[1.5]), 0.0);
        assert!((c.violation(&[3.0]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn position_constraints_bound_center_and_spread() {
        let cs = position_constraints(10.0, 2.0);
        // Center at radius 6 with sigma 1: inside the display, spread ok.
        assert_eq!(cs[0].violation(&[6.0, 0.0, 1.0]), 0.0);
        assert!(cs[1].violation(&[6.0, 0.0, 1.0]) == 0.0);
        // Center at radius 12: outside the display.
        assert!(cs[0].violation(&[12.0, 0.0, 1.0]) > 0.0);
        // Tight sigma far out: violates the spread constraint only.
        assert_eq!(cs[0].violation(&[8.0, 0.0, 0.5]), 0.0);
        assert!(cs[1].violation(&[8.0, 0.0, 0.5]) > 0.0);
    }
}

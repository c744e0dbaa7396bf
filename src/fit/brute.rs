//! Brute-force grid search.
//!
//! Exhaustively evaluates the coarse prediction over every combination of the
//! sampled parameter grid. Each candidate is scored with a fixed error
//! function: the sum of squared residuals after best-fit scaling of the
//! candidate's prediction onto the data. Candidates whose prediction is
//! degenerate (non-finite, wrong length, unsolvable scaling) are skipped
//! rather than failing the search.

use rayon::prelude::*;

use crate::domain::SearchGrid;
use crate::error::{Error, Result};
use crate::math;
use crate::models::EncodingModel;

/// Winner of the grid search.
#[derive(Debug, Clone, PartialEq)]
pub struct BruteResult {
    /// The minimum-error parameter combination (intrinsic parameters only).
    pub params: Vec<f64>,
    /// Its scaled sum of squared residuals.
    pub error: f64,
}

#[derive(Debug, Clone)]
struct Candidate {
    idx: usize,
    params: Vec<f64>,
    error: f64,
}

/// Search the sampled grid for the minimum-error parameter combination.
pub fn brute_force_search<M: EncodingModel + ?Sized>(
    model: &M,
    data: &[f64],
    grid: &SearchGrid,
    ns: Option<usize>,
) -> Result<BruteResult> {
    if grid.len() != model.free_params() {
        return Err(Error::Config(format!(
            "Grid has {} dimensions but the model has {} parameters.",
            grid.len(),
            model.free_params()
        )));
    }

    let combos = grid.combinations(ns)?;

    // Evaluate each combination independently (parallel).
    let candidates: Vec<Candidate> = combos
        .par_iter()
        .enumerate()
        .filter_map(|(idx, combo)| {
            scaled_error(model, combo, data).map(|error| Candidate {
                idx,
                params: combo.clone(),
                error,
            })
        })
        .collect();

    if candidates.is_empty() {
        return Err(Error::Data(
            "No valid grid candidates: every combination produced a degenerate prediction."
                .to_string(),
        ));
    }

    // Deterministic selection: pick the minimum error; break ties by original
    // grid index.
    let mut best = &candidates[0];
    for c in &candidates[1..] {
        if c.error < best.error || (c.error == best.error && c.idx < best.idx) {
            best = c;
        }
    }

    Ok(BruteResult { params: best.params.clone(), error: best.error })
}

/// Sum of squared residuals after regressing the data onto the candidate's
/// unscaled prediction. `None` marks a degenerate candidate.
fn scaled_error<M: EncodingModel + ?Sized>(model: &M, combo: &[f64], data: &[f64]) -> Option<f64> {
    let pred = model.ballpark_prediction(combo);
    if pred.len() != data.len() || pred.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let (slope, intercept) = math::regress(&pred, data)?;
    let mut sse = 0.0;
    for (p, d) in pred.iter().zip(data.iter()) {
        let r = d - (p * slope + intercept);
        sse += r * r;
    }

    sse.is_finite().then_some(sse)
}

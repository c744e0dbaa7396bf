//! Precomputed model tables.
//!
//! Brute-force grid search re-evaluates the coarse prediction for every
//! candidate of every unit. When many units share a search space it is much
//! cheaper to evaluate the grid once, persist the (prediction, parameters)
//! pairs, and let each unit's ballpark stage do a nearest-neighbor lookup
//! against the table instead.
//!
//! The on-disk format is a JSON sequence of entries; it is read once per
//! model and materialized into shared buffers.

use std::fs::File;
use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::SearchGrid;
use crate::error::{Error, Result};
use crate::mem::SharedMatrix;
use crate::models::context::EncodingModel;

/// One persisted (prediction, generating parameters) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub timeseries: Vec<f64>,
    pub parameters: Vec<f64>,
}

/// A loaded model table: two index-aligned matrices.
#[derive(Clone, Debug)]
pub struct CachedModelTable {
    timeseries: SharedMatrix,
    parameters: SharedMatrix,
}

impl CachedModelTable {
    pub fn new(timeseries: SharedMatrix, parameters: SharedMatrix) -> Result<Self> {
        if timeseries.rows() == 0 {
            return Err(Error::Cache("Cached model table is empty.".to_string()));
        }
        if timeseries.rows() != parameters.rows() {
            return Err(Error::Cache(format!(
                "Cached model table misaligned: {} series vs {} parameter vectors.",
                timeseries.rows(),
                parameters.rows()
            )));
        }
        Ok(Self { timeseries, parameters })
    }

    pub fn len(&self) -> usize {
        self.timeseries.rows()
    }

    pub fn is_empty(&self) -> bool {
        self.timeseries.rows() == 0
    }

    pub fn timeseries(&self) -> &SharedMatrix {
        &self.timeseries
    }

    pub fn parameters(&self) -> &SharedMatrix {
        &self.parameters
    }
}

/// Evaluate the coarse prediction for every grid combination.
///
/// Combinations are visited in randomized order (some parameter regions are
/// far more expensive than others, and randomization balances the pool) and
/// distributed over a fixed-size worker pool. Combinations whose prediction
/// contains non-finite values are discarded.
pub fn build_cache<M: EncodingModel + ?Sized>(
    model: &M,
    grid: &SearchGrid,
    ns: Option<usize>,
    workers: usize,
    seed: u64,
) -> Result<Vec<CacheEntry>> {
    if grid.len() != model.free_params() {
        return Err(Error::Config(format!(
            "Grid has {} dimensions but the model has {} parameters.",
            grid.len(),
            model.free_params()
        )));
    }

    let mut combos = grid.combinations(ns)?;
    let mut rng = StdRng::seed_from_u64(seed);
    combos.shuffle(&mut rng);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| Error::Config(format!("Failed to build worker pool: {e}")))?;

    let entries: Vec<CacheEntry> = pool.install(|| {
        combos
            .par_iter()
            .filter_map(|combo| {
                let prediction = model.ballpark_prediction(combo);
                if prediction.iter().any(|v| !v.is_finite()) {
                    return None;
                }
                Some(CacheEntry { timeseries: prediction, parameters: combo.clone() })
            })
            .collect()
    });

    Ok(entries)
}

/// Persist cache entries as JSON.
pub fn write_cached_model(path: &Path, entries: &[CacheEntry]) -> Result<()> {
    let file = File::create(path).map_err(|e| {
        Error::Cache(format!("Failed to create cached model '{}': {e}", path.display()))
    })?;
    serde_json::to_writer(file, entries)
        .map_err(|e| Error::Cache(format!("Failed to write cached model: {e}")))?;
    Ok(())
}

/// Read a cached model file and materialize it into shared buffers.
pub fn load_cached_model(path: &Path) -> Result<CachedModelTable> {
    let file = File::open(path).map_err(|e| {
        Error::Cache(format!("Failed to open cached model '{}': {e}", path.display()))
    })?;
    let entries: Vec<CacheEntry> = serde_json::from_reader(file)
        .map_err(|e| Error::Cache(format!("Invalid cached model '{}': {e}", path.display())))?;

    let series: Vec<Vec<f64>> = entries.iter().map(|e| e.timeseries.clone()).collect();
    let params: Vec<Vec<f64>> = entries.iter().map(|e| e.parameters.clone()).collect();

    let timeseries = SharedMatrix::from_rows(&series)
        .map_err(|e| Error::Cache(format!("Malformed cached series: {e}")))?;
    let parameters = SharedMatrix::from_rows(&params)
        .map_err(|e| Error::Cache(format!("Malformed cached parameters: {e}")))?;

    CachedModelTable::new(timeseries, parameters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SearchGrid;
    use crate::models::gaussian::{sweeping_bar_stimulus, GaussianModel};

    #[test]
    fn build_cache_fills_the_grid() {
        let model = GaussianModel::new(sweeping_bar_stimulus(5.0, 9, 20));
        let grid = SearchGrid::from_spans(&[(-3.0, 3.0), (-3.0, 3.0), (0.5, 2.0)]);

        let entries = model.cache_model(&grid, Some(3), 2, 7).unwrap();
        // All 27 combinations are well-behaved for this stimulus.
        assert_eq!(entries.len(), 27);
        for e in &entries {
            assert_eq!(e.timeseries.len(), 20);
            assert_eq!(e.parameters.len(), 3);
        }
    }

    #[test]
    fn build_cache_rejects_mismatched_grid() {
        let model = GaussianModel::new(sweeping_bar_stimulus(5.0, 9, 20));
        let grid = SearchGrid::from_spans(&[(-3.0, 3.0), (-3.0, 3.0)]);
        assert!(build_cache(&model, &grid, Some(3), 1, 0).is_err());
    }

    #[test]
    fn cache_round_trips_through_disk() {
        let model = GaussianModel::new(sweeping_bar_stimulus(5.0, 9, 16));
        let grid = SearchGrid::from_spans(&[(-2.0, 2.0), (-2.0, 2.0), (0.5, 1.5)]);
        let entries = build_cache(&model, &grid, Some(2), 1, 0).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.json");
        write_cached_model(&path, &entries).unwrap();

        let table = load_cached_model(&path).unwrap();
        assert_eq!(table.len(), entries.len());
        assert_eq!(table.timeseries().cols(), 16);
        assert_eq!(table.parameters().cols(), 3);
    }

    #[test]
    fn missing_cache_file_is_a_hard_failure() {
        let err = load_cached_model(Path::new("/nonexistent/table.json")).unwrap_err();
        assert!(matches!(err, Error::Cache(_)));
    }

    #[test]
    fn misaligned_table_is_rejected() {
        let ts = SharedMatrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        let ps = SharedMatrix::from_rows(&[vec![0.0]]).unwrap();
        assert!(CachedModelTable::new(ts, ps).is_err());
    }
}

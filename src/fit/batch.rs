//! Batch orchestration.
//!
//! Distributes many independent unit fits across a fixed-size worker pool.
//! Unit order is randomized before distribution (some parameter regions
//! converge much faster than others, and randomization balances the pool), so
//! results come back in no particular order: callers key them by the voxel
//! index each fit carries. A unit whose fit fails is dropped from the
//! aggregate; it never aborts the batch.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::domain::{FitSettings, VoxelIndex};
use crate::error::{Error, Result};
use crate::fit::engine::VoxelFit;
use crate::models::EncodingModel;

/// One unit's measured series plus its position in the parent volume.
#[derive(Debug, Clone)]
pub struct VoxelData {
    pub index: VoxelIndex,
    pub data: Vec<f64>,
}

/// Pool configuration for a batch run.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Worker threads; 0 selects the pool's default.
    pub workers: usize,
    /// Seed for the pre-distribution shuffle.
    pub seed: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { workers: 0, seed: 0 }
    }
}

/// Fit every unit against the shared model.
///
/// Each worker constructs and auto-fits its own [`VoxelFit`]; the model and
/// its stimulus are shared read-only. Failed fits are filtered out of the
/// returned list.
pub fn fit_batch<M: EncodingModel>(
    model: &Arc<M>,
    mut units: Vec<VoxelData>,
    settings: &FitSettings,
    config: &BatchConfig,
) -> Result<Vec<VoxelFit<M>>> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    units.shuffle(&mut rng);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers)
        .build()
        .map_err(|e| Error::Config(format!("Failed to build worker pool: {e}")))?;

    let fits: Vec<VoxelFit<M>> = pool.install(|| {
        units
            .into_par_iter()
            .filter_map(|unit| {
                let mut unit_settings = settings.clone();
                unit_settings.voxel_index = unit.index;
                unit_settings.auto_fit = true;
                VoxelFit::new(Arc::clone(model), unit.data, unit_settings).ok()
            })
            .collect()
    });

    Ok(fits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::domain::{FitMethod, FitSettings, ParamBounds, SearchGrid};
    use crate::models::gaussian::{sweeping_bar_stimulus, GaussianModel};

    fn settings() -> FitSettings {
        let grid = SearchGrid::from_spans(&[(-4.0, 4.0), (-4.0, 4.0), (0.5, 2.0)]);
        let bounds = ParamBounds::new(vec![(None, None), (None, None), (Some(0.1), None)]);
        let mut settings = FitSettings::new(grid, bounds, FitMethod::GridOnly);
        settings.ns = Some(3);
        settings.nuisance = None;
        settings
    }

    #[test]
    fn results_cover_every_unit_keyed_by_index() {
        let model = Arc::new(GaussianModel::new(sweeping_bar_stimulus(5.0, 9, 24)));

        let truths =
            [(1, [0.0, 0.0, 1.25]), (2, [4.0, -4.0, 0.5]), (3, [-4.0, 4.0, 2.0])];
        let units: Vec<VoxelData> = truths
            .iter()
            .map(|(z, p)| VoxelData {
                index: (0, 0, *z),
                data: model.prediction(&[p[0], p[1], p[2], 1.5, 0.25]),
            })
            .collect();

        let fits = fit_batch(&model, units, &settings(), &BatchConfig::default()).unwrap();
        assert_eq!(fits.len(), 3);

        // Result order is unrelated to input order; key by voxel index.
        let by_index: HashMap<VoxelIndex, Vec<f64>> = fits
            .iter()
            .map(|f| (f.voxel_index(), f.estimate().unwrap()))
            .collect();

        for (z, truth) in &truths {
            let est = &by_index[&(0, 0, *z)];
            for (got, want) in est.iter().take(3).zip(truth.iter()) {
                assert!((got - want).abs() < 1e-9, "voxel {z}: got {got}, want {want}");
            }
        }
    }

    #[test]
    fn failed_units_are_dropped_not_fatal() {
        let model = Arc::new(GaussianModel::new(sweeping_bar_stimulus(5.0, 9, 24)));

        let good = VoxelData {
            index: (0, 0, 1),
            data: model.prediction(&[0.0, 0.0, 1.25, 1.0, 0.0]),
        };
        // Too short to fit anything.
        let bad = VoxelData { index: (0, 0, 2), data: vec![1.0] };

        let fits =
            fit_batch(&model, vec![bad, good], &settings(), &BatchConfig::default()).unwrap();
        assert_eq!(fits.len(), 1);
        assert_eq!(fits[0].voxel_index(), (0, 0, 1));
    }

    #[test]
    fn shuffling_is_deterministic_for_a_seed() {
        let model = Arc::new(GaussianModel::new(sweeping_bar_stimulus(5.0, 9, 24)));
        let units: Vec<VoxelData> = (0..4)
            .map(|z| VoxelData {
                index: (0, 0, z),
                data: model.prediction(&[0.0, 0.0, 1.25, 1.0, 0.0]),
            })
            .collect();

        let config = BatchConfig { workers: 2, seed: 9 };
        let a = fit_batch(&model, units.clone(), &settings(), &config).unwrap();
        let b = fit_batch(&model, units, &settings(), &config).unwrap();

        let idx = |fits: &[VoxelFit<GaussianModel>]| -> Vec<VoxelIndex> {
            fits.iter().map(|f| f.voxel_index()).collect()
        };
        assert_eq!(idx(&a), idx(&b));
    }
}

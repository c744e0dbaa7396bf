//! End-to-end estimation: stimulus -> model -> batch fitting -> collation,
//! including the precomputed-table path.

use std::collections::HashMap;
use std::sync::Arc;

use prf_fit::domain::{FitMethod, FitSettings, ParamBounds, SearchGrid, VoxelIndex};
use prf_fit::fit::{fit_batch, BatchConfig, VoxelData};
use prf_fit::mem::SharedMatrix;
use prf_fit::models::{build_cache, write_cached_model, EncodingModel, GaussianModel};
use prf_fit::stimulus::{coordinate_grid, Stimulus};

/// A two-pass drifting bar: vertical bar sweeping left to right, then a
/// horizontal bar sweeping top to bottom.
fn bar_stimulus(screen_dva: f64, side: usize, n_t: usize) -> Arc<Stimulus> {
    let (deg_x, deg_y) = coordinate_grid(screen_dva, side);
    let half = n_t / 2;
    let mut frames = vec![0.0; side * side * n_t];
    for t in 0..n_t {
        if t < half {
            let col = (t * side) / half;
            for row in 0..side {
                frames[(row * side + col) * n_t + t] = 1.0;
            }
        } else {
            let row = ((t - half) * side) / (n_t - half);
            for col in 0..side {
                frames[(row * side + col) * n_t + t] = 1.0;
            }
        }
    }
    let frames = SharedMatrix::new(frames, side * side, n_t).unwrap();
    Arc::new(Stimulus::new(frames, deg_x.into(), deg_y.into(), 1.0, screen_dva).unwrap())
}

fn two_step_settings() -> FitSettings {
    let grid = SearchGrid::from_spans(&[(-5.0, 5.0), (-5.0, 5.0), (0.5, 3.0)]);
    let bounds = ParamBounds::new(vec![(None, None), (None, None), (Some(0.1), None)]);
    let mut settings = FitSettings::new(grid, bounds, FitMethod::TwoStep);
    settings.ns = Some(5);
    settings.nuisance = None;
    settings
}

#[test]
fn batch_two_step_recovers_every_unit() {
    let model = Arc::new(GaussianModel::new(bar_stimulus(5.0, 11, 40)));

    let truths: Vec<(VoxelIndex, [f64; 5])> = vec![
        ((4, 8, 2), [2.0, -1.0, 1.2, 2.0, 0.5]),
        ((5, 8, 2), [-2.0, 2.0, 0.8, 1.0, -0.25]),
        ((6, 9, 3), [0.5, 0.5, 1.8, 3.0, 0.0]),
    ];

    let units: Vec<VoxelData> = truths
        .iter()
        .map(|(index, p)| VoxelData { index: *index, data: model.prediction(p) })
        .collect();

    let config = BatchConfig { workers: 2, seed: 1 };
    let fits = fit_batch(&model, units, &two_step_settings(), &config).unwrap();
    assert_eq!(fits.len(), truths.len());

    // Downstream collation keys results by the index each fit carries.
    let by_index: HashMap<VoxelIndex, _> =
        fits.iter().map(|f| (f.voxel_index(), f)).collect();

    for (index, truth) in &truths {
        let fit = by_index[index];
        assert!(
            fit.rsquared().unwrap() > 0.95,
            "unit {index:?}: rsquared {}",
            fit.rsquared().unwrap()
        );

        let estimate = fit.estimate().unwrap();
        for (got, want) in estimate.iter().take(3).zip(truth.iter()) {
            assert!(
                (got - want).abs() <= 0.10 * want.abs(),
                "unit {index:?}: got {got}, want {want}"
            );
        }

        let summary = fit.summary().unwrap();
        assert!(summary.starts_with("VOXEL=("), "bad summary: {summary}");
    }
}

#[test]
fn two_step_tolerates_measurement_noise() {
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    let model = Arc::new(GaussianModel::new(bar_stimulus(5.0, 11, 40)));
    let truth = [2.0, -1.0, 1.2, 2.0, 0.5];

    let mut rng = StdRng::seed_from_u64(17);
    let noise = Normal::new(0.0, 0.05).unwrap();
    let data: Vec<f64> = model
        .prediction(&truth)
        .into_iter()
        .map(|v| v + noise.sample(&mut rng))
        .collect();

    let fits = fit_batch(
        &model,
        vec![VoxelData { index: (1, 1, 1), data }],
        &two_step_settings(),
        &BatchConfig::default(),
    )
    .unwrap();
    assert_eq!(fits.len(), 1);

    let fit = &fits[0];
    assert!(fit.rsquared().unwrap() > 0.95, "rsquared {}", fit.rsquared().unwrap());
    let estimate = fit.estimate().unwrap();
    for (got, want) in estimate.iter().take(3).zip(truth.iter()) {
        assert!(
            (got - want).abs() <= 0.15 * want.abs().max(1.0),
            "got {got}, want {want}"
        );
    }
}

#[test]
fn cached_table_pipeline_matches_grid_points() {
    let stimulus = bar_stimulus(5.0, 9, 24);
    let plain = GaussianModel::new(stimulus.clone());

    // Precompute the search space once...
    let grid = SearchGrid::from_spans(&[(-4.0, 4.0), (-4.0, 4.0), (0.5, 2.0)]);
    let entries = build_cache(&plain, &grid, Some(3), 2, 42).unwrap();
    assert_eq!(entries.len(), 27);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gaussian_table.json");
    write_cached_model(&path, &entries).unwrap();

    // ...then let every unit's ballpark stage look it up instead.
    let mut cached = GaussianModel::new(stimulus);
    cached.context_mut().cached_model_path = Some(path);
    let cached = Arc::new(cached);

    let truths: Vec<(VoxelIndex, [f64; 3])> =
        vec![((0, 0, 1), [0.0, 0.0, 1.25]), ((0, 0, 2), [4.0, -4.0, 0.5])];
    let units: Vec<VoxelData> = truths
        .iter()
        .map(|(index, p)| VoxelData {
            index: *index,
            data: cached.prediction(&[p[0], p[1], p[2], 1.5, 0.0]),
        })
        .collect();

    let mut settings = two_step_settings();
    settings.grid = grid;
    settings.ns = Some(3);
    settings.fit_method = FitMethod::GridOnly;

    let fits = fit_batch(&cached, units, &settings, &BatchConfig::default()).unwrap();
    assert_eq!(fits.len(), truths.len());

    let by_index: HashMap<VoxelIndex, _> =
        fits.iter().map(|f| (f.voxel_index(), f)).collect();
    for (index, truth) in &truths {
        let ballpark = by_index[index].ballpark().unwrap();
        assert_eq!(&ballpark[..3], truth, "unit {index:?} should hit its table entry");
    }
}

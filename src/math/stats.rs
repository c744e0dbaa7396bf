//! Summary statistics and signal preprocessing helpers.

/// Signature of a series normalizer.
pub type NormalizerFn = fn(&[f64]) -> Vec<f64>;

/// Arithmetic mean. Returns 0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sum of squared differences between two equal-length series.
pub fn sum_squared_error(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Z-score a series to zero mean and unit variance.
///
/// A series with (near-)zero variance is returned as all zeros rather than
/// NaN so degenerate candidates lose the grid search instead of poisoning it.
pub fn zscore(values: &[f64]) -> Vec<f64> {
    let m = mean(values);
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len().max(1) as f64;
    let sd = var.sqrt();
    if !(sd.is_finite() && sd > 1e-12) {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - m) / sd).collect()
}

/// Remove a linear trend, keeping the original mean level.
pub fn detrend_linear(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    if n < 3 {
        return values.to_vec();
    }

    // Closed-form OLS slope of y ~ a + b t over t = 0..n-1.
    let tbar = (n as f64 - 1.0) / 2.0;
    let ybar = mean(values);
    let mut cov = 0.0;
    let mut var = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let dt = i as f64 - tbar;
        cov += dt * (y - ybar);
        var += dt * dt;
    }
    if var <= 1e-18 || !cov.is_finite() {
        return values.to_vec();
    }
    let slope = cov / var;

    values
        .iter()
        .enumerate()
        .map(|(i, &y)| y - slope * (i as f64 - tbar))
        .collect()
}

/// Express a series as percent change around its mean.
///
/// When the mean is (near-)zero, percent change is undefined; the input is
/// returned demeaned instead.
pub fn percent_change(values: &[f64]) -> Vec<f64> {
    let m = mean(values);
    if m.abs() < 1e-12 {
        return values.iter().map(|v| v - m).collect();
    }
    values.iter().map(|v| (v / m - 1.0) * 100.0).collect()
}

/// Linear detrend followed by percent signal change.
///
/// The standard trend-removal step applied to a unit's time series before any
/// fitting stage reads it.
pub fn detrend_psc(values: &[f64]) -> Vec<f64> {
    percent_change(&detrend_linear(values))
}

/// Pearson correlation coefficient. NaN when either series is degenerate.
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return f64::NAN;
    }
    let ma = mean(&a[..n]);
    let mb = mean(&b[..n]);
    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for i in 0..n {
        let da = a[i] - ma;
        let db = b[i] - mb;
        cov += da * db;
        va += da * da;
        vb += db * db;
    }
    cov / (va.sqrt() * vb.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zscore_has_zero_mean_unit_sd() {
        let z = zscore(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(mean(&z).abs() < 1e-12);
        let var = z.iter().map(|v| v * v).sum::<f64>() / z.len() as f64;
        assert!((var - 1.0).abs() < 1e-12);
    }

    #[test]
    fn zscore_of_constant_series_is_zeros() {
        let z = zscore(&[3.0, 3.0, 3.0]);
        assert_eq!(z, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn detrend_removes_ramp() {
        let values: Vec<f64> = (0..100).map(|i| 10.0 + 0.5 * i as f64).collect();
        let flat = detrend_linear(&values);
        let m = mean(&flat);
        for v in &flat {
            assert!((v - m).abs() < 1e-9, "trend survived detrend: {v} vs {m}");
        }
    }

    #[test]
    fn detrend_psc_centers_around_zero() {
        let values: Vec<f64> = (0..50).map(|i| 100.0 + (i as f64 * 0.7).sin()).collect();
        let psc = detrend_psc(&values);
        assert!(mean(&psc).abs() < 1e-9);
    }

    #[test]
    fn pearson_of_scaled_series_is_one() {
        let a: Vec<f64> = (0..30).map(|i| (i as f64 * 0.4).cos()).collect();
        let b: Vec<f64> = a.iter().map(|v| 3.0 * v + 1.0).collect();
        assert!((pearson(&a, &b) - 1.0).abs() < 1e-12);
    }
}

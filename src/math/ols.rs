//! Ordinary least squares.
//!
//! Fitting repeatedly solves tiny linear regression problems: every candidate
//! of the coarse grid search produces an unscaled prediction whose amplitude
//! and baseline are obtained by regressing the data onto it.
//!
//! Implementation choices:
//! - We use SVD to solve the least-squares problem robustly even when the
//!   design matrix is tall (more rows than columns).
//!   (Nalgebra's `QR::solve` is intended for square systems and will panic for
//!   non-square matrices.)
//! - Because the parameter dimension is tiny (2 columns: slope + intercept),
//!   SVD performance is acceptable even over large candidate grids.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails. Flat or
    // near-constant predictions produce nearly collinear design columns, so we
    // balance numerical stability with solution acceptance.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Regress `data` onto `prediction`, returning `(slope, intercept)`.
///
/// Solves `data ~ slope * prediction + intercept` in the least-squares sense.
/// Returns `None` when the inputs have mismatched lengths, contain non-finite
/// values, or the system cannot be solved.
pub fn regress(prediction: &[f64], data: &[f64]) -> Option<(f64, f64)> {
    let n = prediction.len();
    if n < 2 || data.len() != n {
        return None;
    }
    if prediction.iter().any(|v| !v.is_finite()) || data.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let mut x = DMatrix::<f64>::zeros(n, 2);
    for i in 0..n {
        x[(i, 0)] = prediction[i];
        x[(i, 1)] = 1.0;
    }
    let y = DVector::from_column_slice(data);

    let beta = solve_least_squares(&x, &y)?;
    Some((beta[0], beta[1]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn regress_recovers_scale_and_offset() {
        let pred: Vec<f64> = (0..50).map(|i| (i as f64 * 0.3).sin()).collect();
        let data: Vec<f64> = pred.iter().map(|p| 2.5 * p - 0.75).collect();

        let (slope, intercept) = regress(&pred, &data).unwrap();
        assert!((slope - 2.5).abs() < 1e-9);
        assert!((intercept + 0.75).abs() < 1e-9);
    }

    #[test]
    fn regress_rejects_non_finite_input() {
        let pred = vec![1.0, f64::NAN, 3.0];
        let data = vec![1.0, 2.0, 3.0];
        assert!(regress(&pred, &data).is_none());
    }
}

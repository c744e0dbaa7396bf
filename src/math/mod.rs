//! Mathematical utilities: least squares, summary statistics, and the
//! hemodynamic response kernel.

pub mod hrf;
pub mod ols;
pub mod stats;

pub use hrf::*;
pub use ols::*;
pub use stats::*;

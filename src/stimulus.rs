//! Stimulus representation.
//!
//! The stimulus is the only state shared by every fit in a batch: a dense
//! pixels x timepoints array of display luminance (or any other encoded
//! quantity), the display coordinates of each pixel in degrees of visual
//! angle, and the sampling metadata the constraints and kernels need. All
//! arrays live in shared read-only buffers so the orchestrating thread builds
//! them once and workers observe them without copies.

use crate::error::{Error, Result};
use crate::mem::{SharedBuffer, SharedMatrix};

#[derive(Clone, Debug)]
pub struct Stimulus {
    /// Encoded stimulus, pixels x timepoints.
    frames: SharedMatrix,
    /// Horizontal display coordinate of each pixel (degrees of visual angle).
    deg_x: SharedBuffer,
    /// Vertical display coordinate of each pixel.
    deg_y: SharedBuffer,
    /// Repetition time in seconds.
    pub tr_length: f64,
    /// Angular extent of the display used by the spatial constraints.
    pub screen_dva: f64,
}

impl Stimulus {
    pub fn new(
        frames: SharedMatrix,
        deg_x: SharedBuffer,
        deg_y: SharedBuffer,
        tr_length: f64,
        screen_dva: f64,
    ) -> Result<Self> {
        if deg_x.len() != frames.rows() || deg_y.len() != frames.rows() {
            return Err(Error::Data(format!(
                "Coordinate lengths ({}, {}) do not match pixel count {}.",
                deg_x.len(),
                deg_y.len(),
                frames.rows()
            )));
        }
        if !(tr_length.is_finite() && tr_length > 0.0) {
            return Err(Error::Config(format!(
                "Invalid repetition time: {tr_length} (must be finite and > 0)."
            )));
        }
        if !(screen_dva.is_finite() && screen_dva > 0.0) {
            return Err(Error::Config(format!(
                "Invalid display extent: {screen_dva} (must be finite and > 0)."
            )));
        }
        Ok(Self { frames, deg_x, deg_y, tr_length, screen_dva })
    }

    pub fn frames(&self) -> &SharedMatrix {
        &self.frames
    }

    pub fn deg_x(&self) -> &[f64] {
        self.deg_x.as_slice()
    }

    pub fn deg_y(&self) -> &[f64] {
        self.deg_y.as_slice()
    }

    pub fn n_pixels(&self) -> usize {
        self.frames.rows()
    }

    pub fn n_timepoints(&self) -> usize {
        self.frames.cols()
    }
}

/// Build a square pixel grid spanning `[-screen_dva, screen_dva]` on both
/// axes, returning per-pixel `(deg_x, deg_y)` coordinates in row-major order.
pub fn coordinate_grid(screen_dva: f64, pixels_per_side: usize) -> (Vec<f64>, Vec<f64>) {
    let n = pixels_per_side.max(2);
    let step = 2.0 * screen_dva / (n as f64 - 1.0);
    let mut deg_x = Vec::with_capacity(n * n);
    let mut deg_y = Vec::with_capacity(n * n);
    for row in 0..n {
        let y = -screen_dva + step * row as f64;
        for col in 0..n {
            let x = -screen_dva + step * col as f64;
            deg_x.push(x);
            deg_y.push(y);
        }
    }
    (deg_x, deg_y)
}

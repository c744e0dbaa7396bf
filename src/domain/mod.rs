//! Domain types used throughout the fitting pipeline.
//!
//! This module defines:
//!
//! - the fit strategy enum (`FitMethod`) and its string form
//! - search-space descriptions (`GridDim`, `SearchGrid`, `ParamBounds`)
//! - nonlinear inequality constraints (`Constraint`)
//! - the per-unit fit configuration (`FitSettings`)

pub mod types;

pub use types::*;

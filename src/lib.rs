//! `prf-fit`: population receptive field estimation.
//!
//! For each unit (voxel) of a measured volume, the crate finds the parameters
//! of a nonlinear response model that best explain the unit's time series,
//! given a representation of the stimulus that produced it. Estimation runs
//! as a three-stage pipeline: coarse grid search (or cached-table lookup),
//! bounded constrained local refinement, and an optional population-based
//! global search.
//!
//! Modules:
//!
//! - `stimulus` / `models`: the shared stimulus and the model families
//! - `fit`: the per-unit fit engine, its optimizers, and batch orchestration
//! - `mem`: shared read-only buffers and compute-once cells
//! - `domain` / `math` / `error`: supporting types and numerics

pub mod domain;
pub mod error;
pub mod fit;
pub mod math;
pub mod mem;
pub mod models;
pub mod stimulus;

//! Model fitting.
//!
//! Responsibilities:
//!
//! - exhaustive grid search for a coarse starting estimate (`brute`)
//! - bounded, constrained local refinement (`refine`)
//! - bounded, constrained global search (`global`)
//! - the per-unit fit state machine tying the stages together (`engine`)
//! - distribution of many independent fits over a worker pool (`batch`)

pub mod batch;
pub mod brute;
pub mod engine;
pub mod global;
pub mod refine;

pub use batch::*;
pub use brute::*;
pub use engine::*;
pub use global::*;
pub use refine::*;

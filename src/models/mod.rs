//! Encoding model families.
//!
//! A model family implements the [`EncodingModel`] capability trait: two pure
//! prediction functions (a coarse one for the grid search, a full one for
//! refinement) plus its parameter count. The shared non-family state
//! (stimulus, response kernel, normalizer, optional cache) lives in a
//! [`ModelContext`] each family embeds, so fitting/search code stays generic.

pub mod cache;
pub mod context;
pub mod gaussian;

pub use cache::*;
pub use context::*;
pub use gaussian::*;

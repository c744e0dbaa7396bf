//! Memory primitives shared by the fitting machinery:
//!
//! - read-only buffers that many workers can observe without copies (`buffer`)
//! - compute-once cells for expensive derived fields (`memo`)

pub mod buffer;
pub mod memo;

pub use buffer::*;
pub use memo::*;

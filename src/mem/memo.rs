//! Compute-once cells for expensive derived fields.
//!
//! Every stage of a fit (grid search, refinement, statistics) is expensive and
//! depends on earlier stages, so each derived field is computed at most once
//! per instance and then served from the cell. A fit can be handed whole to a
//! worker thread and behaves identically whether or not earlier fields were
//! already realized before the handoff.

use std::sync::OnceLock;

/// A compute-once cell.
///
/// The first call to [`Memo::get_or_compute`] runs the defining computation
/// and stores its result; every later call returns the stored value without
/// re-running the computation. There is no write path besides the first
/// computation, so concurrent readers are safe whenever `T: Send + Sync`.
pub struct Memo<T> {
    cell: OnceLock<T>,
}

impl<T> Memo<T> {
    pub fn new() -> Self {
        Self { cell: OnceLock::new() }
    }

    /// Return the stored value, computing it first if this is the first read.
    pub fn get_or_compute(&self, compute: impl FnOnce() -> T) -> &T {
        self.cell.get_or_init(compute)
    }

    /// Return the stored value if it has been computed.
    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    /// Whether the defining computation has already run.
    pub fn is_computed(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl<T> Default for Memo<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Memo<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.cell.get() {
            Some(v) => f.debug_tuple("Memo").field(v).finish(),
            None => f.write_str("Memo(<pending>)"),
        }
    }
}

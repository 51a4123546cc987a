//! Checkpoints: snapshots of a run that can be written to disk and resumed.
//!
//! [`Checkpoint`] owns the encodings (a CRC-protected binary layout and a
//! pretty JSON form). [`CheckpointManager`] writes them on an interval and
//! keeps only the newest few.

pub mod exact_f64;
mod format;
mod manager;

pub use format::*;
pub use manager::*;

//! Error taxonomy for the sorting pipeline.
//!
//! Configuration errors abort an electrode before any artifact is written.
//! `NonConvergentFit` and `TooFewSamples` are local to one cluster count and
//! are recorded and skipped by [`crate::gmm::sweep`]; everything else aborts
//! the run.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SortError {
    #[error("invalid band-pass range: low={low_hz} Hz, high={high_hz} Hz (Nyquist {nyquist_hz} Hz)")]
    InvalidFilterRange {
        low_hz: f32,
        high_hz: f32,
        nyquist_hz: f32,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("waveform {index} has {found} samples, expected {expected}")]
    InconsistentWaveformLength {
        expected: usize,
        found: usize,
        index: usize,
    },

    #[error("no restart converged for k={k} ({restarts} restarts)")]
    NonConvergentFit { k: usize, restarts: usize },

    #[error("{n_samples} samples cannot support {k} mixture components")]
    TooFewSamples { n_samples: usize, k: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("artifact sink failed: {0}")]
    Sink(String),
}

impl SortError {
    /// True for failures that only invalidate a single cluster count.
    pub fn is_local_to_k(&self) -> bool {
        matches!(self, SortError::NonConvergentFit { .. } | SortError::TooFewSamples { .. })
    }
}

pub type Result<T> = std::result::Result<T, SortError>;

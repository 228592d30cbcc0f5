//! FIR band-pass design and application.
//!
//! - [`design`]: Hamming-windowed sinc band-pass with MNE's automatic
//!   transition-band and length rules.
//! - [`apply`]: zero-phase overlap-add convolution.

pub mod apply;
pub mod design;

pub use apply::{apply_fir_zero_phase, OverlapAdd};
pub use design::{
    auto_filter_length, check_band, design_bandpass, hamming, lower_trans_bandwidth,
    upper_trans_bandwidth,
};

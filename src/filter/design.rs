//! Band-pass FIR design in the style of `mne.filter.create_filter`.
//!
//! For a pass band `[l_freq, h_freq]` at sampling rate `sfreq`:
//!   • lower transition = min(max(0.25 · l_freq, 2), l_freq)
//!   • upper transition = min(max(0.25 · h_freq, 2), nyquist − h_freq)
//!   • filter length N  = ceil(3.3 / narrowest transition · sfreq), rounded to odd
//!   • -6 dB points sit in the middle of each transition band
//!   • windowed-sinc (Hamming) design, unit gain at the band centre
use std::f64::consts::PI;

use crate::error::{Result, SortError};

/// Validate a pass band against the Nyquist limit.
pub fn check_band(l_freq: f32, h_freq: f32, sfreq: f32) -> Result<()> {
    let nyquist = sfreq / 2.0;
    let finite = l_freq.is_finite() && h_freq.is_finite() && sfreq.is_finite();
    if !finite || l_freq <= 0.0 || h_freq <= 0.0 || l_freq >= h_freq || h_freq >= nyquist {
        return Err(SortError::InvalidFilterRange {
            low_hz: l_freq,
            high_hz: h_freq,
            nyquist_hz: nyquist,
        });
    }
    Ok(())
}

/// Transition bandwidth below the pass band.
pub fn lower_trans_bandwidth(l_freq: f32) -> f32 {
    (0.25 * l_freq).max(2.0).min(l_freq)
}

/// Transition bandwidth above the pass band, clipped so the stop edge never
/// crosses Nyquist.
pub fn upper_trans_bandwidth(h_freq: f32, sfreq: f32) -> f32 {
    (0.25 * h_freq).max(2.0).min(sfreq / 2.0 - h_freq)
}

/// Number of taps for a given transition bandwidth, always odd so the
/// filter is linear-phase with an integer group delay.
pub fn auto_filter_length(trans_bw: f32, sfreq: f32) -> usize {
    let n = (3.3 / trans_bw as f64 * sfreq as f64).ceil() as usize;
    n | 1
}

/// Design a zero-phase band-pass FIR for `[l_freq, h_freq]` Hz.
///
/// Returns the impulse response as `Vec<f32>`, symmetric with odd length.
///
/// # Errors
///
/// [`SortError::InvalidFilterRange`] if the band is empty, non-positive or
/// reaches Nyquist.
pub fn design_bandpass(l_freq: f32, h_freq: f32, sfreq: f32) -> Result<Vec<f32>> {
    check_band(l_freq, h_freq, sfreq)?;
    let l_tb = lower_trans_bandwidth(l_freq);
    let h_tb = upper_trans_bandwidth(h_freq, sfreq);
    let n = auto_filter_length(l_tb.min(h_tb), sfreq);

    let f_lo = (l_freq - l_tb / 2.0) as f64;
    let f_hi = (h_freq + h_tb / 2.0) as f64;
    let fs = sfreq as f64;

    // Difference of two ideal low-passes, then window.
    let win = hamming(n);
    let alpha = (n - 1) as f64 / 2.0;
    let mut h: Vec<f64> = (0..n)
        .map(|i| {
            let x = i as f64 - alpha;
            (sinc_lowpass(f_hi / fs, x) - sinc_lowpass(f_lo / fs, x)) * win[i]
        })
        .collect();

    // Unit gain at the geometric centre of the pass band.
    let f_c = (l_freq as f64 * h_freq as f64).sqrt() / fs;
    let gain: f64 = h
        .iter()
        .enumerate()
        .map(|(i, &v)| v * (2.0 * PI * f_c * (i as f64 - alpha)).cos())
        .sum();
    h.iter_mut().for_each(|v| *v /= gain);

    Ok(h.into_iter().map(|v| v as f32).collect())
}

/// Ideal low-pass impulse response `2·fc·sinc(2·fc·x)` with `fc` in cycles/sample.
fn sinc_lowpass(fc: f64, x: f64) -> f64 {
    if x == 0.0 {
        2.0 * fc
    } else {
        (2.0 * PI * fc * x).sin() / (PI * x)
    }
}

/// Hamming window of length `n`.
pub fn hamming(n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    (0..n)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / (n - 1) as f64).cos())
        .collect()
}

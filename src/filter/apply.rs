//! Zero-phase FIR application by FFT overlap-add.
//!
//! The output is shifted left by the group delay `(N-1)/2` instead of running
//! the filter twice, and the edge transient is tamed by odd-reflection padding
//! of `N-1` samples on each side. Output length always equals input length.
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::error::{Result, SortError};

/// An FIR kernel with its spectrum precomputed for a fixed block size.
pub struct OverlapAdd {
    n_taps: usize,
    n_fft: usize,
    spectrum: Vec<Complex<f32>>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl OverlapAdd {
    /// Plan an overlap-add convolution of `h` over a signal of `n_signal`
    /// samples (after padding).
    pub fn plan(h: &[f32], n_signal: usize) -> Result<Self> {
        if h.len() % 2 == 0 {
            return Err(SortError::InvalidConfig(format!(
                "zero-phase FIR needs an odd number of taps, got {}",
                h.len()
            )));
        }
        let n_fft = choose_fft_len(h.len(), n_signal);
        let mut planner: FftPlanner<f32> = FftPlanner::new();
        let forward = planner.plan_fft_forward(n_fft);
        let inverse = planner.plan_fft_inverse(n_fft);

        let mut spectrum = zero_padded(h, n_fft);
        forward.process(&mut spectrum);

        Ok(Self { n_taps: h.len(), n_fft, spectrum, forward, inverse })
    }

    /// Linear convolution of `x` with the kernel, advanced by the group delay.
    fn convolve_centered(&self, x: &[f32]) -> Vec<f32> {
        let n_x = x.len();
        let shift = (self.n_taps - 1) / 2;
        let block = self.n_fft - self.n_taps + 1;
        let norm = 1.0 / self.n_fft as f32;
        let mut out = vec![0.0_f32; n_x];

        for start in (0..n_x).step_by(block) {
            let stop = (start + block).min(n_x);
            let mut buf = zero_padded(&x[start..stop], self.n_fft);
            self.forward.process(&mut buf);
            buf.iter_mut().zip(&self.spectrum).for_each(|(b, &s)| *b *= s);
            self.inverse.process(&mut buf);

            // buf[p] is the full-convolution sample start + p; the centred
            // output index is that minus the group delay.
            for (p, v) in buf.iter().enumerate() {
                let full = start + p;
                if full < shift {
                    continue;
                }
                let o = full - shift;
                if o >= n_x {
                    break;
                }
                out[o] += v.re * norm;
            }
        }
        out
    }
}

/// Filter a 1-D signal with a zero-phase FIR kernel.
///
/// Returns a vector the same length as `x`.
pub fn apply_fir_zero_phase(x: &[f32], h: &[f32]) -> Result<Vec<f32>> {
    if x.is_empty() {
        return Ok(vec![]);
    }
    let n_edge = h.len().saturating_sub(1);
    let padded = odd_reflect_pad(x, n_edge);
    let plan = OverlapAdd::plan(h, padded.len())?;
    let filtered = plan.convolve_centered(&padded);
    Ok(filtered[n_edge..n_edge + x.len()].to_vec())
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Odd reflection about each end sample (MNE's `reflect_limited`).
///
/// Left:  `2·x[0] − x[i]`, right: `2·x[n−1] − x[n−1−i]` for `i = 1..=pad`.
/// Where the signal is shorter than the pad, the remainder is zero-filled
/// on the outside.
fn odd_reflect_pad(x: &[f32], pad: usize) -> Vec<f32> {
    let n = x.len();
    let reach = pad.min(n - 1);
    let first = x[0];
    let last = x[n - 1];

    let mut out = Vec::with_capacity(n + 2 * pad);
    out.extend(std::iter::repeat(0.0).take(pad - reach));
    out.extend((1..=reach).rev().map(|i| 2.0 * first - x[i]));
    out.extend_from_slice(x);
    out.extend((1..=reach).map(|i| 2.0 * last - x[n - 1 - i]));
    out.extend(std::iter::repeat(0.0).take(pad - reach));
    out
}

/// Power-of-two block size minimising MNE's overlap-add cost model:
/// `ceil(n_x / (N − n_h + 1)) · N · (log2 N + 1) + 4e-5 · N · n_x`.
fn choose_fft_len(n_h: usize, n_x: usize) -> usize {
    let min_fft = 2 * n_h - 1;
    let lo = min_fft.next_power_of_two().trailing_zeros();
    let hi = (n_x.max(min_fft).next_power_of_two().trailing_zeros() + 1).max(lo);

    (lo..=hi)
        .map(|pow| {
            let n = 1_usize << pow;
            let blocks = (n_x as f64 / (n - n_h + 1) as f64).ceil();
            let cost = blocks * n as f64 * (pow as f64 + 1.0) + 4e-5 * n as f64 * n_x as f64;
            (n, cost)
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(n, _)| n)
        .unwrap_or(min_fft.next_power_of_two())
}

fn zero_padded(x: &[f32], n: usize) -> Vec<Complex<f32>> {
    let mut buf = vec![Complex::default(); n];
    for (b, &v) in buf.iter_mut().zip(x) {
        b.re = v;
    }
    buf
}

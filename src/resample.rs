//! Integer-factor FFT upsampling (band-limited interpolation).
//!
//! Same recipe as MNE's `resample(..., method='fft')` specialised to
//! upsampling by an integer factor `f`:
//!   1. Pad with reflect-limited samples so the padded length is a power of 2.
//!   2. FFT the padded snippet.
//!   3. Halve the Nyquist bin (it is split between ±Nyquist after padding).
//!   4. Scale by `f` and zero-pad the spectrum to `f ×` the length.
//!   5. Inverse FFT and strip the upsampled padding.
//!
//! Output sample `j` lies at original position `j / f`.
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Padding on each side as MNE computes it: enough to reach the next power
/// of 2 with at least `min(n / 8, 100)` samples per side.
pub fn auto_npad(n: usize) -> (usize, usize) {
    let min_add = (n / 8).min(100) * 2;
    let total = (n + min_add).next_power_of_two() - n;
    (total / 2, total - total / 2)
}

/// Upsampler for snippets of one fixed length; FFT plans are built once.
pub struct Upsampler {
    factor: usize,
    n_in: usize,
    pad_l: usize,
    pad_r: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl Upsampler {
    pub fn new(n_in: usize, factor: usize) -> Self {
        let (npad_l, npad_r) = auto_npad(n_in);
        let reach = n_in.saturating_sub(1);
        let pad_l = npad_l.min(reach);
        let pad_r = npad_r.min(reach);
        let old_len = n_in + pad_l + pad_r;

        let mut planner: FftPlanner<f64> = FftPlanner::new();
        let forward = planner.plan_fft_forward(old_len.max(1));
        let inverse = planner.plan_fft_inverse((old_len * factor).max(1));
        Self { factor, n_in, pad_l, pad_r, forward, inverse }
    }

    /// Output length: `factor × n_in`.
    pub fn output_len(&self) -> usize {
        self.factor * self.n_in
    }

    /// Upsample `x`, which must have the length this upsampler was built for.
    pub fn process(&self, x: &[f32]) -> Vec<f32> {
        debug_assert_eq!(x.len(), self.n_in);
        let n = self.n_in;
        if n == 0 {
            return vec![];
        }
        if self.factor == 1 || n == 1 {
            return x.iter().flat_map(|&v| std::iter::repeat(v).take(self.factor)).collect();
        }

        let first = x[0];
        let last = x[n - 1];
        let mut buf: Vec<Complex<f64>> = (1..=self.pad_l)
            .rev()
            .map(|i| 2.0 * first - x[i])
            .chain(x.iter().copied())
            .chain((1..=self.pad_r).map(|i| 2.0 * last - x[n - 1 - i]))
            .map(|v| Complex { re: v as f64, im: 0.0 })
            .collect();
        let old_len = buf.len();
        self.forward.process(&mut buf);

        let new_len = old_len * self.factor;
        let half = old_len / 2 + 1;
        let scale = self.factor as f64;
        let mut spec = vec![Complex::<f64>::default(); new_len];
        for i in 0..half {
            spec[i] = buf[i] * scale;
        }
        if old_len % 2 == 0 {
            spec[old_len / 2] *= 0.5;
        }
        // Hermitian mirror of the positive half.
        for i in 1..half {
            spec[new_len - i] = spec[i].conj();
        }

        self.inverse.process(&mut spec);
        let inv = 1.0 / new_len as f64;
        let skip = self.pad_l * self.factor;
        spec[skip..skip + self.output_len()]
            .iter()
            .map(|c| (c.re * inv) as f32)
            .collect()
    }
}

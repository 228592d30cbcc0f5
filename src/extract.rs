//! Spike detection, snapshot slicing and dejittering.
//!
//! Spikes are negative-going. A detection is the trough of each contiguous
//! run of samples below `mean − k · σ_MAD`; its snapshot is sliced with a
//! small jitter margin on either side so [`dejitter`] can re-centre it on the
//! band-limited trough without running off the end of the slice.
//!
//! Every waveform returned by [`dejitter`] has exactly
//! `window.before + window.after` samples and stays index-aligned with its
//! spike time.
use ndarray::{Array2, ArrayView1};

use crate::config::SortConfig;
use crate::error::{Result, SortError};
use crate::resample::Upsampler;

/// Snapshot geometry in samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotWindow {
    /// Samples before the trough.
    pub before: usize,
    /// Samples from the trough (inclusive) onwards.
    pub after: usize,
    /// Extra samples sliced on both sides for dejittering.
    pub margin: usize,
}

impl SnapshotWindow {
    /// Convert millisecond spans at `sampling_rate` Hz.
    ///
    /// `before` and the total are rounded independently, so the dejittered
    /// length is always `round((before_ms + after_ms) · fs / 1000)`.
    pub fn from_ms(before_ms: f32, after_ms: f32, margin_ms: f32, sampling_rate: f32) -> Self {
        let per_ms = sampling_rate as f64 / 1000.0;
        let before = (before_ms as f64 * per_ms).round() as usize;
        let total = ((before_ms + after_ms) as f64 * per_ms).round() as usize;
        let margin = (margin_ms as f64 * per_ms).round() as usize;
        Self { before, after: total.saturating_sub(before), margin }
    }

    /// Dejittered waveform length.
    pub fn len(&self) -> usize {
        self.before + self.after
    }

    /// Raw slice length including both margins.
    pub fn sliced_len(&self) -> usize {
        self.len() + 2 * self.margin
    }

    /// Index of the detected trough inside a raw slice.
    pub fn center(&self) -> usize {
        self.before + self.margin
    }
}

impl From<&SortConfig> for SnapshotWindow {
    fn from(cfg: &SortConfig) -> Self {
        Self::from_ms(
            cfg.snapshot_before_ms,
            cfg.snapshot_after_ms,
            cfg.jitter_margin_ms,
            cfg.sampling_rate,
        )
    }
}

/// Detection threshold policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    /// Multiple of the MAD noise estimate below the trace mean.
    pub threshold_multiplier: f32,
    /// Minimum gap between accepted troughs, in samples.
    pub refractory_samples: usize,
}

impl From<&SortConfig> for Detection {
    fn from(cfg: &SortConfig) -> Self {
        Self {
            threshold_multiplier: cfg.threshold_multiplier,
            refractory_samples: cfg.refractory_samples(),
        }
    }
}

/// Waveforms `[N, L]` with their spike times (sample indices), row-aligned.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshots {
    pub waveforms: Array2<f32>,
    pub times: Vec<usize>,
}

impl Snapshots {
    pub fn empty(width: usize) -> Self {
        Self { waveforms: Array2::zeros((0, width)), times: vec![] }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn waveform_len(&self) -> usize {
        self.waveforms.ncols()
    }

    /// Stack equal-length rows; a row of any other length is a
    /// [`SortError::InconsistentWaveformLength`].
    pub fn from_rows(rows: Vec<Vec<f32>>, times: Vec<usize>, width: usize) -> Result<Self> {
        debug_assert_eq!(rows.len(), times.len());
        if let Some((index, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != width) {
            return Err(SortError::InconsistentWaveformLength {
                expected: width,
                found: row.len(),
                index,
            });
        }
        let n = rows.len();
        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        let waveforms = Array2::from_shape_vec((n, width), flat).map_err(|_| {
            SortError::InconsistentWaveformLength { expected: width, found: 0, index: 0 }
        })?;
        Ok(Self { waveforms, times })
    }
}

/// Noise estimate `median(|x − mean|) / 0.6745` and the trace mean.
pub fn noise_level(trace: &[f32]) -> (f64, f64) {
    if trace.is_empty() {
        return (0.0, 0.0);
    }
    let mean = trace.iter().map(|&v| v as f64).sum::<f64>() / trace.len() as f64;
    let mut dev: Vec<f64> = trace.iter().map(|&v| (v as f64 - mean).abs()).collect();
    let mid = dev.len() / 2;
    let (_, median, _) = dev.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    (mean, *median / 0.6745)
}

/// Detection level below which samples belong to a spike, or `None` for a
/// flat trace.
pub fn noise_threshold(trace: &[f32], threshold_multiplier: f32) -> Option<f32> {
    let (mean, sigma) = noise_level(trace);
    if sigma > 0.0 {
        Some((mean - threshold_multiplier as f64 * sigma) as f32)
    } else {
        None
    }
}

/// Trough of every contiguous run at or below `level`, with the refractory
/// gap enforced against the last accepted trough.
pub fn detect_troughs(trace: &[f32], level: f32, refractory_samples: usize) -> Vec<usize> {
    let mut troughs = Vec::new();
    let mut run: Option<(usize, f32)> = None;
    let mut last: Option<usize> = None;

    let mut accept = |idx: usize, troughs: &mut Vec<usize>| {
        if last.map_or(true, |prev| idx - prev >= refractory_samples) {
            troughs.push(idx);
            last = Some(idx);
        }
    };

    for (i, &v) in trace.iter().enumerate() {
        if v <= level {
            run = match run {
                Some((idx, min)) if min <= v => Some((idx, min)),
                _ => Some((i, v)),
            };
        } else if let Some((idx, _)) = run.take() {
            accept(idx, &mut troughs);
        }
    }
    if let Some((idx, _)) = run {
        accept(idx, &mut troughs);
    }
    troughs
}

/// Detect spikes in a filtered trace and slice their snapshots.
///
/// Slices are `window.sliced_len()` samples long with the trough at
/// `window.center()`. Detections whose slice would leave the trace are
/// dropped. An empty result is not an error.
pub fn extract_waveforms(filtered: &[f32], window: &SnapshotWindow, detection: &Detection) -> Snapshots {
    let width = window.sliced_len();
    let Some(level) = noise_threshold(filtered, detection.threshold_multiplier) else {
        log::info!("flat trace, no spikes detected");
        return Snapshots::empty(width);
    };

    let troughs = detect_troughs(filtered, level, detection.refractory_samples);
    let lead = window.center();
    let tail = width - lead;

    let kept: Vec<usize> = troughs
        .iter()
        .copied()
        .filter(|&t| t >= lead && t + tail <= filtered.len())
        .collect();

    let mut waveforms = Array2::<f32>::zeros((kept.len(), width));
    for (mut row, &t) in waveforms.rows_mut().into_iter().zip(&kept) {
        row.assign(&ArrayView1::from(&filtered[t - lead..t + tail]));
    }

    log::info!(
        "detected {} troughs below {level:.2}, {} with full snapshots",
        troughs.len(),
        kept.len()
    );
    Snapshots { waveforms, times: kept }
}

/// Re-centre each snapshot on its band-limited trough.
///
/// Each slice is upsampled `upsample_factor`×, the global minimum located,
/// and `window.len()` samples taken at the original spacing around it.
/// A spike is dropped, together with its time, when its refined trough moved
/// by a full jitter margin or more. Spike times move by the rounded shift.
///
/// # Errors
///
/// [`SortError::InconsistentWaveformLength`] if the input slices are not
/// `window.sliced_len()` wide or a re-sliced waveform comes out short.
pub fn dejitter(snapshots: &Snapshots, window: &SnapshotWindow, upsample_factor: usize) -> Result<Snapshots> {
    let width = window.sliced_len();
    if snapshots.waveform_len() != width {
        return Err(SortError::InconsistentWaveformLength {
            expected: width,
            found: snapshots.waveform_len(),
            index: 0,
        });
    }
    let out_len = window.len();
    if snapshots.is_empty() {
        return Ok(Snapshots::empty(out_len));
    }

    let f = upsample_factor.max(1);
    let upsampler = Upsampler::new(width, f);
    let up_len = upsampler.output_len();
    let center_up = (window.center() * f) as isize;
    let max_shift = (window.margin * f).max(1) as isize;

    let mut rows = Vec::with_capacity(snapshots.len());
    let mut times = Vec::with_capacity(snapshots.len());
    for (row, &t) in snapshots.waveforms.rows().into_iter().zip(&snapshots.times) {
        let raw: Vec<f32> = row.to_vec();
        let up = upsampler.process(&raw);
        let m = argmin(&up);

        let shift = m as isize - center_up;
        if shift.abs() >= max_shift {
            continue;
        }
        if m < window.before * f || m + window.after * f > up_len {
            continue;
        }

        let start = m - window.before * f;
        let wf: Vec<f32> = (0..out_len).map(|j| up[start + j * f]).collect();
        let moved = (shift as f64 / f as f64).round() as isize;
        rows.push(wf);
        times.push((t as isize + moved).max(0) as usize);
    }

    let dropped = snapshots.len() - rows.len();
    if dropped > 0 {
        log::warn!("dejitter dropped {dropped} of {} waveforms", snapshots.len());
    }
    Snapshots::from_rows(rows, times, out_len)
}

fn argmin(x: &[f32]) -> usize {
    x.iter()
        .enumerate()
        .fold((0, f32::INFINITY), |(bi, bv), (i, &v)| if v < bv { (i, v) } else { (bi, bv) })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> SnapshotWindow {
        SnapshotWindow { before: 4, after: 8, margin: 2 }
    }

    #[test]
    fn window_from_ms_at_30khz() {
        let w = SnapshotWindow::from_ms(0.5, 1.0, 0.1, 30_000.0);
        assert_eq!(w, SnapshotWindow { before: 15, after: 30, margin: 3 });
        assert_eq!(w.len(), 45);
        assert_eq!(w.sliced_len(), 51);
        assert_eq!(w.center(), 18);
    }

    #[test]
    fn window_total_rounds_as_a_whole() {
        // 0.25 ms + 0.25 ms at 10 kHz: before rounds to 3, total is 5.
        let w = SnapshotWindow::from_ms(0.25, 0.25, 0.0, 10_000.0);
        assert_eq!(w.len(), 5);
    }

    #[test]
    fn noise_level_of_symmetric_signal() {
        let x = [-2.0_f32, -1.0, 0.0, 1.0, 2.0];
        let (mean, sigma) = noise_level(&x);
        approx::assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(sigma, 1.0 / 0.6745, epsilon = 1e-9);
    }

    #[test]
    fn flat_trace_has_no_threshold() {
        assert!(noise_threshold(&[1.0; 64], 5.0).is_none());
    }

    #[test]
    fn one_trough_per_run() {
        let x = [0.0_f32, -6.0, -9.0, -7.0, 0.0, 0.0, -8.0, 0.0];
        assert_eq!(detect_troughs(&x, -5.0, 0), vec![2, 6]);
    }

    #[test]
    fn refractory_gap_suppresses_double_count() {
        let x = [0.0_f32, -9.0, 0.0, -9.0, 0.0, 0.0, 0.0, -9.0];
        assert_eq!(detect_troughs(&x, -5.0, 3), vec![1, 7]);
    }

    #[test]
    fn run_at_trace_end_is_detected() {
        let x = [0.0_f32, 0.0, -6.0, -7.0];
        assert_eq!(detect_troughs(&x, -5.0, 0), vec![3]);
    }

    #[test]
    fn mismatched_slice_width_is_an_error() {
        let snaps = Snapshots { waveforms: Array2::zeros((2, 7)), times: vec![10, 20] };
        let err = dejitter(&snaps, &window(), 10).unwrap_err();
        assert!(matches!(err, SortError::InconsistentWaveformLength { expected: 16, found: 7, .. }));
    }

    #[test]
    fn from_rows_rejects_ragged_input() {
        let err = Snapshots::from_rows(vec![vec![0.0; 3], vec![0.0; 2]], vec![0, 1], 3).unwrap_err();
        assert!(matches!(err, SortError::InconsistentWaveformLength { index: 1, found: 2, .. }));
    }

    #[test]
    fn dejitter_keeps_centred_spikes_and_lengths() {
        let w = window();
        let center = w.center() as f32;
        let rows: Vec<Vec<f32>> = (0..3)
            .map(|k| {
                (0..w.sliced_len())
                    .map(|i| {
                        let d = i as f32 - center - 0.2 * k as f32;
                        -10.0 * (-d * d / 4.0).exp()
                    })
                    .collect()
            })
            .collect();
        let snaps = Snapshots::from_rows(rows, vec![100, 200, 300], w.sliced_len()).unwrap();
        let out = dejitter(&snaps, &w, 10).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out.waveform_len(), w.len());
        assert_eq!(out.times, vec![100, 200, 300]);
        for row in out.waveforms.rows() {
            assert_eq!(argmin(&row.to_vec()), w.before);
        }
    }

    #[test]
    fn dejitter_drops_spikes_that_moved_too_far() {
        let w = window();
        let center = w.center();
        let mut shallow = vec![0.0_f32; w.sliced_len()];
        shallow[center] = -5.0;
        shallow[0] = -20.0; // deeper trough at the slice edge
        let mut good = vec![0.0_f32; w.sliced_len()];
        good[center] = -5.0;
        let snaps = Snapshots::from_rows(vec![shallow, good], vec![50, 90], w.sliced_len()).unwrap();
        let out = dejitter(&snaps, &w, 10).unwrap();
        assert_eq!(out.times, vec![90]);
        assert_eq!(out.waveforms.nrows(), 1);
    }
}

#![allow(dead_code)]
//! Shared synthetic-signal generators for the integration tests.
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use spikesort::SortConfig;

pub const FS: f32 = 30_000.0;

pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Zero-mean Gaussian samples (Box–Muller).
pub fn gaussian_noise(rng: &mut StdRng, n: usize, sd: f32) -> Vec<f32> {
    (0..n)
        .map(|_| {
            let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
            let u2: f64 = rng.gen();
            ((-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()) as f32 * sd
        })
        .collect()
}

/// Extracellular spike shape: a sharp negative trough followed by a slower
/// positive rebound.
#[derive(Debug, Clone, Copy)]
pub struct Unit {
    pub amplitude: f32,
    pub trough_ms: f32,
    pub rebound: f32,
    pub rebound_delay_ms: f32,
    pub rebound_ms: f32,
}

pub const WIDE: Unit = Unit { amplitude: 80.0, trough_ms: 0.15, rebound: 0.35, rebound_delay_ms: 0.4, rebound_ms: 0.3 };
pub const NARROW: Unit = Unit { amplitude: 160.0, trough_ms: 0.1, rebound: 0.3, rebound_delay_ms: 0.35, rebound_ms: 0.25 };

impl Unit {
    /// Sampled template with the trough at index `lead`; returns `(samples, lead)`.
    pub fn template(&self, fs: f32) -> (Vec<f32>, usize) {
        let lead = (2.0 * fs / 1000.0).round() as usize;
        let len = 2 * lead + 1;
        let samples = (0..len)
            .map(|i| {
                let t = (i as f32 - lead as f32) / fs * 1000.0;
                let trough = (-0.5 * (t / self.trough_ms).powi(2)).exp();
                let rebound = (-0.5 * ((t - self.rebound_delay_ms) / self.rebound_ms).powi(2)).exp();
                self.amplitude * (-trough + self.rebound * rebound)
            })
            .collect();
        (samples, lead)
    }
}

/// Add `unit` with its trough at each of `times`.
pub fn add_spikes(trace: &mut [f32], unit: &Unit, fs: f32, times: &[usize]) {
    let (tmpl, lead) = unit.template(fs);
    for &t in times {
        for (j, &v) in tmpl.iter().enumerate() {
            if let Some(i) = (t + j).checked_sub(lead) {
                if i < trace.len() {
                    trace[i] += v;
                }
            }
        }
    }
}

/// Ground truth of a synthetic recording.
pub struct Synthetic {
    pub trace: Vec<f32>,
    /// `(trough sample, unit index)` in time order.
    pub spikes: Vec<(usize, usize)>,
}

/// Noise plus alternating spikes from `units`, roughly one every 50 ms.
pub fn synthetic_recording(seed: u64, secs: f32, noise_sd: f32, units: &[Unit]) -> Synthetic {
    let mut rng = rng(seed);
    let n = (secs * FS) as usize;
    let mut trace = gaussian_noise(&mut rng, n, noise_sd);

    let mut spikes = Vec::new();
    let mut t = 3_000;
    let mut u = 0;
    while t + 3_000 < n {
        spikes.push((t + rng.gen_range(0..300), u % units.len()));
        t += 1_500;
        u += 1;
    }
    for (idx, unit) in units.iter().enumerate() {
        let times: Vec<usize> = spikes.iter().filter(|s| s.1 == idx).map(|s| s.0).collect();
        add_spikes(&mut trace, unit, FS, &times);
    }
    Synthetic { trace, spikes }
}

/// Samples already in µV, a short sweep, and a 6σ threshold so filtered
/// noise alone never crosses it.
pub fn test_config() -> SortConfig {
    SortConfig {
        adc_to_microvolts: 1.0,
        threshold_multiplier: 6.0,
        max_clusters: 3,
        restarts: 3,
        ..SortConfig::default()
    }
}

/// Isotropic Gaussian blobs around `centers`, `per_center` rows each.
/// Returns `(data, true labels)`.
pub fn blobs(seed: u64, centers: &[Vec<f64>], per_center: usize, sd: f64) -> (Array2<f64>, Vec<usize>) {
    let mut rng = rng(seed);
    let d = centers[0].len();
    let n = centers.len() * per_center;
    let mut data = Array2::<f64>::zeros((n, d));
    let mut truth = Vec::with_capacity(n);
    for (c, center) in centers.iter().enumerate() {
        for r in 0..per_center {
            let row = c * per_center + r;
            let noise = gaussian_noise(&mut rng, d, sd as f32);
            for j in 0..d {
                data[[row, j]] = center[j] + noise[j] as f64;
            }
            truth.push(c);
        }
    }
    (data, truth)
}

/// Fraction of rows whose predicted cluster's majority true label matches.
pub fn purity(predicted: &[i32], truth: &[usize], k: usize, n_true: usize) -> f64 {
    let mut counts = vec![vec![0usize; n_true]; k];
    for (&p, &t) in predicted.iter().zip(truth) {
        if p >= 0 {
            counts[p as usize][t] += 1;
        }
    }
    let hits: usize = counts.iter().map(|row| row.iter().copied().max().unwrap_or(0)).sum();
    hits as f64 / predicted.len() as f64
}

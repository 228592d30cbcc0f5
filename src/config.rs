//! Sorting configuration.
//!
//! [`SortConfig`] holds every threshold the per-electrode pipeline needs.
//! All fields have defaults matching the parameters the lab's clustering
//! script ships with (30 kHz Intan recordings).
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SortError};

/// Configuration for one electrode's sorting run.
///
/// All fields are `pub` so you can construct one with struct-update syntax:
///
/// ```
/// use spikesort::SortConfig;
///
/// let cfg = SortConfig {
///     max_clusters: 5,
///     amplitude_sd_cutoff: 2.5,
///     ..SortConfig::default()
/// };
/// assert!(cfg.validate().is_ok());
/// ```
///
/// A JSON file only needs the keys it overrides; the rest fall back to
/// [`SortConfig::default()`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SortConfig {
    /// Acquisition rate of the raw trace in Hz.
    ///
    /// Default: `30000.0`.
    pub sampling_rate: f32,

    /// Lower band-pass edge in Hz. Default: `300.0`.
    pub bandpass_low_hz: f32,

    /// Upper band-pass edge in Hz. Default: `3000.0`.
    pub bandpass_high_hz: f32,

    /// Gain applied to the raw samples before filtering.
    ///
    /// Intan headstages report 0.195 µV per ADC count. Set to `1.0` when the
    /// trace is already in microvolts.
    ///
    /// Default: `0.195`.
    pub adc_to_microvolts: f32,

    /// Absolute voltage above which a sample counts as a breach (µV).
    ///
    /// Default: `1500.0`.
    pub voltage_cutoff: f32,

    /// Breaches per second over the whole trace at which the recording is
    /// suspected to have failed. Default: `0.2`.
    pub max_breach_rate: f64,

    /// Number of 1-second bins containing at least one breach.
    /// Default: `10`.
    pub max_secs_above_cutoff: usize,

    /// Mean breach count over breaching bins; also the per-bin count that
    /// marks the truncation point. Default: `20.0`.
    pub max_mean_breach_rate_per_sec: f64,

    /// Snapshot length before the spike trough in ms. Default: `0.5`.
    pub snapshot_before_ms: f32,

    /// Snapshot length after the spike trough in ms. Default: `1.0`.
    pub snapshot_after_ms: f32,

    /// Detection threshold as a multiple of the MAD noise estimate.
    /// Default: `5.0`.
    pub threshold_multiplier: f32,

    /// Minimum gap between two accepted detections in ms. Default: `0.5`.
    pub refractory_ms: f32,

    /// Extra window sliced on each side of a detection so the dejitterer can
    /// re-centre it; a refined trough that moves this far is rejected.
    /// Default: `0.1` ms.
    pub jitter_margin_ms: f32,

    /// Interpolation factor used while dejittering. Default: `10`.
    pub upsample_factor: usize,

    /// Principal components appended to the feature matrix. Default: `3`.
    pub n_pc: usize,

    /// Largest cluster count in the sweep (the sweep starts at 2).
    /// Default: `7`.
    pub max_clusters: usize,

    /// EM iterations allowed per restart. Default: `1000`.
    pub max_iterations: usize,

    /// EM stops once the mean log-likelihood improves by less than this.
    /// Default: `1e-3`.
    pub convergence_threshold: f64,

    /// Random restarts per cluster count. Default: `10`.
    pub restarts: usize,

    /// Members whose amplitude is at or below `mean - sd_cutoff * sd` of
    /// their cluster are relabelled as noise. Default: `3.0`.
    pub amplitude_sd_cutoff: f64,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            sampling_rate: 30_000.0,
            bandpass_low_hz: 300.0,
            bandpass_high_hz: 3000.0,
            adc_to_microvolts: 0.195,
            voltage_cutoff: 1500.0,
            max_breach_rate: 0.2,
            max_secs_above_cutoff: 10,
            max_mean_breach_rate_per_sec: 20.0,
            snapshot_before_ms: 0.5,
            snapshot_after_ms: 1.0,
            threshold_multiplier: 5.0,
            refractory_ms: 0.5,
            jitter_margin_ms: 0.1,
            upsample_factor: 10,
            n_pc: 3,
            max_clusters: 7,
            max_iterations: 1000,
            convergence_threshold: 1e-3,
            restarts: 10,
            amplitude_sd_cutoff: 3.0,
        }
    }
}

impl SortConfig {
    /// Load a (possibly partial) configuration from a JSON file.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg: SortConfig = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(cfg)
    }

    /// Reject configurations that would fail later in the pipeline.
    pub fn validate(&self) -> Result<()> {
        if !(self.sampling_rate > 0.0) {
            return Err(SortError::InvalidConfig(format!(
                "sampling_rate must be positive, got {}",
                self.sampling_rate
            )));
        }
        crate::filter::check_band(self.bandpass_low_hz, self.bandpass_high_hz, self.sampling_rate)?;

        let positive = [
            ("voltage_cutoff", self.voltage_cutoff as f64),
            ("snapshot_before_ms", self.snapshot_before_ms as f64),
            ("snapshot_after_ms", self.snapshot_after_ms as f64),
            ("threshold_multiplier", self.threshold_multiplier as f64),
            ("convergence_threshold", self.convergence_threshold),
        ];
        for (name, v) in positive {
            if !(v > 0.0) {
                return Err(SortError::InvalidConfig(format!("{name} must be positive, got {v}")));
            }
        }
        let non_negative = [
            ("refractory_ms", self.refractory_ms as f64),
            ("jitter_margin_ms", self.jitter_margin_ms as f64),
            ("amplitude_sd_cutoff", self.amplitude_sd_cutoff),
            ("max_breach_rate", self.max_breach_rate),
            ("max_mean_breach_rate_per_sec", self.max_mean_breach_rate_per_sec),
        ];
        for (name, v) in non_negative {
            if !(v >= 0.0) {
                return Err(SortError::InvalidConfig(format!("{name} must be non-negative, got {v}")));
            }
        }
        if self.max_clusters < 2 {
            return Err(SortError::InvalidConfig(format!(
                "max_clusters must be at least 2, got {}",
                self.max_clusters
            )));
        }
        if self.restarts == 0 || self.max_iterations == 0 || self.upsample_factor == 0 {
            return Err(SortError::InvalidConfig(
                "restarts, max_iterations and upsample_factor must be at least 1".into(),
            ));
        }
        if self.snapshot_samples() == 0 {
            return Err(SortError::InvalidConfig("snapshot window is shorter than one sample".into()));
        }
        if self.n_pc > self.snapshot_samples() {
            return Err(SortError::InvalidConfig(format!(
                "n_pc={} exceeds the {}-sample waveform",
                self.n_pc,
                self.snapshot_samples()
            )));
        }
        Ok(())
    }

    /// Samples per millisecond at [`SortConfig::sampling_rate`].
    pub fn samples_per_ms(&self) -> f64 {
        self.sampling_rate as f64 / 1000.0
    }

    /// Waveform length after dejittering:
    /// `round((before_ms + after_ms) · fs / 1000)`.
    ///
    /// ```
    /// use spikesort::SortConfig;
    /// assert_eq!(SortConfig::default().snapshot_samples(), 45);
    /// ```
    pub fn snapshot_samples(&self) -> usize {
        ((self.snapshot_before_ms + self.snapshot_after_ms) as f64 * self.samples_per_ms()).round()
            as usize
    }

    pub fn refractory_samples(&self) -> usize {
        (self.refractory_ms as f64 * self.samples_per_ms()).round() as usize
    }

    /// Feature matrix width: energy + amplitude + `n_pc` components.
    pub fn n_features(&self) -> usize {
        2 + self.n_pc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        SortConfig::default().validate().unwrap();
    }

    #[test]
    fn window_sizes_at_30khz() {
        let cfg = SortConfig::default();
        assert_eq!(cfg.snapshot_samples(), 45);
        assert_eq!(cfg.refractory_samples(), 15);
    }

    #[test]
    fn inverted_band_rejected() {
        let cfg = SortConfig { bandpass_low_hz: 3000.0, bandpass_high_hz: 300.0, ..SortConfig::default() };
        assert!(matches!(cfg.validate(), Err(SortError::InvalidFilterRange { .. })));
    }

    #[test]
    fn single_cluster_sweep_rejected() {
        let cfg = SortConfig { max_clusters: 1, ..SortConfig::default() };
        assert!(matches!(cfg.validate(), Err(SortError::InvalidConfig(_))));
    }

    #[test]
    fn partial_json_overrides_defaults() {
        let cfg: SortConfig = serde_json::from_str(r#"{ "max_clusters": 4, "n_pc": 2 }"#).unwrap();
        assert_eq!(cfg.max_clusters, 4);
        assert_eq!(cfg.n_pc, 2);
        assert_eq!(cfg.restarts, SortConfig::default().restarts);
    }

    #[test]
    fn unknown_json_key_rejected() {
        assert!(serde_json::from_str::<SortConfig>(r#"{ "max_cluster": 4 }"#).is_err());
    }
}

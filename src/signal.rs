//! Signal conditioning: band-pass filtering and recording-cutoff detection.
//!
//! A headstage that detaches mid-session leaves a long tail of rail-to-rail
//! noise. [`detect_cutoff`] flags it with three breach statistics computed
//! over 1-second epochs; only when all three exceed their limits is the
//! recording truncated at the first epoch whose breach count exceeds the
//! mean-rate limit.
use crate::config::SortConfig;
use crate::epoch::{breach_counts, epoch_means, epoch_view};
use crate::error::Result;
use crate::filter::{apply_fir_zero_phase, design_bandpass};

/// Band-pass filter a raw trace. The output has the same length as the input.
///
/// # Errors
///
/// [`crate::SortError::InvalidFilterRange`] when `low_hz >= high_hz`, either
/// edge is non-positive, or `high_hz` reaches Nyquist.
pub fn bandpass(raw: &[f32], low_hz: f32, high_hz: f32, sampling_rate: f32) -> Result<Vec<f32>> {
    let h = design_bandpass(low_hz, high_hz, sampling_rate)?;
    apply_fir_zero_phase(raw, &h)
}

/// Scale raw ADC counts to microvolts and band-pass filter them.
pub fn condition(raw: &[f32], cfg: &SortConfig) -> Result<Vec<f32>> {
    let gain = cfg.adc_to_microvolts;
    let scaled: Vec<f32> = raw.iter().map(|&v| v * gain).collect();
    bandpass(&scaled, cfg.bandpass_low_hz, cfg.bandpass_high_hz, cfg.sampling_rate)
}

/// Limits for the three breach statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CutoffCriteria {
    pub voltage_cutoff: f32,
    pub max_breach_rate: f64,
    pub max_secs_above_cutoff: usize,
    pub max_mean_breach_rate_per_sec: f64,
}

impl From<&SortConfig> for CutoffCriteria {
    fn from(cfg: &SortConfig) -> Self {
        Self {
            voltage_cutoff: cfg.voltage_cutoff,
            max_breach_rate: cfg.max_breach_rate,
            max_secs_above_cutoff: cfg.max_secs_above_cutoff,
            max_mean_breach_rate_per_sec: cfg.max_mean_breach_rate_per_sec,
        }
    }
}

/// Where (if anywhere) a recording was truncated, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct CutoffReport {
    /// Number of usable samples; `0 <= cutoff <= trace length`.
    pub cutoff: usize,
    /// All three breach limits were exceeded.
    pub tripped: bool,
    /// Breaches per second over the whole trace.
    pub breach_rate: f64,
    /// Epochs containing at least one breach.
    pub secs_above_cutoff: usize,
    /// Mean breach count over epochs that have any; 0 when none do.
    pub mean_breach_rate_per_sec: f64,
    /// Mean voltage of every whole 1-second epoch.
    pub bin_means: Vec<f32>,
}

impl CutoffReport {
    /// The electrode has no usable data.
    pub fn is_immediate(&self) -> bool {
        self.cutoff == 0
    }
}

/// Find the last usable sample of a filtered trace.
pub fn detect_cutoff(filtered: &[f32], sampling_rate: f32, criteria: &CutoffCriteria) -> CutoffReport {
    let n = filtered.len();
    let level = criteria.voltage_cutoff;

    let total_breaches = filtered.iter().filter(|v| v.abs() > level).count();
    let breach_rate = if n == 0 {
        0.0
    } else {
        total_breaches as f64 * sampling_rate as f64 / n as f64
    };

    let epoch_samples = sampling_rate.round() as usize;
    let epochs = epoch_view(filtered, epoch_samples);
    let per_sec = breach_counts(&epochs, level);

    let breaching: Vec<usize> = per_sec.iter().copied().filter(|&c| c > 0).collect();
    let secs_above_cutoff = breaching.len();
    let mean_breach_rate_per_sec = if breaching.is_empty() {
        0.0
    } else {
        breaching.iter().sum::<usize>() as f64 / breaching.len() as f64
    };

    let tripped = breach_rate >= criteria.max_breach_rate
        && secs_above_cutoff >= criteria.max_secs_above_cutoff
        && mean_breach_rate_per_sec >= criteria.max_mean_breach_rate_per_sec;

    let cutoff = if tripped {
        per_sec
            .iter()
            .position(|&c| c as f64 > criteria.max_mean_breach_rate_per_sec)
            .map(|sec| sec * epoch_samples)
            .unwrap_or(n)
    } else {
        n
    };

    if tripped {
        log::warn!(
            "recording cut off at sample {cutoff} of {n} \
             (breach rate {breach_rate:.3}/s, {secs_above_cutoff} s above cutoff, \
             {mean_breach_rate_per_sec:.1} breaches per breaching second)"
        );
    } else {
        log::debug!("no cutoff: breach rate {breach_rate:.3}/s, {secs_above_cutoff} s above cutoff");
    }

    CutoffReport {
        cutoff,
        tripped,
        breach_rate,
        secs_above_cutoff,
        mean_breach_rate_per_sec,
        bin_means: epoch_means(&epochs).to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criteria() -> CutoffCriteria {
        CutoffCriteria {
            voltage_cutoff: 100.0,
            max_breach_rate: 0.2,
            max_secs_above_cutoff: 2,
            max_mean_breach_rate_per_sec: 20.0,
        }
    }

    #[test]
    fn quiet_trace_not_truncated() {
        let trace = vec![1.0_f32; 5000];
        let report = detect_cutoff(&trace, 1000.0, &criteria());
        assert!(!report.tripped);
        assert_eq!(report.cutoff, 5000);
        assert_eq!(report.secs_above_cutoff, 0);
        assert_eq!(report.mean_breach_rate_per_sec, 0.0);
        assert_eq!(report.bin_means.len(), 5);
    }

    #[test]
    fn partial_trailing_second_counted_in_rate_only() {
        // 2.5 s; the only breaches sit in the dropped half second.
        let mut trace = vec![0.0_f32; 2500];
        trace[2100..2200].fill(500.0);
        let report = detect_cutoff(&trace, 1000.0, &criteria());
        assert_eq!(report.secs_above_cutoff, 0);
        approx::assert_abs_diff_eq!(report.breach_rate, 40.0, epsilon = 1e-9);
        assert_eq!(report.cutoff, 2500);
    }

    #[test]
    fn failing_tail_truncated_at_first_bad_second() {
        let mut trace = vec![0.0_f32; 6000];
        trace[4000..].fill(-500.0);
        let report = detect_cutoff(&trace, 1000.0, &criteria());
        assert!(report.tripped);
        assert_eq!(report.cutoff, 4000);
    }

    #[test]
    fn one_condition_short_keeps_everything() {
        // Heavy breaches but only in one second: secs_above_cutoff < 2.
        let mut trace = vec![0.0_f32; 6000];
        trace[5000..].fill(500.0);
        let report = detect_cutoff(&trace, 1000.0, &criteria());
        assert!(!report.tripped);
        assert_eq!(report.cutoff, 6000);
    }

    #[test]
    fn breach_at_start_gives_immediate_cutoff() {
        let trace = vec![900.0_f32; 3000];
        let report = detect_cutoff(&trace, 1000.0, &criteria());
        assert!(report.is_immediate());
    }

    #[test]
    fn empty_trace() {
        let report = detect_cutoff(&[], 1000.0, &criteria());
        assert_eq!(report.cutoff, 0);
        assert!(!report.tripped);
    }

    #[test]
    fn bandpass_rejects_bad_band() {
        assert!(bandpass(&[0.0; 100], 3000.0, 300.0, 30_000.0).is_err());
    }
}

//! # spikesort: offline per-electrode spike sorting in pure Rust
//!
//! Turns one electrode's raw extracellular voltage trace into clustered
//! spike waveforms. Each stage is a standalone module; [`sort_electrode`]
//! chains them and hands every intermediate array to an [`ArtifactSink`].
//!
//! ## Pipeline overview
//!
//! ```text
//! raw trace [T] f32 (ADC counts)
//!   │
//!   ├─ signal::condition()          × adc gain, FIR band-pass 300–3000 Hz (zero phase)
//!   ├─ signal::detect_cutoff()      1-s breach statistics → usable length
//!   ├─ extract::extract_waveforms() MAD threshold, one trough per crossing
//!   ├─ extract::dejitter()          10× FFT upsample, re-centre, drop big shifts
//!   ├─ features::scale_waveforms()  ÷ energy
//!   ├─ features::reduce_dimensionality()   PCA
//!   ├─ features::assemble_feature_matrix() [energy, |amp|, pc0..pc{n_pc-1}]
//!   └─ for k in 2..=max_clusters
//!        ├─ gmm::fit()              best of `restarts` EM runs by BIC
//!        └─ outlier::reject_amplitude_outliers()
//!             │
//!             └─→ sink: waveforms, times, PCA, energy, amplitude,
//!                       clusters{k}/{predictions, bic, means, covariances, weights}
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use spikesort::{sort_electrode, ElectrodeOutcome, MemorySink, SortConfig};
//!
//! let raw: Vec<f32> = vec![0.0; 30_000 * 60];
//! let cfg = SortConfig::default();
//! let mut sink = MemorySink::new();
//!
//! match sort_electrode(0, &raw, &cfg, &mut sink).unwrap() {
//!     ElectrodeOutcome::Sorted(summary) => println!("{} spikes", summary.n_spikes),
//!     ElectrodeOutcome::Empty { reason, .. } => println!("nothing to sort: {reason:?}"),
//! }
//! ```

pub mod config;
pub mod epoch;
pub mod error;
pub mod extract;
pub mod features;
pub mod filter;
pub mod gmm;
pub mod io;
pub mod normalize;
pub mod outlier;
pub mod resample;
pub mod signal;
pub mod sink;

use rayon::prelude::*;

// ── Crate-root re-exports ─────────────────────────────────────────────────

// config + errors
pub use config::SortConfig;
pub use error::{Result, SortError};

// signal conditioning
pub use signal::{bandpass, condition, detect_cutoff, CutoffCriteria, CutoffReport};

// waveform extraction
pub use extract::{dejitter, extract_waveforms, noise_threshold, Detection, SnapshotWindow, Snapshots};

// features
pub use features::{amplitudes, assemble_feature_matrix, reduce_dimensionality, scale_waveforms, Pca};

// clustering
pub use gmm::{fit, mahalanobis, sweep, ClusterSolution, FitParams, GaussianMixture, Sweep};
pub use outlier::{reject_amplitude_outliers, NOISE_LABEL};

// artifacts
pub use io::{RawTrace, StWriter};
pub use sink::{ArrayData, ArtifactSink, MemorySink, SafetensorsSink, StoredArray};

/// Why an electrode finished without clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyReason {
    /// The cutoff landed on the first sample.
    ImmediateCutoff,
    /// Nothing crossed the detection threshold.
    NoSpikes,
    /// Every detected spike was dropped while dejittering.
    AllDropped,
}

/// What a finished electrode produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ElectrodeSummary {
    pub electrode: usize,
    /// Usable samples after cutoff detection.
    pub cutoff: usize,
    /// Waveforms kept after dejittering.
    pub n_spikes: usize,
    /// Waveforms lost while dejittering.
    pub n_dropped: usize,
    /// Variance fraction of every principal component, descending.
    pub explained_variance_ratio: Vec<f64>,
    /// Cluster counts with a persisted solution, ascending.
    pub solved: Vec<usize>,
    /// Cluster counts that produced no solution.
    pub skipped: Vec<usize>,
    /// Solved `k` with the lowest BIC.
    pub lowest_bic: Option<usize>,
}

/// Structured result of one electrode's run.
#[derive(Debug, Clone, PartialEq)]
pub enum ElectrodeOutcome {
    /// Normal completion with nothing to cluster; only the cutoff
    /// diagnostics were persisted.
    Empty { reason: EmptyReason, cutoff: usize },
    Sorted(ElectrodeSummary),
}

/// Run the **full sorting pipeline** on one electrode.
///
/// `raw` is borrowed and never modified. Artifacts go to `sink` under the
/// keys listed in the [module docs](crate), and `sink.flush()` is called after
/// the cutoff diagnostics, after the spike arrays and after every solved `k`,
/// so results for earlier `k` survive a later abort.
///
/// # Errors
///
/// * Configuration errors ([`SortError::InvalidFilterRange`],
///   [`SortError::InvalidConfig`]) before anything is written.
/// * [`SortError::InconsistentWaveformLength`] from dejittering.
/// * Sink failures ([`SortError::Sink`], [`SortError::Io`]).
///
/// A `k` whose fit fails to converge or has fewer spikes than components is
/// logged and skipped, not returned.
pub fn sort_electrode(
    electrode: usize,
    raw: &[f32],
    cfg: &SortConfig,
    sink: &mut dyn ArtifactSink,
) -> Result<ElectrodeOutcome> {
    cfg.validate()?;

    // 1. Gain + band-pass.
    let filtered = signal::condition(raw, cfg)?;

    // 2. Cutoff.
    let report = signal::detect_cutoff(&filtered, cfg.sampling_rate, &CutoffCriteria::from(cfg));
    persist_cutoff(sink, &report)?;
    sink.flush()?;
    if report.is_immediate() {
        log::warn!("electrode {electrode}: immediate cutoff, nothing to sort");
        return Ok(ElectrodeOutcome::Empty { reason: EmptyReason::ImmediateCutoff, cutoff: 0 });
    }
    let trace = &filtered[..report.cutoff];

    // 3. Detection + dejitter.
    let window = SnapshotWindow::from(cfg);
    let detected = extract::extract_waveforms(trace, &window, &Detection::from(cfg));
    if detected.is_empty() {
        log::info!("electrode {electrode}: no spikes");
        return Ok(ElectrodeOutcome::Empty { reason: EmptyReason::NoSpikes, cutoff: report.cutoff });
    }
    let spikes = extract::dejitter(&detected, &window, cfg.upsample_factor)?;
    if spikes.is_empty() {
        log::warn!("electrode {electrode}: all {} spikes dropped while dejittering", detected.len());
        return Ok(ElectrodeOutcome::Empty { reason: EmptyReason::AllDropped, cutoff: report.cutoff });
    }
    let (n, len) = spikes.waveforms.dim();

    // 4. Features.
    let amps = features::amplitudes(&spikes.waveforms);
    let (scaled, energy) = features::scale_waveforms(&spikes.waveforms);
    let pca = features::reduce_dimensionality(&scaled, len);

    let times: Vec<i64> = spikes.times.iter().map(|&t| t as i64).collect();
    sink.put_f32("spike_waveforms", &spikes.waveforms.iter().copied().collect::<Vec<_>>(), &[n, len])?;
    sink.put_i64("spike_times", &times, &[n])?;
    sink.put_f64("pca_waveforms", &pca.projections.iter().copied().collect::<Vec<_>>(), &[n, len])?;
    sink.put_f64("explained_variance_ratio", &pca.explained_variance_ratio.to_vec(), &[len])?;
    sink.put_f64("energy", &energy.to_vec(), &[n])?;
    sink.put_f64("spike_amplitudes", &amps.to_vec(), &[n])?;
    sink.flush()?;

    let data = features::assemble_feature_matrix(&energy, &amps, &pca.projections, cfg.n_pc)?;
    log::info!(
        "electrode {electrode}: {n} spikes ({} dropped), feature matrix {:?}",
        detected.len() - n,
        data.dim()
    );

    // 5. k sweep. Each k is persisted as soon as it is solved.
    let swept = gmm::sweep(data.view(), cfg.max_clusters, &FitParams::from(cfg), |solution| {
        let solution = outlier::reject_amplitude_outliers(solution, amps.view(), cfg.amplitude_sd_cutoff);
        persist_solution(&mut *sink, &solution)?;
        sink.flush()
    })?;
    for (k, e) in &swept.skipped {
        log::warn!("electrode {electrode}: no solution for k={k}: {e}");
    }

    Ok(ElectrodeOutcome::Sorted(ElectrodeSummary {
        electrode,
        cutoff: report.cutoff,
        n_spikes: n,
        n_dropped: detected.len() - n,
        explained_variance_ratio: pca.explained_variance_ratio.to_vec(),
        solved: swept.solved.iter().map(|&(k, _)| k).collect(),
        skipped: swept.skipped.iter().map(|(k, _)| *k).collect(),
        lowest_bic: swept.lowest_bic(),
    }))
}

/// Sort many electrodes on the rayon pool.
///
/// Each electrode gets its own sink from `make_sink`; nothing is shared
/// between runs. Results come back in input order, paired with the sink so
/// in-memory artifacts can be inspected.
///
/// `cfg` is validated once up front, so an invalid configuration returns
/// `Err` without creating a single sink.
pub fn sort_electrodes<T, S, F>(
    traces: &[(usize, T)],
    cfg: &SortConfig,
    make_sink: F,
) -> Result<Vec<(usize, Result<(ElectrodeOutcome, S)>)>>
where
    T: AsRef<[f32]> + Sync,
    S: ArtifactSink + Send,
    F: Fn(usize) -> Result<S> + Sync,
{
    cfg.validate()?;
    let results = traces
        .par_iter()
        .map(|(electrode, raw)| {
            let run = make_sink(*electrode).and_then(|mut sink| {
                let outcome = sort_electrode(*electrode, raw.as_ref(), cfg, &mut sink)?;
                Ok((outcome, sink))
            });
            if let Err(e) = &run {
                log::error!("electrode {electrode} failed: {e}");
            }
            (*electrode, run)
        })
        .collect();
    Ok(results)
}

fn persist_cutoff(sink: &mut dyn ArtifactSink, report: &CutoffReport) -> Result<()> {
    sink.put_f64(
        "cutoff/report",
        &[report.cutoff as f64, report.breach_rate, report.mean_breach_rate_per_sec],
        &[3],
    )?;
    sink.put_i64("cutoff/secs_above", &[report.secs_above_cutoff as i64], &[1])?;
    sink.put_f32("cutoff/bin_means", &report.bin_means, &[report.bin_means.len()])
}

fn persist_solution(sink: &mut dyn ArtifactSink, solution: &ClusterSolution) -> Result<()> {
    let k = solution.k;
    let model = &solution.model;
    let d = model.n_features();
    let flat = |a: ndarray::ArrayViewD<'_, f64>| a.iter().copied().collect::<Vec<_>>();

    sink.put_i32(&format!("clusters{k}/predictions"), &solution.labels, &[solution.labels.len()])?;
    sink.put_f64(&format!("clusters{k}/bic"), &[solution.bic], &[1])?;
    sink.put_f64(&format!("clusters{k}/means"), &flat(model.means.view().into_dyn()), &[k, d])?;
    sink.put_f64(
        &format!("clusters{k}/covariances"),
        &flat(model.covariances.view().into_dyn()),
        &[k, d, d],
    )?;
    sink.put_f64(&format!("clusters{k}/weights"), &model.weights.to_vec(), &[k])
}

//! Amplitude-based outlier rejection.
//!
//! Energy scaling removes magnitude from the waveform shape, so a large
//! noise transient can land in the same mixture component as real spikes.
//! Amplitude is brought back here: within each fitted cluster, a member whose
//! amplitude is at or below `mean − sd_cutoff · sd` (population statistics of
//! that cluster's own members) is relabelled `-1`.
//!
//! Statistics are always taken over the fit's `assignments`, never over the
//! already-relabelled `labels`, so clusters are processed independently and
//! a second pass reproduces the first exactly.
use ndarray::ArrayView1;

use crate::gmm::ClusterSolution;
use crate::normalize::mean_std;

/// Label given to rejected waveforms.
pub const NOISE_LABEL: i32 = -1;

/// Relabel amplitude outliers of every cluster as [`NOISE_LABEL`].
///
/// `amplitudes` must be row-aligned with `solution.assignments`. A cluster
/// whose amplitudes have zero spread has its floor at the mean, so every
/// member is rejected.
pub fn reject_amplitude_outliers(
    mut solution: ClusterSolution,
    amplitudes: ArrayView1<'_, f64>,
    sd_cutoff: f64,
) -> ClusterSolution {
    debug_assert_eq!(amplitudes.len(), solution.assignments.len());
    solution.labels = solution.assignments.clone();

    for cluster in 0..solution.k as i32 {
        let members: Vec<usize> = solution
            .assignments
            .iter()
            .enumerate()
            .filter(|&(_, &a)| a == cluster)
            .map(|(i, _)| i)
            .collect();
        if members.is_empty() {
            continue;
        }

        let (mean, sd) = mean_std(members.iter().map(|&i| amplitudes[i]));
        let floor = mean - sd_cutoff * sd;
        for &i in &members {
            if amplitudes[i] <= floor {
                solution.labels[i] = NOISE_LABEL;
            }
        }
    }

    log::info!(
        "k={}: rejected {} of {} waveforms as amplitude outliers",
        solution.k,
        solution.n_rejected(),
        solution.labels.len()
    );
    solution
}

mod common;
use common::blobs;
use ndarray::Array1;
use spikesort::{fit, reject_amplitude_outliers, ClusterSolution, FitParams, NOISE_LABEL};

fn solution() -> ClusterSolution {
    let centers = vec![vec![0.0, 0.0, 0.0], vec![6.0, 0.0, 0.0]];
    let (x, _) = blobs(41, &centers, 30, 0.3);
    fit(x.view(), 2, &FitParams::default()).unwrap()
}

/// Amplitudes around -60 µV with a little spread.
fn amplitudes(n: usize) -> Array1<f64> {
    Array1::from_shape_fn(n, |i| -60.0 + ((i * 37) % 11) as f64 - 5.0)
}

#[test]
fn oversized_spike_is_relabelled() {
    let sol = solution();
    let mut amps = amplitudes(60);
    amps[7] = -900.0;
    let out = reject_amplitude_outliers(sol, amps.view(), 3.0);
    assert_eq!(out.labels[7], NOISE_LABEL);
    assert_eq!(out.n_rejected(), 1);
    assert!(out.assignments[7] >= 0);
}

#[test]
fn parameters_are_untouched() {
    let sol = solution();
    let means = sol.model.means.clone();
    let bic = sol.bic;
    let mut amps = amplitudes(60);
    amps[40] = -900.0;
    let out = reject_amplitude_outliers(sol, amps.view(), 3.0);
    assert_eq!(out.model.means, means);
    assert_eq!(out.bic, bic);
}

#[test]
fn only_rejected_labels_change() {
    let sol = solution();
    let before = sol.labels.clone();
    let mut amps = amplitudes(60);
    amps[3] = -900.0;
    amps[50] = -900.0;
    let out = reject_amplitude_outliers(sol, amps.view(), 3.0);
    for (i, (&b, &a)) in before.iter().zip(&out.labels).enumerate() {
        if a != b {
            assert_eq!(a, NOISE_LABEL, "row {i} changed to {a}");
        }
    }
    assert_eq!(out.labels[3], NOISE_LABEL);
    assert_eq!(out.labels[50], NOISE_LABEL);
}

#[test]
fn rejection_is_idempotent() {
    let sol = solution();
    let mut amps = amplitudes(60);
    amps[10] = -400.0;
    amps[11] = -150.0;
    let once = reject_amplitude_outliers(sol, amps.view(), 2.0);
    let twice = reject_amplitude_outliers(once.clone(), amps.view(), 2.0);
    assert_eq!(once.labels, twice.labels);
}

#[test]
fn zero_cutoff_rejects_at_or_below_the_mean() {
    let sol = solution();
    let amps = Array1::from_shape_fn(60, |i| if i % 2 == 0 { -50.0 } else { -70.0 });
    let out = reject_amplitude_outliers(sol, amps.view(), 0.0);
    for i in 0..60 {
        assert_eq!(out.labels[i] == NOISE_LABEL, i % 2 == 1, "row {i}");
    }
}

#[test]
fn cluster_without_spread_is_rejected_whole() {
    let sol = solution();
    let amps = Array1::from_elem(60, -60.0);
    let out = reject_amplitude_outliers(sol, amps.view(), 3.0);
    assert!(out.labels.iter().all(|&l| l == NOISE_LABEL));
    assert_eq!(out.n_rejected(), 60);
}

mod common;
use common::{blobs, purity};
use spikesort::{fit, sweep, FitParams, SortError};

fn five_centers() -> Vec<Vec<f64>> {
    (0..5)
        .map(|c| (0..5).map(|j| if j == c { 3.0 } else { 0.0 }).collect())
        .collect()
}

#[test]
fn recovers_five_blobs() {
    let (x, truth) = blobs(31, &five_centers(), 20, 0.1);
    let sol = fit(x.view(), 5, &FitParams::default()).unwrap();

    assert_eq!(sol.labels.len(), 100);
    assert!(sol.labels.iter().all(|&l| (0..5).contains(&l)));
    let acc = purity(&sol.labels, &truth, 5, 5);
    assert!(acc >= 0.95, "purity {acc}");

    assert_eq!(sol.model.means.dim(), (5, 5));
    assert_eq!(sol.model.covariances.dim(), (5, 5, 5));
    approx::assert_abs_diff_eq!(sol.model.weights.sum(), 1.0, epsilon = 1e-9);
    assert!(sol.bic.is_finite());
}

#[test]
fn sweep_bic_is_lowest_at_the_true_count() {
    let centers = vec![vec![0.0, 0.0], vec![4.0, 0.0], vec![0.0, 4.0]];
    let (x, _) = blobs(32, &centers, 40, 0.3);
    let out = sweep(x.view(), 6, &FitParams::default(), |_| Ok(())).unwrap();

    assert!(out.skipped.is_empty());
    assert_eq!(out.solved.iter().map(|&(k, _)| k).collect::<Vec<_>>(), vec![2, 3, 4, 5, 6]);
    assert_eq!(out.lowest_bic(), Some(3));
}

#[test]
fn every_solution_labels_every_row() {
    let (x, _) = blobs(33, &five_centers(), 12, 0.2);
    let mut solutions = Vec::new();
    sweep(x.view(), 4, &FitParams::default(), |sol| {
        solutions.push(sol);
        Ok(())
    })
    .unwrap();
    assert!(!solutions.is_empty());
    for sol in &solutions {
        assert_eq!(sol.labels.len(), x.nrows());
        assert_eq!(sol.labels, sol.assignments);
        assert!(sol.labels.iter().all(|&l| l >= 0 && (l as usize) < sol.k));
    }
}

#[test]
fn distances_to_components() {
    let centers = vec![vec![0.0, 0.0], vec![5.0, 5.0]];
    let (x, _) = blobs(34, &centers, 25, 0.5);
    let sol = fit(x.view(), 2, &FitParams::default()).unwrap();
    let d = sol.model.mahalanobis_to_components(x.view());
    assert_eq!(d.dim(), (50, 2));
    for (i, &label) in sol.labels.iter().enumerate() {
        let own = d[[i, label as usize]];
        let other = d[[i, 1 - label as usize]];
        assert!(own < other, "row {i}: own {own} vs other {other}");
    }
}

#[test]
fn fewer_rows_than_components() {
    let (x, _) = blobs(35, &five_centers(), 1, 0.1);
    let err = fit(x.view(), 6, &FitParams::default()).unwrap_err();
    assert!(matches!(err, SortError::TooFewSamples { n_samples: 5, k: 6 }));
}

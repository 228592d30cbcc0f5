//! Per-waveform features and the clustering feature matrix.
//!
//! ```text
//! waveforms [N, L] f32
//!   ├─ scale_waveforms()        energy = ‖w‖₂ / L,  scaled = w / energy
//!   ├─ amplitudes()             most negative sample
//!   └─ reduce_dimensionality()  PCA of the scaled set
//!        │
//!        └─ assemble_feature_matrix()
//!             [energy/max|energy|, |amp|/max|amp|, pc_0 … pc_{n_pc-1}]   [N, 2 + n_pc]
//! ```
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{s, Array1, Array2, Axis};

use crate::error::{Result, SortError};
use crate::normalize::max_abs_normalize;

/// Divide each waveform by its energy `sqrt(Σ w²) / L`.
///
/// Returns `(scaled [N, L], energy [N])`. A waveform with zero energy is
/// left as zeros rather than divided by zero.
pub fn scale_waveforms(waveforms: &Array2<f32>) -> (Array2<f64>, Array1<f64>) {
    let len = waveforms.ncols().max(1) as f64;
    let energy: Array1<f64> = waveforms.map_axis(Axis(1), |row| {
        row.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>().sqrt() / len
    });

    let mut scaled = waveforms.mapv(|v| v as f64);
    for (mut row, &e) in scaled.rows_mut().into_iter().zip(energy.iter()) {
        if e > 0.0 {
            row.mapv_inplace(|v| v / e);
        } else {
            row.fill(0.0);
        }
    }
    (scaled, energy)
}

/// Per-waveform amplitude: the most negative sample.
pub fn amplitudes(waveforms: &Array2<f32>) -> Array1<f64> {
    waveforms.map_axis(Axis(1), |row| row.iter().fold(f64::INFINITY, |m, &v| m.min(v as f64)))
}

/// Principal-component decomposition of a waveform set.
#[derive(Debug, Clone)]
pub struct Pca {
    /// Coordinates of every waveform, `[N, n_components]`.
    pub projections: Array2<f64>,
    /// Fraction of total variance carried by each retained component.
    pub explained_variance_ratio: Array1<f64>,
    /// Unit-norm component axes, `[n_components, L]`.
    pub components: Array2<f64>,
    /// Column means removed before projecting, `[L]`.
    pub mean: Array1<f64>,
}

/// Fit PCA on `scaled` (`[N, L]`) and keep the top `n_components` axes.
///
/// `n_components` is clamped to `L`. Each axis is oriented so that the
/// projection with the largest magnitude is positive, which makes the
/// result deterministic.
pub fn reduce_dimensionality(scaled: &Array2<f64>, n_components: usize) -> Pca {
    let (n, l) = scaled.dim();
    let keep = n_components.min(l);

    let mean = scaled.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(l));
    let centered = scaled - &mean;
    let dof = n.saturating_sub(1).max(1) as f64;
    let cov = centered.t().dot(&centered) / dof;

    let eig = SymmetricEigen::new(DMatrix::from_fn(l, l, |i, j| cov[[i, j]]));
    let mut order: Vec<usize> = (0..l).collect();
    order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));

    let total: f64 = eig.eigenvalues.iter().map(|v| v.max(0.0)).sum();
    let mut components = Array2::<f64>::zeros((keep, l));
    let mut ratio = Array1::<f64>::zeros(keep);
    for (c, &k) in order.iter().take(keep).enumerate() {
        for i in 0..l {
            components[[c, i]] = eig.eigenvectors[(i, k)];
        }
        ratio[c] = if total > 0.0 { eig.eigenvalues[k].max(0.0) / total } else { 0.0 };
    }

    let mut projections = centered.dot(&components.t());
    for c in 0..keep {
        let col = projections.column(c);
        let dominant = col.iter().fold(0.0_f64, |m, &v| if v.abs() > m.abs() { v } else { m });
        if dominant < 0.0 {
            projections.column_mut(c).mapv_inplace(|v| -v);
            components.row_mut(c).mapv_inplace(|v| -v);
        }
    }

    Pca { projections, explained_variance_ratio: ratio, components, mean }
}

/// Build the `[N, 2 + n_pc]` clustering input.
///
/// Column 0 is energy and column 1 absolute amplitude, each divided by its
/// maximum absolute value over this electrode; the remaining columns are the
/// first `n_pc` principal-component coordinates.
pub fn assemble_feature_matrix(
    energy: &Array1<f64>,
    amplitudes: &Array1<f64>,
    projections: &Array2<f64>,
    n_pc: usize,
) -> Result<Array2<f64>> {
    let n = energy.len();
    if amplitudes.len() != n || projections.nrows() != n {
        return Err(SortError::InvalidConfig(format!(
            "feature rows disagree: energy={n}, amplitude={}, projections={}",
            amplitudes.len(),
            projections.nrows()
        )));
    }
    if projections.ncols() < n_pc {
        return Err(SortError::InvalidConfig(format!(
            "n_pc={n_pc} exceeds the {} available components",
            projections.ncols()
        )));
    }

    let abs_amp = amplitudes.mapv(f64::abs);
    let mut data = Array2::<f64>::zeros((n, 2 + n_pc));
    data.column_mut(0).assign(&max_abs_normalize(energy.view()));
    data.column_mut(1).assign(&max_abs_normalize(abs_amp.view()));
    data.slice_mut(s![.., 2..]).assign(&projections.slice(s![.., ..n_pc]));
    Ok(data)
}

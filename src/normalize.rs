//! Summary statistics and column normalisation.
//!
//! `mean_std`:            population statistics (ddof = 0), accumulated in f64.
//! `max_abs_normalize`:   x / max(|x|), so the column lies in [-1, 1].
use ndarray::{Array1, ArrayView1};

/// Mean and population standard deviation (ddof = 0).
/// Returns `(0, 0)` for an empty input.
pub fn mean_std<I>(values: I) -> (f64, f64)
where
    I: IntoIterator<Item = f64>,
    I::IntoIter: Clone,
{
    let it = values.into_iter();
    let (n, sum) = it.clone().fold((0usize, 0.0), |(n, s), v| (n + 1, s + v));
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / n as f64;
    let var = it.map(|v| (v - mean) * (v - mean)).sum::<f64>() / n as f64;
    (mean, var.sqrt())
}

/// Divide by the largest absolute value. An all-zero column stays zero.
pub fn max_abs_normalize(col: ArrayView1<'_, f64>) -> Array1<f64> {
    let peak = col.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    if peak > 0.0 {
        col.mapv(|v| v / peak)
    } else {
        Array1::zeros(col.len())
    }
}

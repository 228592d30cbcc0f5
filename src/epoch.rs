//! Fixed-length epoching of a single trace.
//!
//! Splits a continuous trace into non-overlapping windows of `epoch_samples`
//! samples, dropping any trailing incomplete window. The cutoff detector
//! works on 1-second epochs.
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};

/// Number of complete epochs in a trace of `n_samples`.
pub fn n_epochs(n_samples: usize, epoch_samples: usize) -> usize {
    if epoch_samples == 0 {
        0
    } else {
        n_samples / epoch_samples
    }
}

/// View `trace` as `[E, epoch_samples]` without copying.
/// Trailing samples that don't fill a complete epoch are left out.
pub fn epoch_view(trace: &[f32], epoch_samples: usize) -> ArrayView2<'_, f32> {
    let n_e = n_epochs(trace.len(), epoch_samples);
    let used = &trace[..n_e * epoch_samples];
    ArrayView1::from(used)
        .into_shape_with_order((n_e, epoch_samples))
        .expect("contiguous slice of n_e * epoch_samples elements")
}

/// Count samples with `|v| > level` in each epoch.
pub fn breach_counts(epochs: &ArrayView2<'_, f32>, level: f32) -> Array1<usize> {
    epochs.map_axis(Axis(1), |row| row.iter().filter(|v| v.abs() > level).count())
}

/// Mean voltage of each epoch (diagnostic trace for the cutoff plot).
pub fn epoch_means(epochs: &ArrayView2<'_, f32>) -> Array1<f32> {
    if epochs.ncols() == 0 {
        return Array1::zeros(epochs.nrows());
    }
    epochs.map_axis(Axis(1), |row| {
        (row.iter().map(|&v| v as f64).sum::<f64>() / row.len() as f64) as f32
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_count_and_shape() {
        let trace = vec![1.0_f32; 3840];
        let epochs = epoch_view(&trace, 1280);
        assert_eq!(epochs.dim(), (3, 1280));
    }

    #[test]
    fn trailing_samples_dropped() {
        let trace = vec![0.5_f32; 1300];
        assert_eq!(epoch_view(&trace, 1280).nrows(), 1);
        assert_eq!(epoch_view(&trace[..1000], 1280).nrows(), 0);
    }

    #[test]
    fn zero_width_epochs_are_empty() {
        assert_eq!(n_epochs(100, 0), 0);
        assert_eq!(epoch_view(&[1.0, 2.0], 0).nrows(), 0);
    }

    #[test]
    fn breaches_counted_in_absolute_value() {
        let trace = [0.0_f32, 5.0, -5.0, 1.0, 0.0, 0.0, 9.0, 0.0];
        let epochs = epoch_view(&trace, 4);
        assert_eq!(breach_counts(&epochs, 2.0).to_vec(), vec![2, 1]);
    }

    #[test]
    fn means_per_epoch() {
        let trace = [1.0_f32, 3.0, -2.0, -4.0];
        let epochs = epoch_view(&trace, 2);
        assert_eq!(epoch_means(&epochs).to_vec(), vec![2.0, -3.0]);
    }
}

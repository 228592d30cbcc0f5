//! Full-covariance Gaussian mixture model and the cluster-count sweep.
//!
//! Each fit mirrors `sklearn.mixture.GaussianMixture(covariance_type='full',
//! init_params='kmeans')`:
//!   1. k-means (k-means++ seeding) gives hard initial responsibilities.
//!   2. EM alternates E/M steps until the mean log-likelihood changes by less
//!      than `convergence_threshold`, or `max_iterations` is reached.
//!   3. `reg_covar` is added to every covariance diagonal.
//!
//! Restart `r` is seeded with `r`, so a sweep is fully deterministic.
//! Among converged restarts the lowest BIC (equivalently, for a fixed `k`,
//! the highest likelihood) wins.
use nalgebra::{Cholesky, DMatrix};
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::config::SortConfig;
use crate::error::{Result, SortError};

const LN_2PI: f64 = 1.837_877_066_409_345_5;
const KMEANS_MAX_ITER: usize = 300;

/// EM controls shared by every cluster count in a sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitParams {
    pub max_iterations: usize,
    pub restarts: usize,
    pub convergence_threshold: f64,
    /// Added to covariance diagonals to keep them positive definite.
    pub reg_covar: f64,
}

impl Default for FitParams {
    fn default() -> Self {
        Self::from(&SortConfig::default())
    }
}

impl From<&SortConfig> for FitParams {
    fn from(cfg: &SortConfig) -> Self {
        Self {
            max_iterations: cfg.max_iterations,
            restarts: cfg.restarts,
            convergence_threshold: cfg.convergence_threshold,
            reg_covar: 1e-6,
        }
    }
}

/// Fitted mixture parameters. Read-only once fitted.
#[derive(Debug, Clone)]
pub struct GaussianMixture {
    /// Mixing weights, `[k]`, summing to 1.
    pub weights: Array1<f64>,
    /// Component means, `[k, d]`.
    pub means: Array2<f64>,
    /// Component covariances, `[k, d, d]`.
    pub covariances: Array3<f64>,
    /// EM iterations used.
    pub n_iter: usize,
    /// Mean log-likelihood at convergence.
    pub lower_bound: f64,
    /// Upper-triangular `L⁻ᵀ` for each `Σ = L·Lᵀ`.
    precision_chol: Vec<Array2<f64>>,
    /// `log det L⁻ᵀ` per component.
    log_det_prec: Array1<f64>,
}

/// What one EM restart produced.
#[derive(Debug, Clone)]
pub enum Restart {
    Converged(GaussianMixture),
    NotConverged { n_iter: usize, lower_bound: f64 },
    /// A covariance lost positive definiteness.
    IllConditioned,
}

/// The fitted model for one cluster count plus per-row labels.
///
/// `assignments` is the hard assignment straight out of the fit and never
/// changes. `labels` starts as a copy; the outlier pass turns some entries
/// into `-1`.
#[derive(Debug, Clone)]
pub struct ClusterSolution {
    pub k: usize,
    pub model: GaussianMixture,
    pub assignments: Vec<i32>,
    pub labels: Vec<i32>,
    /// Bayesian information criterion, lower is better.
    pub bic: f64,
}

impl ClusterSolution {
    pub fn n_rejected(&self) -> usize {
        self.labels.iter().filter(|&&l| l < 0).count()
    }
}

impl GaussianMixture {
    pub fn n_components(&self) -> usize {
        self.weights.len()
    }

    pub fn n_features(&self) -> usize {
        self.means.ncols()
    }

    /// Free parameters: covariances + means + weights.
    pub fn n_parameters(&self) -> usize {
        let (k, d) = (self.n_components(), self.n_features());
        k * d * (d + 1) / 2 + k * d + k - 1
    }

    /// `log w_c + log N(x | μ_c, Σ_c)` for every row and component, `[n, k]`.
    pub fn weighted_log_prob(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        let n = x.nrows();
        let d = self.n_features() as f64;
        let mut out = Array2::<f64>::zeros((n, self.n_components()));
        for c in 0..self.n_components() {
            let maha = self.squared_mahalanobis(x, c);
            let base = self.log_det_prec[c] + self.weights[c].ln() - 0.5 * d * LN_2PI;
            out.column_mut(c).assign(&maha.mapv(|m| base - 0.5 * m));
        }
        out
    }

    fn squared_mahalanobis(&self, x: ArrayView2<'_, f64>, c: usize) -> Array1<f64> {
        let diff = &x - &self.means.row(c);
        let y = diff.dot(&self.precision_chol[c]);
        y.map_axis(Axis(1), |r| r.dot(&r))
    }

    /// Hard assignment: most probable component per row.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Vec<i32> {
        self.weighted_log_prob(x)
            .rows()
            .into_iter()
            .map(|r| argmax(r) as i32)
            .collect()
    }

    /// Mean per-row log-likelihood.
    pub fn score(&self, x: ArrayView2<'_, f64>) -> f64 {
        let wlp = self.weighted_log_prob(x);
        let n = wlp.nrows().max(1) as f64;
        wlp.rows().into_iter().map(log_sum_exp).sum::<f64>() / n
    }

    /// `-2 · n · score + n_parameters · ln n`.
    pub fn bic(&self, x: ArrayView2<'_, f64>) -> f64 {
        let n = x.nrows() as f64;
        -2.0 * self.score(x) * n + self.n_parameters() as f64 * n.ln()
    }

    /// Mahalanobis distance of every row to every component mean, `[n, k]`.
    pub fn mahalanobis_to_components(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut out = Array2::<f64>::zeros((x.nrows(), self.n_components()));
        for c in 0..self.n_components() {
            out.column_mut(c).assign(&self.squared_mahalanobis(x, c).mapv(f64::sqrt));
        }
        out
    }

    fn from_parameters(
        weights: Array1<f64>,
        means: Array2<f64>,
        covariances: Array3<f64>,
    ) -> Option<Self> {
        let k = weights.len();
        let mut precision_chol = Vec::with_capacity(k);
        let mut log_det_prec = Array1::<f64>::zeros(k);
        for c in 0..k {
            let (p, ld) = precision_cholesky(covariances.index_axis(Axis(0), c))?;
            precision_chol.push(p);
            log_det_prec[c] = ld;
        }
        Some(Self {
            weights,
            means,
            covariances,
            n_iter: 0,
            lower_bound: f64::NEG_INFINITY,
            precision_chol,
            log_det_prec,
        })
    }
}

/// `L⁻ᵀ` and `log det L⁻ᵀ` for `cov = L·Lᵀ`, or `None` if `cov` is not
/// positive definite.
fn precision_cholesky(cov: ArrayView2<'_, f64>) -> Option<(Array2<f64>, f64)> {
    let d = cov.nrows();
    let m = DMatrix::from_fn(d, d, |i, j| cov[[i, j]]);
    let l = Cholesky::new(m)?.l();
    let l_inv = l.solve_lower_triangular(&DMatrix::identity(d, d))?;
    let log_det = -(0..d).map(|i| l[(i, i)].ln()).sum::<f64>();
    if !log_det.is_finite() {
        return None;
    }
    let p = Array2::from_shape_fn((d, d), |(i, j)| l_inv[(j, i)]);
    Some((p, log_det))
}

/// Covariance-weighted distance from `point` to `mean`.
///
/// Returns `None` when `covariance` is not positive definite.
pub fn mahalanobis(
    point: ArrayView1<'_, f64>,
    mean: ArrayView1<'_, f64>,
    covariance: ArrayView2<'_, f64>,
) -> Option<f64> {
    let (p, _) = precision_cholesky(covariance)?;
    let diff = &point - &mean;
    let y = diff.dot(&p);
    Some(y.dot(&y).sqrt())
}

/// M-step from responsibilities `[n, k]`.
fn maximize(x: ArrayView2<'_, f64>, resp: &Array2<f64>, reg_covar: f64) -> Option<GaussianMixture> {
    let (n, d) = x.dim();
    let k = resp.ncols();
    let nk = resp.sum_axis(Axis(0)) + 10.0 * f64::EPSILON;

    let mut means = resp.t().dot(&x);
    for (mut row, &w) in means.rows_mut().into_iter().zip(nk.iter()) {
        row /= w;
    }

    let mut covariances = Array3::<f64>::zeros((k, d, d));
    for c in 0..k {
        let diff = &x - &means.row(c);
        let weighted = &diff * &resp.column(c).insert_axis(Axis(1));
        let mut cov = weighted.t().dot(&diff) / nk[c];
        for i in 0..d {
            cov[[i, i]] += reg_covar;
        }
        covariances.index_axis_mut(Axis(0), c).assign(&cov);
    }

    let total = nk.sum();
    let weights = if n > 0 { nk / total } else { Array1::from_elem(k, 1.0 / k as f64) };
    GaussianMixture::from_parameters(weights, means, covariances)
}

/// E-step: mean log-likelihood and responsibilities.
fn expect(model: &GaussianMixture, x: ArrayView2<'_, f64>) -> (f64, Array2<f64>) {
    let mut wlp = model.weighted_log_prob(x);
    let mut total = 0.0;
    for mut row in wlp.rows_mut() {
        let norm = log_sum_exp(row.view());
        total += norm;
        row.mapv_inplace(|v| (v - norm).exp());
    }
    (total / x.nrows().max(1) as f64, wlp)
}

/// Run one seeded EM restart.
pub fn fit_restart(x: ArrayView2<'_, f64>, k: usize, params: &FitParams, seed: u64) -> Restart {
    let mut rng = StdRng::seed_from_u64(seed);
    let labels = kmeans(x, k, &mut rng);
    let mut resp = Array2::<f64>::zeros((x.nrows(), k));
    for (i, &l) in labels.iter().enumerate() {
        resp[[i, l]] = 1.0;
    }

    let Some(mut model) = maximize(x, &resp, params.reg_covar) else {
        return Restart::IllConditioned;
    };

    let mut lower_bound = f64::NEG_INFINITY;
    for n_iter in 1..=params.max_iterations {
        let prev = lower_bound;
        let (ll, resp) = expect(&model, x);
        model = match maximize(x, &resp, params.reg_covar) {
            Some(m) => m,
            None => return Restart::IllConditioned,
        };
        lower_bound = ll;
        if !lower_bound.is_finite() {
            return Restart::IllConditioned;
        }
        if (lower_bound - prev).abs() < params.convergence_threshold {
            model.n_iter = n_iter;
            model.lower_bound = lower_bound;
            return Restart::Converged(model);
        }
    }
    Restart::NotConverged { n_iter: params.max_iterations, lower_bound }
}

/// Fit a `k`-component mixture with `params.restarts` seeded restarts.
///
/// # Errors
///
/// * [`SortError::TooFewSamples`] when there are fewer rows than components.
/// * [`SortError::NonConvergentFit`] when no restart converged.
pub fn fit(x: ArrayView2<'_, f64>, k: usize, params: &FitParams) -> Result<ClusterSolution> {
    let n = x.nrows();
    if k == 0 || n < k {
        return Err(SortError::TooFewSamples { n_samples: n, k });
    }

    let mut best: Option<(f64, GaussianMixture)> = None;
    for r in 0..params.restarts {
        match fit_restart(x, k, params, r as u64) {
            Restart::Converged(model) => {
                let bic = model.bic(x);
                log::debug!("k={k} restart {r}: converged in {} iterations, BIC {bic:.2}", model.n_iter);
                if best.as_ref().map_or(true, |(b, _)| bic < *b) {
                    best = Some((bic, model));
                }
            }
            Restart::NotConverged { n_iter, lower_bound } => {
                log::debug!("k={k} restart {r}: not converged after {n_iter} iterations (ll {lower_bound:.4})");
            }
            Restart::IllConditioned => {
                log::debug!("k={k} restart {r}: covariance became singular");
            }
        }
    }

    let (bic, model) = best.ok_or(SortError::NonConvergentFit { k, restarts: params.restarts })?;
    let assignments = model.predict(x);
    let labels = assignments.clone();
    Ok(ClusterSolution { k, model, assignments, labels, bic })
}

/// Outcome of fitting every `k` in `2..=max_clusters`.
#[derive(Debug, Default)]
pub struct Sweep {
    /// `(k, bic)` of every solved cluster count, ascending in `k`.
    pub solved: Vec<(usize, f64)>,
    /// Cluster counts that produced no solution, with the reason.
    pub skipped: Vec<(usize, SortError)>,
}

impl Sweep {
    /// Solved `k` with the lowest BIC.
    pub fn lowest_bic(&self) -> Option<usize> {
        self.solved.iter().min_by(|a, b| a.1.total_cmp(&b.1)).map(|&(k, _)| k)
    }
}

/// Fit every `k` in `2..=max_clusters` and hand each solution to
/// `on_solved` before the next fit starts.
///
/// A `k` that fails with a local error ([`SortError::is_local_to_k`]) is
/// recorded and the sweep moves on. Any other fit error, or an error from
/// `on_solved`, stops the sweep; solutions already handed over stay with the
/// caller.
pub fn sweep<F>(x: ArrayView2<'_, f64>, max_clusters: usize, params: &FitParams, mut on_solved: F) -> Result<Sweep>
where
    F: FnMut(ClusterSolution) -> Result<()>,
{
    let mut out = Sweep::default();
    for k in 2..=max_clusters {
        match fit(x, k, params) {
            Ok(sol) => {
                let bic = sol.bic;
                on_solved(sol)?;
                out.solved.push((k, bic));
            }
            Err(e) if e.is_local_to_k() => {
                log::warn!("skipping k={k}: {e}");
                out.skipped.push((k, e));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}

// ── k-means initialisation ────────────────────────────────────────────────

/// Lloyd's k-means with k-means++ seeding; returns a label per row.
pub fn kmeans(x: ArrayView2<'_, f64>, k: usize, rng: &mut StdRng) -> Vec<usize> {
    let n = x.nrows();
    let mut centers = kmeans_plus_plus(x, k, rng);
    let mut labels = vec![usize::MAX; n];

    for _ in 0..KMEANS_MAX_ITER {
        let mut changed = false;
        for (i, row) in x.rows().into_iter().enumerate() {
            let nearest = (0..k)
                .map(|c| (c, sq_dist(row, centers.row(c))))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(c, _)| c)
                .unwrap_or(0);
            if labels[i] != nearest {
                labels[i] = nearest;
                changed = true;
            }
        }
        if !changed {
            break;
        }
        for c in 0..k {
            let members: Vec<usize> = (0..n).filter(|&i| labels[i] == c).collect();
            if members.is_empty() {
                continue;
            }
            let mean = x.select(Axis(0), &members).mean_axis(Axis(0));
            if let Some(mean) = mean {
                centers.row_mut(c).assign(&mean);
            }
        }
    }
    labels
}

fn kmeans_plus_plus(x: ArrayView2<'_, f64>, k: usize, rng: &mut StdRng) -> Array2<f64> {
    let n = x.nrows();
    let mut centers = Array2::<f64>::zeros((k, x.ncols()));
    let first = rng.gen_range(0..n);
    centers.row_mut(0).assign(&x.row(first));

    let mut d2: Vec<f64> = x.rows().into_iter().map(|r| sq_dist(r, x.row(first))).collect();
    for c in 1..k {
        let total: f64 = d2.iter().sum();
        let pick = if total > 0.0 {
            let target = rng.gen::<f64>() * total;
            let mut acc = 0.0;
            d2.iter()
                .position(|&v| {
                    acc += v;
                    acc > target
                })
                .unwrap_or(n - 1)
        } else {
            rng.gen_range(0..n)
        };
        centers.row_mut(c).assign(&x.row(pick));
        for (i, r) in x.rows().into_iter().enumerate() {
            d2[i] = d2[i].min(sq_dist(r, x.row(pick)));
        }
    }
    centers
}

fn sq_dist(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn log_sum_exp(row: ArrayView1<'_, f64>) -> f64 {
    let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + row.iter().map(|&v| (v - max).exp()).sum::<f64>().ln()
}

fn argmax(row: ArrayView1<'_, f64>) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(bi, bv), (i, &v)| if v > bv { (i, v) } else { (bi, bv) })
        .0
}

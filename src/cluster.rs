//! Clustering oracle used by structure learning.
//!
//! [`Clusterer`] is the seam: given a matrix it returns one label per row.
//! [`GaussianMixture`] is the stock implementation. It fits a Gaussian
//! mixture by EM for every candidate number of components and every
//! covariance family, and keeps the fit with the lowest Bayesian information
//! criterion:
//!
//! ```text
//! BIC = -2 ln L + p ln n
//! ```
//!
//! where `p` is the number of free parameters of the fit and `n` the number
//! of observations.
//!
//! # Covariance families
//!
//! | Family | Per component | Free covariance parameters |
//! |--------|---------------|----------------------------|
//! | [`Spherical`][CovarianceType::Spherical] | `σ²·I` | `k` |
//! | [`Diagonal`][CovarianceType::Diagonal] | `diag(σ²)` | `k·d` |
//! | [`Tied`][CovarianceType::Tied] | one shared `Σ` | `d(d+1)/2` |
//! | [`Full`][CovarianceType::Full] | own `Σ` | `k·d(d+1)/2` |

use std::f64::consts::PI;

use log::{debug, trace};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Partitions observations into clusters.
pub trait Clusterer {
    /// Returns one label per row of `data`. Labels are contiguous, starting
    /// at 0. The number of clusters is chosen by the implementation but is at
    /// least `min_components` whenever there are that many rows.
    fn cluster(&mut self, data: &[Vec<f64>], min_components: usize) -> Vec<usize>;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum CovarianceType {
    Spherical,
    Diagonal,
    Tied,
    Full,
}

impl CovarianceType {
    pub const ALL: [CovarianceType; 4] = [
        CovarianceType::Spherical,
        CovarianceType::Diagonal,
        CovarianceType::Tied,
        CovarianceType::Full,
    ];

    /// Number of free parameters of a `k`-component mixture in `d` dimensions.
    pub fn n_parameters(self, k: usize, d: usize) -> usize {
        let covariance = match self {
            CovarianceType::Spherical => k,
            CovarianceType::Diagonal => k * d,
            CovarianceType::Tied => d * (d + 1) / 2,
            CovarianceType::Full => k * d * (d + 1) / 2,
        };
        covariance + k * d + (k - 1)
    }
}

#[derive(Debug, Clone)]
enum Covariance {
    /// Variance per component.
    Spherical(Vec<f64>),
    /// Variances per component and dimension.
    Diagonal(Vec<Vec<f64>>),
    /// Lower Cholesky factor shared by all components.
    Tied(Vec<Vec<f64>>),
    /// Lower Cholesky factor per component.
    Full(Vec<Vec<Vec<f64>>>),
}

/// A fitted mixture.
#[derive(Debug, Clone)]
pub struct FittedMixture {
    pub covariance_type: CovarianceType,
    pub weights: Vec<f64>,
    pub means: Vec<Vec<f64>>,
    covariance: Covariance,
    pub log_likelihood: f64,
    pub bic: f64,
}

impl FittedMixture {
    pub fn n_components(&self) -> usize {
        self.weights.len()
    }

    fn log_gaussian(&self, j: usize, x: &[f64]) -> f64 {
        let mean = &self.means[j];
        let d = x.len() as f64;
        match &self.covariance {
            Covariance::Spherical(vars) => {
                let v = vars[j];
                let sq: f64 = x.iter().zip(mean).map(|(a, m)| (a - m) * (a - m)).sum();
                -0.5 * (d * (2.0 * PI * v).ln() + sq / v)
            }
            Covariance::Diagonal(vars) => x
                .iter()
                .zip(mean)
                .zip(&vars[j])
                .map(|((a, m), v)| -0.5 * ((2.0 * PI * v).ln() + (a - m) * (a - m) / v))
                .sum(),
            Covariance::Tied(l) => log_gaussian_cholesky(x, mean, l),
            Covariance::Full(ls) => log_gaussian_cholesky(x, mean, &ls[j]),
        }
    }

    /// `ln w_j + ln N(x | μ_j, Σ_j)` for every component.
    fn weighted_log_prob(&self, x: &[f64]) -> Vec<f64> {
        (0..self.n_components())
            .map(|j| self.weights[j].ln() + self.log_gaussian(j, x))
            .collect()
    }

    /// Total log-likelihood and responsibilities.
    fn e_step(&self, data: &[Vec<f64>]) -> (f64, Vec<Vec<f64>>) {
        let mut total = 0.0;
        let resp = data
            .iter()
            .map(|x| {
                let lp = self.weighted_log_prob(x);
                let norm = log_sum_exp(&lp);
                total += norm;
                lp.iter().map(|p| (p - norm).exp()).collect()
            })
            .collect();
        (total, resp)
    }

    /// Most likely component of each row (first one on ties).
    pub fn predict(&self, data: &[Vec<f64>]) -> Vec<usize> {
        data.iter()
            .map(|x| {
                let lp = self.weighted_log_prob(x);
                let mut best = 0;
                for (j, &p) in lp.iter().enumerate().skip(1) {
                    if p > lp[best] {
                        best = j;
                    }
                }
                best
            })
            .collect()
    }
}

fn log_gaussian_cholesky(x: &[f64], mean: &[f64], l: &[Vec<f64>]) -> f64 {
    let d = x.len();
    // Forward substitution: L z = x - μ.
    let mut z = vec![0.0; d];
    for i in 0..d {
        let mut s = x[i] - mean[i];
        for k in 0..i {
            s -= l[i][k] * z[k];
        }
        z[i] = s / l[i][i];
    }
    let mahalanobis: f64 = z.iter().map(|v| v * v).sum();
    let log_det: f64 = (0..d).map(|i| l[i][i].ln()).sum();
    -0.5 * (d as f64 * (2.0 * PI).ln() + mahalanobis) - log_det
}

fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Lower Cholesky factor of a symmetric positive definite matrix.
fn cholesky(a: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let n = a.len();
    let mut l = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let s: f64 = (0..j).map(|k| l[i][k] * l[j][k]).sum();
            if i == j {
                let diag = a[i][i] - s;
                if diag <= 0.0 || !diag.is_finite() {
                    return None;
                }
                l[i][j] = diag.sqrt();
            } else {
                l[i][j] = (a[i][j] - s) / l[j][j];
            }
        }
    }
    Some(l)
}

/// Gaussian mixture clustering with BIC model selection.
#[derive(Debug, Clone)]
pub struct GaussianMixture {
    /// Upper bound on the number of components tried.
    pub max_components: usize,
    pub covariance_types: Vec<CovarianceType>,
    pub max_iter: usize,
    /// Convergence threshold on the per-row change of log-likelihood.
    pub tol: f64,
    /// Added to covariance diagonals to keep them positive definite.
    pub reg_covar: f64,
    rng: ChaCha8Rng,
}

impl GaussianMixture {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            max_components: 10,
            covariance_types: CovarianceType::ALL.to_vec(),
            max_iter: 100,
            tol: 1e-3,
            reg_covar: 1e-6,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Default for GaussianMixture {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl GaussianMixture {
    /// Fits every candidate `(k, covariance type)` and returns the fit with
    /// the lowest BIC (the first one on ties), or `None` if nothing could be
    /// fitted.
    ///
    /// Candidates are `k` in `min_components..=min(max_components, n)`; when
    /// there are fewer rows than `min_components`, only `k = n` is tried.
    pub fn select(&mut self, data: &[Vec<f64>], min_components: usize) -> Option<FittedMixture> {
        let n = data.len();
        if n == 0 || data[0].is_empty() {
            return None;
        }
        let hi = self.max_components.min(n).max(1);
        let lo = min_components.max(1).min(hi);

        let mut best: Option<FittedMixture> = None;
        for k in lo..=hi {
            for covariance_type in self.covariance_types.clone() {
                let Some(fit) = self.fit(data, k, covariance_type) else {
                    trace!("gmm: k = {}, {:?} failed", k, covariance_type);
                    continue;
                };
                trace!("gmm: k = {}, {:?}, bic = {}", k, covariance_type, fit.bic);
                if best.as_ref().map_or(true, |b| fit.bic < b.bic) {
                    best = Some(fit);
                }
            }
        }
        if let Some(b) = &best {
            debug!(
                "gmm: selected k = {} ({:?}) for {} rows, bic = {:.3}",
                b.n_components(),
                b.covariance_type,
                n,
                b.bic
            );
        }
        best
    }

    /// Fits one mixture by EM.
    pub fn fit(&mut self, data: &[Vec<f64>], k: usize, covariance_type: CovarianceType) -> Option<FittedMixture> {
        let n = data.len();
        if k == 0 || k > n {
            return None;
        }
        let d = data[0].len();

        // Farthest-first centres from a random start, every row then
        // hard-assigned to its nearest centre.
        let dist = |a: &[f64], b: &[f64]| -> f64 { a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum() };
        let mut centres = vec![self.rng.gen_range(0..n)];
        let mut nearest: Vec<f64> = data.iter().map(|x| dist(x, &data[centres[0]])).collect();
        while centres.len() < k {
            let mut next = 0;
            for i in 1..n {
                if nearest[i] > nearest[next] {
                    next = i;
                }
            }
            centres.push(next);
            for (near, x) in nearest.iter_mut().zip(data) {
                *near = near.min(dist(x, &data[next]));
            }
        }
        let resp: Vec<Vec<f64>> = data
            .iter()
            .map(|x| {
                let mut best = 0;
                let mut best_dist = f64::INFINITY;
                for (j, &c) in centres.iter().enumerate() {
                    let to_centre = dist(x, &data[c]);
                    if to_centre < best_dist {
                        best = j;
                        best_dist = to_centre;
                    }
                }
                let mut r = vec![0.0; k];
                r[best] = 1.0;
                r
            })
            .collect();

        let mut model = self.m_step(data, &resp, covariance_type)?;
        let mut previous = f64::NEG_INFINITY;
        for _ in 0..self.max_iter {
            let (log_likelihood, resp) = model.e_step(data);
            if !log_likelihood.is_finite() {
                return None;
            }
            if (log_likelihood - previous).abs() < self.tol * n as f64 {
                break;
            }
            previous = log_likelihood;
            model = self.m_step(data, &resp, covariance_type)?;
        }

        let (log_likelihood, _) = model.e_step(data);
        if !log_likelihood.is_finite() {
            return None;
        }
        let p = covariance_type.n_parameters(k, d) as f64;
        model.log_likelihood = log_likelihood;
        model.bic = -2.0 * log_likelihood + p * (n as f64).ln();
        Some(model)
    }

    fn m_step(&self, data: &[Vec<f64>], resp: &[Vec<f64>], covariance_type: CovarianceType) -> Option<FittedMixture> {
        let n = data.len();
        let d = data[0].len();
        let k = resp[0].len();

        let nk: Vec<f64> = (0..k)
            .map(|j| resp.iter().map(|r| r[j]).sum::<f64>() + 10.0 * f64::EPSILON)
            .collect();
        let weights: Vec<f64> = nk.iter().map(|&c| c / n as f64).collect();
        let means: Vec<Vec<f64>> = (0..k)
            .map(|j| {
                (0..d)
                    .map(|t| data.iter().zip(resp).map(|(x, r)| r[j] * x[t]).sum::<f64>() / nk[j])
                    .collect()
            })
            .collect();

        let scatter = |j: usize| -> Vec<Vec<f64>> {
            let mut s = vec![vec![0.0; d]; d];
            for (x, r) in data.iter().zip(resp) {
                for a in 0..d {
                    let da = x[a] - means[j][a];
                    for b in 0..=a {
                        s[a][b] += r[j] * da * (x[b] - means[j][b]);
                    }
                }
            }
            for a in 0..d {
                for b in 0..a {
                    s[b][a] = s[a][b];
                }
            }
            s
        };
        let diagonal = |j: usize| -> Vec<f64> {
            (0..d)
                .map(|t| {
                    let v: f64 = data
                        .iter()
                        .zip(resp)
                        .map(|(x, r)| r[j] * (x[t] - means[j][t]) * (x[t] - means[j][t]))
                        .sum();
                    v / nk[j] + self.reg_covar
                })
                .collect()
        };

        let covariance = match covariance_type {
            CovarianceType::Spherical => {
                Covariance::Spherical((0..k).map(|j| diagonal(j).iter().sum::<f64>() / d as f64).collect())
            }
            CovarianceType::Diagonal => Covariance::Diagonal((0..k).map(diagonal).collect()),
            CovarianceType::Tied => {
                let mut total = vec![vec![0.0; d]; d];
                for j in 0..k {
                    for (row, s_row) in total.iter_mut().zip(scatter(j)) {
                        for (t, s) in row.iter_mut().zip(s_row) {
                            *t += s;
                        }
                    }
                }
                for (a, row) in total.iter_mut().enumerate() {
                    for t in row.iter_mut() {
                        *t /= n as f64;
                    }
                    row[a] += self.reg_covar;
                }
                Covariance::Tied(cholesky(&total)?)
            }
            CovarianceType::Full => {
                let mut factors = Vec::with_capacity(k);
                for j in 0..k {
                    let mut s = scatter(j);
                    for (a, row) in s.iter_mut().enumerate() {
                        for t in row.iter_mut() {
                            *t /= nk[j];
                        }
                        row[a] += self.reg_covar;
                    }
                    factors.push(cholesky(&s)?);
                }
                Covariance::Full(factors)
            }
        };

        Some(FittedMixture {
            covariance_type,
            weights,
            means,
            covariance,
            log_likelihood: f64::NEG_INFINITY,
            bic: f64::INFINITY,
        })
    }
}

impl Clusterer for GaussianMixture {
    fn cluster(&mut self, data: &[Vec<f64>], min_components: usize) -> Vec<usize> {
        let Some(model) = self.select(data, min_components) else {
            return vec![0; data.len()];
        };
        compact(&model.predict(data))
    }
}

/// Renumbers labels to `0..m`, keeping their relative order.
pub fn compact(labels: &[usize]) -> Vec<usize> {
    let mut used: Vec<usize> = labels.to_vec();
    used.sort_unstable();
    used.dedup();
    labels
        .iter()
        .map(|l| used.binary_search(l).unwrap_or_default())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    /// Two tight blobs around (0, 0) and (10, 10).
    fn blobs() -> Vec<Vec<f64>> {
        let offsets = [(-0.3, 0.1), (0.2, -0.2), (0.1, 0.3), (-0.1, -0.1), (0.25, 0.05), (-0.2, 0.2)];
        let mut data = Vec::new();
        for &(cx, cy) in &[(0.0, 0.0), (10.0, 10.0)] {
            for &(dx, dy) in &offsets {
                data.push(vec![cx + dx, cy + dy]);
            }
        }
        data
    }

    #[test]
    fn test_parameter_counts() {
        assert_eq!(CovarianceType::Spherical.n_parameters(2, 3), 2 + 6 + 1);
        assert_eq!(CovarianceType::Diagonal.n_parameters(2, 3), 6 + 6 + 1);
        assert_eq!(CovarianceType::Tied.n_parameters(2, 3), 6 + 6 + 1);
        assert_eq!(CovarianceType::Full.n_parameters(2, 3), 12 + 6 + 1);
        assert_eq!(CovarianceType::Full.n_parameters(1, 1), 1 + 1);
    }

    #[test]
    fn test_cholesky() {
        let a = vec![vec![4.0, 2.0], vec![2.0, 3.0]];
        let l = cholesky(&a).unwrap();
        assert!((l[0][0] - 2.0).abs() < 1e-12);
        assert!((l[1][0] - 1.0).abs() < 1e-12);
        assert!((l[1][1] - 2f64.sqrt()).abs() < 1e-12);
        assert_eq!(l[0][1], 0.0);

        assert!(cholesky(&[vec![1.0, 2.0], vec![2.0, 1.0]]).is_none());
    }

    #[test]
    fn test_log_sum_exp() {
        let v = [1000.0, 1000.0];
        assert!((log_sum_exp(&v) - (1000.0 + 2f64.ln())).abs() < 1e-9);
        assert_eq!(log_sum_exp(&[f64::NEG_INFINITY]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_every_family_separates_blobs() {
        let data = blobs();
        for covariance_type in CovarianceType::ALL {
            let mut gmm = GaussianMixture::with_seed(5);
            let model = gmm.fit(&data, 2, covariance_type).unwrap();
            let labels = model.predict(&data);
            assert!(labels[..6].iter().all(|&l| l == labels[0]), "{:?}", covariance_type);
            assert!(labels[6..].iter().all(|&l| l == labels[6]), "{:?}", covariance_type);
            assert_ne!(labels[0], labels[6], "{:?}", covariance_type);
            let total: f64 = model.weights.iter().sum();
            assert!((total - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_bic_prefers_two_components() {
        let data = blobs();
        let mut gmm = GaussianMixture::with_seed(1);
        gmm.max_components = 2;
        gmm.covariance_types = vec![CovarianceType::Spherical];
        let model = gmm.select(&data, 1).unwrap();
        assert_eq!(model.n_components(), 2);
    }

    #[test]
    fn test_cluster_labels_are_contiguous() {
        let data = blobs();
        let mut gmm = GaussianMixture::with_seed(3);
        let labels = gmm.cluster(&data, 2);
        assert_eq!(labels.len(), data.len());
        let max = *labels.iter().max().unwrap();
        for l in 0..=max {
            assert!(labels.contains(&l));
        }
        assert_ne!(labels[0], labels[6]);
    }

    #[test]
    fn test_too_few_rows() {
        let mut gmm = GaussianMixture::with_seed(0);
        assert_eq!(gmm.cluster(&[vec![1.0, 2.0]], 2), vec![0]);
        assert!(gmm.cluster(&[], 2).is_empty());
        assert!(gmm.select(&[vec![]], 1).is_none());
    }

    #[test]
    fn test_compact() {
        assert_eq!(compact(&[4, 1, 4, 7]), vec![1, 0, 1, 2]);
        assert!(compact(&[]).is_empty());
    }
}

//! Lloyd's k-means with k-means++ seeding
//!
//! Centroids are seeded with k-means++ from a seedable `StdRng`: the first
//! centroid is a uniformly drawn sample, each further one a sample drawn
//! with probability proportional to its squared distance to the nearest
//! centroid chosen so far. A sample is never chosen twice.

use super::stats::squared_distance;
use crate::structs::{
    ClassifyError, ClusterResult, IterationObserver, IterationProgress, LogObserver, Result,
};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const DEFAULT_MAX_ITERATIONS: usize = 300;

/// K-means parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KMeans {
    n_clusters: usize,
    max_iterations: usize,
    seed: Option<u64>,
}

impl KMeans {
    #[must_use]
    pub fn params(n_clusters: usize) -> Self {
        Self {
            n_clusters,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            seed: None,
        }
    }

    /// Upper bound on update/assign rounds
    #[must_use]
    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Seed for centroid initialization; unseeded runs draw from entropy
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Cluster the rows of `data`, logging progress at debug level
    ///
    /// # Errors
    /// Returns error if the data or parameters are invalid
    pub fn fit(&self, data: ArrayView2<'_, f64>) -> Result<ClusterResult> {
        self.fit_with_observer(data, &mut LogObserver)
    }

    /// Cluster the rows of `data`, reporting each iteration to `observer`
    ///
    /// Reaching the iteration bound is not an error; the result is marked
    /// as not converged.
    ///
    /// # Errors
    /// Returns error if `data` is empty or holds non-finite values, `k` is
    /// outside `[1, n_samples]`, or the iteration bound is zero
    pub fn fit_with_observer(
        &self,
        data: ArrayView2<'_, f64>,
        observer: &mut dyn IterationObserver,
    ) -> Result<ClusterResult> {
        self.validate(data)?;

        let k = self.n_clusters;
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut centroids = kmeans_plus_plus(data, k, &mut rng);
        let mut labels = assign(data, &centroids);
        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.max_iterations {
            iterations += 1;

            let reseeded = repair_empty_clusters(data, &centroids, &mut labels, k);
            if reseeded > 0 {
                tracing::debug!(iteration = iterations, reseeded, "re-seeded empty clusters");
            }

            centroids = update_centroids(data, &labels, k);
            let new_labels = assign(data, &centroids);
            let changed = labels
                .iter()
                .zip(&new_labels)
                .filter(|(old, new)| old != new)
                .count();
            labels = new_labels;

            observer.on_iteration(&IterationProgress {
                iteration: iterations,
                changed,
                inertia: compute_inertia(data, &centroids, &labels),
            });

            if changed == 0 {
                converged = true;
                break;
            }
        }

        if !converged {
            tracing::warn!(
                max_iterations = self.max_iterations,
                "k-means did not converge, returning last assignment"
            );
            repair_empty_clusters(data, &centroids, &mut labels, k);
        }

        let centroids = update_centroids(data, &labels, k);
        let inertia = compute_inertia(data, &centroids, &labels);
        let sizes = cluster_sizes(&labels, k);

        Ok(ClusterResult {
            labels,
            k,
            sizes,
            centroids,
            iterations,
            converged,
            inertia,
        })
    }

    fn validate(&self, data: ArrayView2<'_, f64>) -> Result<()> {
        let n_samples = data.nrows();

        if n_samples == 0 {
            return Err(ClassifyError::InvalidInput("No samples to cluster".into()));
        }
        if data.ncols() == 0 {
            return Err(ClassifyError::InvalidInput("Samples have no features".into()));
        }
        if self.n_clusters == 0 {
            return Err(ClassifyError::InvalidInput("k must be at least 1".into()));
        }
        if self.n_clusters > n_samples {
            return Err(ClassifyError::InvalidInput(format!(
                "Cannot create {} clusters with only {n_samples} samples",
                self.n_clusters
            )));
        }
        if self.max_iterations == 0 {
            return Err(ClassifyError::InvalidInput(
                "max_iterations must be at least 1".into(),
            ));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(ClassifyError::InvalidInput(
                "Feature matrix contains non-finite values".into(),
            ));
        }

        Ok(())
    }
}

/// Choose `k` distinct samples as initial centroids
fn kmeans_plus_plus<R: Rng>(data: ArrayView2<'_, f64>, k: usize, rng: &mut R) -> Array2<f64> {
    let n = data.nrows();
    let first = rng.gen_range(0..n);
    let mut chosen = vec![first];
    let mut min_dist: Vec<f64> = data
        .rows()
        .into_iter()
        .map(|row| squared_distance(&row, &data.row(first)))
        .collect();

    while chosen.len() < k {
        let total: f64 = min_dist.iter().sum();

        let next = if total > 0.0 {
            let target = rng.gen::<f64>() * total;
            let mut cumulative = 0.0;
            let mut selected = None;
            for (i, &d) in min_dist.iter().enumerate() {
                if d <= 0.0 {
                    continue;
                }
                cumulative += d;
                selected = Some(i);
                if cumulative > target {
                    break;
                }
            }
            selected
        } else {
            // Every remaining sample coincides with a chosen centroid
            (0..n).find(|i| !chosen.contains(i))
        };

        let Some(next) = next else {
            break;
        };
        chosen.push(next);

        let centroid = data.row(next);
        for (d, row) in min_dist.iter_mut().zip(data.rows()) {
            *d = d.min(squared_distance(&row, &centroid));
        }
    }

    data.select(Axis(0), &chosen)
}

/// Index of and squared distance to the nearest centroid, ties to the lowest index
fn nearest_centroid(point: ArrayView1<'_, f64>, centroids: &Array2<f64>) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (j, centroid) in centroids.rows().into_iter().enumerate() {
        let dist = squared_distance(&point, &centroid);
        if dist < best.1 {
            best = (j, dist);
        }
    }
    best
}

fn assign(data: ArrayView2<'_, f64>, centroids: &Array2<f64>) -> Vec<usize> {
    data.rows()
        .into_iter()
        .map(|row| nearest_centroid(row, centroids).0)
        .collect()
}

/// Mean of the members of each cluster; empty clusters get a zero centroid
#[allow(clippy::cast_precision_loss)]
fn update_centroids(data: ArrayView2<'_, f64>, labels: &[usize], k: usize) -> Array2<f64> {
    let mut centroids = Array2::<f64>::zeros((k, data.ncols()));
    let mut counts = vec![0usize; k];

    for (row, &label) in data.rows().into_iter().zip(labels) {
        let mut centroid = centroids.row_mut(label);
        centroid += &row;
        counts[label] += 1;
    }

    for (mut centroid, &count) in centroids.rows_mut().into_iter().zip(&counts) {
        if count > 0 {
            centroid /= count as f64;
        }
    }

    centroids
}

/// Move samples into empty clusters, returning how many clusters were re-seeded
///
/// Each empty cluster takes the sample farthest from its own centroid among
/// clusters with more than one member. With `k <= n_samples` there is
/// always such a donor, so no cluster is left empty.
fn repair_empty_clusters(
    data: ArrayView2<'_, f64>,
    centroids: &Array2<f64>,
    labels: &mut [usize],
    k: usize,
) -> usize {
    let mut sizes = cluster_sizes(labels, k);
    let mut reseeded = 0;

    for empty in 0..k {
        if sizes[empty] > 0 {
            continue;
        }

        let mut donor: Option<(usize, f64)> = None;
        for (i, row) in data.rows().into_iter().enumerate() {
            let label = labels[i];
            if sizes[label] < 2 {
                continue;
            }
            let dist = squared_distance(&row, &centroids.row(label));
            if donor.map_or(true, |(_, best)| dist > best) {
                donor = Some((i, dist));
            }
        }

        let Some((sample, _)) = donor else {
            break;
        };
        sizes[labels[sample]] -= 1;
        labels[sample] = empty;
        sizes[empty] = 1;
        reseeded += 1;
    }

    reseeded
}

fn compute_inertia(data: ArrayView2<'_, f64>, centroids: &Array2<f64>, labels: &[usize]) -> f64 {
    data.rows()
        .into_iter()
        .zip(labels)
        .map(|(row, &label)| squared_distance(&row, &centroids.row(label)))
        .sum()
}

/// Count samples per cluster
#[must_use]
pub fn cluster_sizes(labels: &[usize], k: usize) -> Vec<usize> {
    let mut sizes = vec![0usize; k];
    for &label in labels {
        sizes[label] += 1;
    }
    sizes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::FeatureMatrix;
    use ndarray::array;

    fn blobs() -> FeatureMatrix {
        FeatureMatrix::new(
            (1..=6).map(|i| format!("ts_{i}")).collect(),
            vec!["x".into(), "y".into()],
            vec![
                vec![0.0, 0.0],
                vec![0.1, 0.1],
                vec![0.0, 0.1],
                vec![10.0, 10.0],
                vec![10.1, 9.9],
                vec![9.9, 10.0],
            ],
        )
        .expect("valid matrix")
    }

    fn scattered(n: usize, dims: usize, seed: u64) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array2::from_shape_fn((n, dims), |_| rng.gen_range(-1.0..1.0))
    }

    #[test]
    fn test_kmeans_separates_blobs() {
        let normalized = blobs().normalize();

        let result = KMeans::params(2)
            .seed(42)
            .fit(normalized.data.view())
            .expect("run kmeans");

        assert_eq!(result.k, 2);
        assert_eq!(result.labels.len(), 6);
        assert!(result.converged);
        assert_eq!(result.labels[0], result.labels[1]);
        assert_eq!(result.labels[0], result.labels[2]);
        assert_eq!(result.labels[3], result.labels[4]);
        assert_eq!(result.labels[3], result.labels[5]);
        assert_ne!(result.labels[0], result.labels[3]);
        assert_eq!(result.sizes, vec![3, 3]);
    }

    #[test]
    fn test_blobs_grouping_holds_for_any_seed() {
        let normalized = blobs().normalize();

        for seed in 0..20 {
            let result = KMeans::params(2)
                .seed(seed)
                .fit(normalized.data.view())
                .expect("run kmeans");
            assert_ne!(result.labels[0], result.labels[3], "seed {seed}");
            assert_eq!(result.sizes, vec![3, 3], "seed {seed}");
        }
    }

    #[test]
    fn test_k_equal_to_sample_count_gives_singletons() {
        let data = array![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [5.0, 5.0], [-3.0, 2.0]];

        let result = KMeans::params(5).seed(7).fit(data.view()).expect("run kmeans");

        assert_eq!(result.sizes, vec![1; 5]);
        let mut labels = result.labels.clone();
        labels.sort_unstable();
        assert_eq!(labels, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_identical_samples_still_fill_every_cluster() {
        let data = array![[0.5, 0.5], [0.5, 0.5], [0.5, 0.5], [0.5, 0.5]];

        let result = KMeans::params(4)
            .seed(1)
            .max_iterations(10)
            .fit(data.view())
            .expect("run kmeans");

        assert_eq!(result.sizes, vec![1; 4]);
    }

    #[test]
    fn test_sizes_sum_and_labels_in_range() {
        let data = scattered(40, 3, 99);

        for k in 1..=10 {
            let result = KMeans::params(k).seed(3).fit(data.view()).expect("run kmeans");

            assert_eq!(result.sizes.iter().sum::<usize>(), 40);
            assert!(result.labels.iter().all(|&l| l < k));
            assert!(result.sizes.iter().all(|&s| s > 0));
            assert_eq!(result.sizes, cluster_sizes(&result.labels, k));
            assert_eq!(result.centroids.dim(), (k, 3));
        }
    }

    #[test]
    fn test_same_seed_same_labels() {
        let data = scattered(30, 4, 5);

        let first = KMeans::params(4).seed(11).fit(data.view()).expect("first run");
        let second = KMeans::params(4).seed(11).fit(data.view()).expect("second run");

        assert_eq!(first.labels, second.labels);
        assert_eq!(first.centroids, second.centroids);
    }

    #[test]
    fn test_observer_sees_every_iteration() {
        let data = scattered(25, 2, 8);
        let mut reports = Vec::new();
        let mut observer = |p: &IterationProgress| reports.push(*p);

        let result = KMeans::params(3)
            .seed(2)
            .fit_with_observer(data.view(), &mut observer)
            .expect("run kmeans");

        assert_eq!(reports.len(), result.iterations);
        assert_eq!(reports.first().map(|p| p.iteration), Some(1));
        if result.converged {
            assert_eq!(reports.last().map(|p| p.changed), Some(0));
        }
    }

    #[test]
    fn test_iteration_bound_is_not_an_error() {
        let data = scattered(50, 2, 21);

        let result = KMeans::params(5)
            .seed(4)
            .max_iterations(1)
            .fit(data.view())
            .expect("run kmeans");

        assert_eq!(result.iterations, 1);
        assert_eq!(result.sizes.iter().sum::<usize>(), 50);
        assert!(result.sizes.iter().all(|&s| s > 0));
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let data = array![[0.0, 1.0], [1.0, 0.0]];

        assert!(KMeans::params(0).fit(data.view()).is_err());
        assert!(KMeans::params(3).fit(data.view()).is_err());
        assert!(KMeans::params(1).max_iterations(0).fit(data.view()).is_err());

        let empty = Array2::<f64>::zeros((0, 2));
        assert!(KMeans::params(1).fit(empty.view()).is_err());

        let nan = array![[0.0, f64::NAN]];
        assert!(matches!(
            KMeans::params(1).fit(nan.view()),
            Err(ClassifyError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_ties_go_to_lowest_index() {
        let centroids = array![[1.0, 0.0], [-1.0, 0.0], [0.0, 1.0]];
        let point = array![0.0, 0.0];

        let (index, dist) = nearest_centroid(point.view(), &centroids);

        assert_eq!(index, 0);
        assert!((dist - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_repair_moves_farthest_sample() {
        let data = array![[0.0, 0.0], [0.0, 1.0], [0.0, 5.0]];
        let centroids = array![[0.0, 0.0], [100.0, 100.0]];
        let mut labels = vec![0, 0, 0];

        let reseeded = repair_empty_clusters(data.view(), &centroids, &mut labels, 2);

        assert_eq!(reseeded, 1);
        assert_eq!(labels, vec![0, 0, 1]);
    }

    #[test]
    fn test_kmeans_plus_plus_picks_distinct_samples() {
        let data = array![[0.0, 0.0], [0.0, 0.0], [1.0, 1.0], [2.0, 2.0]];
        let mut rng = StdRng::seed_from_u64(0);

        let centroids = kmeans_plus_plus(data.view(), 3, &mut rng);

        assert_eq!(centroids.nrows(), 3);
        for i in 0..3 {
            for j in (i + 1)..3 {
                assert_ne!(centroids.row(i), centroids.row(j));
            }
        }
    }
}

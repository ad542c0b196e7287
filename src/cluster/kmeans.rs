use anyhow::{Result, ensure};
use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// K-means clustering over standardized feature vectors: assign each point
/// to its nearest centroid by squared Euclidean distance, recompute
/// centroids as member means, repeat until assignments settle. Several
/// random restarts are run and the lowest-inertia result kept, since a
/// single run is sensitive to where the seeding lands.
#[derive(Debug, Clone)]
pub struct KMeans {
    pub n_clusters: usize,
    pub n_init: usize,
    pub max_iter: usize,
}

impl Default for KMeans {
    fn default() -> Self {
        Self {
            n_clusters: 20,
            n_init: 4,
            max_iter: 300,
        }
    }
}

/// The fitted state needed at prediction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KMeansModel {
    pub centroids: Vec<Vec<f64>>,
    pub inertia: f64,
}

/// A fit result: the model plus the training-set cluster labels.
#[derive(Debug, Clone)]
pub struct KMeansFit {
    pub model: KMeansModel,
    pub labels: Vec<usize>,
}

impl KMeans {
    pub fn new(n_clusters: usize) -> Self {
        Self {
            n_clusters,
            ..Self::default()
        }
    }

    /// Partition `data` into `n_clusters` clusters, keeping the restart
    /// with the lowest total within-cluster squared distance.
    pub fn fit<R: Rng + ?Sized>(&self, data: &[Vec<f64>], rng: &mut R) -> Result<KMeansFit> {
        ensure!(!data.is_empty(), "cannot cluster an empty matrix");
        ensure!(self.n_clusters > 0, "n_clusters must be at least 1");
        ensure!(
            self.n_clusters <= data.len(),
            "n_clusters ({}) exceeds number of rows ({})",
            self.n_clusters,
            data.len()
        );
        ensure!(self.n_init > 0, "n_init must be at least 1");
        let dim = data[0].len();
        ensure!(
            data.iter().all(|row| row.len() == dim),
            "all rows must have {dim} columns"
        );

        let mut best = self.fit_once(data, rng);
        debug!("k-means restart 1/{}: inertia {:.4}", self.n_init, best.model.inertia);
        for run in 1..self.n_init {
            let fit = self.fit_once(data, rng);
            debug!(
                "k-means restart {}/{}: inertia {:.4}",
                run + 1,
                self.n_init,
                fit.model.inertia
            );
            if fit.model.inertia < best.model.inertia {
                best = fit;
            }
        }
        Ok(best)
    }

    fn fit_once<R: Rng + ?Sized>(&self, data: &[Vec<f64>], rng: &mut R) -> KMeansFit {
        let mut centroids = init_plusplus(data, self.n_clusters, rng);
        let mut labels = assign_labels(data, &centroids);

        for _ in 0..self.max_iter {
            update_centroids(&mut centroids, data, &labels);
            let new_labels = assign_labels(data, &centroids);
            let converged = new_labels == labels;
            labels = new_labels;
            if converged {
                break;
            }
        }

        // One last assignment against the final centroids, so training
        // labels and later predict() calls always agree.
        let labels = assign_labels(data, &centroids);
        let inertia = data
            .iter()
            .zip(&labels)
            .map(|(row, &label)| distance_sq(row, &centroids[label]))
            .sum();

        KMeansFit {
            model: KMeansModel { centroids, inertia },
            labels,
        }
    }
}

impl KMeansModel {
    pub fn n_clusters(&self) -> usize {
        self.centroids.len()
    }

    /// Index of the nearest centroid to a standardized row.
    pub fn predict(&self, row: &[f64]) -> usize {
        nearest_centroid(row, &self.centroids).0
    }
}

/// k-means++ seeding: the first centroid is a uniformly random point, each
/// later one is drawn with probability proportional to its squared distance
/// from the nearest centroid chosen so far.
fn init_plusplus<R: Rng + ?Sized>(data: &[Vec<f64>], k: usize, rng: &mut R) -> Vec<Vec<f64>> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(data[rng.gen_range(0..data.len())].clone());

    while centroids.len() < k {
        let distances: Vec<f64> = data
            .iter()
            .map(|row| nearest_centroid(row, &centroids).1)
            .collect();
        let total: f64 = distances.iter().sum();

        if total <= 0.0 {
            // Every point already coincides with a centroid; any point does
            centroids.push(data[rng.gen_range(0..data.len())].clone());
            continue;
        }

        let mut threshold = rng.r#gen::<f64>() * total;
        let mut chosen = data.len() - 1;
        for (i, d) in distances.iter().enumerate() {
            threshold -= d;
            if threshold <= 0.0 {
                chosen = i;
                break;
            }
        }
        centroids.push(data[chosen].clone());
    }

    centroids
}

fn assign_labels(data: &[Vec<f64>], centroids: &[Vec<f64>]) -> Vec<usize> {
    data.iter()
        .map(|row| nearest_centroid(row, centroids).0)
        .collect()
}

fn update_centroids(centroids: &mut [Vec<f64>], data: &[Vec<f64>], labels: &[usize]) {
    let k = centroids.len();
    let dim = data[0].len();
    let mut sums = vec![vec![0.0; dim]; k];
    let mut counts = vec![0usize; k];

    for (row, &label) in data.iter().zip(labels) {
        for (sum, value) in sums[label].iter_mut().zip(row) {
            *sum += value;
        }
        counts[label] += 1;
    }

    for (j, count) in counts.iter().enumerate() {
        if *count > 0 {
            for (c, sum) in centroids[j].iter_mut().zip(&sums[j]) {
                *c = sum / *count as f64;
            }
        }
    }

    // A cluster that lost all members is reseeded to the point farthest
    // from its nearest centroid instead of averaging over nothing.
    for j in 0..k {
        if counts[j] == 0 {
            let farthest = data
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| {
                    let da = nearest_centroid(a, centroids).1;
                    let db = nearest_centroid(b, centroids).1;
                    da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(i, _)| i)
                .unwrap_or(0);
            centroids[j] = data[farthest].clone();
        }
    }
}

fn nearest_centroid(row: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (j, centroid) in centroids.iter().enumerate() {
        let dist = distance_sq(row, centroid);
        if dist < best_dist {
            best_dist = dist;
            best = j;
        }
    }
    (best, best_dist)
}

fn distance_sq(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn two_blobs() -> Vec<Vec<f64>> {
        vec![
            vec![0.0, 0.1],
            vec![0.1, 0.0],
            vec![-0.1, 0.05],
            vec![10.0, 10.1],
            vec![10.1, 9.9],
            vec![9.9, 10.0],
        ]
    }

    #[test]
    fn separates_well_spaced_blobs() {
        let data = two_blobs();
        let mut rng = StdRng::seed_from_u64(7);
        let fit = KMeans::new(2).fit(&data, &mut rng).unwrap();

        let first = fit.labels[0];
        assert!(fit.labels[..3].iter().all(|&l| l == first));
        let second = fit.labels[3];
        assert!(fit.labels[3..].iter().all(|&l| l == second));
        assert_ne!(first, second);
    }

    #[test]
    fn predict_agrees_with_training_labels() {
        let data = two_blobs();
        let mut rng = StdRng::seed_from_u64(42);
        let fit = KMeans::new(2).fit(&data, &mut rng).unwrap();

        for (row, &label) in data.iter().zip(&fit.labels) {
            assert_eq!(fit.model.predict(row), label);
        }
    }

    #[test]
    fn no_cluster_ends_empty() {
        let data = two_blobs();
        let mut rng = StdRng::seed_from_u64(3);
        // k equal to the number of distinct points stresses the reseed path
        let fit = KMeans::new(data.len()).fit(&data, &mut rng).unwrap();

        let mut counts = vec![0usize; fit.model.n_clusters()];
        for &label in &fit.labels {
            counts[label] += 1;
        }
        assert!(counts.iter().all(|&c| c > 0));
    }

    #[test]
    fn more_clusters_never_raise_inertia() {
        let data = two_blobs();
        let mut rng = StdRng::seed_from_u64(11);
        let coarse = KMeans::new(1).fit(&data, &mut rng).unwrap();
        let fine = KMeans::new(3).fit(&data, &mut rng).unwrap();
        assert!(fine.model.inertia <= coarse.model.inertia);
    }

    #[test]
    fn rejects_degenerate_inputs() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(KMeans::new(2).fit(&[], &mut rng).is_err());
        assert!(
            KMeans::new(0)
                .fit(&[vec![1.0], vec![2.0]], &mut rng)
                .is_err()
        );
        assert!(KMeans::new(3).fit(&[vec![1.0], vec![2.0]], &mut rng).is_err());
    }
}

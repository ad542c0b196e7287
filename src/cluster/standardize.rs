use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

/// Floor for the per-column deviation so zero-variance columns do not
/// divide by zero during transform.
const MIN_STD: f64 = 1e-9;

/// Per-column zero-mean / unit-variance rescaling, fit once on the training
/// matrix and reused unchanged at prediction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl Standardizer {
    /// Compute per-column mean and standard deviation over all rows.
    pub fn fit(matrix: &[Vec<f64>]) -> Result<Self> {
        ensure!(!matrix.is_empty(), "cannot standardize an empty matrix");
        let dim = matrix[0].len();
        ensure!(dim > 0, "cannot standardize zero-width rows");
        ensure!(
            matrix.iter().all(|row| row.len() == dim),
            "all rows must have {dim} columns"
        );

        let n = matrix.len() as f64;
        let mut means = vec![0.0; dim];
        for row in matrix {
            for (mean, value) in means.iter_mut().zip(row) {
                *mean += value;
            }
        }
        for mean in &mut means {
            *mean /= n;
        }

        let mut stds = vec![0.0; dim];
        for row in matrix {
            for ((std, value), mean) in stds.iter_mut().zip(row).zip(&means) {
                let diff = value - mean;
                *std += diff * diff;
            }
        }
        for std in &mut stds {
            *std = (*std / n).sqrt().max(MIN_STD);
        }

        Ok(Standardizer { means, stds })
    }

    /// Number of columns this standardizer was fit on.
    pub fn dim(&self) -> usize {
        self.means.len()
    }

    /// Rescale a single row with the fit-time parameters.
    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        debug_assert_eq!(row.len(), self.dim());
        row.iter()
            .zip(self.means.iter().zip(&self.stds))
            .map(|(value, (mean, std))| (value - mean) / std)
            .collect()
    }

    /// Rescale a full matrix row by row.
    pub fn transform(&self, matrix: &[Vec<f64>]) -> Vec<Vec<f64>> {
        matrix.iter().map(|row| self.transform_row(row)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn column(matrix: &[Vec<f64>], index: usize) -> Vec<f64> {
        matrix.iter().map(|row| row[index]).collect()
    }

    fn mean(values: &[f64]) -> f64 {
        values.iter().sum::<f64>() / values.len() as f64
    }

    fn std_dev(values: &[f64]) -> f64 {
        let m = mean(values);
        (values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64).sqrt()
    }

    #[test]
    fn transform_centers_and_scales_fit_data() {
        let matrix = vec![
            vec![1.0, 100.0, -3.0],
            vec![2.0, 250.0, -1.0],
            vec![3.0, 175.0, 4.0],
            vec![4.0, 90.0, 0.0],
        ];
        let scaler = Standardizer::fit(&matrix).unwrap();
        let transformed = scaler.transform(&matrix);

        for i in 0..3 {
            let col = column(&transformed, i);
            assert_abs_diff_eq!(mean(&col), 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(std_dev(&col), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn zero_variance_column_stays_finite() {
        let matrix = vec![vec![5.0, 1.0], vec![5.0, 2.0], vec![5.0, 3.0]];
        let scaler = Standardizer::fit(&matrix).unwrap();
        let transformed = scaler.transform(&matrix);

        for row in &transformed {
            assert!(row.iter().all(|v| v.is_finite()));
        }
        // Constant column transforms to zero, not NaN or infinity
        assert_abs_diff_eq!(transformed[0][0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn single_row_transform_matches_matrix_transform() {
        let matrix = vec![vec![1.0, 10.0], vec![3.0, 30.0], vec![5.0, 20.0]];
        let scaler = Standardizer::fit(&matrix).unwrap();
        let full = scaler.transform(&matrix);
        for (row, expected) in matrix.iter().zip(&full) {
            assert_eq!(&scaler.transform_row(row), expected);
        }
    }

    #[test]
    fn empty_matrix_is_rejected() {
        assert!(Standardizer::fit(&[]).is_err());
    }

    #[test]
    fn ragged_matrix_is_rejected() {
        let matrix = vec![vec![1.0, 2.0], vec![1.0]];
        assert!(Standardizer::fit(&matrix).is_err());
    }
}

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use chrono::Local;
use log::info;
use serde::{Deserialize, Serialize};

use super::kmeans::KMeansModel;
use super::standardize::Standardizer;
use crate::errors::RecommendError;
use crate::models::AudioFeatures;

/// The fitted pair that recommendation needs: the standardizer and the
/// cluster model trained on its output. Persisted together so the two can
/// never drift apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongModel {
    pub scaler: Standardizer,
    pub kmeans: KMeansModel,
}

impl SongModel {
    /// Map a song's raw audio features onto a cluster label.
    pub fn predict(&self, features: &AudioFeatures) -> usize {
        self.kmeans.predict(&self.scaler.transform_row(&features.to_vec()))
    }

    /// Cluster labels for a raw feature matrix, row for row.
    pub fn predict_matrix(&self, matrix: &[Vec<f64>]) -> Vec<usize> {
        matrix
            .iter()
            .map(|row| self.kmeans.predict(&self.scaler.transform_row(row)))
            .collect()
    }
}

/// Save/load of the fitted model, with an append-only text log recording
/// each save.
#[derive(Debug, Clone)]
pub struct ModelStore {
    model_path: PathBuf,
    log_path: PathBuf,
}

impl ModelStore {
    pub fn new(model_path: impl Into<PathBuf>, log_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            log_path: log_path.into(),
        }
    }

    /// Serialize the model atomically (temp file, then rename) and append
    /// one log line with timestamp, path and inertia.
    pub fn save(&self, model: &SongModel) -> Result<(), RecommendError> {
        let serialized = serde_json::to_string(model)?;

        let tmp_path = self.model_path.with_extension("tmp");
        fs::write(&tmp_path, serialized)?;
        fs::rename(&tmp_path, &self.model_path)?;

        let timestamp = Local::now().format("%Y-%m-%d %H:%M");
        let mut log_file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(
            log_file,
            "--------------\nModel saved - KMeans(k={})\nInertia = {:.2}\n{timestamp}h\nFilename: {}",
            model.kmeans.n_clusters(),
            model.kmeans.inertia,
            self.model_path.display()
        )?;

        info!(
            "saved model with {} clusters to {}",
            model.kmeans.n_clusters(),
            self.model_path.display()
        );
        Ok(())
    }

    /// Deserialize the model. A missing file and an unreadable file are
    /// distinct, typed failures; neither falls back to a default model.
    pub fn load(&self) -> Result<SongModel, RecommendError> {
        if !self.model_path.exists() {
            return Err(RecommendError::ModelNotFound {
                path: self.model_path.clone(),
            });
        }
        let contents = fs::read_to_string(&self.model_path)?;
        serde_json::from_str(&contents).map_err(|source| RecommendError::ModelCorrupt {
            path: self.model_path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::kmeans::KMeans;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn fitted_model() -> (SongModel, Vec<Vec<f64>>) {
        let matrix = vec![
            vec![0.1, 0.9, 120.0],
            vec![0.2, 0.8, 118.0],
            vec![0.9, 0.1, 60.0],
            vec![0.8, 0.2, 63.0],
        ];
        let scaler = Standardizer::fit(&matrix).unwrap();
        let standardized = scaler.transform(&matrix);
        let mut rng = StdRng::seed_from_u64(5);
        let fit = KMeans::new(2).fit(&standardized, &mut rng).unwrap();
        (
            SongModel {
                scaler,
                kmeans: fit.model,
            },
            matrix,
        )
    }

    #[test]
    fn save_then_load_round_trips_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path().join("model.json"), dir.path().join("log.txt"));
        let (model, probes) = fitted_model();

        store.save(&model).unwrap();
        let loaded = store.load().unwrap();

        for probe in &probes {
            assert_eq!(
                loaded.kmeans.predict(&loaded.scaler.transform_row(probe)),
                model.kmeans.predict(&model.scaler.transform_row(probe)),
            );
        }
    }

    #[test]
    fn save_appends_log_entry_with_inertia() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("log.txt");
        let store = ModelStore::new(dir.path().join("model.json"), &log_path);
        let (model, _) = fitted_model();

        store.save(&model).unwrap();
        store.save(&model).unwrap();

        let log = fs::read_to_string(&log_path).unwrap();
        assert_eq!(log.matches("Model saved").count(), 2);
        assert!(log.contains("Inertia ="));
        assert!(log.contains("model.json"));
    }

    #[test]
    fn missing_model_is_a_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path().join("absent.json"), dir.path().join("log.txt"));
        assert!(matches!(
            store.load(),
            Err(RecommendError::ModelNotFound { .. })
        ));
    }

    #[test]
    fn corrupt_model_is_a_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("model.json");
        fs::write(&model_path, "not a model").unwrap();
        let store = ModelStore::new(&model_path, dir.path().join("log.txt"));
        assert!(matches!(
            store.load(),
            Err(RecommendError::ModelCorrupt { .. })
        ));
    }
}

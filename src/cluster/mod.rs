pub mod kmeans;
pub mod standardize;
pub mod store;

pub use kmeans::{KMeans, KMeansFit, KMeansModel};
pub use standardize::Standardizer;
pub use store::{ModelStore, SongModel};

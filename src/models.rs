use serde::{Deserialize, Serialize};

/// Order of the numeric feature columns in the catalog CSV and in every
/// feature vector handed to the clustering pipeline. Fit and predict must
/// agree on this order, so there is exactly one definition of it.
pub const FEATURE_COLUMNS: [&str; 11] = [
    "danceability",
    "energy",
    "key",
    "loudness",
    "mode",
    "speechiness",
    "acousticness",
    "instrumentalness",
    "liveness",
    "valence",
    "tempo",
];

/// The audio-feature vector of a single track, as returned by the catalog
/// API's audio-features endpoint. Fixed shape: a missing feature is a
/// deserialization error at the ingestion boundary, not a runtime surprise
/// later in the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    pub danceability: f64,
    pub energy: f64,
    pub key: f64,
    pub loudness: f64,
    pub mode: f64,
    pub speechiness: f64,
    pub acousticness: f64,
    pub instrumentalness: f64,
    pub liveness: f64,
    pub valence: f64,
    pub tempo: f64,
}

impl AudioFeatures {
    /// Project the features onto a vector in `FEATURE_COLUMNS` order.
    pub fn to_vec(&self) -> Vec<f64> {
        vec![
            self.danceability,
            self.energy,
            self.key,
            self.loudness,
            self.mode,
            self.speechiness,
            self.acousticness,
            self.instrumentalness,
            self.liveness,
            self.valence,
            self.tempo,
        ]
    }
}

/// One song of the audio-feature catalog.
#[derive(Debug, Clone)]
pub struct CatalogSong {
    pub song_id: String,
    pub song_name: String,
    pub artist_name: String,
    pub artist_id: String,
    pub features: AudioFeatures,
}

/// One row of the scraped top-songs chart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopSong {
    #[serde(rename = "songs")]
    pub song: String,
    #[serde(rename = "artists")]
    pub artist: String,
}

/// An artist as identified by the catalog API.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtistRef {
    pub id: String,
    pub name: String,
}

/// A track as identified by the catalog API.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRef {
    pub id: String,
    pub name: String,
    pub artist: String,
}

// --- Catalog API response shapes ---

/// Response structure for the client-credentials token request
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: u64,
}

/// Response structure for search?type=artist
#[derive(Debug, Deserialize)]
pub struct ArtistSearchResponse {
    pub artists: ArtistItems,
}

#[derive(Debug, Deserialize)]
pub struct ArtistItems {
    pub items: Vec<ArtistItem>,
}

/// Response structure for the related-artists endpoint
#[derive(Debug, Deserialize)]
pub struct RelatedArtistsResponse {
    pub artists: Vec<ArtistItem>,
}

#[derive(Debug, Deserialize)]
pub struct ArtistItem {
    pub id: String,
    pub name: String,
}

impl From<ArtistItem> for ArtistRef {
    fn from(item: ArtistItem) -> Self {
        ArtistRef {
            id: item.id,
            name: item.name,
        }
    }
}

/// Response structure for search?type=track
#[derive(Debug, Deserialize)]
pub struct TrackSearchResponse {
    pub tracks: TrackItems,
}

#[derive(Debug, Deserialize)]
pub struct TrackItems {
    pub items: Vec<TrackItem>,
}

/// Response structure for the artist top-tracks endpoint
#[derive(Debug, Deserialize)]
pub struct TopTracksResponse {
    pub tracks: Vec<TrackItem>,
}

#[derive(Debug, Deserialize)]
pub struct TrackItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<ArtistItem>,
}

impl From<TrackItem> for TrackRef {
    fn from(item: TrackItem) -> Self {
        let artist = item
            .artists
            .first()
            .map(|a| a.name.clone())
            .unwrap_or_else(|| "unknown".to_string());
        TrackRef {
            id: item.id,
            name: item.name,
            artist,
        }
    }
}

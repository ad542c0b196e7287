use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::client::CatalogApi;
use crate::models::{ArtistRef, AudioFeatures, CatalogSong, FEATURE_COLUMNS, TopSong};

/// Flat CSV row shape for the catalog file: name/id metadata followed by
/// the numeric feature columns in `FEATURE_COLUMNS` order.
#[derive(Debug, Serialize, Deserialize)]
struct CatalogRow {
    song_name: String,
    song_id: String,
    artist_name: String,
    artist_id: String,
    danceability: f64,
    energy: f64,
    key: f64,
    loudness: f64,
    mode: f64,
    speechiness: f64,
    acousticness: f64,
    instrumentalness: f64,
    liveness: f64,
    valence: f64,
    tempo: f64,
}

impl From<CatalogRow> for CatalogSong {
    fn from(row: CatalogRow) -> Self {
        CatalogSong {
            song_id: row.song_id,
            song_name: row.song_name,
            artist_name: row.artist_name,
            artist_id: row.artist_id,
            features: AudioFeatures {
                danceability: row.danceability,
                energy: row.energy,
                key: row.key,
                loudness: row.loudness,
                mode: row.mode,
                speechiness: row.speechiness,
                acousticness: row.acousticness,
                instrumentalness: row.instrumentalness,
                liveness: row.liveness,
                valence: row.valence,
                tempo: row.tempo,
            },
        }
    }
}

impl From<&CatalogSong> for CatalogRow {
    fn from(song: &CatalogSong) -> Self {
        let f = &song.features;
        CatalogRow {
            song_name: song.song_name.clone(),
            song_id: song.song_id.clone(),
            artist_name: song.artist_name.clone(),
            artist_id: song.artist_id.clone(),
            danceability: f.danceability,
            energy: f.energy,
            key: f.key,
            loudness: f.loudness,
            mode: f.mode,
            speechiness: f.speechiness,
            acousticness: f.acousticness,
            instrumentalness: f.instrumentalness,
            liveness: f.liveness,
            valence: f.valence,
            tempo: f.tempo,
        }
    }
}

/// Load the two-column top-songs CSV, lower-casing every field.
pub fn load_top_songs(path: impl AsRef<Path>) -> Result<Vec<TopSong>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open top-songs file {}", path.display()))?;

    let mut songs = Vec::new();
    for record in reader.deserialize() {
        let entry: TopSong = record?;
        songs.push(TopSong {
            song: entry.song.to_lowercase(),
            artist: entry.artist.to_lowercase(),
        });
    }
    debug!("loaded {} top songs from {}", songs.len(), path.display());
    Ok(songs)
}

/// Write the top-songs CSV.
pub fn save_top_songs(songs: &[TopSong], path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for song in songs {
        writer.serialize(song)?;
    }
    writer.flush()?;
    info!("wrote {} top songs to {}", songs.len(), path.display());
    Ok(())
}

/// Load the catalog CSV. Song and artist names are lower-cased, and rows
/// with a song_id already seen are dropped rather than treated as errors.
pub fn load_catalog(path: impl AsRef<Path>) -> Result<Vec<CatalogSong>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open catalog file {}", path.display()))?;

    // Catch schema drift up front rather than deep inside deserialization
    let headers = reader.headers()?.clone();
    for column in FEATURE_COLUMNS {
        anyhow::ensure!(
            headers.iter().any(|h| h == column),
            "catalog file {} is missing the '{column}' column",
            path.display()
        );
    }

    let mut seen = HashSet::new();
    let mut songs = Vec::new();
    let mut duplicates = 0usize;
    for record in reader.deserialize() {
        let row: CatalogRow = record?;
        let mut song = CatalogSong::from(row);
        if !seen.insert(song.song_id.clone()) {
            duplicates += 1;
            continue;
        }
        song.song_name = song.song_name.to_lowercase();
        song.artist_name = song.artist_name.to_lowercase();
        songs.push(song);
    }
    if duplicates > 0 {
        debug!("dropped {duplicates} duplicate catalog rows");
    }
    debug!("loaded {} catalog songs from {}", songs.len(), path.display());
    Ok(songs)
}

/// Write the catalog CSV.
pub fn save_catalog(songs: &[CatalogSong], path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for song in songs {
        writer.serialize(CatalogRow::from(song))?;
    }
    writer.flush()?;
    Ok(())
}

/// Project the catalog onto its numeric feature matrix; row order stays
/// 1:1 with the catalog for the duration of a fit/predict call.
pub fn feature_matrix(catalog: &[CatalogSong]) -> Vec<Vec<f64>> {
    catalog.iter().map(|song| song.features.to_vec()).collect()
}

/// Fixed pause after every `every` remote calls. A crude cooperative
/// throttle to stay under the API's rolling rate limit.
#[derive(Debug)]
pub struct Throttle {
    every: usize,
    pause: Duration,
    calls: usize,
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(15, Duration::from_secs(10))
    }
}

impl Throttle {
    pub fn new(every: usize, pause: Duration) -> Self {
        Self {
            every,
            pause,
            calls: 0,
        }
    }

    /// Record one remote call, sleeping when the quota is used up.
    pub fn tick(&mut self) {
        self.calls += 1;
        if self.every > 0 && self.calls % self.every == 0 {
            debug!("pausing {:?} after {} remote calls", self.pause, self.calls);
            std::thread::sleep(self.pause);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

/// Build the audio-feature catalog for the artists on the top-songs chart:
/// resolve each artist name, pull their top tracks and per-track features.
/// The catalog is saved after every artist so a dropped connection loses
/// little work.
pub fn build_catalog<C: CatalogApi>(
    client: &C,
    top_songs: &[TopSong],
    throttle: &mut Throttle,
    save_path: impl AsRef<Path>,
) -> Result<Vec<CatalogSong>> {
    let save_path = save_path.as_ref();

    let mut artist_names: Vec<&str> = top_songs.iter().map(|s| s.artist.as_str()).collect();
    artist_names.sort_unstable();
    artist_names.dedup();

    let mut artists: Vec<ArtistRef> = Vec::new();
    let mut seen_artists = HashSet::new();
    for name in artist_names {
        throttle.tick();
        match client.search_artists(name) {
            Ok(found) => {
                if found.is_empty() {
                    debug!("no catalog artist found for '{name}'");
                }
                for artist in found {
                    if seen_artists.insert(artist.id.clone()) {
                        artists.push(artist);
                    }
                }
            }
            Err(e) => {
                warn!("skipping artist '{name}': {e}");
            }
        }
    }

    let mut songs = Vec::new();
    let mut seen_songs = HashSet::new();
    for artist in &artists {
        append_artist_tracks(client, artist, throttle, &mut seen_songs, &mut songs);
        save_catalog(&songs, save_path)?;
    }

    info!("built catalog with {} songs", songs.len());
    Ok(songs)
}

/// Widen an existing catalog through related-artist lookups, then append
/// those artists' top tracks the same way `build_catalog` does.
pub fn extend_catalog<C: CatalogApi>(
    client: &C,
    mut songs: Vec<CatalogSong>,
    throttle: &mut Throttle,
    save_path: impl AsRef<Path>,
) -> Result<Vec<CatalogSong>> {
    let save_path = save_path.as_ref();

    let mut known_artists: HashSet<String> =
        songs.iter().map(|s| s.artist_id.clone()).collect();
    let mut seen_songs: HashSet<String> = songs.iter().map(|s| s.song_id.clone()).collect();

    let artist_ids: Vec<String> = known_artists.iter().cloned().collect();
    let mut new_artists: Vec<ArtistRef> = Vec::new();
    for artist_id in &artist_ids {
        throttle.tick();
        match client.related_artists(artist_id) {
            Ok(related) => {
                for artist in related {
                    if known_artists.insert(artist.id.clone()) {
                        new_artists.push(artist);
                    }
                }
            }
            Err(e) => {
                warn!("skipping related artists of '{artist_id}': {e}");
            }
        }
    }

    info!("extending catalog with {} related artists", new_artists.len());
    for artist in &new_artists {
        append_artist_tracks(client, artist, throttle, &mut seen_songs, &mut songs);
        save_catalog(&songs, save_path)?;
    }

    info!("extended catalog holds {} songs", songs.len());
    Ok(songs)
}

/// Pull one artist's top tracks with their audio features into the catalog.
/// A failed fetch skips the artist or track; it never aborts the build.
fn append_artist_tracks<C: CatalogApi>(
    client: &C,
    artist: &ArtistRef,
    throttle: &mut Throttle,
    seen_songs: &mut HashSet<String>,
    songs: &mut Vec<CatalogSong>,
) {
    throttle.tick();
    let tracks = match client.artist_top_tracks(&artist.id) {
        Ok(tracks) => tracks,
        Err(e) => {
            warn!("skipping top tracks of '{}': {e}", artist.name);
            return;
        }
    };

    let mut appended = 0usize;
    for track in tracks {
        if seen_songs.contains(&track.id) {
            continue;
        }
        throttle.tick();
        match client.audio_features(&track.id) {
            Ok(Some(features)) => {
                seen_songs.insert(track.id.clone());
                songs.push(CatalogSong {
                    song_id: track.id,
                    song_name: track.name.to_lowercase(),
                    artist_name: artist.name.to_lowercase(),
                    artist_id: artist.id.clone(),
                    features,
                });
                appended += 1;
            }
            Ok(None) => {
                debug!("no audio features for track '{}'", track.name);
            }
            Err(e) => {
                warn!("skipping track '{}': {e}", track.name);
            }
        }
    }
    if appended > 0 {
        info!("appended {appended} songs by {}", artist.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockCatalogApi;
    use crate::models::TrackRef;

    fn features(seed: f64) -> AudioFeatures {
        AudioFeatures {
            danceability: seed,
            energy: seed,
            key: 1.0,
            loudness: -6.0,
            mode: 1.0,
            speechiness: 0.05,
            acousticness: 0.2,
            instrumentalness: 0.0,
            liveness: 0.1,
            valence: seed,
            tempo: 100.0 + seed,
        }
    }

    fn catalog_song(id: &str, name: &str) -> CatalogSong {
        CatalogSong {
            song_id: id.to_string(),
            song_name: name.to_string(),
            artist_name: "Artist".to_string(),
            artist_id: "a1".to_string(),
            features: features(0.5),
        }
    }

    #[test]
    fn catalog_round_trips_through_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.csv");
        let songs = vec![catalog_song("s1", "First Song"), catalog_song("s2", "Second")];

        save_catalog(&songs, &path).unwrap();
        let loaded = load_catalog(&path).unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].song_id, "s1");
        // Names are normalized to lower case at ingestion
        assert_eq!(loaded[0].song_name, "first song");
        assert_eq!(loaded[0].artist_name, "artist");
        assert_eq!(loaded[0].features, songs[0].features);
    }

    #[test]
    fn duplicate_song_ids_are_dropped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.csv");
        let songs = vec![
            catalog_song("s1", "First"),
            catalog_song("s1", "First Again"),
            catalog_song("s2", "Second"),
        ];

        save_catalog(&songs, &path).unwrap();
        let loaded = load_catalog(&path).unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].song_name, "first");
    }

    #[test]
    fn top_songs_are_lowercased_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("top.csv");
        let songs = vec![TopSong {
            song: "Yesterday".to_string(),
            artist: "The Beatles".to_string(),
        }];

        save_top_songs(&songs, &path).unwrap();
        let loaded = load_top_songs(&path).unwrap();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].song, "yesterday");
        assert_eq!(loaded[0].artist, "the beatles");
    }

    #[test]
    fn throttle_counts_remote_calls() {
        let mut throttle = Throttle::new(2, Duration::ZERO);
        for _ in 0..5 {
            throttle.tick();
        }
        assert_eq!(throttle.calls(), 5);
    }

    #[test]
    fn build_catalog_collects_top_tracks_with_features() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.csv");

        let mut client = MockCatalogApi::new();
        client.expect_search_artists().returning(|name| {
            Ok(vec![ArtistRef {
                id: format!("id-{name}"),
                name: name.to_string(),
            }])
        });
        client.expect_artist_top_tracks().returning(|artist_id| {
            Ok(vec![
                TrackRef {
                    id: format!("{artist_id}-t1"),
                    name: "Track One".to_string(),
                    artist: "whoever".to_string(),
                },
                TrackRef {
                    id: format!("{artist_id}-t2"),
                    name: "Track Two".to_string(),
                    artist: "whoever".to_string(),
                },
            ])
        });
        client
            .expect_audio_features()
            .returning(|_| Ok(Some(features(0.3))));

        let top = vec![
            TopSong {
                song: "yesterday".to_string(),
                artist: "the beatles".to_string(),
            },
            TopSong {
                song: "hey jude".to_string(),
                artist: "the beatles".to_string(),
            },
        ];

        let mut throttle = Throttle::new(0, Duration::ZERO);
        let songs = build_catalog(&client, &top, &mut throttle, &path).unwrap();

        // One artist, two tracks, lower-cased names
        assert_eq!(songs.len(), 2);
        assert!(songs.iter().all(|s| s.artist_name == "the beatles"));
        assert!(songs.iter().all(|s| s.song_name.starts_with("track")));
        assert!(path.exists());
    }

    #[test]
    fn build_catalog_skips_tracks_without_features() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.csv");

        let mut client = MockCatalogApi::new();
        client.expect_search_artists().returning(|name| {
            Ok(vec![ArtistRef {
                id: "a1".to_string(),
                name: name.to_string(),
            }])
        });
        client.expect_artist_top_tracks().returning(|_| {
            Ok(vec![
                TrackRef {
                    id: "t1".to_string(),
                    name: "Has Features".to_string(),
                    artist: "x".to_string(),
                },
                TrackRef {
                    id: "t2".to_string(),
                    name: "No Features".to_string(),
                    artist: "x".to_string(),
                },
            ])
        });
        client.expect_audio_features().returning(|track_id| {
            if track_id == "t1" {
                Ok(Some(features(0.7)))
            } else {
                Ok(None)
            }
        });

        let top = vec![TopSong {
            song: "something".to_string(),
            artist: "someone".to_string(),
        }];

        let mut throttle = Throttle::new(0, Duration::ZERO);
        let songs = build_catalog(&client, &top, &mut throttle, &path).unwrap();

        assert_eq!(songs.len(), 1);
        assert_eq!(songs[0].song_id, "t1");
    }

    #[test]
    fn extend_catalog_adds_related_artists_without_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.csv");

        let mut client = MockCatalogApi::new();
        client.expect_related_artists().returning(|_| {
            Ok(vec![
                ArtistRef {
                    id: "a1".to_string(), // already known
                    name: "Artist".to_string(),
                },
                ArtistRef {
                    id: "a2".to_string(),
                    name: "New Artist".to_string(),
                },
            ])
        });
        client.expect_artist_top_tracks().returning(|artist_id| {
            assert_eq!(artist_id, "a2");
            Ok(vec![TrackRef {
                id: "t9".to_string(),
                name: "Fresh Track".to_string(),
                artist: "New Artist".to_string(),
            }])
        });
        client
            .expect_audio_features()
            .returning(|_| Ok(Some(features(0.9))));

        let base = vec![catalog_song("s1", "existing")];
        let mut throttle = Throttle::new(0, Duration::ZERO);
        let songs = extend_catalog(&client, base, &mut throttle, &path).unwrap();

        assert_eq!(songs.len(), 2);
        assert!(songs.iter().any(|s| s.song_id == "t9"));
    }
}

use std::io::{BufRead, Write};

use log::debug;
use rand::seq::SliceRandom;

use crate::client::CatalogApi;
use crate::cluster::SongModel;
use crate::dataset;
use crate::errors::RecommendError;
use crate::matching::find_matches;
use crate::models::{CatalogSong, TopSong, TrackRef};

/// How many times an out-of-range or non-numeric selection is re-prompted
/// before the attempt is abandoned.
pub const MAX_SELECTION_ATTEMPTS: usize = 5;

/// Helper trait for string formatting
pub trait ToTitleCase {
    fn to_title_case(&self) -> String;
}

impl ToTitleCase for str {
    fn to_title_case(&self) -> String {
        self.split_whitespace()
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    None => String::new(),
                    Some(first) => {
                        first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                    }
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// What the search stages resolved the query to.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// The song is on the top-songs chart; recommend another charted song.
    TopSong { name: String },
    /// The song maps to a catalog track id; recommend from its cluster.
    Track { track_id: String },
}

/// A recommendation produced for the user.
#[derive(Debug, Clone, PartialEq)]
pub enum Recommendation {
    Top {
        song: String,
        artist: String,
    },
    Cluster {
        track_id: String,
        song: String,
        artist: String,
    },
}

/// Resolves a user query to a song and serves recommendations, either from
/// the top-songs chart or from the cluster of acoustically similar catalog
/// tracks. Cluster assignments are derived per run by predicting over the
/// catalog; the persisted model is the only ground truth.
pub struct Recommender<'a, C: CatalogApi> {
    top_songs: &'a [TopSong],
    catalog: &'a [CatalogSong],
    model: &'a SongModel,
    client: &'a C,
    assignments: Vec<usize>,
}

impl<'a, C: CatalogApi> Recommender<'a, C> {
    pub fn new(
        top_songs: &'a [TopSong],
        catalog: &'a [CatalogSong],
        model: &'a SongModel,
        client: &'a C,
    ) -> Self {
        let matrix = dataset::feature_matrix(catalog);
        let assignments = model.predict_matrix(&matrix);
        Self {
            top_songs,
            catalog,
            model,
            client,
            assignments,
        }
    }

    /// Walk the search stages for a query: top-songs chart first, then the
    /// catalog, then the external API, disambiguating through the menu
    /// wherever more than one candidate remains. `NotFound` means every
    /// stage came up empty.
    pub fn resolve<R: BufRead, W: Write>(
        &self,
        query: &str,
        input: &mut R,
        output: &mut W,
    ) -> Result<Resolved, RecommendError> {
        let query = query.to_lowercase();

        // 1. Top-songs chart
        let top_matches = find_matches(&query, self.top_songs.iter().map(|s| s.song.as_str()));
        match top_matches.len() {
            0 => {}
            1 => {
                debug!("'{query}' matched top song '{}'", top_matches[0]);
                return Ok(Resolved::TopSong {
                    name: top_matches[0].clone(),
                });
            }
            _ => {
                let chosen =
                    choose_option(&top_matches, |name| name.to_title_case(), input, output)?;
                return Ok(Resolved::TopSong {
                    name: chosen.clone(),
                });
            }
        }

        // 2. Catalog, by song name; the best-matching name may cover
        // several distinct tracks
        let catalog_matches =
            find_matches(&query, self.catalog.iter().map(|s| s.song_name.as_str()));
        if let Some(best_name) = catalog_matches.first() {
            let candidates: Vec<&CatalogSong> = self
                .catalog
                .iter()
                .filter(|s| s.song_name == *best_name)
                .collect();
            debug!(
                "'{query}' matched catalog name '{best_name}' ({} tracks)",
                candidates.len()
            );
            let chosen = if candidates.len() == 1 {
                candidates[0]
            } else {
                *choose_option(
                    &candidates,
                    |song| {
                        format!(
                            "{} by {}",
                            song.song_name.to_title_case(),
                            song.artist_name.to_title_case()
                        )
                    },
                    input,
                    output,
                )?
            };
            return Ok(Resolved::Track {
                track_id: chosen.song_id.clone(),
            });
        }

        // 3. External catalog search
        let external = self.client.search_tracks(&query)?;
        if external.is_empty() {
            return Err(RecommendError::NotFound(query));
        }
        // Menu entries use the catalog's authoritative display info,
        // falling back to the search result when the lookup comes up empty
        let mut labeled: Vec<(TrackRef, String)> = Vec::new();
        for track in external {
            let info = self
                .client
                .track_info(&track.id)?
                .unwrap_or_else(|| track.clone());
            let label = format!("{} by {}", info.name, info.artist);
            labeled.push((track, label));
        }
        let chosen = choose_option(&labeled, |(_, label)| label.clone(), input, output)?;
        Ok(Resolved::Track {
            track_id: chosen.0.id.clone(),
        })
    }

    /// Serve one recommendation for a resolved song.
    pub fn recommend(&self, resolved: &Resolved) -> Result<Recommendation, RecommendError> {
        match resolved {
            Resolved::TopSong { name } => self.recommend_top(name),
            Resolved::Track { track_id } => self.recommend_from_cluster(track_id),
        }
    }

    /// Uniformly random charted song whose name differs from the query.
    fn recommend_top(&self, name: &str) -> Result<Recommendation, RecommendError> {
        let candidates: Vec<&TopSong> = self
            .top_songs
            .iter()
            .filter(|s| s.song != name)
            .collect();
        let chosen = candidates
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| RecommendError::NotFound(name.to_string()))?;
        Ok(Recommendation::Top {
            song: chosen.song.clone(),
            artist: chosen.artist.clone(),
        })
    }

    /// Uniformly random catalog song from the query song's cluster. Only
    /// the same-cluster subset is sampled; picking the query song itself
    /// is acceptable, and a single-member cluster returns that one song.
    fn recommend_from_cluster(&self, track_id: &str) -> Result<Recommendation, RecommendError> {
        let label = match self.catalog.iter().position(|s| s.song_id == track_id) {
            Some(index) => self.assignments[index],
            None => {
                debug!("track '{track_id}' not in catalog; fetching features");
                let features = self
                    .client
                    .audio_features(track_id)?
                    .ok_or_else(|| RecommendError::NotFound(track_id.to_string()))?;
                self.model.predict(&features)
            }
        };

        let members: Vec<usize> = self
            .assignments
            .iter()
            .enumerate()
            .filter(|&(_, &l)| l == label)
            .map(|(i, _)| i)
            .collect();
        let chosen = members
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| RecommendError::NotFound(track_id.to_string()))?;

        let song = &self.catalog[*chosen];
        Ok(Recommendation::Cluster {
            track_id: song.song_id.clone(),
            song: song.song_name.clone(),
            artist: song.artist_name.clone(),
        })
    }
}

/// Present a numbered menu and return the chosen option. The selection is
/// re-validated up to [`MAX_SELECTION_ATTEMPTS`] times, then the attempt
/// fails with a typed error instead of looping forever.
fn choose_option<'t, T, R, W, F>(
    options: &'t [T],
    render: F,
    input: &mut R,
    output: &mut W,
) -> Result<&'t T, RecommendError>
where
    R: BufRead,
    W: Write,
    F: Fn(&T) -> String,
{
    writeln!(output, "Select one of the following choices:")?;
    for (index, option) in options.iter().enumerate() {
        writeln!(output, "Option {} - {}", index + 1, render(option))?;
    }

    let index = prompt_selection(options.len(), input, output)?;
    Ok(&options[index])
}

/// Read a 1-based selection in `1..=n_options` from the input, re-prompting
/// on invalid input up to the attempt budget.
fn prompt_selection<R: BufRead, W: Write>(
    n_options: usize,
    input: &mut R,
    output: &mut W,
) -> Result<usize, RecommendError> {
    for _ in 0..MAX_SELECTION_ATTEMPTS {
        write!(output, "Selection: ")?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            // Input exhausted; no point re-prompting
            break;
        }
        if let Ok(selection) = line.trim().parse::<usize>() {
            if (1..=n_options).contains(&selection) {
                return Ok(selection - 1);
            }
        }
        writeln!(output, "Please enter a number between 1 and {n_options}.")?;
    }
    Err(RecommendError::InvalidSelection {
        attempts: MAX_SELECTION_ATTEMPTS,
    })
}

use std::io::{BufRead, Write};
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;

mod chart;
mod client;
mod cluster;
mod config;
mod dataset;
mod errors;
mod matching;
mod models;
mod recommender;


use crate::client::HttpCatalogClient;
use crate::cluster::{KMeans, ModelStore, SongModel, Standardizer};
use crate::config::load_config;
use crate::dataset::Throttle;
use crate::errors::RecommendError;
use crate::recommender::{Recommendation, Recommender, Resolved, ToTitleCase};

#[derive(Parser)]
#[command(name = "song-recommender")]
#[command(about = "Song recommendations from clustered audio features")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape the public song charts into the top-songs CSV
    Chart {
        /// Where to write the scraped chart
        #[arg(long, default_value = "top_songs.csv")]
        top_songs: String,
    },
    /// Build the audio-feature catalog for the charted artists
    Dataset {
        #[arg(long, default_value = "top_songs.csv")]
        top_songs: String,
        #[arg(long, default_value = "catalog_songs.csv")]
        catalog: String,
        /// Also pull top tracks from artists related to the charted ones
        #[arg(long)]
        extend: bool,
        /// Seconds to pause after every 15 remote calls
        #[arg(long, default_value_t = 10)]
        pause: u64,
    },
    /// Fit the clustering model on the catalog and persist it
    Fit {
        #[arg(long, default_value = "catalog_songs.csv")]
        catalog: String,
        #[arg(long, default_value = "music_model.json")]
        model: String,
        #[arg(long, default_value = "model_log.txt")]
        model_log: String,
        /// Number of clusters to partition the catalog into
        #[arg(short = 'k', long, default_value_t = 20)]
        clusters: usize,
        /// Number of random restarts; the lowest-inertia fit wins
        #[arg(long, default_value_t = 4)]
        n_init: usize,
    },
    /// Recommend songs similar to one you like
    Recommend {
        #[arg(long, default_value = "top_songs.csv")]
        top_songs: String,
        #[arg(long, default_value = "catalog_songs.csv")]
        catalog: String,
        #[arg(long, default_value = "music_model.json")]
        model: String,
        #[arg(long, default_value = "model_log.txt")]
        model_log: String,
        /// How many recommendations to draw from a cluster
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,
        /// Song name; prompted for interactively when omitted
        #[arg(short, long)]
        query: Option<String>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Command::Chart { top_songs } => run_chart(&top_songs),
        Command::Dataset {
            top_songs,
            catalog,
            extend,
            pause,
        } => run_dataset(&top_songs, &catalog, extend, pause),
        Command::Fit {
            catalog,
            model,
            model_log,
            clusters,
            n_init,
        } => run_fit(&catalog, &model, &model_log, clusters, n_init),
        Command::Recommend {
            top_songs,
            catalog,
            model,
            model_log,
            count,
            query,
        } => run_recommend(&top_songs, &catalog, &model, &model_log, count, query),
    }
}

fn run_chart(top_songs_path: &str) -> Result<()> {
    println!("Scraping song charts...");
    let agent = ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(15))
        .build();
    let songs = chart::scrape_top_songs(&agent)?;
    dataset::save_top_songs(&songs, top_songs_path)?;
    println!("Wrote {} charted songs to {top_songs_path}", songs.len());
    Ok(())
}

fn run_dataset(top_songs_path: &str, catalog_path: &str, extend: bool, pause: u64) -> Result<()> {
    let config = load_config()?;
    let client = HttpCatalogClient::new(config);
    let mut throttle = Throttle::new(15, Duration::from_secs(pause));

    let songs = if std::path::Path::new(catalog_path).exists() {
        println!("Using existing catalog at {catalog_path}");
        dataset::load_catalog(catalog_path)?
    } else {
        let top_songs = dataset::load_top_songs(top_songs_path)?;
        println!(
            "Building catalog for {} charted songs...",
            top_songs.len()
        );
        dataset::build_catalog(&client, &top_songs, &mut throttle, catalog_path)?
    };

    let songs = if extend {
        println!("Extending catalog through related artists...");
        dataset::extend_catalog(&client, songs, &mut throttle, catalog_path)?
    } else {
        songs
    };

    println!(
        "Catalog at {catalog_path} holds {} songs ({} remote calls made).",
        songs.len(),
        throttle.calls()
    );
    Ok(())
}

fn run_fit(
    catalog_path: &str,
    model_path: &str,
    log_path: &str,
    clusters: usize,
    n_init: usize,
) -> Result<()> {
    let catalog = dataset::load_catalog(catalog_path)?;
    println!("Loaded {} catalog songs.", catalog.len());

    let matrix = dataset::feature_matrix(&catalog);
    let scaler = Standardizer::fit(&matrix)?;
    let standardized = scaler.transform(&matrix);

    let kmeans = KMeans {
        n_clusters: clusters,
        n_init,
        ..KMeans::default()
    };

    println!("Initiating fit...");
    let started = Instant::now();
    let fit = kmeans.fit(&standardized, &mut rand::thread_rng())?;
    let elapsed = started.elapsed();
    println!("Fit ended in {:.3} seconds.", elapsed.as_secs_f64());
    println!(
        "Results for KMeans(k={clusters}): inertia = {:.2}; fit_time = {:.3}",
        fit.model.inertia,
        elapsed.as_secs_f64()
    );

    let store = ModelStore::new(model_path, log_path);
    store.save(&SongModel {
        scaler,
        kmeans: fit.model,
    })?;
    println!("Model saved to {model_path}");
    Ok(())
}

fn run_recommend(
    top_songs_path: &str,
    catalog_path: &str,
    model_path: &str,
    log_path: &str,
    count: usize,
    query: Option<String>,
) -> Result<()> {
    let config = load_config()?;
    let client = HttpCatalogClient::new(config);

    let top_songs = dataset::load_top_songs(top_songs_path)?;
    let catalog = dataset::load_catalog(catalog_path)?;

    // A missing or unreadable model is fatal here: there is nothing to
    // recommend from without one.
    let store = ModelStore::new(model_path, log_path);
    let model = store.load()?;

    let recommender = Recommender::new(&top_songs, &catalog, &model, &client);

    let query = match query {
        Some(query) => query,
        None => {
            print!("Please insert the name of the song that you like: ");
            std::io::stdout().flush()?;
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            line.trim().to_string()
        }
    };
    info!("resolving query '{query}'");

    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut output = std::io::stdout();

    let resolved = match recommender.resolve(&query, &mut input, &mut output) {
        Ok(resolved) => resolved,
        Err(RecommendError::NotFound(_)) => {
            println!("Sorry, we didn't find any matches for '{query}'.");
            return Ok(());
        }
        Err(RecommendError::ExternalService(message)) => {
            // An unreachable API should not crash the session
            eprintln!("The music catalog could not be reached: {message}");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    // The top-songs strategy yields one recommendation; a cluster has
    // enough internal variety to sample repeatedly.
    let draws = match &resolved {
        Resolved::TopSong { .. } => 1,
        Resolved::Track { .. } => count,
    };

    for _ in 0..draws {
        match recommender.recommend(&resolved) {
            Ok(Recommendation::Top { song, artist }) => {
                println!(
                    "TOP recommendation! A similar song to {} that you might like is {}, by {}.",
                    query.to_title_case(),
                    song.to_title_case(),
                    artist.to_title_case()
                );
            }
            Ok(Recommendation::Cluster { song, artist, .. }) => {
                println!(
                    "Recommendation! A song you might like is {}, by {}!",
                    song.to_title_case(),
                    artist.to_title_case()
                );
            }
            Err(RecommendError::NotFound(name)) => {
                println!("Sorry, we have nothing else to recommend for '{name}'.");
                return Ok(());
            }
            Err(RecommendError::ExternalService(message)) => {
                // An unreachable API should not crash the session
                eprintln!("The music catalog could not be reached: {message}");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}

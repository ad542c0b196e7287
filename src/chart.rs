use anyhow::{Result, anyhow};
use log::{info, warn};
use scraper::{Html, Selector};
use ureq::Agent;

use crate::models::TopSong;

const HOT_CHART_URL: &str = "https://www.billboard.com/charts/hot-100";
const VORTEX_CHART_URL: &str = "http://www.popvortex.com/music/charts/top-100-songs.php";

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("invalid selector '{css}': {e:?}"))
}

/// Parse the hot-100 chart page: each entry is a `chart-element__information`
/// span wrapping one song span and one artist span.
pub fn parse_hot_chart(html: &str) -> Result<Vec<TopSong>> {
    let document = Html::parse_document(html);
    let entry_sel = selector("span.chart-element__information")?;
    let song_sel = selector("span.chart-element__information__song")?;
    let artist_sel = selector("span.chart-element__information__artist")?;

    let mut songs = Vec::new();
    for entry in document.select(&entry_sel) {
        let song = entry.select(&song_sel).next();
        let artist = entry.select(&artist_sel).next();
        if let (Some(song), Some(artist)) = (song, artist) {
            songs.push(TopSong {
                song: song.text().collect::<String>().trim().to_string(),
                artist: artist.text().collect::<String>().trim().to_string(),
            });
        }
    }
    Ok(songs)
}

/// Parse the top-100 chart page: each entry is a `title-artist` paragraph
/// holding the track in a `cite` tag and the artist in an `em` tag.
pub fn parse_vortex_chart(html: &str) -> Result<Vec<TopSong>> {
    let document = Html::parse_document(html);
    let entry_sel = selector("p.title-artist")?;
    let track_sel = selector("cite")?;
    let artist_sel = selector("em")?;

    let mut songs = Vec::new();
    for entry in document.select(&entry_sel) {
        let track = entry.select(&track_sel).next();
        let artist = entry.select(&artist_sel).next();
        if let (Some(track), Some(artist)) = (track, artist) {
            songs.push(TopSong {
                song: track.text().collect::<String>().trim().to_string(),
                artist: artist.text().collect::<String>().trim().to_string(),
            });
        }
    }
    Ok(songs)
}

fn fetch_page(agent: &Agent, url: &str) -> Result<String> {
    let response = agent
        .get(url)
        .call()
        .map_err(|e| anyhow!("failed to download {url}: {e}"))?;
    Ok(response.into_string()?)
}

/// Download both chart pages and merge their entries, dropping duplicate
/// song names.
pub fn scrape_top_songs(agent: &Agent) -> Result<Vec<TopSong>> {
    type ChartParser = fn(&str) -> Result<Vec<TopSong>>;
    let sources: [(&str, ChartParser); 2] = [
        (HOT_CHART_URL, parse_hot_chart),
        (VORTEX_CHART_URL, parse_vortex_chart),
    ];

    let mut songs = Vec::new();
    for (url, parse) in sources {
        let page = fetch_page(agent, url)?;
        let parsed = parse(&page)?;
        if parsed.is_empty() {
            warn!("no chart entries found at {url}; the page layout may have changed");
        } else {
            info!("scraped {} entries from {url}", parsed.len());
        }
        songs.extend(parsed);
    }

    let mut seen = std::collections::HashSet::new();
    songs.retain(|entry| seen.insert(entry.song.to_lowercase()));
    Ok(songs)
}

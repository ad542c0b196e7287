use std::cell::RefCell;
use std::time::{Duration, Instant};

use log::debug;
use ureq::Agent;
use urlencoding::encode;

use crate::config::Config;
use crate::errors::RecommendError;
use crate::models::{
    ArtistRef, ArtistSearchResponse, AudioFeatures, RelatedArtistsResponse, TokenResponse,
    TrackRef, TrackSearchResponse, TopTracksResponse,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Refresh the token this long before it actually expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// The catalog API operations the recommender consumes. "Not found" is an
/// empty list or `None`, distinct from a transport failure.
#[cfg_attr(test, mockall::automock)]
pub trait CatalogApi {
    /// Search artists by name.
    fn search_artists(&self, name: &str) -> Result<Vec<ArtistRef>, RecommendError>;

    /// Search tracks by name.
    fn search_tracks(&self, name: &str) -> Result<Vec<TrackRef>, RecommendError>;

    /// Fetch an artist's most popular tracks.
    fn artist_top_tracks(&self, artist_id: &str) -> Result<Vec<TrackRef>, RecommendError>;

    /// Fetch artists similar to the given one.
    fn related_artists(&self, artist_id: &str) -> Result<Vec<ArtistRef>, RecommendError>;

    /// Fetch a track's audio features.
    fn audio_features(&self, track_id: &str) -> Result<Option<AudioFeatures>, RecommendError>;

    /// Fetch a track's display name and artist.
    fn track_info(&self, track_id: &str) -> Result<Option<TrackRef>, RecommendError>;
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// A catalog API client using client-credentials bearer authentication
pub struct HttpCatalogClient {
    agent: Agent,
    api_base_url: String,
    auth_url: String,
    client_id: String,
    client_secret: String,
    // Single-threaded process; interior mutability keeps the trait &self
    token: RefCell<Option<CachedToken>>,
}

impl HttpCatalogClient {
    /// Create a new client with configuration from environment
    pub fn new(config: Config) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();

        HttpCatalogClient {
            agent,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            auth_url: config.auth_url,
            client_id: config.client_id,
            client_secret: config.client_secret,
            token: RefCell::new(None),
        }
    }

    /// Return a valid bearer token, requesting a fresh one when the cached
    /// token is absent or about to expire.
    fn bearer_token(&self) -> Result<String, RecommendError> {
        if let Some(cached) = self.token.borrow().as_ref() {
            if cached.expires_at > Instant::now() + TOKEN_EXPIRY_MARGIN {
                return Ok(cached.access_token.clone());
            }
        }

        debug!("requesting a fresh access token");
        let response = self
            .agent
            .post(&self.auth_url)
            .send_form(&[
                ("grant_type", "client_credentials"),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
            ])
            .map_err(|e| RecommendError::external("token request failed", e))?;

        let parsed: TokenResponse = response
            .into_json()
            .map_err(|e| RecommendError::external("token response was malformed", e))?;

        let token = parsed.access_token.clone();
        *self.token.borrow_mut() = Some(CachedToken {
            access_token: parsed.access_token,
            expires_at: Instant::now() + Duration::from_secs(parsed.expires_in),
        });
        Ok(token)
    }

    /// GET a JSON endpoint with bearer auth. A 404 becomes `None`; any
    /// other failure is an `ExternalService` error.
    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<Option<T>, RecommendError> {
        let token = self.bearer_token()?;
        let response = self
            .agent
            .get(url)
            .set("Authorization", &format!("Bearer {token}"))
            .call();

        let response = match response {
            Ok(response) => response,
            Err(ureq::Error::Status(404, _)) => return Ok(None),
            Err(e) => return Err(RecommendError::external("request failed", e)),
        };

        let parsed = response
            .into_json()
            .map_err(|e| RecommendError::external("response was malformed", e))?;
        Ok(Some(parsed))
    }
}

impl CatalogApi for HttpCatalogClient {
    fn search_artists(&self, name: &str) -> Result<Vec<ArtistRef>, RecommendError> {
        let url = format!(
            "{}/search?q={}&type=artist",
            self.api_base_url,
            encode(&format!("artist: {name}"))
        );
        let parsed: Option<ArtistSearchResponse> = self.get_json(&url)?;
        Ok(parsed
            .map(|r| r.artists.items.into_iter().map(ArtistRef::from).collect())
            .unwrap_or_default())
    }

    fn search_tracks(&self, name: &str) -> Result<Vec<TrackRef>, RecommendError> {
        let url = format!(
            "{}/search?q={}&type=track",
            self.api_base_url,
            encode(&format!("track: {name}"))
        );
        let parsed: Option<TrackSearchResponse> = self.get_json(&url)?;
        Ok(parsed
            .map(|r| r.tracks.items.into_iter().map(TrackRef::from).collect())
            .unwrap_or_default())
    }

    fn artist_top_tracks(&self, artist_id: &str) -> Result<Vec<TrackRef>, RecommendError> {
        let url = format!(
            "{}/artists/{}/top-tracks?market=US",
            self.api_base_url,
            encode(artist_id)
        );
        let parsed: Option<TopTracksResponse> = self.get_json(&url)?;
        Ok(parsed
            .map(|r| r.tracks.into_iter().map(TrackRef::from).collect())
            .unwrap_or_default())
    }

    fn related_artists(&self, artist_id: &str) -> Result<Vec<ArtistRef>, RecommendError> {
        let url = format!(
            "{}/artists/{}/related-artists",
            self.api_base_url,
            encode(artist_id)
        );
        let parsed: Option<RelatedArtistsResponse> = self.get_json(&url)?;
        Ok(parsed
            .map(|r| r.artists.into_iter().map(ArtistRef::from).collect())
            .unwrap_or_default())
    }

    fn audio_features(&self, track_id: &str) -> Result<Option<AudioFeatures>, RecommendError> {
        let url = format!(
            "{}/audio-features/{}",
            self.api_base_url,
            encode(track_id)
        );
        self.get_json(&url)
    }

    fn track_info(&self, track_id: &str) -> Result<Option<TrackRef>, RecommendError> {
        let url = format!("{}/tracks/{}", self.api_base_url, encode(track_id));
        let parsed: Option<crate::models::TrackItem> = self.get_json(&url)?;
        Ok(parsed.map(TrackRef::from))
    }
}

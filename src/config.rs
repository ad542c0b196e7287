use anyhow::{Context, Result};

/// Configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub auth_url: String,
    pub client_id: String,
    pub client_secret: String,
}

const DEFAULT_API_BASE_URL: &str = "https://api.spotify.com/v1";
const DEFAULT_AUTH_URL: &str = "https://accounts.spotify.com/api/token";

/// Load configuration from `.env` and environment
pub fn load_config() -> Result<Config> {
    // Load `.env` file if present
    dotenv::dotenv().ok();
    // Read variables; only the credentials are mandatory
    let client_id = std::env::var("CLIENT_ID").context("CLIENT_ID is not set")?;
    let client_secret = std::env::var("CLIENT_SECRET").context("CLIENT_SECRET is not set")?;
    let api_base_url =
        std::env::var("API_BASE_URL").unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string());
    let auth_url = std::env::var("AUTH_URL").unwrap_or_else(|_| DEFAULT_AUTH_URL.to_string());
    Ok(Config {
        api_base_url,
        auth_url,
        client_id,
        client_secret,
    })
}

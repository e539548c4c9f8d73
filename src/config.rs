use anyhow::{Context, Result};
use std::env;

pub const DEFAULT_DB_PATH: &str = "data/crawler.db";
const DEFAULT_SESSION_FILE: &str = "crawler.session";
const DEFAULT_HASH_SIZE: usize = 16;

/// Runtime configuration, read from the environment (a .env file is loaded
/// in main before this runs).
pub struct Config {
    pub api_id: Option<i32>,
    pub api_hash: Option<String>,
    pub db_path: String,
    pub session_file: String,
    /// Truncation length of the hex-encoded SHA-256 message content hash.
    pub hash_size: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let api_id = match env::var("TG_ID") {
            Ok(value) => Some(
                value
                    .parse()
                    .context("TG_ID must be an integer (your Telegram API ID)")?,
            ),
            Err(_) => None,
        };
        let api_hash = env::var("TG_HASH").ok();
        let db_path = env::var("CRAWLER_DB").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
        let session_file =
            env::var("CRAWLER_SESSION").unwrap_or_else(|_| DEFAULT_SESSION_FILE.to_string());
        let hash_size = match env::var("HASH_SIZE") {
            Ok(value) => value.parse().context("HASH_SIZE must be an integer")?,
            Err(_) => DEFAULT_HASH_SIZE,
        };
        Ok(Self {
            api_id,
            api_hash,
            db_path,
            session_file,
            hash_size,
        })
    }

    /// Telegram API credentials, required only by commands that go online.
    pub fn telegram_credentials(&self) -> Result<(i32, &str)> {
        let api_id = self
            .api_id
            .context("TG_ID must be set to your Telegram API ID (see https://core.telegram.org/api/obtaining_api_id)")?;
        let api_hash = self
            .api_hash
            .as_deref()
            .context("TG_HASH must be set to your Telegram API hash")?;
        Ok((api_id, api_hash))
    }
}

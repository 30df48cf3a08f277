//! Process configuration, read once from the environment at startup.
//!
//! Credential material arrives as JSON blobs in env vars (the format
//! Google's OAuth tooling writes), so deployment needs nothing on disk
//! beyond an optional .env file.

use std::env;

use anyhow::{bail, Context};
use chrono_tz::Tz;

use crate::google_api::{ClientCredentials, GoogleToken};

/// Fallback reference timezone when BOT_TZ is unset.
const DEFAULT_TZ: &str = "Asia/Kolkata";
/// Well-known id of the user's main calendar.
const DEFAULT_CALENDAR_ID: &str = "primary";

pub struct Settings {
    pub telegram_token: String,
    pub gemini_api_key: String,
    /// Reference timezone used to interpret and render all timestamps that
    /// lack an explicit offset.
    pub tz: Tz,
    pub calendar_id: String,
    pub credentials: ClientCredentials,
    pub token: GoogleToken,
}

impl Settings {
    /// Load settings from the environment (after dotenv), failing fast on
    /// anything missing or malformed.
    pub fn from_env() -> anyhow::Result<Self> {
        let telegram_token = require("TELEGRAM_TOKEN")?;
        let gemini_api_key = require("GEMINI_API_KEY")?;

        let tz_name = env::var("BOT_TZ").unwrap_or_else(|_| DEFAULT_TZ.to_string());
        let tz: Tz = tz_name
            .parse()
            .map_err(|_| anyhow::anyhow!("BOT_TZ is not a valid IANA timezone: {tz_name}"))?;

        let calendar_id =
            env::var("CALENDAR_ID").unwrap_or_else(|_| DEFAULT_CALENDAR_ID.to_string());

        let credentials: ClientCredentials = parse_json_env("GOOGLE_CREDENTIALS")?;
        let token: GoogleToken = parse_json_env("GOOGLE_TOKEN")?;

        Ok(Self {
            telegram_token,
            gemini_api_key,
            tz,
            calendar_id,
            credentials,
            token,
        })
    }
}

fn require(key: &str) -> anyhow::Result<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => bail!("missing {key} in environment"),
    }
}

fn parse_json_env<T: serde::de::DeserializeOwned>(key: &str) -> anyhow::Result<T> {
    let raw = require(key)?;
    serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {key}"))
}

//! Gemini `generateContent` client, the natural-language-to-command
//! translator.
//!
//! The service is treated as a non-deterministic oracle: it is asked for a
//! single minified-JSON candidate with deterministic decoding, and everything
//! it returns is re-validated downstream (see `command::normalize`). Every
//! failure mode here (transport error, non-2xx status, empty candidates,
//! unparsable text) collapses to `None` so the message loop never crashes on
//! a bad translation.

pub mod extract;

use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::timeutil;

const GEMINI_MODEL: &str = "gemini-2.5-flash";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

const SYSTEM_INSTRUCTION: &str = r#"You are a scheduling tool. Convert natural language into a JSON command for a calendar.

Return a single JSON object, no markdown and no commentary, with these fields:
- "intent": one of "create", "list", "delete", "modify", "list_calendars", "create_calendar", "delete_calendar"
- "summary": short plain-text event title (create/delete/modify)
- "new_summary": replacement title (modify only, when the user renames an event)
- "start", "end": ISO 8601 datetimes in the user's timezone
- "starting_from": ISO 8601 lower bound for list/delete searches
- "max_results": integer, list only
- "calendar_name": calendar display name (calendar management intents only)

Rules:
- Scheduling or adding something is "create". Viewing or checking is "list". Cancelling or removing an event is "delete". Changing an existing event is "modify".
- Resolve relative dates ("tomorrow", "next friday", "in two hours") against NOW_ISO in NOW_TZ.
- Omit any field you cannot determine. Never invent times.
- Deleting a whole calendar is destructive; the chat layer asks the user to confirm, you just emit the delete_calendar command.
- Respond with ONLY the JSON object."#;

/// The unvalidated object returned by the translator. May be missing required
/// fields or carry extras; discarded after normalization.
pub type RawTranslation = serde_json::Map<String, Value>;

// ============================================================================
// Wire types
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    system_instruction: Content,
    generation_config: GenerationConfig,
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    candidate_count: u32,
    response_mime_type: &'static str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

// ============================================================================
// Client
// ============================================================================

pub struct GeminiTranslator {
    client: reqwest::Client,
    api_key: String,
}

impl GeminiTranslator {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }

    /// Translate free text into a raw structured command.
    ///
    /// Never propagates an error: any transport or parse failure is logged and
    /// collapses to `None`, which the caller reports as a generic
    /// couldn't-understand reply.
    pub async fn translate(&self, user_text: &str, tz: Tz) -> Option<RawTranslation> {
        let now_iso = timeutil::to_iso(&timeutil::now_in_tz(tz));
        let body = GenerateRequest {
            system_instruction: Content {
                role: "system",
                parts: vec![Part {
                    text: SYSTEM_INSTRUCTION.to_string(),
                }],
            },
            generation_config: GenerationConfig {
                temperature: 0.0,
                candidate_count: 1,
                response_mime_type: "application/json",
            },
            contents: vec![Content {
                role: "user",
                parts: vec![Part {
                    text: format!("NOW_TZ: {tz}\nNOW_ISO: {now_iso}\nUser request:\n{user_text}"),
                }],
            }],
        };

        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{GEMINI_MODEL}:generateContent"
        );
        let resp = match self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                log::warn!("gemini request failed: {err}");
                return None;
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            log::warn!("gemini returned {status}: {detail}");
            return None;
        }

        let payload: GenerateResponse = match resp.json().await {
            Ok(payload) => payload,
            Err(err) => {
                log::warn!("gemini response decode failed: {err}");
                return None;
            }
        };

        let Some(text) = payload
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .map(|p| p.text)
        else {
            log::warn!("gemini returned no candidates");
            return None;
        };

        parse_translation(&text)
    }
}

/// Parse the model's text part into a JSON object, tolerating prose or code
/// fences around the object.
fn parse_translation(text: &str) -> Option<RawTranslation> {
    let trimmed = text.trim();
    if let Ok(Value::Object(map)) = serde_json::from_str(trimmed) {
        return Some(map);
    }

    let Some(span) = extract::first_json_object(trimmed) else {
        log::warn!("no JSON object in gemini output: {trimmed:?}");
        return None;
    };
    match serde_json::from_str::<Value>(span) {
        Ok(Value::Object(map)) => Some(map),
        Ok(other) => {
            log::warn!("gemini returned non-object JSON: {other}");
            None
        }
        Err(err) => {
            log::warn!("gemini JSON parse failed: {err}; raw: {trimmed:?}");
            None
        }
    }
}

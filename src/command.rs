//! Command normalization: turns the translator's raw guess into a canonical,
//! fully-qualified command.
//!
//! The translator's output is never trusted as-is: every field the dispatcher
//! reads is validated, defaulted, or rejected here, so the dispatcher never
//! re-validates. Missing intents are inferred from lexical cues in the
//! original user text; missing times get fixed local defaults; free-text
//! fields are stripped to plain text.

use std::sync::OnceLock;

use chrono::{DateTime, Duration, Timelike};
use chrono_tz::Tz;
use regex::Regex;
use serde_json::Value;

use crate::error::BotError;
use crate::gemini::RawTranslation;
use crate::timeutil;

/// Default event start hour (local) when the translator gives no time.
const DEFAULT_START_HOUR: u32 = 9;
/// Default event length in minutes.
const DEFAULT_DURATION_MINS: i64 = 60;
/// Default and maximum listing sizes; the cap bounds store-query cost.
const DEFAULT_MAX_RESULTS: u32 = 5;
const MAX_MAX_RESULTS: u32 = 50;
/// Placeholder title when the intent requires one and none was given.
const UNTITLED: &str = "(untitled)";

/// Lexical cue families for intent inference, checked in this order.
const DELETE_CUES: &[&str] = &["delete", "cancel", "remove", "clear", "drop", "scrap"];
const CREATE_CUES: &[&str] = &[
    "schedule", "add", "create", "book", "remind", "set up", "setup", "plan", "meet",
];
const LIST_CUES: &[&str] = &[
    "list", "show", "what", "upcoming", "agenda", "view", "check", "see",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Create,
    List,
    Delete,
    Modify,
    ListCalendars,
    CreateCalendar,
    DeleteCalendar,
}

impl Intent {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "create" => Some(Self::Create),
            "list" => Some(Self::List),
            "delete" => Some(Self::Delete),
            "modify" | "update" => Some(Self::Modify),
            "list_calendars" => Some(Self::ListCalendars),
            "create_calendar" => Some(Self::CreateCalendar),
            "delete_calendar" => Some(Self::DeleteCalendar),
            _ => None,
        }
    }
}

/// Reference frame for one message: the configured timezone and the instant
/// the message arrived. Built fresh per message, never persisted.
#[derive(Debug, Clone)]
pub struct ReferenceContext {
    pub tz: Tz,
    pub now: DateTime<Tz>,
}

impl ReferenceContext {
    pub fn capture(tz: Tz) -> Self {
        Self {
            tz,
            now: timeutil::now_in_tz(tz),
        }
    }
}

/// The validated, complete command the dispatcher consumes.
#[derive(Debug, Clone)]
pub struct CanonicalCommand {
    pub intent: Intent,
    /// Emoji-stripped title; search filter for delete/modify.
    pub summary: String,
    /// Replacement title for modify.
    pub new_summary: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    /// Absolute lower bound for list/delete/modify searches.
    pub starting_from: String,
    pub max_results: u32,
    pub calendar_id: String,
    /// Display name for calendar-management intents; identity resolution is
    /// the dispatcher's job.
    pub calendar_name: Option<String>,
}

/// Validate and complete a raw translation.
///
/// `user_text` is the original message, used only for intent inference when
/// the translator dropped the field.
pub fn normalize(
    raw: &RawTranslation,
    user_text: &str,
    ctx: &ReferenceContext,
    primary_calendar: &str,
) -> Result<CanonicalCommand, BotError> {
    let declared = raw.get("intent").and_then(Value::as_str);
    let intent = declared
        .and_then(Intent::parse)
        .or_else(|| infer_intent(user_text))
        .ok_or_else(|| BotError::UnsupportedIntent(declared.unwrap_or("<absent>").to_string()))?;

    let summary = raw
        .get("summary")
        .and_then(Value::as_str)
        .map(strip_emoji)
        .filter(|s| !s.is_empty());
    let summary = match intent {
        // Delete never runs without a search term.
        Intent::Delete => summary.ok_or(BotError::MissingSearchTerm)?,
        Intent::Create | Intent::Modify => summary.unwrap_or_else(|| UNTITLED.to_string()),
        _ => summary.unwrap_or_default(),
    };

    let new_summary = raw
        .get("new_summary")
        .and_then(Value::as_str)
        .map(strip_emoji)
        .filter(|s| !s.is_empty());

    let raw_start = raw.get("start").and_then(Value::as_str);
    let raw_end = raw.get("end").and_then(Value::as_str);

    let (start, end) = match intent {
        Intent::Create => {
            let start = match raw_start {
                Some(s) => timeutil::to_absolute(s, ctx.tz)?,
                None => timeutil::to_iso(&default_start(ctx)),
            };
            let end = match raw_end {
                Some(e) => timeutil::to_absolute(e, ctx.tz)?,
                None => plus_default_duration(&start)?,
            };
            (Some(start), Some(end))
        }
        _ => (
            raw_start.map(|s| timeutil::to_absolute(s, ctx.tz)).transpose()?,
            raw_end.map(|e| timeutil::to_absolute(e, ctx.tz)).transpose()?,
        ),
    };

    let starting_from = match raw.get("starting_from").and_then(Value::as_str) {
        Some(s) => timeutil::to_absolute(s, ctx.tz)?,
        // delete/modify fall back to the event's own start as the search
        // anchor, then to now.
        None => match (intent, &start) {
            (Intent::Delete | Intent::Modify, Some(s)) => s.clone(),
            _ => timeutil::to_iso(&ctx.now),
        },
    };

    let max_results = raw
        .get("max_results")
        .and_then(Value::as_u64)
        .map(|v| v.min(u64::from(MAX_MAX_RESULTS)) as u32)
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_MAX_RESULTS);

    let calendar_id = raw
        .get("calendar_id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(primary_calendar)
        .to_string();

    let calendar_name = raw
        .get("calendar_name")
        .and_then(Value::as_str)
        .map(strip_emoji)
        .filter(|s| !s.is_empty());

    Ok(CanonicalCommand {
        intent,
        summary,
        new_summary,
        start,
        end,
        starting_from,
        max_results,
        calendar_id,
        calendar_name,
    })
}

/// Infer intent from keyword families in the user's own words.
fn infer_intent(user_text: &str) -> Option<Intent> {
    let lowered = user_text.to_lowercase();
    if DELETE_CUES.iter().any(|cue| lowered.contains(cue)) {
        return Some(Intent::Delete);
    }
    if CREATE_CUES.iter().any(|cue| lowered.contains(cue)) {
        return Some(Intent::Create);
    }
    if LIST_CUES.iter().any(|cue| lowered.contains(cue)) {
        return Some(Intent::List);
    }
    None
}

/// Today at the default local start hour.
fn default_start(ctx: &ReferenceContext) -> DateTime<Tz> {
    ctx.now
        .with_hour(DEFAULT_START_HOUR)
        .and_then(|dt| dt.with_minute(0))
        .and_then(|dt| dt.with_second(0))
        .and_then(|dt| dt.with_nanosecond(0))
        .unwrap_or(ctx.now)
}

fn plus_default_duration(start_iso: &str) -> Result<String, BotError> {
    let dt = DateTime::parse_from_rfc3339(start_iso)
        .map_err(|_| BotError::UnparsableTimestamp(start_iso.to_string()))?;
    Ok(timeutil::to_iso(&(dt + Duration::minutes(DEFAULT_DURATION_MINS))))
}

fn emoji_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Pictographs plus the joiners/selectors that ride along with them.
        Regex::new(r"[\p{Extended_Pictographic}\u{200D}\u{FE0E}\u{FE0F}\u{20E3}]")
            .expect("emoji pattern compiles")
    })
}

/// Strip emoji and pictographic decoration; collapse whitespace runs.
/// Calendar summaries are plain text.
pub fn strip_emoji(text: &str) -> String {
    let cleaned = emoji_re().replace_all(text, "");
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

//! Error taxonomy for the message-handling pipeline.
//!
//! Every variant maps to a templated user reply via [`BotError::user_reply`];
//! nothing propagates past the dispatcher uncaught. Failures are absorbed at
//! the message boundary and logged with enough context to diagnose offline.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BotError {
    /// The reasoning-service call failed or returned nothing usable.
    #[error("translation unavailable")]
    TranslationUnavailable,

    /// No intent in the translation and no lexical cue in the user text.
    #[error("unsupported intent: {0}")]
    UnsupportedIntent(String),

    /// Delete requested without a search term to filter on.
    #[error("delete requested without a search term")]
    MissingSearchTerm,

    /// A timestamp string could not be parsed into any date/time.
    #[error("unparsable timestamp: {0:?}")]
    UnparsableTimestamp(String),

    /// The calendar API declined the operation. Never retried.
    #[error("calendar store rejected {action}: HTTP {status}: {message}")]
    StoreRejected {
        action: &'static str,
        status: u16,
        message: String,
    },

    #[error("auth: {0}")]
    Auth(String),

    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl BotError {
    /// The reply text sent back to the chat for this failure.
    pub fn user_reply(&self) -> String {
        match self {
            BotError::TranslationUnavailable => {
                "❌ Couldn't understand the event details.".to_string()
            }
            BotError::UnsupportedIntent(_) => "❌ Unsupported command.".to_string(),
            BotError::MissingSearchTerm => {
                "❌ Tell me which event to remove, e.g. \"delete dentist\".".to_string()
            }
            BotError::UnparsableTimestamp(_) => "❌ Couldn't process that request.".to_string(),
            BotError::StoreRejected { action, .. } => {
                format!("❌ Calendar {action} failed. Nothing was changed.")
            }
            BotError::Auth(_) => {
                "❌ Google Calendar access expired. Re-link the account and try again.".to_string()
            }
            BotError::Http(_) | BotError::Json(_) => {
                "❌ Couldn't reach the calendar. Try again in a bit.".to_string()
            }
        }
    }
}

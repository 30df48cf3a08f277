//! Telegram transport. Receives raw text, runs the pipeline, replies.
//!
//! The core pipeline is stateless per message; the only cross-message state
//! in the process lives here: the per-chat pending-confirmation flag for
//! calendar deletion. Deleting a whole calendar is hard to reverse, so the
//! command is held until the user confirms with the next message.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use teloxide::prelude::*;

use crate::command::{self, CanonicalCommand, Intent, ReferenceContext};
use crate::dispatcher;
use crate::error::BotError;
use crate::gemini::GeminiTranslator;
use crate::google_api::calendar::CalendarStore;

const START_REPLY: &str = "Hi! Send me event requests in natural language — \
\"lunch with Ana tomorrow at 1pm\", \"what's on Friday?\", \"cancel dentist\".";
const CONFIRM_DELETE_CALENDAR: &str =
    "⚠️ This deletes the whole calendar and everything on it. Send YES to confirm.";
const DELETE_CALENDAR_DROPPED: &str = "Okay, the calendar stays.";

pub struct BotContext {
    translator: GeminiTranslator,
    store: Box<dyn CalendarStore>,
    tz: chrono_tz::Tz,
    primary_calendar: String,
    pending_deletes: Mutex<HashMap<i64, CanonicalCommand>>,
}

impl BotContext {
    pub fn new(
        translator: GeminiTranslator,
        store: Box<dyn CalendarStore>,
        tz: chrono_tz::Tz,
        primary_calendar: String,
    ) -> Self {
        Self {
            translator,
            store,
            tz,
            primary_calendar,
            pending_deletes: Mutex::new(HashMap::new()),
        }
    }

    /// Handle one message and produce the reply text. Always returns a reply;
    /// every failure mode maps to a templated line.
    pub async fn handle_text(&self, chat_id: i64, text: &str) -> String {
        // A pending calendar deletion is resolved by the very next message.
        if let Some(pending) = self.take_pending(chat_id) {
            if text.trim().eq_ignore_ascii_case("yes") {
                let ctx = ReferenceContext::capture(self.tz);
                return dispatcher::execute(&pending, self.store.as_ref(), &ctx).await;
            }
            return DELETE_CALENDAR_DROPPED.to_string();
        }

        let ctx = ReferenceContext::capture(self.tz);
        let Some(raw) = self.translator.translate(text, self.tz).await else {
            return BotError::TranslationUnavailable.user_reply();
        };
        log::debug!(
            "raw translation: {}",
            serde_json::Value::Object(raw.clone())
        );

        let cmd = match command::normalize(&raw, text, &ctx, &self.primary_calendar) {
            Ok(cmd) => cmd,
            Err(err) => {
                log::warn!(
                    "normalization failed: {err}; raw: {}",
                    serde_json::Value::Object(raw)
                );
                return err.user_reply();
            }
        };

        if cmd.intent == Intent::DeleteCalendar {
            self.set_pending(chat_id, cmd);
            return CONFIRM_DELETE_CALENDAR.to_string();
        }

        dispatcher::execute(&cmd, self.store.as_ref(), &ctx).await
    }

    fn take_pending(&self, chat_id: i64) -> Option<CanonicalCommand> {
        self.pending_deletes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&chat_id)
    }

    fn set_pending(&self, chat_id: i64, cmd: CanonicalCommand) {
        self.pending_deletes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(chat_id, cmd);
    }
}

/// Run the Telegram polling loop until the process is stopped.
pub async fn run(ctx: Arc<BotContext>, telegram_token: &str) {
    let bot = Bot::new(telegram_token);
    log::info!("telegram polling started");

    teloxide::repl(bot, move |bot: Bot, msg: Message| {
        let ctx = Arc::clone(&ctx);
        async move {
            if let Some(text) = msg.text() {
                let reply = if text.trim() == "/start" {
                    START_REPLY.to_string()
                } else {
                    ctx.handle_text(msg.chat.id.0, text).await
                };
                bot.send_message(msg.chat.id, reply).await?;
            }
            Ok(())
        }
    })
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google_api::calendar::{CalendarEntry, EventPatch, InsertedEvent, StoredEvent};
    use crate::google_api::GoogleApiError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store that only supports the calendar-deletion path.
    #[derive(Default)]
    struct DeleteOnlyStore {
        deletes: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl CalendarStore for DeleteOnlyStore {
        async fn insert_event(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<InsertedEvent, GoogleApiError> {
            unreachable!("insert not expected")
        }
        async fn list_events(
            &self,
            _: &str,
            _: &str,
            _: u32,
            _: Option<&str>,
        ) -> Result<Vec<StoredEvent>, GoogleApiError> {
            unreachable!("list not expected")
        }
        async fn delete_event(&self, _: &str, _: &str) -> Result<(), GoogleApiError> {
            unreachable!("event delete not expected")
        }
        async fn patch_event(
            &self,
            _: &str,
            _: &str,
            _: &EventPatch,
        ) -> Result<StoredEvent, GoogleApiError> {
            unreachable!("patch not expected")
        }
        async fn list_calendars(&self) -> Result<Vec<CalendarEntry>, GoogleApiError> {
            Ok(vec![CalendarEntry {
                id: "side-id".to_string(),
                summary: "Side projects".to_string(),
                primary: false,
            }])
        }
        async fn insert_calendar(
            &self,
            _: &str,
            _: &str,
        ) -> Result<CalendarEntry, GoogleApiError> {
            unreachable!("calendar insert not expected")
        }
        async fn delete_calendar(&self, _: &str) -> Result<(), GoogleApiError> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn pending_command() -> CanonicalCommand {
        CanonicalCommand {
            intent: Intent::DeleteCalendar,
            summary: String::new(),
            new_summary: None,
            start: None,
            end: None,
            starting_from: "2025-01-10T08:00:00+05:30".to_string(),
            max_results: 5,
            calendar_id: "primary".to_string(),
            calendar_name: Some("Side projects".to_string()),
        }
    }

    fn bot_ctx(store: Box<dyn CalendarStore>) -> BotContext {
        BotContext::new(
            GeminiTranslator::new("test-key"),
            store,
            chrono_tz::Asia::Kolkata,
            "primary".to_string(),
        )
    }

    #[tokio::test]
    async fn pending_delete_executes_on_yes() {
        let ctx = bot_ctx(Box::new(DeleteOnlyStore::default()));
        ctx.set_pending(7, pending_command());

        let reply = ctx.handle_text(7, "YES").await;
        assert!(reply.contains("Deleted calendar"));
        assert!(ctx.take_pending(7).is_none());
    }

    #[tokio::test]
    async fn pending_delete_drops_on_anything_else() {
        let ctx = bot_ctx(Box::new(DeleteOnlyStore::default()));
        ctx.set_pending(7, pending_command());

        let reply = ctx.handle_text(7, "actually no").await;
        assert_eq!(reply, DELETE_CALENDAR_DROPPED);
        assert!(ctx.take_pending(7).is_none());
    }

    #[tokio::test]
    async fn pending_flags_are_per_chat() {
        let ctx = bot_ctx(Box::new(DeleteOnlyStore::default()));
        ctx.set_pending(7, pending_command());
        assert!(ctx.take_pending(8).is_none());
        assert!(ctx.take_pending(7).is_some());
    }
}

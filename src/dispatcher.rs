//! Maps canonical commands onto single calendar-store calls and renders the
//! reply text.
//!
//! `execute` never returns an error outward: every branch converts store or
//! validation failures into a user-facing message and a log entry. Calendar
//! mutations are never retried; the user retries by resending a message.

use crate::command::{CanonicalCommand, Intent, ReferenceContext};
use crate::error::BotError;
use crate::google_api::calendar::{CalendarStore, EventPatch};
use crate::google_api::GoogleApiError;

/// Candidate window for delete/modify summary searches.
const SEARCH_WINDOW: u32 = 10;

/// Run one canonical command against the store and render the reply.
pub async fn execute(
    cmd: &CanonicalCommand,
    store: &dyn CalendarStore,
    ctx: &ReferenceContext,
) -> String {
    match run(cmd, store, ctx).await {
        Ok(reply) => reply,
        Err(err) => {
            log::error!("dispatch failed for {:?}: {err}; command: {cmd:?}", cmd.intent);
            err.user_reply()
        }
    }
}

async fn run(
    cmd: &CanonicalCommand,
    store: &dyn CalendarStore,
    ctx: &ReferenceContext,
) -> Result<String, BotError> {
    match cmd.intent {
        Intent::Create => create(cmd, store, ctx).await,
        Intent::List => list(cmd, store).await,
        Intent::Delete => delete(cmd, store).await,
        Intent::Modify => modify(cmd, store, ctx).await,
        Intent::ListCalendars => list_calendars(store).await,
        Intent::CreateCalendar => create_calendar(cmd, store, ctx).await,
        Intent::DeleteCalendar => delete_calendar(cmd, store).await,
    }
}

fn store_err(action: &'static str, err: GoogleApiError) -> BotError {
    match err {
        GoogleApiError::AuthExpired => BotError::Auth("token expired or revoked".to_string()),
        GoogleApiError::RefreshFailed(msg) => BotError::Auth(msg),
        GoogleApiError::ApiError { status, message } => BotError::StoreRejected {
            action,
            status,
            message,
        },
        GoogleApiError::Http(err) => BotError::Http(err),
        GoogleApiError::Json(err) => BotError::Json(err),
    }
}

async fn create(
    cmd: &CanonicalCommand,
    store: &dyn CalendarStore,
    ctx: &ReferenceContext,
) -> Result<String, BotError> {
    let (Some(start), Some(end)) = (cmd.start.as_deref(), cmd.end.as_deref()) else {
        return Err(BotError::UnparsableTimestamp(
            "create without start/end".to_string(),
        ));
    };
    let inserted = store
        .insert_event(&cmd.calendar_id, &cmd.summary, start, end, ctx.tz.name())
        .await
        .map_err(|e| store_err("create", e))?;

    let mut reply = format!("✅ Created: {}\n{} → {}", cmd.summary, start, end);
    if let Some(link) = inserted.html_link {
        reply.push('\n');
        reply.push_str(&link);
    }
    Ok(reply)
}

async fn list(cmd: &CanonicalCommand, store: &dyn CalendarStore) -> Result<String, BotError> {
    let events = store
        .list_events(&cmd.calendar_id, &cmd.starting_from, cmd.max_results, None)
        .await
        .map_err(|e| store_err("list", e))?;
    if events.is_empty() {
        return Ok("No upcoming events.".to_string());
    }

    let mut reply = String::from("📅 Upcoming events:");
    for event in &events {
        reply.push_str(&format!("\n• {} — {}", event.summary, event.start));
    }
    Ok(reply)
}

async fn delete(cmd: &CanonicalCommand, store: &dyn CalendarStore) -> Result<String, BotError> {
    let candidates = store
        .list_events(
            &cmd.calendar_id,
            &cmd.starting_from,
            SEARCH_WINDOW,
            Some(&cmd.summary),
        )
        .await
        .map_err(|e| store_err("delete", e))?;

    // Earliest start wins; the store's own ordering breaks any remaining tie.
    let Some(target) = candidates.first() else {
        return Ok("No matching event found.".to_string());
    };
    store
        .delete_event(&cmd.calendar_id, &target.id)
        .await
        .map_err(|e| store_err("delete", e))?;
    Ok(format!("🗑️ Deleted: {}", target.summary))
}

async fn modify(
    cmd: &CanonicalCommand,
    store: &dyn CalendarStore,
    ctx: &ReferenceContext,
) -> Result<String, BotError> {
    let candidates = store
        .list_events(
            &cmd.calendar_id,
            &cmd.starting_from,
            SEARCH_WINDOW,
            Some(&cmd.summary),
        )
        .await
        .map_err(|e| store_err("modify", e))?;
    let Some(target) = candidates.first() else {
        return Ok("No matching event found.".to_string());
    };

    let patch = EventPatch {
        summary: cmd.new_summary.clone(),
        start: cmd.start.clone(),
        end: cmd.end.clone(),
        tz: ctx.tz.name().to_string(),
    };
    if patch.summary.is_none() && patch.start.is_none() && patch.end.is_none() {
        return Ok(format!("Nothing to change on \"{}\".", target.summary));
    }

    let updated = store
        .patch_event(&cmd.calendar_id, &target.id, &patch)
        .await
        .map_err(|e| store_err("modify", e))?;
    Ok(format!("✏️ Updated: {} — {}", updated.summary, updated.start))
}

async fn list_calendars(store: &dyn CalendarStore) -> Result<String, BotError> {
    let calendars = store
        .list_calendars()
        .await
        .map_err(|e| store_err("list calendars", e))?;
    if calendars.is_empty() {
        return Ok("No calendars found.".to_string());
    }

    let mut reply = String::from("📅 Calendars:");
    for cal in &calendars {
        reply.push_str(&format!(
            "\n• {}{}",
            cal.summary,
            if cal.primary { " (primary)" } else { "" }
        ));
    }
    Ok(reply)
}

async fn create_calendar(
    cmd: &CanonicalCommand,
    store: &dyn CalendarStore,
    ctx: &ReferenceContext,
) -> Result<String, BotError> {
    let Some(name) = cmd.calendar_name.as_deref() else {
        return Err(BotError::UnsupportedIntent(
            "create_calendar without a name".to_string(),
        ));
    };

    // Resolve-or-create: an existing calendar with the same name is reused
    // rather than duplicated.
    let existing = store
        .list_calendars()
        .await
        .map_err(|e| store_err("create calendar", e))?;
    if let Some(cal) = existing
        .iter()
        .find(|c| c.summary.eq_ignore_ascii_case(name))
    {
        return Ok(format!("📅 Calendar \"{}\" already exists.", cal.summary));
    }

    let created = store
        .insert_calendar(name, ctx.tz.name())
        .await
        .map_err(|e| store_err("create calendar", e))?;
    Ok(format!("✅ Created calendar: {}", created.summary))
}

async fn delete_calendar(
    cmd: &CanonicalCommand,
    store: &dyn CalendarStore,
) -> Result<String, BotError> {
    let Some(name) = cmd.calendar_name.as_deref() else {
        return Err(BotError::UnsupportedIntent(
            "delete_calendar without a name".to_string(),
        ));
    };

    let calendars = store
        .list_calendars()
        .await
        .map_err(|e| store_err("delete calendar", e))?;
    let Some(target) = calendars
        .iter()
        .find(|c| c.summary.eq_ignore_ascii_case(name))
    else {
        return Ok(format!("No calendar named \"{name}\"."));
    };
    if target.primary {
        return Ok("The primary calendar can't be deleted.".to_string());
    }

    store
        .delete_calendar(&target.id)
        .await
        .map_err(|e| store_err("delete calendar", e))?;
    Ok(format!("🗑️ Deleted calendar: {}", target.summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google_api::calendar::{CalendarEntry, InsertedEvent, StoredEvent};
    use chrono::TimeZone;
    use chrono_tz::Asia::Kolkata;
    use std::sync::Mutex;

    fn ctx() -> ReferenceContext {
        ReferenceContext {
            tz: Kolkata,
            now: Kolkata.with_ymd_and_hms(2025, 1, 10, 8, 0, 0).unwrap(),
        }
    }

    fn cmd(intent: Intent) -> CanonicalCommand {
        CanonicalCommand {
            intent,
            summary: "dentist".to_string(),
            new_summary: None,
            start: Some("2025-01-11T18:00:00+05:30".to_string()),
            end: Some("2025-01-11T19:00:00+05:30".to_string()),
            starting_from: "2025-01-10T08:00:00+05:30".to_string(),
            max_results: 5,
            calendar_id: "primary".to_string(),
            calendar_name: None,
        }
    }

    /// In-memory store that records calls and serves canned responses.
    #[derive(Default)]
    struct FakeStore {
        events: Vec<StoredEvent>,
        calendars: Vec<CalendarEntry>,
        deleted_events: Mutex<Vec<String>>,
        deleted_calendars: Mutex<Vec<String>>,
        inserted: Mutex<Vec<String>>,
        reject_insert: bool,
    }

    #[async_trait::async_trait]
    impl CalendarStore for FakeStore {
        async fn insert_event(
            &self,
            _calendar_id: &str,
            summary: &str,
            _start: &str,
            _end: &str,
            _tz: &str,
        ) -> Result<InsertedEvent, GoogleApiError> {
            if self.reject_insert {
                return Err(GoogleApiError::ApiError {
                    status: 404,
                    message: "calendar not found".to_string(),
                });
            }
            self.inserted.lock().unwrap().push(summary.to_string());
            Ok(InsertedEvent {
                summary: summary.to_string(),
                html_link: Some("https://calendar.example/evt".to_string()),
            })
        }

        async fn list_events(
            &self,
            _calendar_id: &str,
            _time_min: &str,
            max_results: u32,
            query: Option<&str>,
        ) -> Result<Vec<StoredEvent>, GoogleApiError> {
            let mut out: Vec<StoredEvent> = self
                .events
                .iter()
                .filter(|e| query.map_or(true, |q| e.summary.contains(q)))
                .cloned()
                .collect();
            out.truncate(max_results as usize);
            Ok(out)
        }

        async fn delete_event(
            &self,
            _calendar_id: &str,
            event_id: &str,
        ) -> Result<(), GoogleApiError> {
            self.deleted_events.lock().unwrap().push(event_id.to_string());
            Ok(())
        }

        async fn patch_event(
            &self,
            _calendar_id: &str,
            _event_id: &str,
            patch: &EventPatch,
        ) -> Result<StoredEvent, GoogleApiError> {
            Ok(StoredEvent {
                id: "patched".to_string(),
                summary: patch.summary.clone().unwrap_or_else(|| "dentist".to_string()),
                start: patch
                    .start
                    .clone()
                    .unwrap_or_else(|| "2025-01-11T18:00:00+05:30".to_string()),
                end: patch
                    .end
                    .clone()
                    .unwrap_or_else(|| "2025-01-11T19:00:00+05:30".to_string()),
            })
        }

        async fn list_calendars(&self) -> Result<Vec<CalendarEntry>, GoogleApiError> {
            Ok(self.calendars.clone())
        }

        async fn insert_calendar(
            &self,
            summary: &str,
            _tz: &str,
        ) -> Result<CalendarEntry, GoogleApiError> {
            Ok(CalendarEntry {
                id: format!("{summary}-id"),
                summary: summary.to_string(),
                primary: false,
            })
        }

        async fn delete_calendar(&self, calendar_id: &str) -> Result<(), GoogleApiError> {
            self.deleted_calendars
                .lock()
                .unwrap()
                .push(calendar_id.to_string());
            Ok(())
        }
    }

    fn event(id: &str, summary: &str, start: &str) -> StoredEvent {
        StoredEvent {
            id: id.to_string(),
            summary: summary.to_string(),
            start: start.to_string(),
            end: start.to_string(),
        }
    }

    #[tokio::test]
    async fn create_reports_summary_and_times() {
        let store = FakeStore::default();
        let reply = execute(&cmd(Intent::Create), &store, &ctx()).await;
        assert!(reply.contains("✅ Created: dentist"));
        assert!(reply.contains("2025-01-11T18:00:00+05:30"));
        assert!(reply.contains("https://calendar.example/evt"));
        assert_eq!(store.inserted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejected_create_reports_failure_without_retry() {
        let store = FakeStore {
            reject_insert: true,
            ..FakeStore::default()
        };
        let reply = execute(&cmd(Intent::Create), &store, &ctx()).await;
        assert!(reply.contains("failed"));
        assert!(store.inserted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_renders_events_or_empty_message() {
        let empty = FakeStore::default();
        assert_eq!(
            execute(&cmd(Intent::List), &empty, &ctx()).await,
            "No upcoming events."
        );

        let store = FakeStore {
            events: vec![
                event("a", "dentist", "2025-01-11T18:00:00+05:30"),
                event("b", "standup", "2025-01-12T09:00:00+05:30"),
            ],
            ..FakeStore::default()
        };
        let reply = execute(&cmd(Intent::List), &store, &ctx()).await;
        assert!(reply.starts_with("📅 Upcoming events:"));
        assert!(reply.contains("• dentist — 2025-01-11T18:00:00+05:30"));
        assert!(reply.contains("• standup"));
    }

    #[tokio::test]
    async fn delete_removes_only_the_earliest_match() {
        let store = FakeStore {
            events: vec![
                event("early", "dentist", "2025-01-11T18:00:00+05:30"),
                event("late", "dentist checkup", "2025-01-13T10:00:00+05:30"),
            ],
            ..FakeStore::default()
        };
        let reply = execute(&cmd(Intent::Delete), &store, &ctx()).await;
        assert_eq!(reply, "🗑️ Deleted: dentist");
        assert_eq!(*store.deleted_events.lock().unwrap(), vec!["early"]);
    }

    #[tokio::test]
    async fn delete_with_no_match_never_calls_delete() {
        let store = FakeStore {
            events: vec![event("a", "standup", "2025-01-11T09:00:00+05:30")],
            ..FakeStore::default()
        };
        let reply = execute(&cmd(Intent::Delete), &store, &ctx()).await;
        assert_eq!(reply, "No matching event found.");
        assert!(store.deleted_events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn modify_patches_the_earliest_match() {
        let store = FakeStore {
            events: vec![event("a", "dentist", "2025-01-11T18:00:00+05:30")],
            ..FakeStore::default()
        };
        let mut command = cmd(Intent::Modify);
        command.start = Some("2025-01-12T18:00:00+05:30".to_string());
        command.end = Some("2025-01-12T19:00:00+05:30".to_string());
        let reply = execute(&command, &store, &ctx()).await;
        assert!(reply.contains("✏️ Updated: dentist — 2025-01-12T18:00:00+05:30"));
    }

    #[tokio::test]
    async fn list_calendars_marks_primary() {
        let store = FakeStore {
            calendars: vec![
                CalendarEntry {
                    id: "p".to_string(),
                    summary: "me@example.com".to_string(),
                    primary: true,
                },
                CalendarEntry {
                    id: "s".to_string(),
                    summary: "Side projects".to_string(),
                    primary: false,
                },
            ],
            ..FakeStore::default()
        };
        let mut command = cmd(Intent::ListCalendars);
        command.calendar_name = None;
        let reply = execute(&command, &store, &ctx()).await;
        assert!(reply.contains("me@example.com (primary)"));
        assert!(reply.contains("Side projects"));
    }

    #[tokio::test]
    async fn create_calendar_reuses_existing_name() {
        let store = FakeStore {
            calendars: vec![CalendarEntry {
                id: "s".to_string(),
                summary: "Side projects".to_string(),
                primary: false,
            }],
            ..FakeStore::default()
        };
        let mut command = cmd(Intent::CreateCalendar);
        command.calendar_name = Some("side projects".to_string());
        let reply = execute(&command, &store, &ctx()).await;
        assert!(reply.contains("already exists"));
    }

    #[tokio::test]
    async fn delete_calendar_refuses_primary() {
        let store = FakeStore {
            calendars: vec![CalendarEntry {
                id: "p".to_string(),
                summary: "me@example.com".to_string(),
                primary: true,
            }],
            ..FakeStore::default()
        };
        let mut command = cmd(Intent::DeleteCalendar);
        command.calendar_name = Some("me@example.com".to_string());
        let reply = execute(&command, &store, &ctx()).await;
        assert_eq!(reply, "The primary calendar can't be deleted.");
        assert!(store.deleted_calendars.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_calendar_removes_named_calendar() {
        let store = FakeStore {
            calendars: vec![CalendarEntry {
                id: "side-id".to_string(),
                summary: "Side projects".to_string(),
                primary: false,
            }],
            ..FakeStore::default()
        };
        let mut command = cmd(Intent::DeleteCalendar);
        command.calendar_name = Some("Side projects".to_string());
        let reply = execute(&command, &store, &ctx()).await;
        assert!(reply.contains("🗑️ Deleted calendar: Side projects"));
        assert_eq!(*store.deleted_calendars.lock().unwrap(), vec!["side-id"]);
    }
}

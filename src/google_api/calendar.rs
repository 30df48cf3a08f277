//! Google Calendar API v3 client and the store port the dispatcher consumes.
//!
//! The port is a trait so tests can substitute an in-memory fake; the process
//! constructs one `GoogleCalendar` at startup and threads it through as a
//! dependency rather than reading a client from ambient scope.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{is_token_expired, refresh_access_token, GoogleApiError, GoogleToken, WebAppCredentials};

const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

// ============================================================================
// Store port
// ============================================================================

/// An event as returned by the store's list call. Never cached; every
/// list/delete re-queries.
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub id: String,
    pub summary: String,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone)]
pub struct InsertedEvent {
    pub summary: String,
    pub html_link: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CalendarEntry {
    pub id: String,
    pub summary: String,
    pub primary: bool,
}

/// Partial update for modify. `tz` qualifies any start/end given.
#[derive(Debug, Clone, Default)]
pub struct EventPatch {
    pub summary: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub tz: String,
}

/// Calendar-store operations the dispatcher is allowed to perform.
#[async_trait]
pub trait CalendarStore: Send + Sync {
    async fn insert_event(
        &self,
        calendar_id: &str,
        summary: &str,
        start: &str,
        end: &str,
        tz: &str,
    ) -> Result<InsertedEvent, GoogleApiError>;

    /// Events from `time_min`, ordered by start time ascending, recurring
    /// instances expanded, optionally filtered by a free-text query.
    async fn list_events(
        &self,
        calendar_id: &str,
        time_min: &str,
        max_results: u32,
        query: Option<&str>,
    ) -> Result<Vec<StoredEvent>, GoogleApiError>;

    async fn delete_event(&self, calendar_id: &str, event_id: &str)
        -> Result<(), GoogleApiError>;

    async fn patch_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        patch: &EventPatch,
    ) -> Result<StoredEvent, GoogleApiError>;

    async fn list_calendars(&self) -> Result<Vec<CalendarEntry>, GoogleApiError>;

    async fn insert_calendar(&self, summary: &str, tz: &str)
        -> Result<CalendarEntry, GoogleApiError>;

    async fn delete_calendar(&self, calendar_id: &str) -> Result<(), GoogleApiError>;
}

// ============================================================================
// Wire types (Google Calendar JSON)
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventDateTimeBody<'a> {
    date_time: &'a str,
    time_zone: &'a str,
}

#[derive(Debug, Serialize)]
struct EventBody<'a> {
    summary: &'a str,
    start: EventDateTimeBody<'a>,
    end: EventDateTimeBody<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OwnedDateTimeBody {
    date_time: String,
    time_zone: String,
}

#[derive(Debug, Serialize)]
struct EventPatchBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start: Option<OwnedDateTimeBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end: Option<OwnedDateTimeBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventListResponse {
    #[serde(default)]
    items: Vec<EventRaw>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventRaw {
    #[serde(default)]
    id: String,
    #[serde(default)]
    summary: Option<String>,
    start: Option<EventTime>,
    end: Option<EventTime>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventTime {
    date_time: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarListResponse {
    #[serde(default)]
    items: Vec<CalendarRaw>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarRaw {
    #[serde(default)]
    id: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    primary: bool,
}

/// Prefer the timed form, fall back to the all-day date.
fn event_time_string(time: Option<&EventTime>) -> String {
    time.and_then(|t| t.date_time.as_deref().or(t.date.as_deref()))
        .unwrap_or("")
        .to_string()
}

fn event_from_raw(item: EventRaw) -> StoredEvent {
    StoredEvent {
        summary: item.summary.unwrap_or_else(|| "(No title)".to_string()),
        start: event_time_string(item.start.as_ref()),
        end: event_time_string(item.end.as_ref()),
        id: item.id,
    }
}

// ============================================================================
// Google Calendar client
// ============================================================================

pub struct GoogleCalendar {
    client: reqwest::Client,
    credentials: WebAppCredentials,
    token: Mutex<GoogleToken>,
}

impl GoogleCalendar {
    pub fn new(credentials: WebAppCredentials, token: GoogleToken) -> Self {
        Self {
            client: reqwest::Client::new(),
            credentials,
            token: Mutex::new(token),
        }
    }

    /// Current access token, refreshing through the token endpoint when
    /// expired. Holding the token mutex serializes concurrent refreshes.
    async fn access_token(&self) -> Result<String, GoogleApiError> {
        let mut token = self.token.lock().await;
        if is_token_expired(&token) {
            log::info!("google access token expired, refreshing");
            *token = refresh_access_token(&self.client, &self.credentials, &token).await?;
        }
        Ok(token.token.clone())
    }

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, GoogleApiError> {
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(GoogleApiError::AuthExpired);
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(GoogleApiError::ApiError {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl CalendarStore for GoogleCalendar {
    async fn insert_event(
        &self,
        calendar_id: &str,
        summary: &str,
        start: &str,
        end: &str,
        tz: &str,
    ) -> Result<InsertedEvent, GoogleApiError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct InsertResponse {
            #[serde(default)]
            summary: String,
            #[serde(default)]
            html_link: Option<String>,
        }

        let access = self.access_token().await?;
        let body = EventBody {
            summary,
            start: EventDateTimeBody {
                date_time: start,
                time_zone: tz,
            },
            end: EventDateTimeBody {
                date_time: end,
                time_zone: tz,
            },
        };
        let resp = self
            .client
            .post(format!("{CALENDAR_API_BASE}/calendars/{calendar_id}/events"))
            .bearer_auth(&access)
            .json(&body)
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;
        let inserted: InsertResponse = resp.json().await?;
        Ok(InsertedEvent {
            summary: inserted.summary,
            html_link: inserted.html_link,
        })
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        time_min: &str,
        max_results: u32,
        query: Option<&str>,
    ) -> Result<Vec<StoredEvent>, GoogleApiError> {
        let access = self.access_token().await?;
        let max = max_results.to_string();
        let mut request = self
            .client
            .get(format!("{CALENDAR_API_BASE}/calendars/{calendar_id}/events"))
            .bearer_auth(&access)
            .query(&[
                ("timeMin", time_min),
                ("singleEvents", "true"),
                ("orderBy", "startTime"),
                ("maxResults", max.as_str()),
            ]);
        if let Some(q) = query {
            request = request.query(&[("q", q)]);
        }

        let resp = Self::check_status(request.send().await?).await?;
        let body: EventListResponse = resp.json().await?;
        Ok(body
            .items
            .into_iter()
            .filter(|item| item.status.as_deref() != Some("cancelled"))
            .map(event_from_raw)
            .collect())
    }

    async fn delete_event(
        &self,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<(), GoogleApiError> {
        let access = self.access_token().await?;
        let resp = self
            .client
            .delete(format!(
                "{CALENDAR_API_BASE}/calendars/{calendar_id}/events/{event_id}"
            ))
            .bearer_auth(&access)
            .send()
            .await?;
        Self::check_status(resp).await?;
        Ok(())
    }

    async fn patch_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        patch: &EventPatch,
    ) -> Result<StoredEvent, GoogleApiError> {
        let access = self.access_token().await?;
        let body = EventPatchBody {
            summary: patch.summary.clone(),
            start: patch.start.clone().map(|date_time| OwnedDateTimeBody {
                date_time,
                time_zone: patch.tz.clone(),
            }),
            end: patch.end.clone().map(|date_time| OwnedDateTimeBody {
                date_time,
                time_zone: patch.tz.clone(),
            }),
        };
        let resp = self
            .client
            .patch(format!(
                "{CALENDAR_API_BASE}/calendars/{calendar_id}/events/{event_id}"
            ))
            .bearer_auth(&access)
            .json(&body)
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;
        let updated: EventRaw = resp.json().await?;
        Ok(event_from_raw(updated))
    }

    async fn list_calendars(&self) -> Result<Vec<CalendarEntry>, GoogleApiError> {
        let access = self.access_token().await?;
        let resp = self
            .client
            .get(format!("{CALENDAR_API_BASE}/users/me/calendarList"))
            .bearer_auth(&access)
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;
        let body: CalendarListResponse = resp.json().await?;
        Ok(body
            .items
            .into_iter()
            .map(|item| CalendarEntry {
                id: item.id,
                summary: item.summary,
                primary: item.primary,
            })
            .collect())
    }

    async fn insert_calendar(
        &self,
        summary: &str,
        tz: &str,
    ) -> Result<CalendarEntry, GoogleApiError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct CalendarBody<'a> {
            summary: &'a str,
            time_zone: &'a str,
        }

        let access = self.access_token().await?;
        let resp = self
            .client
            .post(format!("{CALENDAR_API_BASE}/calendars"))
            .bearer_auth(&access)
            .json(&CalendarBody {
                summary,
                time_zone: tz,
            })
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;
        let created: CalendarRaw = resp.json().await?;
        Ok(CalendarEntry {
            id: created.id,
            summary: created.summary,
            primary: false,
        })
    }

    async fn delete_calendar(&self, calendar_id: &str) -> Result<(), GoogleApiError> {
        let access = self.access_token().await?;
        let resp = self
            .client
            .delete(format!("{CALENDAR_API_BASE}/calendars/{calendar_id}"))
            .bearer_auth(&access)
            .send()
            .await?;
        Self::check_status(resp).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_list_deserializes() {
        let json = r#"{
            "items": [
                {
                    "id": "evt1",
                    "summary": "Team Standup",
                    "start": {"dateTime": "2025-01-10T09:00:00+05:30"},
                    "end": {"dateTime": "2025-01-10T09:30:00+05:30"},
                    "status": "confirmed"
                },
                {
                    "id": "evt2",
                    "start": {"date": "2025-01-11"},
                    "end": {"date": "2025-01-12"},
                    "status": "cancelled"
                }
            ]
        }"#;
        let resp: EventListResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.items.len(), 2);

        let events: Vec<StoredEvent> = resp
            .items
            .into_iter()
            .filter(|item| item.status.as_deref() != Some("cancelled"))
            .map(event_from_raw)
            .collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].summary, "Team Standup");
        assert_eq!(events[0].start, "2025-01-10T09:00:00+05:30");
    }

    #[test]
    fn untitled_event_gets_placeholder() {
        let raw: EventRaw = serde_json::from_str(r#"{"id": "x"}"#).unwrap();
        let event = event_from_raw(raw);
        assert_eq!(event.summary, "(No title)");
        assert_eq!(event.start, "");
    }

    #[test]
    fn all_day_event_uses_date() {
        let raw: EventRaw = serde_json::from_str(
            r#"{"id": "x", "summary": "Holiday", "start": {"date": "2025-01-26"}, "end": {"date": "2025-01-27"}}"#,
        )
        .unwrap();
        let event = event_from_raw(raw);
        assert_eq!(event.start, "2025-01-26");
    }

    #[test]
    fn insert_body_serializes_camel_case() {
        let body = EventBody {
            summary: "call mom",
            start: EventDateTimeBody {
                date_time: "2025-01-11T18:00:00+05:30",
                time_zone: "Asia/Kolkata",
            },
            end: EventDateTimeBody {
                date_time: "2025-01-11T19:00:00+05:30",
                time_zone: "Asia/Kolkata",
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["start"]["dateTime"], "2025-01-11T18:00:00+05:30");
        assert_eq!(json["start"]["timeZone"], "Asia/Kolkata");
        assert_eq!(json["summary"], "call mom");
    }

    #[test]
    fn patch_body_skips_absent_fields() {
        let body = EventPatchBody {
            summary: Some("new title".to_string()),
            start: None,
            end: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["summary"], "new title");
        assert!(json.get("start").is_none());
        assert!(json.get("end").is_none());
    }

    #[test]
    fn calendar_list_deserializes() {
        let json = r#"{
            "items": [
                {"id": "primary-id", "summary": "me@example.com", "primary": true},
                {"id": "side@group.calendar.google.com", "summary": "Side projects"}
            ]
        }"#;
        let resp: CalendarListResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.items.len(), 2);
        assert!(resp.items[0].primary);
        assert!(!resp.items[1].primary);
    }
}

//! Google Calendar v3 over REST.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::model::*;

use super::{CalendarCredentials, CalendarError, CalendarProvider, Meeting, MeetingRequest};

const API_BASE: &str = "https://www.googleapis.com/calendar/v3";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// HTTP request timeout for a single calendar call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// OAuth client registered with Google.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
}

pub struct GoogleCalendar {
    client: reqwest::Client,
    config: GoogleConfig,
    api_base: String,
    token_url: String,
}

impl GoogleCalendar {
    pub fn new(config: GoogleConfig) -> Result<Self, CalendarError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CalendarError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            config,
            api_base: API_BASE.to_string(),
            token_url: TOKEN_URL.to_string(),
        })
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!("{}/calendars/{calendar_id}/events", self.api_base)
    }
}

#[derive(Debug, Deserialize)]
struct EventResponse {
    id: String,
    #[serde(rename = "htmlLink")]
    html_link: Option<String>,
    #[serde(rename = "hangoutLink")]
    hangout_link: Option<String>,
    #[serde(rename = "conferenceData")]
    conference_data: Option<ConferenceData>,
}

#[derive(Debug, Deserialize)]
struct ConferenceData {
    #[serde(rename = "entryPoints", default)]
    entry_points: Vec<EntryPoint>,
}

#[derive(Debug, Deserialize)]
struct EntryPoint {
    #[serde(rename = "entryPointType")]
    entry_point_type: String,
    uri: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
}

/// JSON body for an event with a Meet conference attached.
fn event_body(request: &MeetingRequest) -> serde_json::Value {
    let mut attendees = vec![json!({ "email": request.attendee_email })];
    if let Some(mentor) = &request.mentor_email {
        attendees.push(json!({ "email": mentor }));
    }
    json!({
        "summary": request.summary,
        "description": request.description.clone().unwrap_or_default(),
        "start": { "dateTime": format_ms(request.span.start), "timeZone": request.timezone },
        "end": { "dateTime": format_ms(request.span.end), "timeZone": request.timezone },
        "attendees": attendees,
        "conferenceData": {
            "createRequest": {
                "requestId": request.request_id,
                "conferenceSolutionKey": { "type": "hangoutsMeet" }
            }
        }
    })
}

impl EventResponse {
    fn into_meeting(self) -> Meeting {
        let video = self.conference_data.and_then(|c| {
            c.entry_points
                .into_iter()
                .find(|e| e.entry_point_type == "video")
                .map(|e| e.uri)
        });
        Meeting {
            event_id: self.id,
            html_link: self.html_link,
            meet_link: self.hangout_link.or(video),
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, CalendarError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(CalendarError::Status(status.as_u16(), body))
}

fn transport(e: reqwest::Error) -> CalendarError {
    CalendarError::Transport(e.to_string())
}

#[async_trait]
impl CalendarProvider for GoogleCalendar {
    async fn create_event(
        &self,
        credentials: &CalendarCredentials,
        request: &MeetingRequest,
    ) -> Result<Meeting, CalendarError> {
        let response = self
            .client
            .post(self.events_url(&credentials.calendar_id))
            .query(&[("conferenceDataVersion", "1"), ("sendUpdates", "all")])
            .bearer_auth(&credentials.access_token)
            .json(&event_body(request))
            .send()
            .await
            .map_err(transport)?;
        let event: EventResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| CalendarError::MalformedResponse(e.to_string()))?;
        tracing::debug!(mentor_id = %request.mentor_id, event_id = %event.id, "calendar event created");
        Ok(event.into_meeting())
    }

    async fn delete_event(
        &self,
        credentials: &CalendarCredentials,
        event_id: &str,
    ) -> Result<(), CalendarError> {
        let response = self
            .client
            .delete(format!("{}/{event_id}", self.events_url(&credentials.calendar_id)))
            .query(&[("sendUpdates", "all")])
            .bearer_auth(&credentials.access_token)
            .send()
            .await
            .map_err(transport)?;
        // Already gone counts as deleted.
        if matches!(response.status().as_u16(), 404 | 410) {
            return Ok(());
        }
        check_status(response).await.map(|_| ())
    }

    async fn refresh(&self, credentials: &CalendarCredentials) -> Result<CalendarCredentials, CalendarError> {
        let refresh_token = credentials
            .refresh_token
            .as_deref()
            .ok_or(CalendarError::CannotRefresh)?;
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(transport)?;
        let token: TokenResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| CalendarError::MalformedResponse(e.to_string()))?;
        Ok(refreshed_credentials(credentials, token, now_ms()))
    }
}

fn refreshed_credentials(old: &CalendarCredentials, token: TokenResponse, now: Ms) -> CalendarCredentials {
    CalendarCredentials {
        access_token: token.access_token,
        // Google only sometimes rotates the refresh token.
        refresh_token: token.refresh_token.or_else(|| old.refresh_token.clone()),
        expires_at: token.expires_in.map(|secs| now + secs * 1000),
        calendar_id: old.calendar_id.clone(),
        email: old.email.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(mentor_email: Option<&str>) -> MeetingRequest {
        MeetingRequest {
            mentor_id: "mentor".into(),
            attendee_email: "mentee@example.com".into(),
            mentor_email: mentor_email.map(str::to_string),
            span: Span::new(1_754_841_600_000, 1_754_843_400_000),
            summary: "Mentorship session".into(),
            description: Some("Career chat".into()),
            timezone: "Europe/Berlin".into(),
            request_id: "01J0000000000000000000000".into(),
        }
    }

    #[test]
    fn event_body_requests_meet_conference() {
        let body = event_body(&request(Some("mentor@example.com")));
        assert_eq!(body["start"]["dateTime"], "2025-08-10T16:00:00.000Z");
        assert_eq!(body["end"]["timeZone"], "Europe/Berlin");
        assert_eq!(body["attendees"].as_array().unwrap().len(), 2);
        assert_eq!(
            body["conferenceData"]["createRequest"]["conferenceSolutionKey"]["type"],
            "hangoutsMeet"
        );
        assert_eq!(
            body["conferenceData"]["createRequest"]["requestId"],
            "01J0000000000000000000000"
        );
    }

    #[test]
    fn event_body_without_mentor_email() {
        let body = event_body(&request(None));
        assert_eq!(body["attendees"].as_array().unwrap().len(), 1);
        assert_eq!(body["description"], "Career chat");
    }

    #[test]
    fn meeting_prefers_hangout_link_then_video_entry_point() {
        let raw = r#"{
            "id": "evt1",
            "htmlLink": "https://calendar.google.com/event?eid=1",
            "conferenceData": {"entryPoints": [
                {"entryPointType": "phone", "uri": "tel:+1"},
                {"entryPointType": "video", "uri": "https://meet.google.com/abc"}
            ]}
        }"#;
        let event: EventResponse = serde_json::from_str(raw).unwrap();
        let meeting = event.into_meeting();
        assert_eq!(meeting.event_id, "evt1");
        assert_eq!(meeting.meet_link.as_deref(), Some("https://meet.google.com/abc"));

        let raw = r#"{"id": "evt2", "hangoutLink": "https://meet.google.com/xyz"}"#;
        let event: EventResponse = serde_json::from_str(raw).unwrap();
        let meeting = event.into_meeting();
        assert_eq!(meeting.meet_link.as_deref(), Some("https://meet.google.com/xyz"));
        assert_eq!(meeting.html_link, None);
    }

    #[test]
    fn refresh_keeps_old_refresh_token_when_not_rotated() {
        let old = CalendarCredentials {
            access_token: "old".into(),
            refresh_token: Some("r1".into()),
            expires_at: Some(0),
            calendar_id: DEFAULT_CALENDAR_ID.into(),
            email: None,
        };
        let token = TokenResponse {
            access_token: "new".into(),
            expires_in: Some(3600),
            refresh_token: None,
        };
        let fresh = refreshed_credentials(&old, token, 1_000);
        assert_eq!(fresh.access_token, "new");
        assert_eq!(fresh.refresh_token.as_deref(), Some("r1"));
        assert_eq!(fresh.expires_at, Some(3_601_000));
    }

    #[test]
    fn new_client_builds() {
        let cal = GoogleCalendar::new(GoogleConfig {
            client_id: "id".into(),
            client_secret: "secret".into(),
        })
        .unwrap();
        assert_eq!(
            cal.events_url("primary"),
            "https://www.googleapis.com/calendar/v3/calendars/primary/events"
        );
    }
}

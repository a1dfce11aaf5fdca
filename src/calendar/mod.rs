//! Best-effort meeting creation on the mentor's external calendar.
//!
//! Nothing here can fail a booking. Every path ends in a [`Meeting`] or a
//! [`SoftFailure`] tag.

mod google;

pub use google::{GoogleCalendar, GoogleConfig};

use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::EngineError;
use crate::model::*;
use crate::soft::{SoftFailure, SoftResult};

/// What the orchestrator asks the calendar for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetingRequest {
    pub mentor_id: String,
    pub attendee_email: String,
    pub mentor_email: Option<String>,
    pub span: Span,
    pub summary: String,
    pub description: Option<String>,
    pub timezone: String,
    /// Idempotency key for conferencing; the booking id.
    pub request_id: String,
}

/// A created calendar event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meeting {
    pub event_id: String,
    pub html_link: Option<String>,
    pub meet_link: Option<String>,
}

#[derive(Debug)]
pub enum CalendarError {
    /// Provider answered with a non-success HTTP status.
    Status(u16, String),
    Transport(String),
    MalformedResponse(String),
    /// Token expired and there is no refresh token.
    CannotRefresh,
}

impl std::fmt::Display for CalendarError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalendarError::Status(code, body) => write!(f, "calendar API returned HTTP {code}: {body}"),
            CalendarError::Transport(e) => write!(f, "calendar request failed: {e}"),
            CalendarError::MalformedResponse(e) => write!(f, "malformed calendar response: {e}"),
            CalendarError::CannotRefresh => write!(f, "access token expired and no refresh token"),
        }
    }
}

impl std::error::Error for CalendarError {}

/// An external calendar that can host meetings.
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    async fn create_event(
        &self,
        credentials: &CalendarCredentials,
        request: &MeetingRequest,
    ) -> Result<Meeting, CalendarError>;

    async fn delete_event(
        &self,
        credentials: &CalendarCredentials,
        event_id: &str,
    ) -> Result<(), CalendarError>;

    /// Exchange the refresh token for a fresh access token.
    async fn refresh(&self, credentials: &CalendarCredentials) -> Result<CalendarCredentials, CalendarError>;
}

/// Per-mentor credential storage.
#[async_trait]
pub trait CredentialVault: Send + Sync {
    async fn load_credentials(&self, mentor_id: &str) -> Result<Option<CalendarCredentials>, EngineError>;

    async fn store_credentials(
        &self,
        mentor_id: &str,
        credentials: CalendarCredentials,
    ) -> Result<(), EngineError>;
}

pub struct CalendarAdapter {
    provider: Option<Arc<dyn CalendarProvider>>,
    vault: Arc<dyn CredentialVault>,
}

impl CalendarAdapter {
    pub fn new(provider: Option<Arc<dyn CalendarProvider>>, vault: Arc<dyn CredentialVault>) -> Self {
        Self { provider, vault }
    }

    /// Load the mentor's credentials, refreshing them first if expired.
    async fn usable_credentials(
        &self,
        provider: &dyn CalendarProvider,
        mentor_id: &str,
    ) -> SoftResult<CalendarCredentials> {
        let credentials = match self.vault.load_credentials(mentor_id).await {
            Ok(Some(c)) => c,
            Ok(None) => return Err(SoftFailure::NotConnected),
            Err(e) => return Err(SoftFailure::StoreUnavailable(e.to_string())),
        };
        if !credentials.is_expired(now_ms()) {
            return Ok(credentials);
        }

        let refreshed = provider
            .refresh(&credentials)
            .await
            .map_err(|e| SoftFailure::ProviderError(e.to_string()))?;
        if let Err(e) = self
            .vault
            .store_credentials(mentor_id, refreshed.clone())
            .await
        {
            tracing::warn!(mentor_id, error = %e, "could not persist refreshed calendar credentials");
        }
        Ok(refreshed)
    }

    pub async fn create_meeting(&self, request: &MeetingRequest) -> SoftResult<Meeting> {
        let provider = self.provider.as_deref().ok_or(SoftFailure::NotConnected)?;
        let credentials = self.usable_credentials(provider, &request.mentor_id).await?;
        provider
            .create_event(&credentials, request)
            .await
            .map_err(|e| SoftFailure::ProviderError(e.to_string()))
    }

    pub async fn delete_meeting(&self, mentor_id: &str, event_id: &str) -> SoftResult<()> {
        let provider = self.provider.as_deref().ok_or(SoftFailure::NotConnected)?;
        let credentials = self.usable_credentials(provider, mentor_id).await?;
        provider
            .delete_event(&credentials, event_id)
            .await
            .map_err(|e| SoftFailure::ProviderError(e.to_string()))
    }
}

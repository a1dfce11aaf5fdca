use async_trait::async_trait;

use crate::calendar::CredentialVault;
use crate::limits::*;
use crate::model::*;

use super::availability::validate_user_id;
use super::{Engine, EngineError};

impl Engine {
    /// Store (or replace) a mentor's calendar tokens.
    pub async fn connect_calendar(
        &self,
        mentor_id: &str,
        credentials: CalendarCredentials,
    ) -> Result<(), EngineError> {
        validate_user_id("mentor_id", mentor_id)?;
        if credentials.access_token.is_empty() {
            return Err(EngineError::InvalidArgument("access_token is required".into()));
        }
        let too_long = |t: &String| t.len() > MAX_TOKEN_LEN;
        if too_long(&credentials.access_token) || credentials.refresh_token.as_ref().is_some_and(too_long) {
            return Err(EngineError::LimitExceeded("token too long"));
        }
        self.persist_record(&Event::CalendarConnected {
            mentor_id: mentor_id.to_string(),
            credentials,
        })
        .await
    }

    /// Returns whether anything was connected.
    pub async fn disconnect_calendar(&self, mentor_id: &str) -> Result<bool, EngineError> {
        if !self.credentials.contains_key(mentor_id) {
            return Ok(false);
        }
        self.persist_record(&Event::CalendarDisconnected {
            mentor_id: mentor_id.to_string(),
        })
        .await?;
        Ok(true)
    }

    pub fn calendar_credentials(&self, mentor_id: &str) -> Option<CalendarCredentials> {
        self.credentials.get(mentor_id).map(|e| e.value().clone())
    }
}

#[async_trait]
impl CredentialVault for Engine {
    async fn load_credentials(&self, mentor_id: &str) -> Result<Option<CalendarCredentials>, EngineError> {
        Ok(self.calendar_credentials(mentor_id))
    }

    async fn store_credentials(
        &self,
        mentor_id: &str,
        credentials: CalendarCredentials,
    ) -> Result<(), EngineError> {
        self.connect_calendar(mentor_id, credentials).await
    }
}

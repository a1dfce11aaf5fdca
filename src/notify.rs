//! In-app notifications for booking parties.
//!
//! Delivery is best effort: a sink failure is logged and counted, and the
//! caller only ever sees a [`SoftFailure`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::soft::{SoftFailure, SoftResult};

/// Where notifications end up.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: Notification) -> Result<Ulid, EngineError>;
}

#[async_trait]
impl NotificationSink for Engine {
    async fn deliver(&self, notification: Notification) -> Result<Ulid, EngineError> {
        self.store_notification(notification).await
    }
}

/// Sink for tenants that run without an inbox.
pub struct DisabledSink;

#[async_trait]
impl NotificationSink for DisabledSink {
    async fn deliver(&self, _notification: Notification) -> Result<Ulid, EngineError> {
        Err(EngineError::WalError("notifications are disabled".into()))
    }
}

pub struct Notifier {
    sink: Arc<dyn NotificationSink>,
}

impl Notifier {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    pub async fn notify(
        &self,
        user_id: &str,
        kind: NotificationKind,
        title: String,
        body: String,
        meta: BTreeMap<String, String>,
    ) -> SoftResult<Ulid> {
        let notification = Notification {
            id: Ulid::new(),
            user_id: user_id.to_string(),
            kind,
            title,
            body,
            meta,
            read: false,
            created_at: now_ms(),
        };
        match self.sink.deliver(notification).await {
            Ok(id) => Ok(id),
            Err(e) => {
                metrics::counter!(crate::observability::NOTIFICATIONS_DROPPED_TOTAL, "kind" => kind.as_str())
                    .increment(1);
                tracing::warn!(user_id, kind = kind.as_str(), error = %e, "notification dropped");
                Err(SoftFailure::StoreUnavailable(e.to_string()))
            }
        }
    }
}

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::metrics;
use crate::models::{Session, SessionFilters};
use crate::store::{get_json, set_json, Clock, KeyValueStore};

fn session_key(session_id: &str) -> String {
    format!("chat:session:{}", session_id)
}

/// TTL-bound cache of the filters an upstream agent negotiated for a shopper.
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    event_sender: EventSender,
}

impl SessionStore {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        event_sender: EventSender,
    ) -> Self {
        Self {
            store,
            clock,
            ttl,
            event_sender,
        }
    }

    #[instrument(skip(self))]
    pub async fn put(&self, filters: SessionFilters) -> Result<Session, ServiceError> {
        let now = self.clock.now();
        let expires_in = ChronoDuration::from_std(self.ttl)
            .map_err(|e| ServiceError::InternalError(e.to_string()))?;
        let session = Session {
            session_id: Uuid::new_v4().to_string(),
            filters,
            created_at: now,
            expires_at: now + expires_in,
        };

        set_json(
            self.store.as_ref(),
            &session_key(&session.session_id),
            &session,
            Some(self.ttl),
        )
        .await?;

        metrics::CHAT_SESSIONS_CREATED.inc();
        debug!(session_id = %session.session_id, "Created shopping session");
        self.event_sender
            .send_or_log(Event::SessionStarted {
                session_id: session.session_id.clone(),
            })
            .await;
        Ok(session)
    }

    /// Returns `None` for unknown or lapsed sessions.
    pub async fn get(&self, session_id: &str) -> Result<Option<Session>, ServiceError> {
        let session = get_json::<Session>(self.store.as_ref(), &session_key(session_id)).await?;
        Ok(session.filter(|s| s.expires_at > self.clock.now()))
    }

    pub async fn require(&self, session_id: &str) -> Result<Session, ServiceError> {
        self.get(session_id)
            .await?
            .ok_or_else(|| ServiceError::SessionNotFound(session_id.to_string()))
    }
}

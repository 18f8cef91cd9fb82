use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::protocol::ClientInfo;

/// Actor id used for sessions whose client did not identify itself.
pub(crate) const ANONYMOUS_ACTOR: &str = "anonymous";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Initialized,
    Closed,
}

/// One client conversation.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub state: SessionState,
    pub protocol_version: Option<String>,
    pub client_info: ClientInfo,
    pub client_capabilities: serde_json::Value,
    pub created_at: DateTime<Utc>,
    last_seen: Instant,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: SessionState::Uninitialized,
            protocol_version: None,
            client_info: ClientInfo::default(),
            client_capabilities: serde_json::Value::Null,
            created_at: Utc::now(),
            last_seen: Instant::now(),
        }
    }

    /// Actor the session's calls are authorized as.
    pub fn actor_id(&self) -> &str {
        self.client_info.actor_id().unwrap_or(ANONYMOUS_ACTOR)
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_seen.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_uninitialized_and_anonymous() {
        let session = Session::new("s1");
        assert_eq!(session.state, SessionState::Uninitialized);
        assert_eq!(session.actor_id(), ANONYMOUS_ACTOR);
        assert!(session.protocol_version.is_none());
    }

    #[test]
    fn touch_resets_idle_time() {
        let mut session = Session::new("s1");
        std::thread::sleep(Duration::from_millis(20));
        let before = session.idle_for();
        session.touch();
        assert!(session.idle_for() < before);
    }
}

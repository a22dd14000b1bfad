use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::token::{SessionState, SyncIssue};

pub mod streams;
pub use streams::{EventKind, EventStream, EventStreamStats, Subscriber};

// Session event stream sizing
pub const SESSION_EVENT_CAPACITY: usize = 256;
pub const SESSION_EVENT_BUFFER_SIZE: usize = 64;

/// Everything the synchronizer reports to its consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A new session state was committed
    StateChanged { state: SessionState },
    /// A recoverable failure occurred during a transition
    Issue {
        issue: SyncIssue,
        at: DateTime<Utc>,
    },
    /// An async result finished after its generation was superseded
    StaleResultDiscarded { operation: String, generation: u64 },
    /// A session token was written to the slot
    TokenStored { slot: String },
    /// The token slot was cleared
    TokenCleared { slot: String },
}

impl SessionEvent {
    pub fn issue(issue: SyncIssue) -> Self {
        SessionEvent::Issue {
            issue,
            at: Utc::now(),
        }
    }
}

impl EventKind for SessionEvent {
    fn kind(&self) -> &'static str {
        match self {
            SessionEvent::StateChanged { .. } => "state_changed",
            SessionEvent::Issue { .. } => "issue",
            SessionEvent::StaleResultDiscarded { .. } => "stale_result_discarded",
            SessionEvent::TokenStored { .. } => "token_stored",
            SessionEvent::TokenCleared { .. } => "token_cleared",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_counts_and_replays() {
        let stream: EventStream<SessionEvent> =
            EventStream::new(SESSION_EVENT_CAPACITY, 2);

        // no subscribers yet, still buffered
        stream
            .publish(SessionEvent::TokenCleared {
                slot: "access-token".into(),
            })
            .await;

        let mut subscriber = stream.subscribe();
        let receivers = stream
            .publish(SessionEvent::TokenStored {
                slot: "access-token".into(),
            })
            .await;
        assert_eq!(receivers, 1);
        stream
            .publish(SessionEvent::StaleResultDiscarded {
                operation: "authenticate".into(),
                generation: 3,
            })
            .await;

        let first = subscriber.recv().await.unwrap();
        assert_eq!(first.kind(), "token_stored");

        let stats = stream.get_stats().await;
        assert_eq!(stats.events_published, 2);
        assert_eq!(stats.events_dropped, 1);
        assert_eq!(stats.type_counts.get("token_cleared"), Some(&1));

        // buffer keeps only the last two
        let replay = subscriber.replay_buffer().await;
        assert_eq!(replay.len(), 2);
        assert_eq!(replay[0].kind(), "token_stored");
    }
}

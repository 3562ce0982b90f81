//! Processed webhook event marker
//!
//! Presence of a row turns the provider's at-least-once delivery into an
//! exactly-once ledger effect: the marker is inserted in the same transaction
//! as the effect it guards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Marker row for a handled provider event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedEvent {
    /// Provider event id (primary key)
    pub event_id: String,

    /// When the event was handled
    pub received_at: DateTime<Utc>,
}

impl ProcessedEvent {
    pub fn new(event_id: impl Into<String>, received_at: DateTime<Utc>) -> Self {
        Self {
            event_id: event_id.into(),
            received_at,
        }
    }
}

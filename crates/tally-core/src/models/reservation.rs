//! Token reservation model
//!
//! A reservation is a short-lived hold on tokens for pending work. The
//! lifecycle is strict: ACTIVE is the only non-terminal state, and exactly one
//! commit or one release moves a reservation into its terminal state.

use crate::error::AppError;
use crate::AppResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Reservation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
    /// Reservation is holding tokens
    #[default]
    Active,
    /// Tokens were consumed (possibly with a partial release)
    Committed,
    /// Held tokens were returned without consumption
    Released,
    /// The TTL elapsed and the sweep returned the hold
    Expired,
    /// Operator cancellation returned the hold
    Cancelled,
}

impl fmt::Display for ReservationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReservationState::Active => write!(f, "active"),
            ReservationState::Committed => write!(f, "committed"),
            ReservationState::Released => write!(f, "released"),
            ReservationState::Expired => write!(f, "expired"),
            ReservationState::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl ReservationState {
    /// Parse from string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(ReservationState::Active),
            "committed" => Some(ReservationState::Committed),
            "released" => Some(ReservationState::Released),
            "expired" => Some(ReservationState::Expired),
            "cancelled" => Some(ReservationState::Cancelled),
            _ => None,
        }
    }

    /// Terminal states are sinks
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationState::Active)
    }

    /// Allowed transitions: ACTIVE -> {COMMITTED, RELEASED, EXPIRED, CANCELLED}
    pub fn can_transition_to(&self, next: ReservationState) -> bool {
        matches!(self, ReservationState::Active) && next.is_terminal()
    }
}

/// Result of splitting a commit into consumed and returned portions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitSplit {
    /// Tokens actually consumed
    pub committed: i64,
    /// Unused remainder returned to the available balance
    pub released: i64,
}

/// Split a commit of `actual` tokens against a reservation of `estimated`.
///
/// `actual <= 0` is an argument error, not a state error. `actual` above the
/// estimate is refused outright: the caller must round down beforehand, the
/// ledger never caps silently.
pub fn split_commit(reservation_id: Uuid, estimated: i64, actual: i64) -> AppResult<CommitSplit> {
    if actual <= 0 {
        return Err(AppError::InvalidInput(format!(
            "commit amount must be positive, got {}",
            actual
        )));
    }
    if actual > estimated {
        return Err(AppError::CommitExceedsReserved {
            reservation_id: reservation_id.to_string(),
            estimated,
            actual,
        });
    }
    Ok(CommitSplit {
        committed: actual,
        released: estimated - actual,
    })
}

/// Token reservation entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenReservation {
    /// Unique identifier
    pub id: Uuid,

    /// Owning user
    pub user_id: Uuid,

    /// Tokens held while the reservation is active
    pub estimated_tokens: i64,

    /// Tokens consumed by the commit (0 until committed)
    pub committed_tokens: i64,

    /// Current lifecycle state
    pub state: ReservationState,

    /// Caller-supplied correlation (e.g. the job that requested the hold)
    pub job_ref: Option<String>,

    /// When the expiry sweep may reclaim the hold
    pub expires_at: DateTime<Utc>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl TokenReservation {
    /// Create a new active reservation
    pub fn new(
        user_id: Uuid,
        estimated_tokens: i64,
        job_ref: Option<String>,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            estimated_tokens,
            committed_tokens: 0,
            state: ReservationState::Active,
            job_ref,
            expires_at: now + ttl,
            created_at: now,
            updated_at: now,
        }
    }

    /// Tokens still held (full estimate while active, nothing afterwards)
    pub fn held(&self) -> i64 {
        match self.state {
            ReservationState::Active => self.estimated_tokens,
            _ => 0,
        }
    }

    /// Unconsumed remainder to return on release
    pub fn releasable(&self) -> i64 {
        self.estimated_tokens - self.committed_tokens
    }

    /// Whether the sweep may expire this reservation at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.state == ReservationState::Active && now > self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_roundtrip() {
        for state in [
            ReservationState::Active,
            ReservationState::Committed,
            ReservationState::Released,
            ReservationState::Expired,
            ReservationState::Cancelled,
        ] {
            assert_eq!(ReservationState::parse(&state.to_string()), Some(state));
        }
        assert_eq!(ReservationState::parse("bogus"), None);
    }

    #[test]
    fn test_transitions() {
        let active = ReservationState::Active;
        assert!(active.can_transition_to(ReservationState::Committed));
        assert!(active.can_transition_to(ReservationState::Released));
        assert!(active.can_transition_to(ReservationState::Expired));
        assert!(active.can_transition_to(ReservationState::Cancelled));
        assert!(!active.can_transition_to(ReservationState::Active));

        // Terminal states are sinks
        for terminal in [
            ReservationState::Committed,
            ReservationState::Released,
            ReservationState::Expired,
            ReservationState::Cancelled,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(ReservationState::Released));
            assert!(!terminal.can_transition_to(ReservationState::Active));
        }
    }

    #[test]
    fn test_split_commit_partial() {
        let split = split_commit(Uuid::new_v4(), 1000, 600).unwrap();
        assert_eq!(split.committed, 600);
        assert_eq!(split.released, 400);
    }

    #[test]
    fn test_split_commit_exact() {
        let split = split_commit(Uuid::new_v4(), 1000, 1000).unwrap();
        assert_eq!(split.committed, 1000);
        assert_eq!(split.released, 0);
    }

    #[test]
    fn test_split_commit_overdraw_rejected() {
        let err = split_commit(Uuid::new_v4(), 1000, 1500).unwrap_err();
        match err {
            AppError::CommitExceedsReserved {
                estimated, actual, ..
            } => {
                assert_eq!(estimated, 1000);
                assert_eq!(actual, 1500);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_split_commit_rejects_non_positive() {
        assert!(matches!(
            split_commit(Uuid::new_v4(), 1000, 0),
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            split_commit(Uuid::new_v4(), 1000, -5),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_held_and_releasable() {
        let now = Utc::now();
        let mut r = TokenReservation::new(
            Uuid::new_v4(),
            1000,
            Some("job-1".to_string()),
            now,
            chrono::Duration::minutes(30),
        );
        assert_eq!(r.held(), 1000);
        assert_eq!(r.releasable(), 1000);

        r.state = ReservationState::Committed;
        r.committed_tokens = 600;
        assert_eq!(r.held(), 0);
        assert_eq!(r.releasable(), 400);
    }

    #[test]
    fn test_expiry_predicate() {
        let now = Utc::now();
        let mut r = TokenReservation::new(Uuid::new_v4(), 10, None, now, chrono::Duration::minutes(30));
        assert!(!r.is_expired_at(now));
        assert!(r.is_expired_at(now + chrono::Duration::minutes(31)));

        r.state = ReservationState::Released;
        assert!(!r.is_expired_at(now + chrono::Duration::minutes(31)));
    }

    #[test]
    fn test_commit_plus_release_equals_estimated() {
        // Terminal-state accounting identity for arbitrary valid splits
        for actual in [1, 250, 999, 1000] {
            let split = split_commit(Uuid::new_v4(), 1000, actual).unwrap();
            assert_eq!(split.committed + split.released, 1000);
        }
    }
}

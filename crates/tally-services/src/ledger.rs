//! Ledger service
//!
//! The single writer for balances, reservations, and the transaction journal.
//! Every operation runs inside one database transaction with a row lock on
//! the affected balance; the journal row, the balance mutation, and any
//! reservation change land atomically or not at all.
//!
//! Idempotency protocol for a write `W(type, key, params)`:
//!
//! 1. Pool-level probe of the journal by key.
//! 2. On a hit with the same parameters, the prior outcome is reconstructed
//!    and returned; a hit with different parameters is a conflict.
//! 3. On a miss, the balance row is locked and the key re-probed before the
//!    write (a racing worker may have won in between).
//! 4. A unique-constraint violation on the key during the write rolls the
//!    transaction back and loops once through the probe.
//!
//! The `*_in_tx` variants are public so the webhook processor can compose a
//! ledger effect with the payment mutation and the processed-event marker in
//! one transaction.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};
use tally_core::clock::SharedClock;
use tally_core::models::{
    split_commit, ReservationState, TokenBalance, TokenReservation, TokenTransaction,
    TransactionType,
};
use tally_core::{AppError, AppResult};
use tally_db::repositories::transaction_repo::NewTransaction;
use tally_db::{
    is_unique_violation, BalanceRepository, ReservationRepository, TransactionRepository,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Source label for sweep-issued releases
pub const EXPIRY_SOURCE: &str = "expiry_sweep";

/// Outcome of a reserve call
#[derive(Debug, Clone)]
pub struct ReserveOutcome {
    pub reservation: TokenReservation,
    pub balance: TokenBalance,
    /// True when a prior call with the same key already did the work
    pub replayed: bool,
}

/// Outcome of a commit call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOutcome {
    pub committed: i64,
    pub released: i64,
    pub replayed: bool,
}

/// Outcome of a release call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseOutcome {
    pub released: i64,
    pub replayed: bool,
}

/// Outcome of a credit call
#[derive(Debug, Clone)]
pub struct CreditOutcome {
    pub transaction: TokenTransaction,
    pub replayed: bool,
}

/// Outcome of a deduction (refund/dispute clawback)
#[derive(Debug, Clone)]
pub struct DeductOutcome {
    pub deducted: i64,
    pub balance_after_available: i64,
    pub replayed: bool,
}

/// Transactional token ledger
pub struct LedgerService {
    pool: PgPool,
    balances: BalanceRepository,
    reservations: ReservationRepository,
    journal: TransactionRepository,
    clock: SharedClock,
    reservation_ttl: Duration,
}

impl LedgerService {
    /// Create a new ledger service
    pub fn new(pool: PgPool, clock: SharedClock, reservation_ttl_minutes: i64) -> Self {
        Self {
            balances: BalanceRepository::new(pool.clone()),
            reservations: ReservationRepository::new(pool.clone()),
            journal: TransactionRepository::new(pool.clone()),
            pool,
            clock,
            reservation_ttl: Duration::minutes(reservation_ttl_minutes),
        }
    }

    /// Journal access for collaborators (refund policy, reconciliation)
    pub fn journal(&self) -> &TransactionRepository {
        &self.journal
    }

    /// Reservation access for collaborators (reconciliation)
    pub fn reservations(&self) -> &ReservationRepository {
        &self.reservations
    }

    async fn begin(&self) -> AppResult<Transaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| AppError::Transaction(format!("Failed to start transaction: {}", e)))
    }

    async fn commit_tx(&self, tx: Transaction<'_, Postgres>) -> AppResult<()> {
        tx.commit()
            .await
            .map_err(|e| AppError::Transaction(format!("Failed to commit transaction: {}", e)))
    }

    // ==================== Balance reads ====================

    /// Current balance, zero when the user has no record yet
    #[instrument(skip(self))]
    pub async fn get_balance(&self, user_id: Uuid) -> AppResult<TokenBalance> {
        Ok(self
            .balances
            .find_by_user(user_id)
            .await?
            .unwrap_or_else(|| TokenBalance::empty(user_id, self.clock.now())))
    }

    // ==================== Reserve ====================

    /// Place a hold of `estimated_tokens` against the user's available balance
    #[instrument(skip(self))]
    pub async fn reserve(
        &self,
        user_id: Uuid,
        estimated_tokens: i64,
        job_ref: Option<&str>,
        source: &str,
        idempotency_key: &str,
    ) -> AppResult<ReserveOutcome> {
        if estimated_tokens <= 0 {
            return Err(AppError::InvalidInput(format!(
                "reserve amount must be positive, got {}",
                estimated_tokens
            )));
        }

        if let Some(prior) = self.journal.find_by_key(idempotency_key).await? {
            return self.replay_reserve(prior, user_id, estimated_tokens).await;
        }

        let mut tx = self.begin().await?;
        let result = self
            .reserve_body(
                &mut tx,
                user_id,
                estimated_tokens,
                job_ref,
                source,
                idempotency_key,
            )
            .await;

        match result {
            Ok(outcome) => {
                self.commit_tx(tx).await?;
                info!(
                    user = %user_id,
                    reservation = %outcome.reservation.id,
                    tokens = estimated_tokens,
                    "reserved tokens"
                );
                Ok(outcome)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                if matches!(e, AppError::IdempotencyConflict(_)) {
                    if let Some(prior) = self.journal.find_by_key(idempotency_key).await? {
                        return self.replay_reserve(prior, user_id, estimated_tokens).await;
                    }
                }
                Err(e)
            }
        }
    }

    async fn reserve_body(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        estimated_tokens: i64,
        job_ref: Option<&str>,
        source: &str,
        idempotency_key: &str,
    ) -> AppResult<ReserveOutcome> {
        let balance = self.balances.lock_for_update(tx, user_id).await?;

        if let Some(prior) = self.journal.find_by_key_in_tx(tx, idempotency_key).await? {
            return self
                .replay_reserve_with_balance(prior, user_id, estimated_tokens, balance)
                .await;
        }

        if !balance.can_reserve(estimated_tokens) {
            warn!(
                user = %user_id,
                available = balance.available,
                requested = estimated_tokens,
                "insufficient tokens for reservation"
            );
            return Err(AppError::insufficient_tokens(
                balance.available,
                estimated_tokens,
            ));
        }

        let now = self.clock.now();
        let reservation = TokenReservation::new(
            user_id,
            estimated_tokens,
            job_ref.map(str::to_string),
            now,
            self.reservation_ttl,
        );
        self.reservations.insert_in_tx(tx, &reservation).await?;

        let balance = self
            .balances
            .apply_delta_in_tx(tx, user_id, -estimated_tokens, estimated_tokens)
            .await?;

        let reservation_ref = reservation.id.to_string();
        let entry = NewTransaction {
            user_id,
            tx_type: TransactionType::Reserve,
            source,
            amount_tokens: estimated_tokens,
            ref_id: Some(&reservation_ref),
            idempotency_key,
            balance_after_available: balance.available,
            balance_after_reserved: balance.reserved,
            meta: job_ref.map(|r| json!({ "ref": r })),
        };
        self.insert_journal(tx, &entry, idempotency_key).await?;

        Ok(ReserveOutcome {
            reservation,
            balance,
            replayed: false,
        })
    }

    async fn replay_reserve(
        &self,
        prior: TokenTransaction,
        user_id: Uuid,
        estimated_tokens: i64,
    ) -> AppResult<ReserveOutcome> {
        let balance = self.get_balance(user_id).await?;
        self.replay_reserve_with_balance(prior, user_id, estimated_tokens, balance)
            .await
    }

    async fn replay_reserve_with_balance(
        &self,
        prior: TokenTransaction,
        user_id: Uuid,
        estimated_tokens: i64,
        balance: TokenBalance,
    ) -> AppResult<ReserveOutcome> {
        if !prior.matches_replay(TransactionType::Reserve, user_id, Some(estimated_tokens), None) {
            return Err(AppError::IdempotencyConflict(prior.idempotency_key));
        }
        let reservation_id = prior
            .ref_id
            .as_deref()
            .and_then(|r| Uuid::parse_str(r).ok())
            .ok_or_else(|| {
                AppError::Internal(format!(
                    "reserve journal row {} has no reservation ref",
                    prior.id
                ))
            })?;
        let reservation = self
            .reservations
            .find_by_id(reservation_id)
            .await?
            .ok_or_else(|| {
                AppError::Internal(format!("reservation {} missing for replay", reservation_id))
            })?;

        debug!(key = %prior.idempotency_key, "reserve replayed from journal");
        Ok(ReserveOutcome {
            reservation,
            balance,
            replayed: true,
        })
    }

    // ==================== Commit ====================

    /// Consume `actual_tokens` of an active reservation, releasing the rest.
    ///
    /// One commit or one release per reservation; a retry with the original
    /// key replays the first result.
    #[instrument(skip(self))]
    pub async fn commit(
        &self,
        reservation_id: Uuid,
        actual_tokens: i64,
        source: &str,
        idempotency_key: &str,
    ) -> AppResult<CommitOutcome> {
        if actual_tokens <= 0 {
            return Err(AppError::InvalidInput(format!(
                "commit amount must be positive, got {}",
                actual_tokens
            )));
        }

        if let Some(prior) = self.journal.find_by_key(idempotency_key).await? {
            return self.replay_commit(prior, reservation_id, actual_tokens).await;
        }

        let mut tx = self.begin().await?;
        let result = self
            .commit_body(&mut tx, reservation_id, actual_tokens, source, idempotency_key)
            .await;

        match result {
            Ok(outcome) => {
                self.commit_tx(tx).await?;
                info!(
                    reservation = %reservation_id,
                    committed = outcome.committed,
                    released = outcome.released,
                    "committed reservation"
                );
                Ok(outcome)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                if matches!(e, AppError::IdempotencyConflict(_)) {
                    if let Some(prior) = self.journal.find_by_key(idempotency_key).await? {
                        return self.replay_commit(prior, reservation_id, actual_tokens).await;
                    }
                }
                Err(e)
            }
        }
    }

    async fn commit_body(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        reservation_id: Uuid,
        actual_tokens: i64,
        source: &str,
        idempotency_key: &str,
    ) -> AppResult<CommitOutcome> {
        let reservation = self
            .reservations
            .lock_by_id_in_tx(tx, reservation_id)
            .await?
            .ok_or_else(|| AppError::ReservationNotActive(reservation_id.to_string()))?;

        self.balances
            .lock_for_update(tx, reservation.user_id)
            .await?;

        if let Some(prior) = self.journal.find_by_key_in_tx(tx, idempotency_key).await? {
            return self
                .replay_commit_with(prior, &reservation, actual_tokens)
                .await;
        }

        if reservation.state != ReservationState::Active {
            return Err(AppError::ReservationNotActive(format!(
                "{} is {}",
                reservation_id, reservation.state
            )));
        }

        let split = split_commit(reservation.id, reservation.estimated_tokens, actual_tokens)?;

        let balance = self
            .balances
            .apply_delta_in_tx(
                tx,
                reservation.user_id,
                split.released,
                -reservation.estimated_tokens,
            )
            .await?;

        self.reservations
            .finalize_in_tx(tx, reservation.id, ReservationState::Committed, split.committed)
            .await?;

        let reservation_ref = reservation.id.to_string();
        let entry = NewTransaction {
            user_id: reservation.user_id,
            tx_type: TransactionType::Commit,
            source,
            amount_tokens: split.committed,
            ref_id: Some(&reservation_ref),
            idempotency_key,
            balance_after_available: balance.available,
            balance_after_reserved: balance.reserved,
            meta: None,
        };
        self.insert_journal(tx, &entry, idempotency_key).await?;

        if split.released > 0 {
            let release_key = format!("{idempotency_key}:release");
            let entry = NewTransaction {
                user_id: reservation.user_id,
                tx_type: TransactionType::Release,
                source,
                amount_tokens: split.released,
                ref_id: Some(&reservation_ref),
                idempotency_key: &release_key,
                balance_after_available: balance.available,
                balance_after_reserved: balance.reserved,
                meta: Some(json!({ "reason": "partial_commit" })),
            };
            self.insert_journal(tx, &entry, &release_key).await?;
        }

        Ok(CommitOutcome {
            committed: split.committed,
            released: split.released,
            replayed: false,
        })
    }

    async fn replay_commit(
        &self,
        prior: TokenTransaction,
        reservation_id: Uuid,
        actual_tokens: i64,
    ) -> AppResult<CommitOutcome> {
        let reservation = self
            .reservations
            .find_by_id(reservation_id)
            .await?
            .ok_or_else(|| AppError::ReservationNotActive(reservation_id.to_string()))?;
        self.replay_commit_with(prior, &reservation, actual_tokens)
            .await
    }

    async fn replay_commit_with(
        &self,
        prior: TokenTransaction,
        reservation: &TokenReservation,
        actual_tokens: i64,
    ) -> AppResult<CommitOutcome> {
        let reservation_ref = reservation.id.to_string();
        if !prior.matches_replay(
            TransactionType::Commit,
            reservation.user_id,
            Some(actual_tokens),
            Some(&reservation_ref),
        ) {
            return Err(AppError::IdempotencyConflict(prior.idempotency_key));
        }

        debug!(key = %prior.idempotency_key, "commit replayed from journal");
        Ok(CommitOutcome {
            committed: prior.amount_tokens,
            released: reservation.estimated_tokens - prior.amount_tokens,
            replayed: true,
        })
    }

    // ==================== Release / cancel / expire ====================

    /// Return the full unconsumed remainder of an active reservation
    #[instrument(skip(self))]
    pub async fn release(
        &self,
        reservation_id: Uuid,
        reason: &str,
        source: &str,
        idempotency_key: &str,
    ) -> AppResult<ReleaseOutcome> {
        self.release_as(
            reservation_id,
            ReservationState::Released,
            reason,
            source,
            idempotency_key,
        )
        .await
    }

    /// Operator cancellation; same arithmetic as release, distinct terminal state
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        reservation_id: Uuid,
        reason: &str,
        source: &str,
        idempotency_key: &str,
    ) -> AppResult<ReleaseOutcome> {
        self.release_as(
            reservation_id,
            ReservationState::Cancelled,
            reason,
            source,
            idempotency_key,
        )
        .await
    }

    async fn release_as(
        &self,
        reservation_id: Uuid,
        target: ReservationState,
        reason: &str,
        source: &str,
        idempotency_key: &str,
    ) -> AppResult<ReleaseOutcome> {
        debug_assert!(target.is_terminal());

        if let Some(prior) = self.journal.find_by_key(idempotency_key).await? {
            return self.replay_release(prior, reservation_id).await;
        }

        let mut tx = self.begin().await?;
        let result = self
            .release_body(&mut tx, reservation_id, target, reason, source, idempotency_key)
            .await;

        match result {
            Ok(outcome) => {
                self.commit_tx(tx).await?;
                info!(
                    reservation = %reservation_id,
                    released = outcome.released,
                    state = %target,
                    "released reservation"
                );
                Ok(outcome)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                if matches!(e, AppError::IdempotencyConflict(_)) {
                    if let Some(prior) = self.journal.find_by_key(idempotency_key).await? {
                        return self.replay_release(prior, reservation_id).await;
                    }
                }
                Err(e)
            }
        }
    }

    async fn release_body(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        reservation_id: Uuid,
        target: ReservationState,
        reason: &str,
        source: &str,
        idempotency_key: &str,
    ) -> AppResult<ReleaseOutcome> {
        let reservation = self
            .reservations
            .lock_by_id_in_tx(tx, reservation_id)
            .await?
            .ok_or_else(|| AppError::ReservationNotActive(reservation_id.to_string()))?;

        self.balances
            .lock_for_update(tx, reservation.user_id)
            .await?;

        if let Some(prior) = self.journal.find_by_key_in_tx(tx, idempotency_key).await? {
            let reservation_ref = reservation.id.to_string();
            if !prior.matches_replay(
                TransactionType::Release,
                reservation.user_id,
                None,
                Some(&reservation_ref),
            ) {
                return Err(AppError::IdempotencyConflict(prior.idempotency_key));
            }
            return Ok(ReleaseOutcome {
                released: prior.amount_tokens,
                replayed: true,
            });
        }

        if reservation.state != ReservationState::Active {
            return Err(AppError::ReservationNotActive(format!(
                "{} is {}",
                reservation_id, reservation.state
            )));
        }

        let released = reservation.releasable();

        let balance = self
            .balances
            .apply_delta_in_tx(tx, reservation.user_id, released, -released)
            .await?;

        self.reservations
            .finalize_in_tx(tx, reservation.id, target, reservation.committed_tokens)
            .await?;

        let reservation_ref = reservation.id.to_string();
        let entry = NewTransaction {
            user_id: reservation.user_id,
            tx_type: TransactionType::Release,
            source,
            amount_tokens: released,
            ref_id: Some(&reservation_ref),
            idempotency_key,
            balance_after_available: balance.available,
            balance_after_reserved: balance.reserved,
            meta: Some(json!({ "reason": reason })),
        };
        self.insert_journal(tx, &entry, idempotency_key).await?;

        Ok(ReleaseOutcome {
            released,
            replayed: false,
        })
    }

    async fn replay_release(
        &self,
        prior: TokenTransaction,
        reservation_id: Uuid,
    ) -> AppResult<ReleaseOutcome> {
        let reservation_ref = reservation_id.to_string();
        if !prior.matches_replay(
            TransactionType::Release,
            prior.user_id,
            None,
            Some(&reservation_ref),
        ) {
            return Err(AppError::IdempotencyConflict(prior.idempotency_key));
        }
        debug!(key = %prior.idempotency_key, "release replayed from journal");
        Ok(ReleaseOutcome {
            released: prior.amount_tokens,
            replayed: true,
        })
    }

    /// Sweep reservations whose TTL elapsed before `now`, releasing each as
    /// EXPIRED under the key `expire:{id}`. A reservation that a concurrent
    /// commit or release won in the meantime is skipped.
    #[instrument(skip(self))]
    pub async fn expire_active_reservations(
        &self,
        now: DateTime<Utc>,
        batch: i64,
    ) -> AppResult<u64> {
        let ids = self.reservations.expired_active_ids(now, batch).await?;
        let mut expired = 0u64;

        for id in ids {
            let key = crate::idempotency::expire_key(id);
            match self
                .release_as(id, ReservationState::Expired, "expired", EXPIRY_SOURCE, &key)
                .await
            {
                Ok(outcome) if !outcome.replayed => expired += 1,
                Ok(_) => {}
                Err(AppError::ReservationNotActive(_)) => {
                    debug!(reservation = %id, "expiry lost race to commit/release");
                }
                Err(e) => return Err(e),
            }
        }

        if expired > 0 {
            info!(count = expired, "expired reservations");
        }
        Ok(expired)
    }

    // ==================== Credits ====================

    /// Credit purchased tokens
    #[instrument(skip(self, meta))]
    pub async fn credit_purchase(
        &self,
        user_id: Uuid,
        tokens: i64,
        idempotency_key: &str,
        ref_id: Option<&str>,
        source: &str,
        meta: Option<serde_json::Value>,
    ) -> AppResult<CreditOutcome> {
        self.credit(
            TransactionType::Purchase,
            user_id,
            tokens,
            idempotency_key,
            ref_id,
            source,
            meta,
        )
        .await
    }

    /// Credit a manual or compensating adjustment
    #[instrument(skip(self, meta))]
    pub async fn credit_adjustment(
        &self,
        user_id: Uuid,
        tokens: i64,
        idempotency_key: &str,
        ref_id: Option<&str>,
        source: &str,
        meta: Option<serde_json::Value>,
    ) -> AppResult<CreditOutcome> {
        self.credit(
            TransactionType::Adjustment,
            user_id,
            tokens,
            idempotency_key,
            ref_id,
            source,
            meta,
        )
        .await
    }

    async fn credit(
        &self,
        tx_type: TransactionType,
        user_id: Uuid,
        tokens: i64,
        idempotency_key: &str,
        ref_id: Option<&str>,
        source: &str,
        meta: Option<serde_json::Value>,
    ) -> AppResult<CreditOutcome> {
        if tokens <= 0 {
            return Err(AppError::InvalidInput(format!(
                "credit amount must be positive, got {}",
                tokens
            )));
        }

        if let Some(prior) = self.journal.find_by_key(idempotency_key).await? {
            return replay_credit(prior, tx_type, user_id, tokens, ref_id);
        }

        let mut tx = self.begin().await?;
        let result = self
            .credit_in_tx(
                &mut tx,
                tx_type,
                user_id,
                tokens,
                idempotency_key,
                ref_id,
                source,
                meta,
            )
            .await;

        match result {
            Ok(outcome) => {
                self.commit_tx(tx).await?;
                info!(user = %user_id, tokens, kind = %tx_type, "credited tokens");
                Ok(outcome)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                if matches!(e, AppError::IdempotencyConflict(_)) {
                    if let Some(prior) = self.journal.find_by_key(idempotency_key).await? {
                        return replay_credit(prior, tx_type, user_id, tokens, ref_id);
                    }
                }
                Err(e)
            }
        }
    }

    /// Credit inside a caller-owned transaction (webhook composition)
    #[allow(clippy::too_many_arguments)]
    pub async fn credit_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tx_type: TransactionType,
        user_id: Uuid,
        tokens: i64,
        idempotency_key: &str,
        ref_id: Option<&str>,
        source: &str,
        meta: Option<serde_json::Value>,
    ) -> AppResult<CreditOutcome> {
        if tokens <= 0 {
            return Err(AppError::InvalidInput(format!(
                "credit amount must be positive, got {}",
                tokens
            )));
        }

        self.balances.lock_for_update(tx, user_id).await?;

        if let Some(prior) = self.journal.find_by_key_in_tx(tx, idempotency_key).await? {
            return replay_credit(prior, tx_type, user_id, tokens, ref_id);
        }

        let balance = self
            .balances
            .apply_delta_in_tx(tx, user_id, tokens, 0)
            .await?;

        let entry = NewTransaction {
            user_id,
            tx_type,
            source,
            amount_tokens: tokens,
            ref_id,
            idempotency_key,
            balance_after_available: balance.available,
            balance_after_reserved: balance.reserved,
            meta,
        };
        let transaction = self.insert_journal(tx, &entry, idempotency_key).await?;

        Ok(CreditOutcome {
            transaction,
            replayed: false,
        })
    }

    // ==================== Deductions ====================

    /// Deduct tokens from the available balance.
    ///
    /// Whether the balance may go negative is the caller's policy decision;
    /// with `allow_negative = false` a shortfall is `InsufficientTokens`.
    /// The journal records a REFUND row with the canonical negative sign.
    #[instrument(skip(self, meta))]
    pub async fn deduct_tokens(
        &self,
        user_id: Uuid,
        tokens: i64,
        idempotency_key: &str,
        ref_id: Option<&str>,
        source: &str,
        meta: Option<serde_json::Value>,
        allow_negative: bool,
    ) -> AppResult<DeductOutcome> {
        if tokens <= 0 {
            return Err(AppError::InvalidInput(format!(
                "deduction amount must be positive, got {}",
                tokens
            )));
        }

        if let Some(prior) = self.journal.find_by_key(idempotency_key).await? {
            return replay_deduct(prior, user_id, tokens, ref_id);
        }

        let mut tx = self.begin().await?;
        let result = self
            .deduct_in_tx(
                &mut tx,
                user_id,
                tokens,
                idempotency_key,
                ref_id,
                source,
                meta,
                allow_negative,
            )
            .await;

        match result {
            Ok(outcome) => {
                self.commit_tx(tx).await?;
                info!(user = %user_id, tokens, "deducted tokens");
                Ok(outcome)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                if matches!(e, AppError::IdempotencyConflict(_)) {
                    if let Some(prior) = self.journal.find_by_key(idempotency_key).await? {
                        return replay_deduct(prior, user_id, tokens, ref_id);
                    }
                }
                Err(e)
            }
        }
    }

    /// Deduct inside a caller-owned transaction (webhook composition).
    ///
    /// Accepts zero so a fully capped refund still journals its key and stays
    /// idempotent across redeliveries.
    #[allow(clippy::too_many_arguments)]
    pub async fn deduct_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        tokens: i64,
        idempotency_key: &str,
        ref_id: Option<&str>,
        source: &str,
        meta: Option<serde_json::Value>,
        allow_negative: bool,
    ) -> AppResult<DeductOutcome> {
        if tokens < 0 {
            return Err(AppError::InvalidInput(format!(
                "deduction amount must not be negative, got {}",
                tokens
            )));
        }

        let balance = self.balances.lock_for_update(tx, user_id).await?;

        if let Some(prior) = self.journal.find_by_key_in_tx(tx, idempotency_key).await? {
            return replay_deduct(prior, user_id, tokens, ref_id);
        }

        if tokens > 0 && !allow_negative && balance.available < tokens {
            return Err(AppError::insufficient_tokens(balance.available, tokens));
        }

        let balance = self
            .balances
            .apply_delta_in_tx(tx, user_id, -tokens, 0)
            .await?;

        let entry = NewTransaction {
            user_id,
            tx_type: TransactionType::Refund,
            source,
            amount_tokens: -tokens,
            ref_id,
            idempotency_key,
            balance_after_available: balance.available,
            balance_after_reserved: balance.reserved,
            meta,
        };
        self.insert_journal(tx, &entry, idempotency_key).await?;

        Ok(DeductOutcome {
            deducted: tokens,
            balance_after_available: balance.available,
            replayed: false,
        })
    }

    // ==================== Journal insert ====================

    async fn insert_journal(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        entry: &NewTransaction<'_>,
        key: &str,
    ) -> AppResult<TokenTransaction> {
        self.journal.insert_in_tx(tx, entry).await.map_err(|e| {
            if is_unique_violation(&e) {
                // A concurrent worker landed the same key first; the caller
                // rolls back and replays from the journal.
                AppError::IdempotencyConflict(key.to_string())
            } else {
                AppError::Database(format!("Failed to append journal row: {}", e))
            }
        })
    }
}

fn replay_credit(
    prior: TokenTransaction,
    tx_type: TransactionType,
    user_id: Uuid,
    tokens: i64,
    ref_id: Option<&str>,
) -> AppResult<CreditOutcome> {
    if !prior.matches_replay(tx_type, user_id, Some(tokens), ref_id) {
        return Err(AppError::IdempotencyConflict(prior.idempotency_key));
    }
    debug!(key = %prior.idempotency_key, "credit replayed from journal");
    Ok(CreditOutcome {
        transaction: prior,
        replayed: true,
    })
}

fn replay_deduct(
    prior: TokenTransaction,
    user_id: Uuid,
    tokens: i64,
    ref_id: Option<&str>,
) -> AppResult<DeductOutcome> {
    if !prior.matches_replay(TransactionType::Refund, user_id, Some(tokens), ref_id) {
        return Err(AppError::IdempotencyConflict(prior.idempotency_key));
    }
    debug!(key = %prior.idempotency_key, "deduction replayed from journal");
    Ok(DeductOutcome {
        deducted: prior.magnitude(),
        balance_after_available: prior.balance_after_available,
        replayed: true,
    })
}

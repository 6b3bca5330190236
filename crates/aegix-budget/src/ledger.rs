use aegix_core::{
    AegixError, Amount, SessionId, SessionKey, SessionStatus, Timestamp, BUDGET_LOCK_TIMEOUT_MS,
};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Per-session spend accounting. `staged_micro` tracks amounts reserved by
/// an in-flight payment that has not yet reached a terminal state; it is
/// moved into `spent_micro` on `commit` or discarded on `release`, mirroring
/// a stage-then-commit mutation rather than mutating `spent_micro` directly.
///
/// The spend limit resets on the UTC calendar-day boundary, not a rolling
/// window measured from `granted_at` — two sessions granted at different
/// times of day both reset at the same midnight.
struct SessionBudget {
    spent_micro: Amount,
    staged_micro: Amount,
    last_reset_date: chrono::NaiveDate,
    limit_micro: Amount,
}

impl SessionBudget {
    fn new(session: &SessionKey, now: Timestamp) -> Self {
        Self {
            spent_micro: 0,
            staged_micro: 0,
            last_reset_date: date_of(now),
            limit_micro: session.daily_limit_micro,
        }
    }

    fn roll_period_if_needed(&mut self, now: Timestamp) {
        let today = date_of(now);
        if today != self.last_reset_date {
            self.spent_micro = 0;
            self.staged_micro = 0;
            self.last_reset_date = today;
        }
    }

    fn committed_and_staged(&self) -> Amount {
        self.spent_micro + self.staged_micro
    }
}

fn date_of(ts: Timestamp) -> chrono::NaiveDate {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.date_naive())
        .unwrap_or_else(|| chrono::Utc::now().date_naive())
}

/// A pending spend reservation returned by `validate_and_reserve`. Must be
/// resolved with either `commit` or `release` — an unresolved reservation
/// permanently counts against the session's limit until the period rolls
/// over, so callers must always resolve it in a `finally`-style path.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub session_id: SessionId,
    pub amount_micro: Amount,
}

/// In-memory, per-session spending ledger enforcing `SessionKey.daily_limit_micro`
/// over a rolling `spend_period_secs` window. Each session gets its own
/// `Arc<Mutex<SessionBudget>>` (a registry field, never a global static) so
/// unrelated sessions never contend.
pub struct BudgetLedger {
    sessions: DashMap<SessionId, Arc<Mutex<SessionBudget>>>,
}

impl BudgetLedger {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    fn now() -> Timestamp {
        chrono::Utc::now().timestamp()
    }

    fn mutex_for(&self, session: &SessionKey) -> Arc<Mutex<SessionBudget>> {
        self.sessions
            .entry(session.session_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(SessionBudget::new(session, Self::now()))))
            .clone()
    }

    /// Validate `amount_micro` against the session's status, expiry,
    /// per-transaction cap, and remaining daily budget, then stage it.
    /// Returns `SessionRevoked`/`SessionExpired` if the session is no longer
    /// usable, `MaxPerTxExceeded` if `amount_micro` alone exceeds
    /// `session.max_per_tx`, `DailyLimitExceeded` if the cumulative
    /// committed-plus-staged spend would exceed the limit, or `LockTimeout`
    /// if the per-session mutex cannot be acquired within
    /// `BUDGET_LOCK_TIMEOUT_MS`.
    pub async fn validate_and_reserve(
        &self,
        session: &SessionKey,
        amount_micro: Amount,
    ) -> Result<Reservation, AegixError> {
        if session.status == SessionStatus::Revoked {
            return Err(AegixError::SessionRevoked(session.session_id.clone()));
        }
        let now = Self::now();
        if session.status == SessionStatus::Expired || now >= session.expires_at {
            return Err(AegixError::SessionExpired(session.session_id.clone()));
        }
        if amount_micro > session.max_per_tx {
            return Err(AegixError::MaxPerTxExceeded {
                session_id: session.session_id.clone(),
                max_per_tx: session.max_per_tx,
                requested: amount_micro,
            });
        }

        let mutex = self.mutex_for(session);
        let mut guard = timeout(Duration::from_millis(BUDGET_LOCK_TIMEOUT_MS), mutex.lock())
            .await
            .map_err(|_| AegixError::LockTimeout(session.session_id.clone()))?;

        guard.roll_period_if_needed(Self::now());
        let prospective = guard.committed_and_staged() + amount_micro;
        if prospective > guard.limit_micro {
            return Err(AegixError::DailyLimitExceeded {
                session_id: session.session_id.clone(),
                limit: guard.limit_micro,
                requested: prospective,
            });
        }
        guard.staged_micro += amount_micro;
        Ok(Reservation {
            session_id: session.session_id.clone(),
            amount_micro,
        })
    }

    /// Move a reservation from staged to committed once its payment reaches
    /// a terminal success state.
    pub async fn commit(&self, reservation: Reservation) -> Result<(), AegixError> {
        let mutex = self
            .sessions
            .get(&reservation.session_id)
            .map(|e| e.clone())
            .ok_or_else(|| AegixError::UnknownSession(reservation.session_id.clone()))?;
        let mut guard = timeout(Duration::from_millis(BUDGET_LOCK_TIMEOUT_MS), mutex.lock())
            .await
            .map_err(|_| AegixError::LockTimeout(reservation.session_id.clone()))?;
        guard.staged_micro = guard.staged_micro.saturating_sub(reservation.amount_micro);
        guard.spent_micro += reservation.amount_micro;
        Ok(())
    }

    /// Discard a reservation without committing it, e.g. because the
    /// payment's chain submission ultimately failed.
    pub async fn release(&self, reservation: Reservation) -> Result<(), AegixError> {
        let mutex = self
            .sessions
            .get(&reservation.session_id)
            .map(|e| e.clone())
            .ok_or_else(|| AegixError::UnknownSession(reservation.session_id.clone()))?;
        let mut guard = timeout(Duration::from_millis(BUDGET_LOCK_TIMEOUT_MS), mutex.lock())
            .await
            .map_err(|_| AegixError::LockTimeout(reservation.session_id.clone()))?;
        guard.staged_micro = guard.staged_micro.saturating_sub(reservation.amount_micro);
        Ok(())
    }

    /// Committed spend so far this period, for display in `pool.get`/audit
    /// responses.
    pub async fn spent_this_period(&self, session_id: &SessionId) -> Amount {
        match self.sessions.get(session_id) {
            Some(mutex) => {
                let mut guard = mutex.lock().await;
                guard.roll_period_if_needed(Self::now());
                guard.spent_micro
            }
            None => 0,
        }
    }

    /// Drop bookkeeping for sessions the scheduler has determined are
    /// expired/revoked, so the registry does not grow unbounded.
    pub fn remove(&self, session_id: &SessionId) {
        self.sessions.remove(session_id);
    }
}

impl Default for BudgetLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegix_core::{Address, SessionStatus};

    fn sample_session(limit: Amount) -> SessionKey {
        SessionKey {
            session_id: "sess-1".to_string(),
            owner: Address::from_bytes([1u8; 32]),
            pool_id: "pool-1".to_string(),
            daily_limit_micro: limit,
            max_per_tx: limit,
            spend_period_secs: 86_400,
            granted_at: 0,
            expires_at: 1_000_000,
            status: SessionStatus::Active,
        }
    }

    #[tokio::test]
    async fn reserve_commit_round_trip() {
        let ledger = BudgetLedger::new();
        let session = sample_session(1_000);
        let r = ledger.validate_and_reserve(&session, 400).await.unwrap();
        ledger.commit(r).await.unwrap();
        assert_eq!(ledger.spent_this_period(&session.session_id).await, 400);
    }

    #[tokio::test]
    async fn release_does_not_count_against_limit() {
        let ledger = BudgetLedger::new();
        let session = sample_session(1_000);
        let r = ledger.validate_and_reserve(&session, 900).await.unwrap();
        ledger.release(r).await.unwrap();
        let r2 = ledger.validate_and_reserve(&session, 900).await;
        assert!(r2.is_ok());
    }

    #[tokio::test]
    async fn exceeding_limit_is_rejected() {
        let ledger = BudgetLedger::new();
        let session = sample_session(1_000);
        let r = ledger.validate_and_reserve(&session, 700).await.unwrap();
        ledger.commit(r).await.unwrap();
        let err = ledger.validate_and_reserve(&session, 400).await;
        assert!(matches!(err, Err(AegixError::DailyLimitExceeded { .. })));
    }

    #[tokio::test]
    async fn amount_over_max_per_tx_is_rejected() {
        let ledger = BudgetLedger::new();
        let mut session = sample_session(10_000);
        session.max_per_tx = 500;
        let err = ledger.validate_and_reserve(&session, 600).await;
        assert!(matches!(err, Err(AegixError::MaxPerTxExceeded { .. })));
    }

    #[tokio::test]
    async fn revoked_session_is_rejected() {
        let ledger = BudgetLedger::new();
        let mut session = sample_session(1_000);
        session.status = SessionStatus::Revoked;
        let err = ledger.validate_and_reserve(&session, 100).await;
        assert!(matches!(err, Err(AegixError::SessionRevoked(_))));
    }

    #[tokio::test]
    async fn expired_session_is_rejected() {
        let ledger = BudgetLedger::new();
        let mut session = sample_session(1_000);
        session.expires_at = 1; // far in the past relative to `Self::now()`
        let err = ledger.validate_and_reserve(&session, 100).await;
        assert!(matches!(err, Err(AegixError::SessionExpired(_))));
    }

    #[tokio::test]
    async fn concurrent_reservations_never_oversubscribe_the_limit() {
        let ledger = Arc::new(BudgetLedger::new());
        let session = sample_session(1_000);

        let mut handles = Vec::new();
        for _ in 0..20 {
            let ledger = ledger.clone();
            let session = session.clone();
            handles.push(tokio::spawn(async move {
                ledger.validate_and_reserve(&session, 100).await
            }));
        }
        let mut ok_count = 0;
        for h in handles {
            if h.await.unwrap().is_ok() {
                ok_count += 1;
            }
        }
        // 1_000 / 100 = 10 reservations can succeed; the rest must be
        // rejected with `DailyLimitExceeded`, never silently oversubscribed.
        assert_eq!(ok_count, 10);
    }

    #[tokio::test]
    async fn spend_resets_at_utc_calendar_day_boundary() {
        let ledger = BudgetLedger::new();
        let session = sample_session(1_000);
        let r = ledger.validate_and_reserve(&session, 900).await.unwrap();
        ledger.commit(r).await.unwrap();
        assert_eq!(ledger.spent_this_period(&session.session_id).await, 900);

        // Roll `last_reset_date` back a day, simulating a UTC midnight
        // boundary crossing without waiting for real time to elapse. A
        // rolling "24h since last spend" window would not reset here.
        {
            let mutex = ledger.sessions.get(&session.session_id).unwrap().clone();
            let mut guard = mutex.lock().await;
            guard.last_reset_date -= chrono::Duration::days(1);
        }

        let r2 = ledger.validate_and_reserve(&session, 900).await;
        assert!(r2.is_ok(), "spend limit should have reset on the new calendar day");
        assert_eq!(ledger.spent_this_period(&session.session_id).await, 0);
    }
}

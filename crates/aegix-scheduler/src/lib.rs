use std::sync::Arc;
use std::time::Duration;

use aegix_budget::BudgetLedger;
use aegix_burner::BurnerFactory;
use aegix_chain::{ChainAdapter, SignedTx};
use aegix_core::{
    Address, PaymentMethod, PaymentSession, Timestamp, BURNER_IDLE_RECLAIM_SECS,
    CLEANUP_MAX_RESUMES_PER_TICK, CLEANUP_TICK_SECS, MUTEX_IDLE_PRUNE_SECS, PAYMENT_EXPIRY_BLOCKS,
};
use aegix_engine::{PaymentEngine, PaymentStore};
use aegix_vault::KeyVault;

/// Background maintenance described for the node's long-running processes:
/// expire stale session keys, retry Maximum-Privacy payments paused waiting
/// on the compression indexer, prune idle per-pool/per-session mutexes, and
/// reclaim rent from burner token accounts that have sat empty and idle.
///
/// Every sweep is independent and best-effort — a failure in one (e.g. the
/// chain adapter being briefly unreachable) is logged and skipped, never
/// allowed to stall the others or crash the tick loop.
pub struct CleanupScheduler {
    vault: Arc<KeyVault>,
    budget: Arc<BudgetLedger>,
    chain: Arc<dyn ChainAdapter>,
    burners: Arc<BurnerFactory>,
    engine: Arc<PaymentEngine>,
    store: Arc<PaymentStore>,
    usdc_mint: String,
}

fn now() -> Timestamp {
    chrono::Utc::now().timestamp()
}

impl CleanupScheduler {
    pub fn new(
        vault: Arc<KeyVault>,
        budget: Arc<BudgetLedger>,
        chain: Arc<dyn ChainAdapter>,
        burners: Arc<BurnerFactory>,
        engine: Arc<PaymentEngine>,
        store: Arc<PaymentStore>,
        usdc_mint: String,
    ) -> Self {
        Self {
            vault,
            budget,
            chain,
            burners,
            engine,
            store,
            usdc_mint,
        }
    }

    /// Spawn the tick loop on the current Tokio runtime. The returned handle
    /// is held by the caller (`aegix-node`'s startup sequence) purely to
    /// keep the task alive for the process's lifetime; aborting it is never
    /// expected in normal operation.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(CLEANUP_TICK_SECS));
            loop {
                interval.tick().await;
                self.run_tick().await;
            }
        })
    }

    /// Run every sweep once. Exposed directly (not just through `spawn`) so
    /// tests can drive a single tick deterministically.
    pub async fn run_tick(&self) {
        self.expire_sessions();
        self.retry_waiting_on_indexer().await;
        self.prune_idle_mutexes();
        self.reclaim_idle_burners().await;
        self.prune_expired_pending_requests();
    }

    fn expire_sessions(&self) {
        match self.vault.expire_all_stale_sessions() {
            Ok(expired) => {
                for session_id in &expired {
                    self.budget.remove(session_id);
                }
                if !expired.is_empty() {
                    tracing::info!(count = expired.len(), "expired stale session keys");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to sweep stale session keys"),
        }
    }

    async fn retry_waiting_on_indexer(&self) {
        let waiting = match self.store.list_waiting_on_indexer() {
            Ok(w) => w,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list sessions waiting on indexer");
                return;
            }
        };
        for session in waiting.into_iter().take(CLEANUP_MAX_RESUMES_PER_TICK) {
            match self.engine.resume_maximum_privacy(&session.session_id).await {
                Ok(resumed) => tracing::debug!(
                    session_id = %resumed.session_id,
                    status = ?resumed.status,
                    "resumed session paused at M2_WaitIndex"
                ),
                Err(e) => tracing::debug!(
                    session_id = %session.session_id,
                    error = %e,
                    "indexer still not caught up, will retry next tick"
                ),
            }
        }
    }

    fn prune_idle_mutexes(&self) {
        let vault_pruned = self.vault.prune_idle_locks(MUTEX_IDLE_PRUNE_SECS);
        let pool_pruned = self.engine.prune_idle_pool_locks(MUTEX_IDLE_PRUNE_SECS);
        if vault_pruned + pool_pruned > 0 {
            tracing::debug!(vault_pruned, pool_pruned, "pruned idle mutexes");
        }
    }

    async fn reclaim_idle_burners(&self) {
        let burners = match self.store.list_burners() {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list burners for rent reclaim");
                return;
            }
        };
        let cutoff = now() - BURNER_IDLE_RECLAIM_SECS;
        for burner in burners {
            let consumed_at = match burner.consumed_at {
                Some(t) if t <= cutoff => t,
                _ => continue,
            };

            let session = match self.store.find_session_by_burner(&burner.burner_id) {
                Ok(Some(session)) => session,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(burner = %burner.burner_id, error = %e, "failed to resolve burner's originating session");
                    continue;
                }
            };

            if let Err(e) = self.reclaim_one_burner(&session, &burner.address, &burner.burner_id).await {
                tracing::debug!(
                    burner = %burner.burner_id,
                    consumed_at,
                    error = %e,
                    "burner rent reclaim did not complete, will retry next tick"
                );
            }
        }
    }

    /// Reclaim rent to the address the burner was funded from: the pool `P`
    /// for a Standard-mode burner, the Recovery Pool for a Maximum-Privacy
    /// one. Routing by the originating session's method matters because a
    /// Standard-only owner has no Recovery Pool at all — looking one up
    /// unconditionally would fail every tick and never reclaim that rent.
    async fn reclaim_one_burner(
        &self,
        session: &PaymentSession,
        burner_address: &Address,
        burner_id: &str,
    ) -> Result<(), aegix_core::AegixError> {
        let balance = self.chain.get_token_balance(burner_address, &self.usdc_mint).await?;
        if balance != 0 {
            return Ok(());
        }
        let rent_recipient = match session.method {
            PaymentMethod::Standard => self.vault.get_pool(&session.owner, &session.pool_id)?.address,
            PaymentMethod::MaximumPrivacy => self.vault.recovery_keypair(&session.owner)?.address,
        };
        let burner_record = self.store.get_burner(burner_address)?;
        let burner_keypair = self.burners.keypair_for(&burner_record)?;

        let unsigned = self
            .chain
            .build_close_account(burner_address, &self.usdc_mint, &rent_recipient)
            .await?;
        let signature = burner_keypair.sign(&unsigned.signing_bytes()).to_bytes();
        let signed = SignedTx {
            unsigned,
            signer: burner_address.clone(),
            signature,
        };
        self.chain.submit_and_confirm(signed).await?;
        self.store.remove_burner(burner_address).ok();
        tracing::info!(burner = %burner_id, owner = %session.owner, method = ?session.method, "reclaimed idle burner rent");
        Ok(())
    }

    /// Drop `PendingPaymentRequest` entries past their expiry window. These
    /// are unsigned-transaction placeholders (`pool.fund`/`pool.top_up`
    /// request records) rather than confirmed `PaymentSession`s, so no
    /// `PaymentEngine` state needs unwinding — only the stale bookkeeping
    /// row. There is no live block-height oracle wired into the scheduler
    /// yet, so `submitted_at + PAYMENT_EXPIRY_BLOCKS` seconds is used as a
    /// conservative stand-in for the on-chain block-height deadline.
    fn prune_expired_pending_requests(&self) {
        let pending = match self.store.list_pending_requests() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list pending payment requests");
                return;
            }
        };
        let current = now();
        let mut pruned = 0;
        for req in pending {
            if current > req.submitted_at + PAYMENT_EXPIRY_BLOCKS as i64 {
                if let Err(e) = self.store.remove_pending_request(&req.request_id) {
                    tracing::warn!(request_id = %req.request_id, error = %e, "failed to prune pending request");
                    continue;
                }
                pruned += 1;
            }
        }
        if pruned > 0 {
            tracing::debug!(pruned, "pruned expired pending payment requests");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegix_audit::AuditLog;
    use aegix_chain::SimulatedChainAdapter;
    use aegix_crypto::CipherStore;
    use aegix_vault::VaultDb;

    fn temp_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("aegix_scheduler_test_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn build_scheduler(name: &str) -> CleanupScheduler {
        let dir = temp_dir(name);
        let db = sled::open(dir.join("db")).unwrap();
        let cipher = Arc::new(CipherStore::new([9u8; 32]));
        let vault_db = VaultDb::open(dir.join("vault")).unwrap();
        let vault = Arc::new(KeyVault::new(vault_db, cipher.clone()));
        let budget = Arc::new(BudgetLedger::new());
        let chain: Arc<dyn ChainAdapter> = Arc::new(SimulatedChainAdapter::new());
        let burners = Arc::new(BurnerFactory::new(cipher));
        let audit = Arc::new(AuditLog::open(&db, Arc::new(CipherStore::new([7u8; 32]))).unwrap());
        let engine_store = PaymentStore::open(&db).unwrap();
        let engine = Arc::new(PaymentEngine::new(
            vault.clone(),
            budget.clone(),
            chain.clone(),
            burners.clone(),
            audit,
            engine_store,
            "usdc-mint".to_string(),
        ));
        let scheduler_store = Arc::new(PaymentStore::open(&db).unwrap());
        CleanupScheduler::new(vault, budget, chain, burners, engine, scheduler_store, "usdc-mint".to_string())
    }

    #[tokio::test]
    async fn empty_tick_runs_without_panicking() {
        let scheduler = build_scheduler("empty_tick");
        scheduler.run_tick().await;
    }

    #[tokio::test]
    async fn tick_tolerates_an_unrelated_pool() {
        let scheduler = build_scheduler("unrelated_pool");

        let owner = Address::from_bytes([3u8; 32]);
        scheduler.vault.get_or_create_pool(&owner, "pool-1").await.unwrap();

        scheduler.run_tick().await;
    }
}

use std::sync::Arc;
use std::time::Duration;

use aegix_audit::AuditLog;
use aegix_budget::{BudgetLedger, Reservation};
use aegix_burner::BurnerFactory;
use aegix_chain::{ChainAdapter, SignedTx};
use aegix_core::{
    AegixError, Address, Amount, PaymentMethod, PaymentSession, PaymentSessionId, PaymentStatus,
    SessionKey, ShortfallDetail, Timestamp, BURNER_NATIVE_FUNDING, INDEXER_POLL_DEADLINE_SECS,
    INDEXER_POLL_INTERVAL_SECS, INDEXER_POLL_MAX_ATTEMPTS, MAX_AMOUNT_MICRO,
    MAX_PRIVACY_MIN_RECOVERY_NATIVE, POOL_LOCK_TIMEOUT_MS, STANDARD_MIN_POOL_NATIVE,
};
use aegix_vault::{KeyVault, LockRegistry};
use tokio::time::timeout;

use crate::store::PaymentStore;

/// Orchestrates the Standard and Maximum-Privacy payment state machines
/// described in the payment gateway's design. Every transition is staged
/// through a `PaymentSession` record — persisted before and after each
/// chain interaction — and committed to `BudgetLedger` only once the
/// session reaches a terminal state, the same validate/stage/commit shape
/// `KeyVault` uses for pool mutations.
///
/// `pool_locks` serializes `execute_*` calls against the same `pool_id`:
/// two concurrent payments from the same pool must never interleave burner
/// creation or funding, so a caller that cannot acquire the pool's lock
/// within `POOL_LOCK_TIMEOUT_MS` gets `Busy` back without anything having
/// been reserved or persisted.
pub struct PaymentEngine {
    vault: Arc<KeyVault>,
    budget: Arc<BudgetLedger>,
    chain: Arc<dyn ChainAdapter>,
    burners: Arc<BurnerFactory>,
    audit: Arc<AuditLog>,
    store: PaymentStore,
    usdc_mint: String,
    pool_locks: LockRegistry,
}

fn now() -> Timestamp {
    chrono::Utc::now().timestamp()
}

/// Coarse classifier for S2's retry-before-recovery branch: true when the
/// chain rejected the transaction for a reason a single retry might clear,
/// namely the recipient's token account not existing yet and the burner's
/// native funding falling short of the rent to create it.
fn is_rent_shortfall(err: &AegixError) -> bool {
    matches!(err, AegixError::TxFailed(msg) if msg.to_lowercase().contains("rent"))
}

fn new_session_id(owner: &Address, pool_id: &str, recipient: &Address, amount: Amount, at: Timestamp) -> String {
    let mut buf = owner.as_bytes().to_vec();
    buf.extend_from_slice(pool_id.as_bytes());
    buf.extend_from_slice(recipient.as_bytes());
    buf.extend_from_slice(&amount.to_le_bytes());
    buf.extend_from_slice(&at.to_le_bytes());
    hex::encode(aegix_crypto::blake3_hash(&buf))
}

impl PaymentEngine {
    pub fn new(
        vault: Arc<KeyVault>,
        budget: Arc<BudgetLedger>,
        chain: Arc<dyn ChainAdapter>,
        burners: Arc<BurnerFactory>,
        audit: Arc<AuditLog>,
        store: PaymentStore,
        usdc_mint: String,
    ) -> Self {
        Self {
            vault,
            budget,
            chain,
            burners,
            audit,
            store,
            usdc_mint,
            pool_locks: LockRegistry::new(),
        }
    }

    /// Acquire this pool's serialization mutex, or fail with `Busy` if
    /// another `execute_*` call holds it past `POOL_LOCK_TIMEOUT_MS`.
    async fn acquire_pool_lock(&self, pool_id: &str) -> Result<tokio::sync::OwnedMutexGuard<()>, AegixError> {
        let mutex = self.pool_locks.get(pool_id, now());
        timeout(Duration::from_millis(POOL_LOCK_TIMEOUT_MS), mutex.lock_owned())
            .await
            .map_err(|_| AegixError::Busy(format!("pool {pool_id} has a payment already in flight")))
    }

    /// Prune this engine's per-pool locks the scheduler finds idle.
    pub fn prune_idle_pool_locks(&self, idle_secs: i64) -> usize {
        self.pool_locks.prune_idle(now(), idle_secs)
    }

    /// Call `ChainAdapter::health_check` and require it to report healthy.
    /// The call is always made fresh (never cached), so it trivially
    /// satisfies `HEALTH_CHECK_MAX_AGE_SECS` — the constant documents the
    /// bound a caching adapter would have to respect, not a cache this
    /// engine keeps itself.
    async fn require_fresh_health_check(&self) -> Result<(), AegixError> {
        match self.chain.health_check().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(AegixError::LightUnavailable(
                "compression indexer reported unhealthy".to_string(),
            )),
            Err(e) => Err(AegixError::LightUnavailable(e.to_string())),
        }
    }

    fn validate_amount(amount_micro: Amount) -> Result<(), AegixError> {
        if amount_micro == 0 || amount_micro > MAX_AMOUNT_MICRO {
            return Err(AegixError::InvalidAmount {
                max: MAX_AMOUNT_MICRO,
                got: amount_micro,
            });
        }
        Ok(())
    }

    /// Rough fee estimate shown to callers before committing to a method.
    /// Maximum-Privacy costs more because it submits two on-chain
    /// instructions (compress, then decompress-and-deliver) instead of one.
    pub fn get_cost_estimate(&self, method: PaymentMethod) -> Amount {
        match method {
            PaymentMethod::Standard => STANDARD_MIN_POOL_NATIVE / 4,
            PaymentMethod::MaximumPrivacy => MAX_PRIVACY_MIN_RECOVERY_NATIVE,
        }
    }

    async fn fail_session(
        &self,
        mut session: PaymentSession,
        reservation: Reservation,
        err: AegixError,
    ) -> Result<PaymentSession, AegixError> {
        self.budget.release(reservation).await.ok();
        session.status = PaymentStatus::Failed;
        session.failure_reason = Some(err.to_string());
        session.updated_at = now();
        self.store.put_session(&session).ok();
        self.audit.append(&session.owner, &session, now()).ok();
        Err(err)
    }

    // ── Standard payment: S0_ValidateAndReserve → S1_FundBurner →
    // S2_PayRecipient → S_Done ────────────────────────────────────────────────

    pub async fn execute_standard(
        &self,
        owner: &Address,
        pool_id: &str,
        session_key: &SessionKey,
        recipient: &Address,
        amount_micro: Amount,
    ) -> Result<PaymentSession, AegixError> {
        Self::validate_amount(amount_micro)?;
        let _pool_guard = self.acquire_pool_lock(pool_id).await?;
        let reservation = self.budget.validate_and_reserve(session_key, amount_micro).await?;

        let at = now();
        let mut session = PaymentSession {
            session_id: new_session_id(owner, pool_id, recipient, amount_micro, at),
            owner: owner.clone(),
            pool_id: pool_id.to_string(),
            method: PaymentMethod::Standard,
            recipient: recipient.clone(),
            amount_micro,
            burner_id: None,
            status: PaymentStatus::InProgress,
            current_state: "S0_ValidateAndReserve".to_string(),
            indexer_retry_count: 0,
            tx_signatures: vec![],
            native_funded: 0,
            native_recovered: 0,
            tx_funding_native: None,
            tx_funding_token: None,
            tx_payment: None,
            tx_recovery: None,
            created_at: at,
            updated_at: at,
            failure_reason: None,
        };
        self.store.put_session(&session).ok();

        let pool = match self.vault.get_pool(owner, pool_id) {
            Ok(p) => p,
            Err(e) => return self.fail_session(session, reservation, e).await,
        };

        // §4.6.4 liquidity check: native balance covers burner funding fee,
        // token balance covers the payment itself.
        let native_balance = match self.chain.get_balance(&pool.address).await {
            Ok(b) => b,
            Err(e) => return self.fail_session(session, reservation, e).await,
        };
        if native_balance < STANDARD_MIN_POOL_NATIVE {
            let err = AegixError::InsufficientFunds(ShortfallDetail {
                have: native_balance,
                required: STANDARD_MIN_POOL_NATIVE,
                shortfall: STANDARD_MIN_POOL_NATIVE - native_balance,
            });
            return self.fail_session(session, reservation, err).await;
        }
        let token_balance = match self.chain.get_token_balance(&pool.address, &self.usdc_mint).await {
            Ok(b) => b,
            Err(e) => return self.fail_session(session, reservation, e).await,
        };
        if token_balance < amount_micro {
            let err = AegixError::InsufficientFunds(ShortfallDetail {
                have: token_balance,
                required: amount_micro,
                shortfall: amount_micro - token_balance,
            });
            return self.fail_session(session, reservation, err).await;
        }

        let pool_keypair = match self.vault.signing_keypair_for_active_pool(owner, pool_id) {
            Ok(k) => k,
            Err(e) => return self.fail_session(session, reservation, e).await,
        };

        let (mut burner, burner_keypair) = match self.burners.new_burner(&session.session_id, at) {
            Ok(b) => b,
            Err(e) => return self.fail_session(session, reservation, e).await,
        };
        session.burner_id = Some(burner.burner_id.clone());
        if let Err(e) = self.store.put_burner(&burner) {
            return self.fail_session(session, reservation, e).await;
        }

        // S1_FundBurner: one transaction moves both the native units B will
        // need for its own fees/rent and the payable-asset amount it is
        // about to forward, so B never has to touch P's keypair again.
        session.current_state = "S1_FundBurner".to_string();
        self.store.put_session(&session).ok();
        match self
            .sign_and_submit_fund_burner(&pool_keypair, &pool.address, &burner.address, amount_micro, BURNER_NATIVE_FUNDING)
            .await
        {
            Ok(sig) => {
                session.tx_funding_native = Some(sig.clone());
                session.tx_funding_token = Some(sig.clone());
                session.native_funded = BURNER_NATIVE_FUNDING;
                session.tx_signatures.push(sig);
            }
            Err(e) => return self.fail_session(session, reservation, e).await,
        }
        self.burners.consume(&mut burner, now());
        self.store.put_burner(&burner).ok();

        // S2_PayRecipient: B signs, paying its own fee. A rent-shortfall
        // error (the recipient's token account does not exist and B's
        // native funding could not cover creating it) gets one retry before
        // we give up and recover B's funds back to P.
        session.current_state = "S2_PayRecipient".to_string();
        self.store.put_session(&session).ok();
        let payment_result = match self
            .sign_and_submit_standard(&burner_keypair, &burner.address, recipient, amount_micro)
            .await
        {
            Ok(sig) => Ok(sig),
            Err(e) if is_rent_shortfall(&e) => {
                self
                    .sign_and_submit_standard(&burner_keypair, &burner.address, recipient, amount_micro)
                    .await
            }
            Err(e) => Err(e),
        };

        let sig = match payment_result {
            Ok(sig) => sig,
            Err(original_err) => {
                return self
                    .recover_burner_and_fail(session, reservation, &burner, &burner_keypair, &pool.address, original_err)
                    .await;
            }
        };
        session.tx_payment = Some(sig.clone());
        session.tx_signatures.push(sig);

        // S3_CloseBurner: reclaim the token account's rent and sweep any
        // leftover native dust back to P. A failure here does not undo the
        // payment, which already landed — it just leaves the burner for
        // `CleanupScheduler`'s idle-reclaim pass to retry later.
        session.current_state = "S3_CloseBurner".to_string();
        self.store.put_session(&session).ok();
        match self.close_burner(&burner, &burner_keypair, &pool.address).await {
            Ok((sig, recovered)) => {
                session.tx_recovery = Some(sig);
                session.native_recovered = recovered;
                self.store.remove_burner(&burner.address).ok();
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %session.session_id,
                    burner = %burner.address,
                    error = %e,
                    "S3_CloseBurner failed; leaving burner for scheduled reclaim"
                );
            }
        }

        session.current_state = "S_Done".to_string();
        session.status = PaymentStatus::Completed;
        session.updated_at = now();
        self.store.put_session(&session)?;
        self.budget.commit(reservation).await?;
        self.audit.append(owner, &session, now())?;
        Ok(session)
    }

    /// S2's failure-recovery branch: move whatever tokens remain in B back
    /// to P, close B's token account, and fail the session with the
    /// original S2 error as the recorded cause.
    async fn recover_burner_and_fail(
        &self,
        mut session: PaymentSession,
        reservation: Reservation,
        burner: &aegix_core::Burner,
        burner_keypair: &aegix_crypto::KeyPair,
        pool_address: &Address,
        original_err: AegixError,
    ) -> Result<PaymentSession, AegixError> {
        if let Ok(balance) = self.chain.get_token_balance(&burner.address, &self.usdc_mint).await {
            if balance > 0 {
                let _ = self
                    .sign_and_submit_standard(burner_keypair, &burner.address, pool_address, balance)
                    .await;
            }
        }
        match self.close_burner(burner, burner_keypair, pool_address).await {
            Ok((sig, recovered)) => {
                session.tx_recovery = Some(sig);
                session.native_recovered = recovered;
                self.store.remove_burner(&burner.address).ok();
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %session.session_id,
                    burner = %burner.address,
                    error = %e,
                    "recovery close_account failed after S2 error; leaving burner for scheduled reclaim"
                );
            }
        }
        self.fail_session(session, reservation, original_err).await
    }

    /// Close B's token account (recovering rent to `rent_recipient`) and
    /// sweep any leftover native balance there too. Returns the close
    /// transaction's signature and the total native units recovered.
    async fn close_burner(
        &self,
        burner: &aegix_core::Burner,
        burner_keypair: &aegix_crypto::KeyPair,
        rent_recipient: &Address,
    ) -> Result<(aegix_core::TxSignature, Amount), AegixError> {
        let unsigned = self
            .chain
            .build_close_account(&burner.address, &self.usdc_mint, rent_recipient)
            .await?;
        let signature = burner_keypair.sign(&unsigned.signing_bytes()).to_bytes();
        let signed = SignedTx {
            unsigned,
            signer: burner.address.clone(),
            signature,
        };
        let sig = self.chain.submit_and_confirm(signed).await?;
        let mut recovered = aegix_core::constants::CLOSE_ACCOUNT_RENT_NATIVE;

        if let Ok(dust) = self.chain.get_balance(&burner.address).await {
            if dust > 0 {
                if let Ok(sweep_sig) = self.sign_and_submit_native(burner_keypair, &burner.address, rent_recipient, dust).await {
                    let _ = sweep_sig;
                    recovered += dust;
                }
            }
        }
        Ok((sig, recovered))
    }

    async fn sign_and_submit_standard(
        &self,
        signer: &aegix_crypto::KeyPair,
        from: &Address,
        to: &Address,
        amount_micro: Amount,
    ) -> Result<aegix_core::TxSignature, AegixError> {
        let unsigned = self
            .chain
            .build_standard_payment(from, to, amount_micro, &self.usdc_mint)
            .await?;
        let signature = signer.sign(&unsigned.signing_bytes()).to_bytes();
        let signed = SignedTx {
            unsigned,
            signer: signer.address.clone(),
            signature,
        };
        self.chain.submit_and_confirm(signed).await
    }

    async fn sign_and_submit_fund_burner(
        &self,
        signer: &aegix_crypto::KeyPair,
        from: &Address,
        to: &Address,
        amount_micro: Amount,
        native_amount: Amount,
    ) -> Result<aegix_core::TxSignature, AegixError> {
        let unsigned = self
            .chain
            .build_fund_burner(from, to, amount_micro, &self.usdc_mint, native_amount)
            .await?;
        let signature = signer.sign(&unsigned.signing_bytes()).to_bytes();
        let signed = SignedTx {
            unsigned,
            signer: signer.address.clone(),
            signature,
        };
        self.chain.submit_and_confirm(signed).await
    }

    async fn sign_and_submit_native(
        &self,
        signer: &aegix_crypto::KeyPair,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<aegix_core::TxSignature, AegixError> {
        let unsigned = self.chain.build_native_transfer(from, to, amount).await?;
        let signature = signer.sign(&unsigned.signing_bytes()).to_bytes();
        let signed = SignedTx {
            unsigned,
            signer: signer.address.clone(),
            signature,
        };
        self.chain.submit_and_confirm(signed).await
    }

    // ── Maximum-Privacy payment: M0_Init → M1_CompressedHop → M2_WaitIndex →
    // M3_DecompressAndDeliver → M4_Cleanup → M_Done ───────────────────────────

    pub async fn execute_maximum_privacy(
        &self,
        owner: &Address,
        pool_id: &str,
        session_key: &SessionKey,
        recipient: &Address,
        amount_micro: Amount,
    ) -> Result<PaymentSession, AegixError> {
        Self::validate_amount(amount_micro)?;
        let _pool_guard = self.acquire_pool_lock(pool_id).await?;

        // §4.6.1 precondition: the compression indexer must be observed
        // healthy, and recently (within `HEALTH_CHECK_MAX_AGE_SECS`), before
        // Maximum-Privacy is allowed to proceed at all — a dead indexer
        // means `M2_WaitIndex` can never resolve, so fail before reserving
        // budget or touching any state.
        self.require_fresh_health_check().await?;

        let reservation = self.budget.validate_and_reserve(session_key, amount_micro).await?;

        let at = now();
        let mut session = PaymentSession {
            session_id: new_session_id(owner, pool_id, recipient, amount_micro, at),
            owner: owner.clone(),
            pool_id: pool_id.to_string(),
            method: PaymentMethod::MaximumPrivacy,
            recipient: recipient.clone(),
            amount_micro,
            burner_id: None,
            status: PaymentStatus::InProgress,
            current_state: "M0_Init".to_string(),
            indexer_retry_count: 0,
            tx_signatures: vec![],
            native_funded: 0,
            native_recovered: 0,
            tx_funding_native: None,
            tx_funding_token: None,
            tx_payment: None,
            tx_recovery: None,
            created_at: at,
            updated_at: at,
            failure_reason: None,
        };
        self.store.put_session(&session).ok();

        let pool = match self.vault.get_pool(owner, pool_id) {
            Ok(p) => p,
            Err(e) => return self.fail_session(session, reservation, e).await,
        };

        // Open Question #3: `pool.shield` is an explicit prerequisite. If no
        // Recovery Pool has been shielded with enough native balance to pay
        // M3's fees, this fails loudly rather than shielding on the caller's
        // behalf.
        let recovery_pool = match self.vault.get_or_create_recovery_pool(owner, MAX_PRIVACY_MIN_RECOVERY_NATIVE) {
            Ok(rp) => rp,
            Err(e) => return self.fail_session(session, reservation, e).await,
        };
        let recovery_native = match self.chain.get_balance(&recovery_pool.address).await {
            Ok(b) => b,
            Err(e) => return self.fail_session(session, reservation, e).await,
        };
        if recovery_native < recovery_pool.min_required_native {
            let err = AegixError::InsufficientFunds(ShortfallDetail {
                have: recovery_native,
                required: recovery_pool.min_required_native,
                shortfall: recovery_pool.min_required_native - recovery_native,
            });
            return self.fail_session(session, reservation, err).await;
        }

        let token_balance = match self.chain.get_token_balance(&pool.address, &self.usdc_mint).await {
            Ok(b) => b,
            Err(e) => return self.fail_session(session, reservation, e).await,
        };
        if token_balance < amount_micro {
            let err = AegixError::InsufficientFunds(ShortfallDetail {
                have: token_balance,
                required: amount_micro,
                shortfall: amount_micro - token_balance,
            });
            return self.fail_session(session, reservation, err).await;
        }

        let pool_keypair = match self.vault.signing_keypair_for_active_pool(owner, pool_id) {
            Ok(k) => k,
            Err(e) => return self.fail_session(session, reservation, e).await,
        };
        let (burner, _burner_keypair) = match self.burners.new_burner(&session.session_id, at) {
            Ok(b) => b,
            Err(e) => return self.fail_session(session, reservation, e).await,
        };
        if let Err(e) = self.store.put_burner(&burner) {
            return self.fail_session(session, reservation, e).await;
        }
        session.burner_id = Some(burner.burner_id.clone());

        // M1_CompressedHop: the source pool pays, per the documented default.
        session.current_state = "M1_CompressedHop".to_string();
        self.store.put_session(&session).ok();
        let unsigned = match self
            .chain
            .build_compress(&pool.address, &burner.address, amount_micro, &self.usdc_mint)
            .await
        {
            Ok(u) => u,
            Err(e) => return self.fail_session(session, reservation, e).await,
        };
        let signature = pool_keypair.sign(&unsigned.signing_bytes()).to_bytes();
        let signed = SignedTx {
            unsigned,
            signer: pool.address.clone(),
            signature,
        };
        match self.chain.submit_and_confirm(signed).await {
            Ok(sig) => session.tx_signatures.push(sig),
            Err(e) => return self.fail_session(session, reservation, e).await,
        }

        session.current_state = "M2_WaitIndex".to_string();
        self.store.put_session(&session).ok();
        self.continue_from_wait_index(session, reservation).await
    }

    /// Poll the compression indexer, then finish the session if it has
    /// caught up, or pause it at `M2_WaitIndex` if it hasn't. Shared by both
    /// the initial `execute_maximum_privacy` path and `resume_maximum_privacy`
    /// so neither the scheduler's automatic retry nor an explicit
    /// `resume_session_id` call duplicates this logic.
    async fn continue_from_wait_index(
        &self,
        mut session: PaymentSession,
        reservation: Reservation,
    ) -> Result<PaymentSession, AegixError> {
        let burner_id = session
            .burner_id
            .clone()
            .expect("M2_WaitIndex always follows burner creation");
        let burner_address = Address::from_b58(&burner_id)
            .map_err(|e| AegixError::InvalidHandleFormat(e.to_string()))?;

        let deadline = now() + INDEXER_POLL_DEADLINE_SECS as i64;
        let mut observed = None;
        while session.indexer_retry_count < INDEXER_POLL_MAX_ATTEMPTS && now() < deadline {
            match self.chain.get_compressed_balance(&burner_address, &self.usdc_mint).await {
                Ok(balance) if balance >= session.amount_micro => {
                    observed = Some(balance);
                    break;
                }
                _ => {
                    session.indexer_retry_count += 1;
                    tokio::time::sleep(std::time::Duration::from_secs(INDEXER_POLL_INTERVAL_SECS)).await;
                }
            }
        }

        if observed.is_none() {
            session.status = PaymentStatus::WaitingOnIndexer;
            session.updated_at = now();
            self.store.put_session(&session)?;
            return Ok(session);
        }

        // M3_DecompressAndDeliver: the Recovery Pool pays network fees so the
        // burner never needs a native balance of its own.
        session.current_state = "M3_DecompressAndDeliver".to_string();
        self.store.put_session(&session).ok();

        let burner_record_keypair = self.burner_keypair_by_address(&burner_address)?;
        let recovery_keypair = self.vault.recovery_keypair(&session.owner)?;

        let unsigned = self
            .chain
            .build_decompress_and_transfer(
                &burner_address,
                &session.recipient,
                session.amount_micro,
                &self.usdc_mint,
                &recovery_keypair.address,
            )
            .await;
        let unsigned = match unsigned {
            Ok(u) => u,
            Err(e) => return self.fail_session(session, reservation, e).await,
        };
        let signature = burner_record_keypair.sign(&unsigned.signing_bytes()).to_bytes();
        let signed = SignedTx {
            unsigned,
            signer: burner_address.clone(),
            signature,
        };
        match self.chain.submit_and_confirm(signed).await {
            Ok(sig) => {
                session.tx_payment = Some(sig.clone());
                session.tx_signatures.push(sig);
            }
            Err(e) => return self.fail_session(session, reservation, e).await,
        }

        session.current_state = "M4_Cleanup".to_string();
        self.store.put_session(&session).ok();

        session.current_state = "M_Done".to_string();
        session.status = PaymentStatus::Completed;
        session.updated_at = now();
        self.store.put_session(&session)?;
        self.budget.commit(reservation).await?;
        self.audit.append(&session.owner, &session, now())?;
        Ok(session)
    }

    fn burner_keypair_by_address(&self, address: &Address) -> Result<aegix_crypto::KeyPair, AegixError> {
        let burner = self.store.get_burner(address)?;
        self.burners.keypair_for(&burner)
    }

    /// Resume a session paused at `M2_WaitIndex`. Both the cleanup
    /// scheduler's bounded automatic retry and an explicit
    /// `resume_session_id` argument on `pool.pay` call this single entry
    /// point.
    pub async fn resume_maximum_privacy(&self, session_id: &PaymentSessionId) -> Result<PaymentSession, AegixError> {
        let session = self.store.get_session(session_id)?;
        let _pool_guard = self.acquire_pool_lock(&session.pool_id).await?;
        if session.status != PaymentStatus::WaitingOnIndexer {
            return Err(AegixError::InvalidArgument(format!(
                "session {session_id} is not waiting on the indexer"
            )));
        }
        // The original reservation stays staged in `BudgetLedger` for as long
        // as the session is paused; rebuild a handle with the same amount so
        // the shared completion path can commit or release it. If the node
        // restarted since the pause, `BudgetLedger`'s in-memory bookkeeping
        // was lost along with it — committing here simply re-stages and
        // immediately commits the amount against a fresh session budget.
        let reservation = Reservation {
            session_id: session.session_id.clone(),
            amount_micro: session.amount_micro,
        };
        self.continue_from_wait_index(session, reservation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegix_audit::AuditLog;
    use aegix_chain::SimulatedChainAdapter;
    use aegix_core::{PaymentStatus, SessionStatus, STANDARD_MIN_POOL_NATIVE};
    use aegix_crypto::{pool_auth_message, CipherStore};
    use aegix_vault::VaultDb;
    use std::sync::Mutex;

    fn temp_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("aegix_engine_test_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn sample_session_key(owner: &Address, daily_limit: Amount, max_per_tx: Amount) -> SessionKey {
        let now = now();
        SessionKey {
            session_id: format!("sess-{}", owner.to_b58()),
            owner: owner.clone(),
            pool_id: "pool-1".to_string(),
            daily_limit_micro: daily_limit,
            max_per_tx,
            spend_period_secs: 86_400,
            granted_at: now,
            expires_at: now + 3600,
            status: SessionStatus::Active,
        }
    }

    /// A `ChainAdapter` that delegates to a real `SimulatedChainAdapter` but
    /// remembers the `fee_payer` address passed to the last
    /// `build_decompress_and_transfer` call, so a test can assert which
    /// party M3 actually names as fee payer without a live ledger to
    /// inspect after the fact.
    struct FeePayerSpy {
        inner: SimulatedChainAdapter,
        observed_fee_payer: Mutex<Option<Address>>,
    }

    impl FeePayerSpy {
        fn new() -> Self {
            Self {
                inner: SimulatedChainAdapter::new(),
                observed_fee_payer: Mutex::new(None),
            }
        }

        fn fund_native(&self, address: &Address, amount: Amount) {
            self.inner.fund_native(address, amount);
        }

        fn fund_token(&self, address: &Address, mint: &str, amount: Amount) {
            self.inner.fund_token(address, mint, amount);
        }
    }

    #[async_trait::async_trait]
    impl ChainAdapter for FeePayerSpy {
        async fn get_balance(&self, address: &Address) -> Result<Amount, AegixError> {
            self.inner.get_balance(address).await
        }

        async fn get_token_balance(&self, address: &Address, mint: &str) -> Result<Amount, AegixError> {
            self.inner.get_token_balance(address, mint).await
        }

        async fn get_compressed_balance(&self, address: &Address, mint: &str) -> Result<Amount, AegixError> {
            self.inner.get_compressed_balance(address, mint).await
        }

        async fn build_standard_payment(
            &self,
            from: &Address,
            to: &Address,
            amount_micro: Amount,
            mint: &str,
        ) -> Result<aegix_chain::UnsignedTx, AegixError> {
            self.inner.build_standard_payment(from, to, amount_micro, mint).await
        }

        async fn build_compress(
            &self,
            from: &Address,
            to: &Address,
            amount_micro: Amount,
            mint: &str,
        ) -> Result<aegix_chain::UnsignedTx, AegixError> {
            self.inner.build_compress(from, to, amount_micro, mint).await
        }

        async fn build_decompress_and_transfer(
            &self,
            from: &Address,
            to: &Address,
            amount_micro: Amount,
            mint: &str,
            fee_payer: &Address,
        ) -> Result<aegix_chain::UnsignedTx, AegixError> {
            *self.observed_fee_payer.lock().unwrap() = Some(fee_payer.clone());
            self.inner
                .build_decompress_and_transfer(from, to, amount_micro, mint, fee_payer)
                .await
        }

        async fn build_close_account(
            &self,
            account: &Address,
            mint: &str,
            rent_recipient: &Address,
        ) -> Result<aegix_chain::UnsignedTx, AegixError> {
            self.inner.build_close_account(account, mint, rent_recipient).await
        }

        async fn build_fund_burner(
            &self,
            from: &Address,
            to: &Address,
            amount_micro: Amount,
            mint: &str,
            native_amount: Amount,
        ) -> Result<aegix_chain::UnsignedTx, AegixError> {
            self.inner
                .build_fund_burner(from, to, amount_micro, mint, native_amount)
                .await
        }

        async fn build_native_transfer(
            &self,
            from: &Address,
            to: &Address,
            amount: Amount,
        ) -> Result<aegix_chain::UnsignedTx, AegixError> {
            self.inner.build_native_transfer(from, to, amount).await
        }

        async fn submit_and_confirm(&self, signed: SignedTx) -> Result<aegix_core::TxSignature, AegixError> {
            self.inner.submit_and_confirm(signed).await
        }

        async fn latest_blockhash(&self) -> Result<String, AegixError> {
            self.inner.latest_blockhash().await
        }

        async fn health_check(&self) -> Result<bool, AegixError> {
            self.inner.health_check().await
        }
    }

    /// Build a fully wired `PaymentEngine` over a temp `sled` db and the
    /// given chain adapter, returning the pieces a test needs to set up
    /// pools and inspect budget state directly.
    fn build_engine(name: &str, chain: Arc<dyn ChainAdapter>) -> (PaymentEngine, Arc<KeyVault>, Arc<BudgetLedger>) {
        let dir = temp_dir(name);
        let db = sled::open(dir.join("db")).unwrap();
        let cipher = Arc::new(CipherStore::new([5u8; 32]));
        let vault_db = VaultDb::open(dir.join("vault")).unwrap();
        let vault = Arc::new(KeyVault::new(vault_db, cipher.clone()));
        let budget = Arc::new(BudgetLedger::new());
        let burners = Arc::new(BurnerFactory::new(cipher.clone()));
        let audit = Arc::new(AuditLog::open(&db, Arc::new(CipherStore::new([6u8; 32]))).unwrap());
        let store = PaymentStore::open(&db).unwrap();
        let engine = PaymentEngine::new(
            vault.clone(),
            budget.clone(),
            chain,
            burners,
            audit,
            store,
            "usdc-mint".to_string(),
        );
        (engine, vault, budget)
    }

    /// Unlock a freshly created pool (signing the owner-auth challenge) so
    /// `signing_keypair_for_active_pool` will hand back its keypair. Returns
    /// the `Pool` record, since its managed `address` (not the owner's own
    /// address) is what the chain adapter tracks balances against.
    async fn create_and_unlock_pool(vault: &KeyVault, owner: &aegix_crypto::KeyPair) -> aegix_core::Pool {
        vault.get_or_create_pool(&owner.address, "pool-1").await.unwrap();
        let ts = now();
        let message = pool_auth_message(&owner.address.to_b58(), ts);
        let sig = owner.sign(message.as_bytes());
        vault.unlock_pool(&owner.address, "pool-1", ts, &sig.to_bytes()).await.unwrap();
        vault.get_pool(&owner.address, "pool-1").unwrap()
    }

    // ── Testable Property: budget-then-balance ordering / compensating
    // release ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn failed_balance_check_releases_the_budget_reservation() {
        let chain: Arc<dyn ChainAdapter> = Arc::new(SimulatedChainAdapter::new());
        let (engine, vault, budget) = build_engine("budget_release", chain);
        let owner = aegix_crypto::KeyPair::generate();
        let _pool = create_and_unlock_pool(&vault, &owner).await;
        // Deliberately leave the pool's native balance at zero: the budget
        // is reserved before the liquidity check runs, so a shortfall here
        // must release the reservation rather than leak it.
        let session_key = sample_session_key(&owner.address, 10_000, 10_000);
        let recipient = Address::from_bytes([9u8; 32]);

        let result = engine
            .execute_standard(&owner.address, "pool-1", &session_key, &recipient, 5_000)
            .await;
        assert!(result.is_err());
        assert_eq!(budget.spent_this_period(&session_key.session_id).await, 0);

        // With the reservation released, a second attempt at the same
        // amount must still be admissible under the daily limit.
        let second = engine
            .execute_standard(&owner.address, "pool-1", &session_key, &recipient, 5_000)
            .await;
        assert!(second.is_err());
        assert_eq!(budget.spent_this_period(&session_key.session_id).await, 0);
    }

    #[tokio::test]
    async fn standard_payment_commits_budget_only_on_completion() {
        let chain_impl = SimulatedChainAdapter::new();
        let owner = aegix_crypto::KeyPair::generate();
        let chain_arc = Arc::new(chain_impl);
        let chain: Arc<dyn ChainAdapter> = chain_arc.clone();
        let (engine, vault, budget) = build_engine("budget_commit", chain);
        let pool = create_and_unlock_pool(&vault, &owner).await;
        chain_arc.fund_native(&pool.address, STANDARD_MIN_POOL_NATIVE * 2);
        chain_arc.fund_token(&pool.address, "usdc-mint", 1_000_000);

        let session_key = sample_session_key(&owner.address, 10_000, 10_000);
        let recipient = Address::from_bytes([8u8; 32]);

        let session = engine
            .execute_standard(&owner.address, "pool-1", &session_key, &recipient, 5_000)
            .await
            .unwrap();
        assert_eq!(session.status, PaymentStatus::Completed);
        assert_eq!(budget.spent_this_period(&session_key.session_id).await, 5_000);
        assert!(session.tx_funding_native.is_some());
        assert!(session.tx_payment.is_some());
        assert!(session.tx_recovery.is_some());
        assert!(session.native_recovered >= aegix_core::constants::CLOSE_ACCOUNT_RENT_NATIVE);
    }

    // ── Testable Property: Maximum-Privacy signer / fee-payer invariant ──────

    #[tokio::test]
    async fn maximum_privacy_names_the_recovery_pool_as_fee_payer() {
        let spy = Arc::new(FeePayerSpy::new());
        let owner = aegix_crypto::KeyPair::generate();
        let chain: Arc<dyn ChainAdapter> = spy.clone();
        let (engine, vault, _budget) = build_engine("max_privacy_fee_payer", chain);
        let pool = create_and_unlock_pool(&vault, &owner).await;
        spy.fund_token(&pool.address, "usdc-mint", 1_000_000);

        let recovery_pool = vault
            .get_or_create_recovery_pool(&owner.address, MAX_PRIVACY_MIN_RECOVERY_NATIVE)
            .unwrap();
        spy.fund_native(&recovery_pool.address, MAX_PRIVACY_MIN_RECOVERY_NATIVE * 2);

        let session_key = sample_session_key(&owner.address, 10_000, 10_000);
        let recipient = Address::from_bytes([7u8; 32]);

        let session = engine
            .execute_maximum_privacy(&owner.address, "pool-1", &session_key, &recipient, 5_000)
            .await
            .unwrap();
        assert_eq!(session.status, PaymentStatus::Completed);

        let observed = spy.observed_fee_payer.lock().unwrap().clone();
        assert_eq!(observed, Some(recovery_pool.address));
    }

    // ── Testable Property: indexer-patience bound ─────────────────────────────

    #[tokio::test]
    async fn indexer_that_never_catches_up_pauses_instead_of_completing() {
        // `lag_polls` set comfortably past `INDEXER_POLL_MAX_ATTEMPTS` means
        // `get_compressed_balance` reports `IndexerSlow` for every poll this
        // call will make, so the session must land at `WaitingOnIndexer`
        // rather than ever reaching `M3_DecompressAndDeliver`.
        let chain_impl = SimulatedChainAdapter::with_indexer_lag(INDEXER_POLL_MAX_ATTEMPTS + 5);
        let owner = aegix_crypto::KeyPair::generate();
        let chain_arc = Arc::new(chain_impl);
        let chain: Arc<dyn ChainAdapter> = chain_arc.clone();
        let (engine, vault, _budget) = build_engine("indexer_patience", chain);
        let pool = create_and_unlock_pool(&vault, &owner).await;
        chain_arc.fund_token(&pool.address, "usdc-mint", 1_000_000);

        let recovery_pool = vault
            .get_or_create_recovery_pool(&owner.address, MAX_PRIVACY_MIN_RECOVERY_NATIVE)
            .unwrap();
        chain_arc.fund_native(&recovery_pool.address, MAX_PRIVACY_MIN_RECOVERY_NATIVE * 2);

        let session_key = sample_session_key(&owner.address, 10_000, 10_000);
        let recipient = Address::from_bytes([6u8; 32]);

        let session = engine
            .execute_maximum_privacy(&owner.address, "pool-1", &session_key, &recipient, 5_000)
            .await
            .unwrap();
        assert_eq!(session.status, PaymentStatus::WaitingOnIndexer);
        assert_eq!(session.indexer_retry_count, INDEXER_POLL_MAX_ATTEMPTS);
    }
}

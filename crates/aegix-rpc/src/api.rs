use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;

use crate::types::{
    EncryptedSummary, OkResponse, PoolConfirmFundingResponse, PoolExportKeyResponse,
    PoolFundResponse, PoolGetResponse, PoolInitResponse, PoolPayResponse, PoolShieldResponse,
    PoolTopUpResponse, PoolWithdrawResponse, RecoveryCreateAndFundResponse,
    RecoveryStatusResponse, RecoveryValidateResponse, SessionDetails, SessionKeyDescriptor,
    SessionSummary,
};

/// Aegix JSON-RPC 2.0 API definition. Method names are given in full
/// (`"pool.init"`, `"session.create"`, ...) rather than assembled from a
/// namespace prefix, matching the wire surface the orchestrator exposes.
///
/// Every argument is a top-level field of the method's single request
/// object; `jsonrpsee` accepts either a positional array or a named object
/// for `params`, so a `{"owner": ..., "amount": ...}` request body binds
/// directly to `owner`/`amount` parameters below.
#[rpc(server)]
pub trait AegixApi {
    /// Create the owner's pool if one does not already exist, or return the
    /// existing one. Idempotent per owner. `signature` must verify against
    /// `message`, a pool-auth challenge the caller built client-side.
    #[method(name = "pool.init")]
    async fn pool_init(
        &self,
        owner: String,
        signature: String,
        message: String,
    ) -> RpcResult<PoolInitResponse>;

    /// Current pool status and on-chain token balance.
    /// `needs_reauth` is true when the pool is `Locked`.
    #[method(name = "pool.get")]
    async fn pool_get(&self, owner: String) -> RpcResult<PoolGetResponse>;

    /// Build an unsigned transfer moving `amount` micro-units of the payable
    /// asset from the owner's own wallet into the pool address. The caller
    /// signs and submits it themselves, then calls `pool.confirm_funding`.
    #[method(name = "pool.fund")]
    async fn pool_fund(&self, owner: String, amount: String) -> RpcResult<PoolFundResponse>;

    /// Verify `tx_signature` confirmed on-chain and mark the pool `Funded`.
    #[method(name = "pool.confirm_funding")]
    async fn pool_confirm_funding(
        &self,
        owner: String,
        tx_signature: String,
    ) -> RpcResult<PoolConfirmFundingResponse>;

    /// Build an unsigned transfer adding native and/or payable-asset balance
    /// to an already-funded pool.
    #[method(name = "pool.top_up")]
    async fn pool_top_up(
        &self,
        owner: String,
        add_native: Option<String>,
        add_token: Option<String>,
    ) -> RpcResult<PoolTopUpResponse>;

    /// Withdraw native and/or token balance out of the pool back to the
    /// owner's wallet, leaving `min_recovery_native` untouched. Requires the
    /// pool to be `Active` (previously unlocked).
    #[method(name = "pool.withdraw")]
    async fn pool_withdraw(
        &self,
        owner: String,
        native: Option<String>,
        token: Option<String>,
    ) -> RpcResult<PoolWithdrawResponse>;

    /// Compress `amount` of the pool's token balance into its Recovery Pool,
    /// server-signed. Fails `LightUnavailable` if the compression indexer is
    /// unhealthy.
    #[method(name = "pool.shield")]
    async fn pool_shield(
        &self,
        pool_id: String,
        amount: String,
        owner: String,
    ) -> RpcResult<PoolShieldResponse>;

    /// Pay `recipient` via the Standard or Maximum-Privacy state machine
    /// depending on `use_compressed`. Requires the pool to be `Active`.
    ///
    /// `resume_session_id`, if given, ignores `recipient`/`amount`/
    /// `use_compressed` and instead retries a session paused at
    /// `M2_WaitIndex` — the same entry point `CleanupScheduler`'s bounded
    /// automatic retry uses, exposed here for an explicit client-triggered
    /// retry.
    #[method(name = "pool.pay")]
    async fn pool_pay(
        &self,
        owner: String,
        recipient: String,
        amount: String,
        use_compressed: bool,
        resume_session_id: Option<String>,
    ) -> RpcResult<PoolPayResponse>;

    /// Every payment session ever created for the owner's pool, newest first.
    #[method(name = "pool.history")]
    async fn pool_history(&self, owner: String) -> RpcResult<Vec<SessionSummary>>;

    /// Export the pool's raw secret key. `signature` must verify against an
    /// export-key challenge distinct from `pool.init`'s. Audited.
    #[method(name = "pool.export_key")]
    async fn pool_export_key(
        &self,
        owner: String,
        signature: String,
        message: String,
    ) -> RpcResult<PoolExportKeyResponse>;

    /// Grant a scoped session key. `signature` must verify against a
    /// session-grant challenge binding `daily_limit_micro`/`max_per_tx` and
    /// the resulting `expires_at`, so a caller cannot widen scope after the
    /// fact.
    #[method(name = "session.create")]
    async fn session_create(
        &self,
        owner: String,
        signature: String,
        message: String,
        daily_limit_micro: String,
        max_per_tx: String,
        duration_secs: i64,
    ) -> RpcResult<SessionKeyDescriptor>;

    /// Revoke a previously granted session key.
    #[method(name = "session.revoke")]
    async fn session_revoke(
        &self,
        owner: String,
        signature: String,
        session_id: String,
    ) -> RpcResult<OkResponse>;

    /// Non-decrypted metadata for every audit entry recorded for the owner.
    #[method(name = "audit.sessions")]
    async fn audit_sessions(&self, owner: String) -> RpcResult<Vec<EncryptedSummary>>;

    /// Owner-attested decrypt of one (`session_id` given) or every audit
    /// entry. Always returns a list; a single-entry request yields a
    /// one-element list.
    #[method(name = "audit.decrypt")]
    async fn audit_decrypt(
        &self,
        owner: String,
        signature: String,
        session_id: Option<String>,
    ) -> RpcResult<Vec<SessionDetails>>;

    /// Recovery Pool status: address (if created), native balance, and
    /// whether it currently meets `min_required_native`.
    #[method(name = "recovery.status")]
    async fn recovery_status(&self, owner: String) -> RpcResult<RecoveryStatusResponse>;

    /// Create the owner's Recovery Pool if needed and build an unsigned
    /// transfer funding it with `amount` native units from the owner's
    /// wallet.
    #[method(name = "recovery.create_and_fund")]
    async fn recovery_create_and_fund(
        &self,
        owner: String,
        amount: String,
    ) -> RpcResult<RecoveryCreateAndFundResponse>;

    /// Whether a Maximum-Privacy payment can proceed right now, given the
    /// Recovery Pool's current native balance.
    #[method(name = "recovery.validate")]
    async fn recovery_validate(&self, owner: String) -> RpcResult<RecoveryValidateResponse>;
}

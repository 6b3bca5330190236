use serde::{Deserialize, Serialize};
use std::fmt;

/// Amount in micro-units of the payable stablecoin (1 display unit = 10^6
/// micro-units). `u128` gives ample headroom above `MAX_AMOUNT_MICRO`.
pub type Amount = u128;

/// Unix timestamp (seconds, UTC).
pub type Timestamp = i64;

// ── Address ──────────────────────────────────────────────────────────────────

/// 32-byte ledger account address (an Ed25519 public key or a program-derived
/// address), displayed base-58 the way a Solana-family ledger does.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub [u8; 32]);

impl Address {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_b58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }

    pub fn from_b58(s: &str) -> Result<Self, bs58::decode::Error> {
        let bytes = bs58::decode(s).into_vec()?;
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes[..32.min(bytes.len())]);
        Ok(Self(arr))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_b58())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({}…)", &self.to_b58()[..8.min(self.to_b58().len())])
    }
}

// ── TxSignature ──────────────────────────────────────────────────────────────

/// Ledger-level transaction signature identifying a confirmed submission.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxSignature(pub String);

impl fmt::Display for TxSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TxSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxSignature({})", self.0)
    }
}

// ── Handle ───────────────────────────────────────────────────────────────────

/// Opaque, versioned reference to a `CipherStore` ciphertext blob. Carries no
/// information about its plaintext beyond what the owner-attested decrypt
/// flow reveals; safe to log and persist.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle(pub String);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

// ── Identifiers ──────────────────────────────────────────────────────────────

/// Opaque, owner-chosen or server-generated pool identifier (unique per owner).
pub type PoolId = String;

/// Opaque session-key identifier.
pub type SessionId = String;

/// Opaque burner identifier (equal to the burner's base-58 `Address` in practice).
pub type BurnerId = String;

/// Opaque payment-session identifier, returned by `pool.pay` and used to
/// resume a paused Maximum-Privacy session.
pub type PaymentSessionId = String;

// ── Pool ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    /// Registered in `KeyVault` but never observed to hold funds.
    Created,
    /// Funding confirmed on-chain at least once.
    Funded,
    /// Unlocked and eligible to sign/submit payments.
    Active,
    /// Locked by the owner (or by policy); requires re-authentication to unlock.
    Locked,
}

/// A server-held keypair acting as the owner's non-custodial spending source.
/// The secret key never leaves `KeyVault`; it is encrypted at rest via
/// `CipherStore` and decrypted only for the duration of a signing call.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Pool {
    pub pool_id: PoolId,
    pub owner: Address,
    pub address: Address,
    /// `CipherStore` handle referencing the pool's encrypted secret key.
    pub secret_handle: Handle,
    pub status: PoolStatus,
    pub created_at: Timestamp,
    pub last_unlocked_at: Option<Timestamp>,
}

// ── RecoveryPool ─────────────────────────────────────────────────────────────

/// A server-held keypair that pays network fees and holds minimum native
/// balances on behalf of pools that cannot cover their own rent, used as fee
/// payer for `M3_DecompressAndDeliver` and as the destination for reclaimed
/// burner rent.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct RecoveryPool {
    pub owner: Address,
    pub address: Address,
    pub secret_handle: Handle,
    pub min_required_native: Amount,
    pub created_at: Timestamp,
}

// ── SessionKey ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Expired,
    Revoked,
}

/// A short-lived, scoped delegation of spending authority that lets a caller
/// invoke `pool.pay` without presenting the owner's Ed25519 signature on
/// every call.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct SessionKey {
    pub session_id: SessionId,
    pub owner: Address,
    pub pool_id: PoolId,
    /// Maximum cumulative spend (micro-units) within `spend_period_secs`.
    pub daily_limit_micro: Amount,
    /// Maximum amount (micro-units) any single `pool.pay` may move under
    /// this session key, independent of the remaining daily budget.
    pub max_per_tx: Amount,
    pub spend_period_secs: i64,
    pub granted_at: Timestamp,
    pub expires_at: Timestamp,
    pub status: SessionStatus,
}

// ── Burner ───────────────────────────────────────────────────────────────────

/// An ephemeral, single-use keypair generated by `BurnerFactory` to route one
/// payment, breaking the direct on-chain link between the funding pool and
/// the final recipient.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Burner {
    pub burner_id: BurnerId,
    pub address: Address,
    pub secret_handle: Handle,
    /// BLAKE3 over a domain-separated tuple binding this burner to the
    /// payment session that requested it, so a burner cannot be replayed
    /// into an unrelated payment.
    pub proof_hash: [u8; 32],
    pub created_at: Timestamp,
    /// Set once the burner has been spent in `build_*` / `submit_and_confirm`;
    /// a burner is never reissued after this.
    pub consumed_at: Option<Timestamp>,
}

// ── PaymentSession ───────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Single-hop: pool funds a burner, burner pays the recipient directly.
    Standard,
    /// Two-hop: pool funds a burner via a ZK-compressed token transfer, the
    /// burner later decompresses and delivers to the recipient once the
    /// compression indexer has caught up.
    MaximumPrivacy,
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    InProgress,
    /// Maximum-Privacy only: paused at `M2_WaitIndex`, recoverable by
    /// `PaymentEngine::resume_maximum_privacy`.
    WaitingOnIndexer,
    Completed,
    Failed,
}

/// The durable record of one `pool.pay` invocation, covering its full state
/// machine from acceptance through terminal completion or failure.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct PaymentSession {
    pub session_id: PaymentSessionId,
    pub owner: Address,
    pub pool_id: PoolId,
    pub method: PaymentMethod,
    pub recipient: Address,
    pub amount_micro: Amount,
    pub burner_id: Option<BurnerId>,
    pub status: PaymentStatus,
    /// Name of the current state-machine step (e.g. `"S1_FundBurner"`,
    /// `"M2_WaitIndex"`), kept for observability and for resuming a paused
    /// Maximum-Privacy session at the right step.
    pub current_state: String,
    /// Number of automatic indexer-poll retries consumed so far; bounded by
    /// `INDEXER_POLL_MAX_ATTEMPTS` across the session's lifetime, not per tick.
    pub indexer_retry_count: u32,
    pub tx_signatures: Vec<TxSignature>,
    /// Native units sent to the burner in `S1_FundBurner` (Standard) to
    /// cover its own fee and rent. Zero for `MaximumPrivacy`, where the
    /// Recovery Pool pays fees directly instead of pre-funding the burner.
    pub native_funded: Amount,
    /// Native units actually recovered back to the pool (Standard) via
    /// `S3_CloseBurner`'s rent reclaim and residual-dust sweep. Always
    /// `<= native_funded`.
    pub native_recovered: Amount,
    /// `S1_FundBurner`'s transaction, when it moved native units.
    pub tx_funding_native: Option<TxSignature>,
    /// `S1_FundBurner`'s transaction, when it moved payable-asset tokens
    /// (the same transaction as `tx_funding_native` for Standard mode,
    /// since S1 combines both transfers).
    pub tx_funding_token: Option<TxSignature>,
    /// The transaction that actually delivered funds to `recipient`
    /// (`S2_PayRecipient` or `M3_DecompressAndDeliver`). Non-null on
    /// `Completed`.
    pub tx_payment: Option<TxSignature>,
    /// The burner rent-recovery transaction (`S3_CloseBurner`, or the
    /// close-account step of `S2`'s failure-recovery branch).
    pub tx_recovery: Option<TxSignature>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub failure_reason: Option<String>,
}

// ── PendingPaymentRequest ────────────────────────────────────────────────────

/// A caller-submitted payment request queued ahead of budget/liquidity
/// validation; promoted to a `PaymentSession` once `BudgetLedger` reserves
/// the spend, or discarded at `PAYMENT_EXPIRY_BLOCKS` if never promoted.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct PendingPaymentRequest {
    pub request_id: String,
    pub owner: Address,
    pub pool_id: PoolId,
    pub session_id: Option<SessionId>,
    pub method: PaymentMethod,
    pub recipient: Address,
    pub amount_micro: Amount,
    pub submitted_at: Timestamp,
    pub expires_at_block: u64,
}

// ── Config ───────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    /// Talk to a real ledger RPC and compression indexer over HTTP.
    Real,
    /// In-memory simulated ledger, used by tests and local development.
    Simulation,
}

/// Process-wide configuration, resolved once at startup from a TOML file
/// with environment-variable and CLI-flag overrides, then shared read-only
/// via `Arc`. See `aegix-node`'s startup sequence.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Config {
    pub solana_rpc_url: String,
    pub light_rpc_url: String,
    pub usdc_mint: String,
    pub session_default_duration: i64,
    pub session_max_duration: i64,
    pub payment_expiry_blocks: u64,
    pub min_recovery_native: Amount,
    pub max_amount_micro: Amount,
    pub rpc_listen_addr: String,
    pub data_dir: String,
    pub backend_mode: BackendMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            solana_rpc_url: "http://127.0.0.1:8899".to_string(),
            light_rpc_url: "http://127.0.0.1:8784".to_string(),
            usdc_mint: "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".to_string(),
            session_default_duration: crate::constants::SESSION_DEFAULT_DURATION_SECS,
            session_max_duration: crate::constants::SESSION_MAX_DURATION_SECS,
            payment_expiry_blocks: crate::constants::PAYMENT_EXPIRY_BLOCKS,
            min_recovery_native: crate::constants::DEFAULT_MIN_RECOVERY_NATIVE,
            max_amount_micro: crate::constants::MAX_AMOUNT_MICRO,
            rpc_listen_addr: "127.0.0.1:8899".to_string(),
            data_dir: "./aegix-data".to_string(),
            backend_mode: BackendMode::Simulation,
        }
    }
}

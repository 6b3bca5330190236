use thiserror::Error;

/// Breakdown attached to `InsufficientFunds`, letting a caller distinguish
/// "short by a little" from "not even close" without parsing the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ShortfallDetail {
    pub have: u128,
    pub required: u128,
    pub shortfall: u128,
}

#[derive(Debug, Error)]
pub enum AegixError {
    // ── Request validation ───────────────────────────────────────────────────
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("amount must be between 1 and {max} micro-units, got {got}")]
    InvalidAmount { max: u128, got: u128 },

    #[error("malformed handle: {0}")]
    InvalidHandleFormat(String),

    #[error("unknown pool: {0}")]
    UnknownPool(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("unknown payment session: {0}")]
    UnknownPaymentSession(String),

    // ── Authentication / authorization ───────────────────────────────────────
    #[error("invalid signature for challenge {challenge}")]
    InvalidSignature { challenge: String },

    #[error("challenge timestamp {timestamp} is outside the {allowed_skew_secs}s freshness window")]
    StaleChallenge { timestamp: i64, allowed_skew_secs: i64 },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("pool {pool_id} is locked and requires re-authentication")]
    PoolLocked { pool_id: String },

    #[error("session {session_id} requires re-authentication: {reason}")]
    NeedsReauth { session_id: String, reason: String },

    #[error("daily spending limit exceeded for session {session_id}: limit {limit}, requested cumulative {requested}")]
    DailyLimitExceeded {
        session_id: String,
        limit: u128,
        requested: u128,
    },

    #[error("session {0} has been revoked")]
    SessionRevoked(String),

    #[error("session {0} has expired")]
    SessionExpired(String),

    #[error("amount {requested} exceeds session {session_id}'s per-transaction cap of {max_per_tx}")]
    MaxPerTxExceeded {
        session_id: String,
        max_per_tx: u128,
        requested: u128,
    },

    // ── Funds / liquidity ─────────────────────────────────────────────────────
    #[error("insufficient funds: have {0:?}", .0)]
    InsufficientFunds(ShortfallDetail),

    // ── External dependencies ─────────────────────────────────────────────────
    #[error("ledger RPC unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("compression indexer RPC unavailable: {0}")]
    LightUnavailable(String),

    #[error("compression indexer has not yet caught up: {0}")]
    IndexerSlow(String),

    // ── Concurrency ───────────────────────────────────────────────────────────
    #[error("concurrent spending lock timeout acquiring lock for {0}")]
    LockTimeout(String),

    #[error("resource busy, try again: {0}")]
    Busy(String),

    // ── Chain submission ──────────────────────────────────────────────────────
    #[error("transaction failed: {0}")]
    TxFailed(String),

    // ── Storage / serialization ───────────────────────────────────────────────
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    // ── Cryptography ──────────────────────────────────────────────────────────
    #[error("security error: {0}")]
    SecurityError(String),

    // ── Catch-all ─────────────────────────────────────────────────────────────
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl AegixError {
    /// Process exit code mapping used at each binary's outermost boundary
    /// (`aegix-node::main`, `aegix-cli::main`).
    pub fn exit_code(&self) -> i32 {
        match self {
            AegixError::InvalidArgument(_)
            | AegixError::InvalidAmount { .. }
            | AegixError::InvalidHandleFormat(_)
            | AegixError::UnknownPool(_)
            | AegixError::UnknownSession(_)
            | AegixError::UnknownPaymentSession(_) => 64, // EX_USAGE
            AegixError::InvalidSignature { .. }
            | AegixError::StaleChallenge { .. }
            | AegixError::PermissionDenied(_)
            | AegixError::PoolLocked { .. }
            | AegixError::NeedsReauth { .. }
            | AegixError::DailyLimitExceeded { .. }
            | AegixError::SessionRevoked(_)
            | AegixError::SessionExpired(_)
            | AegixError::MaxPerTxExceeded { .. } => 77, // EX_NOPERM
            AegixError::LedgerUnavailable(_) | AegixError::IndexerSlow(_) | AegixError::LightUnavailable(_) => 69, // EX_UNAVAILABLE
            AegixError::Storage(_) | AegixError::Serialization(_) => 75, // EX_TEMPFAIL
            AegixError::SecurityError(_) => 1,
            _ => 1,
        }
    }
}

impl From<sled::Error> for AegixError {
    fn from(e: sled::Error) -> Self {
        AegixError::Storage(e.to_string())
    }
}

impl From<bincode::Error> for AegixError {
    fn from(e: bincode::Error) -> Self {
        AegixError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for AegixError {
    fn from(e: serde_json::Error) -> Self {
        AegixError::Serialization(e.to_string())
    }
}

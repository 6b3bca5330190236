//! ─── Aegix protocol constants ────────────────────────────────────────────
//!
//! Payment gateway for stablecoin transfers routed through ephemeral burner
//! accounts, with an optional ZK-compressed hop for maximum privacy.
//!
//! Amounts are expressed in the payable asset's smallest unit ("micro-units",
//! 10^6 per display unit) unless the name says `NATIVE`, in which case the
//! unit is the ledger's native gas asset's smallest unit (10^9 per display
//! unit, matching a Solana-family ledger).

/// Micro-units per display unit of the payable stablecoin (e.g. 1 USDC = 10^6).
pub const MICRO_UNITS_PER_DISPLAY_UNIT: u128 = 1_000_000;

/// Native-asset smallest units per display unit (e.g. 1 SOL = 10^9 lamports).
pub const NATIVE_UNITS_PER_DISPLAY_UNIT: u128 = 1_000_000_000;

/// Largest amount accepted by `BudgetLedger::validate_and_reserve` and by
/// `PaymentEngine`, in micro-units. Digit-only amount strings above this are
/// rejected with `InvalidAmount`.
pub const MAX_AMOUNT_MICRO: u128 = 1_000_000_000_000_000; // 10^15

// ── Session keys ─────────────────────────────────────────────────────────────

/// Nominal session duration granted by `session.create` when the caller does
/// not specify one.
pub const SESSION_DEFAULT_DURATION_SECS: i64 = 24 * 3600;

/// Hard ceiling on `expires_at - granted_at` for any session key.
pub const SESSION_MAX_DURATION_SECS: i64 = 7 * 24 * 3600;

// ── Budget ledger ─────────────────────────────────────────────────────────────

/// Timeout for acquiring a session's spending mutex before returning
/// `LockTimeout` ("concurrent spending lock timeout").
pub const BUDGET_LOCK_TIMEOUT_MS: u64 = 3_000;

/// Timeout for `PaymentEngine` acquiring a pool's per-pool serialization
/// mutex before returning `Busy` without having touched any state. Short,
/// because a caller that hits this should simply retry rather than queue
/// indefinitely behind another in-flight payment on the same pool.
pub const POOL_LOCK_TIMEOUT_MS: u64 = 2_000;

// ── Chain adapter / transaction expiry ───────────────────────────────────────

/// Maximum number of blocks/slots beyond the current height a built
/// transaction's validity window may extend.
pub const PAYMENT_EXPIRY_BLOCKS: u64 = 150;

/// `ChainAdapter::health_check` results older than this are treated as stale
/// and re-fetched before a Maximum-Privacy payment is allowed to proceed.
pub const HEALTH_CHECK_MAX_AGE_SECS: i64 = 5;

// ── Maximum-Privacy indexer polling (§4.6.3 M2_WaitIndex) ────────────────────

/// Number of `get_compressed_balance` polling attempts before pausing the
/// session in a recoverable state.
pub const INDEXER_POLL_MAX_ATTEMPTS: u32 = 10;

/// Delay between polling attempts.
pub const INDEXER_POLL_INTERVAL_SECS: u64 = 2;

/// Global wall-clock deadline for `M2_WaitIndex`, enforced independently of
/// the attempt/interval product so a single slow poll cannot blow the budget.
pub const INDEXER_POLL_DEADLINE_SECS: u64 = 20;

// ── Liquidity floors (§4.6.4) ─────────────────────────────────────────────────

/// Standard mode: minimum native balance pool `P` must hold (covers burner
/// funding fee + rent), in native smallest units. 0.008 native units.
pub const STANDARD_MIN_POOL_NATIVE: u128 = 8_000_000;

/// Maximum-Privacy mode: minimum native balance the Recovery Pool must hold
/// to act as fee payer for `M3_DecompressAndDeliver`. 0.001 native units.
pub const MAX_PRIVACY_MIN_RECOVERY_NATIVE: u128 = 1_000_000;

/// Default `RecoveryPool.min_required_native` checked at `M0_Init`.
/// 0.005 native units.
pub const DEFAULT_MIN_RECOVERY_NATIVE: u128 = 5_000_000;

// ── Cleanup scheduler ─────────────────────────────────────────────────────────

/// Interval between `CleanupScheduler` ticks.
pub const CLEANUP_TICK_SECS: u64 = 60;

/// Maximum number of paused `M2_WaitIndex` sessions the scheduler will retry
/// to completion in a single tick, bounding tick latency.
pub const CLEANUP_MAX_RESUMES_PER_TICK: usize = 8;

/// A per-session/per-pool mutex with no recorded activity for longer than
/// this is eligible for pruning by the scheduler.
pub const MUTEX_IDLE_PRUNE_SECS: i64 = 3600;

/// Burner token accounts with zero balance and no activity for longer than
/// this are closed by the scheduler, recovering rent to the Recovery Pool.
pub const BURNER_IDLE_RECLAIM_SECS: i64 = 1800;

/// Rent lamports reclaimed by `ChainAdapter::build_close_account` for a
/// single token account, as simulated by `SimulatedChainAdapter`.
pub const CLOSE_ACCOUNT_RENT_NATIVE: u128 = 2_039_280;

/// Flat per-transaction network fee assumed for a burner-signed transaction.
pub const TX_FEE_NATIVE: u128 = 5_000;

/// Native units `S1_FundBurner` (Standard mode) sends pool-`P`-to-burner
/// alongside the payable-asset transfer: enough for the burner to pay its
/// own fee on `S2_PayRecipient` and `S3_CloseBurner`, plus one token-account
/// rent in case `S2` has to create the recipient's account.
pub const BURNER_NATIVE_FUNDING: u128 = CLOSE_ACCOUNT_RENT_NATIVE + 2 * TX_FEE_NATIVE;

// ── Challenge freshness ───────────────────────────────────────────────────────

/// Maximum allowed distance between a signed challenge's embedded timestamp
/// (`pool_auth_message`, `export_key_message`, ...) and the server's clock,
/// in either direction. Bounds how long a captured signature stays replayable.
pub const SIGNATURE_TIMESTAMP_SKEW_SECS: i64 = 300;

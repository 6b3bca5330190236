use aegix_core::{AegixError, Address, Amount, TxSignature};
use async_trait::async_trait;

use crate::plan::{SignedTx, UnsignedTx};

/// Narrow interface onto the programmable ledger and its ZK-compression
/// indexer. `PaymentEngine` never talks to an RPC endpoint directly — every
/// chain interaction is mediated through this trait so tests can run
/// against `SimulatedChainAdapter` without a live ledger.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Native-asset balance (lamports-equivalent) of `address`.
    async fn get_balance(&self, address: &Address) -> Result<Amount, AegixError>;

    /// Balance of an ordinary (uncompressed) SPL-style token account.
    async fn get_token_balance(&self, address: &Address, mint: &str) -> Result<Amount, AegixError>;

    /// Balance held in a ZK-compressed token account, as reported by the
    /// compression indexer. Returns `IndexerSlow` if the indexer has not
    /// caught up to the latest compress/decompress instruction.
    async fn get_compressed_balance(&self, address: &Address, mint: &str) -> Result<Amount, AegixError>;

    /// Build an unsigned `StandardTransfer` plan (§4.6.2 S1/S2).
    async fn build_standard_payment(
        &self,
        from: &Address,
        to: &Address,
        amount_micro: Amount,
        mint: &str,
    ) -> Result<UnsignedTx, AegixError>;

    /// Build an unsigned `Compress` plan (§4.6.3 M1).
    async fn build_compress(
        &self,
        from: &Address,
        to: &Address,
        amount_micro: Amount,
        mint: &str,
    ) -> Result<UnsignedTx, AegixError>;

    /// Build an unsigned `DecompressAndTransfer` plan (§4.6.3 M3).
    async fn build_decompress_and_transfer(
        &self,
        from: &Address,
        to: &Address,
        amount_micro: Amount,
        mint: &str,
        fee_payer: &Address,
    ) -> Result<UnsignedTx, AegixError>;

    /// Build an unsigned `CloseAccount` plan reclaiming an empty burner
    /// token account's rent to `rent_recipient`, used by `CleanupScheduler`.
    async fn build_close_account(
        &self,
        account: &Address,
        mint: &str,
        rent_recipient: &Address,
    ) -> Result<UnsignedTx, AegixError>;

    /// Build an unsigned `FundBurner` plan (§4.6.2 S1): `from` (pool `P`)
    /// sends both `amount_micro` of `mint` and `native_amount` native units
    /// to `to` (burner `B`) in one transaction.
    async fn build_fund_burner(
        &self,
        from: &Address,
        to: &Address,
        amount_micro: Amount,
        mint: &str,
        native_amount: Amount,
    ) -> Result<UnsignedTx, AegixError>;

    /// Build an unsigned `NativeTransfer` plan, used by `S3_CloseBurner` to
    /// sweep leftover native dust from a spent burner back to `P`.
    async fn build_native_transfer(
        &self,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<UnsignedTx, AegixError>;

    /// Submit a signed transaction and wait for ledger confirmation.
    async fn submit_and_confirm(&self, signed: SignedTx) -> Result<TxSignature, AegixError>;

    /// Current blockhash/slot reference used to bound a transaction's
    /// validity window.
    async fn latest_blockhash(&self) -> Result<String, AegixError>;

    /// True if the ledger RPC (and, for Maximum-Privacy callers, the
    /// compression indexer) is reachable and synced.
    async fn health_check(&self) -> Result<bool, AegixError>;
}

use aegix_core::{AegixError, Address, Amount, TxSignature};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::adapter::ChainAdapter;
use crate::plan::{SignedTx, TxPlan, UnsignedTx};

/// In-memory ledger used by `BackendMode::Simulation` and by every test in
/// this workspace that would otherwise need a live Solana-family RPC.
/// `compress_lag_polls` reproduces the realistic case where the compression
/// indexer needs a few polls to observe a just-submitted compress
/// instruction, exercising `M2_WaitIndex` without a real network.
pub struct SimulatedChainAdapter {
    native_balances: DashMap<Address, Amount>,
    token_balances: DashMap<(Address, String), Amount>,
    compressed_balances: DashMap<(Address, String), Amount>,
    /// Compressed balance mutations staged here become visible after this
    /// many `get_compressed_balance` polls, simulating indexer lag.
    compress_lag_polls: u32,
    poll_counts: DashMap<(Address, String), u32>,
    pending_compressed: DashMap<(Address, String), Amount>,
    slot: AtomicU64,
}

impl SimulatedChainAdapter {
    pub fn new() -> Self {
        Self {
            native_balances: DashMap::new(),
            token_balances: DashMap::new(),
            compressed_balances: DashMap::new(),
            compress_lag_polls: 0,
            poll_counts: DashMap::new(),
            pending_compressed: DashMap::new(),
            slot: AtomicU64::new(1),
        }
    }

    /// Same simulator, but `get_compressed_balance` returns `IndexerSlow`
    /// for `lag_polls` calls before exposing the true balance — used by
    /// tests exercising the `M2_WaitIndex` retry/pause path.
    pub fn with_indexer_lag(lag_polls: u32) -> Self {
        Self {
            compress_lag_polls: lag_polls,
            ..Self::new()
        }
    }

    pub fn fund_native(&self, address: &Address, amount: Amount) {
        *self.native_balances.entry(address.clone()).or_insert(0) += amount;
    }

    pub fn fund_token(&self, address: &Address, mint: &str, amount: Amount) {
        *self
            .token_balances
            .entry((address.clone(), mint.to_string()))
            .or_insert(0) += amount;
    }

    fn advance_slot(&self) -> u64 {
        self.slot.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for SimulatedChainAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainAdapter for SimulatedChainAdapter {
    async fn get_balance(&self, address: &Address) -> Result<Amount, AegixError> {
        Ok(self.native_balances.get(address).map(|v| *v).unwrap_or(0))
    }

    async fn get_token_balance(&self, address: &Address, mint: &str) -> Result<Amount, AegixError> {
        Ok(self
            .token_balances
            .get(&(address.clone(), mint.to_string()))
            .map(|v| *v)
            .unwrap_or(0))
    }

    async fn get_compressed_balance(&self, address: &Address, mint: &str) -> Result<Amount, AegixError> {
        let key = (address.clone(), mint.to_string());
        if let Some(pending) = self.pending_compressed.get(&key).map(|v| *v) {
            let mut count = self.poll_counts.entry(key.clone()).or_insert(0);
            *count += 1;
            if *count < self.compress_lag_polls {
                return Err(AegixError::IndexerSlow(format!(
                    "compressed balance for {} not yet indexed ({}/{})",
                    address, *count, self.compress_lag_polls
                )));
            }
            *self.compressed_balances.entry(key.clone()).or_insert(0) += pending;
            self.pending_compressed.remove(&key);
            self.poll_counts.remove(&key);
        }
        Ok(self.compressed_balances.get(&key).map(|v| *v).unwrap_or(0))
    }

    async fn build_standard_payment(
        &self,
        from: &Address,
        to: &Address,
        amount_micro: Amount,
        mint: &str,
    ) -> Result<UnsignedTx, AegixError> {
        Ok(UnsignedTx {
            plan: TxPlan::StandardTransfer {
                from: from.clone(),
                to: to.clone(),
                amount_micro,
                mint: mint.to_string(),
            },
            blockhash: format!("sim-blockhash-{}", self.slot.load(Ordering::SeqCst)),
            expires_at_block: self.slot.load(Ordering::SeqCst) + aegix_core::PAYMENT_EXPIRY_BLOCKS,
        })
    }

    async fn build_compress(
        &self,
        from: &Address,
        to: &Address,
        amount_micro: Amount,
        mint: &str,
    ) -> Result<UnsignedTx, AegixError> {
        Ok(UnsignedTx {
            plan: TxPlan::Compress {
                from: from.clone(),
                to: to.clone(),
                amount_micro,
                mint: mint.to_string(),
            },
            blockhash: format!("sim-blockhash-{}", self.slot.load(Ordering::SeqCst)),
            expires_at_block: self.slot.load(Ordering::SeqCst) + aegix_core::PAYMENT_EXPIRY_BLOCKS,
        })
    }

    async fn build_decompress_and_transfer(
        &self,
        from: &Address,
        to: &Address,
        amount_micro: Amount,
        mint: &str,
        fee_payer: &Address,
    ) -> Result<UnsignedTx, AegixError> {
        Ok(UnsignedTx {
            plan: TxPlan::DecompressAndTransfer {
                from: from.clone(),
                to: to.clone(),
                amount_micro,
                mint: mint.to_string(),
                fee_payer: fee_payer.clone(),
            },
            blockhash: format!("sim-blockhash-{}", self.slot.load(Ordering::SeqCst)),
            expires_at_block: self.slot.load(Ordering::SeqCst) + aegix_core::PAYMENT_EXPIRY_BLOCKS,
        })
    }

    async fn build_close_account(
        &self,
        account: &Address,
        mint: &str,
        rent_recipient: &Address,
    ) -> Result<UnsignedTx, AegixError> {
        Ok(UnsignedTx {
            plan: TxPlan::CloseAccount {
                account: account.clone(),
                mint: mint.to_string(),
                rent_recipient: rent_recipient.clone(),
            },
            blockhash: format!("sim-blockhash-{}", self.slot.load(Ordering::SeqCst)),
            expires_at_block: self.slot.load(Ordering::SeqCst) + aegix_core::PAYMENT_EXPIRY_BLOCKS,
        })
    }

    async fn build_fund_burner(
        &self,
        from: &Address,
        to: &Address,
        amount_micro: Amount,
        mint: &str,
        native_amount: Amount,
    ) -> Result<UnsignedTx, AegixError> {
        Ok(UnsignedTx {
            plan: TxPlan::FundBurner {
                from: from.clone(),
                to: to.clone(),
                amount_micro,
                mint: mint.to_string(),
                native_amount,
            },
            blockhash: format!("sim-blockhash-{}", self.slot.load(Ordering::SeqCst)),
            expires_at_block: self.slot.load(Ordering::SeqCst) + aegix_core::PAYMENT_EXPIRY_BLOCKS,
        })
    }

    async fn build_native_transfer(
        &self,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<UnsignedTx, AegixError> {
        Ok(UnsignedTx {
            plan: TxPlan::NativeTransfer {
                from: from.clone(),
                to: to.clone(),
                amount,
            },
            blockhash: format!("sim-blockhash-{}", self.slot.load(Ordering::SeqCst)),
            expires_at_block: self.slot.load(Ordering::SeqCst) + aegix_core::PAYMENT_EXPIRY_BLOCKS,
        })
    }

    async fn submit_and_confirm(&self, signed: SignedTx) -> Result<TxSignature, AegixError> {
        let slot = self.advance_slot();
        match &signed.unsigned.plan {
            TxPlan::StandardTransfer {
                from,
                to,
                amount_micro,
                mint,
            } => {
                let from_key = (from.clone(), mint.clone());
                let mut from_bal = self.token_balances.entry(from_key).or_insert(0);
                if *from_bal < *amount_micro {
                    return Err(AegixError::InsufficientFunds(aegix_core::ShortfallDetail {
                        have: *from_bal,
                        required: *amount_micro,
                        shortfall: amount_micro - *from_bal,
                    }));
                }
                *from_bal -= amount_micro;
                *self
                    .token_balances
                    .entry((to.clone(), mint.clone()))
                    .or_insert(0) += amount_micro;
            }
            TxPlan::Compress {
                from,
                to,
                amount_micro,
                mint,
            } => {
                let from_key = (from.clone(), mint.clone());
                let mut from_bal = self.token_balances.entry(from_key).or_insert(0);
                if *from_bal < *amount_micro {
                    return Err(AegixError::InsufficientFunds(aegix_core::ShortfallDetail {
                        have: *from_bal,
                        required: *amount_micro,
                        shortfall: amount_micro - *from_bal,
                    }));
                }
                *from_bal -= amount_micro;
                *self
                    .pending_compressed
                    .entry((to.clone(), mint.clone()))
                    .or_insert(0) += amount_micro;
            }
            TxPlan::DecompressAndTransfer {
                from,
                to,
                amount_micro,
                mint,
                ..
            } => {
                let from_key = (from.clone(), mint.clone());
                let mut from_bal = self.compressed_balances.entry(from_key).or_insert(0);
                if *from_bal < *amount_micro {
                    return Err(AegixError::InsufficientFunds(aegix_core::ShortfallDetail {
                        have: *from_bal,
                        required: *amount_micro,
                        shortfall: amount_micro - *from_bal,
                    }));
                }
                *from_bal -= amount_micro;
                *self
                    .token_balances
                    .entry((to.clone(), mint.clone()))
                    .or_insert(0) += amount_micro;
            }
            TxPlan::CloseAccount {
                account,
                mint,
                rent_recipient,
            } => {
                self.token_balances.remove(&(account.clone(), mint.clone()));
                *self.native_balances.entry(rent_recipient.clone()).or_insert(0) +=
                    aegix_core::constants::CLOSE_ACCOUNT_RENT_NATIVE;
            }
            TxPlan::FundBurner {
                from,
                to,
                amount_micro,
                mint,
                native_amount,
            } => {
                let from_token_key = (from.clone(), mint.clone());
                let mut from_token = self.token_balances.entry(from_token_key).or_insert(0);
                if *from_token < *amount_micro {
                    return Err(AegixError::InsufficientFunds(aegix_core::ShortfallDetail {
                        have: *from_token,
                        required: *amount_micro,
                        shortfall: amount_micro - *from_token,
                    }));
                }
                let mut from_native = self.native_balances.entry(from.clone()).or_insert(0);
                if *from_native < *native_amount {
                    return Err(AegixError::InsufficientFunds(aegix_core::ShortfallDetail {
                        have: *from_native,
                        required: *native_amount,
                        shortfall: native_amount - *from_native,
                    }));
                }
                *from_token -= amount_micro;
                *from_native -= native_amount;
                *self
                    .token_balances
                    .entry((to.clone(), mint.clone()))
                    .or_insert(0) += amount_micro;
                *self.native_balances.entry(to.clone()).or_insert(0) += native_amount;
            }
            TxPlan::NativeTransfer { from, to, amount } => {
                let mut from_bal = self.native_balances.entry(from.clone()).or_insert(0);
                if *from_bal < *amount {
                    return Err(AegixError::InsufficientFunds(aegix_core::ShortfallDetail {
                        have: *from_bal,
                        required: *amount,
                        shortfall: amount - *from_bal,
                    }));
                }
                *from_bal -= amount;
                *self.native_balances.entry(to.clone()).or_insert(0) += amount;
            }
        }
        Ok(TxSignature(format!("sim-sig-{slot}")))
    }

    async fn latest_blockhash(&self) -> Result<String, AegixError> {
        Ok(format!("sim-blockhash-{}", self.slot.load(Ordering::SeqCst)))
    }

    async fn health_check(&self) -> Result<bool, AegixError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn standard_transfer_moves_token_balance() {
        let adapter = SimulatedChainAdapter::new();
        let a = Address::from_bytes([1u8; 32]);
        let b = Address::from_bytes([2u8; 32]);
        adapter.fund_token(&a, "USDC", 1_000);

        let unsigned = adapter.build_standard_payment(&a, &b, 400, "USDC").await.unwrap();
        let signed = SignedTx {
            unsigned,
            signer: a.clone(),
            signature: [0u8; 64],
        };
        adapter.submit_and_confirm(signed).await.unwrap();

        assert_eq!(adapter.get_token_balance(&a, "USDC").await.unwrap(), 600);
        assert_eq!(adapter.get_token_balance(&b, "USDC").await.unwrap(), 400);
    }

    #[tokio::test]
    async fn compressed_balance_reports_indexer_slow_until_lag_elapses() {
        let adapter = SimulatedChainAdapter::with_indexer_lag(2);
        let a = Address::from_bytes([1u8; 32]);
        let b = Address::from_bytes([2u8; 32]);
        adapter.fund_token(&a, "USDC", 1_000);

        let unsigned = adapter.build_compress(&a, &b, 300, "USDC").await.unwrap();
        let signed = SignedTx {
            unsigned,
            signer: a.clone(),
            signature: [0u8; 64],
        };
        adapter.submit_and_confirm(signed).await.unwrap();

        assert!(adapter.get_compressed_balance(&b, "USDC").await.is_err());
        assert_eq!(adapter.get_compressed_balance(&b, "USDC").await.unwrap(), 300);
    }
}

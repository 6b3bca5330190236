use aegix_core::{AegixError, Address, Amount, TxSignature};
use async_trait::async_trait;

use crate::adapter::ChainAdapter;
use crate::plan::{SignedTx, TxPlan, UnsignedTx};

/// `ChainAdapter` backed by a live Solana-family ledger RPC and a separate
/// ZK-compression indexer RPC (`light_rpc_url`). Uses raw HTTP POST with
/// `serde_json` the way the CLI's `AegixRpcClient` talks to the node,
/// rather than a full client SDK.
pub struct RpcChainAdapter {
    solana_rpc_url: String,
    light_rpc_url: String,
    client: reqwest::Client,
}

impl RpcChainAdapter {
    pub fn new(solana_rpc_url: String, light_rpc_url: String) -> Self {
        Self {
            solana_rpc_url,
            light_rpc_url,
            client: reqwest::Client::new(),
        }
    }

    async fn call(&self, url: &str, method: &str, params: serde_json::Value) -> Result<serde_json::Value, AegixError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });
        let resp = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AegixError::LedgerUnavailable(format!("connecting to {url}: {e}")))?;
        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| AegixError::LedgerUnavailable(format!("parsing RPC response: {e}")))?;
        if let Some(err) = json.get("error") {
            return Err(AegixError::TxFailed(format!("RPC error: {err}")));
        }
        Ok(json["result"].clone())
    }

    async fn solana_call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, AegixError> {
        self.call(&self.solana_rpc_url, method, params).await
    }

    async fn light_call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, AegixError> {
        self.call(&self.light_rpc_url, method, params).await
    }
}

#[async_trait]
impl ChainAdapter for RpcChainAdapter {
    async fn get_balance(&self, address: &Address) -> Result<Amount, AegixError> {
        let result = self
            .solana_call("getBalance", serde_json::json!([address.to_b58()]))
            .await?;
        result["value"]
            .as_u64()
            .map(|v| v as Amount)
            .ok_or_else(|| AegixError::LedgerUnavailable("missing balance value".to_string()))
    }

    async fn get_token_balance(&self, address: &Address, mint: &str) -> Result<Amount, AegixError> {
        let result = self
            .solana_call(
                "getTokenAccountBalance",
                serde_json::json!([address.to_b58(), { "mint": mint }]),
            )
            .await?;
        result["value"]["amount"]
            .as_str()
            .and_then(|s| s.parse::<Amount>().ok())
            .ok_or_else(|| AegixError::LedgerUnavailable("missing token balance amount".to_string()))
    }

    async fn get_compressed_balance(&self, address: &Address, mint: &str) -> Result<Amount, AegixError> {
        let result = self
            .light_call(
                "getCompressedTokenBalance",
                serde_json::json!([address.to_b58(), { "mint": mint }]),
            )
            .await
            .map_err(|e| AegixError::IndexerSlow(e.to_string()))?;
        result["amount"]
            .as_str()
            .and_then(|s| s.parse::<Amount>().ok())
            .ok_or_else(|| AegixError::IndexerSlow("compressed balance not yet indexed".to_string()))
    }

    async fn build_standard_payment(
        &self,
        from: &Address,
        to: &Address,
        amount_micro: Amount,
        mint: &str,
    ) -> Result<UnsignedTx, AegixError> {
        let blockhash = self.latest_blockhash().await?;
        Ok(UnsignedTx {
            plan: TxPlan::StandardTransfer {
                from: from.clone(),
                to: to.clone(),
                amount_micro,
                mint: mint.to_string(),
            },
            blockhash,
            expires_at_block: 0,
        })
    }

    async fn build_compress(
        &self,
        from: &Address,
        to: &Address,
        amount_micro: Amount,
        mint: &str,
    ) -> Result<UnsignedTx, AegixError> {
        let blockhash = self.latest_blockhash().await?;
        Ok(UnsignedTx {
            plan: TxPlan::Compress {
                from: from.clone(),
                to: to.clone(),
                amount_micro,
                mint: mint.to_string(),
            },
            blockhash,
            expires_at_block: 0,
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
        let blockhash = self.latest_blockhash().await?;
        Ok(UnsignedTx {
            plan: TxPlan::DecompressAndTransfer {
                from: from.clone(),
                to: to.clone(),
                amount_micro,
                mint: mint.to_string(),
                fee_payer: fee_payer.clone(),
            },
            blockhash,
            expires_at_block: 0,
        })
    }

    async fn build_close_account(
        &self,
        account: &Address,
        mint: &str,
        rent_recipient: &Address,
    ) -> Result<UnsignedTx, AegixError> {
        let blockhash = self.latest_blockhash().await?;
        Ok(UnsignedTx {
            plan: TxPlan::CloseAccount {
                account: account.clone(),
                mint: mint.to_string(),
                rent_recipient: rent_recipient.clone(),
            },
            blockhash,
            expires_at_block: 0,
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
        let blockhash = self.latest_blockhash().await?;
        Ok(UnsignedTx {
            plan: TxPlan::FundBurner {
                from: from.clone(),
                to: to.clone(),
                amount_micro,
                mint: mint.to_string(),
                native_amount,
            },
            blockhash,
            expires_at_block: 0,
        })
    }

    async fn build_native_transfer(
        &self,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<UnsignedTx, AegixError> {
        let blockhash = self.latest_blockhash().await?;
        Ok(UnsignedTx {
            plan: TxPlan::NativeTransfer {
                from: from.clone(),
                to: to.clone(),
                amount,
            },
            blockhash,
            expires_at_block: 0,
        })
    }

    async fn submit_and_confirm(&self, signed: SignedTx) -> Result<TxSignature, AegixError> {
        let wire_hex = hex::encode(signed.to_wire_bytes());
        let result = self
            .solana_call("sendTransaction", serde_json::json!([wire_hex]))
            .await?;
        let sig = result
            .as_str()
            .ok_or_else(|| AegixError::TxFailed("missing signature in sendTransaction response".to_string()))?;
        Ok(TxSignature(sig.to_string()))
    }

    async fn latest_blockhash(&self) -> Result<String, AegixError> {
        let result = self.solana_call("getLatestBlockhash", serde_json::json!([])).await?;
        result["value"]["blockhash"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| AegixError::LedgerUnavailable("missing blockhash".to_string()))
    }

    async fn health_check(&self) -> Result<bool, AegixError> {
        match self.solana_call("getHealth", serde_json::json!([])).await {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}

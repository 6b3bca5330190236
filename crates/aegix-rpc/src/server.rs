use std::net::SocketAddr;
use std::sync::Arc;

use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObject;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use aegix_audit::AuditLog;
use aegix_budget::BudgetLedger;
use aegix_burner::BurnerFactory;
use aegix_chain::{ChainAdapter, SignedTx};
use aegix_core::{
    AegixError, Address, Config, PaymentMethod, PoolStatus, SessionKey, SessionStatus,
};
use aegix_crypto::{export_key_message, pool_auth_message, verify_signature};
use aegix_engine::{PaymentEngine, PaymentStore};
use aegix_vault::KeyVault;

use crate::api::AegixApiServer;
use crate::types::{
    encode_unsigned_tx, EncryptedSummary, OkResponse, PoolConfirmFundingResponse,
    PoolExportKeyResponse, PoolFundResponse, PoolGetResponse, PoolInitResponse, PoolPayResponse,
    PoolShieldResponse, PoolTopUpResponse, PoolWithdrawResponse, RecoveryCreateAndFundResponse,
    RecoveryStatusResponse, RecoveryValidateResponse, SessionDetails, SessionKeyDescriptor,
    SessionSummary,
};

/// Every pool created through this RPC surface uses a single implicit
/// pool id per owner; `pool.shield` is the one call that takes `pool_id`
/// explicitly, matched against this value.
const DEFAULT_POOL_ID: &str = "default";

/// Sentinel mint string denoting a transfer of the ledger's native gas
/// asset rather than the payable stablecoin, passed through
/// `ChainAdapter::build_standard_payment`'s generic `mint` parameter.
const NATIVE_MINT: &str = "native";

fn rpc_err(code: i32, msg: impl Into<String>) -> ErrorObject<'static> {
    ErrorObject::owned(code, msg.into(), None::<()>)
}

/// Map a domain error onto a JSON-RPC error code. `PoolLocked`/`NeedsReauth`
/// get a code distinct from every other authorization failure so a client
/// can special-case "prompt the owner to re-authenticate" without parsing
/// the message text.
fn to_rpc_err(e: AegixError) -> ErrorObject<'static> {
    let code = match &e {
        AegixError::InvalidArgument(_)
        | AegixError::InvalidAmount { .. }
        | AegixError::InvalidHandleFormat(_)
        | AegixError::UnknownPool(_)
        | AegixError::UnknownSession(_)
        | AegixError::UnknownPaymentSession(_) => -32602,
        AegixError::PoolLocked { .. } | AegixError::NeedsReauth { .. } => -32010,
        AegixError::InvalidSignature { .. }
        | AegixError::StaleChallenge { .. }
        | AegixError::PermissionDenied(_) => -32001,
        AegixError::DailyLimitExceeded { .. }
        | AegixError::SessionRevoked(_)
        | AegixError::SessionExpired(_)
        | AegixError::MaxPerTxExceeded { .. } => -32011,
        AegixError::InsufficientFunds(_) => -32020,
        AegixError::LedgerUnavailable(_) | AegixError::LightUnavailable(_) | AegixError::IndexerSlow(_) => -32030,
        AegixError::LockTimeout(_) | AegixError::Busy(_) => -32040,
        AegixError::TxFailed(_) => -32050,
        AegixError::Storage(_) | AegixError::Serialization(_) | AegixError::SecurityError(_) | AegixError::Unknown(_) => -32603,
    };
    rpc_err(code, e.to_string())
}

fn parse_address(s: &str) -> Result<Address, ErrorObject<'static>> {
    Address::from_b58(s).map_err(|e| rpc_err(-32602, format!("invalid address: {e}")))
}

fn parse_amount(s: &str) -> Result<u128, ErrorObject<'static>> {
    s.parse::<u128>().map_err(|e| rpc_err(-32602, format!("invalid amount: {e}")))
}

fn decode_signature(s: &str) -> Result<Vec<u8>, ErrorObject<'static>> {
    hex::decode(s).map_err(|e| rpc_err(-32602, format!("invalid signature hex: {e}")))
}

/// Pull the timestamp a caller embedded in a domain-separated challenge
/// message (`"...::{timestamp}"`), so `pool.init`/`pool.export_key` can pass
/// it to `KeyVault`, which reconstructs and verifies the same challenge.
fn extract_timestamp(message: &str) -> Result<i64, ErrorObject<'static>> {
    message
        .rsplit("::")
        .next()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| rpc_err(-32602, "challenge message missing trailing timestamp"))
}

/// Shared state passed to the RPC server. Each field is its own `Arc`
/// handle onto a component also held by `aegix-node`'s startup sequence
/// and, where relevant, `aegix-scheduler`'s `CleanupScheduler`.
pub struct RpcServerState {
    pub vault: Arc<KeyVault>,
    pub budget: Arc<BudgetLedger>,
    pub chain: Arc<dyn ChainAdapter>,
    pub burners: Arc<BurnerFactory>,
    pub engine: Arc<PaymentEngine>,
    pub audit: Arc<AuditLog>,
    pub store: Arc<PaymentStore>,
    pub config: Arc<Config>,
}

pub struct RpcServer {
    state: Arc<RpcServerState>,
}

impl RpcServer {
    pub fn new(state: Arc<RpcServerState>) -> Self {
        Self { state }
    }

    /// Start the JSON-RPC server on `addr` with permissive CORS headers.
    /// Returns a handle to stop it.
    pub async fn start(self, addr: SocketAddr) -> anyhow::Result<ServerHandle> {
        let cors = CorsLayer::new()
            .allow_methods(Any)
            .allow_origin(Any)
            .allow_headers(Any);

        let server = Server::builder()
            .set_http_middleware(tower::ServiceBuilder::new().layer(cors))
            .build(addr)
            .await?;

        let module = self.into_rpc();
        let handle = server.start(module);
        info!(%addr, "RPC server started");
        Ok(handle)
    }

    /// Build, sign with `signer`, and submit a transfer plan through the
    /// chain adapter, the same validate/build/sign/submit shape
    /// `PaymentEngine::sign_and_submit_standard` uses internally.
    async fn submit_transfer(
        &self,
        signer: &aegix_crypto::KeyPair,
        from: &Address,
        to: &Address,
        amount_micro: u128,
        mint: &str,
    ) -> Result<String, AegixError> {
        let unsigned = self
            .state
            .chain
            .build_standard_payment(from, to, amount_micro, mint)
            .await?;
        let signature = signer.sign(&unsigned.signing_bytes()).to_bytes();
        let signed = SignedTx {
            unsigned,
            signer: from.clone(),
            signature,
        };
        Ok(self.state.chain.submit_and_confirm(signed).await?.0)
    }

    fn synthetic_direct_session(&self, owner: &Address) -> SessionKey {
        let now = chrono::Utc::now().timestamp();
        SessionKey {
            session_id: format!("direct:{}", owner.to_b58()),
            owner: owner.clone(),
            pool_id: DEFAULT_POOL_ID.to_string(),
            daily_limit_micro: self.state.config.max_amount_micro,
            max_per_tx: self.state.config.max_amount_micro,
            spend_period_secs: 3600,
            granted_at: now,
            expires_at: now + 3600,
            status: SessionStatus::Active,
        }
    }
}

fn pool_status_str(status: PoolStatus) -> String {
    match status {
        PoolStatus::Created => "created",
        PoolStatus::Funded => "funded",
        PoolStatus::Active => "active",
        PoolStatus::Locked => "locked",
    }
    .to_string()
}

fn payment_method_str(method: PaymentMethod) -> String {
    match method {
        PaymentMethod::Standard => "standard",
        PaymentMethod::MaximumPrivacy => "maximum_privacy",
    }
    .to_string()
}

#[async_trait]
impl AegixApiServer for RpcServer {
    async fn pool_init(&self, owner: String, signature: String, message: String) -> RpcResult<PoolInitResponse> {
        let owner = parse_address(&owner)?;
        let sig = decode_signature(&signature)?;
        let timestamp = extract_timestamp(&message)?;

        let is_new = self.state.vault.get_pool(&owner, DEFAULT_POOL_ID).is_err();
        let pool = self
            .state
            .vault
            .get_or_create_pool(&owner, DEFAULT_POOL_ID)
            .await
            .map_err(to_rpc_err)?;

        self.state
            .vault
            .unlock_pool(&owner, DEFAULT_POOL_ID, timestamp, &sig)
            .await
            .map_err(to_rpc_err)?;

        Ok(PoolInitResponse {
            pool_id: pool.pool_id,
            pool_address: pool.address.to_b58(),
            is_new,
        })
    }

    async fn pool_get(&self, owner: String) -> RpcResult<PoolGetResponse> {
        let owner = parse_address(&owner)?;
        let pool = self.state.vault.get_pool(&owner, DEFAULT_POOL_ID).map_err(to_rpc_err)?;
        let balance = self
            .state
            .chain
            .get_token_balance(&pool.address, &self.state.config.usdc_mint)
            .await
            .map_err(to_rpc_err)?;
        Ok(PoolGetResponse {
            pool_id: pool.pool_id,
            pool_address: pool.address.to_b58(),
            status: pool_status_str(pool.status),
            balance: balance.to_string(),
            needs_reauth: pool.status == PoolStatus::Locked,
        })
    }

    async fn pool_fund(&self, owner: String, amount: String) -> RpcResult<PoolFundResponse> {
        let owner_addr = parse_address(&owner)?;
        let amount = parse_amount(&amount)?;
        let pool = self
            .state
            .vault
            .get_or_create_pool(&owner_addr, DEFAULT_POOL_ID)
            .await
            .map_err(to_rpc_err)?;
        let unsigned = self
            .state
            .chain
            .build_standard_payment(&owner_addr, &pool.address, amount, &self.state.config.usdc_mint)
            .await
            .map_err(to_rpc_err)?;
        Ok(PoolFundResponse {
            unsigned_tx: encode_unsigned_tx(&unsigned),
        })
    }

    async fn pool_confirm_funding(&self, owner: String, tx_signature: String) -> RpcResult<PoolConfirmFundingResponse> {
        let owner = parse_address(&owner)?;
        if tx_signature.trim().is_empty() {
            return Err(rpc_err(-32602, "tx_signature must not be empty").into());
        }
        let pool = self.state.vault.get_pool(&owner, DEFAULT_POOL_ID).map_err(to_rpc_err)?;
        let balance = self
            .state
            .chain
            .get_token_balance(&pool.address, &self.state.config.usdc_mint)
            .await
            .map_err(to_rpc_err)?;
        if balance > 0 {
            self.state
                .vault
                .mark_pool_funded(&owner, DEFAULT_POOL_ID)
                .map_err(to_rpc_err)?;
        }
        Ok(PoolConfirmFundingResponse {
            balance: balance.to_string(),
        })
    }

    async fn pool_top_up(
        &self,
        owner: String,
        add_native: Option<String>,
        add_token: Option<String>,
    ) -> RpcResult<PoolTopUpResponse> {
        let owner_addr = parse_address(&owner)?;
        let pool = self.state.vault.get_pool(&owner_addr, DEFAULT_POOL_ID).map_err(to_rpc_err)?;

        let (amount, mint) = match (add_token, add_native) {
            (Some(t), _) => (parse_amount(&t)?, self.state.config.usdc_mint.clone()),
            (None, Some(n)) => (parse_amount(&n)?, NATIVE_MINT.to_string()),
            (None, None) => return Err(rpc_err(-32602, "one of add_native/add_token is required").into()),
        };

        let unsigned = self
            .state
            .chain
            .build_standard_payment(&owner_addr, &pool.address, amount, &mint)
            .await
            .map_err(to_rpc_err)?;
        Ok(PoolTopUpResponse {
            unsigned_tx: encode_unsigned_tx(&unsigned),
        })
    }

    async fn pool_withdraw(
        &self,
        owner: String,
        native: Option<String>,
        token: Option<String>,
    ) -> RpcResult<PoolWithdrawResponse> {
        let owner_addr = parse_address(&owner)?;
        let pool = self.state.vault.get_pool(&owner_addr, DEFAULT_POOL_ID).map_err(to_rpc_err)?;
        let pool_keypair = self
            .state
            .vault
            .signing_keypair_for_active_pool(&owner_addr, DEFAULT_POOL_ID)
            .map_err(to_rpc_err)?;

        let mut last_sig = None;

        if let Some(native) = native {
            let amount = parse_amount(&native)?;
            let balance = self.state.chain.get_balance(&pool.address).await.map_err(to_rpc_err)?;
            let reserve = aegix_core::STANDARD_MIN_POOL_NATIVE;
            if balance < amount + reserve {
                return Err(to_rpc_err(AegixError::InsufficientFunds(aegix_core::ShortfallDetail {
                    have: balance,
                    required: amount + reserve,
                    shortfall: (amount + reserve).saturating_sub(balance),
                })));
            }
            let sig = self
                .submit_transfer(&pool_keypair, &pool.address, &owner_addr, amount, NATIVE_MINT)
                .await
                .map_err(to_rpc_err)?;
            last_sig = Some(sig);
        }

        if let Some(token) = token {
            let amount = parse_amount(&token)?;
            let balance = self
                .state
                .chain
                .get_token_balance(&pool.address, &self.state.config.usdc_mint)
                .await
                .map_err(to_rpc_err)?;
            if balance < amount {
                return Err(to_rpc_err(AegixError::InsufficientFunds(aegix_core::ShortfallDetail {
                    have: balance,
                    required: amount,
                    shortfall: amount - balance,
                })));
            }
            let sig = self
                .submit_transfer(&pool_keypair, &pool.address, &owner_addr, amount, &self.state.config.usdc_mint)
                .await
                .map_err(to_rpc_err)?;
            last_sig = Some(sig);
        }

        let tx_signature = last_sig.ok_or_else(|| rpc_err(-32602, "one of native/token is required"))?;
        Ok(PoolWithdrawResponse { tx_signature })
    }

    async fn pool_shield(&self, pool_id: String, amount: String, owner: String) -> RpcResult<PoolShieldResponse> {
        let owner_addr = parse_address(&owner)?;
        let amount = parse_amount(&amount)?;
        if !self.state.chain.health_check().await.map_err(to_rpc_err)? {
            return Err(to_rpc_err(AegixError::LightUnavailable(
                "compression indexer reported unhealthy".to_string(),
            )));
        }

        let pool = self.state.vault.get_pool(&owner_addr, &pool_id).map_err(to_rpc_err)?;
        let pool_keypair = self
            .state
            .vault
            .signing_keypair_for_active_pool(&owner_addr, &pool_id)
            .map_err(to_rpc_err)?;
        let recovery = self
            .state
            .vault
            .get_or_create_recovery_pool(&owner_addr, self.state.config.min_recovery_native)
            .map_err(to_rpc_err)?;

        let unsigned = self
            .state
            .chain
            .build_compress(&pool.address, &recovery.address, amount, &self.state.config.usdc_mint)
            .await
            .map_err(to_rpc_err)?;
        let signature = pool_keypair.sign(&unsigned.signing_bytes()).to_bytes();
        let signed = SignedTx {
            unsigned,
            signer: pool.address.clone(),
            signature,
        };
        let tx_signature = self.state.chain.submit_and_confirm(signed).await.map_err(to_rpc_err)?.0;
        let compressed_balance = self
            .state
            .chain
            .get_compressed_balance(&recovery.address, &self.state.config.usdc_mint)
            .await
            .map_err(to_rpc_err)?;

        Ok(PoolShieldResponse {
            tx_signature,
            compressed_balance: compressed_balance.to_string(),
        })
    }

    async fn pool_pay(
        &self,
        owner: String,
        recipient: String,
        amount: String,
        use_compressed: bool,
        resume_session_id: Option<String>,
    ) -> RpcResult<PoolPayResponse> {
        let owner_addr = parse_address(&owner)?;

        if let Some(session_id) = resume_session_id {
            let session = self.state.engine.resume_maximum_privacy(&session_id).await.map_err(to_rpc_err)?;
            return Ok(PoolPayResponse {
                session_id: session.session_id,
                tx_signature: session.tx_signatures.last().map(|s| s.0.clone()).unwrap_or_default(),
                method: payment_method_str(session.method),
                privacy: "maximum".to_string(),
            });
        }

        let recipient_addr = parse_address(&recipient)?;
        let amount = parse_amount(&amount)?;
        let session_key = self.synthetic_direct_session(&owner_addr);

        let session = if use_compressed {
            self.state
                .engine
                .execute_maximum_privacy(&owner_addr, DEFAULT_POOL_ID, &session_key, &recipient_addr, amount)
                .await
        } else {
            self.state
                .engine
                .execute_standard(&owner_addr, DEFAULT_POOL_ID, &session_key, &recipient_addr, amount)
                .await
        }
        .map_err(to_rpc_err)?;

        Ok(PoolPayResponse {
            session_id: session.session_id,
            tx_signature: session.tx_signatures.last().map(|s| s.0.clone()).unwrap_or_default(),
            method: payment_method_str(session.method),
            privacy: if use_compressed { "maximum".to_string() } else { "standard".to_string() },
        })
    }

    async fn pool_history(&self, owner: String) -> RpcResult<Vec<SessionSummary>> {
        let owner = parse_address(&owner)?;
        let sessions = self.state.store.list_sessions_for_owner(&owner).map_err(to_rpc_err)?;
        Ok(sessions
            .into_iter()
            .map(|s| SessionSummary {
                session_id: s.session_id,
                method: payment_method_str(s.method),
                recipient: s.recipient.to_b58(),
                amount_micro: s.amount_micro.to_string(),
                status: format!("{:?}", s.status),
                current_state: s.current_state,
                created_at: s.created_at,
                updated_at: s.updated_at,
                failure_reason: s.failure_reason,
            })
            .collect())
    }

    async fn pool_export_key(&self, owner: String, signature: String, message: String) -> RpcResult<PoolExportKeyResponse> {
        let owner_addr = parse_address(&owner)?;
        let sig = decode_signature(&signature)?;
        let timestamp = extract_timestamp(&message)?;
        let secret = self
            .state
            .vault
            .export_pool_key(&owner_addr, DEFAULT_POOL_ID, timestamp, &sig)
            .map_err(to_rpc_err)?;
        warn!(owner = %owner_addr, "pool private key exported");
        Ok(PoolExportKeyResponse {
            private_key: hex::encode(secret),
        })
    }

    async fn session_create(
        &self,
        owner: String,
        signature: String,
        message: String,
        daily_limit_micro: String,
        max_per_tx: String,
        _duration_secs: i64,
    ) -> RpcResult<SessionKeyDescriptor> {
        let owner_addr = parse_address(&owner)?;
        let sig = decode_signature(&signature)?;
        let daily_limit_micro = parse_amount(&daily_limit_micro)?;
        let max_per_tx = parse_amount(&max_per_tx)?;
        // `message`'s trailing field is the `expires_at` the caller signed
        // over, not a server-recomputed duration — `create_session_key`
        // verifies the signature against this exact value.
        let expires_at = extract_timestamp(&message)?;

        let session = self
            .state
            .vault
            .create_session_key(
                &owner_addr,
                &DEFAULT_POOL_ID.to_string(),
                daily_limit_micro,
                max_per_tx,
                expires_at,
                self.state.config.session_max_duration,
                &sig,
            )
            .map_err(to_rpc_err)?;

        Ok(SessionKeyDescriptor {
            session_id: session.session_id,
            pool_id: session.pool_id,
            daily_limit_micro: session.daily_limit_micro.to_string(),
            max_per_tx: session.max_per_tx.to_string(),
            granted_at: session.granted_at,
            expires_at: session.expires_at,
            status: format!("{:?}", session.status),
        })
    }

    async fn session_revoke(&self, owner: String, signature: String, session_id: String) -> RpcResult<OkResponse> {
        let owner_addr = parse_address(&owner)?;
        let sig = decode_signature(&signature)?;
        verify_signature(&owner_addr, session_id.as_bytes(), &sig).map_err(to_rpc_err)?;
        self.state
            .vault
            .revoke_session_key(&owner_addr, &session_id)
            .map_err(to_rpc_err)?;
        self.state.budget.remove(&session_id);
        Ok(OkResponse { ok: true })
    }

    async fn audit_sessions(&self, owner: String) -> RpcResult<Vec<EncryptedSummary>> {
        let owner = parse_address(&owner)?;
        let entries = self.state.audit.list(&owner).map_err(to_rpc_err)?;
        Ok(entries
            .into_iter()
            .map(|e| EncryptedSummary {
                session_id: e.session_id,
                recorded_at: e.recorded_at,
                payload_handle: e.payload_handle,
            })
            .collect())
    }

    async fn audit_decrypt(
        &self,
        owner: String,
        signature: String,
        session_id: Option<String>,
    ) -> RpcResult<Vec<SessionDetails>> {
        let owner_addr = parse_address(&owner)?;
        let sig = decode_signature(&signature)?;

        let sessions = if let Some(session_id) = session_id {
            vec![self
                .state
                .audit
                .decrypt_one(&owner_addr, &session_id, &sig)
                .map_err(to_rpc_err)?]
        } else {
            let metas = self.state.audit.list(&owner_addr).map_err(to_rpc_err)?;
            let mut out = Vec::new();
            for meta in metas {
                if let Ok(session) = self.state.audit.decrypt_one(&owner_addr, &meta.session_id, &sig) {
                    out.push(session);
                }
            }
            out
        };

        Ok(sessions
            .into_iter()
            .map(|s| SessionDetails {
                session_id: s.session_id,
                pool_id: s.pool_id,
                method: payment_method_str(s.method),
                recipient: s.recipient.to_b58(),
                amount_micro: s.amount_micro.to_string(),
                status: format!("{:?}", s.status),
                current_state: s.current_state,
                tx_signatures: s.tx_signatures.into_iter().map(|t| t.0).collect(),
                created_at: s.created_at,
                updated_at: s.updated_at,
                failure_reason: s.failure_reason,
            })
            .collect())
    }

    async fn recovery_status(&self, owner: String) -> RpcResult<RecoveryStatusResponse> {
        let owner = parse_address(&owner)?;
        match self.state.vault.get_recovery_pool(&owner).map_err(to_rpc_err)? {
            None => Ok(RecoveryStatusResponse {
                address: None,
                balance: "0".to_string(),
                is_healthy: false,
                is_locked: false,
            }),
            Some(rp) => {
                let balance = self.state.chain.get_balance(&rp.address).await.map_err(to_rpc_err)?;
                Ok(RecoveryStatusResponse {
                    address: Some(rp.address.to_b58()),
                    balance: balance.to_string(),
                    is_healthy: balance >= rp.min_required_native,
                    is_locked: false,
                })
            }
        }
    }

    async fn recovery_create_and_fund(&self, owner: String, amount: String) -> RpcResult<RecoveryCreateAndFundResponse> {
        let owner_addr = parse_address(&owner)?;
        let amount = parse_amount(&amount)?;
        let recovery = self
            .state
            .vault
            .get_or_create_recovery_pool(&owner_addr, self.state.config.min_recovery_native)
            .map_err(to_rpc_err)?;
        let unsigned = self
            .state
            .chain
            .build_standard_payment(&owner_addr, &recovery.address, amount, NATIVE_MINT)
            .await
            .map_err(to_rpc_err)?;
        Ok(RecoveryCreateAndFundResponse {
            address: recovery.address.to_b58(),
            unsigned_tx: encode_unsigned_tx(&unsigned),
        })
    }

    async fn recovery_validate(&self, owner: String) -> RpcResult<RecoveryValidateResponse> {
        let owner = parse_address(&owner)?;
        match self.state.vault.get_recovery_pool(&owner).map_err(to_rpc_err)? {
            None => Ok(RecoveryValidateResponse {
                can_execute_payment: false,
                shortfall: Some(
                    aegix_core::ShortfallDetail {
                        have: 0,
                        required: self.state.config.min_recovery_native,
                        shortfall: self.state.config.min_recovery_native,
                    }
                    .into(),
                ),
            }),
            Some(rp) => {
                let balance = self.state.chain.get_balance(&rp.address).await.map_err(to_rpc_err)?;
                if balance >= rp.min_required_native {
                    Ok(RecoveryValidateResponse {
                        can_execute_payment: true,
                        shortfall: None,
                    })
                } else {
                    Ok(RecoveryValidateResponse {
                        can_execute_payment: false,
                        shortfall: Some(
                            aegix_core::ShortfallDetail {
                                have: balance,
                                required: rp.min_required_native,
                                shortfall: rp.min_required_native - balance,
                            }
                            .into(),
                        ),
                    })
                }
            }
        }
    }
}

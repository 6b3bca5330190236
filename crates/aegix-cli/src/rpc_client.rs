use anyhow::{bail, Context};
use serde_json::Value;

/// Simple JSON-RPC 2.0 client used by the CLI to talk to a running
/// aegix-node.
///
/// Uses raw HTTP POST with serde_json rather than the full jsonrpsee client
/// to keep the CLI binary lean and dependency-minimal.
pub struct AegixRpcClient {
    url: String,
    client: reqwest::Client,
}

impl AegixRpcClient {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Call a JSON-RPC method and return the `result` field.
    async fn call(&self, method: &str, params: Value) -> anyhow::Result<Value> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("connecting to node at {}", self.url))?;

        let json: Value = resp.json().await.context("parsing RPC response")?;

        if let Some(err) = json.get("error") {
            bail!("RPC error: {err}");
        }

        Ok(json["result"].clone())
    }

    pub async fn pool_init(&self, owner: &str, signature: &str, message: &str) -> anyhow::Result<Value> {
        self.call(
            "pool.init",
            serde_json::json!({"owner": owner, "signature": signature, "message": message}),
        )
        .await
    }

    pub async fn pool_get(&self, owner: &str) -> anyhow::Result<Value> {
        self.call("pool.get", serde_json::json!({"owner": owner})).await
    }

    pub async fn pool_fund(&self, owner: &str, amount: &str) -> anyhow::Result<Value> {
        self.call("pool.fund", serde_json::json!({"owner": owner, "amount": amount}))
            .await
    }

    pub async fn pool_confirm_funding(&self, owner: &str, tx_signature: &str) -> anyhow::Result<Value> {
        self.call(
            "pool.confirm_funding",
            serde_json::json!({"owner": owner, "tx_signature": tx_signature}),
        )
        .await
    }

    pub async fn pool_top_up(
        &self,
        owner: &str,
        add_native: Option<&str>,
        add_token: Option<&str>,
    ) -> anyhow::Result<Value> {
        self.call(
            "pool.top_up",
            serde_json::json!({"owner": owner, "add_native": add_native, "add_token": add_token}),
        )
        .await
    }

    pub async fn pool_withdraw(
        &self,
        owner: &str,
        native: Option<&str>,
        token: Option<&str>,
    ) -> anyhow::Result<Value> {
        self.call(
            "pool.withdraw",
            serde_json::json!({"owner": owner, "native": native, "token": token}),
        )
        .await
    }

    pub async fn pool_shield(&self, pool_id: &str, amount: &str, owner: &str) -> anyhow::Result<Value> {
        self.call(
            "pool.shield",
            serde_json::json!({"pool_id": pool_id, "amount": amount, "owner": owner}),
        )
        .await
    }

    pub async fn pool_pay(
        &self,
        owner: &str,
        recipient: &str,
        amount: &str,
        use_compressed: bool,
        resume_session_id: Option<&str>,
    ) -> anyhow::Result<Value> {
        self.call(
            "pool.pay",
            serde_json::json!({
                "owner": owner,
                "recipient": recipient,
                "amount": amount,
                "use_compressed": use_compressed,
                "resume_session_id": resume_session_id,
            }),
        )
        .await
    }

    pub async fn pool_history(&self, owner: &str) -> anyhow::Result<Value> {
        self.call("pool.history", serde_json::json!({"owner": owner})).await
    }

    pub async fn pool_export_key(&self, owner: &str, signature: &str, message: &str) -> anyhow::Result<Value> {
        self.call(
            "pool.export_key",
            serde_json::json!({"owner": owner, "signature": signature, "message": message}),
        )
        .await
    }

    pub async fn session_create(
        &self,
        owner: &str,
        signature: &str,
        message: &str,
        daily_limit_micro: &str,
        max_per_tx: &str,
        duration_secs: i64,
    ) -> anyhow::Result<Value> {
        self.call(
            "session.create",
            serde_json::json!({
                "owner": owner,
                "signature": signature,
                "message": message,
                "daily_limit_micro": daily_limit_micro,
                "max_per_tx": max_per_tx,
                "duration_secs": duration_secs,
            }),
        )
        .await
    }

    pub async fn session_revoke(&self, owner: &str, signature: &str, session_id: &str) -> anyhow::Result<Value> {
        self.call(
            "session.revoke",
            serde_json::json!({"owner": owner, "signature": signature, "session_id": session_id}),
        )
        .await
    }

    pub async fn audit_sessions(&self, owner: &str) -> anyhow::Result<Value> {
        self.call("audit.sessions", serde_json::json!({"owner": owner})).await
    }

    pub async fn audit_decrypt(
        &self,
        owner: &str,
        signature: &str,
        session_id: Option<&str>,
    ) -> anyhow::Result<Value> {
        self.call(
            "audit.decrypt",
            serde_json::json!({"owner": owner, "signature": signature, "session_id": session_id}),
        )
        .await
    }

    pub async fn recovery_status(&self, owner: &str) -> anyhow::Result<Value> {
        self.call("recovery.status", serde_json::json!({"owner": owner})).await
    }

    pub async fn recovery_create_and_fund(&self, owner: &str, amount: &str) -> anyhow::Result<Value> {
        self.call(
            "recovery.create_and_fund",
            serde_json::json!({"owner": owner, "amount": amount}),
        )
        .await
    }

    pub async fn recovery_validate(&self, owner: &str) -> anyhow::Result<Value> {
        self.call("recovery.validate", serde_json::json!({"owner": owner})).await
    }
}

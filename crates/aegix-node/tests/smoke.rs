//! End-to-end smoke test for aegix-node.
//!
//! Starts a real node process against the simulated chain backend, drives a
//! pool through init -> session grant -> history via JSON-RPC, and asserts
//! state changes are correctly reflected.
//!
//! Run with:
//!   cargo test -p aegix-node --test smoke

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use aegix_crypto::{pool_auth_message, session_grant_message, KeyPair};

// ── Node lifecycle ────────────────────────────────────────────────────────────

struct NodeGuard {
    child: Child,
    data_dir: PathBuf,
}

impl Drop for NodeGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.data_dir);
    }
}

/// Find a free TCP port on loopback.
fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

// ── RPC helpers ───────────────────────────────────────────────────────────────

async fn rpc_call(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1
    });
    let resp = client
        .post(url)
        .json(&body)
        .send()
        .await
        .unwrap_or_else(|e| panic!("RPC call {method} failed: {e}"));
    let json: serde_json::Value = resp.json().await.expect("parse RPC JSON");
    if let Some(err) = json.get("error") {
        panic!("RPC error from {method}: {err}");
    }
    json["result"].clone()
}

/// Poll `pool.get` for a throwaway address until the RPC server responds
/// (with either a result or a well-formed JSON-RPC error) or the timeout
/// elapses.
async fn wait_for_rpc(client: &reqwest::Client, url: &str, timeout: Duration) -> bool {
    let probe = KeyPair::generate();
    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "method": "pool.get",
        "params": {"owner": probe.address.to_b58()},
        "id": 1
    });
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Ok(resp) = client.post(url).json(&body).send().await {
            if resp.status().is_success() {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    false
}

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

// ── Smoke test ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn smoke_pool_init_and_session_grant() {
    // ── 1. Prepare temp dir ───────────────────────────────────────────────────
    let data_dir = std::env::temp_dir().join(format!("aegix_e2e_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&data_dir);
    std::fs::create_dir_all(&data_dir).unwrap();

    // ── 2. Start node against the simulated backend ──────────────────────────
    let rpc_port = free_port();
    let rpc_url = format!("http://127.0.0.1:{rpc_port}");

    let node_bin = env!("CARGO_BIN_EXE_aegix-node");
    let child = Command::new(node_bin)
        .args([
            "--data-dir", data_dir.join("state").to_str().unwrap(),
            "--rpc-addr", &format!("127.0.0.1:{rpc_port}"),
            "--backend",  "simulation",
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn aegix-node");

    let _guard = NodeGuard { child, data_dir };

    // ── 3. Wait for RPC ready ─────────────────────────────────────────────────
    let http = reqwest::Client::new();
    assert!(
        wait_for_rpc(&http, &rpc_url, Duration::from_secs(20)).await,
        "aegix-node did not become ready within 20 seconds"
    );

    // ── 4. pool.init creates a fresh, already-unlocked pool ───────────────────
    let owner = KeyPair::generate();
    let owner_b58 = owner.address.to_b58();

    let ts = now();
    let message = pool_auth_message(&owner_b58, ts);
    let signature = hex::encode(owner.sign(message.as_bytes()).to_bytes());

    let init = rpc_call(
        &http,
        &rpc_url,
        "pool.init",
        serde_json::json!({"owner": owner_b58, "signature": signature, "message": message}),
    )
    .await;
    assert_eq!(init["is_new"], true);
    let pool_address = init["pool_address"].as_str().unwrap().to_string();
    assert!(!pool_address.is_empty());

    // ── 5. pool.get reflects an active, unlocked pool with zero balance ──────
    let get = rpc_call(&http, &rpc_url, "pool.get", serde_json::json!({"owner": owner_b58})).await;
    assert_eq!(get["status"], "active");
    assert_eq!(get["needs_reauth"], false);
    assert_eq!(get["balance"], "0");

    // ── 6. A second pool.init on the same owner is idempotent ────────────────
    let ts2 = now();
    let message2 = pool_auth_message(&owner_b58, ts2);
    let signature2 = hex::encode(owner.sign(message2.as_bytes()).to_bytes());
    let init2 = rpc_call(
        &http,
        &rpc_url,
        "pool.init",
        serde_json::json!({"owner": owner_b58, "signature": signature2, "message": message2}),
    )
    .await;
    assert_eq!(init2["is_new"], false);
    assert_eq!(init2["pool_address"], pool_address);

    // ── 7. session.create grants a scoped session key ─────────────────────────
    let daily_limit: u128 = 5_000_000;
    let max_per_tx: u128 = 1_000_000;
    let duration_secs = 3600i64;
    let grant_ts = now();
    let expected_expiry = grant_ts + duration_secs;
    let grant_message = session_grant_message(&owner_b58, "default", daily_limit, max_per_tx, expected_expiry);
    let grant_signature = hex::encode(owner.sign(grant_message.as_bytes()).to_bytes());

    let session = rpc_call(
        &http,
        &rpc_url,
        "session.create",
        serde_json::json!({
            "owner": owner_b58,
            "signature": grant_signature,
            "message": grant_message,
            "daily_limit_micro": daily_limit.to_string(),
            "max_per_tx": max_per_tx.to_string(),
            "duration_secs": duration_secs,
        }),
    )
    .await;
    assert_eq!(session["status"], "Active");
    assert_eq!(session["daily_limit_micro"], daily_limit.to_string());
    let session_id = session["session_id"].as_str().unwrap().to_string();
    assert!(!session_id.is_empty());

    // ── 8. A payment session history starts empty ────────────────────────────
    let history = rpc_call(&http, &rpc_url, "pool.history", serde_json::json!({"owner": owner_b58})).await;
    assert!(history.as_array().unwrap().is_empty());

    // ── 9. Revoking the session succeeds and is reflected by a repeat revoke failing ──
    let revoke_sig = hex::encode(owner.sign(session_id.as_bytes()).to_bytes());
    let revoke = rpc_call(
        &http,
        &rpc_url,
        "session.revoke",
        serde_json::json!({"owner": owner_b58, "signature": revoke_sig, "session_id": session_id}),
    )
    .await;
    assert_eq!(revoke["ok"], true);
}

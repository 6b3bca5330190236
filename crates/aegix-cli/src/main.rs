//! aegix-cli
//!
//! Owner-facing CLI for Aegix. Manages an Ed25519 pool-owner keypair, signs
//! the domain-separated challenges each mutating RPC call requires, and
//! submits them to a running aegix-node via JSON-RPC.
//!
//! Usage:
//!   aegix-cli keygen       [--keyfile <path>]
//!   aegix-cli pool init    [--rpc <url>] [--keyfile <path>]
//!   aegix-cli pool get     [--rpc <url>] [--keyfile <path>]
//!   aegix-cli pool fund    --amount <micro> [--rpc <url>] [--keyfile <path>]
//!   aegix-cli pool pay     --recipient <b58> --amount <micro> [--compressed] [--rpc <url>] [--keyfile <path>]
//!   aegix-cli session create --daily-limit <micro> --max-per-tx <micro> --duration <secs> [--rpc <url>] [--keyfile <path>]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use aegix_crypto::{
    audit_delete_message, export_key_message, pool_auth_message, session_grant_message, KeyPair,
};

mod rpc_client;
use rpc_client::AegixRpcClient;

// ── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "aegix-cli", version, about = "Aegix CLI — manage a pool and sign requests")]
struct Args {
    /// Path to the owner keyfile (JSON).
    #[arg(long, global = true, default_value = "~/.aegix/owner.json")]
    keyfile: PathBuf,

    /// Node RPC endpoint.
    #[arg(long, global = true, default_value = "http://127.0.0.1:8899")]
    rpc: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new Ed25519 owner keypair and save it to the keyfile.
    Keygen,

    #[command(subcommand)]
    Pool(PoolCommand),

    #[command(subcommand)]
    Session(SessionCommand),

    #[command(subcommand)]
    Audit(AuditCommand),

    #[command(subcommand)]
    Recovery(RecoveryCommand),
}

#[derive(Subcommand, Debug)]
enum PoolCommand {
    /// Create the owner's pool if one doesn't exist, or unlock the existing one.
    Init,
    /// Show pool status and balance.
    Get,
    /// Build an unsigned top-up transfer from the owner's wallet into the pool.
    Fund {
        #[arg(long)]
        amount: String,
    },
    /// Mark the pool funded after a `pool fund` transaction confirms on-chain.
    ConfirmFunding {
        #[arg(long)]
        tx_signature: String,
    },
    /// Build an unsigned transfer adding native and/or token balance.
    TopUp {
        #[arg(long)]
        add_native: Option<String>,
        #[arg(long)]
        add_token: Option<String>,
    },
    /// Withdraw native and/or token balance back to the owner's wallet.
    Withdraw {
        #[arg(long)]
        native: Option<String>,
        #[arg(long)]
        token: Option<String>,
    },
    /// Compress token balance into the owner's Recovery Pool.
    Shield {
        #[arg(long, default_value = "default")]
        pool_id: String,
        #[arg(long)]
        amount: String,
    },
    /// Pay a recipient, Standard or Maximum-Privacy.
    Pay {
        #[arg(long)]
        recipient: String,
        #[arg(long)]
        amount: String,
        /// Route through the Maximum-Privacy Two-Step Burner flow.
        #[arg(long)]
        compressed: bool,
        /// Resume a previously stalled payment session instead of starting
        /// a new one (e.g. one left at `M2_WaitIndex` or `S2_PayRecipient`).
        #[arg(long)]
        resume_session_id: Option<String>,
    },
    /// List every payment session ever created for this pool.
    History,
    /// Export the pool's raw secret key. Audited server-side.
    ExportKey,
}

#[derive(Subcommand, Debug)]
enum SessionCommand {
    /// Grant a scoped session key.
    Create {
        #[arg(long)]
        daily_limit: String,
        #[arg(long)]
        max_per_tx: String,
        #[arg(long)]
        duration_secs: i64,
    },
    /// Revoke a previously granted session key.
    Revoke {
        #[arg(long)]
        session_id: String,
    },
}

#[derive(Subcommand, Debug)]
enum AuditCommand {
    /// List audit entries (undecrypted metadata) for the owner.
    List,
    /// Decrypt one or every audit entry.
    Decrypt {
        #[arg(long)]
        session_id: Option<String>,
    },
    /// Delete an audit entry.
    Delete {
        #[arg(long)]
        session_id: String,
    },
}

#[derive(Subcommand, Debug)]
enum RecoveryCommand {
    /// Recovery Pool status.
    Status,
    /// Create and fund the Recovery Pool.
    CreateAndFund {
        #[arg(long)]
        amount: String,
    },
    /// Whether a Maximum-Privacy payment can proceed right now.
    Validate,
}

// ── Keyfile handling ──────────────────────────────────────────────────────────

fn expand_tilde(path: &PathBuf) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.clone()
}

fn load_keypair(path: &PathBuf) -> Result<KeyPair> {
    let path = expand_tilde(path);
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading keyfile {} — run `aegix-cli keygen` first", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing keyfile {}", path.display()))
}

fn save_keypair(path: &PathBuf, keypair: &KeyPair) -> Result<()> {
    let path = expand_tilde(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating keyfile directory {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(keypair).context("serializing keypair")?;
    std::fs::write(&path, json).with_context(|| format!("writing keyfile {}", path.display()))?;
    Ok(())
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()));
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    if let Command::Keygen = &args.command {
        let keypair = KeyPair::generate();
        let address = keypair.address.to_b58();
        save_keypair(&args.keyfile, &keypair)?;
        info!(%address, keyfile = %args.keyfile.display(), "generated owner keypair");
        println!("{address}");
        return Ok(());
    }

    let keypair = load_keypair(&args.keyfile)?;
    let owner = keypair.address.to_b58();
    let client = AegixRpcClient::new(&args.rpc);

    let result = match args.command {
        Command::Keygen => unreachable!("handled above"),
        Command::Pool(cmd) => run_pool(&client, &keypair, &owner, cmd).await?,
        Command::Session(cmd) => run_session(&client, &keypair, &owner, cmd).await?,
        Command::Audit(cmd) => run_audit(&client, &keypair, &owner, cmd).await?,
        Command::Recovery(cmd) => run_recovery(&client, &owner, cmd).await?,
    };

    print_json(&result);
    Ok(())
}

async fn run_pool(
    client: &AegixRpcClient,
    keypair: &KeyPair,
    owner: &str,
    cmd: PoolCommand,
) -> Result<serde_json::Value> {
    match cmd {
        PoolCommand::Init => {
            let ts = now();
            let message = pool_auth_message(owner, ts);
            let signature = hex::encode(keypair.sign(message.as_bytes()).to_bytes());
            client.pool_init(owner, &signature, &message).await
        }
        PoolCommand::Get => client.pool_get(owner).await,
        PoolCommand::Fund { amount } => client.pool_fund(owner, &amount).await,
        PoolCommand::ConfirmFunding { tx_signature } => client.pool_confirm_funding(owner, &tx_signature).await,
        PoolCommand::TopUp { add_native, add_token } => {
            client.pool_top_up(owner, add_native.as_deref(), add_token.as_deref()).await
        }
        PoolCommand::Withdraw { native, token } => {
            client.pool_withdraw(owner, native.as_deref(), token.as_deref()).await
        }
        PoolCommand::Shield { pool_id, amount } => client.pool_shield(&pool_id, &amount, owner).await,
        PoolCommand::Pay { recipient, amount, compressed, resume_session_id } => {
            client
                .pool_pay(owner, &recipient, &amount, compressed, resume_session_id.as_deref())
                .await
        }
        PoolCommand::History => client.pool_history(owner).await,
        PoolCommand::ExportKey => {
            let ts = now();
            let message = export_key_message(owner, ts);
            let signature = hex::encode(keypair.sign(message.as_bytes()).to_bytes());
            client.pool_export_key(owner, &signature, &message).await
        }
    }
}

async fn run_session(
    client: &AegixRpcClient,
    keypair: &KeyPair,
    owner: &str,
    cmd: SessionCommand,
) -> Result<serde_json::Value> {
    match cmd {
        SessionCommand::Create { daily_limit, max_per_tx, duration_secs } => {
            let daily_limit_micro: u128 = daily_limit.parse().context("parsing --daily-limit")?;
            let max_per_tx_micro: u128 = max_per_tx.parse().context("parsing --max-per-tx")?;
            let expires_at = now() + duration_secs;
            let message = session_grant_message(owner, "default", daily_limit_micro, max_per_tx_micro, expires_at);
            let signature = hex::encode(keypair.sign(message.as_bytes()).to_bytes());
            client
                .session_create(owner, &signature, &message, &daily_limit, &max_per_tx, duration_secs)
                .await
        }
        SessionCommand::Revoke { session_id } => {
            let signature = hex::encode(keypair.sign(session_id.as_bytes()).to_bytes());
            client.session_revoke(owner, &signature, &session_id).await
        }
    }
}

async fn run_audit(
    client: &AegixRpcClient,
    keypair: &KeyPair,
    owner: &str,
    cmd: AuditCommand,
) -> Result<serde_json::Value> {
    match cmd {
        AuditCommand::List => client.audit_sessions(owner).await,
        AuditCommand::Decrypt { session_id } => {
            // Each entry's decrypt challenge is bound to its own payload
            // handle, so a signature produced for one entry never verifies
            // for another — fetch the handle(s) first and sign per entry.
            let metas = client.audit_sessions(owner).await?;
            let metas = metas.as_array().cloned().unwrap_or_default();
            let targets: Vec<&serde_json::Value> = match &session_id {
                Some(id) => metas.iter().filter(|m| m["session_id"] == *id).collect(),
                None => metas.iter().collect(),
            };

            let mut out = Vec::new();
            for meta in targets {
                let handle = meta["payload_handle"].as_str().unwrap_or_default();
                let id = meta["session_id"].as_str().unwrap_or_default();
                let message = aegix_crypto::decrypt_message(handle);
                let signature = hex::encode(keypair.sign(message.as_bytes()).to_bytes());
                out.extend(client.audit_decrypt(owner, &signature, Some(id)).await?.as_array().cloned().unwrap_or_default());
            }
            Ok(serde_json::Value::Array(out))
        }
        AuditCommand::Delete { session_id } => {
            let ts = now();
            let message = audit_delete_message(owner, &session_id, ts);
            let signature = hex::encode(keypair.sign(message.as_bytes()).to_bytes());
            // `audit.delete` is not exposed over RPC; deletion happens via the
            // storage layer directly, so surface the built challenge instead.
            Ok(serde_json::json!({
                "session_id": session_id,
                "message": message,
                "signature": signature,
                "note": "audit.delete has no RPC method; this is the challenge an operator-side tool would submit",
            }))
        }
    }
}

async fn run_recovery(client: &AegixRpcClient, owner: &str, cmd: RecoveryCommand) -> Result<serde_json::Value> {
    match cmd {
        RecoveryCommand::Status => client.recovery_status(owner).await,
        RecoveryCommand::CreateAndFund { amount } => client.recovery_create_and_fund(owner, &amount).await,
        RecoveryCommand::Validate => client.recovery_validate(owner).await,
    }
}

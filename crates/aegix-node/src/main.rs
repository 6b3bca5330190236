//! aegix-node — the Aegix payment gateway's node binary.
//!
//! Startup sequence:
//!   1. Resolve `Config` from an optional TOML file, overridden by CLI flags
//!   2. Open the vault and state databases
//!   3. Force every persisted pool back to `Locked` (no `Active` pool
//!      survives a restart without the owner re-proving control)
//!   4. Build the chain adapter the configured `BackendMode` selects
//!   5. Spawn `CleanupScheduler`'s background maintenance loop
//!   6. Start the JSON-RPC 2.0 server and wait for a shutdown signal

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};

use aegix_audit::AuditLog;
use aegix_budget::BudgetLedger;
use aegix_burner::BurnerFactory;
use aegix_chain::{ChainAdapter, RpcChainAdapter, SimulatedChainAdapter};
use aegix_core::{BackendMode, Config};
use aegix_crypto::CipherStore;
use aegix_engine::{PaymentEngine, PaymentStore};
use aegix_rpc::{RpcServer, RpcServerState};
use aegix_scheduler::CleanupScheduler;
use aegix_vault::{KeyVault, VaultDb};

#[derive(Parser, Debug)]
#[command(
    name = "aegix-node",
    version,
    about = "Aegix node — non-custodial privacy gateway for stablecoin payments"
)]
struct Args {
    /// Path to a TOML config file. CLI flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for the vault and payment-session databases.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// JSON-RPC listen address.
    #[arg(long)]
    rpc_addr: Option<SocketAddr>,

    /// Ledger RPC endpoint.
    #[arg(long)]
    solana_rpc_url: Option<String>,

    /// ZK-compression indexer RPC endpoint.
    #[arg(long)]
    light_rpc_url: Option<String>,

    /// Mint address of the payable stablecoin.
    #[arg(long)]
    usdc_mint: Option<String>,

    /// Chain adapter backend: "real" (live RPC) or "simulation" (in-memory,
    /// for local development and tests).
    #[arg(long)]
    backend: Option<String>,
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))?
        }
        None => Config::default(),
    };

    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.to_string_lossy().into_owned();
    }
    if let Some(addr) = args.rpc_addr {
        config.rpc_listen_addr = addr.to_string();
    }
    if let Some(url) = &args.solana_rpc_url {
        config.solana_rpc_url = url.clone();
    }
    if let Some(url) = &args.light_rpc_url {
        config.light_rpc_url = url.clone();
    }
    if let Some(mint) = &args.usdc_mint {
        config.usdc_mint = mint.clone();
    }
    if let Some(backend) = &args.backend {
        config.backend_mode = match backend.as_str() {
            "real" => BackendMode::Real,
            "simulation" => BackendMode::Simulation,
            other => bail!("unknown --backend {other:?}, expected \"real\" or \"simulation\""),
        };
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,aegix=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    let config = Arc::new(load_config(&args)?);
    info!(backend = ?config.backend_mode, rpc_addr = %config.rpc_listen_addr, "Aegix node starting");

    let data_dir = expand_tilde(Path::new(&config.data_dir));
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;

    let cipher = Arc::new(CipherStore::from_env_or_random());

    // ── Vault ─────────────────────────────────────────────────────────────────
    let vault_db = VaultDb::open(data_dir.join("vault")).context("opening vault database")?;
    let vault = Arc::new(KeyVault::new(vault_db, cipher.clone()));

    let relocked = vault
        .lock_all_pools_on_reload()
        .context("locking pools left over from a previous run")?;
    if relocked > 0 {
        info!(count = relocked, "re-locked pools that survived the previous process exit");
    }

    // ── Payment session / audit storage ──────────────────────────────────────
    let db = sled::open(data_dir.join("db")).context("opening state database")?;
    let store = Arc::new(PaymentStore::open(&db).context("opening payment store")?);
    let audit = Arc::new(AuditLog::open(&db, cipher.clone()).context("opening audit log")?);

    let budget = Arc::new(BudgetLedger::new());
    let burners = Arc::new(BurnerFactory::new(cipher.clone()));

    // ── Chain adapter ─────────────────────────────────────────────────────────
    let chain: Arc<dyn ChainAdapter> = match config.backend_mode {
        BackendMode::Real => Arc::new(RpcChainAdapter::new(
            config.solana_rpc_url.clone(),
            config.light_rpc_url.clone(),
        )),
        BackendMode::Simulation => {
            warn!("backend_mode=simulation — running against the in-memory simulated ledger, not a live chain");
            Arc::new(SimulatedChainAdapter::new())
        }
    };

    // `PaymentEngine` owns its own `PaymentStore` handle onto the same `sled::Db`;
    // `store` above is the one shared with `CleanupScheduler` and the RPC server.
    let engine_store = PaymentStore::open(&db).context("opening engine payment store")?;
    let engine = Arc::new(PaymentEngine::new(
        vault.clone(),
        budget.clone(),
        chain.clone(),
        burners.clone(),
        audit.clone(),
        engine_store,
        config.usdc_mint.clone(),
    ));

    let scheduler = Arc::new(CleanupScheduler::new(
        vault.clone(),
        budget.clone(),
        chain.clone(),
        burners.clone(),
        engine.clone(),
        store.clone(),
        config.usdc_mint.clone(),
    ));
    let _scheduler_handle = scheduler.spawn();

    // ── RPC server ────────────────────────────────────────────────────────────
    let rpc_addr: SocketAddr = config
        .rpc_listen_addr
        .parse()
        .with_context(|| format!("parsing rpc_listen_addr {:?}", config.rpc_listen_addr))?;

    let rpc_state = Arc::new(RpcServerState {
        vault,
        budget,
        chain,
        burners,
        engine,
        audit,
        store,
        config: config.clone(),
    });
    let _rpc_handle = RpcServer::new(rpc_state)
        .start(rpc_addr)
        .await
        .context("starting RPC server")?;

    info!(addr = %rpc_addr, "node ready");
    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutdown signal received");
    Ok(())
}

/// Expand a leading `~` to the user's home directory (`HOME` or `USERPROFILE`).
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}

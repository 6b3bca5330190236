//! aegix-rpc
//!
//! JSON-RPC 2.0 server exposing the gateway's pool/session/audit/recovery
//! surface. Method names are dotted (`"pool.init"`, `"session.create"`, ...)
//! rather than namespace-prefixed.

pub mod api;
pub mod server;
pub mod types;

pub use api::AegixApiServer;
pub use server::{RpcServer, RpcServerState};
pub use types::{
    encode_unsigned_tx, EncryptedSummary, OkResponse, PoolConfirmFundingResponse,
    PoolExportKeyResponse, PoolFundResponse, PoolGetResponse, PoolInitResponse, PoolPayResponse,
    PoolShieldResponse, PoolTopUpResponse, PoolWithdrawResponse, RecoveryCreateAndFundResponse,
    RecoveryStatusResponse, RecoveryValidateResponse, SessionDetails, SessionKeyDescriptor,
    SessionSummary, ShortfallDetailDto,
};

pub mod adapter;
pub mod plan;
pub mod rpc;
pub mod simulated;

pub use adapter::ChainAdapter;
pub use plan::{SignedTx, TxPlan, UnsignedTx};
pub use rpc::RpcChainAdapter;
pub use simulated::SimulatedChainAdapter;

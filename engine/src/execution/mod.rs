pub mod gas;
pub mod rpc;
pub mod submit;

pub use gas::{GasManager, TxGasParams};
pub use rpc::{ExecutionClient, SignerClient};

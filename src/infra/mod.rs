//! Infrastructure layer implementations.

pub mod accounts;
pub mod rpc;

pub use accounts::{FileAccountSource, PromptAccountSource};
pub use rpc::{HttpRewardsClient, RpcClientConfig};

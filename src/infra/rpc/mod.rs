//! JSON-RPC transport for the rewards service.
//!
//! [`client::HttpRewardsClient`] speaks both endpoint dialects; the
//! [`envelope`] module owns request/response shapes and server error
//! classification.

pub mod client;
pub mod envelope;

pub use client::{DEFAULT_REFERER, DEFAULT_RPC_URL, HttpRewardsClient, RpcClientConfig};
pub use envelope::{MINING_IN_PROGRESS_MESSAGE, UNAUTHORIZED_MESSAGE, classify_server_error};

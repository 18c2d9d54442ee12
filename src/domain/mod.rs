//! Domain layer containing core types, traits, and error definitions.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{AccountSourceError, AppError, ConfigError, RpcError, ServerError};
pub use traits::{AccountSource, CallAuth, RewardsClient};
pub use types::{
    Account, AccountRecord, Activity, ApiDialect, AuthSession, DailyRewardStatus, FlowFlags,
    MINING_ENDED_ACTIVITY, MiningSnapshot, SpinPolicy,
};

//! Domain traits defining contracts for external systems.

use async_trait::async_trait;
use secrecy::SecretString;

use super::error::{AccountSourceError, RpcError};
use super::types::{Account, Activity, AuthSession, DailyRewardStatus, MiningSnapshot};

/// Credentials attached to an authenticated call
#[derive(Debug, Clone)]
pub struct CallAuth {
    pub token: SecretString,
    pub install_uuid: String,
}

impl CallAuth {
    #[must_use]
    pub fn new(token: SecretString, install_uuid: impl Into<String>) -> Self {
        Self {
            token,
            install_uuid: install_uuid.into(),
        }
    }
}

/// Remote rewards service
#[async_trait]
pub trait RewardsClient: Send + Sync {
    /// Exchange host-platform init data for a bearer token
    async fn authenticate(
        &self,
        init_data: &SecretString,
        install_uuid: &str,
    ) -> Result<AuthSession, RpcError>;

    /// Start or claim the current mining session
    async fn start_mining_session(&self, auth: &CallAuth) -> Result<MiningSnapshot, RpcError>;

    /// Fetch (and implicitly claim) the daily reward record
    async fn get_daily_reward(&self, auth: &CallAuth) -> Result<DailyRewardStatus, RpcError>;

    /// Redeem one spin; returns the raw prize payload for logging.
    ///
    /// `index` counts the spins already performed in the current batch.
    async fn perform_spin(
        &self,
        auth: &CallAuth,
        index: u32,
    ) -> Result<serde_json::Value, RpcError>;

    /// Apply a mining speed upgrade
    async fn upgrade_mining_speed(&self, auth: &CallAuth) -> Result<serde_json::Value, RpcError>;

    /// Fetch one page of the activity list
    async fn list_activities(
        &self,
        auth: &CallAuth,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Activity>, RpcError> {
        let _ = (auth, offset, limit);
        Err(RpcError::UnexpectedResponse(
            "activity list not available for this endpoint".to_string(),
        ))
    }

    /// Claim a single activity reward
    async fn claim_activity(
        &self,
        auth: &CallAuth,
        activity_id: &serde_json::Value,
    ) -> Result<serde_json::Value, RpcError> {
        let _ = (auth, activity_id);
        Err(RpcError::UnexpectedResponse(
            "activity claims not available for this endpoint".to_string(),
        ))
    }
}

/// Where accounts come from at startup
#[async_trait]
pub trait AccountSource: Send + Sync {
    /// Load every account; called once
    async fn load(&self) -> Result<Vec<Account>, AccountSourceError>;

    fn name(&self) -> &'static str;
}

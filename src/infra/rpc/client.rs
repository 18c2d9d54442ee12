//! HTTP JSON-RPC client for the rewards service.

use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, REFERER,
};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, error, instrument};

use crate::config;
use crate::domain::{
    Activity, ApiDialect, AuthSession, CallAuth, ConfigError, DailyRewardStatus, MiningSnapshot,
    RewardsClient, RpcError,
};

use super::envelope::{
    ActivityListParams, ActivityListResult, DailyRewardResult, FlatDailyReward, FlatMiningResult,
    JsonRpcRequest, JsonRpcResponse, LoginResult, NamespacedDailyReward, NamespacedMiningResult,
    Pagination,
};

/// Default rewards service endpoint
pub const DEFAULT_RPC_URL: &str = "https://api.service.gameeapp.com/";

/// Default `Referer` header sent with every call
pub const DEFAULT_REFERER: &str = "https://prizes.gamee.com/";

const INSTALL_UUID_HEADER: &str = "x-install-uuid";
const CLIENT_LANGUAGE_HEADER: &str = "client-language";

/// A JSON-RPC method and the envelope id it is sent with
#[derive(Debug, Clone, Copy)]
struct RpcMethod {
    id: &'static str,
    name: &'static str,
}

impl RpcMethod {
    const fn same(name: &'static str) -> Self {
        Self { id: name, name }
    }
}

struct MethodTable {
    login: RpcMethod,
    start_mining: RpcMethod,
    daily_reward: RpcMethod,
    spin: RpcMethod,
    upgrade: RpcMethod,
    list_activities: RpcMethod,
    claim_activity: RpcMethod,
}

const NAMESPACED_METHODS: MethodTable = MethodTable {
    login: RpcMethod::same("user.authentication.loginUsingTelegram"),
    start_mining: RpcMethod::same("miningEvent.startSession"),
    daily_reward: RpcMethod::same("dailyReward.getPrizes"),
    spin: RpcMethod::same("dailyReward.performSpin"),
    upgrade: RpcMethod::same("miningEvent.upgradeMiningSpeed"),
    list_activities: RpcMethod {
        id: "mining_ended_claim",
        name: "getRewards",
    },
    claim_activity: RpcMethod::same("user.claimActivity"),
};

const FLAT_METHODS: MethodTable = MethodTable {
    login: RpcMethod::same("user.authentication.loginUsingTelegram"),
    start_mining: RpcMethod {
        id: "miningEvent.startSession",
        name: "startMiningSession",
    },
    daily_reward: RpcMethod {
        id: "dailyReward",
        name: "claimDailyReward",
    },
    spin: RpcMethod {
        id: "spin",
        name: "spinWheel",
    },
    upgrade: RpcMethod::same("miningEvent.upgradeMiningSpeed"),
    list_activities: RpcMethod {
        id: "mining_ended_claim",
        name: "getRewards",
    },
    claim_activity: RpcMethod::same("user.claimActivity"),
};

/// Configuration for [`HttpRewardsClient`]
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    pub rpc_url: String,
    pub referer: String,
    pub dialect: ApiDialect,
    pub mining_event_id: u32,
    pub timeout: Duration,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self::for_dialect(ApiDialect::default())
    }
}

impl RpcClientConfig {
    /// Defaults for a dialect, including its mining event id
    #[must_use]
    pub fn for_dialect(dialect: ApiDialect) -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            referer: DEFAULT_REFERER.to_string(),
            dialect,
            mining_event_id: dialect.default_mining_event_id(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let dialect = config::parse_var("API_DIALECT", ApiDialect::Namespaced)?;
        let defaults = Self::for_dialect(dialect);
        Ok(Self {
            rpc_url: config::var("RPC_URL").unwrap_or(defaults.rpc_url),
            referer: config::var("RPC_REFERER").unwrap_or(defaults.referer),
            dialect,
            mining_event_id: config::parse_var("MINING_EVENT_ID", defaults.mining_event_id)?,
            timeout: Duration::from_secs(config::parse_var("HTTP_TIMEOUT_SECS", 30u64)?),
        })
    }
}

/// Rewards service client speaking JSON-RPC over a single POST endpoint
#[derive(Debug, Clone)]
pub struct HttpRewardsClient {
    http_client: Client,
    config: RpcClientConfig,
}

impl HttpRewardsClient {
    pub fn new(config: RpcClientConfig) -> Result<Self, ConfigError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert(CLIENT_LANGUAGE_HEADER, HeaderValue::from_static("en"));
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain;charset=UTF-8"),
        );
        let referer = HeaderValue::from_str(&config.referer)
            .map_err(|e| ConfigError::HttpClient(format!("invalid referer: {}", e)))?;
        headers.insert(REFERER, referer);

        let http_client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            http_client,
            config,
        })
    }

    fn methods(&self) -> &'static MethodTable {
        match self.config.dialect {
            ApiDialect::Namespaced => &NAMESPACED_METHODS,
            ApiDialect::Flat => &FLAT_METHODS,
        }
    }

    /// Send one JSON-RPC call and decode its `result`
    async fn call<P, T>(
        &self,
        method: RpcMethod,
        id: &str,
        params: P,
        token: Option<&SecretString>,
        install_uuid: Option<&str>,
    ) -> Result<T, RpcError>
    where
        P: Serialize + Send,
        T: DeserializeOwned,
    {
        let body = serde_json::to_string(&JsonRpcRequest::new(id, method.name, params))
            .map_err(|e| RpcError::Parse(e.to_string()))?;

        let mut request = self.http_client.post(&self.config.rpc_url).body(body);
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token.expose_secret()));
        }
        if let Some(uuid) = install_uuid {
            request = request.header(INSTALL_UUID_HEADER, uuid.trim());
        }

        debug!(method = %method.name, "Sending RPC call");

        let response = request.send().await.map_err(|e| {
            let err = map_transport_error(&e);
            error!(method = %method.name, error = %err, "RPC request failed");
            err
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| map_transport_error(&e))?;

        let envelope: JsonRpcResponse<serde_json::Value> = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(e) if status.is_success() => {
                error!(method = %method.name, error = %e, "Failed to parse RPC response");
                return Err(RpcError::Parse(e.to_string()));
            }
            Err(_) => {
                error!(method = %method.name, status = %status, body = %text, "RPC endpoint returned error");
                return Err(RpcError::Http {
                    status_code: status.as_u16(),
                    message: text,
                });
            }
        };

        let result = envelope.into_result()?;
        serde_json::from_value(result).map_err(|e| RpcError::UnexpectedResponse(e.to_string()))
    }

    async fn authorized<P, T>(
        &self,
        method: RpcMethod,
        params: P,
        auth: &CallAuth,
    ) -> Result<T, RpcError>
    where
        P: Serialize + Send,
        T: DeserializeOwned,
    {
        self.call(
            method,
            method.id,
            params,
            Some(&auth.token),
            Some(&auth.install_uuid),
        )
        .await
    }
}

/// Classify a reqwest failure, singling out connection resets
fn map_transport_error(err: &reqwest::Error) -> RpcError {
    if is_connection_reset(err) {
        RpcError::ConnectionReset(err.to_string())
    } else {
        RpcError::Transport(err.to_string())
    }
}

fn is_connection_reset(err: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionReset {
                return true;
            }
        }
        let text = e.to_string().to_lowercase();
        if text.contains("connection reset") {
            return true;
        }
        current = e.source();
    }
    false
}

#[async_trait]
impl RewardsClient for HttpRewardsClient {
    #[instrument(skip(self, init_data))]
    async fn authenticate(
        &self,
        init_data: &SecretString,
        install_uuid: &str,
    ) -> Result<AuthSession, RpcError> {
        let login = self.methods().login;
        let params = json!({ "initData": init_data.expose_secret().trim() });
        let result: LoginResult = self
            .call(login, login.id, params, None, Some(install_uuid))
            .await?;

        let token = result
            .tokens
            .and_then(|t| t.authenticate)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RpcError::UnexpectedResponse("login result without token".to_string()))?;

        let personal = result.user.and_then(|u| u.personal);
        let (first_name, last_name) = match personal {
            Some(p) => (p.firstname, p.lastname),
            None => (None, None),
        };

        Ok(AuthSession {
            token: SecretString::from(token),
            first_name: first_name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "Unknown".to_string()),
            last_name: last_name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "User".to_string()),
        })
    }

    async fn start_mining_session(&self, auth: &CallAuth) -> Result<MiningSnapshot, RpcError> {
        let params = json!({ "miningEventId": self.config.mining_event_id });
        let method = self.methods().start_mining;
        let snapshot = match self.config.dialect {
            ApiDialect::Namespaced => self
                .authorized::<_, NamespacedMiningResult>(method, params, auth)
                .await?
                .snapshot(),
            ApiDialect::Flat => self
                .authorized::<_, FlatMiningResult>(method, params, auth)
                .await?
                .snapshot(),
        };
        snapshot.ok_or_else(|| {
            RpcError::UnexpectedResponse("mining result without session numbers".to_string())
        })
    }

    async fn get_daily_reward(&self, auth: &CallAuth) -> Result<DailyRewardStatus, RpcError> {
        let method = self.methods().daily_reward;
        let status = match self.config.dialect {
            ApiDialect::Namespaced => self
                .authorized::<_, DailyRewardResult<NamespacedDailyReward>>(method, json!({}), auth)
                .await?
                .daily_reward
                .map(DailyRewardStatus::from),
            ApiDialect::Flat => self
                .authorized::<_, DailyRewardResult<FlatDailyReward>>(method, json!({}), auth)
                .await?
                .daily_reward
                .map(DailyRewardStatus::from),
        };
        status.ok_or_else(|| RpcError::UnexpectedResponse("missing dailyReward".to_string()))
    }

    async fn perform_spin(
        &self,
        auth: &CallAuth,
        index: u32,
    ) -> Result<serde_json::Value, RpcError> {
        let method = self.methods().spin;
        // Flat endpoints number each spin of a batch: spin0, spin1, ...
        let id = match self.config.dialect {
            ApiDialect::Flat => format!("{}{}", method.id, index),
            ApiDialect::Namespaced => method.id.to_string(),
        };
        self.call(
            method,
            &id,
            json!({}),
            Some(&auth.token),
            Some(&auth.install_uuid),
        )
        .await
    }

    async fn upgrade_mining_speed(&self, auth: &CallAuth) -> Result<serde_json::Value, RpcError> {
        let params = json!({ "miningEventId": self.config.mining_event_id });
        self.authorized(self.methods().upgrade, params, auth).await
    }

    async fn list_activities(
        &self,
        auth: &CallAuth,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Activity>, RpcError> {
        let params = ActivityListParams {
            filter: "all",
            pagination: Pagination { offset, limit },
        };
        let result: ActivityListResult = self
            .authorized(self.methods().list_activities, params, auth)
            .await?;
        result
            .activities
            .ok_or_else(|| RpcError::UnexpectedResponse("missing activities".to_string()))
    }

    async fn claim_activity(
        &self,
        auth: &CallAuth,
        activity_id: &serde_json::Value,
    ) -> Result<serde_json::Value, RpcError> {
        let params = json!({ "activityId": activity_id });
        self.authorized(self.methods().claim_activity, params, auth)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_follow_dialect() {
        let namespaced = RpcClientConfig::for_dialect(ApiDialect::Namespaced);
        assert_eq!(namespaced.mining_event_id, 6);
        assert_eq!(namespaced.rpc_url, DEFAULT_RPC_URL);

        let flat = RpcClientConfig::for_dialect(ApiDialect::Flat);
        assert_eq!(flat.mining_event_id, 7);
        assert_eq!(flat.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_method_tables_differ_by_dialect() {
        assert_eq!(NAMESPACED_METHODS.start_mining.name, "miningEvent.startSession");
        assert_eq!(FLAT_METHODS.start_mining.name, "startMiningSession");
        assert_eq!(FLAT_METHODS.start_mining.id, "miningEvent.startSession");
        assert_eq!(NAMESPACED_METHODS.daily_reward.name, "dailyReward.getPrizes");
        assert_eq!(FLAT_METHODS.spin.name, "spinWheel");
    }

    #[test]
    fn test_io_connection_reset_detected() {
        let err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer went away");
        assert!(is_connection_reset(&err));

        let err = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert!(!is_connection_reset(&err));
    }

    #[test]
    fn test_client_rejects_invalid_referer() {
        let config = RpcClientConfig {
            referer: "bad\nvalue".to_string(),
            ..RpcClientConfig::default()
        };
        assert!(matches!(
            HttpRewardsClient::new(config),
            Err(ConfigError::HttpClient(_))
        ));
    }
}

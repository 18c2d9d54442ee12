//! JSON-RPC envelope and response shapes for both endpoint dialects.
//!
//! This is the only place where server error messages are compared as text.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::{Activity, DailyRewardStatus, MiningSnapshot, RpcError, ServerError};

/// Exact message the server sends while a mining session is still accruing
pub const MINING_IN_PROGRESS_MESSAGE: &str = "Mining session in progress.";

/// Exact message the server sends for an expired or invalid bearer token
pub const UNAUTHORIZED_MESSAGE: &str = "Unauthorized";

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a, T: Serialize> {
    pub jsonrpc: &'static str,
    pub id: &'a str,
    pub method: &'a str,
    pub params: T,
}

impl<'a, T: Serialize> JsonRpcRequest<'a, T> {
    pub fn new(id: &'a str, method: &'a str, params: T) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse<T> {
    pub result: Option<T>,
    pub error: Option<JsonRpcErrorBody>,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcErrorBody {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
}

impl<T> JsonRpcResponse<T> {
    /// Collapse the envelope into a result, classifying any server error
    pub fn into_result(self) -> Result<T, RpcError> {
        if let Some(error) = self.error {
            return Err(RpcError::Server(classify_server_error(
                error.code,
                &error.message,
            )));
        }
        self.result
            .ok_or_else(|| RpcError::UnexpectedResponse("missing result".to_string()))
    }
}

/// Map a raw server error message onto a known variant.
///
/// Matching is exact and case-sensitive.
#[must_use]
pub fn classify_server_error(code: Option<i64>, message: &str) -> ServerError {
    match message {
        MINING_IN_PROGRESS_MESSAGE => ServerError::MiningSessionInProgress,
        UNAUTHORIZED_MESSAGE => ServerError::Unauthorized,
        other => ServerError::Unclassified {
            code,
            message: other.to_string(),
        },
    }
}

// ============================================================================
// AUTHENTICATION
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginResult {
    pub tokens: Option<LoginTokens>,
    pub user: Option<LoginUser>,
}

#[derive(Debug, Deserialize)]
pub struct LoginTokens {
    pub authenticate: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginUser {
    pub personal: Option<PersonalInfo>,
}

#[derive(Debug, Deserialize)]
pub struct PersonalInfo {
    pub firstname: Option<String>,
    pub lastname: Option<String>,
}

// ============================================================================
// MINING
// ============================================================================

/// `miningEvent.startSession` result
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespacedMiningResult {
    pub mining_event: Option<NamespacedMiningEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespacedMiningEvent {
    pub mining_user: Option<NamespacedMiningUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespacedMiningUser {
    pub current_session_micro_token: Option<f64>,
    pub current_speed_micro_token: Option<f64>,
}

impl NamespacedMiningResult {
    pub fn snapshot(&self) -> Option<MiningSnapshot> {
        let user = self.mining_event.as_ref()?.mining_user.as_ref()?;
        Some(MiningSnapshot {
            amount: user.current_session_micro_token?,
            rate: user.current_speed_micro_token?,
        })
    }
}

/// `startMiningSession` result
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatMiningResult {
    pub mining_event: Option<FlatMiningEvent>,
    pub mining_user: Option<FlatMiningUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatMiningEvent {
    pub time_left: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatMiningUser {
    pub mining_interval: Option<f64>,
}

impl FlatMiningResult {
    pub fn snapshot(&self) -> Option<MiningSnapshot> {
        Some(MiningSnapshot {
            amount: self.mining_event.as_ref()?.time_left?,
            rate: self.mining_user.as_ref()?.mining_interval?,
        })
    }
}

// ============================================================================
// DAILY REWARD
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyRewardResult<T> {
    pub daily_reward: Option<T>,
}

/// `dailyReward.getPrizes` record
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespacedDailyReward {
    #[serde(default)]
    pub spins_count_available: u32,
    #[serde(default, deserialize_with = "optional_timestamp")]
    pub next_streak_day_timestamp: Option<DateTime<Utc>>,
}

impl From<NamespacedDailyReward> for DailyRewardStatus {
    fn from(r: NamespacedDailyReward) -> Self {
        Self {
            spins_available: r.spins_count_available,
            next_streak_at: r.next_streak_day_timestamp.unwrap_or_else(Utc::now),
        }
    }
}

/// `claimDailyReward` record
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatDailyReward {
    #[serde(default)]
    pub spins_available: u32,
    #[serde(default, deserialize_with = "optional_timestamp")]
    pub spin_time: Option<DateTime<Utc>>,
}

impl From<FlatDailyReward> for DailyRewardStatus {
    fn from(r: FlatDailyReward) -> Self {
        Self {
            spins_available: r.spins_available,
            next_streak_at: r.spin_time.unwrap_or_else(Utc::now),
        }
    }
}

/// Accepts epoch milliseconds or an RFC 3339 string
fn timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Float(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Millis(ms) => Utc
            .timestamp_millis_opt(ms)
            .single()
            .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {}", ms))),
        Raw::Float(ms) => Utc
            .timestamp_millis_opt(ms as i64)
            .single()
            .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {}", ms))),
        Raw::Text(s) => DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| serde::de::Error::custom(format!("invalid timestamp {}: {}", s, e))),
    }
}

/// Like [`timestamp`], with `null` read as absent
fn optional_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapped(#[serde(deserialize_with = "timestamp")] DateTime<Utc>);

    Option::<Wrapped>::deserialize(deserializer).map(|wrapped| wrapped.map(|Wrapped(dt)| dt))
}

// ============================================================================
// ACTIVITIES
// ============================================================================

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub offset: u32,
    pub limit: u32,
}

#[derive(Debug, Serialize)]
pub struct ActivityListParams {
    pub filter: &'static str,
    pub pagination: Pagination,
}

#[derive(Debug, Deserialize)]
pub struct ActivityListResult {
    pub activities: Option<Vec<Activity>>,
}

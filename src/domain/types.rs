//! Domain types with validation support.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Which endpoint shape the remote service speaks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApiDialect {
    /// `miningEvent.startSession`, `dailyReward.getPrizes`, ...
    #[default]
    Namespaced,
    /// `startMiningSession`, `claimDailyReward`, `spinWheel`, ...
    Flat,
}

impl ApiDialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Namespaced => "namespaced",
            Self::Flat => "flat",
        }
    }

    /// Mining event the service expects when none is configured
    #[must_use]
    pub fn default_mining_event_id(&self) -> u32 {
        match self {
            Self::Namespaced => 6,
            Self::Flat => 7,
        }
    }
}

impl std::str::FromStr for ApiDialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "namespaced" => Ok(Self::Namespaced),
            "flat" => Ok(Self::Flat),
            _ => Err(format!("Invalid API dialect: {}", s)),
        }
    }
}

impl std::fmt::Display for ApiDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How available spins are redeemed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpinPolicy {
    /// One spin per invocation, the rest re-armed 1-10 minutes apart
    #[default]
    Spread,
    /// Every spin back-to-back with a fixed pause, no rescheduling
    Burst,
}

impl SpinPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spread => "spread",
            Self::Burst => "burst",
        }
    }
}

impl std::str::FromStr for SpinPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spread" => Ok(Self::Spread),
            "burst" => Ok(Self::Burst),
            _ => Err(format!("Invalid spin policy: {}", s)),
        }
    }
}

impl std::fmt::Display for SpinPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which flows run after a successful authentication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlowFlags {
    pub mining: bool,
    pub daily: bool,
    pub upgrade: bool,
}

impl FlowFlags {
    #[must_use]
    pub fn all() -> Self {
        Self {
            mining: true,
            daily: true,
            upgrade: true,
        }
    }
}

/// A single account the harvester drives
#[derive(Debug, Clone)]
pub struct Account {
    /// Human readable label used in logs until the server reports a name
    pub label: String,
    /// Signed host-platform payload exchanged for a bearer token
    pub init_data: Option<SecretString>,
    /// Token loaded from the account source, if any
    pub token: Option<SecretString>,
    pub install_uuid: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    /// Flows to start after authentication
    pub flags: FlowFlags,
    /// Overrides the configured spin policy for this account
    pub spin_policy: Option<SpinPolicy>,
}

impl Account {
    /// Account built from interactive answers: authenticates first
    #[must_use]
    pub fn from_init_data(init_data: SecretString, install_uuid: String, flags: FlowFlags) -> Self {
        Self {
            label: install_uuid.clone(),
            init_data: Some(init_data),
            token: None,
            install_uuid,
            user_id: None,
            session_id: None,
            flags,
            spin_policy: None,
        }
    }

    #[must_use]
    pub fn can_authenticate(&self) -> bool {
        self.init_data.is_some()
    }
}

/// One record of the accounts file
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    #[validate(length(min = 1, message = "Auth token is required"))]
    pub auth_token: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub session_id: Option<String>,
    #[validate(length(min = 1, message = "Install UUID is required"))]
    pub install_uuid: String,
    #[serde(default)]
    pub init_data: Option<String>,
    #[serde(default)]
    pub spin_policy: Option<SpinPolicy>,
}

impl AccountRecord {
    #[must_use]
    pub fn into_account(self) -> Account {
        let label = match (&self.username, &self.user_id) {
            (name, Some(id)) if !name.is_empty() => format!("{} {}", name, id),
            (name, _) if !name.is_empty() => name.clone(),
            (_, Some(id)) => id.clone(),
            _ => self.install_uuid.clone(),
        };
        Account {
            label,
            init_data: self.init_data.filter(|d| !d.is_empty()).map(SecretString::from),
            token: Some(SecretString::from(self.auth_token)),
            install_uuid: self.install_uuid,
            user_id: self.user_id,
            session_id: self.session_id,
            flags: FlowFlags::all(),
            spin_policy: self.spin_policy,
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// Result of exchanging init data for a token
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub token: SecretString,
    pub first_name: String,
    pub last_name: String,
}

impl AuthSession {
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Normalised mining session numbers.
///
/// `amount / rate` is the number of hours until the session is fully accrued.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MiningSnapshot {
    pub amount: f64,
    pub rate: f64,
}

/// Daily reward record as reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyRewardStatus {
    pub spins_available: u32,
    pub next_streak_at: DateTime<Utc>,
}

/// Activity type produced when a mining session ends unclaimed
pub const MINING_ENDED_ACTIVITY: &str = "mining_ended_claim";

/// Entry of the activity list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(default)]
    pub id: serde_json::Value,
    #[serde(default, rename = "type")]
    pub activity_type: String,
    #[serde(default)]
    pub is_claimed: bool,
}

impl Activity {
    /// Unclaimed reward left over from a finished mining session
    #[must_use]
    pub fn is_unclaimed_mining_reward(&self) -> bool {
        self.activity_type == MINING_ENDED_ACTIVITY && !self.is_claimed && !self.id.is_null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_dialect_round_trip_and_defaults() {
        assert_eq!("flat".parse::<ApiDialect>().unwrap(), ApiDialect::Flat);
        assert_eq!(ApiDialect::Namespaced.to_string(), "namespaced");
        assert!("rest".parse::<ApiDialect>().is_err());
        assert_eq!(ApiDialect::Namespaced.default_mining_event_id(), 6);
        assert_eq!(ApiDialect::Flat.default_mining_event_id(), 7);
    }

    #[test]
    fn test_spin_policy_parse() {
        assert_eq!("burst".parse::<SpinPolicy>().unwrap(), SpinPolicy::Burst);
        assert_eq!(SpinPolicy::default(), SpinPolicy::Spread);
        assert!("Burst".parse::<SpinPolicy>().is_err());
    }

    #[test]
    fn test_account_record_deserialize_and_validate() {
        let json = r#"{
            "authToken": "tok",
            "username": "alice",
            "userId": 42,
            "sessionId": "s-1",
            "installUuid": "uuid-1",
            "spinPolicy": "burst"
        }"#;
        let record: AccountRecord = serde_json::from_str(json).unwrap();
        assert!(record.validate().is_ok());
        assert_eq!(record.user_id.as_deref(), Some("42"));

        let account = record.into_account();
        assert_eq!(account.label, "alice 42");
        assert_eq!(account.token.as_ref().unwrap().expose_secret(), "tok");
        assert_eq!(account.spin_policy, Some(SpinPolicy::Burst));
        assert!(!account.can_authenticate());
        assert_eq!(account.flags, FlowFlags::all());
    }

    #[test]
    fn test_account_record_requires_token() {
        let json = r#"{"authToken": "", "installUuid": "uuid-1"}"#;
        let record: AccountRecord = serde_json::from_str(json).unwrap();
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_label_falls_back_to_install_uuid() {
        let json = r#"{"authToken": "t", "installUuid": "uuid-9"}"#;
        let record: AccountRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.into_account().label, "uuid-9");
    }

    #[test]
    fn test_activity_filter() {
        let unclaimed: Activity = serde_json::from_str(
            r#"{"id": 1, "type": "mining_ended_claim", "isClaimed": false}"#,
        )
        .unwrap();
        let claimed: Activity =
            serde_json::from_str(r#"{"id": 2, "type": "mining_ended_claim", "isClaimed": true}"#)
                .unwrap();
        let other: Activity =
            serde_json::from_str(r#"{"id": 3, "type": "referral_bonus"}"#).unwrap();

        assert!(unclaimed.is_unclaimed_mining_reward());
        assert!(!claimed.is_unclaimed_mining_reward());
        assert!(!other.is_unclaimed_mining_reward());
    }

    #[test]
    fn test_incomplete_activities_decode_and_are_skipped() {
        let page: Vec<Activity> = serde_json::from_str(
            r#"[
                {"id": 7},
                {"type": "mining_ended_claim"},
                {"id": 8, "type": "mining_ended_claim"}
            ]"#,
        )
        .unwrap();

        let claimable: Vec<_> = page
            .iter()
            .filter(|activity| activity.is_unclaimed_mining_reward())
            .map(|activity| activity.id.clone())
            .collect();
        assert_eq!(claimable, vec![serde_json::json!(8)]);
    }

    #[test]
    fn test_auth_session_display_name() {
        let session = AuthSession {
            token: SecretString::from("T1".to_string()),
            first_name: "A".to_string(),
            last_name: "B".to_string(),
        };
        assert_eq!(session.display_name(), "A B");
    }
}

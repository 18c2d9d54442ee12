//! Process configuration and the environment helpers behind every `from_env`.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::app::AgentConfig;
use crate::domain::ConfigError;
use crate::infra::RpcClientConfig;
use crate::infra::accounts::DEFAULT_ACCOUNTS_FILE;

/// Where accounts are loaded from at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccountSourceKind {
    /// Ask for a single account on the terminal
    #[default]
    Prompt,
    /// Read the accounts file
    File,
}

impl AccountSourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prompt => "prompt",
            Self::File => "file",
        }
    }
}

impl FromStr for AccountSourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prompt" => Ok(Self::Prompt),
            "file" => Ok(Self::File),
            _ => Err(format!("Invalid account source: {}", s)),
        }
    }
}

impl std::fmt::Display for AccountSourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Invalid log format: {}", s)),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub rpc: RpcClientConfig,
    pub agent: AgentConfig,
    pub account_source: AccountSourceKind,
    pub accounts_file: PathBuf,
    pub log_format: LogFormat,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let rpc = RpcClientConfig::from_env()?;
        let agent = AgentConfig::from_env(rpc.dialect)?;
        Ok(Self {
            rpc,
            agent,
            account_source: parse_var("ACCOUNT_SOURCE", AccountSourceKind::default())?,
            accounts_file: var("ACCOUNTS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ACCOUNTS_FILE)),
            log_format: log_format(),
        })
    }
}

/// `LOG_FORMAT`, read before tracing is up; unknown values fall back to text
pub fn log_format() -> LogFormat {
    var("LOG_FORMAT")
        .and_then(|v| v.parse().ok())
        .unwrap_or_default()
}

/// Read a variable, treating empty values as unset
pub fn var(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Parse `raw` or fall back to `default` when unset
pub fn parse_value<T: FromStr>(
    name: &str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            value,
        }),
    }
}

/// Parse an environment variable or fall back to `default`
pub fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    parse_value(name, var(name), default)
}

/// Boolean flag: `true`/`1` enable, `false`/`0` disable
pub fn parse_flag(name: &str, raw: Option<String>, default: bool) -> Result<bool, ConfigError> {
    match raw.as_deref() {
        None => Ok(default),
        Some("true") | Some("1") => Ok(true),
        Some("false") | Some("0") => Ok(false),
        Some(other) => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            value: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SpinPolicy;

    #[test]
    fn test_parse_value_default_when_unset() {
        let v: u64 = parse_value("X", None, 60).unwrap();
        assert_eq!(v, 60);
    }

    #[test]
    fn test_parse_value_parses_enum() {
        let policy = parse_value("SPIN_POLICY", Some("burst".into()), SpinPolicy::Spread).unwrap();
        assert_eq!(policy, SpinPolicy::Burst);
    }

    #[test]
    fn test_parse_value_rejects_garbage() {
        let err = parse_value::<u32>("CONNECTION_RETRY_LIMIT", Some("lots".into()), 30)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref name, ref value }
                if name == "CONNECTION_RETRY_LIMIT" && value == "lots"
        ));
    }

    #[test]
    fn test_account_source_kind_parse() {
        assert_eq!(
            "file".parse::<AccountSourceKind>().unwrap(),
            AccountSourceKind::File
        );
        assert_eq!(AccountSourceKind::default().to_string(), "prompt");
        assert!("database".parse::<AccountSourceKind>().is_err());
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("yaml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("F", Some("1".into()), false).unwrap());
        assert!(!parse_flag("F", Some("false".into()), true).unwrap());
        assert!(parse_flag("F", None, true).unwrap());
        assert!(parse_flag("F", Some("maybe".into()), true).is_err());
    }
}

//! JSON accounts file.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;
use validator::Validate;

use crate::domain::{Account, AccountRecord, AccountSource, AccountSourceError};

/// Default accounts file name, relative to the working directory
pub const DEFAULT_ACCOUNTS_FILE: &str = "accounts.json";

/// Loads an ordered JSON array of account records
#[derive(Debug, Clone)]
pub struct FileAccountSource {
    path: PathBuf,
}

impl FileAccountSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Parse and validate the file contents, preserving record order
pub fn parse_accounts(contents: &str) -> Result<Vec<Account>, AccountSourceError> {
    let records: Vec<AccountRecord> =
        serde_json::from_str(contents).map_err(|e| AccountSourceError::Malformed(e.to_string()))?;

    if records.is_empty() {
        return Err(AccountSourceError::Empty);
    }

    records
        .into_iter()
        .enumerate()
        .map(|(index, record)| {
            record
                .validate()
                .map_err(|e| AccountSourceError::InvalidRecord {
                    index,
                    message: e.to_string(),
                })?;
            Ok(record.into_account())
        })
        .collect()
}

#[async_trait]
impl AccountSource for FileAccountSource {
    async fn load(&self) -> Result<Vec<Account>, AccountSourceError> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| AccountSourceError::Io {
                path: self.path.display().to_string(),
                message: e.to_string(),
            })?;

        let accounts = parse_accounts(&contents)?;
        info!(
            path = %self.path.display(),
            count = accounts.len(),
            "Loaded accounts file"
        );
        Ok(accounts)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_preserves_order() {
        let json = r#"[
            {"authToken": "a", "username": "first", "userId": 1, "sessionId": "s1", "installUuid": "u1"},
            {"authToken": "b", "username": "second", "userId": 2, "sessionId": "s2", "installUuid": "u2"}
        ]"#;
        let accounts = parse_accounts(json).unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].label, "first 1");
        assert_eq!(accounts[1].label, "second 2");
    }

    #[test]
    fn test_parse_empty_array() {
        assert!(matches!(parse_accounts("[]"), Err(AccountSourceError::Empty)));
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            parse_accounts("{not json"),
            Err(AccountSourceError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_reports_invalid_record_index() {
        let json = r#"[
            {"authToken": "a", "installUuid": "u1"},
            {"authToken": "b", "installUuid": ""}
        ]"#;
        assert!(matches!(
            parse_accounts(json),
            Err(AccountSourceError::InvalidRecord { index: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let source = FileAccountSource::new("/nonexistent/accounts.json");
        assert!(matches!(
            source.load().await,
            Err(AccountSourceError::Io { .. })
        ));
    }
}

//! Account loading tests: the JSON accounts file on disk and the startup pass
//! the harvester runs over loaded accounts.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use tempfile::NamedTempFile;

use reward_harvester::app::{AgentConfig, Harvester, spawn_harvester};
use reward_harvester::domain::{
    AccountSource, AccountSourceError, FlowFlags, MiningSnapshot, SpinPolicy,
};
use reward_harvester::infra::FileAccountSource;
use reward_harvester::test_utils::mocks::{
    MockAccountSource, MockRewardsClient, auth_session, init_data_account, methods, token_account,
};

fn accounts_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

// ============================================================================
// FILE SOURCE
// ============================================================================

mod file_source_tests {
    use super::*;

    #[tokio::test]
    async fn test_loads_records_in_order() {
        let file = accounts_file(
            r#"[
                {
                    "authToken": "token-a",
                    "username": "alice",
                    "userId": 101,
                    "sessionId": "s-1",
                    "installUuid": "uuid-a"
                },
                {
                    "authToken": "token-b",
                    "username": "bob",
                    "userId": "202",
                    "sessionId": 9,
                    "installUuid": "uuid-b",
                    "spinPolicy": "burst",
                    "initData": "query_id=b"
                }
            ]"#,
        );

        let source = FileAccountSource::new(file.path());
        let accounts = source.load().await.unwrap();

        assert_eq!(source.name(), "file");
        assert_eq!(accounts.len(), 2);

        assert_eq!(accounts[0].label, "alice 101");
        assert_eq!(accounts[0].token.as_ref().unwrap().expose_secret(), "token-a");
        assert_eq!(accounts[0].install_uuid, "uuid-a");
        assert!(!accounts[0].can_authenticate());

        assert_eq!(accounts[1].user_id.as_deref(), Some("202"));
        assert_eq!(accounts[1].session_id.as_deref(), Some("9"));
        assert_eq!(accounts[1].spin_policy, Some(SpinPolicy::Burst));
        assert!(accounts[1].can_authenticate());
        assert_eq!(accounts[1].flags, FlowFlags::all());
    }

    #[tokio::test]
    async fn test_rejects_record_without_install_uuid() {
        let file = accounts_file(
            r#"[
                {"authToken": "t1", "installUuid": "u1"},
                {"authToken": "t2", "installUuid": "u2"},
                {"authToken": "t3", "installUuid": ""}
            ]"#,
        );

        let result = FileAccountSource::new(file.path()).load().await;

        assert!(matches!(
            result,
            Err(AccountSourceError::InvalidRecord { index: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_rejects_object_instead_of_array() {
        let file = accounts_file(r#"{"authToken": "t1", "installUuid": "u1"}"#);

        let result = FileAccountSource::new(file.path()).load().await;

        assert!(matches!(result, Err(AccountSourceError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_empty_array_is_an_error() {
        let file = accounts_file("[]");

        let result = FileAccountSource::new(file.path()).load().await;

        assert!(matches!(result, Err(AccountSourceError::Empty)));
    }
}

// ============================================================================
// HARVESTER STARTUP
// ============================================================================

mod startup_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_mixed_accounts_start_their_own_flows() {
        let client = Arc::new(
            MockRewardsClient::new()
                .push_mining(Ok(MiningSnapshot {
                    amount: 1.0,
                    rate: 1.0,
                }))
                .push_auth(Ok(auth_session("T9", "Zoe", "Q"))),
        );
        let flags = FlowFlags {
            mining: false,
            daily: false,
            upgrade: true,
        };
        let source = MockAccountSource::new(vec![
            token_account("file-user"),
            init_data_account("prompt-user", flags),
        ]);
        let accounts = source.load().await.unwrap();

        let config = AgentConfig {
            reconcile_activities: false,
            ..AgentConfig::default()
        };
        let (handle, shutdown) = spawn_harvester(Harvester::new(client.clone(), config), accounts);
        tokio::time::sleep(Duration::from_secs(1)).await;

        let calls: Vec<(&str, String)> = client
            .calls()
            .into_iter()
            .map(|c| (c.method, c.install_uuid))
            .collect();
        assert_eq!(
            calls,
            vec![
                (methods::START_MINING, "uuid-file-user".to_string()),
                (methods::AUTHENTICATE, "uuid-prompt-user".to_string()),
                (methods::UPGRADE, "uuid-prompt-user".to_string()),
            ]
        );
        assert_eq!(client.calls()[2].token.as_deref(), Some("T9"));

        shutdown.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_source_reports_error() {
        let result = MockAccountSource::failing().load().await;
        assert!(matches!(result, Err(AccountSourceError::Empty)));
    }
}

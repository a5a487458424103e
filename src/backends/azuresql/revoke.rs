//! Revocation executor for Azure SQL logins.
//!
//! Cleanup runs as a fixed sequence of steps. Each step is idempotent on its
//! own, so a revoke that failed halfway can simply be run again. Nothing is
//! compensated across steps and nothing is retried here.

use tracing::{debug, info, warn};

use super::client::SqlClient;
use super::firewall::{is_missing_rule_error, FirewallClient};
use crate::errors::{Error, Result};
use crate::secrets::RevocationSteps;

pub const STEP_REVOKE_CONNECT: &str = "revoke_connect";
pub const STEP_LIST_SESSIONS: &str = "list_sessions";
pub const STEP_KILL_SESSIONS: &str = "kill_sessions";
pub const STEP_DROP_USER: &str = "drop_user";
pub const STEP_DELETE_FIREWALL_RULE: &str = "delete_firewall_rule";

/// What a revoke needs to know about an issued login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokeTarget<'a> {
    pub username: &'a str,
    /// Firewall rule created alongside the login, if any.
    pub fwrule: Option<&'a str>,
}

/// Management client plus the server its rules live on.
pub struct FirewallTarget<'a> {
    pub client: &'a dyn FirewallClient,
    pub server: &'a str,
}

pub fn revoke_connect_statement(username: &str) -> String {
    format!("REVOKE CONNECT FROM [{}];", username)
}

pub fn list_sessions_statement(username: &str) -> String {
    format!(
        "SELECT session_id FROM sys.dm_exec_sessions WHERE login_name = '{}';",
        username.replace('\'', "''")
    )
}

pub fn kill_statement(session_id: i64) -> String {
    format!("KILL {};", session_id)
}

pub fn drop_user_statement(username: &str) -> String {
    format!("DROP USER IF EXISTS [{}];", username)
}

/// Sessions can end between listing and killing them.
fn is_ended_session_error(error: &Error) -> bool {
    error.is_already_absent() || error.to_string().to_lowercase().contains("not an active process")
}

/// Tear down a login: block new connections, end live sessions, drop the
/// user, then remove its firewall rule.
///
/// A rule that is already gone counts as removed. When the login has a rule
/// but no management client is available the rule cannot be removed and the
/// revoke fails at that step.
pub async fn revoke_login(
    db: &dyn SqlClient,
    firewall: Option<FirewallTarget<'_>>,
    target: &RevokeTarget<'_>,
) -> Result<()> {
    let mut steps = RevocationSteps::new();
    let username = target.username;

    db.execute(&revoke_connect_statement(username))
        .await
        .map_err(|e| steps.fail(STEP_REVOKE_CONNECT, e))?;
    steps.complete(STEP_REVOKE_CONNECT);

    let sessions = db
        .query_ids(&list_sessions_statement(username))
        .await
        .map_err(|e| steps.fail(STEP_LIST_SESSIONS, e))?;
    steps.complete(STEP_LIST_SESSIONS);

    for session_id in &sessions {
        match db.execute(&kill_statement(*session_id)).await {
            Ok(()) => debug!(username = %username, session_id, "session killed"),
            Err(e) if is_ended_session_error(&e) => {
                debug!(username = %username, session_id, "session already ended")
            }
            Err(e) => return Err(steps.fail(STEP_KILL_SESSIONS, e)),
        }
    }
    steps.complete(STEP_KILL_SESSIONS);

    db.execute(&drop_user_statement(username))
        .await
        .map_err(|e| steps.fail(STEP_DROP_USER, e))?;
    steps.complete(STEP_DROP_USER);

    if let Some(rule) = target.fwrule.filter(|r| !r.is_empty()) {
        let Some(firewall) = firewall else {
            return Err(steps.fail(
                STEP_DELETE_FIREWALL_RULE,
                Error::configuration_missing(
                    "configure the backend with config/subscription first",
                ),
            ));
        };
        match firewall.client.delete_rule(firewall.server, rule).await {
            Ok(()) => {}
            Err(e) if is_missing_rule_error(&e) => {
                warn!(username = %username, rule = %rule, "firewall rule already deleted")
            }
            Err(e) => return Err(steps.fail(STEP_DELETE_FIREWALL_RULE, e)),
        }
        steps.complete(STEP_DELETE_FIREWALL_RULE);
    }

    info!(username = %username, sessions = sessions.len(), "login revoked");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeFirewallClient, FakeSqlClient};

    fn target<'a>(fwrule: Option<&'a str>) -> RevokeTarget<'a> {
        RevokeTarget { username: "web-1234", fwrule }
    }

    #[tokio::test]
    async fn test_statement_sequence() {
        let db = FakeSqlClient::new();
        db.set_sessions(vec![51, 52]);

        revoke_login(&db, None, &target(None)).await.unwrap();
        assert_eq!(
            db.statements(),
            vec![
                "REVOKE CONNECT FROM [web-1234];",
                "SELECT session_id FROM sys.dm_exec_sessions WHERE login_name = 'web-1234';",
                "KILL 51;",
                "KILL 52;",
                "DROP USER IF EXISTS [web-1234];",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_firewall_rule_is_tolerated() {
        let db = FakeSqlClient::new();
        let fw = FakeFirewallClient::new();
        fw.fail_deletes_with(
            "Resource with the name 'web-1234' does not exist. To continue, specify a valid resource name.",
        );

        let firewall = FirewallTarget { client: &fw, server: "sqlsrv" };
        revoke_login(&db, Some(firewall), &target(Some("web-1234"))).await.unwrap();
        assert_eq!(fw.delete_attempts(), 1);
    }

    #[tokio::test]
    async fn test_failure_after_progress_is_partial() {
        let db = FakeSqlClient::new();
        db.fail_statements_containing("DROP USER", "permission denied");

        let err = revoke_login(&db, None, &target(None)).await.unwrap_err();
        match err {
            Error::PartialRevocation { completed, failed_step, .. } => {
                assert_eq!(failed_step, STEP_DROP_USER);
                assert_eq!(
                    completed,
                    vec![STEP_REVOKE_CONNECT, STEP_LIST_SESSIONS, STEP_KILL_SESSIONS]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_first_step_failure_is_returned_as_is() {
        let db = FakeSqlClient::new();
        db.fail_statements_containing("REVOKE CONNECT", "login failed");

        let err = revoke_login(&db, None, &target(None)).await.unwrap_err();
        assert!(matches!(err, Error::Upstream { service: "sql", .. }));
    }

    #[tokio::test]
    async fn test_ended_sessions_do_not_fail_the_revoke() {
        let db = FakeSqlClient::new();
        db.set_sessions(vec![60]);
        db.fail_statements_containing("KILL 60", "Process ID 60 is not an active process ID.");

        revoke_login(&db, None, &target(None)).await.unwrap();
        assert!(db.statements().iter().any(|s| s.starts_with("DROP USER")));
    }

    #[tokio::test]
    async fn test_rule_without_subscription_fails_last_step() {
        let db = FakeSqlClient::new();
        let err = revoke_login(&db, None, &target(Some("web-1234"))).await.unwrap_err();
        assert!(matches!(
            err,
            Error::PartialRevocation { failed_step: STEP_DELETE_FIREWALL_RULE, .. }
        ));
    }

    #[test]
    fn test_login_name_is_quoted() {
        assert_eq!(
            list_sessions_statement("o'brien"),
            "SELECT session_id FROM sys.dm_exec_sessions WHERE login_name = 'o''brien';"
        );
    }
}

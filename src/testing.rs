//! In-memory stand-ins for the SQL and firewall clients.
//!
//! These let unit and integration tests drive the Azure SQL backend without a
//! database or a management endpoint. Every call is recorded; failures can be
//! injected per statement or per operation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::backends::azuresql::client::{SqlClient, SqlConnector};
use crate::backends::azuresql::firewall::{FirewallClient, FirewallConnector, FirewallRule};
use crate::errors::{Error, Result};
use crate::storage::config_store::{ConnectionConfig, SubscriptionConfig};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Records statements and answers session queries from a fixed list.
#[derive(Debug, Default)]
pub struct FakeSqlClient {
    statements: Mutex<Vec<String>>,
    sessions: Mutex<Vec<i64>>,
    failures: Mutex<Vec<(String, String)>>,
    ping_failure: Mutex<Option<String>>,
}

impl FakeSqlClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session ids returned by the next session queries.
    pub fn set_sessions(&self, sessions: Vec<i64>) {
        *lock(&self.sessions) = sessions;
    }

    /// Fail every statement containing `needle` with an upstream error.
    pub fn fail_statements_containing(&self, needle: &str, message: &str) {
        lock(&self.failures).push((needle.to_string(), message.to_string()));
    }

    pub fn fail_pings_with(&self, message: &str) {
        *lock(&self.ping_failure) = Some(message.to_string());
    }

    /// Every statement attempted so far, failed ones included.
    pub fn statements(&self) -> Vec<String> {
        lock(&self.statements).clone()
    }

    fn record(&self, statement: &str) -> Result<()> {
        lock(&self.statements).push(statement.to_string());
        let failures = lock(&self.failures);
        match failures.iter().find(|(needle, _)| statement.contains(needle.as_str())) {
            Some((_, message)) => Err(Error::upstream("sql", message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SqlClient for FakeSqlClient {
    async fn execute(&self, statement: &str) -> Result<()> {
        self.record(statement)
    }

    async fn query_ids(&self, statement: &str) -> Result<Vec<i64>> {
        self.record(statement)?;
        Ok(lock(&self.sessions).clone())
    }

    async fn ping(&self) -> Result<()> {
        match lock(&self.ping_failure).as_ref() {
            Some(message) => Err(Error::upstream("sql", message.clone())),
            None => Ok(()),
        }
    }
}

/// Hands out one shared [`FakeSqlClient`] and counts connects.
#[derive(Debug, Default)]
pub struct FakeSqlConnector {
    client: Arc<FakeSqlClient>,
    connects: AtomicUsize,
    failure: Mutex<Option<String>>,
}

impl FakeSqlConnector {
    pub fn new(client: Arc<FakeSqlClient>) -> Self {
        Self { client, connects: AtomicUsize::new(0), failure: Mutex::new(None) }
    }

    pub fn client(&self) -> Arc<FakeSqlClient> {
        self.client.clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn fail_connects_with(&self, message: &str) {
        *lock(&self.failure) = Some(message.to_string());
    }
}

#[async_trait]
impl SqlConnector for FakeSqlConnector {
    async fn connect(&self, _config: &ConnectionConfig) -> Result<Arc<dyn SqlClient>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = lock(&self.failure).as_ref() {
            return Err(Error::upstream("sql", message.clone()));
        }
        Ok(self.client.clone())
    }
}

/// Keeps firewall rules in memory, keyed by server and rule name.
#[derive(Debug, Default)]
pub struct FakeFirewallClient {
    rules: Mutex<BTreeMap<(String, String), FirewallRule>>,
    delete_attempts: AtomicUsize,
    delete_failure: Mutex<Option<String>>,
    create_failure: Mutex<Option<String>>,
    list_failure: Mutex<Option<String>>,
}

impl FakeFirewallClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_deletes_with(&self, message: &str) {
        *lock(&self.delete_failure) = Some(message.to_string());
    }

    pub fn clear_delete_failure(&self) {
        *lock(&self.delete_failure) = None;
    }

    pub fn fail_creates_with(&self, message: &str) {
        *lock(&self.create_failure) = Some(message.to_string());
    }

    pub fn fail_lists_with(&self, message: &str) {
        *lock(&self.list_failure) = Some(message.to_string());
    }

    pub fn delete_attempts(&self) -> usize {
        self.delete_attempts.load(Ordering::SeqCst)
    }

    /// Rules currently present on `server`.
    pub fn rules(&self, server: &str) -> Vec<FirewallRule> {
        lock(&self.rules)
            .iter()
            .filter(|((s, _), _)| s == server)
            .map(|(_, rule)| rule.clone())
            .collect()
    }

    fn injected(slot: &Mutex<Option<String>>) -> Result<()> {
        match lock(slot).as_ref() {
            Some(message) => Err(Error::upstream("azure", message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl FirewallClient for FakeFirewallClient {
    async fn create_rule(&self, server: &str, rule: &FirewallRule) -> Result<()> {
        Self::injected(&self.create_failure)?;
        lock(&self.rules).insert((server.to_string(), rule.name.clone()), rule.clone());
        Ok(())
    }

    async fn delete_rule(&self, server: &str, name: &str) -> Result<()> {
        self.delete_attempts.fetch_add(1, Ordering::SeqCst);
        Self::injected(&self.delete_failure)?;
        match lock(&self.rules).remove(&(server.to_string(), name.to_string())) {
            Some(_) => Ok(()),
            None => Err(Error::already_absent(format!("firewall rule '{}'", name))),
        }
    }

    async fn list_rules(&self, server: &str) -> Result<Vec<String>> {
        Self::injected(&self.list_failure)?;
        Ok(self.rules(server).into_iter().map(|rule| rule.name).collect())
    }
}

/// Hands out one shared [`FakeFirewallClient`].
#[derive(Debug, Default)]
pub struct FakeFirewallConnector {
    client: Arc<FakeFirewallClient>,
    connects: AtomicUsize,
}

impl FakeFirewallConnector {
    pub fn new(client: Arc<FakeFirewallClient>) -> Self {
        Self { client, connects: AtomicUsize::new(0) }
    }

    pub fn client(&self) -> Arc<FakeFirewallClient> {
        self.client.clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FirewallConnector for FakeFirewallConnector {
    async fn connect(&self, _config: &SubscriptionConfig) -> Result<Arc<dyn FirewallClient>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.client.clone())
    }
}

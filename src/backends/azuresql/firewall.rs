//! Azure SQL server firewall rules through the classic management API.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::StatusCode;
use tracing::debug;

use crate::errors::{Error, Result};
use crate::storage::config_store::SubscriptionConfig;

pub const DEFAULT_MANAGEMENT_URL: &str = "https://management.core.windows.net";
const MANAGEMENT_API_VERSION: &str = "2012-03-01";
const SERVICE_NAMESPACE: &str = "http://schemas.microsoft.com/windowsazure";

lazy_static! {
    static ref RULE_NAME_REGEX: Regex =
        Regex::new(r"<Name>([^<]*)</Name>").expect("RULE_NAME_REGEX should be a valid regex pattern");
}

/// A single-address allow rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallRule {
    pub name: String,
    pub start_ip: String,
    pub end_ip: String,
}

impl FirewallRule {
    pub fn single(name: impl Into<String>, ip: &str) -> Self {
        Self { name: name.into(), start_ip: ip.to_string(), end_ip: ip.to_string() }
    }
}

#[async_trait]
pub trait FirewallClient: Send + Sync {
    async fn create_rule(&self, server: &str, rule: &FirewallRule) -> Result<()>;

    /// Delete a rule. A rule that no longer exists yields [`Error::AlreadyAbsent`].
    async fn delete_rule(&self, server: &str, name: &str) -> Result<()>;

    async fn list_rules(&self, server: &str) -> Result<Vec<String>>;
}

/// Opens [`FirewallClient`]s from `config/subscription`.
#[async_trait]
pub trait FirewallConnector: Send + Sync {
    async fn connect(&self, config: &SubscriptionConfig) -> Result<Arc<dyn FirewallClient>>;
}

/// Whether a firewall error means the rule is already gone.
pub fn is_missing_rule_error(error: &Error) -> bool {
    if error.is_already_absent() {
        return true;
    }
    let message = error.to_string().to_lowercase();
    message.contains("specify a valid resource name") || message.contains("not found")
}

/// Connector authenticating with the subscription's management certificate.
#[derive(Debug, Clone)]
pub struct AzureManagementConnector {
    base_url: String,
}

impl Default for AzureManagementConnector {
    fn default() -> Self {
        Self { base_url: DEFAULT_MANAGEMENT_URL.to_string() }
    }
}

impl AzureManagementConnector {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into() }
    }
}

#[async_trait]
impl FirewallConnector for AzureManagementConnector {
    async fn connect(&self, config: &SubscriptionConfig) -> Result<Arc<dyn FirewallClient>> {
        let pem = STANDARD.decode(config.management_cert.expose_secret().trim()).map_err(|e| {
            Error::validation_field(
                format!("management_cert must be base64-encoded PEM: {}", e),
                "management_cert",
            )
        })?;
        let identity = reqwest::Identity::from_pem(&pem).map_err(|e| {
            Error::validation_field(
                format!("management_cert is not a valid certificate bundle: {}", e),
                "management_cert",
            )
        })?;
        let http = reqwest::Client::builder()
            .identity(identity)
            .build()
            .map_err(|e| Error::upstream_with_source("azure", "failed to build management client", e))?;

        Ok(Arc::new(AzureManagementClient::new(http, &self.base_url, &config.subscription_id)))
    }
}

/// REST client for `services/sqlservers/servers/{server}/firewallrules`.
#[derive(Debug, Clone)]
pub struct AzureManagementClient {
    http: reqwest::Client,
    base_url: String,
    subscription_id: String,
}

impl AzureManagementClient {
    pub fn new(http: reqwest::Client, base_url: &str, subscription_id: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            subscription_id: subscription_id.to_string(),
        }
    }

    fn rules_url(&self, server: &str) -> String {
        format!(
            "{}/{}/services/sqlservers/servers/{}/firewallrules",
            self.base_url, self.subscription_id, server
        )
    }

    async fn check(response: reqwest::Response, action: &str) -> Result<String> {
        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            return Ok(body);
        }
        let message = format!("{} failed with {}: {}", action, status, extract_message(&body));
        if status == StatusCode::NOT_FOUND {
            return Err(Error::already_absent(message));
        }
        Err(Error::upstream("azure", message))
    }
}

#[async_trait]
impl FirewallClient for AzureManagementClient {
    async fn create_rule(&self, server: &str, rule: &FirewallRule) -> Result<()> {
        let body = format!(
            r#"<ServiceResource xmlns="{}"><Name>{}</Name><StartIPAddress>{}</StartIPAddress><EndIPAddress>{}</EndIPAddress></ServiceResource>"#,
            SERVICE_NAMESPACE,
            xml_escape(&rule.name),
            xml_escape(&rule.start_ip),
            xml_escape(&rule.end_ip)
        );
        let response = self
            .http
            .post(self.rules_url(server))
            .header("x-ms-version", MANAGEMENT_API_VERSION)
            .header("Content-Type", "application/xml")
            .body(body)
            .send()
            .await?;
        Self::check(response, "create firewall rule").await?;
        debug!(server = %server, rule = %rule.name, "firewall rule created");
        Ok(())
    }

    async fn delete_rule(&self, server: &str, name: &str) -> Result<()> {
        let response = self
            .http
            .delete(format!("{}/{}", self.rules_url(server), name))
            .header("x-ms-version", MANAGEMENT_API_VERSION)
            .send()
            .await?;
        Self::check(response, "delete firewall rule").await?;
        debug!(server = %server, rule = %name, "firewall rule deleted");
        Ok(())
    }

    async fn list_rules(&self, server: &str) -> Result<Vec<String>> {
        let response = self
            .http
            .get(self.rules_url(server))
            .header("x-ms-version", MANAGEMENT_API_VERSION)
            .send()
            .await?;
        let body = Self::check(response, "list firewall rules").await?;
        Ok(RULE_NAME_REGEX.captures_iter(&body).map(|c| c[1].to_string()).collect())
    }
}

/// Pull `<Message>` out of a management API error document.
fn extract_message(body: &str) -> &str {
    body.split_once("<Message>")
        .and_then(|(_, rest)| rest.split_once("</Message>"))
        .map(|(message, _)| message)
        .unwrap_or(body)
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

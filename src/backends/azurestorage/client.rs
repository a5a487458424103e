//! Blob service SAS generation and account verification.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::backends::sas::{encode_component, SasSigner, SharedKeySigner};
use crate::errors::{Error, Result};
use crate::storage::config_store::AccountConfig;

lazy_static! {
    static ref CONTAINER_NAME_REGEX: Regex = Regex::new(r"<Name>([^<]*)</Name>")
        .expect("CONTAINER_NAME_REGEX should be a valid regex pattern");
}

/// Lifetime of the account SAS used to verify credentials.
const VERIFY_SAS_LIFETIME_MINUTES: i64 = 5;

/// Target and rights of a service SAS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobSasRequest<'a> {
    pub container: &'a str,
    /// Empty for a container-level SAS.
    pub blob: &'a str,
    pub permissions: &'a str,
    pub expiry: DateTime<Utc>,
}

impl BlobSasRequest<'_> {
    fn signed_resource(&self) -> &'static str {
        if self.blob.is_empty() {
            "c"
        } else {
            "b"
        }
    }

    /// Path below the blob endpoint, e.g. `/container/blob`.
    pub fn resource_path(&self) -> String {
        if self.blob.is_empty() {
            format!("/{}", self.container)
        } else {
            format!("/{}/{}", self.container, self.blob)
        }
    }
}

#[async_trait]
pub trait StorageAccountClient: Send + Sync {
    fn account_name(&self) -> &str;

    /// Blob service endpoint, without a trailing slash.
    fn endpoint(&self) -> &str;

    /// Signed SAS query string (no leading `?`).
    fn sas_token(&self, request: &BlobSasRequest<'_>) -> Result<String>;

    async fn list_containers(&self) -> Result<Vec<String>>;
}

/// SAS expiry format, `2024-05-01T12:00:00Z`.
pub fn format_expiry(expiry: DateTime<Utc>) -> String {
    expiry.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Storage account client signing with the account's shared key.
pub struct SharedKeyClient {
    http: reqwest::Client,
    account_name: String,
    endpoint: String,
    api_version: String,
    signer: SharedKeySigner,
}

impl std::fmt::Debug for SharedKeyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKeyClient")
            .field("account_name", &self.account_name)
            .field("endpoint", &self.endpoint)
            .field("api_version", &self.api_version)
            .finish()
    }
}

impl SharedKeyClient {
    pub fn from_account(account: &AccountConfig) -> Result<Self> {
        Self::with_endpoint(reqwest::Client::new(), account, &account.blob_endpoint())
    }

    /// Client talking to an explicit blob endpoint.
    pub fn with_endpoint(http: reqwest::Client, account: &AccountConfig, endpoint: &str) -> Result<Self> {
        if account.account_name.is_empty() {
            return Err(Error::validation_field("account_name must be supplied", "account_name"));
        }
        Ok(Self {
            http,
            account_name: account.account_name.clone(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_version: account.api_version.clone(),
            signer: SharedKeySigner::from_base64(&account.account_key)?,
        })
    }

    /// Account SAS allowing container listing, used for verification.
    fn list_sas(&self, expiry: DateTime<Utc>) -> Result<String> {
        let se = format_expiry(expiry);
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n",
            self.account_name, "l", "b", "s", "", se, "", "", self.api_version
        );
        let sig = self.signer.sign(&string_to_sign)?;
        Ok(format!(
            "sv={}&ss=b&srt=s&sp=l&se={}&sig={}",
            encode_component(&self.api_version),
            encode_component(&se),
            encode_component(&sig)
        ))
    }
}

#[async_trait]
impl StorageAccountClient for SharedKeyClient {
    fn account_name(&self) -> &str {
        &self.account_name
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn sas_token(&self, request: &BlobSasRequest<'_>) -> Result<String> {
        if request.container.is_empty() {
            return Err(Error::validation_field("role has no container", "container"));
        }
        let se = format_expiry(request.expiry);
        let canonical = format!("/blob/{}{}", self.account_name, request.resource_path());
        // sp, st, se, resource, si, sip, spr, sv, rscc, rscd, rsce, rscl, rsct
        let string_to_sign = format!(
            "{}\n\n{}\n{}\n\n\n\n{}\n\n\n\n\n",
            request.permissions, se, canonical, self.api_version
        );
        let sig = self.signer.sign(&string_to_sign)?;

        Ok(format!(
            "sv={}&se={}&sr={}&sp={}&sig={}",
            encode_component(&self.api_version),
            encode_component(&se),
            request.signed_resource(),
            encode_component(request.permissions),
            encode_component(&sig)
        ))
    }

    async fn list_containers(&self) -> Result<Vec<String>> {
        let sas = self.list_sas(Utc::now() + ChronoDuration::minutes(VERIFY_SAS_LIFETIME_MINUTES))?;
        let response = self
            .http
            .get(format!("{}/?comp=list&{}", self.endpoint, sas))
            .header("x-ms-version", &self.api_version)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::upstream("azure", format!("list containers failed with {}: {}", status, body)));
        }

        let containers: Vec<String> =
            CONTAINER_NAME_REGEX.captures_iter(&body).map(|c| c[1].to_string()).collect();
        debug!(account = %self.account_name, containers = containers.len(), "storage account verified");
        Ok(containers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use chrono::TimeZone;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn account() -> AccountConfig {
        AccountConfig {
            account_name: "acct".into(),
            account_key: STANDARD.encode("super-secret-key").into(),
            base_url: "core.windows.net".into(),
            api_version: "2016-05-31".into(),
            use_https: true,
        }
    }

    fn expiry() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_blob_sas_fields() {
        let client = SharedKeyClient::from_account(&account()).unwrap();
        let request =
            BlobSasRequest { container: "logs", blob: "app.log", permissions: "r", expiry: expiry() };
        let token = client.sas_token(&request).unwrap();

        let expected_sig = SharedKeySigner::from_base64(&account().account_key)
            .unwrap()
            .sign("r\n\n2024-05-01T12:00:00Z\n/blob/acct/logs/app.log\n\n\n\n2016-05-31\n\n\n\n\n")
            .unwrap();
        assert_eq!(
            token,
            format!(
                "sv=2016-05-31&se=2024-05-01T12%3A00%3A00Z&sr=b&sp=r&sig={}",
                encode_component(&expected_sig)
            )
        );
    }

    #[test]
    fn test_container_sas_without_blob() {
        let client = SharedKeyClient::from_account(&account()).unwrap();
        let request = BlobSasRequest { container: "logs", blob: "", permissions: "rl", expiry: expiry() };
        assert_eq!(request.resource_path(), "/logs");
        assert!(client.sas_token(&request).unwrap().contains("&sr=c&"));
    }

    #[test]
    fn test_missing_container_rejected() {
        let client = SharedKeyClient::from_account(&account()).unwrap();
        let request = BlobSasRequest { container: "", blob: "x", permissions: "r", expiry: expiry() };
        assert!(client.sas_token(&request).is_err());
    }

    #[tokio::test]
    async fn test_list_containers_verifies_account() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(query_param("comp", "list"))
            .and(query_param("sp", "l"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<EnumerationResults><Containers><Container><Name>logs</Name></Container><Container><Name>media</Name></Container></Containers></EnumerationResults>",
            ))
            .mount(&server)
            .await;

        let client = SharedKeyClient::with_endpoint(reqwest::Client::new(), &account(), &server.uri())
            .unwrap();
        assert_eq!(client.list_containers().await.unwrap(), vec!["logs", "media"]);
    }

    #[tokio::test]
    async fn test_list_containers_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("AuthenticationFailed"))
            .mount(&server)
            .await;

        let client = SharedKeyClient::with_endpoint(reqwest::Client::new(), &account(), &server.uri())
            .unwrap();
        let err = client.list_containers().await.unwrap_err();
        assert!(matches!(err, Error::Upstream { service: "azure", .. }));
    }
}

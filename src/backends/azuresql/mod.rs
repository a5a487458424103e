//! # Azure SQL Backend
//!
//! Issues short-lived SQL logins from role templates and optionally opens a
//! server firewall rule for the caller's address. Revocation blocks new
//! connections, kills live sessions, drops the user and removes the rule.
//!
//! Paths (relative to the mount):
//!
//! | Path | Operations |
//! |---|---|
//! | `config/connection` | update |
//! | `config/subscription` | read, update |
//! | `config/lease` | read, update |
//! | `roles/` | list |
//! | `roles/<name>` | read, update, delete |
//! | `creds/<name>[/<client_ip>]` | read |

pub mod client;
pub mod firewall;
pub mod revoke;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use uuid::Uuid;

use self::client::{describe_dsn, MssqlConnector, SqlClient, SqlConnector};
use self::firewall::{AzureManagementConnector, FirewallClient, FirewallConnector, FirewallRule};
use self::revoke::{revoke_login, FirewallTarget, RevokeTarget};
use super::{lease_path, BackendType, ClientSlot, LogicalBackend};
use crate::errors::{Error, Result};
use crate::framework::{
    generic_name_regex, optional_suffix_regex, FieldData, FieldSchema, Operation, Request,
    Response, Router,
};
use crate::secrets::template::{render, split_sql};
use crate::secrets::{resolve_ttl, IssuedSecret, LeaseLimits, LeaseTerms, RoleRegistry, SecretString};
use crate::storage::config_store::{
    read_config, read_lease_config, require_config, write_config, ConnectionConfig,
    SubscriptionConfig, CONNECTION_KEY, SUBSCRIPTION_KEY,
};
use crate::storage::Storage;

pub const SECRET_TYPE: &str = "creds";

/// SQL Server caps login names at 128 characters.
const MAX_USERNAME_LEN: usize = 128;
/// Random characters after the complexity prefix of generated passwords.
const PASSWORD_RANDOM_LEN: usize = 32;

/// Template for issued logins. `{{name}}` and `{{password}}` are substituted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlRole {
    pub sql: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SqlPath {
    WriteConnection,
    ReadSubscription,
    WriteSubscription,
    ReadLease,
    WriteLease,
    ListRoles,
    ReadRole,
    WriteRole,
    DeleteRole,
    Creds,
}

#[derive(Default)]
struct SqlState {
    db: ClientSlot<dyn SqlClient>,
    firewall: ClientSlot<dyn FirewallClient>,
}

pub struct AzureSqlBackend {
    state: Mutex<SqlState>,
    sql_connector: Arc<dyn SqlConnector>,
    firewall_connector: Arc<dyn FirewallConnector>,
    router: Router<SqlPath>,
    roles: RoleRegistry<SqlRole>,
    limits: LeaseLimits,
}

impl std::fmt::Debug for AzureSqlBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureSqlBackend").field("limits", &self.limits).finish()
    }
}

impl AzureSqlBackend {
    /// Backend using the tiberius SQL client and the Azure management API.
    pub fn new(limits: LeaseLimits) -> Result<Self> {
        Self::with_connectors(
            limits,
            Arc::new(MssqlConnector),
            Arc::new(AzureManagementConnector::default()),
        )
    }

    pub fn with_connectors(
        limits: LeaseLimits,
        sql_connector: Arc<dyn SqlConnector>,
        firewall_connector: Arc<dyn FirewallConnector>,
    ) -> Result<Self> {
        Ok(Self {
            state: Mutex::new(SqlState::default()),
            sql_connector,
            firewall_connector,
            router: build_router()?,
            roles: RoleRegistry::new(),
            limits,
        })
    }

    /// Cached database client, opened from `config/connection` on first use.
    async fn db(&self, storage: &dyn Storage) -> Result<Arc<dyn SqlClient>> {
        let mut state = self.state.lock().await;
        let connector = self.sql_connector.clone();
        state
            .db
            .get_or_init(|| async move {
                let config: ConnectionConfig = require_config(storage, CONNECTION_KEY).await?;
                connector.connect(&config).await
            })
            .await
    }

    /// Cached management client and target server, when a subscription is configured.
    async fn firewall(
        &self,
        storage: &dyn Storage,
    ) -> Result<Option<(Arc<dyn FirewallClient>, String)>> {
        let mut state = self.state.lock().await;
        let Some(config) = read_config::<SubscriptionConfig>(storage, SUBSCRIPTION_KEY).await? else {
            return Ok(None);
        };
        let server = config.server.clone();
        let connector = self.firewall_connector.clone();
        let client = state
            .firewall
            .get_or_init(|| async move { connector.connect(&config).await })
            .await?;
        Ok(Some((client, server)))
    }

    async fn write_connection(&self, storage: &dyn Storage, fields: &FieldData) -> Result<Option<Response>> {
        let config = ConnectionConfig::from_fields(
            fields.get_str("connection_url"),
            fields.get_str("value"),
            fields.get_int("max_open_connections"),
            fields.get_int("max_idle_connections"),
        )?;

        if fields.get_bool("verify_connection") {
            let client = self.sql_connector.connect(&config).await?;
            client.ping().await.map_err(|e| e.context("error validating connection"))?;
        }

        let mut state = self.state.lock().await;
        write_config(storage, CONNECTION_KEY, &config).await?;
        state.db.invalidate();
        info!(target_db = %describe_dsn(config.url()), "connection configured");

        let mut response = Response::default();
        if !fields.get_str("value").is_empty() {
            response.add_warning("'value' is deprecated; use 'connection_url' instead");
        }
        Ok(Some(response).filter(|r| !r.warnings.is_empty()))
    }

    async fn read_subscription(&self, storage: &dyn Storage) -> Result<Option<Response>> {
        let Some(config) = read_config::<SubscriptionConfig>(storage, SUBSCRIPTION_KEY).await? else {
            return Ok(None);
        };
        let mut data = Map::new();
        data.insert("subscription_id".into(), Value::from(config.subscription_id));
        data.insert("server".into(), Value::from(config.server));
        if let Some(database) = config.database {
            data.insert("database".into(), Value::from(database));
        }
        Ok(Some(Response::with_data(data)))
    }

    async fn write_subscription(&self, storage: &dyn Storage, fields: &FieldData) -> Result<Option<Response>> {
        let config = SubscriptionConfig {
            subscription_id: fields.get_str("subscription_id").to_string(),
            management_cert: SecretString::new(fields.get_str("management_cert")),
            server: fields.get_str("server").to_string(),
            database: fields.get_opt_str("database").map(str::to_string),
            publish_settings: fields.get_opt_str("publish_settings").map(SecretString::new),
        };

        if fields.get_bool("verify") {
            let client = self.firewall_connector.connect(&config).await?;
            client
                .list_rules(&config.server)
                .await
                .map_err(|e| e.context("error validating subscription"))?;
        }

        let mut state = self.state.lock().await;
        write_config(storage, SUBSCRIPTION_KEY, &config).await?;
        state.firewall.invalidate();
        info!(subscription_id = %config.subscription_id, server = %config.server, "subscription configured");
        Ok(None)
    }

    async fn read_role(&self, storage: &dyn Storage, name: &str) -> Result<Option<Response>> {
        let Some(role) = self.roles.read(storage, name).await? else {
            return Ok(None);
        };
        let mut data = Map::new();
        data.insert("sql".into(), Value::from(role.sql));
        Ok(Some(Response::with_data(data)))
    }

    async fn write_role(&self, storage: &dyn Storage, fields: &FieldData) -> Result<Option<Response>> {
        let role = SqlRole { sql: fields.get_str("sql").to_string() };
        self.roles.write(storage, fields.get_str("name"), &role).await?;
        Ok(None)
    }

    /// Mint a login for `name`.
    ///
    /// Statements run one at a time with no transaction around them; a
    /// failure partway leaves earlier statements applied.
    #[instrument(skip(self, storage, fields), fields(role = %fields.get_str("name")))]
    async fn issue_creds(&self, storage: &dyn Storage, fields: &FieldData) -> Result<Option<Response>> {
        let name = fields.get_str("name");
        let client_ip = fields
            .get_opt_str("client_ip")
            .map(|ip| {
                ip.parse::<IpAddr>().map_err(|_| {
                    Error::validation_field(format!("invalid client_ip '{}'", ip), "client_ip")
                })
            })
            .transpose()?;

        let role = self.roles.require(storage, name).await?;
        let lease = read_lease_config(storage).await?;
        let db = self.db(storage).await?;

        let username = generate_username(name);
        let password = SecretString::new(generate_password());

        let sql = render(
            &role.sql,
            [("name", username.as_str()), ("password", password.expose_secret())],
        );
        for statement in split_sql(&sql) {
            db.execute(&statement).await?;
        }
        debug!(username = %username, "login created");

        let mut warnings = Vec::new();
        let mut fwrule = String::new();
        if let Some(ip) = client_ip {
            match self.firewall(storage).await? {
                Some((firewall, server)) => {
                    let rule = FirewallRule::single(username.clone(), &ip.to_string());
                    firewall.create_rule(&server, &rule).await?;
                    fwrule = rule.name;
                }
                None => {
                    warn!(username = %username, "client_ip supplied without config/subscription");
                    warnings.push(
                        "client_ip ignored: configure config/subscription to manage firewall rules"
                            .to_string(),
                    );
                }
            }
        }

        let ttl = resolve_ttl(None, lease.as_ref(), &self.limits);
        let mut secret = IssuedSecret::new(SECRET_TYPE)
            .with_data("username", username.clone())
            .with_data("password", password.expose_secret())
            .with_internal("username", username)
            .with_internal("fwrule", fwrule.clone())
            .with_ttl(ttl);
        if !fwrule.is_empty() {
            secret = secret.with_data("fwrule", fwrule);
        }

        let mut response = Response::with_secret(secret);
        for warning in warnings {
            response.add_warning(warning);
        }
        Ok(Some(response))
    }
}

fn build_router() -> Result<Router<SqlPath>> {
    Router::new()
        .path(
            "config/connection",
            vec![
                FieldSchema::string("connection_url", "DB connection string"),
                FieldSchema::string("value", "DB connection string. Use 'connection_url' instead."),
                FieldSchema::bool("verify_connection", "If set, connection_url is verified by connecting")
                    .with_default(true),
                FieldSchema::int("max_open_connections", "Maximum number of open connections"),
                FieldSchema::int("max_idle_connections", "Maximum number of idle connections"),
            ],
            vec![(Operation::Update, SqlPath::WriteConnection)],
        )?
        .path(
            "config/subscription",
            vec![
                FieldSchema::string("subscription_id", "Azure subscription id").required(),
                FieldSchema::string("management_cert", "Base64-encoded PEM management certificate")
                    .required(),
                FieldSchema::string("server", "SQL server name").required(),
                FieldSchema::string("database", "Database name"),
                FieldSchema::string("publish_settings", "Publish settings file contents"),
                FieldSchema::bool("verify", "If set, the subscription is verified first")
                    .with_default(true),
            ],
            vec![
                (Operation::Read, SqlPath::ReadSubscription),
                (Operation::Update, SqlPath::WriteSubscription),
            ],
        )?
        .path(
            lease_path::PATTERN,
            lease_path::fields(),
            vec![(Operation::Read, SqlPath::ReadLease), (Operation::Update, SqlPath::WriteLease)],
        )?
        .path("roles/?", vec![], vec![(Operation::List, SqlPath::ListRoles)])?
        .path(
            &format!("roles/{}", generic_name_regex("name")),
            vec![
                FieldSchema::string("name", "Name of the role"),
                FieldSchema::string("sql", "SQL string to create a user. See help for more info.")
                    .required(),
            ],
            vec![
                (Operation::Read, SqlPath::ReadRole),
                (Operation::Update, SqlPath::WriteRole),
                (Operation::Delete, SqlPath::DeleteRole),
            ],
        )?
        .path(
            &format!("creds/{}{}", generic_name_regex("name"), optional_suffix_regex("client_ip")),
            vec![
                FieldSchema::string("name", "Name of the role"),
                FieldSchema::string("client_ip", "Address to open in the server firewall"),
            ],
            vec![(Operation::Read, SqlPath::Creds)],
        )
}

/// `{role}-{uuid}`, cut to the SQL Server login length limit.
fn generate_username(role: &str) -> String {
    let mut username = format!("{}-{}", role, Uuid::new_v4());
    if username.len() > MAX_USERNAME_LEN {
        let mut end = MAX_USERNAME_LEN;
        while !username.is_char_boundary(end) {
            end -= 1;
        }
        username.truncate(end);
    }
    username
}

/// Satisfies the Azure SQL complexity policy (upper, lower, digit, symbol).
fn generate_password() -> String {
    let random: String = OsRng.sample_iter(&Alphanumeric).take(PASSWORD_RANDOM_LEN).map(char::from).collect();
    format!("A1a-{}", random)
}

#[async_trait]
impl LogicalBackend for AzureSqlBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::AzureSql
    }

    #[instrument(skip(self, storage, request), fields(operation = %request.operation, path = %request.path))]
    async fn handle_request(&self, storage: &dyn Storage, request: Request) -> Result<Option<Response>> {
        let (path, fields) = self.router.route(&request)?;
        match path {
            SqlPath::WriteConnection => self.write_connection(storage, &fields).await,
            SqlPath::ReadSubscription => self.read_subscription(storage).await,
            SqlPath::WriteSubscription => self.write_subscription(storage, &fields).await,
            SqlPath::ReadLease => lease_path::read(storage).await,
            SqlPath::WriteLease => lease_path::write(storage, &fields).await,
            SqlPath::ListRoles => Ok(Some(Response::list(self.roles.list(storage).await?))),
            SqlPath::ReadRole => self.read_role(storage, fields.get_str("name")).await,
            SqlPath::WriteRole => self.write_role(storage, &fields).await,
            SqlPath::DeleteRole => {
                self.roles.delete(storage, fields.get_str("name")).await?;
                Ok(None)
            }
            SqlPath::Creds => self.issue_creds(storage, &fields).await,
        }
    }

    async fn renew(
        &self,
        storage: &dyn Storage,
        _secret: &IssuedSecret,
        terms: &LeaseTerms,
    ) -> Result<Duration> {
        lease_path::renew(storage, terms, &self.limits).await
    }

    #[instrument(skip(self, storage, secret), fields(username = secret.internal_str("username").unwrap_or_default()))]
    async fn revoke(&self, storage: &dyn Storage, secret: &IssuedSecret) -> Result<()> {
        let username = secret
            .internal_str("username")
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::internal("secret is missing internal data 'username'"))?;
        let target = RevokeTarget {
            username,
            fwrule: secret.internal_str("fwrule").filter(|r| !r.is_empty()),
        };

        let db = self.db(storage).await?;
        let firewall = match target.fwrule {
            Some(_) => self.firewall(storage).await?,
            None => None,
        };
        let firewall_target = firewall
            .as_ref()
            .map(|(client, server)| FirewallTarget { client: client.as_ref(), server });

        revoke_login(db.as_ref(), firewall_target, &target).await
    }
}

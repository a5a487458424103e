//! Secrets produced by a credential issuer.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::secrets::duration::canonical;

/// A freshly minted secret, before the lease subsystem takes ownership.
///
/// `data` is returned to the caller. `internal` never leaves the server and
/// carries everything the revoke and renew callbacks need.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuedSecret {
    pub secret_type: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub internal: Map<String, Value>,
    /// Zero lets the lease subsystem apply its defaults.
    #[serde(with = "canonical", default)]
    pub ttl: Duration,
    pub renewable: bool,
}

impl IssuedSecret {
    pub fn new(secret_type: impl Into<String>) -> Self {
        Self {
            secret_type: secret_type.into(),
            data: Map::new(),
            internal: Map::new(),
            ttl: Duration::ZERO,
            renewable: true,
        }
    }

    pub fn with_data(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    pub fn with_internal(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.internal.insert(key.to_string(), value.into());
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn non_renewable(mut self) -> Self {
        self.renewable = false;
        self
    }

    /// String field from the internal map; missing and non-string values read as `None`.
    pub fn internal_str(&self, key: &str) -> Option<&str> {
        self.internal.get(key).and_then(Value::as_str)
    }
}

// Field values hold passwords and tokens, so only keys are printed.
impl fmt::Debug for IssuedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedSecret")
            .field("secret_type", &self.secret_type)
            .field("data", &self.data.keys().collect::<Vec<_>>())
            .field("internal", &self.internal.keys().collect::<Vec<_>>())
            .field("ttl", &self.ttl)
            .field("renewable", &self.renewable)
            .finish()
    }
}

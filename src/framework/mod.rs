//! # Path Dispatch
//!
//! Each backend exposes a handful of logical paths (`config/connection`,
//! `roles/<name>`, `creds/<name>`, ...). A [`Router`] maps a request's
//! operation and path onto a backend-defined handler tag plus validated
//! [`FieldData`]. Backends then `match` on the tag; no reflection or dynamic
//! registration is involved.

pub mod fields;

pub use fields::{FieldData, FieldSchema, FieldType};

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{Error, Result};
use crate::secrets::IssuedSecret;

/// Logical operation requested against a backend path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Read,
    /// Create or overwrite; writes are always full replacements.
    Update,
    Delete,
    List,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::List => "list",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request addressed to one mounted backend. `path` is relative to the mount.
#[derive(Debug, Clone)]
pub struct Request {
    pub operation: Operation,
    pub path: String,
    pub data: Map<String, Value>,
}

impl Request {
    pub fn new(operation: Operation, path: impl Into<String>) -> Self {
        Self { operation, path: path.into(), data: Map::new() }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }
}

/// Backend response. A response carrying a `secret` becomes a lease.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub data: Map<String, Value>,
    pub secret: Option<IssuedSecret>,
    pub warnings: Vec<String>,
}

impl Response {
    pub fn with_data(data: Map<String, Value>) -> Self {
        Self { data, ..Default::default() }
    }

    /// `{"keys": [...]}` for list operations.
    pub fn list(keys: Vec<String>) -> Self {
        let mut data = Map::new();
        data.insert("keys".to_string(), Value::from(keys));
        Self::with_data(data)
    }

    pub fn with_secret(secret: IssuedSecret) -> Self {
        Self { data: secret.data.clone(), secret: Some(secret), warnings: Vec::new() }
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}

/// Capture group matching a role-style name (`web`, `web-1`, `batch.v2`).
pub fn generic_name_regex(name: &str) -> String {
    format!(r"(?P<{}>\w(([\w.-]+)?\w)?)", name)
}

/// Optional trailing `/<rest>` segment captured as `name`.
pub fn optional_suffix_regex(name: &str) -> String {
    format!(r"(/(?P<{}>.+))?", name)
}

struct PathSpec<H> {
    pattern: Regex,
    fields: Vec<FieldSchema>,
    handlers: Vec<(Operation, H)>,
}

/// Dispatch table from `(operation, path pattern)` to handler tags.
pub struct Router<H> {
    paths: Vec<PathSpec<H>>,
}

impl<H> Default for Router<H> {
    fn default() -> Self {
        Self { paths: Vec::new() }
    }
}

impl<H: Copy> Router<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a path. `pattern` must match the whole relative path.
    pub fn path(
        mut self,
        pattern: &str,
        fields: Vec<FieldSchema>,
        handlers: Vec<(Operation, H)>,
    ) -> Result<Self> {
        let pattern = Regex::new(&format!("^{}$", pattern))
            .map_err(|e| Error::internal(format!("invalid path pattern '{}': {}", pattern, e)))?;
        self.paths.push(PathSpec { pattern, fields, handlers });
        Ok(self)
    }

    /// Resolve a request to its handler and validated fields.
    ///
    /// The first matching pattern wins. Required fields are only enforced
    /// for updates. A path that matches but does not support the operation
    /// yields [`Error::UnsupportedOperation`]; a path
    /// that matches nothing yields [`Error::NotFound`].
    pub fn route(&self, request: &Request) -> Result<(H, FieldData)> {
        let path = request.path.trim_start_matches('/');
        for spec in &self.paths {
            let Some(caps) = spec.pattern.captures(path) else {
                continue;
            };

            let handler = spec
                .handlers
                .iter()
                .find(|(op, _)| *op == request.operation)
                .map(|(_, h)| *h)
                .ok_or_else(|| {
                    Error::unsupported(format!(
                        "{} is not supported on path '{}'",
                        request.operation, path
                    ))
                })?;

            let captures: HashMap<String, String> = spec
                .pattern
                .capture_names()
                .flatten()
                .filter_map(|name| caps.name(name).map(|m| (name.to_string(), m.as_str().to_string())))
                .collect();

            let fields = match request.operation {
                Operation::Update => FieldData::parse(&spec.fields, &request.data, &captures)?,
                _ => FieldData::parse_lenient(&spec.fields, &request.data, &captures)?,
            };
            return Ok((handler, fields));
        }

        Err(Error::not_found("path", path))
    }
}

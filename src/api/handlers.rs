use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response as HttpResponse},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::framework::{Operation, Request};
use crate::leases::{LeaseInfo, LeaseManager, LeasedResponse};
use crate::secrets::duration::parse_duration;

use super::error::ApiError;

#[derive(Clone)]
pub struct ApiState {
    pub leases: Arc<LeaseManager>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub list: bool,
}

#[derive(Debug, Deserialize)]
pub struct RenewBody {
    pub lease_id: String,
    /// Seconds, or a duration string such as `"1h"`.
    #[serde(default)]
    pub increment: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct RevokeBody {
    pub lease_id: String,
}

#[derive(Debug, Serialize)]
pub struct RevokePrefixResponse {
    pub revoked: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub mounts: Vec<String>,
}

fn parse_body(body: &Bytes) -> Result<Map<String, Value>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ApiError::bad_request("request body must be a JSON object")),
        Err(e) => Err(ApiError::bad_request(format!("invalid JSON body: {}", e))),
    }
}

fn parse_increment(raw: Option<Value>) -> Result<Option<Duration>, ApiError> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|secs| Some(Duration::from_secs(secs)))
            .ok_or_else(|| ApiError::bad_request("increment must be a non-negative number of seconds")),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(parse_duration(&s)?)),
        Some(_) => Err(ApiError::bad_request("increment must be a number or duration string")),
    }
}

fn leased(response: Option<LeasedResponse>) -> HttpResponse {
    match response {
        Some(response) => Json(response).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn dispatch(
    state: &ApiState,
    mount: &str,
    request: Request,
) -> Result<HttpResponse, ApiError> {
    let response = state.leases.handle(mount, request).await?;
    Ok(leased(response))
}

pub async fn read_path_handler(
    State(state): State<ApiState>,
    Path((mount, path)): Path<(String, String)>,
    Query(query): Query<ListQuery>,
) -> Result<HttpResponse, ApiError> {
    let operation = if query.list { Operation::List } else { Operation::Read };
    dispatch(&state, &mount, Request::new(operation, path)).await
}

pub async fn write_path_handler(
    State(state): State<ApiState>,
    Path((mount, path)): Path<(String, String)>,
    body: Bytes,
) -> Result<HttpResponse, ApiError> {
    let data = parse_body(&body)?;
    dispatch(&state, &mount, Request::new(Operation::Update, path).with_data(data)).await
}

pub async fn delete_path_handler(
    State(state): State<ApiState>,
    Path((mount, path)): Path<(String, String)>,
) -> Result<HttpResponse, ApiError> {
    dispatch(&state, &mount, Request::new(Operation::Delete, path)).await
}

pub async fn renew_lease_handler(
    State(state): State<ApiState>,
    Json(body): Json<RenewBody>,
) -> Result<Json<LeasedResponse>, ApiError> {
    let increment = parse_increment(body.increment)?;
    let response = state.leases.renew(&body.lease_id, increment).await?;
    Ok(Json(response))
}

pub async fn revoke_lease_handler(
    State(state): State<ApiState>,
    Json(body): Json<RevokeBody>,
) -> Result<StatusCode, ApiError> {
    state.leases.revoke(&body.lease_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn revoke_prefix_handler(
    State(state): State<ApiState>,
    Path(prefix): Path<String>,
) -> Result<Json<RevokePrefixResponse>, ApiError> {
    let revoked = state.leases.revoke_prefix(&prefix).await?;
    Ok(Json(RevokePrefixResponse { revoked }))
}

pub async fn lookup_lease_handler(
    State(state): State<ApiState>,
    Path(lease_id): Path<String>,
) -> Result<Json<LeaseInfo>, ApiError> {
    Ok(Json(state.leases.lookup(&lease_id).await?))
}

pub async fn health_handler(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", version: crate::VERSION, mounts: state.leases.mounts() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_body() {
        assert!(parse_body(&Bytes::from_static(b"")).unwrap().is_empty());
        assert!(parse_body(&Bytes::from_static(b"  \n")).unwrap().is_empty());
        let map = parse_body(&Bytes::from_static(br#"{"ttl":"1h"}"#)).unwrap();
        assert_eq!(map["ttl"], "1h");
        assert!(parse_body(&Bytes::from_static(b"[1,2]")).is_err());
        assert!(parse_body(&Bytes::from_static(b"{nope")).is_err());
    }

    #[test]
    fn test_parse_increment() {
        assert_eq!(parse_increment(None).unwrap(), None);
        assert_eq!(parse_increment(Some(Value::from(90))).unwrap(), Some(Duration::from_secs(90)));
        assert_eq!(
            parse_increment(Some(Value::from("1h"))).unwrap(),
            Some(Duration::from_secs(3600))
        );
        assert!(parse_increment(Some(Value::from(-5))).is_err());
        assert!(parse_increment(Some(Value::Bool(true))).is_err());
    }
}

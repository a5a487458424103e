//! # HTTP API
//!
//! Thin axum adapter over the [`LeaseManager`](crate::leases::LeaseManager).
//!
//! | Route | Operation |
//! |-------|-----------|
//! | `GET /v1/{mount}/{*path}` | read, or list with `?list=true` |
//! | `POST`/`PUT /v1/{mount}/{*path}` | update |
//! | `DELETE /v1/{mount}/{*path}` | delete |
//! | `PUT /v1/sys/leases/renew` | renew a lease |
//! | `PUT /v1/sys/leases/revoke` | revoke a lease |
//! | `PUT /v1/sys/leases/revoke-prefix/{*prefix}` | revoke all leases under a prefix |
//! | `GET /v1/sys/leases/lookup/{*lease_id}` | lease metadata |
//! | `GET /health` | liveness |

pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;

pub use error::ApiError;
pub use routes::build_router;
pub use server::start_api_server;

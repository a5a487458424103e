use std::sync::Arc;

use axum::{
    routing::{get, put},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::leases::LeaseManager;

use super::handlers::{
    delete_path_handler, health_handler, lookup_lease_handler, read_path_handler,
    renew_lease_handler, revoke_lease_handler, revoke_prefix_handler, write_path_handler,
    ApiState,
};

pub fn build_router(leases: Arc<LeaseManager>) -> Router {
    let api_state = ApiState { leases };

    let sys = Router::new()
        .route("/v1/sys/leases/renew", put(renew_lease_handler))
        .route("/v1/sys/leases/revoke", put(revoke_lease_handler))
        .route("/v1/sys/leases/revoke-prefix/{*prefix}", put(revoke_prefix_handler))
        .route("/v1/sys/leases/lookup/{*lease_id}", get(lookup_lease_handler));

    let logical = Router::new().route(
        "/v1/{mount}/{*path}",
        get(read_path_handler)
            .post(write_path_handler)
            .put(write_path_handler)
            .delete(delete_path_handler),
    );

    Router::new()
        .route("/health", get(health_handler))
        .merge(sys)
        .merge(logical)
        .with_state(api_state)
        .layer(TraceLayer::new_for_http())
}

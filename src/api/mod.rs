//! HTTP surface of a relay node
//!
//! Peers post envelopes to `/` (or `/api/v1/messages`); operators read
//! status and originate messages under `/api/v1`.

mod error;
mod rest;
mod types;

pub use error::{ApiError, ApiResult};
pub use rest::{RestApi, ORIGIN_HEADER};
pub use types::*;

use crate::metrics::metrics_route;
use crate::relay::RelayNode;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the complete API server
pub fn create_api_server(node: Arc<RelayNode>) -> Router {
    let rest_api = RestApi::new(node);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(rest_api.router())
        .route("/metrics", metrics_route())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

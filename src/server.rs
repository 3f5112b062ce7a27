pub mod api;

use std::sync::Arc;

use axum::{
    http::Uri,
    routing::{get, post},
    Router,
};

mod config;
mod error;
mod routes;
use self::{error::ServerError, routes::*};
use crate::sql::rdbms_builder::function_mapper::FunctionMapper;

pub fn router() -> Router {
    Router::new()
        .route("/capabilities", get(get_capabilities))
        .route("/compile", post(post_compile))
        .route("/health", get(get_health))
        .fallback(not_found)
        .with_state(Arc::new(FunctionMapper::new()))
}

async fn not_found(uri: Uri) -> ServerError {
    ServerError::NotFound(uri)
}

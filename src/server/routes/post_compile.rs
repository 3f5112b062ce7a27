use std::sync::Arc;

use axum::{extract::State, Json};
use axum_extra::extract::WithRejection;
use tracing::info_span;

use crate::{
    server::{
        api::{compile_request::CompileRequest, compile_response::CompileResponse},
        config::{Config, SourceConfig},
        error::ServerError,
    },
    sql::{rdbms_builder::function_mapper::FunctionMapper, RdbmsBuilder},
};

#[axum_macros::debug_handler]
pub async fn post_compile(
    State(functions): State<Arc<FunctionMapper>>,
    SourceConfig(config): SourceConfig,
    WithRejection(Json(request), _): WithRejection<Json<CompileRequest>, ServerError>,
) -> Result<Json<CompileResponse>, ServerError> {
    let span = info_span!("compile_query", dialect = %config.dialect, root = %request.query.id);

    let compiled = tokio::task::spawn_blocking(move || {
        span.in_scope(|| {
            let Config { dialect, variables } = config;
            RdbmsBuilder::with_functions(dialect, functions).build_sql_statement(
                &request.query,
                &request.catalog,
                &request.catalog,
                &request.parameters,
                &variables,
            )
        })
    })
    .await??;
    tracing::info!(columns = compiled.columns.len(), "compiled query");

    Ok(Json(compiled.into()))
}

#[cfg(test)]
mod tests {
    use std::marker::PhantomData;

    use axum::{
        body::Body,
        handler::Handler,
        http::{Request, StatusCode},
    };
    use serde_json::json;

    use super::*;
    use crate::{server::api::error_response::ErrorResponseType, sql::dialect::Dialect};

    fn request_body(feature: serde_json::Value) -> serde_json::Value {
        json!({
            "catalog": {
                "types": [{ "name": "Order", "table": "orders" }],
                "attributes": [
                    { "declaring_type": "Order", "name": "placed_at", "column": "placed_at" }
                ]
            },
            "query": {
                "id": "o",
                "source_type": "Order",
                "features": [{ "feature": feature }],
                "limit": 5
            }
        })
    }

    fn request(feature: serde_json::Value) -> CompileRequest {
        serde_json::from_value(request_body(feature)).unwrap()
    }

    async fn post(config_header: Option<&str>) -> StatusCode {
        let placed_at = json!({ "type": "attribute", "node": "o", "attribute": "placed_at" });
        let mut builder = Request::builder()
            .method("POST")
            .uri("/compile")
            .header("content-type", "application/json");
        if let Some(config_header) = config_header {
            builder = builder.header("x-rdbms-compiler-config", config_header);
        }
        let body = Body::from(request_body(placed_at).to_string());
        let response = post_compile
            .call(builder.body(body).unwrap(), Arc::new(FunctionMapper::new()))
            .await;
        response.status()
    }

    async fn compile(
        dialect: Dialect,
        request: CompileRequest,
    ) -> Result<Json<CompileResponse>, ServerError> {
        let config = Config {
            dialect,
            ..Default::default()
        };
        post_compile(
            State(Arc::new(FunctionMapper::new())),
            SourceConfig(config),
            WithRejection(Json(request), PhantomData),
        )
        .await
    }

    fn last_day() -> serde_json::Value {
        json!({
            "type": "function",
            "signature": "LAST_DAY_OF_MONTH",
            "parameters": {
                "value": { "type": "attribute", "node": "o", "attribute": "placed_at" }
            }
        })
    }

    #[tokio::test]
    async fn compiles_the_request_for_the_configured_dialect() {
        let Json(response) = compile(Dialect::H2, request(last_day())).await.unwrap();
        assert_eq!(
            response.sql,
            r#"SELECT LAST_DAY("t0"."placed_at") AS "__f0" FROM "orders" "t0" LIMIT 5"#
        );
        assert_eq!(response.columns, vec!["__f0"]);
    }

    #[tokio::test]
    async fn compile_errors_become_bad_requests() {
        let error = compile(Dialect::Postgresql, request(last_day()))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            ServerError::UncaughtError {
                error_type: ErrorResponseType::CompileError,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn missing_config_header_compiles_with_the_default_dialect() {
        assert_eq!(post(None).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn malformed_config_header_rejects_the_request() {
        assert_eq!(post(Some("not json")).await, StatusCode::BAD_REQUEST);
    }
}

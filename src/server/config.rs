use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderName, StatusCode},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::sql::{dialect::Dialect, rdbms_builder::context::Variables};

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// The SQL dialect to compile for
    #[serde(default)]
    pub dialect: Dialect,
    /// Values of named variable categories, e.g. `{"USER": {"id": 7}}`
    #[serde(default)]
    pub variables: Variables,
}

static CONFIG_HEADER: HeaderName = HeaderName::from_static("x-rdbms-compiler-config");

/// The source configuration of a request. A missing header means the default configuration,
/// a header that does not parse rejects the request.
#[derive(Debug)]
pub struct SourceConfig(pub Config);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for SourceConfig {
    type Rejection = StatusCode;
    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.headers.get(&CONFIG_HEADER) {
            Some(config_header) => {
                let config: Config = serde_json::from_slice(config_header.as_bytes())
                    .map_err(|_err| StatusCode::BAD_REQUEST)?;
                Ok(Self(config))
            }
            None => Ok(Self(Config::default())),
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;
    use serde_json::json;

    use super::*;

    async fn extract(header: Option<&str>) -> Result<SourceConfig, StatusCode> {
        let mut request = Request::builder();
        if let Some(header) = header {
            request = request.header("x-rdbms-compiler-config", header);
        }
        let (mut parts, _) = request.body(()).unwrap().into_parts();
        SourceConfig::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn reads_dialect_and_variables_from_the_header() {
        let SourceConfig(config) =
            extract(Some(r#"{"dialect":"H2","variables":{"USER":{"id":7}}}"#))
                .await
                .unwrap();
        assert_eq!(config.dialect, Dialect::H2);
        assert_eq!(config.variables["USER"]["id"], json!(7));
    }

    #[tokio::test]
    async fn missing_fields_default() {
        let SourceConfig(config) = extract(Some("{}")).await.unwrap();
        assert_eq!(config.dialect, Dialect::Postgresql);
        assert!(config.variables.is_empty());
    }

    #[tokio::test]
    async fn missing_header_is_the_default_config() {
        let SourceConfig(config) = extract(None).await.unwrap();
        assert_eq!(config.dialect, Dialect::Postgresql);
        assert!(config.variables.is_empty());
    }

    #[tokio::test]
    async fn malformed_headers_are_bad_requests() {
        assert_eq!(
            extract(Some("not json")).await.unwrap_err(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            extract(Some(r#"{"dialect":"SQLITE"}"#)).await.unwrap_err(),
            StatusCode::BAD_REQUEST
        );
    }
}

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ErrorResponse {
    /// Error details
    pub details: Option<serde_json::Value>,
    /// Error message
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: ErrorResponseType,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorResponseType {
    UncaughtError,
    /// The query graph could not be compiled, e.g. an unsupported function for the dialect
    CompileError,
}

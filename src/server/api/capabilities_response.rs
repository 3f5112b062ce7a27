use indexmap::IndexMap;
use schemars::schema::RootSchema;
use serde::{Deserialize, Serialize};

use crate::sql::{dialect::Dialect, function_signature::FunctionSignature};

#[derive(Debug, Serialize, Deserialize)]
pub struct CapabilitiesResponse {
    pub display_name: String,
    pub release_name: String,
    /// Function signatures each dialect can compile
    pub dialects: IndexMap<Dialect, Vec<FunctionSignature>>,
    pub config_schemas: ConfigSchemaResponse,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigSchemaResponse {
    /// Schema of the `x-rdbms-compiler-config` header
    pub config_schema: RootSchema,
    /// Schema of the `/compile` request body
    pub request_schema: RootSchema,
}

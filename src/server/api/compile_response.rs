use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sql::CompiledQuery;

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct CompileResponse {
    /// The compiled statement, with `:name` placeholders for bound values
    pub sql: String,
    /// Values to bind, by placeholder name
    pub parameters: IndexMap<String, Value>,
    /// Output column names in projection order
    pub columns: Vec<String>,
}

impl From<CompiledQuery> for CompileResponse {
    fn from(compiled: CompiledQuery) -> Self {
        Self {
            sql: compiled.sql,
            parameters: compiled.parameters,
            columns: compiled.columns,
        }
    }
}

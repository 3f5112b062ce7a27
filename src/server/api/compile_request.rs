use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sql::{catalog::Catalog, query_graph::Select};

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct CompileRequest {
    /// Types, attributes, references and enumerations the query is compiled against
    pub catalog: Catalog,
    /// The root select of the query graph
    pub query: Select,
    /// Named parameters referenced by `PARAMETER` variables
    #[serde(default)]
    pub parameters: IndexMap<String, Value>,
}

use axum::Json;
use indexmap::IndexMap;
use schemars::schema_for;
use strum::IntoEnumIterator;

use crate::{
    server::{
        api::{
            capabilities_response::{CapabilitiesResponse, ConfigSchemaResponse},
            compile_request::CompileRequest,
        },
        config::Config,
    },
    sql::{
        dialect::Dialect, function_signature::FunctionSignature,
        rdbms_builder::function_mapper::FunctionMapper,
    },
};

#[axum_macros::debug_handler]
pub async fn get_capabilities() -> Json<CapabilitiesResponse> {
    Json(CapabilitiesResponse {
        display_name: "RDBMS Query Compiler".to_owned(),
        release_name: env!("CARGO_PKG_VERSION").to_owned(),
        dialects: supported_functions(),
        config_schemas: ConfigSchemaResponse {
            config_schema: schema_for!(Config),
            request_schema: schema_for!(CompileRequest),
        },
    })
}

fn supported_functions() -> IndexMap<Dialect, Vec<FunctionSignature>> {
    Dialect::iter()
        .map(|dialect| {
            let signatures = FunctionSignature::iter()
                .filter(|signature| FunctionMapper::supports(*signature, dialect))
                .collect();
            (dialect, signatures)
        })
        .collect()
}

use thiserror::Error;

use crate::sql::{dialect::Dialect, function_signature::FunctionSignature};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompileError {
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Function {signature} is not supported in dialect {dialect}")]
    UnsupportedFunction {
        signature: FunctionSignature,
        dialect: Dialect,
    },

    #[error("Function {signature} is missing required parameter \"{parameter}\"")]
    MissingFunctionParameter {
        signature: FunctionSignature,
        parameter: String,
    },

    #[error("Malformed custom join SQL at offset {offset}: {sql}")]
    MalformedCustomJoin { sql: String, offset: usize },

    #[error("Cannot resolve identifier `{0}` in custom join SQL")]
    UnresolvedIdentifier(String),

    #[error("Type {type_name} does not inherit from {declaring_type}, cannot join its storage")]
    AncestorResolution {
        type_name: String,
        declaring_type: String,
    },

    #[error("Select {0} must project at least one feature")]
    EmptyProjection(String),

    #[error("Unknown node {0}")]
    UnknownNode(String),

    #[error("Unknown type {0}")]
    UnknownType(String),

    #[error("Unknown attribute {attribute} on type {type_name}")]
    UnknownAttribute {
        type_name: String,
        attribute: String,
    },

    #[error("Unknown reference {reference} on type {type_name}")]
    UnknownReference {
        type_name: String,
        reference: String,
    },

    #[error("Unknown enumeration {0}")]
    UnknownEnumeration(String),

    #[error("Value {value} is not a literal of enumeration {enumeration}")]
    InvalidEnumerationValue { enumeration: String, value: String },

    #[error("Cannot resolve variable {name} in category {category}")]
    UnresolvedVariable { category: String, name: String },

    #[error("Feature produces {0} columns where exactly one is required")]
    FeatureArity(usize),

    #[error("Joins {0:?} depend on each other's aliases")]
    JoinCycle(Vec<String>),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

pub type CompileResult<T> = Result<T, CompileError>;

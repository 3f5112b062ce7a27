pub mod ast;
pub mod catalog;
pub mod dialect;
pub mod function_signature;
pub mod query_graph;
pub mod rdbms_builder;

pub use rdbms_builder::{CompileError, CompiledQuery, RdbmsBuilder};

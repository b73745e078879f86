//! # oqlc
//!
//! Compiler backend translating the IR of a high-level object-relational
//! query language into a PostgreSQL SQL tree, plus the source generator
//! that prints it.
//!
//! You probably want to start with [compile_ir_to_sql].
//!
//! For more granular access, refer to this diagram:
//! ```ascii
//!                  IR  (produced by the front-end)
//!                   │
//!   compile_ir_to_sql_tree
//!                   │
//!                   ▼
//!               SQL tree  (pgast)
//!                   │
//!   codegen::generate_source
//!                   │
//!                   ▼
//!                SQL text
//! ```

#![forbid(unsafe_code)]
// Our error type carries a reason enum plus hint strings, which trips the
// default size threshold. We are not performance sensitive on the error
// path.
#![allow(clippy::result_large_err)]

pub use error::{Error, ErrorKind, Reason, WithErrorInfo};

pub mod codegen;
pub mod compiler;
mod error;
pub mod ir;
pub mod pgast;
pub mod types;
pub(crate) mod utils;

pub use compiler::{compile_ir_to_sql_tree, CompileOptions, CompileResult};
pub use compiler::context::OutputFormat;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Compile a root IR statement into SQL text.
///
/// This is a wrapper for:
/// - [compile_ir_to_sql_tree] — lower the IR into a SQL tree
/// - [codegen::generate_source] — print the tree
pub fn compile_ir_to_sql(
    ir_stmt: &ir::Statement,
    options: &CompileOptions,
) -> Result<(String, indexmap::IndexMap<String, compiler::context::ParamMapping>)> {
    let result = compile_ir_to_sql_tree(ir_stmt, options)?;
    let sql = codegen::generate_source(&result.tree)?;
    Ok((sql, result.argmap))
}

/// JSON serialization and deserialization of the IR, for fixtures and
/// embedding.
pub mod json {
    use super::*;

    pub fn from_ir(ir_stmt: &ir::Statement) -> Result<String> {
        serde_json::to_string(ir_stmt).map_err(convert_json_err)
    }

    pub fn to_ir(json: &str) -> Result<ir::Statement> {
        serde_json::from_str(json).map_err(convert_json_err)
    }

    fn convert_json_err(err: serde_json::Error) -> Error {
        Error::new_simple(err.to_string())
    }
}

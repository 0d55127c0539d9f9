//! # docsel
//!
//! Compiles single-expression predicates, projections and orderings, written
//! in a small Python-like expression language or given as compiled closures,
//! into SQL over tables holding one JSON document per row.
//!
//! ## Quick Example
//!
//! ```
//! use docsel::prelude::*;
//!
//! let request = SelectRequest::new("person")
//!     .what("person.gramps_id")
//!     .filter("person.gender == Person.FEMALE and len(person.media_list) > 0")
//!     .order_by("-person.gramps_id");
//! let sql = docsel::compile(&request).unwrap().to_string();
//! assert_eq!(
//!     sql,
//!     "SELECT json_extract(json_data, '$.gramps_id') FROM person \
//!      WHERE ((json_extract(json_data, '$.gender') = 0) \
//!      AND (json_array_length(json_data, '$.media_list') > 0)) \
//!      ORDER BY json_extract(json_data, '$.gramps_id') DESC;"
//! );
//! ```
//!
//! ## Pipeline
//!
//! | Stage | Module |
//! |-------|--------|
//! | closure → text | [`decompiler`] over a [`bytecode`] trace |
//! | text → tree | [`parser`] |
//! | tree → text | [`render`] |
//! | tree → SQL fragment | [`compiler`] |
//! | request → statement | [`assembler`] |
//! | statement → rows | [`engine`] |

use std::sync::OnceLock;

pub mod assembler;
pub mod ast;
pub mod bytecode;
pub mod compiler;
pub mod config;
pub mod decompiler;
pub mod engine;
pub mod env;
pub mod error;
pub mod parser;
pub mod render;

pub mod prelude {
    pub use crate::assembler::{
        CompiledQuery, Compiler, OrderSpec, Projection, Select, SelectRequest, Source,
    };
    pub use crate::ast::*;
    pub use crate::bytecode::{Closure, Instruction, Opcode};
    pub use crate::compiler::Evaluator;
    pub use crate::config::Config;
    pub use crate::decompiler::decompile;
    pub use crate::engine::Store;
    pub use crate::env::{DomainValue, Environment, Tables};
    pub use crate::error::*;
    pub use crate::parser::parse;
}

/// Parse expression text into a tree.
///
/// # Example
///
/// ```
/// let expr = docsel::parse("person.gender == 1").unwrap();
/// assert_eq!(expr.to_string(), "(person.gender == 1)");
/// ```
pub fn parse(input: &str) -> error::SelectResult<ast::Expr> {
    parser::parse(input)
}

/// The process-wide compiler over the built-in genealogy constants and tables.
pub fn default_compiler() -> &'static assembler::Compiler {
    static COMPILER: OnceLock<assembler::Compiler> = OnceLock::new();
    COMPILER.get_or_init(assembler::Compiler::genealogy)
}

/// Compile a request with [`default_compiler`].
pub fn compile(request: &assembler::SelectRequest) -> error::SelectResult<assembler::CompiledQuery> {
    default_compiler().compile(request)
}

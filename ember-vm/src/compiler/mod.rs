// ember-vm - Bytecode compiler and virtual machine for the Ember programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Single-pass bytecode compiler.
//!
//! Tokens stream straight from the scanner into bytecode; there is no AST.
//! Statements are parsed by recursive descent, expressions by a Pratt
//! precedence table. Nested functions compile on a stack of per-function
//! states, which is also how closures resolve their captures.

pub mod codegen;
pub mod types;

pub use codegen::compile;
pub use types::{CompileError, ErrorLocation, FunctionKind, Local, Precedence, UpvalueMeta};

//! The expression runtime: a small typed language standing in for the
//! original system's CEL (`cel-go`) rule expressions, since no CEL crate is
//! part of the teacher's dependency stack. Grounded end-to-end on
//! `expressions.go`/`fn_*.go`: lexer and parser here play the role of
//! `cel.NewEnv`'s grammar, `env.rs`'s `ExpressionEnv` plays the role of
//! `ExpressionEnv`/`EvaluateExpressionWithJqDoc`, and `functions.rs` hosts
//! the function bodies each `fn_*.go` file registers as CEL overloads.

pub mod acipath;
pub mod ast;
pub mod env;
pub mod functions;
pub mod grok;
pub mod lexer;
pub mod parser;

pub use ast::Expr;
pub use env::ExpressionEnv;

//! Syntactic analysis: tokens to an S-expression forest.

mod ast;
mod sexpr_parser;

pub use ast::{Ast, Node};
pub use sexpr_parser::Parser;

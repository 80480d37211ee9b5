//! # Compiler: source text to memory image
//!
//! Three coupled stages, each owning its output and surrendering it to the
//! next by value:
//!
//! ```text
//! source -> tokens -> AST -> IR (+ static data) -> colored IR -> image
//! ```
//!
//! The IR stage introduces an unbounded supply of abstract variables; the
//! register allocator assigns each one a physical register or a memory home;
//! codegen honors that coloring, multiplying instructions as operand
//! locations demand, and patches jump targets once the layout is final.

pub mod codegen;
pub mod image;
pub mod ir;
pub mod regalloc;

pub use codegen::{HwOp, ENCODED_NOP};
pub use image::{words_from_bytes, Image};
pub use ir::{IrGenerator, IrProgram, MMIO_ADDR};

use crate::error::Result;
use crate::lexer::Scanner;
use crate::parser::Parser;

/// Run the whole lowering pipeline on a source string
pub fn compile(source: &str) -> Result<Image> {
    let tokens = Scanner::new(source).scan_tokens()?;
    tracing::debug!(tokens = tokens.len(), "lexing complete");

    let ast = Parser::new(tokens).parse()?;
    tracing::debug!(roots = ast.roots.len(), "parsing complete");

    let ir = IrGenerator::new().generate(&ast)?;
    let image = codegen::generate(ir)?;
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_smoke() {
        let image = compile("(write-mem 3 65)").unwrap();
        assert!(image.data_break >= 4);
        assert!(image.words.len() > image.data_break as usize);
    }

    #[test]
    fn test_compile_reports_first_error() {
        assert!(compile("(set x (unknown-fn 1))").is_err());
    }
}

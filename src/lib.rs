//! # wordlisp — a Lisp toolchain for a 32-bit word-addressed processor
//!
//! A three-stage compiler that lowers parenthesized source text to a binary
//! memory image, a cycle-accurate model of the pipelined processor that
//! executes that image, and a disassembler that pretty-prints it.
//!
//! ## Architecture
//!
//! ```text
//! source → Scanner → tokens → Parser → AST → IrGenerator → IR
//!        → register allocation → codegen → Image → Processor
//! ```
//!
//! The IR is three-address code over an unbounded supply of abstract
//! variables. A linear-scan allocator colors each variable onto one of 62
//! general-purpose registers or spills it into the data segment; codegen
//! honors the coloring, expanding each IR instruction into zero, one, or
//! several hardware words, and patches jump targets once the final layout
//! is known. The image boots at address 0 through a planted entry jump.
//!
//! ## Quick start
//!
//! ```rust
//! use wordlisp::{compile, Processor};
//!
//! # fn main() -> wordlisp::Result<()> {
//! let image = compile("(print-str \"Hi\")")?;
//!
//! let mut output = Vec::new();
//! let mut processor = Processor::new(&image.words, std::io::empty(), &mut output);
//! processor.run()?;
//!
//! assert_eq!(output, b"Hi");
//! # Ok(())
//! # }
//! ```
//!
//! ## The machine
//!
//! 64 registers of 32 bits (registers 62 and 63 are compiler scratches),
//! word-addressed memory, 14 opcodes, and a four-stage pipeline with a
//! two-tick flush on taken jumps. Memory word 3 is a byte-wide MMIO port
//! bridged to the host's stdin/stdout.

pub mod compiler;
pub mod disasm;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod processor;

pub use compiler::{compile, words_from_bytes, Image};
pub use error::{CodegenError, CompileError, Error, LexError, ParseError, Result, SimError};
pub use lexer::{Scanner, Token, TokenKind};
pub use parser::{Ast, Node, Parser};
pub use processor::{Processor, Tick};

//! Error types for the wordlisp toolchain.
//!
//! Each pipeline stage has its own error enum; the crate-level [`Error`]
//! wraps them all so the binaries can bubble any failure up with `?`.
//! Every error is fatal to the current invocation — no stage recovers.

use thiserror::Error;

/// Errors produced while turning source text into tokens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LexError {
    /// A word began like an integer but did not parse as one.
    ///
    /// **Example:** `12x4`, or a literal outside the 32-bit signed range.
    #[error("line {line}: bad integer literal '{text}': {reason}")]
    BadInteger {
        /// Line the word started on (1-indexed)
        line: usize,
        /// The offending word, verbatim
        text: String,
        /// What the integer parser had to say
        reason: String,
    },

    /// The input ended inside a `"…"` string literal.
    #[error("line {line}: end of input before closing string literal")]
    UnterminatedString {
        /// Line the literal started on (1-indexed)
        line: usize,
    },
}

/// Errors produced while shaping tokens into an S-expression forest.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Something other than `(` appeared at the top level.
    #[error("line {line}: only call expressions are allowed at the top level")]
    NonCallAtRoot {
        /// Line of the offending token
        line: usize,
    },

    /// `()` with no children.
    #[error("line {line}: empty parens make no sense")]
    EmptyParens {
        /// Line of the closing paren
        line: usize,
    },

    /// Too many `)`, or unclosed `(` at end of input.
    #[error("line {line}: unbalanced parens")]
    UnbalancedParens {
        /// Line of the stray closer, or the last line for unclosed opens
        line: usize,
    },
}

/// Errors produced while lowering the AST to IR.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// An identifier was referenced before any `set` bound it.
    #[error("no variable named '{0}' was declared")]
    UndeclaredVariable(String),

    /// The call head names no intrinsic or builtin.
    #[error("'{0}' is not a known function")]
    UnknownFunction(String),

    /// An intrinsic or builtin was called with the wrong shape.
    #[error("bad syntax for '{form}': expected {usage}")]
    BadIntrinsicSyntax {
        /// The form that was misused
        form: String,
        /// Human-readable usage, e.g. `(set NAME EXPR)`
        usage: String,
    },

    /// The call head is not an identifier.
    #[error("function name must be an identifier (indirect calls are unsupported)")]
    IndirectCall,

    /// `(progn)` with no arguments has no value to return.
    #[error("progn needs at least one argument")]
    EmptyProgn,
}

/// Errors produced while emitting hardware instructions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodegenError {
    /// An address or jump target does not fit its instruction field.
    #[error("address {value:#x} does not fit in the {bits}-bit {field} field")]
    ImmediateOverflow {
        /// Which instruction field overflowed (`memop`, `jmp`, `jif`)
        field: &'static str,
        /// Declared width of that field
        bits: u32,
        /// The value that did not fit
        value: u32,
    },
}

/// Errors produced by the processor model.
#[derive(Error, Debug)]
pub enum SimError {
    /// The fetched word decodes to no known instruction — malformed image.
    #[error("bad opcode {opcode:#x} in word {word:#010x} fetched from {addr:#x}")]
    BadOpcode {
        /// Low 4 bits of the word
        opcode: u32,
        /// The whole offending word
        word: u32,
        /// Word address it was fetched from
        addr: u32,
    },

    /// The MMIO output stream rejected a byte.
    #[error("mmio: {0}")]
    Io(#[from] std::io::Error),
}

/// Any failure in the toolchain.
#[derive(Error, Debug)]
pub enum Error {
    /// Lexer failure
    #[error(transparent)]
    Lex(#[from] LexError),
    /// Parser failure
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// IR lowering failure
    #[error(transparent)]
    Compile(#[from] CompileError),
    /// Hardware emission failure
    #[error(transparent)]
    Codegen(#[from] CodegenError),
    /// Simulation failure
    #[error(transparent)]
    Sim(#[from] SimError),
    /// Host filesystem failure
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    /// An image file that cannot be a word array
    #[error("malformed image: {0}")]
    BadImage(String),
}

/// Result type for wordlisp operations.
pub type Result<T> = std::result::Result<T, Error>;

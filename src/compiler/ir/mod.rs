//! # Intermediate representation
//!
//! The IR is a linear sequence of three-address instructions over an
//! unbounded supply of abstract variables. It deliberately is *not* SSA:
//! variables may be assigned many times, and jumps carry IR-code indices
//! patched in place rather than reified labels.
//!
//! ```text
//! ir/
//! ├── mod.rs          # module definition and re-exports
//! ├── instruction.rs  # Var, Value, Op, Insn and the operand-validity table
//! ├── program.rs      # IrProgram (code + data + variable count)
//! └── generator.rs    # IrGenerator: AST -> IR, intrinsics and builtins
//! ```

mod generator;
mod instruction;
mod program;

pub use generator::{IrGenerator, MMIO_ADDR, RESERVED_DATA_WORDS, UNPATCHED_JUMP_MAGIC};
pub use instruction::{Insn, Op, Value, Var};
pub use program::IrProgram;

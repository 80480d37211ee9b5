//! IR instruction definitions

/// Abstract variable (unbounded supply, colored onto registers or memory
/// during codegen)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Var(pub u32);

/// Operand of an IR instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    /// 32-bit signed constant
    Const(i32),
    /// Abstract variable reference
    Var(Var),
}

/// IR operations (three-address code).
///
/// These closely match the target instruction set, but operate on abstract
/// values: there are no registers yet, and loads/stores only happen when the
/// program asks for them. Codegen later colors variables onto registers and
/// inserts spills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Stop the processor. No operands.
    Halt,
    /// `dest <- src1`. No src2.
    Mov,
    /// `dest <- memory[src1]`. No src2.
    Load,
    /// `memory[src1] <- src2`. No dest.
    Store,
    /// `dest <- src1 + src2`
    Add,
    /// `dest <- src1 - src2`
    Sub,
    /// `dest <- src1 * src2`
    Mul,
    /// `dest <- src1 / src2`
    Div,
    /// `dest <- src1 % src2`
    Mod,
    /// `dest <- (src1 == src2) ? 1 : 0`
    CmpEqu,
    /// `dest <- (src1 > src2) ? 1 : 0`
    CmpGt,
    /// `dest <- (src1 < src2) ? 1 : 0`
    CmpLt,
    /// If `src1 != 0`, jump to the IR-code index held in `src2` (always a
    /// `Const`). No dest.
    Jump,
}

/// A single IR instruction.
///
/// Which of the three operand slots are meaningful depends on `op`; the
/// `has_valid_*` predicates are the authority (lifetime analysis relies on
/// them rather than on the `Option`s).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Insn {
    /// The operation
    pub op: Op,
    /// Destination variable, when the op writes one
    pub dest: Option<Var>,
    /// First source operand
    pub src1: Option<Value>,
    /// Second source operand
    pub src2: Option<Value>,
}

impl Insn {
    /// Does this op write a destination variable?
    pub fn has_valid_dest(&self) -> bool {
        !matches!(self.op, Op::Halt | Op::Jump | Op::Store)
    }

    /// Does this op read src1?
    pub fn has_valid_src1(&self) -> bool {
        self.op != Op::Halt
    }

    /// Does this op read src2?
    pub fn has_valid_src2(&self) -> bool {
        !matches!(self.op, Op::Halt | Op::Mov | Op::Load)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Value::Const(c) => write!(f, "{}", c),
            Value::Var(v) => write!(f, "v{}", v.0),
        }
    }
}

impl std::fmt::Display for Insn {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self.op)?;
        if let Some(dest) = self.dest {
            write!(f, " v{}", dest.0)?;
        }
        if let Some(src1) = self.src1 {
            write!(f, " {}", src1)?;
        }
        if let Some(src2) = self.src2 {
            write!(f, " {}", src2)?;
        }
        Ok(())
    }
}

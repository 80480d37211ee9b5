//! AST to IR lowering.
//!
//! Walks the S-expression forest and emits three-address IR, creating
//! abstract variables as needed. Intrinsics receive raw AST nodes because
//! they decide what gets evaluated; builtins receive already-evaluated
//! values.

use std::collections::HashMap;

use super::instruction::{Insn, Op, Value, Var};
use super::program::IrProgram;
use crate::error::CompileError;
use crate::parser::{Ast, Node};

/// Word address of the memory-mapped I/O port
pub const MMIO_ADDR: u32 = 0x3;

/// Number of low data words the image always reserves: the entry-stub slot
/// at 0, two prefetch guards, and the MMIO word itself.
pub const RESERVED_DATA_WORDS: usize = 4;

/// Placeholder target of a forward jump that has not been patched yet.
/// Distinguishable from every legal IR-code index.
pub const UNPATCHED_JUMP_MAGIC: i32 = 0x7FFF_DEAD;

/// Index of an already-emitted jump instruction awaiting a patch
type JumpId = usize;

/// IR-code index used as a backward jump target
type Label = i32;

/// AST-to-IR transformer
pub struct IrGenerator {
    data: Vec<u32>,
    code: Vec<Insn>,
    next_variable_id: u32,
    /// Name table: `set` allocates a variable on first use of a name and
    /// reuses it afterwards. Keys are owned copies of the AST identifiers.
    variables: HashMap<String, Var>,
}

impl IrGenerator {
    /// Creates a generator with the reserved low data words in place
    pub fn new() -> Self {
        IrGenerator {
            data: vec![0; RESERVED_DATA_WORDS],
            code: Vec::new(),
            next_variable_id: 0,
            variables: HashMap::new(),
        }
    }

    /// Lowers the whole forest and appends the final halt
    pub fn generate(mut self, ast: &Ast) -> Result<IrProgram, CompileError> {
        for root in &ast.roots {
            self.compile_node(root)?;
        }
        self.code.push(Insn {
            op: Op::Halt,
            dest: None,
            src1: None,
            src2: None,
        });

        tracing::debug!(
            insns = self.code.len(),
            data_words = self.data.len(),
            variables = self.next_variable_id,
            "ir lowering complete"
        );

        Ok(IrProgram {
            code: self.code,
            data: self.data,
            num_variables: self.next_variable_id,
        })
    }

    fn new_var(&mut self) -> Var {
        let var = Var(self.next_variable_id);
        self.next_variable_id += 1;
        var
    }

    // =======================================================================
    // Emitting single instructions. Thin wrappers around `code.push()`, but
    // returning the destination makes the lowering code read naturally.

    fn emit(&mut self, op: Op, dest: Var, src1: Value, src2: Value) -> Var {
        self.code.push(Insn {
            op,
            dest: Some(dest),
            src1: Some(src1),
            src2: Some(src2),
        });
        dest
    }

    fn emit_mov(&mut self, dest: Var, src: Value) -> Var {
        self.code.push(Insn {
            op: Op::Mov,
            dest: Some(dest),
            src1: Some(src),
            src2: None,
        });
        dest
    }

    fn emit_load(&mut self, dest: Var, addr: Value) -> Var {
        self.code.push(Insn {
            op: Op::Load,
            dest: Some(dest),
            src1: Some(addr),
            src2: None,
        });
        dest
    }

    fn emit_store(&mut self, value: Value, addr: Value) -> Value {
        self.code.push(Insn {
            op: Op::Store,
            dest: None,
            src1: Some(addr),
            src2: Some(value),
        });
        value
    }

    // =======================================================================
    // Emitting jumps.
    //
    // Forward jumps are emitted first and patched once the target is known:
    //
    //   let fwd = self.emit_unpatched_jump(cond);
    //   /* more code */
    //   self.patch_jump_to_here(fwd);
    //
    // Backward jumps record the label first and use it directly:
    //
    //   let top = self.label_here();
    //   /* more code */
    //   self.emit_jump_to(top, cond);

    fn label_here(&self) -> Label {
        self.code.len() as Label
    }

    fn emit_jump_to(&mut self, label: Label, condition: Value) {
        self.code.push(Insn {
            op: Op::Jump,
            dest: None,
            src1: Some(condition),
            src2: Some(Value::Const(label)),
        });
    }

    fn emit_unpatched_jump(&mut self, condition: Value) -> JumpId {
        let id = self.code.len();
        self.emit_jump_to(UNPATCHED_JUMP_MAGIC, condition);
        id
    }

    fn patch_jump_to_here(&mut self, id: JumpId) {
        let here = self.label_here();
        let slot = &mut self.code[id].src2;
        assert_eq!(
            *slot,
            Some(Value::Const(UNPATCHED_JUMP_MAGIC)),
            "patching a jump that was already patched"
        );
        *slot = Some(Value::Const(here));
    }

    // =======================================================================
    // Intrinsics. These take AST nodes, not values, because they contain
    // logic as to what gets evaluated or not.

    fn emit_set(&mut self, name: &str, value_expr: &Node) -> Result<Value, CompileError> {
        // The name is bound before the value expression is compiled, so the
        // expression may refer to the variable it is initializing
        let dest = match self.variables.get(name) {
            Some(&var) => var,
            None => {
                let var = self.new_var();
                self.variables.insert(name.to_string(), var);
                var
            }
        };
        let value = self.compile_node(value_expr)?;
        Ok(Value::Var(self.emit_mov(dest, value)))
    }

    fn emit_if(
        &mut self,
        cond_expr: &Node,
        then_expr: &Node,
        else_expr: &Node,
    ) -> Result<Value, CompileError> {
        let result = self.new_var();

        let cond = self.compile_node(cond_expr)?;
        let jump_to_then = self.emit_unpatched_jump(cond);

        let else_value = self.compile_node(else_expr)?;
        self.emit_mov(result, else_value);
        let jump_to_end = self.emit_unpatched_jump(Value::Const(1));

        self.patch_jump_to_here(jump_to_then);
        let then_value = self.compile_node(then_expr)?;
        self.emit_mov(result, then_value);

        self.patch_jump_to_here(jump_to_end);
        Ok(Value::Var(result))
    }

    fn emit_while(&mut self, cond_expr: &Node, body_expr: &Node) -> Result<Value, CompileError> {
        let top = self.label_here();
        let cond = self.compile_node(cond_expr)?;
        let inverse = self.new_var();
        self.emit(Op::CmpEqu, inverse, cond, Value::Const(0));
        let jump_to_end = self.emit_unpatched_jump(Value::Var(inverse));

        self.compile_node(body_expr)?;
        self.emit_jump_to(top, Value::Const(1));

        self.patch_jump_to_here(jump_to_end);
        Ok(Value::Const(0))
    }

    fn emit_alloc_static(&mut self, amount: &Node) -> Result<Value, CompileError> {
        let bad_syntax = || CompileError::BadIntrinsicSyntax {
            form: "alloc-static".to_string(),
            usage: "(alloc-static POSITIVE-CONSTANT)".to_string(),
        };
        let &Node::Int(amount) = amount else {
            return Err(bad_syntax());
        };
        if amount <= 0 {
            return Err(bad_syntax());
        }
        let address = self.data.len() as i32;
        self.data.resize(self.data.len() + amount as usize, 0);
        Ok(Value::Const(address))
    }

    fn maybe_emit_intrinsic(
        &mut self,
        func_name: &str,
        args: &[Node],
    ) -> Result<Option<Value>, CompileError> {
        match func_name {
            "set" => {
                // Bind a variable to a value, and return this value
                let [Node::Ident(name), value_expr] = args else {
                    return Err(CompileError::BadIntrinsicSyntax {
                        form: "set".to_string(),
                        usage: "(set NAME EXPR)".to_string(),
                    });
                };
                self.emit_set(name, value_expr).map(Some)
            }
            "if" => {
                // Depending on the condition, only evaluate one of the arms
                let [cond, then_expr, else_expr] = args else {
                    return Err(CompileError::BadIntrinsicSyntax {
                        form: "if".to_string(),
                        usage: "(if COND-EXPR THEN-EXPR ELSE-EXPR)".to_string(),
                    });
                };
                self.emit_if(cond, then_expr, else_expr).map(Some)
            }
            "while" => {
                // Evaluate the body until the condition goes false; always 0
                let [cond, body] = args else {
                    return Err(CompileError::BadIntrinsicSyntax {
                        form: "while".to_string(),
                        usage: "(while COND-EXPR LOOP-EXPR)".to_string(),
                    });
                };
                self.emit_while(cond, body).map(Some)
            }
            "alloc-static" => {
                let [amount] = args else {
                    return Err(CompileError::BadIntrinsicSyntax {
                        form: "alloc-static".to_string(),
                        usage: "(alloc-static POSITIVE-CONSTANT)".to_string(),
                    });
                };
                self.emit_alloc_static(amount).map(Some)
            }
            _ => Ok(None),
        }
    }

    // =======================================================================
    // Builtins. These unconditionally evaluate all arguments first.

    fn maybe_emit_lassoc(
        &mut self,
        func_name: &str,
        inputs: &[Value],
    ) -> Result<Option<Value>, CompileError> {
        let op = match func_name {
            "+" => Op::Add,
            "*" => Op::Mul,
            _ => return Ok(None),
        };

        if inputs.len() < 2 {
            return Err(CompileError::BadIntrinsicSyntax {
                form: func_name.to_string(),
                usage: format!("at least 2 arguments, got {}", inputs.len()),
            });
        }

        let mut latest = inputs[0];
        for &input in &inputs[1..] {
            let dest = self.new_var();
            latest = Value::Var(self.emit(op, dest, latest, input));
        }
        Ok(Some(latest))
    }

    fn maybe_emit_binop(
        &mut self,
        func_name: &str,
        inputs: &[Value],
    ) -> Result<Option<Value>, CompileError> {
        let op = match func_name {
            "-" => Op::Sub,
            "/" => Op::Div,
            "%" => Op::Mod,
            "=" => Op::CmpEqu,
            ">" => Op::CmpGt,
            "<" => Op::CmpLt,
            _ => return Ok(None),
        };

        let &[lhs, rhs] = inputs else {
            return Err(CompileError::BadIntrinsicSyntax {
                form: func_name.to_string(),
                usage: format!("exactly 2 arguments, got {}", inputs.len()),
            });
        };

        let dest = self.new_var();
        Ok(Some(Value::Var(self.emit(op, dest, lhs, rhs))))
    }

    /// `str` points at a length-prefixed word sequence; emit a loop that
    /// stores each word to the MMIO address.
    fn emit_print_str(&mut self, str_value: Value) -> Value {
        let counter = self.new_var();
        self.emit_load(counter, str_value);
        let pointer = self.new_var();
        self.emit(Op::Add, pointer, str_value, Value::Const(1));

        let is_zero = self.new_var();
        self.emit(Op::CmpEqu, is_zero, Value::Var(counter), Value::Const(0));
        let skip_loop = self.emit_unpatched_jump(Value::Var(is_zero));

        let top = self.label_here();
        let character = self.new_var();
        self.emit_load(character, Value::Var(pointer));
        self.emit_store(Value::Var(character), Value::Const(MMIO_ADDR as i32));

        let tmp = self.new_var();
        self.emit(Op::Add, tmp, Value::Var(pointer), Value::Const(1));
        self.emit_mov(pointer, Value::Var(tmp));

        self.emit(Op::Sub, tmp, Value::Var(counter), Value::Const(1));
        self.emit_mov(counter, Value::Var(tmp));
        self.emit_jump_to(top, Value::Var(counter));

        self.patch_jump_to_here(skip_loop);
        Value::Const(0)
    }

    // =======================================================================
    // Compilation of whole expressions.

    fn compile_node(&mut self, node: &Node) -> Result<Value, CompileError> {
        match node {
            Node::Ident(name) => match self.variables.get(name) {
                Some(&var) => Ok(Value::Var(var)),
                None => Err(CompileError::UndeclaredVariable(name.clone())),
            },
            Node::Int(value) => Ok(Value::Const(*value)),
            Node::Str(literal) => {
                // One word for the byte length, then one word per byte;
                // the value of the expression is the address of the length
                let address = self.data.len() as i32;
                self.data.reserve(1 + literal.len());
                self.data.push(literal.len() as u32);
                for byte in literal.bytes() {
                    self.data.push(byte as u32);
                }
                Ok(Value::Const(address))
            }
            Node::Call(children) => self.compile_call(children),
        }
    }

    fn compile_call(&mut self, terms: &[Node]) -> Result<Value, CompileError> {
        // The parser rejects empty parens, so there is always a head
        let (func, arguments) = terms.split_first().expect("calls have at least one child");

        let Node::Ident(func_name) = func else {
            return Err(CompileError::IndirectCall);
        };

        // Intrinsics need access to the AST, so check for them before
        // evaluating arguments
        if let Some(value) = self.maybe_emit_intrinsic(func_name, arguments)? {
            return Ok(value);
        }

        // Evaluate arguments left to right
        let mut inputs = Vec::with_capacity(arguments.len());
        for arg in arguments {
            inputs.push(self.compile_node(arg)?);
        }

        if let Some(value) = self.maybe_emit_binop(func_name, &inputs)? {
            return Ok(value);
        }
        if let Some(value) = self.maybe_emit_lassoc(func_name, &inputs)? {
            return Ok(value);
        }

        // Kind of intrinsics, but these do evaluate all their arguments
        match func_name.as_str() {
            "progn" => inputs.last().copied().ok_or(CompileError::EmptyProgn),
            "read-mem" => {
                let &[addr] = inputs.as_slice() else {
                    return Err(CompileError::BadIntrinsicSyntax {
                        form: "read-mem".to_string(),
                        usage: "(read-mem ADDR)".to_string(),
                    });
                };
                let dest = self.new_var();
                Ok(Value::Var(self.emit_load(dest, addr)))
            }
            "write-mem" => {
                let &[addr, value] = inputs.as_slice() else {
                    return Err(CompileError::BadIntrinsicSyntax {
                        form: "write-mem".to_string(),
                        usage: "(write-mem ADDR VALUE)".to_string(),
                    });
                };
                Ok(self.emit_store(value, addr))
            }
            "print-str" => {
                let &[str_value] = inputs.as_slice() else {
                    return Err(CompileError::BadIntrinsicSyntax {
                        form: "print-str".to_string(),
                        usage: "(print-str STRING)".to_string(),
                    });
                };
                Ok(self.emit_print_str(str_value))
            }
            _ => Err(CompileError::UnknownFunction(func_name.clone())),
        }
    }
}

impl Default for IrGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Scanner;
    use crate::parser::Parser;

    fn lower(source: &str) -> IrProgram {
        try_lower(source).unwrap()
    }

    fn try_lower(source: &str) -> Result<IrProgram, CompileError> {
        let tokens = Scanner::new(source).scan_tokens().unwrap();
        let ast = Parser::new(tokens).parse().unwrap();
        IrGenerator::new().generate(&ast)
    }

    #[test]
    fn test_reserved_data_words() {
        let ir = lower("(set x 1)");
        assert_eq!(&ir.data[..RESERVED_DATA_WORDS], &[0, 0, 0, 0]);
        assert!((MMIO_ADDR as usize) < RESERVED_DATA_WORDS);
    }

    #[test]
    fn test_final_halt_appended() {
        let ir = lower("(set x 1)");
        assert_eq!(ir.code.last().unwrap().op, Op::Halt);
    }

    #[test]
    fn test_set_reuses_variable() {
        let ir = lower("(set x 1) (set x 2) (set y 3)");
        // x and y, no extra temporaries
        assert_eq!(ir.num_variables, 2);
        let movs: Vec<_> = ir.code.iter().filter(|i| i.op == Op::Mov).collect();
        assert_eq!(movs.len(), 3);
        assert_eq!(movs[0].dest, movs[1].dest);
        assert_ne!(movs[0].dest, movs[2].dest);
    }

    #[test]
    fn test_undeclared_variable() {
        assert_eq!(
            try_lower("(set x y)").unwrap_err(),
            CompileError::UndeclaredVariable("y".to_string())
        );
    }

    #[test]
    fn test_unknown_function() {
        assert_eq!(
            try_lower("(frobnicate 1)").unwrap_err(),
            CompileError::UnknownFunction("frobnicate".to_string())
        );
    }

    #[test]
    fn test_indirect_call_rejected() {
        assert_eq!(try_lower("((+ 1 2) 3)").unwrap_err(), CompileError::IndirectCall);
    }

    #[test]
    fn test_empty_progn() {
        assert_eq!(try_lower("(progn)").unwrap_err(), CompileError::EmptyProgn);
    }

    #[test]
    fn test_lassoc_folds_left() {
        let ir = lower("(set r (+ 1 2 3))");
        let adds: Vec<_> = ir.code.iter().filter(|i| i.op == Op::Add).collect();
        assert_eq!(adds.len(), 2);
        // (1+2) feeds the second add
        assert_eq!(adds[0].src1, Some(Value::Const(1)));
        assert_eq!(adds[0].src2, Some(Value::Const(2)));
        assert_eq!(adds[1].src1, adds[0].dest.map(Value::Var));
        assert_eq!(adds[1].src2, Some(Value::Const(3)));
    }

    #[test]
    fn test_no_unpatched_jumps_survive() {
        let ir = lower(
            "(set n 5) (while (> n 0) (progn (if (= n 3) (write-mem 3 n) (set n n)) (set n (- n 1))))",
        );
        for insn in &ir.code {
            if insn.op == Op::Jump {
                let Some(Value::Const(target)) = insn.src2 else {
                    panic!("jump src2 must be a constant");
                };
                assert_ne!(target, UNPATCHED_JUMP_MAGIC);
                assert!((0..=ir.code.len() as i32).contains(&target));
            }
        }
    }

    #[test]
    fn test_if_shape() {
        // Forward jump to THEN on cond, ELSE arm first, jump over THEN arm
        let ir = lower("(set r (if 1 10 20))");
        let jumps: Vec<(usize, &Insn)> = ir
            .code
            .iter()
            .enumerate()
            .filter(|(_, i)| i.op == Op::Jump)
            .collect();
        assert_eq!(jumps.len(), 2);
        let (cond_pos, cond_jump) = jumps[0];
        let (end_pos, end_jump) = jumps[1];
        assert_eq!(cond_jump.src1, Some(Value::Const(1)));
        // Conditional jump lands just past the unconditional one (THEN arm)
        assert_eq!(cond_jump.src2, Some(Value::Const(end_pos as i32 + 1)));
        // The ELSE mov sits between the two jumps
        assert!(cond_pos < end_pos);
    }

    #[test]
    fn test_while_shape() {
        let ir = lower("(set n 2) (while (> n 0) (set n (- n 1)))");
        // The loop inverts the condition with cmp_equ against 0
        assert!(ir
            .code
            .iter()
            .any(|i| i.op == Op::CmpEqu && i.src2 == Some(Value::Const(0))));
        // Exactly one backward jump (to the loop top) and one exit jump
        let jumps: Vec<(usize, &Insn)> = ir
            .code
            .iter()
            .enumerate()
            .filter(|(_, i)| i.op == Op::Jump)
            .collect();
        assert_eq!(jumps.len(), 2);
        let back = jumps
            .iter()
            .find(|(pos, i)| matches!(i.src2, Some(Value::Const(t)) if (t as usize) < *pos))
            .expect("while must emit a backward jump");
        assert_eq!(back.1.src1, Some(Value::Const(1)));
    }

    #[test]
    fn test_string_literal_layout() {
        let ir = lower("(print-str \"Hi\")");
        let base = RESERVED_DATA_WORDS;
        assert_eq!(ir.data[base], 2);
        assert_eq!(ir.data[base + 1], u32::from(b'H'));
        assert_eq!(ir.data[base + 2], u32::from(b'i'));
    }

    #[test]
    fn test_empty_string_literal_occupies_one_word() {
        let ir = lower("(print-str \"\")");
        assert_eq!(ir.data.len(), RESERVED_DATA_WORDS + 1);
        assert_eq!(ir.data[RESERVED_DATA_WORDS], 0);
    }

    #[test]
    fn test_alloc_static_reserves_words() {
        let ir = lower("(set p (alloc-static 8))");
        assert_eq!(ir.data.len(), RESERVED_DATA_WORDS + 8);
        // The mov binds p to the start address
        let mov = ir.code.iter().find(|i| i.op == Op::Mov).unwrap();
        assert_eq!(mov.src1, Some(Value::Const(RESERVED_DATA_WORDS as i32)));
    }

    #[test]
    fn test_alloc_static_requires_positive_literal() {
        assert!(matches!(
            try_lower("(set p (alloc-static 0))").unwrap_err(),
            CompileError::BadIntrinsicSyntax { .. }
        ));
        assert!(matches!(
            try_lower("(set p (alloc-static x))").unwrap_err(),
            CompileError::BadIntrinsicSyntax { .. }
        ));
    }

    #[test]
    fn test_write_mem_returns_value() {
        let ir = lower("(set x (write-mem 3 65))");
        let mov = ir.code.iter().find(|i| i.op == Op::Mov).unwrap();
        assert_eq!(mov.src1, Some(Value::Const(65)));
    }

    #[test]
    fn test_ir_well_formedness() {
        let ir = lower(
            "(set s \"abc\") (print-str s) (set i 0) \
             (while (< i 3) (progn (write-mem 3 (+ 48 i)) (set i (+ i 1))))",
        );
        for insn in &ir.code {
            assert_eq!(insn.dest.is_some(), insn.has_valid_dest(), "{insn}");
            assert_eq!(insn.src1.is_some(), insn.has_valid_src1(), "{insn}");
            assert_eq!(insn.src2.is_some(), insn.has_valid_src2(), "{insn}");
            for value in [insn.dest.map(Value::Var), insn.src1, insn.src2]
                .into_iter()
                .flatten()
            {
                if let Value::Var(var) = value {
                    assert!(var.0 < ir.num_variables);
                }
            }
        }
    }
}

//! # Pipelined processor model
//!
//! Four logical stages — fetch, decode, execute, memory — simulated as one
//! combinational step per tick with explicit ordering, so the observable
//! behavior matches a pipelined implementation: an instruction is fetched on
//! one tick, decoded on the next, and executes (register read, ALU, memory
//! operation, writeback) on the tick after that.
//!
//! Taken jumps leave two wrong-path instructions in flight; the decode logic
//! flushes them by setting a two-tick stall that masks their effectful
//! control bits. The halt signal is masked along with them, so a halt close
//! behind a hazard terminates up to two ticks late — matching the hardware.
//!
//! Real hardware shares one memory port between instruction fetch and data
//! access, which is why compiled images put two nops in front of every
//! memop. This model gives fetch its own port and merely tolerates the nops.

mod control;

pub use control::{AluOp, BadOp, Ctrl, FetchSel, OperandSel};

use crate::compiler::{ENCODED_NOP, MMIO_ADDR};
use crate::error::SimError;
use control::decode;
use std::io::{Read, Write};

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// The processor wants more ticks
    KeepGoing,
    /// An unmasked halt was observed
    Halted,
}

/// The memory port latches
#[derive(Debug, Clone, Copy, Default)]
struct MemPort {
    rdata: u32,
}

/// The processor: architectural state plus pipeline latches.
///
/// Generic over the MMIO byte streams so tests can run on in-memory buffers
/// while the simulator binary plugs in stdin/stdout.
pub struct Processor<I, O> {
    /// Word-addressed memory, sized to the loaded image
    mem: Vec<u32>,
    /// Register file; writes land at end of tick
    regs: [u32; 64],
    /// Address the instruction port reads this tick; chosen last tick
    fetch_head: u32,
    /// Word fetched last tick, decoded this tick (with its address)
    fetched: (u32, u32),
    /// Control signals decoded last tick, executing this tick
    next_ctrl: Ctrl,
    mem_port: MemPort,
    input: I,
    output: O,
    ticks: u64,
}

impl<I: Read, O: Write> Processor<I, O> {
    /// Load an image and prime the pipeline.
    ///
    /// The fetch pointer starts at -1 (wrapping to 0 on the first increment)
    /// and the latches hold the canonical nop, so the first ticks execute
    /// primers while the entry jump travels down the pipeline.
    pub fn new(image: &[u32], input: I, output: O) -> Self {
        Processor {
            mem: image.to_vec(),
            regs: [0; 64],
            fetch_head: u32::MAX,
            fetched: (ENCODED_NOP, u32::MAX),
            next_ctrl: decode(ENCODED_NOP, u32::MAX, &[0; 64]),
            mem_port: MemPort::default(),
            input,
            output,
            ticks: 0,
        }
    }

    /// Ticks elapsed so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Register file snapshot (for tests and tracing)
    pub fn registers(&self) -> &[u32; 64] {
        &self.regs
    }

    /// Word-addressed view of memory
    pub fn memory(&self) -> &[u32] {
        &self.mem
    }

    /// Advance the pipeline by one tick
    pub fn advance_tick(&mut self) -> Result<Tick, SimError> {
        // 1. Promote the decoded signals. A stalled instruction is on the
        //    wrong path: mask everything effectful and force sequential fetch.
        let mut ctrl = self.next_ctrl;
        let masked = ctrl.stall > 0;
        if masked {
            ctrl.mem_read = false;
            ctrl.mem_write = false;
            ctrl.dest_reg_write = false;
            ctrl.halt = false;
            ctrl.doing_jif = false;
            ctrl.sel_fetch_head = FetchSel::Increment;
        }
        if let Some(bad) = ctrl.invalid {
            if !masked {
                return Err(SimError::BadOpcode {
                    opcode: bad.opcode,
                    word: bad.word,
                    addr: bad.addr,
                });
            }
        }

        // 2. Memory. The data port acts on the address and write data that
        //    decode latched; the instruction port reads at the head chosen
        //    last tick. Out-of-range fetches return the primer nop, which
        //    only happens on wrong paths and the boot tick.
        if ctrl.mem_read {
            self.mem_port.rdata = self.read_mem(ctrl.mem_addr)?;
        }
        if ctrl.mem_write {
            self.write_mem(ctrl.mem_addr, ctrl.mem_wdata)?;
        }
        let fetched_now = (
            self.mem
                .get(self.fetch_head as usize)
                .copied()
                .unwrap_or(ENCODED_NOP),
            self.fetch_head,
        );

        // 3. Read source registers
        let src1_val = self.resolve_operand(ctrl.src1);
        let src2_val = self.resolve_operand(ctrl.src2);

        // 4. Decode last tick's fetched instruction. A taken control
        //    transfer leaves two wrong-path instructions in flight (one
        //    decoded this very step, one in the fetch latch), so it flushes
        //    them with a two-tick stall.
        let (word, word_addr) = self.fetched;
        let mut next_ctrl = decode(word, word_addr, &self.regs);
        let taken_jif = ctrl.doing_jif && src1_val != 0;
        if ctrl.stall > 0 {
            next_ctrl.stall = ctrl.stall - 1;
        } else if ctrl.sel_fetch_head == FetchSel::Immediate || taken_jif {
            next_ctrl.stall = 2;
        }

        // 5. Advance fetch
        let next_head_from_inc = self.fetch_head.wrapping_add(1);
        let next_head_from_jmp = ctrl.imm1;
        self.fetch_head = if ctrl.doing_jif {
            if src1_val != 0 {
                next_head_from_jmp
            } else {
                next_head_from_inc
            }
        } else {
            match ctrl.sel_fetch_head {
                FetchSel::Increment => next_head_from_inc,
                FetchSel::Immediate => next_head_from_jmp,
            }
        };

        // 6. ALU
        let alu_result = alu(ctrl.alu_op, src1_val, src2_val);

        // 7. Writeback
        if ctrl.dest_reg_write {
            let value = if ctrl.dest_from_mem {
                self.mem_port.rdata
            } else {
                alu_result
            };
            self.regs[ctrl.dest_reg as usize] = value;
        }

        tracing::trace!(
            tick = self.ticks,
            head = self.fetch_head,
            stall = ctrl.stall,
            halt = ctrl.halt,
            "tick"
        );

        self.fetched = fetched_now;
        self.next_ctrl = next_ctrl;
        self.ticks += 1;

        if ctrl.halt {
            Ok(Tick::Halted)
        } else {
            Ok(Tick::KeepGoing)
        }
    }

    /// Tick until halt; returns the total tick count
    pub fn run(&mut self) -> Result<u64, SimError> {
        loop {
            if self.advance_tick()? == Tick::Halted {
                return Ok(self.ticks);
            }
        }
    }

    fn resolve_operand(&self, operand: OperandSel) -> u32 {
        match operand {
            OperandSel::Imm(value) => value,
            OperandSel::Reg(id) => self.regs[id as usize],
        }
    }

    /// Data-port read. The MMIO word pulls one byte from the input stream;
    /// end of input reads as 0.
    fn read_mem(&mut self, addr: u32) -> Result<u32, SimError> {
        if addr == MMIO_ADDR {
            let mut byte = [0u8; 1];
            let n = self.input.read(&mut byte)?;
            return Ok(if n == 0 { 0 } else { u32::from(byte[0]) });
        }
        Ok(self.mem.get(addr as usize).copied().unwrap_or(0))
    }

    /// Data-port write. The MMIO word pushes its low byte to the output
    /// stream; writes past the image are dropped.
    fn write_mem(&mut self, addr: u32, value: u32) -> Result<(), SimError> {
        if addr == MMIO_ADDR {
            self.output.write_all(&[value as u8])?;
            return Ok(());
        }
        if let Some(slot) = self.mem.get_mut(addr as usize) {
            *slot = value;
        }
        Ok(())
    }
}

fn alu(op: AluOp, a: u32, b: u32) -> u32 {
    let (a, b) = (a as i32, b as i32);
    let result = match op {
        AluOp::Add => a.wrapping_add(b),
        AluOp::Sub => a.wrapping_sub(b),
        AluOp::Mul => a.wrapping_mul(b),
        // Division by zero yields 0 rather than trapping
        AluOp::Div => {
            if b == 0 {
                0
            } else {
                a.wrapping_div(b)
            }
        }
        AluOp::Mod => {
            if b == 0 {
                0
            } else {
                a.wrapping_rem(b)
            }
        }
        AluOp::CmpEqu => i32::from(a == b),
        AluOp::CmpGt => i32::from(a > b),
        AluOp::CmpLt => i32::from(a < b),
    };
    result as u32
}

//! Machine state and the fetch-decode-execute loop.
//!
//! [`Machine`] owns everything that was once process-wide state: bit
//! memory, the register file, sticky flags, cursors, and the label table.
//! Instances are independent, so test runs can execute in parallel.
//!
//! Execution reads one byte at the program counter, decodes it into a
//! typed [`Op`](crate::machine::isa::Op), and dispatches. Macro calls push
//! explicit return frames instead of recursing on the host stack; the
//! frame count is bounded by [`MachineConfig::max_call_depth`].

use crate::machine::errors::MachineError;
use crate::machine::isa::{ComparePair, Condition, Op};
use crate::machine::labels::LabelTable;
use crate::machine::loader::{self, LoadSummary};
use crate::machine::memory::{BitMemory, CPU_BITS, EXT_START, MEM_BITS, PGM_START, STACK_BITS, VAR_START};
use crate::warn;

mod alu;
mod registers;

pub use registers::{Flags, RegisterFile};

/// Default limit on nested macro invocations.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 64;

/// Tunables for one machine instance.
#[derive(Clone, Copy, Debug)]
pub struct MachineConfig {
    /// Maximum number of live macro return frames.
    pub max_call_depth: usize,
    /// Turn cursor region crossings into errors instead of warnings.
    pub strict_bounds: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            strict_bounds: false,
        }
    }
}

/// Why a run stopped.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HaltReason {
    /// The halt opcode executed outside any macro frame.
    Halted,
    /// The program counter ran past the end of memory.
    EndOfMemory,
}

/// Read-only view of machine state for the embedding surface.
#[derive(Clone, Copy, Debug)]
pub struct Snapshot {
    pub r0: u16,
    pub r1: u16,
    pub r2: u16,
    pub r3: u16,
    pub ac: u16,
    pub ev: u16,
    pub carry: bool,
    pub flags: Flags,
    pub pc: usize,
    pub sp: usize,
    pub vp: usize,
    pub ep: usize,
}

/// Return frame for a macro invocation.
#[derive(Clone, Copy, Debug)]
struct CallFrame {
    /// Bit address to resume at once the macro halts.
    return_addr: usize,
}

/// The whole machine as one explicit value.
#[derive(Debug)]
pub struct Machine {
    pub(crate) mem: BitMemory,
    pub(crate) regs: RegisterFile,
    pub(crate) flags: Flags,
    pub(crate) labels: LabelTable,
    /// Program counter (bit offset).
    pub(crate) pc: usize,
    /// Stack pointer (bit offset); the stack grows downward from the top.
    pub(crate) sp: usize,
    /// Variable/macro area cursor (bit offset).
    pub(crate) vp: usize,
    /// Extended-overflow cursor (bit offset, moves in 16-bit words).
    pub(crate) ep: usize,
    call_stack: Vec<CallFrame>,
    config: MachineConfig,
}

impl Machine {
    /// Allocates a zeroed machine with the default configuration.
    pub fn new() -> Self {
        Self::with_config(MachineConfig::default())
    }

    /// Allocates a zeroed machine with the given configuration.
    pub fn with_config(config: MachineConfig) -> Self {
        Self {
            mem: BitMemory::new(),
            regs: RegisterFile::new(),
            flags: Flags::default(),
            labels: LabelTable::new(),
            pc: PGM_START,
            sp: MEM_BITS - CPU_BITS,
            vp: VAR_START,
            ep: EXT_START,
            call_stack: Vec::new(),
            config,
        }
    }

    /// Translates `source` into bytecode at the machine's cursors.
    pub fn load(&mut self, source: &str) -> Result<LoadSummary, MachineError> {
        loader::load(self, source)
    }

    /// Returns the label table populated by [`Machine::load`].
    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    // ==================== Stack ====================

    /// Pushes one byte at the stack pointer; the stack grows downward.
    pub(crate) fn push(&mut self, v: i64) -> Result<(), MachineError> {
        self.mem.write_byte(self.sp, v)?;
        self.sp = self
            .sp
            .checked_sub(CPU_BITS)
            .ok_or(MachineError::AddressOutOfRange { addr: 0 })?;
        if self.sp < MEM_BITS - STACK_BITS {
            if self.config.strict_bounds {
                return Err(MachineError::RegionViolation {
                    cursor: "stack",
                    addr: self.sp,
                    region: "extended-overflow",
                });
            }
            warn!("stack pointer at {} left the stack region", self.sp);
        }
        Ok(())
    }

    /// Pops the most recently pushed byte.
    pub(crate) fn pop(&mut self) -> Result<u8, MachineError> {
        self.sp += CPU_BITS;
        self.mem.read_byte(self.sp)
    }

    /// Pushes a 16-bit value as two bytes, high byte first.
    pub(crate) fn push16(&mut self, v: u16) -> Result<(), MachineError> {
        self.push((v >> 8) as i64)?;
        self.push((v & 0xFF) as i64)
    }

    /// Pops two bytes pushed by [`Machine::push16`] back into one value.
    pub(crate) fn pop16(&mut self) -> Result<u16, MachineError> {
        let lo = self.pop()? as u16;
        let hi = self.pop()? as u16;
        Ok((hi << 8) | lo)
    }

    // ==================== Extended-overflow log ====================

    /// Appends a 32-bit chunk to the extended-overflow log, high word first.
    pub(crate) fn push_overflow_chunk(&mut self, v: u32) -> Result<(), MachineError> {
        self.mem.write_word(self.ep, (v >> 16) as i64)?;
        self.ep += 2 * CPU_BITS;
        self.mem.write_word(self.ep, (v & 0xFFFF) as i64)?;
        self.ep += 2 * CPU_BITS;
        Ok(())
    }

    /// Removes and returns the most recent chunk, if the log is non-empty.
    pub(crate) fn pop_overflow_chunk(&mut self) -> Result<Option<u32>, MachineError> {
        if self.ep < EXT_START + 4 * CPU_BITS {
            return Ok(None);
        }
        self.ep -= 2 * CPU_BITS;
        let lo = self.mem.read_word(self.ep)? as u32;
        self.ep -= 2 * CPU_BITS;
        let hi = self.mem.read_word(self.ep)? as u32;
        Ok(Some((hi << 16) | lo))
    }

    // ==================== Execution ====================

    /// Executes from the top of the Program Area until a halt condition.
    pub fn run(&mut self) -> Result<HaltReason, MachineError> {
        self.pc = PGM_START;
        self.call_stack.clear();

        loop {
            if self.pc + CPU_BITS > MEM_BITS {
                return Ok(HaltReason::EndOfMemory);
            }
            let raw = self.mem.read_byte(self.pc)?;
            match Op::decode(raw) {
                Op::Halt => match self.call_stack.pop() {
                    Some(frame) => self.pc = frame.return_addr,
                    None => return Ok(HaltReason::Halted),
                },
                Op::PushImm => {
                    self.pc += CPU_BITS;
                    let v = self.mem.read_byte(self.pc)?;
                    self.push(v as i64)?;
                    self.pc += CPU_BITS;
                }
                Op::PushLit => {
                    self.pc += CPU_BITS;
                    let hi = self.mem.read_byte(self.pc)?;
                    self.push(hi as i64)?;
                    self.pc += CPU_BITS;
                    let lo = self.mem.read_byte(self.pc)?;
                    self.push(lo as i64)?;
                    self.pc += CPU_BITS;
                }
                Op::PushExcess => {
                    self.push16(self.regs.ev)?;
                    self.pc += CPU_BITS;
                }
                Op::PushAcc => {
                    self.push16(self.regs.ac)?;
                    self.pc += CPU_BITS;
                }
                Op::Assign => {
                    self.pc += CPU_BITS;
                    let idx = self.mem.read_byte(self.pc)?;
                    self.write_register(idx)?;
                    self.pc += CPU_BITS;
                }
                Op::Label => self.pc += CPU_BITS,
                Op::Arith(op) => {
                    self.apply_operator(op)?;
                    self.pc += CPU_BITS;
                }
                Op::Jump(cond) => {
                    self.pc += CPU_BITS;
                    if self.branch_taken(cond) {
                        self.pc = self.mem.read_byte(self.pc)? as usize;
                    } else {
                        self.pc += CPU_BITS;
                    }
                }
                Op::Compare(pair) => {
                    self.compare(pair);
                    self.pc += CPU_BITS;
                }
                Op::Inc(reg) => {
                    self.regs.increment(reg);
                    self.pc += CPU_BITS;
                }
                Op::Dec(reg) => {
                    self.regs.decrement(reg);
                    self.pc += CPU_BITS;
                }
                Op::Call => {
                    self.pc += CPU_BITS;
                    let lo = self.mem.read_byte(self.pc)? as usize;
                    self.pc += CPU_BITS;
                    let hi = self.mem.read_byte(self.pc)? as usize;
                    self.pc += CPU_BITS;
                    if self.call_stack.len() >= self.config.max_call_depth {
                        return Err(MachineError::CallDepthExceeded {
                            depth: self.call_stack.len() + 1,
                            limit: self.config.max_call_depth,
                        });
                    }
                    self.call_stack.push(CallFrame {
                        return_addr: self.pc,
                    });
                    self.pc = (hi << 8) | lo;
                }
                Op::Unknown(_) => self.pc += CPU_BITS,
            }
        }
    }

    /// Pops the stack into a general register. r0 and r1 take two bytes
    /// (high byte pushed first), r2 and r3 take one; any other index
    /// discards the popped byte.
    fn write_register(&mut self, idx: u8) -> Result<(), MachineError> {
        match idx {
            0 | 1 => {
                let v = self.pop16()?;
                self.regs.set(idx, v);
            }
            2 | 3 => {
                let v = self.pop()? as u16;
                self.regs.set(idx, v);
            }
            _ => {
                self.pop()?;
            }
        }
        Ok(())
    }

    fn branch_taken(&self, cond: Condition) -> bool {
        match cond {
            Condition::Always => true,
            Condition::Less => self.regs.ev == 2,
            Condition::Greater => self.regs.ev == 1,
            Condition::Equal => self.regs.ev == 0,
            Condition::NotEqual => self.regs.ev != 0,
        }
    }

    /// Compares a register pair into the excess register:
    /// 0 equal, 1 greater, 2 less.
    fn compare(&mut self, pair: ComparePair) {
        let (a, b) = match pair {
            ComparePair::R0R1 => (self.regs.get(0), self.regs.get(1)),
            ComparePair::R2R3 => (self.regs.get(2), self.regs.get(3)),
        };
        self.regs.ev = match a.cmp(&b) {
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Greater => 1,
            std::cmp::Ordering::Less => 2,
        };
    }

    // ==================== Observation ====================

    /// Read-only state snapshot for the embedding surface.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            r0: self.regs.get(0),
            r1: self.regs.get(1),
            r2: self.regs.get(2),
            r3: self.regs.get(3),
            ac: self.regs.ac,
            ev: self.regs.ev,
            carry: self.regs.carry,
            flags: self.flags,
            pc: self.pc,
            sp: self.sp,
            vp: self.vp,
            ep: self.ep,
        }
    }

    /// Returns `(bit address, byte value)` pairs over `[start, end)` in
    /// byte steps, for rendering one line per byte.
    pub fn dump_range(&self, start: usize, end: usize) -> Result<Vec<(usize, u8)>, MachineError> {
        let mut out = Vec::new();
        let mut addr = start;
        while addr < end {
            out.push((addr, self.mem.read_byte(addr)?));
            addr += CPU_BITS;
        }
        Ok(out)
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

//! Loader: translates sigil notation into bytecode resident in bit memory.
//!
//! # Syntax
//!
//! Every token starts with a sigil selecting its instruction class:
//!
//! ```text
//! #n          push the 8-bit immediate n
//! @n          push the 16-bit literal n as two bytes
//! @E  @A      push the excess register / the accumulator
//! !r          pop the stack into register r (two bytes for r0/r1)
//! !+ !- !* !/ !^   select an arithmetic operator
//! !jX !lX !gX !zX !nX   jump to label or offset X (always / less /
//!                       greater / equal / not equal)
//! !C01 !C23   compare r0:r1 or r2:r3 into the excess register
//! $name       bind name to the current offset; no-op when executed
//! +           the add operator, sigil form
//! >r  <r      increment / decrement register r
//! [name: body]   load body into the variable/macro area as a callable
//! `name       invoke the block bound to name
//! \           halt; also ends top-level loading
//! ```
//!
//! Whitespace is skipped and anything unrecognized is dropped with a
//! warning. Loading is single-pass: a label resolves the moment it is
//! referenced, so a reference ahead of its definition emits the sentinel
//! address and flips the summary's not-found indicator instead of
//! aborting. Macro headers bind their name before the body is read, which
//! is what lets a block call itself.

use crate::machine::errors::MachineError;
use crate::machine::isa;
use crate::machine::labels::UNRESOLVED;
use crate::machine::memory::{CPU_BITS, PGM_START};
use crate::machine::vm::Machine;
use crate::warn;

/// Characters that terminate an argument scan.
const SIGILS: &[char] = &[
    '#', '$', '!', '\\', '@', '[', ']', '`', '<', '>', '+', '{',
];

/// Outcome of loading source text.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LoadSummary {
    /// Bytecode bytes emitted across the program and macro areas.
    pub bytes_emitted: usize,
    /// At least one label reference failed to resolve.
    pub label_not_found: bool,
}

/// Translates `source` into bytecode at the machine's cursors.
pub fn load(machine: &mut Machine, source: &str) -> Result<LoadSummary, MachineError> {
    let mut loader = Loader {
        machine,
        cursor: SourceCursor::new(source),
        summary: LoadSummary::default(),
    };
    loader.load_level(Area::Program)?;
    Ok(loader.summary)
}

/// Where emitted bytes land: the program counter at top level, the
/// variable/macro cursor inside a block body.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Area {
    Program,
    Macro,
}

/// Character cursor over source text.
struct SourceCursor {
    chars: Vec<char>,
    pos: usize,
}

impl SourceCursor {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn next(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    /// Reads an argument: everything up to the next sigil, trimmed.
    fn argument(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if SIGILS.contains(&c) {
                break;
            }
            self.pos += 1;
        }
        self.chars[start..self.pos]
            .iter()
            .collect::<String>()
            .trim()
            .to_string()
    }
}

struct Loader<'a> {
    machine: &'a mut Machine,
    cursor: SourceCursor,
    summary: LoadSummary,
}

impl Loader<'_> {
    fn emit_cursor(&self, area: Area) -> usize {
        match area {
            Area::Program => self.machine.pc,
            Area::Macro => self.machine.vp,
        }
    }

    /// Writes one bytecode byte at the area's cursor and advances it.
    fn emit(&mut self, area: Area, value: i64) -> Result<(), MachineError> {
        let at = self.emit_cursor(area);
        self.machine.mem.write_byte(at, value)?;
        match area {
            Area::Program => self.machine.pc += CPU_BITS,
            Area::Macro => self.machine.vp += CPU_BITS,
        }
        self.summary.bytes_emitted += 1;
        Ok(())
    }

    /// Resolves a label, falling back to the sentinel on a miss.
    fn resolve(&mut self, name: &str) -> i64 {
        match self.machine.labels.lookup(name) {
            Some(addr) => addr,
            None => {
                self.summary.label_not_found = true;
                UNRESOLVED
            }
        }
    }

    /// Loads one nesting level. Returns when the source is exhausted, a
    /// top-level halt is emitted, or a macro body's `]` is reached.
    fn load_level(&mut self, area: Area) -> Result<(), MachineError> {
        while let Some(c) = self.cursor.next() {
            match c {
                c if c.is_whitespace() => {}
                '#' => {
                    let arg = self.cursor.argument();
                    let value = self.int_or_zero(&arg);
                    self.emit(area, isa::PUSH_IMM as i64)?;
                    self.emit(area, value)?;
                }
                '@' => self.load_push16(area)?,
                '!' => self.load_bang(area)?,
                '$' => {
                    let name = self.cursor.argument();
                    self.emit(area, isa::LABEL as i64)?;
                    let here = self.emit_cursor(area) as i64;
                    self.machine.labels.define(&name, here);
                }
                '+' => self.emit(area, isa::OP_ADD as i64)?,
                '>' => {
                    let arg = self.cursor.argument();
                    let reg = self.int_or_zero(&arg);
                    self.emit(area, isa::INC as i64 + ((reg & 0x3) << isa::REG_SHIFT))?;
                }
                '<' => {
                    let arg = self.cursor.argument();
                    let reg = self.int_or_zero(&arg);
                    self.emit(area, isa::DEC as i64 + ((reg & 0x3) << isa::REG_SHIFT))?;
                }
                '[' => self.load_block()?,
                '`' => {
                    let name = self.cursor.argument();
                    let addr = self.resolve(&name);
                    self.emit(area, isa::CALL as i64)?;
                    self.emit(area, addr & 0xFF)?;
                    self.emit(area, (addr >> 8) & 0xFF)?;
                }
                '\\' => {
                    self.emit(area, isa::HALT as i64)?;
                    if area == Area::Program {
                        return Ok(());
                    }
                }
                ']' => {
                    if area == Area::Macro {
                        return Ok(());
                    }
                    warn!("dropping unmatched ']' in source");
                }
                other => warn!("dropping unrecognized character {other:?} in source"),
            }
        }
        Ok(())
    }

    /// `@` family: bare opcode, excess/accumulator push, or a 16-bit
    /// literal split into two bytes, high first.
    fn load_push16(&mut self, area: Area) -> Result<(), MachineError> {
        let arg = self.cursor.argument();
        match arg.as_str() {
            "" => self.emit(area, isa::PUSH_LIT as i64),
            "E" => self.emit(area, isa::PUSH_EXCESS as i64),
            "A" => self.emit(area, isa::PUSH_ACC as i64),
            _ => {
                let v = self.int_or_zero(&arg);
                self.emit(area, isa::PUSH_LIT as i64)?;
                self.emit(area, (v >> 8) & 0xFF)?;
                self.emit(area, v & 0xFF)
            }
        }
    }

    /// `!` family: operator selection, register assignment, jumps, and
    /// register-pair comparison.
    fn load_bang(&mut self, area: Area) -> Result<(), MachineError> {
        // operator selection is the single character after the `!`
        if let Some(op @ ('+' | '-' | '*' | '/' | '^')) = self.cursor.peek() {
            self.cursor.next();
            return self.emit(area, op as i64);
        }

        let arg = self.cursor.argument();
        if let Some(idx) = parse_int(&arg) {
            self.emit(area, isa::ASSIGN as i64)?;
            return self.emit(area, idx);
        }

        let mut chars = arg.chars();
        match chars.next() {
            Some(mnemonic @ ('j' | 'l' | 'g' | 'z' | 'n')) => {
                let rest = chars.as_str();
                let target = match parse_int(rest) {
                    Some(offset) => PGM_START as i64 + offset,
                    None => PGM_START as i64 + self.resolve(rest),
                };
                self.emit(area, mnemonic as i64)?;
                // branch targets are one byte wide; the clamp applies
                self.emit(area, target)?;
            }
            Some('C') => {
                let offset = if chars.as_str() == "01" { 12 } else { 48 };
                self.emit(area, isa::COMPARE as i64 + offset)?;
            }
            _ => warn!("dropping malformed '!' argument {arg:?}"),
        }
        Ok(())
    }

    /// `[name: body]`: binds `name` to the block's base address in the
    /// variable/macro area, then loads the body there. The binding happens
    /// before the body is read so the block can invoke itself. A `\`
    /// inside the body emits the halt byte that returns to the caller;
    /// only `]` ends the body.
    fn load_block(&mut self) -> Result<(), MachineError> {
        let mut name = String::new();
        while let Some(c) = self.cursor.next() {
            if c == ':' {
                break;
            }
            name.push(c);
        }
        let base = self.machine.vp as i64;
        self.machine.labels.define(&name, base);
        self.load_level(Area::Macro)
    }

    fn int_or_zero(&self, arg: &str) -> i64 {
        match parse_int(arg) {
            Some(v) => v,
            None => {
                warn!("treating non-numeric argument {arg:?} as 0");
                0
            }
        }
    }
}

/// Parses a decimal integer argument, tolerating surrounding whitespace.
fn parse_int(s: &str) -> Option<i64> {
    s.trim().parse::<i64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::isa;
    use crate::machine::memory::{CPU_BITS, VAR_START};

    fn load_source(source: &str) -> (Machine, LoadSummary) {
        let mut machine = Machine::new();
        let summary = machine.load(source).expect("load failed");
        (machine, summary)
    }

    fn program_bytes(machine: &Machine, count: usize) -> Vec<u8> {
        machine
            .dump_range(0, count * CPU_BITS)
            .expect("dump failed")
            .into_iter()
            .map(|(_, byte)| byte)
            .collect()
    }

    #[test]
    fn push_immediate_encoding() {
        let (machine, summary) = load_source("#42\\");
        assert_eq!(program_bytes(&machine, 3), vec![b'#', 42, b'\\']);
        assert_eq!(summary.bytes_emitted, 3);
        assert!(!summary.label_not_found);
    }

    #[test]
    fn push_literal_splits_high_then_low() {
        let (machine, _) = load_source("@258\\");
        assert_eq!(program_bytes(&machine, 4), vec![b'@', 1, 2, b'\\']);
    }

    #[test]
    fn push_excess_and_accumulator_encodings() {
        let (machine, _) = load_source("@E@A\\");
        assert_eq!(
            program_bytes(&machine, 3),
            vec![isa::PUSH_EXCESS, isa::PUSH_ACC, b'\\']
        );
    }

    #[test]
    fn assign_encoding() {
        let (machine, _) = load_source("#5!2\\");
        assert_eq!(program_bytes(&machine, 5), vec![b'#', 5, b'!', 2, b'\\']);
    }

    #[test]
    fn operator_selection_encodings() {
        let (machine, _) = load_source("!+!-!*!/!^\\");
        assert_eq!(
            program_bytes(&machine, 6),
            vec![b'+', b'-', b'*', b'/', b'^', b'\\']
        );
    }

    #[test]
    fn bare_plus_is_the_add_operator() {
        let (machine, _) = load_source("#1+\\");
        assert_eq!(program_bytes(&machine, 4), vec![b'#', 1, b'+', b'\\']);
    }

    #[test]
    fn compare_variant_encodings() {
        let (machine, _) = load_source("!C01!C23\\");
        assert_eq!(
            program_bytes(&machine, 3),
            vec![isa::COMPARE_R0R1, isa::COMPARE_R2R3, b'\\']
        );
    }

    #[test]
    fn increment_decrement_pack_register_into_top_bits() {
        let (machine, _) = load_source(">0>3<1\\");
        assert_eq!(
            program_bytes(&machine, 4),
            vec![b'>', b'>' + (3 << 6), b'<' + (1 << 6), b'\\']
        );
    }

    #[test]
    fn label_binds_offset_after_marker() {
        let (machine, _) = load_source("#1#2$HERE\\");
        // two 2-byte pushes, then the marker byte itself
        assert_eq!(machine.labels().lookup("HERE"), Some(40));
    }

    #[test]
    fn label_defined_late_resolves_after_load() {
        let (machine, _) = load_source("#1#2$END\\");
        assert_eq!(machine.labels().lookup("END"), Some(40));
        assert_eq!(machine.labels().lookup("MISSING"), None);
    }

    #[test]
    fn jump_takes_numeric_or_label_target() {
        let (machine, _) = load_source("$TOP!jTOP!l16\\");
        assert_eq!(
            program_bytes(&machine, 6),
            vec![b'$', b'j', 8, b'l', 16, b'\\']
        );
    }

    #[test]
    fn unresolved_reference_emits_sentinel_and_flags_summary() {
        let (machine, summary) = load_source("`nowhere\\");
        assert!(summary.label_not_found);
        assert_eq!(program_bytes(&machine, 4), vec![b'`', 0xFF, 0xFF, b'\\']);
    }

    #[test]
    fn call_operand_is_little_endian() {
        let (machine, _) = load_source("[noop:\\]`noop\\");
        let base = VAR_START;
        assert_eq!(machine.labels().lookup("noop"), Some(base as i64));
        assert_eq!(
            program_bytes(&machine, 4),
            vec![b'`', (base & 0xFF) as u8, (base >> 8) as u8, b'\\']
        );
    }

    #[test]
    fn macro_body_loads_into_variable_area() {
        let (machine, summary) = load_source("[five:#5!2\\]`five\\");
        let body = machine
            .dump_range(VAR_START, VAR_START + 5 * CPU_BITS)
            .unwrap();
        let bytes: Vec<u8> = body.into_iter().map(|(_, b)| b).collect();
        assert_eq!(bytes, vec![b'#', 5, b'!', 2, b'\\']);
        // 5 body bytes + 3 call bytes + top-level halt
        assert_eq!(summary.bytes_emitted, 9);
    }

    #[test]
    fn halt_inside_macro_body_does_not_end_the_load() {
        let (machine, _) = load_source("[first:\\][second:\\]#1\\");
        assert_eq!(machine.labels().lookup("first"), Some(VAR_START as i64));
        assert_eq!(
            machine.labels().lookup("second"),
            Some((VAR_START + CPU_BITS) as i64)
        );
        assert_eq!(program_bytes(&machine, 3), vec![b'#', 1, b'\\']);
    }

    #[test]
    fn top_level_halt_stops_the_load() {
        let (machine, summary) = load_source("#1\\#2#3");
        assert_eq!(summary.bytes_emitted, 3);
        assert_eq!(program_bytes(&machine, 4), vec![b'#', 1, b'\\', 0]);
    }

    #[test]
    fn whitespace_and_unknown_characters_are_dropped() {
        let (machine, summary) = load_source("?; \n\t #1#2 \\");
        assert_eq!(summary.bytes_emitted, 5);
        assert_eq!(
            program_bytes(&machine, 5),
            vec![b'#', 1, b'#', 2, b'\\']
        );
    }

    #[test]
    fn negative_immediate_wraps_through_byte_clamp() {
        let (machine, _) = load_source("#-1\\");
        assert_eq!(program_bytes(&machine, 3), vec![b'#', 255, b'\\']);
    }
}

//! Arithmetic/overflow unit.
//!
//! Every operator combines the accumulator with the register sum
//! `r0 + r1`. The excess state widens the left operand before the
//! operation, and the raw result is re-normalized afterwards across the
//! accumulator, the excess register, and the extended-overflow log, with
//! the sticky flags recording anything that did not fit.

use crate::machine::errors::MachineError;
use crate::machine::isa::Operator;
use crate::machine::vm::{Flags, Machine};

impl Machine {
    /// Applies `op` to the accumulator and `r0 + r1`.
    pub(crate) fn apply_operator(&mut self, op: Operator) -> Result<(), MachineError> {
        let rhs = self.regs.get(0) as i128 + self.regs.get(1) as i128;
        let lhs = self.left_operand()? as i128;

        let raw = match op {
            Operator::Add => lhs + rhs,
            Operator::Sub => lhs - rhs,
            Operator::Mul => lhs * rhs,
            Operator::Pow => saturating_pow(lhs, rhs as u32),
            Operator::Div => {
                if rhs == 0 {
                    return Err(MachineError::DivisionByZero { pc: self.pc });
                }
                let remainder = (lhs % rhs) as i64;
                return self.normalize_quotient(lhs / rhs, remainder);
            }
        };
        self.normalize(raw)
    }

    /// Left operand: the accumulator widened by pending excess state.
    ///
    /// With ExcessOverflow set and a non-empty extended log, the most
    /// recent 32-bit chunk takes the high bits; otherwise the excess
    /// register does. Flags are sticky, so a set ExcessOverflow with an
    /// already-drained log falls back to the excess register.
    fn left_operand(&mut self) -> Result<u64, MachineError> {
        if self.flags.contains(Flags::EXCESS_OVERFLOW) {
            if let Some(chunk) = self.pop_overflow_chunk()? {
                return Ok(((chunk as u64) << 16) | self.regs.ac as u64);
            }
        }
        Ok(((self.regs.ev as u64) << 16) | self.regs.ac as u64)
    }

    /// Folds a raw result back into `ac`/`ev`/carry, the sticky flags, and
    /// the extended-overflow log.
    fn normalize(&mut self, raw: i128) -> Result<(), MachineError> {
        if raw < 0 {
            self.regs.ac = (raw & 0xFFFF) as u16;
            self.regs.ev = 0;
            self.regs.carry = false;
            self.flags.set(Flags::UNDERFLOW);
        } else if raw > 0xFFFF {
            self.regs.ac = (raw & 0xFFFF) as u16;
            self.regs.carry = true;
            self.flags.set(Flags::OVERFLOW);
            let excess = raw >> 16;
            if excess > 0xFFFF {
                self.push_overflow_chunk((excess & 0xFFFF_FFFF) as u32)?;
                self.regs.ev = 0;
                self.flags.set(Flags::EXCESS_OVERFLOW);
            } else {
                self.regs.ev = excess as u16;
            }
        } else {
            self.regs.ac = raw as u16;
            self.regs.ev = 0;
            self.regs.carry = false;
        }
        self.update_zero();
        Ok(())
    }

    /// Division variant of [`Machine::normalize`]: the remainder is pinned
    /// to the excess register, so a quotient above 16 bits chunks straight
    /// into the extended log.
    fn normalize_quotient(&mut self, quotient: i128, remainder: i64) -> Result<(), MachineError> {
        self.regs.ac = (quotient & 0xFFFF) as u16;
        if quotient > 0xFFFF {
            self.regs.carry = true;
            self.flags.set(Flags::OVERFLOW);
            let excess = quotient >> 16;
            self.push_overflow_chunk((excess & 0xFFFF_FFFF) as u32)?;
            self.flags.set(Flags::EXCESS_OVERFLOW);
        } else {
            self.regs.carry = false;
        }
        self.regs.ev = (remainder & 0xFFFF) as u16;
        self.update_zero();
        Ok(())
    }

    fn update_zero(&mut self) {
        if self.regs.ac == 0 && self.regs.ev == 0 && !self.regs.carry {
            self.flags.set(Flags::ZERO);
        }
    }
}

/// Exponentiation saturating at the wide-integer ceiling. `0^0` is 1,
/// matching the notation's arithmetic heritage.
fn saturating_pow(base: i128, exp: u32) -> i128 {
    if base <= 1 {
        // 0 and 1 are fixed points past the first step
        return match (base, exp) {
            (_, 0) => 1,
            (b, _) => b,
        };
    }
    let mut acc: i128 = 1;
    for _ in 0..exp {
        acc = match acc.checked_mul(base) {
            Some(v) => v,
            None => return i128::MAX,
        };
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pow_handles_degenerate_bases() {
        assert_eq!(saturating_pow(0, 0), 1);
        assert_eq!(saturating_pow(0, 9), 0);
        assert_eq!(saturating_pow(1, 100_000), 1);
        assert_eq!(saturating_pow(3, 4), 81);
    }

    #[test]
    fn pow_saturates_instead_of_overflowing() {
        assert_eq!(saturating_pow(2, 200), i128::MAX);
    }
}

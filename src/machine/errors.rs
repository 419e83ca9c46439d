use bitvm_derive::Error;

/// Errors that can stop a load or a run outright.
///
/// The machine is deliberately soft about most faults: unresolved labels
/// yield a sentinel address and a sticky indicator, stack growth past its
/// region is only warned about, and arithmetic overflow chains into the
/// extended-overflow area. The variants here are the conditions that have
/// no meaningful continuation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MachineError {
    /// A bit access left physical memory entirely.
    #[error("bit address {addr} is outside memory")]
    AddressOutOfRange { addr: usize },
    /// Macro invocation exceeded the configured depth limit.
    #[error("call depth {depth} exceeds the configured limit of {limit}")]
    CallDepthExceeded { depth: usize, limit: usize },
    /// Division with a zero divisor (r0 + r1 == 0).
    #[error("division by zero at pc {pc}")]
    DivisionByZero { pc: usize },
    /// A cursor crossed a region boundary in strict-bounds mode.
    #[error("{cursor} cursor at {addr} crossed into the {region} region")]
    RegionViolation {
        cursor: &'static str,
        addr: usize,
        region: &'static str,
    },
}

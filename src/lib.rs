//! A bit-addressable virtual CPU.
//!
//! Provides a bit-level memory model, a sigil-notation loader that compiles
//! source text directly into resident bytecode, and a fetch-decode-execute
//! loop with multi-precision overflow chaining and recursive macro calls.

pub mod machine;
pub mod utils;

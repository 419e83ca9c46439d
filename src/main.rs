//! Bit machine runner.
//!
//! Loads a sigil-notation source file into the machine, executes it, and
//! prints the post-run register and flag state. A memory range can be
//! dumped as one line per byte (hexadecimal address, 8-bit binary value).
//!
//! # Usage
//! ```text
//! bitvm <source> [OPTIONS]
//! ```
//!
//! # Arguments
//! - `source`: Source file in the machine notation
//!
//! # Options
//! - `--dump <start> <end>`: Dump the bit-address range after the run
//! - `--max-depth <n>`: Macro call depth limit (default 64)
//! - `--strict`: Treat region crossings as errors
//! - `--no-run`: Load only, report the load summary

use bitvm::machine::vm::{Machine, MachineConfig};
use bitvm::{error, info, warn};
use std::env;
use std::fs;
use std::path::Path;
use std::process;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let input_path = &args[1];
    let mut dump: Option<(usize, usize)> = None;
    let mut config = MachineConfig::default();
    let mut no_run = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--dump" => {
                if i + 2 >= args.len() {
                    error!("--dump requires <start> and <end> arguments");
                    process::exit(1);
                }
                let start = parse_addr(&args[i + 1]);
                let end = parse_addr(&args[i + 2]);
                dump = Some((start, end));
                i += 3;
            }
            "--max-depth" => {
                i += 1;
                if i >= args.len() {
                    error!("--max-depth requires an argument");
                    process::exit(1);
                }
                config.max_call_depth = args[i].parse().unwrap_or_else(|_| {
                    error!("Invalid depth: '{}' is not a valid number", args[i]);
                    process::exit(1);
                });
                i += 1;
            }
            "--strict" => {
                config.strict_bounds = true;
                i += 1;
            }
            "--no-run" => {
                no_run = true;
                i += 1;
            }
            other => {
                error!("Unexpected argument: {}", other);
                print_usage(&args[0]);
                process::exit(1);
            }
        }
    }

    if !Path::new(input_path).exists() {
        error!("Input file does not exist: {}", input_path);
        process::exit(1);
    }

    let source = match fs::read_to_string(input_path) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to read {}: {}", input_path, e);
            process::exit(1);
        }
    };

    let mut machine = Machine::with_config(config);

    let summary = match machine.load(&source) {
        Ok(s) => s,
        Err(e) => {
            error!("Load failed: {}", e);
            process::exit(1);
        }
    };
    info!("Loaded {} ({} bytes)", input_path, summary.bytes_emitted);
    if summary.label_not_found {
        warn!("one or more labels did not resolve; sentinel addresses were emitted");
    }

    if !no_run {
        match machine.run() {
            Ok(reason) => info!("Run finished: {:?}", reason),
            Err(e) => {
                error!("Run failed: {}", e);
                process::exit(1);
            }
        }

        let s = machine.snapshot();
        println!("R0: {}", s.r0);
        println!("R1: {}", s.r1);
        println!("R2: {}", s.r2);
        println!("R3: {}", s.r3);
        println!("AC: {}", s.ac);
        println!("EV: {}", s.ev);
        println!("CY: {}", s.carry as u8);
        println!("PC: {}", s.pc);
        println!("FL: {:04b}", s.flags.bits());
    }

    if let Some((start, end)) = dump {
        match machine.dump_range(start, end) {
            Ok(lines) => {
                for (addr, byte) in lines {
                    println!("MEM[{addr:#06x}]: {byte:08b}");
                }
            }
            Err(e) => {
                error!("Dump failed: {}", e);
                process::exit(1);
            }
        }
    }
}

/// Parses a bit address argument.
fn parse_addr(arg: &str) -> usize {
    arg.parse().unwrap_or_else(|_| {
        error!("Invalid address: '{}' is not a valid number", arg);
        process::exit(1);
    })
}

const USAGE: &str = "\
Bit Machine

USAGE:
    {program} <source> [OPTIONS]

ARGS:
    <source>    Source file in the machine notation

OPTIONS:
    --dump <start> <end>    Dump the bit-address range after the run
    --max-depth <n>         Macro call depth limit (default 64)
    --strict                Treat region crossings as errors
    --no-run                Load only, report the load summary
    -h, --help              Print this help message

EXAMPLES:
    # Load and run a program, printing the final registers
    {program} program.bit

    # Inspect the first 16 bytes of the program area afterwards
    {program} program.bit --dump 0 128
";

fn print_usage(program: &str) {
    eprintln!("{}", USAGE.replace("{program}", program));
}

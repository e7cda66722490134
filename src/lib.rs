#![forbid(unsafe_code)]

//! x64lite is an instruction-level emulator for the subset of x86-64 used by assembly programming tutorials.
//! It assembles Intel-syntax source text into a program and executes it against an emulated register file,
//! flags register and flat little-endian memory, with every fault reported as a value rather than a crash.
//!
//! The [`routines`] module carries the tutorial routines themselves (integer arithmetic, recursion,
//! string and array processing, bit manipulation and SSE floating point) along with host wrappers to call them.
//!
//! # Example of Usage
//!
//! ```
//! # use x64lite::*;
//! let prog = load_program(r"
//!     max:
//!         mov rax, rsi
//!         cmp rdi, rsi
//!         cmovg rax, rdi
//!         ret
//! ").unwrap_or_else(|e| panic!("{}", e));
//!
//! let mut state = new_execution_state(64 * 1024);
//! state.regs.set_rdi(-3i64 as u64);
//! state.regs.set_rsi(7);
//!
//! let res = run(&prog, &mut state, Some(1000));
//! assert_eq!(res.outcome, Ok(exec::HaltReason::Returned));
//! assert_eq!(res.steps, 4);
//! assert_eq!(state.regs.get_rax(), 7);
//! ```

#[macro_use] extern crate num_derive;
#[macro_use] extern crate lazy_static;

macro_rules! mask {
    ($src:ident : $($mask:ident)|+) => {
        $($src::$mask)|+
    };
    () => { 0 };
}

pub mod common;
pub mod asm;
pub mod exec;
pub mod routines;

#[cfg(test)]
mod test;

use asm::{AsmError, Program};
use exec::{ExecutionState, RunResult, StateArgs};

/// Assembles source text into a program.
pub fn load_program(text: &str) -> Result<Program, AsmError> {
    asm::assemble(&mut text.as_bytes())
}

/// Creates an execution state with `memory_size` bytes of memory and default settings for everything else.
pub fn new_execution_state(memory_size: usize) -> ExecutionState {
    ExecutionState::new(&StateArgs { memory_size: Some(memory_size), ..Default::default() })
}

/// Runs `program` from its entry point until it halts, faults, or exceeds `step_limit` instructions.
pub fn run(program: &Program, state: &mut ExecutionState, step_limit: Option<u64>) -> RunResult {
    state.run(program, step_limit)
}

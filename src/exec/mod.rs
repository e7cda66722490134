//! Everything pertaining to executing an assembled `Program`.

use log::{trace, debug, warn};
use thiserror::Error;

use std::fmt;
use std::error::Error as StdError;

use crate::asm::{Program, Operand};
use crate::common::Size;

pub mod registers;
pub mod flags;
pub mod memory;
mod ops;
mod sse;

use registers::*;
use flags::*;
use memory::*;
use ops::Flow;

/// Default size of the memory region, in bytes.
pub const DEFAULT_MEMORY_SIZE: usize = 1024 * 1024;
/// Default address of the first byte of memory.
pub const DEFAULT_BASE_ADDRESS: u64 = 0x10000;
/// Default number of bytes at the top of memory reserved for the stack.
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;
/// Default bound on the number of nested `call`s.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 1024;

/// Reasons why an instruction can fail to execute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ExecError {
    /// A register id did not name a register of the requested kind or width.
    #[error("invalid register")]
    InvalidRegister,
    /// An instruction was given operands it cannot operate on.
    /// This is impossible for instructions produced by the assembler.
    #[error("invalid operand")]
    InvalidOperand,
    /// A load or store was outside the memory region.
    #[error("memory access out of bounds")]
    OutOfBounds,
    /// An aligned packed access used an address that was not a multiple of 16.
    #[error("misaligned packed memory access")]
    MisalignedAccess,
    /// The caller-supplied step limit was reached before the program halted.
    #[error("step limit exceeded")]
    StepLimitExceeded,
    /// Execution was requested of a state that is not running.
    #[error("execution state is not running")]
    NotRunning,
    /// A division instruction attempted to divide by zero.
    #[error("division by zero")]
    DivisionByZero,
    /// A division instruction had a quotient which could not be truncated to the operand size.
    #[error("division overflow")]
    DivisionOverflow,
    /// The call stack exceeded its maximum depth, or a push went below the stack area.
    #[error("stack overflow")]
    StackOverflow,
    /// A `ret` had no frame to return to, or a pop went above the top of memory.
    #[error("stack underflow")]
    StackUnderflow,
}
impl ExecError {
    /// Checks if this error mirrors a hardware trap, after which execution cannot be resumed.
    pub fn is_fatal(self) -> bool {
        matches!(self, ExecError::DivisionByZero | ExecError::DivisionOverflow | ExecError::StackOverflow | ExecError::StackUnderflow)
    }
}

/// Where and on what an execution error happened.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FaultContext {
    /// Index of the offending instruction.
    pub ip: usize,
    /// Source line of the offending instruction.
    pub line_num: usize,
    /// Source text of the offending instruction.
    pub instruction: String,
    /// The value of each operand when the fault was raised: register contents (the low 64 bits for xmm registers),
    /// immediates, loaded memory, and jump targets.
    /// `None` marks a memory operand that could not be read.
    pub operands: Vec<Option<u64>>,
}

/// An execution error together with the instruction that raised it.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Fault {
    pub error: ExecError,
    /// Absent if the error was not raised by an instruction (e.g. resuming a halted state).
    pub context: Option<FaultContext>,
}
impl From<ExecError> for Fault {
    fn from(error: ExecError) -> Self {
        Fault { error, context: None }
    }
}
impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.context {
            None => write!(f, "{}", self.error),
            Some(c) => {
                write!(f, "{} at instruction {} (line {}): `{}` [", self.error, c.ip, c.line_num, c.instruction)?;
                for (i, v) in c.operands.iter().enumerate() {
                    if i != 0 { f.write_str(", ")?; }
                    match v {
                        Some(v) => write!(f, "{:#x}", v)?,
                        None => f.write_str("?")?,
                    }
                }
                f.write_str("]")
            }
        }
    }
}
impl StdError for Fault {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.error)
    }
}

/// Why a run ended successfully.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HaltReason {
    /// A `ret` returned from the entry context.
    Returned,
    /// A `hlt` instruction was executed.
    Halt,
    /// Execution ran past the last instruction.
    EndOfProgram,
}

/// Current state of an execution state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// Freshly created or reset; nothing has run.
    Ready,
    /// In the middle of a run.
    Running,
    /// The program finished.
    Halted(HaltReason),
    /// Stopped on a recoverable error. The offending instruction has not been executed and `resume` retries it.
    Stopped(ExecError),
    /// Stopped on a fatal error. Cannot be resumed.
    Faulted(ExecError),
}

/// Holds options for creating an execution state.
#[derive(Default, Clone, Debug)]
pub struct StateArgs {
    /// Size of the memory region in bytes.
    /// If omitted, defaults to `DEFAULT_MEMORY_SIZE`.
    pub memory_size: Option<usize>,
    /// Address of the first byte of memory.
    /// If omitted, defaults to `DEFAULT_BASE_ADDRESS`.
    pub base_address: Option<u64>,
    /// Amount of stack space at the top of memory.
    /// If omitted, defaults to `DEFAULT_STACK_SIZE` or half of memory, whichever is smaller.
    pub stack_size: Option<usize>,
    /// Maximum number of nested calls before `StackOverflow`.
    /// If omitted, defaults to `DEFAULT_MAX_CALL_DEPTH`.
    pub max_call_depth: Option<usize>,
}

/// The outcome of `run`/`resume`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RunResult {
    /// Number of instructions that executed successfully.
    pub steps: u64,
    pub outcome: Result<HaltReason, Fault>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Frame {
    /// The context `run` started in. Returning from it ends the run.
    Entry,
    /// Instruction index to continue at.
    Return(usize),
}

/// Registers, flags and memory, plus the control state needed to step through a program.
///
/// States are fully independent of each other and of the programs they run,
/// so the same `Program` can be run against any number of states.
#[derive(Clone, Debug)]
pub struct ExecutionState {
    pub regs: RegisterFile,
    pub flags: Flags,
    pub memory: Memory,

    ip: usize,
    call_stack: Vec<Frame>,
    max_call_depth: usize,
    peak_call_depth: usize,
    status: Status,
}
impl ExecutionState {
    /// Creates a zeroed state.
    pub fn new(args: &StateArgs) -> ExecutionState {
        let memory_size = args.memory_size.unwrap_or(DEFAULT_MEMORY_SIZE);
        let stack_size = args.stack_size.unwrap_or_else(|| DEFAULT_STACK_SIZE.min(memory_size / 2));
        let base = args.base_address.unwrap_or(DEFAULT_BASE_ADDRESS);

        let mut state = ExecutionState {
            regs: Default::default(),
            flags: Default::default(),
            memory: Memory::new(base, memory_size, stack_size),
            ip: 0,
            call_stack: vec![],
            max_call_depth: args.max_call_depth.unwrap_or(DEFAULT_MAX_CALL_DEPTH),
            peak_call_depth: 0,
            status: Status::Ready,
        };
        state.regs.set_rsp(state.memory.end());
        state
    }

    /// Zeroes all registers, flags and memory and releases all allocations, returning to `Ready`.
    pub fn reset(&mut self) {
        self.regs = Default::default();
        self.flags = Default::default();
        self.memory.clear();
        self.regs.set_rsp(self.memory.end());
        self.ip = 0;
        self.call_stack.clear();
        self.peak_call_depth = 0;
        self.status = Status::Ready;
    }

    pub fn status(&self) -> Status {
        self.status
    }
    /// Index of the next instruction to execute.
    pub fn ip(&self) -> usize {
        self.ip
    }
    /// Number of calls currently active.
    pub fn call_depth(&self) -> usize {
        self.call_stack.iter().filter(|f| matches!(f, Frame::Return(_))).count()
    }
    /// Deepest call nesting reached since the last `run` or `reset`.
    pub fn peak_call_depth(&self) -> usize {
        self.peak_call_depth
    }
    pub fn max_call_depth(&self) -> usize {
        self.max_call_depth
    }

    /// Starts `program` at its entry point with an empty call stack and `rsp` at the top of memory,
    /// then executes until it halts, faults, or `step_limit` instructions have executed.
    /// Registers, flags and memory are used as they are, so arguments can be set up beforehand.
    pub fn run(&mut self, program: &Program, step_limit: Option<u64>) -> RunResult {
        self.ip = program.entry();
        self.call_stack.clear();
        self.call_stack.push(Frame::Entry);
        self.peak_call_depth = 0;
        self.regs.set_rsp(self.memory.end());
        self.status = Status::Running;
        debug!("run started at instruction {} of {}", self.ip, program.len());
        self.resume(program, step_limit)
    }

    /// Continues a state that is running or stopped on a recoverable error.
    /// A stopped instruction is retried, so the caller can fix up the state before resuming.
    pub fn resume(&mut self, program: &Program, step_limit: Option<u64>) -> RunResult {
        match self.status {
            Status::Running => (),
            Status::Stopped(_) => self.status = Status::Running,
            _ => return RunResult { steps: 0, outcome: Err(ExecError::NotRunning.into()) },
        }

        let mut steps = 0;
        loop {
            if self.ip >= program.len() {
                self.status = Status::Halted(HaltReason::EndOfProgram);
                debug!("run halted after {} steps: end of program", steps);
                return RunResult { steps, outcome: Ok(HaltReason::EndOfProgram) };
            }
            if step_limit.map_or(false, |limit| steps >= limit) {
                let e = ExecError::StepLimitExceeded;
                self.status = Status::Stopped(e);
                debug!("run stopped after {} steps: {}", steps, e);
                return RunResult { steps, outcome: Err(self.fault(program, e)) };
            }
            match self.step(program) {
                Ok(None) => steps += 1,
                Ok(Some(reason)) => {
                    debug!("run halted after {} steps: {:?}", steps + 1, reason);
                    return RunResult { steps: steps + 1, outcome: Ok(reason) };
                }
                Err(fault) => return RunResult { steps, outcome: Err(fault) },
            }
        }
    }

    /// Executes a single instruction.
    /// Returns the halt reason if this ended the program.
    ///
    /// Stepping a `Ready` state starts at the entry point without an entry context,
    /// so an unmatched `ret` underflows the call stack instead of halting.
    /// Each instruction is atomic: on failure, registers, flags and memory are as they were before it.
    /// The exception is a `rep`-prefixed string instruction, which keeps the iterations that completed
    /// before the failing one, exactly as a restartable hardware string operation does.
    pub fn step(&mut self, program: &Program) -> Result<Option<HaltReason>, Fault> {
        macro_rules! error_state {
            ($self:ident => $err:expr) => {{
                let e = $err;
                $self.status = if e.is_fatal() { Status::Faulted(e) } else { Status::Stopped(e) };
                let fault = $self.fault(program, e);
                warn!("{}", fault);
                return Err(fault);
            }}
        }

        match self.status {
            Status::Running => (),
            Status::Ready => {
                self.ip = program.entry();
                self.status = Status::Running;
            }
            Status::Stopped(_) => self.status = Status::Running,
            Status::Halted(_) | Status::Faulted(_) => return Err(ExecError::NotRunning.into()),
        }

        let instr = match program.instructions().get(self.ip) {
            Some(instr) => instr,
            None => {
                self.status = Status::Halted(HaltReason::EndOfProgram);
                return Ok(Some(HaltReason::EndOfProgram));
            }
        };
        trace!("{:>5}: {}", self.ip, instr);

        match self.execute(instr, self.ip) {
            Ok(Flow::Next) => self.ip += 1,
            Ok(Flow::Jump(target)) => self.ip = target,
            Ok(Flow::Halt(reason)) => {
                self.ip += 1;
                self.status = Status::Halted(reason);
                return Ok(Some(reason));
            }
            Err(e) => error_state!(self => e),
        }
        Ok(None)
    }

    fn fault(&self, program: &Program, error: ExecError) -> Fault {
        let context = program.instructions().get(self.ip).map(|instr| FaultContext {
            ip: self.ip,
            line_num: instr.line_num,
            instruction: instr.text.clone(),
            operands: instr.operands.iter().map(|op| self.peek_operand(op, instr.size)).collect(),
        });
        Fault { error, context }
    }
    fn peek_operand(&self, op: &Operand, size: Size) -> Option<u64> {
        match op {
            Operand::Xmm(id) => self.regs.xmm(*id).ok().map(|x| x.get_u64(0)),
            Operand::Target(t) => Some(*t as u64),
            Operand::Mem(a) => {
                let addr = self.effective_address(a).ok()?;
                self.memory.load(addr, a.size.unwrap_or(size).min(Size::Qword)).ok()
            }
            Operand::Reg(_) | Operand::Imm(_) => self.read_operand(op, size.min(Size::Qword)).ok(),
        }
    }

    /// Pushes a 64-bit value onto the memory stack.
    /// On failure, the state is unmodified.
    pub fn push_mem(&mut self, value: u64) -> Result<(), ExecError> {
        let pos = self.regs.get_rsp().checked_sub(8)
            .filter(|&pos| pos >= self.memory.stack_limit())
            .ok_or(ExecError::StackOverflow)?;
        self.memory.set_u64(pos, value)?;
        self.regs.set_rsp(pos);
        Ok(())
    }
    /// Pops a 64-bit value from the memory stack.
    /// On failure, the state is unmodified.
    pub fn pop_mem(&mut self) -> Result<u64, ExecError> {
        let (value, next) = self.peek_pop()?;
        self.regs.set_rsp(next);
        Ok(value)
    }
    /// Reads the value `pop_mem` would return, along with the new stack pointer.
    fn peek_pop(&self) -> Result<(u64, u64), ExecError> {
        let pos = self.regs.get_rsp();
        let next = pos.checked_add(8)
            .filter(|&next| next <= self.memory.end())
            .ok_or(ExecError::StackUnderflow)?;
        Ok((self.memory.get_u64(pos)?, next))
    }

    fn enter_call(&mut self, return_to: usize) -> Result<(), ExecError> {
        let depth = self.call_depth();
        if depth >= self.max_call_depth { return Err(ExecError::StackOverflow); }
        self.call_stack.push(Frame::Return(return_to));
        self.peak_call_depth = self.peak_call_depth.max(depth + 1);
        debug!("call depth {} (return to {})", depth + 1, return_to);
        Ok(())
    }
    fn leave_call(&mut self) -> Result<Flow, ExecError> {
        match self.call_stack.pop() {
            Some(Frame::Return(target)) => {
                debug!("return to {} (depth {})", target, self.call_depth());
                Ok(Flow::Jump(target))
            }
            Some(Frame::Entry) => Ok(Flow::Halt(HaltReason::Returned)),
            None => Err(ExecError::StackUnderflow),
        }
    }
}
impl Default for ExecutionState {
    fn default() -> Self {
        ExecutionState::new(&Default::default())
    }
}

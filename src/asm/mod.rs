//! Everything pertaining to turning assembly source into an executable `Program`.
//!
//! The accepted syntax is Intel-style (`dest, src`), one instruction per line:
//!
//! ```text
//! entry factorial            ; optional, defaults to the first instruction
//! factorial:
//!     mov rax, 1
//! 1:  cmp rdi, 1             ; numeric labels may be redefined
//!     jle 2f                 ; and are referenced as `Nb` (backward) or `Nf` (forward)
//!     imul rax, rdi
//!     dec rdi
//!     jmp 1b
//! 2:  ret
//! ```
//!
//! Mnemonics, registers, size keywords and prefixes are case-insensitive; labels are not.
//! Every label reference is resolved before `assemble` returns.

use std::collections::BTreeMap;
use std::io::{self, BufRead};
use std::fmt;

use thiserror::Error;

mod caseless;
mod constants;
mod args;

use caseless::Caseless;
use constants::*;
use args::*;

use crate::common::{Size, Condition};
use crate::common::util::Punctuated;

/// The types of errors associated with failed address parsing,
/// but for which we know the argument was intended to be an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BadAddress {
    #[error("missing closing bracket")]
    Unterminated,
    #[error("expected an address in brackets")]
    ExpectedBrackets,
    #[error("empty term")]
    EmptyTerm,
    #[error("unrecognized term")]
    UnrecognizedTerm,
    #[error("registers can only be added")]
    RegIllegalOp,
    #[error("address registers must be 64-bit")]
    RegisterNotQword,
    #[error("scale must be 1, 2, 4, or 8")]
    InvalidScale,
    #[error("at most a base and an index register are allowed")]
    TooManyRegisters,
    #[error("displacement does not fit in 32 bits")]
    DispOutOfRange,
}

/// The kinds of errors that can occur during assembly.
/// `DuplicateLabel` and `UnresolvedLabel` are the label resolution failures, everything else is a syntax error.
#[derive(Debug, Error)]
pub enum AsmErrorKind {
    /// A read error occurred, which caused assembly to halt prematurely.
    #[error("failed to read source: {0}")]
    ReadError(#[source] io::Error),

    #[error("unrecognized instruction")]
    UnrecognizedInstruction,
    #[error("this prefix is not allowed on this instruction")]
    InvalidPrefixForThisInstruction,
    #[error("prefix without an instruction")]
    PrefixWithoutInstruction,

    /// Incorrect number of arguments supplied. Expected this many.
    #[error("expected {} operands", Punctuated::or(.0))]
    ArgsExpectedCount(&'static [u8]),
    #[error("expected an operand")]
    ExpectedOperand,
    #[error("unrecognized operand")]
    UnrecognizedOperand,

    #[error("ill-formed numeric literal")]
    IllFormedNumericLiteral,
    #[error("character literal must be a single ascii character")]
    IllFormedCharacterLiteral,
    #[error("immediate value does not fit the operand")]
    ImmOutOfRange,

    #[error("bad address: {0}")]
    BadAddress(BadAddress),

    #[error("unsupported operand types")]
    UnsupportedOperandTypes,
    #[error("unsupported operand size")]
    UnsupportedOperandSize,
    #[error("operands had different sizes")]
    OperandsHadDifferentSizes,
    #[error("could not deduce operand size")]
    CouldNotDeduceOperandSize,
    #[error("explicit size does not match the instruction")]
    ForcedSizeViolation,

    #[error("expected a label")]
    ExpectedLabel,
    #[error("invalid label name")]
    InvalidSymbolName,
    #[error("label name is reserved")]
    ReservedSymbolName,
    #[error("label was already defined")]
    DuplicateLabel,
    #[error("label `{0}` was never defined")]
    UnresolvedLabel(String),
    #[error("entry point was already specified")]
    EntryAlreadyDefined,
}
impl From<BadAddress> for AsmErrorKind {
    fn from(reason: BadAddress) -> Self {
        AsmErrorKind::BadAddress(reason)
    }
}

#[derive(Debug, Error)]
#[error("line {line_num}: {kind}")]
pub struct AsmError {
    /// The type of error that was encountered.
    pub kind: AsmErrorKind,
    /// Line number of the error.
    pub line_num: usize,
    /// Byte index of the error in the line (if relevant).
    pub pos: Option<usize>,
}

/// Grabs the first whitespace-separated token and returns it, along with the index just after it.
/// If no token is present, returns empty string and `raw_stop`.
fn grab_whitespace_sep_token(raw_line: &str, raw_start: usize, raw_stop: usize) -> (&str, usize) {
    let token_start = match raw_line[raw_start..raw_stop].find(|c: char| !c.is_whitespace()) {
        None => raw_stop,
        Some(p) => raw_start + p,
    };
    let token_stop = match raw_line[token_start..raw_stop].find(char::is_whitespace) {
        None => raw_stop,
        Some(p) => token_start + p,
    };
    (&raw_line[token_start..token_stop], token_stop)
}
#[test]
fn test_grab_ws_sep_token() {
    assert_eq!(grab_whitespace_sep_token("   \t repne scasb  ", 3, 18), ("repne", 10));
    assert_eq!(grab_whitespace_sep_token("    \t  ", 1, 7), ("", 7));
    assert_eq!(grab_whitespace_sep_token("", 0, 0), ("", 0));
    assert_eq!(grab_whitespace_sep_token("  ret", 0, 5), ("ret", 5));
}

/// Trims all leading whitespace characters and returns the result and the index of the starting portion.
/// If the string is empty or whitespace, returns empty string and `raw_stop`.
fn trim_start_with_pos(raw_line: &str, raw_start: usize, raw_stop: usize) -> (&str, usize) {
    match raw_line[raw_start..raw_stop].find(|c: char| !c.is_whitespace()) {
        Some(p) => (&raw_line[raw_start + p..raw_stop], raw_start + p),
        None => ("", raw_stop),
    }
}
#[test]
fn test_trim_start_with_pos() {
    assert_eq!(trim_start_with_pos("   \t mov rax, 1  ", 3, 17), ("mov rax, 1  ", 5));
    assert_eq!(trim_start_with_pos("    \t  ", 1, 7), ("", 7));
    assert_eq!(trim_start_with_pos("", 0, 0), ("", 0));
}

fn is_valid_symbol_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        None => return false, // empty symbol name not allowed
        Some(c) => match c {
            '_' | '.' | 'a'..='z' | 'A'..='Z' => (), // first char
            _ => return false,
        }
    }
    chars.all(|c| matches!(c, '_' | '.' | 'a'..='z' | 'A'..='Z' | '0'..='9'))
}
#[test]
fn test_valid_symname() {
    assert!(is_valid_symbol_name("loop_start"));
    assert!(is_valid_symbol_name(".L2"));
    assert!(is_valid_symbol_name("_not_found"));
    assert!(is_valid_symbol_name("strlen.done"));
    assert!(!is_valid_symbol_name("1"));
    assert!(!is_valid_symbol_name("7up"));
    assert!(!is_valid_symbol_name("two words"));
    assert!(!is_valid_symbol_name("$foo"));
    assert!(!is_valid_symbol_name(""));
}

fn is_reserved_symbol_name(name: &str) -> bool {
    let name = Caseless(name);
    lookup_mnemonic(name.0).is_some()
        || GP_REGISTERS.contains_key(&name) || XMM_REGISTERS.contains_key(&name)
        || SIZE_KEYWORDS.contains_key(&name) || PREFIXES.contains_key(&name)
        || name == PTR_KEYWORD || name == ENTRY_DIRECTIVE
}
#[test]
fn test_reserved_symname() {
    assert!(is_reserved_symbol_name("rax"));
    assert!(is_reserved_symbol_name("R15b"));
    assert!(is_reserved_symbol_name("xmm7"));
    assert!(is_reserved_symbol_name("loop"));
    assert!(is_reserved_symbol_name("JNZ"));
    assert!(is_reserved_symbol_name("cmovge"));
    assert!(is_reserved_symbol_name("qword"));
    assert!(is_reserved_symbol_name("ptr"));
    assert!(is_reserved_symbol_name("repz"));
    assert!(is_reserved_symbol_name("entry"));
    assert!(!is_reserved_symbol_name("done"));
    assert!(!is_reserved_symbol_name("loop_start"));
    assert!(!is_reserved_symbol_name("jump"));
}

/// A general-purpose register operand.
/// `high` selects the legacy `AH`/`BH`/`CH`/`DH` byte views.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct GpReg {
    pub id: u8,
    pub size: Size,
    pub high: bool,
}

/// A memory operand of the form `[base + index*scale + disp]`.
/// `size` is the width of the access, which is always filled in by the time an instruction is built.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Address {
    pub base: Option<u8>,
    /// Register id and scale (1, 2, 4, or 8).
    pub index: Option<(u8, u8)>,
    pub disp: i64,
    pub size: Option<Size>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Operand {
    Reg(GpReg),
    Xmm(u8),
    /// An immediate, sign extended to 64 bits.
    Imm(u64),
    Mem(Address),
    /// A resolved jump/call target (instruction index).
    Target(usize),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Prefix {
    Rep, Repe, Repne,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinaryOp {
    Add, Adc, Sub, Sbb, Cmp, And, Or, Xor, Test,
}
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UnaryOp {
    Inc, Dec, Neg, Not,
}
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ShiftOp {
    Shl, Shr, Sar, Rol, Ror,
}
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BitTestOp {
    Bt, Bts, Btr, Btc,
}
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FlagOp {
    Clc, Stc, Cmc, Cld, Std,
}
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LoopOp {
    Loop, Loope, Loopne,
}
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StringOp {
    Movs, Cmps, Scas, Lods, Stos,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Precision {
    Single, Double,
}
impl Precision {
    /// The size of one lane of this precision.
    pub fn size(self) -> Size {
        match self {
            Precision::Single => Size::Dword,
            Precision::Double => Size::Qword,
        }
    }
}
/// Whether an SSE op touches only the low lane or all of them.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Lanes {
    Scalar, Packed,
}
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SseArith {
    Add, Sub, Mul, Div, Min, Max, Sqrt, Rsqrt, Rcp,
}
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SseLogic {
    And, Or, Xor, Andn,
}
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Conversion {
    IntToSingle, IntToDouble,
    /// Truncating.
    SingleToInt,
    /// Truncating.
    DoubleToInt,
    SingleToDouble, DoubleToSingle,
}
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SseOp {
    MovScalar(Precision),
    MovPacked { aligned: bool },
    MovD, MovQ,
    Arith(SseArith, Precision, Lanes),
    Logic(SseLogic),
    Shufps,
    /// `comis*` and `ucomis*`, which behave the same without floating-point exceptions.
    Comi(Precision),
    Cvt(Conversion),
}

/// The closed set of supported operations.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Op {
    Nop, Hlt,

    Mov, Movzx, Movsx, Movsxd, Lea, Xchg, Push, Pop,
    /// `cbw`, `cwde`, `cdqe`: sign extends the lower half of the accumulator into the given width.
    SignExtendAcc(Size),
    /// `cwd`, `cdq`, `cqo`: fills the data register of the given width with the accumulator's sign.
    SignExtendIntoDx(Size),

    Binary(BinaryOp),
    Unary(UnaryOp),
    Mul, Imul, Div, Idiv,
    Shift(ShiftOp),
    BitTest(BitTestOp),
    Popcnt, Blsr, Bextr,
    Flag(FlagOp),

    Jmp,
    Jcc(Condition),
    Jrcxz(Size),
    Loop(LoopOp),
    Call, Ret,
    Cmovcc(Condition),
    Setcc(Condition),

    String(StringOp, Size, Option<Prefix>),

    Sse(SseOp),
}

/// A single validated instruction.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Instruction {
    pub op: Op,
    pub operands: Vec<Operand>,
    /// The operation width: the integer width for integer ops, the lane width for SSE ops.
    pub size: Size,
    /// The 1-based source line this came from.
    pub line_num: usize,
    /// The source text of the instruction (without labels or comments).
    pub text: String,
}
impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// An assembled program: the instruction sequence, its label table and its entry point.
/// It is immutable once built and can be run any number of times.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Program {
    instructions: Vec<Instruction>,
    labels: BTreeMap<String, usize>,
    entry: usize,
}
impl Program {
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }
    /// All named labels and the index of the instruction they refer to.
    /// A label after the last instruction refers to `len()`.
    pub fn labels(&self) -> &BTreeMap<String, usize> {
        &self.labels
    }
    pub fn label(&self, name: &str) -> Option<usize> {
        self.labels.get(name).copied()
    }
    /// Index of the first instruction to execute.
    pub fn entry(&self) -> usize {
        self.entry
    }
    pub fn len(&self) -> usize {
        self.instructions.len()
    }
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

/// Assembles the source into a `Program`.
/// It is not required that `asm` be an actual file - it can just be in memory.
pub fn assemble(asm: &mut dyn BufRead) -> Result<Program, AsmError> {
    let mut args = AssembleArgs::default();

    let mut line = String::new();
    loop {
        line.clear();
        match asm.read_line(&mut line) {
            Err(e) => return Err(AsmError { kind: AsmErrorKind::ReadError(e), line_num: args.line_num, pos: None }),
            Ok(v) => if v == 0 { break; } // check for EOF
        }
        args.line_num += 1;
        args.process_line(&line)?;
    }

    args.finish()
}

//! The tutorial routines, as assembly source plus host wrappers that call them.
//!
//! Each routine is assembled once, on first use, and can then be run against any execution state.
//! Wrappers reset the state, pass arguments in the System V registers (`rdi`, `rsi`, `rdx`, `rcx`, `r8`;
//! floats in `xmm0` and `xmm1`), copy any array or string arguments into memory, run the routine,
//! and read the result from `rax`/`xmm0` or memory.
//! The state is left as the routine left it, so it can be inspected afterwards.

use crate::asm::Program;
use crate::exec::{ExecutionState, Fault};
use crate::exec::registers::Register;

/// Bound on the instructions any single wrapper call may execute.
pub const ROUTINE_STEP_LIMIT: u64 = 10_000_000;

pub const ADD_SRC: &str = r"
add_numbers:
    mov rax, rdi
    add rax, rsi
    ret
";

pub const MAX_SRC: &str = r"
max:
    mov rax, rsi
    cmp rdi, rsi
    cmovg rax, rdi
    cmovle rax, rsi
    ret
";

pub const FACTORIAL_SRC: &str = r"
factorial:
    mov rax, 1
    mov rbx, rdi
1:  cmp rbx, 1
    jle 2f
    mul rbx
    dec rbx
    jmp 1b
2:  ret
";

pub const FIBONACCI_SRC: &str = r"
fib:
    push rbp
    mov rbp, rsp
    push rbx
    push r12

    cmp rdi, 1
    jle .base_case

    mov rbx, rdi
    dec rdi
    call fib            ; fib(n - 1)
    mov r12, rax
    mov rdi, rbx
    sub rdi, 2
    call fib            ; fib(n - 2)
    add rax, r12
    jmp .cleanup

.base_case:
    mov rax, rdi
.cleanup:
    pop r12
    pop rbx
    pop rbp
    ret
";

pub const MULTIPLY_ADD_SRC: &str = r"
multiply_add:
    push rbp
    mov rbp, rsp
    mov rcx, rdx        ; mul overwrites rdx
    mov rax, rdi
    mul rsi
    add rax, rcx
    pop rbp
    ret
";

pub const COMPLEX_CALCULATION_SRC: &str = r"
complex_calculation:
    mov rcx, rdx
    mov rax, rdi
    mul rsi
    mov rbx, rax        ; x * y
    mov rax, rcx
    shl rax, 1          ; z * 2
    add rax, rbx
    ret
";

pub const STRLEN_SRC: &str = r"
strlen:
    xor rax, rax        ; scan for al = 0
    mov rcx, -1
    cld
    repne scasb
    not rcx
    dec rcx
    mov rax, rcx
    ret
";

pub const STRCPY_SRC: &str = r"
strcpy:
    mov rdx, rdi
    cld
1:  lodsb
    stosb
    test al, al
    jnz 1b
    mov rax, rdx
    ret
";

pub const MEMCMP_SRC: &str = r"
memcmp:
    mov rcx, rdx
    xchg rdi, rsi       ; cmps subtracts [rdi] from [rsi]
    xor eax, eax        ; empty ranges compare equal
    cld
    repe cmpsb
    je 2f
    mov eax, -1
    jb 2f
    mov eax, 1
2:  ret
";

pub const ARRAY_SUM_SRC: &str = r"
array_sum:
    xor rax, rax
    mov rcx, rsi
    mov rsi, rdi
    test rcx, rcx
    jz 2f
1:  add rax, [rsi]
    add rsi, 8
    dec rcx
    jnz 1b
2:  ret
";

pub const ARRAY_SEARCH_SRC: &str = r"
array_search:
    mov rcx, rsi
    mov rsi, rdi
    xor rax, rax
    test rcx, rcx
    jz 3f
1:  cmp rdx, [rsi]
    je 2f
    add rsi, 8
    inc rax
    dec rcx
    jnz 1b
3:  mov rax, -1
2:  ret
";

pub const ARRAY_MAX_SRC: &str = r"
array_max:
    mov rcx, rsi
    mov rsi, rdi
    xor rax, rax
    test rcx, rcx
    jz 2f
    mov rax, [rsi]
    add rsi, 8
    dec rcx
    jz 2f
1:  mov rdx, [rsi]
    cmp rdx, rax
    cmovg rax, rdx
    add rsi, 8
    dec rcx
    jnz 1b
2:  ret
";

pub const MATRIX_GET_SRC: &str = r"
matrix_get:             ; (matrix, rows, cols, row, col)
    mov rax, rcx
    mul rdx
    add rax, r8
    lea rsi, [rdi + rax*8]
    mov rax, qword ptr [rsi]
    ret
";

pub const POPCOUNT_SRC: &str = r"
popcount:
    mov rax, rdi
    xor rbx, rbx
    test rax, rax
    jz 2f
1:  mov rcx, rax
    dec rcx
    and rax, rcx        ; clear the lowest set bit
    inc rbx
    test rax, rax
    jnz 1b
2:  mov eax, ebx
    ret
";

pub const EXTRACT_BITS_SRC: &str = r"
extract_bits:
    mov rax, rdi
    mov ecx, esi
    shr rax, cl
    mov ecx, edx
    mov rdx, 1
    shl rdx, cl
    dec rdx
    and rax, rdx
    ret
";

pub const SET_BIT_SRC: &str = r"
set_bit:
    mov rax, rdi
    mov ecx, esi
    mov rdx, 1
    shl rdx, cl
    or rax, rdx
    ret
";

pub const CLEAR_BIT_SRC: &str = r"
clear_bit:
    mov rax, rdi
    mov ecx, esi
    mov rdx, 1
    shl rdx, cl
    not rdx
    and rax, rdx
    ret
";

pub const ROTATE_LEFT_SRC: &str = r"
rotate_left:
    mov rax, rdi
    mov ecx, esi
    rol rax, cl
    ret
";

pub const IS_POWER_OF_2_SRC: &str = r"
is_power_of_2:
    mov rax, rdi
    test rax, rax
    jz 2f
    mov rdx, rax
    dec rdx
    and rax, rdx
    setz al
    movzx eax, al
    jmp 3f
2:  xor eax, eax
3:  ret
";

pub const ADD_FLOATS_SRC: &str = r"
add_floats:
    addss xmm0, xmm1
    ret
";

pub const COMPARE_FLOATS_SRC: &str = r"
compare_floats:
    comiss xmm0, xmm1
    mov eax, 0
    je 2f
    mov eax, -1
    jb 2f
    mov eax, 1
2:  ret
";

pub const SQRT_SRC: &str = r"
sqrt:
    sqrtss xmm0, xmm0
    ret
";

pub const ADD_VECTORS_SRC: &str = r"
add_vectors:            ; (a, b, result)
    movups xmm0, [rdi]
    movups xmm1, [rsi]
    addps xmm0, xmm1
    movups [rdx], xmm0
    ret
";

pub const DOT_PRODUCT_SRC: &str = r"
dot_product:            ; (a, b, count), only whole groups of 4 are summed
    xorps xmm0, xmm0
    mov ecx, edx
    shr ecx, 2
    jz 2f
1:  movups xmm1, [rdi]
    movups xmm2, [rsi]
    mulps xmm1, xmm2
    addps xmm0, xmm1
    add rdi, 16
    add rsi, 16
    dec ecx
    jnz 1b
2:  movaps xmm1, xmm0   ; horizontal sum
    shufps xmm1, xmm1, 0x4e
    addps xmm0, xmm1
    movaps xmm1, xmm0
    shufps xmm1, xmm1, 0xb1
    addss xmm0, xmm1
    ret
";

pub const FAST_INV_SQRT_SRC: &str = r"
fast_inv_sqrt:
    rsqrtss xmm0, xmm0
    ret
";

fn load(src: &str) -> Program {
    crate::load_program(src).unwrap_or_else(|e| panic!("built-in routine failed to assemble: {}", e))
}

lazy_static! {
    pub static ref ADD: Program = load(ADD_SRC);
    pub static ref MAX: Program = load(MAX_SRC);
    pub static ref FACTORIAL: Program = load(FACTORIAL_SRC);
    pub static ref FIBONACCI: Program = load(FIBONACCI_SRC);
    pub static ref MULTIPLY_ADD: Program = load(MULTIPLY_ADD_SRC);
    pub static ref COMPLEX_CALCULATION: Program = load(COMPLEX_CALCULATION_SRC);
    pub static ref STRLEN: Program = load(STRLEN_SRC);
    pub static ref STRCPY: Program = load(STRCPY_SRC);
    pub static ref MEMCMP: Program = load(MEMCMP_SRC);
    pub static ref ARRAY_SUM: Program = load(ARRAY_SUM_SRC);
    pub static ref ARRAY_SEARCH: Program = load(ARRAY_SEARCH_SRC);
    pub static ref ARRAY_MAX: Program = load(ARRAY_MAX_SRC);
    pub static ref MATRIX_GET: Program = load(MATRIX_GET_SRC);
    pub static ref POPCOUNT: Program = load(POPCOUNT_SRC);
    pub static ref EXTRACT_BITS: Program = load(EXTRACT_BITS_SRC);
    pub static ref SET_BIT: Program = load(SET_BIT_SRC);
    pub static ref CLEAR_BIT: Program = load(CLEAR_BIT_SRC);
    pub static ref ROTATE_LEFT: Program = load(ROTATE_LEFT_SRC);
    pub static ref IS_POWER_OF_2: Program = load(IS_POWER_OF_2_SRC);
    pub static ref ADD_FLOATS: Program = load(ADD_FLOATS_SRC);
    pub static ref COMPARE_FLOATS: Program = load(COMPARE_FLOATS_SRC);
    pub static ref SQRT: Program = load(SQRT_SRC);
    pub static ref ADD_VECTORS: Program = load(ADD_VECTORS_SRC);
    pub static ref DOT_PRODUCT: Program = load(DOT_PRODUCT_SRC);
    pub static ref FAST_INV_SQRT: Program = load(FAST_INV_SQRT_SRC);
}

const ARG_REGS: [Register; 5] = [Register::RDI, Register::RSI, Register::RDX, Register::RCX, Register::R8];

/// Loads integer arguments without resetting, for wrappers that have already placed data in memory.
fn setup_regs(state: &mut ExecutionState, args: &[u64]) {
    for (reg, val) in ARG_REGS.iter().zip(args) {
        state.regs.gp[*reg as usize].0 = *val;
    }
}
/// Resets the state and loads integer arguments.
fn setup(state: &mut ExecutionState, args: &[u64]) {
    state.reset();
    setup_regs(state, args);
}
/// Resets the state and loads single-precision arguments.
fn setup_f32(state: &mut ExecutionState, args: &[f32]) {
    state.reset();
    for (i, val) in args.iter().enumerate() {
        state.regs.xmm[i].set_f32(0, *val);
    }
}
/// Runs a routine that has been set up, returning the number of instructions executed.
fn invoke(state: &mut ExecutionState, program: &Program) -> Result<u64, Fault> {
    let res = state.run(program, Some(ROUTINE_STEP_LIMIT));
    let steps = res.steps;
    res.outcome.map(|_| steps)
}
fn alloc_i64s(state: &mut ExecutionState, vals: &[i64]) -> Result<u64, Fault> {
    let bytes: Vec<u8> = vals.iter().flat_map(|v| v.to_le_bytes()).collect();
    Ok(state.memory.alloc_bytes(&bytes, 8)?)
}
fn alloc_f32s(state: &mut ExecutionState, vals: &[f32]) -> Result<u64, Fault> {
    let bytes: Vec<u8> = vals.iter().flat_map(|v| v.to_le_bytes()).collect();
    Ok(state.memory.alloc_bytes(&bytes, 16)?)
}
fn alloc_c_string(state: &mut ExecutionState, s: &[u8]) -> Result<u64, Fault> {
    let mut bytes = s.to_vec();
    bytes.push(0);
    Ok(state.memory.alloc_bytes(&bytes, 1)?)
}

pub fn add_asm(state: &mut ExecutionState, a: i64, b: i64) -> Result<i64, Fault> {
    setup(state, &[a as u64, b as u64]);
    invoke(state, &ADD)?;
    Ok(state.regs.get_rax() as i64)
}
/// Signed maximum, computed with `cmovg`/`cmovle`.
pub fn max_asm(state: &mut ExecutionState, a: i64, b: i64) -> Result<i64, Fault> {
    setup(state, &[a as u64, b as u64]);
    invoke(state, &MAX)?;
    Ok(state.regs.get_rax() as i64)
}
/// Iterative factorial; `0!` and `1!` skip the loop body entirely.
pub fn factorial_asm(state: &mut ExecutionState, n: u64) -> Result<u64, Fault> {
    setup(state, &[n]);
    invoke(state, &FACTORIAL)?;
    Ok(state.regs.get_rax())
}
/// Doubly recursive Fibonacci. The recursion depth is `n - 1`, which is bounded by the state's maximum call depth.
pub fn fibonacci_asm(state: &mut ExecutionState, n: i64) -> Result<i64, Fault> {
    setup(state, &[n as u64]);
    invoke(state, &FIBONACCI)?;
    Ok(state.regs.get_rax() as i64)
}
/// `a * b + c`.
pub fn multiply_add_asm(state: &mut ExecutionState, a: i64, b: i64, c: i64) -> Result<i64, Fault> {
    setup(state, &[a as u64, b as u64, c as u64]);
    invoke(state, &MULTIPLY_ADD)?;
    Ok(state.regs.get_rax() as i64)
}
/// `x * y + z * 2`.
pub fn complex_calculation(state: &mut ExecutionState, x: i64, y: i64, z: i64) -> Result<i64, Fault> {
    setup(state, &[x as u64, y as u64, z as u64]);
    invoke(state, &COMPLEX_CALCULATION)?;
    Ok(state.regs.get_rax() as i64)
}

/// Length of a string, found with `repne scasb`. `s` must not contain a null byte.
pub fn strlen_asm(state: &mut ExecutionState, s: &[u8]) -> Result<u64, Fault> {
    state.reset();
    let p = alloc_c_string(state, s)?;
    state.regs.set_rdi(p);
    invoke(state, &STRLEN)?;
    Ok(state.regs.get_rax())
}
/// Copies a null-terminated string with `lodsb`/`stosb` and returns what landed at the destination.
pub fn strcpy_asm(state: &mut ExecutionState, src: &[u8]) -> Result<Vec<u8>, Fault> {
    state.reset();
    let s = alloc_c_string(state, src)?;
    let d = state.memory.alloc(src.len() + 1, 1)?;
    state.regs.set_rdi(d);
    state.regs.set_rsi(s);
    invoke(state, &STRCPY)?;
    Ok(state.memory.get_null_terminated(state.regs.get_rax())?.to_vec())
}
/// Compares the first `n` bytes with `repe cmpsb`: -1, 0 or 1.
pub fn memcmp_asm(state: &mut ExecutionState, a: &[u8], b: &[u8], n: u64) -> Result<i32, Fault> {
    state.reset();
    let pa = state.memory.alloc_bytes(a, 1)?;
    let pb = state.memory.alloc_bytes(b, 1)?;
    setup_regs(state, &[pa, pb, n]);
    invoke(state, &MEMCMP)?;
    Ok(state.regs.get_eax() as i32)
}

pub fn array_sum_asm(state: &mut ExecutionState, arr: &[i64]) -> Result<i64, Fault> {
    state.reset();
    let p = alloc_i64s(state, arr)?;
    setup_regs(state, &[p, arr.len() as u64]);
    invoke(state, &ARRAY_SUM)?;
    Ok(state.regs.get_rax() as i64)
}
/// Index of the first occurrence of `target`, or -1.
pub fn array_search_asm(state: &mut ExecutionState, arr: &[i64], target: i64) -> Result<i32, Fault> {
    state.reset();
    let p = alloc_i64s(state, arr)?;
    setup_regs(state, &[p, arr.len() as u64, target as u64]);
    invoke(state, &ARRAY_SEARCH)?;
    Ok(state.regs.get_eax() as i32)
}
/// Signed maximum of the array, or 0 if it is empty.
pub fn array_max_asm(state: &mut ExecutionState, arr: &[i64]) -> Result<i64, Fault> {
    state.reset();
    let p = alloc_i64s(state, arr)?;
    setup_regs(state, &[p, arr.len() as u64]);
    invoke(state, &ARRAY_MAX)?;
    Ok(state.regs.get_rax() as i64)
}
/// Element `[row][col]` of a row-major matrix with `cols` columns.
pub fn matrix_get_asm(state: &mut ExecutionState, matrix: &[i64], rows: u64, cols: u64, row: u64, col: u64) -> Result<i64, Fault> {
    state.reset();
    let p = alloc_i64s(state, matrix)?;
    setup_regs(state, &[p, rows, cols, row, col]);
    invoke(state, &MATRIX_GET)?;
    Ok(state.regs.get_rax() as i64)
}

/// Population count by clearing the lowest set bit until none remain.
/// Also returns the number of instructions executed, which grows by 6 per set bit.
pub fn popcount_asm(state: &mut ExecutionState, value: u64) -> Result<(i32, u64), Fault> {
    setup(state, &[value]);
    let steps = invoke(state, &POPCOUNT)?;
    Ok((state.regs.get_eax() as i32, steps))
}
/// `num_bits` bits of `value` starting at `start_bit`. Counts are masked to 6 bits, as the shifts do.
pub fn extract_bits_asm(state: &mut ExecutionState, value: u64, start_bit: i32, num_bits: i32) -> Result<u64, Fault> {
    setup(state, &[value, start_bit as u32 as u64, num_bits as u32 as u64]);
    invoke(state, &EXTRACT_BITS)?;
    Ok(state.regs.get_rax())
}
pub fn set_bit_asm(state: &mut ExecutionState, value: u64, bit: i32) -> Result<u64, Fault> {
    setup(state, &[value, bit as u32 as u64]);
    invoke(state, &SET_BIT)?;
    Ok(state.regs.get_rax())
}
pub fn clear_bit_asm(state: &mut ExecutionState, value: u64, bit: i32) -> Result<u64, Fault> {
    setup(state, &[value, bit as u32 as u64]);
    invoke(state, &CLEAR_BIT)?;
    Ok(state.regs.get_rax())
}
pub fn rotate_left_asm(state: &mut ExecutionState, value: u64, positions: i32) -> Result<u64, Fault> {
    setup(state, &[value, positions as u32 as u64]);
    invoke(state, &ROTATE_LEFT)?;
    Ok(state.regs.get_rax())
}
/// 1 if `value` has exactly one bit set, otherwise 0 (including for 0).
pub fn is_power_of_2_asm(state: &mut ExecutionState, value: u64) -> Result<i32, Fault> {
    setup(state, &[value]);
    invoke(state, &IS_POWER_OF_2)?;
    Ok(state.regs.get_eax() as i32)
}

pub fn add_floats_sse(state: &mut ExecutionState, a: f32, b: f32) -> Result<f32, Fault> {
    setup_f32(state, &[a, b]);
    invoke(state, &ADD_FLOATS)?;
    Ok(state.regs.xmm[0].get_f32(0))
}
/// -1, 0 or 1. Unordered operands (NaN) compare equal.
pub fn compare_floats_sse(state: &mut ExecutionState, a: f32, b: f32) -> Result<i32, Fault> {
    setup_f32(state, &[a, b]);
    invoke(state, &COMPARE_FLOATS)?;
    Ok(state.regs.get_eax() as i32)
}
pub fn sqrt_sse(state: &mut ExecutionState, value: f32) -> Result<f32, Fault> {
    setup_f32(state, &[value]);
    invoke(state, &SQRT)?;
    Ok(state.regs.xmm[0].get_f32(0))
}
pub fn add_vectors_sse(state: &mut ExecutionState, a: [f32; 4], b: [f32; 4]) -> Result<[f32; 4], Fault> {
    state.reset();
    let pa = alloc_f32s(state, &a)?;
    let pb = alloc_f32s(state, &b)?;
    let pr = state.memory.alloc(16, 16)?;
    setup_regs(state, &[pa, pb, pr]);
    invoke(state, &ADD_VECTORS)?;
    Ok(state.memory.load_f32x4(pr, false)?)
}
/// Dot product of the first `count` elements, rounded down to a multiple of 4.
pub fn dot_product_sse(state: &mut ExecutionState, a: &[f32], b: &[f32], count: i32) -> Result<f32, Fault> {
    state.reset();
    let pa = alloc_f32s(state, a)?;
    let pb = alloc_f32s(state, b)?;
    setup_regs(state, &[pa, pb, count as u32 as u64]);
    invoke(state, &DOT_PRODUCT)?;
    Ok(state.regs.xmm[0].get_f32(0))
}
pub fn fast_inv_sqrt_sse(state: &mut ExecutionState, value: f32) -> Result<f32, Fault> {
    setup_f32(state, &[value]);
    invoke(state, &FAST_INV_SQRT)?;
    Ok(state.regs.xmm[0].get_f32(0))
}

#[test]
fn test_routines_assemble() {
    for prog in [
        &*ADD, &*MAX, &*FACTORIAL, &*FIBONACCI, &*MULTIPLY_ADD, &*COMPLEX_CALCULATION,
        &*STRLEN, &*STRCPY, &*MEMCMP, &*ARRAY_SUM, &*ARRAY_SEARCH, &*ARRAY_MAX, &*MATRIX_GET,
        &*POPCOUNT, &*EXTRACT_BITS, &*SET_BIT, &*CLEAR_BIT, &*ROTATE_LEFT, &*IS_POWER_OF_2,
        &*ADD_FLOATS, &*COMPARE_FLOATS, &*SQRT, &*ADD_VECTORS, &*DOT_PRODUCT, &*FAST_INV_SQRT,
    ].iter() {
        assert!(!prog.is_empty());
        assert_eq!(prog.entry(), 0);
        assert_eq!(prog.instructions().last().map(|i| i.op), Some(crate::asm::Op::Ret));
    }
}
#[test]
fn test_routine_sources_assemble() {
    let sources = [
        ADD_SRC, MAX_SRC, FACTORIAL_SRC, FIBONACCI_SRC, MULTIPLY_ADD_SRC, COMPLEX_CALCULATION_SRC,
        STRLEN_SRC, STRCPY_SRC, MEMCMP_SRC, ARRAY_SUM_SRC, ARRAY_SEARCH_SRC, ARRAY_MAX_SRC, MATRIX_GET_SRC,
        POPCOUNT_SRC, EXTRACT_BITS_SRC, SET_BIT_SRC, CLEAR_BIT_SRC, ROTATE_LEFT_SRC, IS_POWER_OF_2_SRC,
        ADD_FLOATS_SRC, COMPARE_FLOATS_SRC, SQRT_SRC, ADD_VECTORS_SRC, DOT_PRODUCT_SRC, FAST_INV_SQRT_SRC,
    ];
    for src in sources.iter() {
        if let Err(e) = crate::load_program(src) {
            panic!("{}\n{}", e, src);
        }
    }
    assert_eq!(ADD.label("add_numbers"), Some(0));
}

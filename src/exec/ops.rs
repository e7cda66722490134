//! Semantics of the integer, control-flow and string instructions.
//!
//! Every handler reads all of its inputs before writing anything, computes flags into a local copy,
//! and writes memory before registers, so a failing instruction leaves no partial effects.
//! Repeated string instructions are the exception: each iteration is atomic and commits its
//! pointer, count and flag updates, so a fault partway through keeps the completed iterations
//! and leaves `rcx`/`rsi`/`rdi` pointing at the element that failed. Resuming restarts from there.

use crate::asm::{Instruction, Operand, Address, GpReg, Op, BinaryOp, UnaryOp, ShiftOp, BitTestOp, FlagOp, LoopOp, StringOp, Prefix};
use crate::common::Size;
use crate::common::util::{truncate, sign_extend, sign_bit, checked_quotient_and_remainder};

use super::{ExecutionState, ExecError, HaltReason};
use super::registers::Register;
use super::flags::{Flags, ArithOp};

/// What to do after an instruction completes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(super) enum Flow {
    Next,
    Jump(usize),
    Halt(HaltReason),
}

macro_rules! calc_mul {
    ($a:ident, $b:ident : $normal:ty, $extended:ty, $normal_bits:literal) => {{
        let full = $a as $normal as $extended * $b as $normal as $extended;
        ((full >> $normal_bits) as u64, full as u64, full as $normal as $extended != full)
    }}
}

/// Computes the unsigned product of `a` and `b`, split into high and low halves.
/// Bits in `a` and `b` that are outside of `size` are ignored.
/// For the low half of the result, bits outside the range of `size` but up to twice its width are the truncated full value.
/// Also returns a flag denoting if the product does not fit in `size`.
fn raw_mul(size: Size, a: u64, b: u64) -> (u64, u64, bool) {
    match size {
        Size::Byte => calc_mul!(a, b : u8, u16, 8),
        Size::Word => calc_mul!(a, b : u16, u32, 16),
        Size::Dword => calc_mul!(a, b : u32, u64, 32),
        Size::Qword | Size::Xword => calc_mul!(a, b : u64, u128, 64),
    }
}
/// As `raw_mul` except performs signed multiplication.
fn raw_imul(size: Size, a: u64, b: u64) -> (u64, u64, bool) {
    match size {
        Size::Byte => calc_mul!(a, b : i8, i16, 8),
        Size::Word => calc_mul!(a, b : i16, i32, 16),
        Size::Dword => calc_mul!(a, b : i32, i64, 32),
        Size::Qword | Size::Xword => calc_mul!(a, b : i64, i128, 64),
    }
}

macro_rules! calc_div {
    ($a:ident, $b:ident : $normal:ty, $extended:ty) => {{
        let (quo, rem) = checked_quotient_and_remainder($a as $extended, $b as $normal as $extended)?;
        if quo as $normal as $extended != quo { None } else { Some((quo as u64, rem as u64)) }
    }}
}

/// Divides the double-width numerator `a` by `b`, returning the quotient and remainder.
/// Yields `None` if `b` is zero or the quotient does not fit in `size`.
/// Bits outside the range of twice `size` (for a), or `size` (for b) are ignored.
fn raw_div(size: Size, a: u128, b: u64) -> Option<(u64, u64)> {
    match size {
        Size::Byte => calc_div!(a, b : u8, u16),
        Size::Word => calc_div!(a, b : u16, u32),
        Size::Dword => calc_div!(a, b : u32, u64),
        Size::Qword | Size::Xword => calc_div!(a, b : u64, u128),
    }
}
fn raw_idiv(size: Size, a: u128, b: u64) -> Option<(u64, u64)> {
    match size {
        Size::Byte => calc_div!(a, b : i8, i16),
        Size::Word => calc_div!(a, b : i16, i32),
        Size::Dword => calc_div!(a, b : i32, i64),
        Size::Qword | Size::Xword => calc_div!(a, b : i64, i128),
    }
}

fn rotate(size: Size, val: u64, n: u32, left: bool) -> u64 {
    match (size, left) {
        (Size::Byte, true) => (val as u8).rotate_left(n) as u64,
        (Size::Byte, false) => (val as u8).rotate_right(n) as u64,
        (Size::Word, true) => (val as u16).rotate_left(n) as u64,
        (Size::Word, false) => (val as u16).rotate_right(n) as u64,
        (Size::Dword, true) => (val as u32).rotate_left(n) as u64,
        (Size::Dword, false) => (val as u32).rotate_right(n) as u64,
        (_, true) => val.rotate_left(n),
        (_, false) => val.rotate_right(n),
    }
}

macro_rules! impl_string_repeat {
    ($self:ident, $size:ident, $func:ident, $cond:expr) => {{
        let mut rcx;
        while { rcx = $self.regs.get_rcx(); rcx != 0 } {
            $func($self, $size)?;
            $self.regs.set_rcx(rcx - 1);
            if !$cond { break }
        }
        Ok(())
    }}
}

fn unary(instr: &Instruction) -> Result<&Operand, ExecError> {
    match instr.operands.as_slice() {
        [a] => Ok(a),
        _ => Err(ExecError::InvalidOperand),
    }
}
pub(super) fn binary(instr: &Instruction) -> Result<(&Operand, &Operand), ExecError> {
    match instr.operands.as_slice() {
        [a, b] => Ok((a, b)),
        _ => Err(ExecError::InvalidOperand),
    }
}
fn ternary(instr: &Instruction) -> Result<(&Operand, &Operand, &Operand), ExecError> {
    match instr.operands.as_slice() {
        [a, b, c] => Ok((a, b, c)),
        _ => Err(ExecError::InvalidOperand),
    }
}
fn target(instr: &Instruction) -> Result<usize, ExecError> {
    match instr.operands.as_slice() {
        [Operand::Target(t)] => Ok(*t),
        _ => Err(ExecError::InvalidOperand),
    }
}
/// Gets the width of a register or memory operand, if it has an intrinsic one.
fn operand_size(op: &Operand) -> Option<Size> {
    match op {
        Operand::Reg(r) => Some(r.size),
        Operand::Mem(a) => a.size,
        _ => None,
    }
}

const RAX: u8 = Register::RAX as u8;
const RCX: u8 = Register::RCX as u8;
const RDX: u8 = Register::RDX as u8;

impl ExecutionState {
    pub(super) fn effective_address(&self, addr: &Address) -> Result<u64, ExecError> {
        let mut res = addr.disp as u64;
        if let Some(base) = addr.base {
            res = res.wrapping_add(self.regs.read(base, Size::Qword)?);
        }
        if let Some((index, scale)) = addr.index {
            res = res.wrapping_add(self.regs.read(index, Size::Qword)?.wrapping_mul(scale as u64));
        }
        Ok(res)
    }

    fn read_gp(&self, r: GpReg) -> Result<u64, ExecError> {
        if r.high { Ok(self.regs.read_high(r.id)? as u64) } else { self.regs.read(r.id, r.size) }
    }
    fn write_gp(&mut self, r: GpReg, value: u64) -> Result<(), ExecError> {
        if r.high { self.regs.write_high(r.id, value as u8) } else { self.regs.write(r.id, r.size, value) }
    }

    /// Reads an integer operand, zero extended to 64-bit.
    /// Registers and memory are read at their own width; `size` applies to immediates and unsized memory.
    pub(super) fn read_operand(&self, op: &Operand, size: Size) -> Result<u64, ExecError> {
        match op {
            Operand::Reg(r) => self.read_gp(*r),
            Operand::Imm(v) => Ok(truncate(*v, size)),
            Operand::Mem(a) => self.memory.load(self.effective_address(a)?, a.size.unwrap_or(size)),
            Operand::Xmm(_) | Operand::Target(_) => Err(ExecError::InvalidOperand),
        }
    }
    /// Writes an integer operand, truncating `value` to the operand's width.
    pub(super) fn write_operand(&mut self, op: &Operand, size: Size, value: u64) -> Result<(), ExecError> {
        match op {
            Operand::Reg(r) => self.write_gp(*r, value),
            Operand::Mem(a) => {
                let addr = self.effective_address(a)?;
                self.memory.store(addr, a.size.unwrap_or(size), value)
            }
            Operand::Imm(_) | Operand::Xmm(_) | Operand::Target(_) => Err(ExecError::InvalidOperand),
        }
    }

    /// Executes the instruction at index `ip`.
    pub(super) fn execute(&mut self, instr: &Instruction, ip: usize) -> Result<Flow, ExecError> {
        if !instr.size.is_basic() && !matches!(instr.op, Op::Sse(_)) { return Err(ExecError::InvalidOperand); }

        match instr.op {
            Op::Nop => Ok(Flow::Next),
            Op::Hlt => Ok(Flow::Halt(HaltReason::Halt)),

            Op::Mov => self.exec_mov(instr),
            Op::Movzx => self.exec_movx(instr, false),
            Op::Movsx | Op::Movsxd => self.exec_movx(instr, true),
            Op::Lea => self.exec_lea(instr),
            Op::Xchg => self.exec_xchg(instr),
            Op::Push => self.exec_push(instr),
            Op::Pop => self.exec_pop(instr),
            Op::SignExtendAcc(size) => self.exec_sign_extend_acc(size),
            Op::SignExtendIntoDx(size) => self.exec_sign_extend_into_dx(size),

            Op::Binary(kind) => self.exec_binary(instr, kind),
            Op::Unary(kind) => self.exec_unary(instr, kind),
            Op::Mul => self.exec_uimul_1(instr, raw_mul),
            Op::Imul => match instr.operands.len() {
                1 => self.exec_uimul_1(instr, raw_imul),
                _ => self.exec_imul_n(instr),
            }
            Op::Div => self.exec_uidiv(instr, raw_div),
            Op::Idiv => self.exec_uidiv(instr, raw_idiv),
            Op::Shift(kind) => self.exec_shift(instr, kind),
            Op::BitTest(kind) => self.exec_bit_test(instr, kind),
            Op::Popcnt => self.exec_popcnt(instr),
            Op::Blsr => self.exec_blsr(instr),
            Op::Bextr => self.exec_bextr(instr),
            Op::Flag(kind) => self.exec_flag(kind),

            Op::Jmp => Ok(Flow::Jump(target(instr)?)),
            Op::Jcc(cc) => {
                let t = target(instr)?;
                Ok(if self.flags.condition(cc) { Flow::Jump(t) } else { Flow::Next })
            }
            Op::Jrcxz(size) => {
                let t = target(instr)?;
                Ok(if self.regs.read(RCX, size)? == 0 { Flow::Jump(t) } else { Flow::Next })
            }
            Op::Loop(kind) => self.exec_loopcc(instr, kind),
            Op::Call => {
                let t = target(instr)?;
                self.enter_call(ip + 1)?;
                Ok(Flow::Jump(t))
            }
            Op::Ret => self.leave_call(),
            Op::Cmovcc(cc) => {
                let (dst, src) = binary(instr)?;
                let v = self.read_operand(src, instr.size)?;
                if self.flags.condition(cc) { self.write_operand(dst, instr.size, v)?; }
                Ok(Flow::Next)
            }
            Op::Setcc(cc) => {
                let dst = unary(instr)?;
                self.write_operand(dst, Size::Byte, self.flags.condition(cc) as u64)?;
                Ok(Flow::Next)
            }

            Op::String(kind, size, prefix) => self.exec_string(kind, size, prefix),

            Op::Sse(op) => self.exec_sse(instr, op),
        }
    }

    // -------------------------------------------------------------------------------------

    fn exec_mov(&mut self, instr: &Instruction) -> Result<Flow, ExecError> {
        let (dst, src) = binary(instr)?;
        let v = self.read_operand(src, instr.size)?;
        self.write_operand(dst, instr.size, v)?;
        Ok(Flow::Next)
    }
    fn exec_movx(&mut self, instr: &Instruction, signed: bool) -> Result<Flow, ExecError> {
        let (dst, src) = binary(instr)?;
        let src_size = operand_size(src).ok_or(ExecError::InvalidOperand)?;
        let v = self.read_operand(src, src_size)?;
        let v = if signed { sign_extend(v, src_size) } else { v };
        self.write_operand(dst, instr.size, v)?;
        Ok(Flow::Next)
    }
    fn exec_lea(&mut self, instr: &Instruction) -> Result<Flow, ExecError> {
        let (dst, src) = binary(instr)?;
        let addr = match src {
            Operand::Mem(a) => self.effective_address(a)?,
            _ => return Err(ExecError::InvalidOperand),
        };
        self.write_operand(dst, instr.size, addr)?;
        Ok(Flow::Next)
    }
    fn exec_xchg(&mut self, instr: &Instruction) -> Result<Flow, ExecError> {
        let (dst, src) = binary(instr)?;
        let a = self.read_operand(dst, instr.size)?;
        let b = self.read_operand(src, instr.size)?;
        if let Operand::Mem(_) = src {
            self.write_operand(src, instr.size, a)?;
            self.write_operand(dst, instr.size, b)?;
        } else {
            self.write_operand(dst, instr.size, b)?;
            self.write_operand(src, instr.size, a)?;
        }
        Ok(Flow::Next)
    }
    fn exec_push(&mut self, instr: &Instruction) -> Result<Flow, ExecError> {
        let v = self.read_operand(unary(instr)?, Size::Qword)?;
        self.push_mem(v)?;
        Ok(Flow::Next)
    }
    fn exec_pop(&mut self, instr: &Instruction) -> Result<Flow, ExecError> {
        let dst = unary(instr)?;
        let (v, next) = self.peek_pop()?;
        if let Operand::Mem(_) = dst {
            self.write_operand(dst, Size::Qword, v)?;
            self.regs.set_rsp(next);
        } else {
            self.regs.set_rsp(next); // so that `pop rsp` keeps the popped value
            self.write_operand(dst, Size::Qword, v)?;
        }
        Ok(Flow::Next)
    }
    fn exec_sign_extend_acc(&mut self, size: Size) -> Result<Flow, ExecError> {
        let half = match size {
            Size::Word => Size::Byte,
            Size::Dword => Size::Word,
            Size::Qword => Size::Dword,
            _ => return Err(ExecError::InvalidOperand),
        };
        let v = self.regs.read(RAX, half)?;
        self.regs.write(RAX, size, sign_extend(v, half))?;
        Ok(Flow::Next)
    }
    fn exec_sign_extend_into_dx(&mut self, size: Size) -> Result<Flow, ExecError> {
        let v = self.regs.read(RAX, size)?;
        self.regs.write(RDX, size, if sign_bit(v, size) { !0 } else { 0 })?;
        Ok(Flow::Next)
    }

    fn exec_binary(&mut self, instr: &Instruction, kind: BinaryOp) -> Result<Flow, ExecError> {
        let size = instr.size;
        let (dst, src) = binary(instr)?;
        let a = self.read_operand(dst, size)?;
        let b = self.read_operand(src, size)?;
        let cf = self.flags.get_cf();

        let (res, arith) = match kind {
            BinaryOp::Add => (a.wrapping_add(b), Some(ArithOp::Add)),
            BinaryOp::Adc => (a.wrapping_add(b).wrapping_add(cf as u64), Some(ArithOp::Adc(cf))),
            BinaryOp::Sub | BinaryOp::Cmp => (a.wrapping_sub(b), Some(ArithOp::Sub)),
            BinaryOp::Sbb => (a.wrapping_sub(b).wrapping_sub(cf as u64), Some(ArithOp::Sbb(cf))),
            BinaryOp::And | BinaryOp::Test => (a & b, None),
            BinaryOp::Or => (a | b, None),
            BinaryOp::Xor => (a ^ b, None),
        };
        let mut flags = self.flags;
        match arith {
            Some(op) => flags.update_from_arithmetic(op, a, b, res, size),
            None => flags.update_from_logic(res, size),
        }

        if !matches!(kind, BinaryOp::Cmp | BinaryOp::Test) {
            self.write_operand(dst, size, res)?;
        }
        self.flags = flags;
        Ok(Flow::Next)
    }
    fn exec_unary(&mut self, instr: &Instruction, kind: UnaryOp) -> Result<Flow, ExecError> {
        let size = instr.size;
        let dst = unary(instr)?;
        let v = self.read_operand(dst, size)?;

        let mut flags = self.flags;
        let res = match kind {
            UnaryOp::Inc => {
                let res = v.wrapping_add(1);
                flags.update_from_arithmetic(ArithOp::Inc, v, 1, res, size);
                res
            }
            UnaryOp::Dec => {
                let res = v.wrapping_sub(1);
                flags.update_from_arithmetic(ArithOp::Dec, v, 1, res, size);
                res
            }
            UnaryOp::Neg => {
                let res = v.wrapping_neg();
                flags.update_from_arithmetic(ArithOp::Neg, v, 0, res, size);
                res
            }
            UnaryOp::Not => !v,
        };

        self.write_operand(dst, size, res)?;
        self.flags = flags;
        Ok(Flow::Next)
    }

    fn assign_mul_flags(&mut self, overflow: bool) {
        // SF ZF PF are undefined and left as they were
        self.flags.assign_cf(overflow);
        self.flags.assign_of(overflow);
    }
    fn exec_uimul_1(&mut self, instr: &Instruction, multiplier: fn(Size, u64, u64) -> (u64, u64, bool)) -> Result<Flow, ExecError> {
        let size = instr.size;
        let v = self.read_operand(unary(instr)?, size)?;
        let (high, low, overflow) = multiplier(size, self.regs.get_rax(), v);
        match size {
            Size::Byte => self.regs.write(RAX, Size::Word, low)?, // 16-bit result fits in "low"
            _ => {
                self.regs.write(RDX, size, high)?;
                self.regs.write(RAX, size, low)?;
            }
        }
        self.assign_mul_flags(overflow);
        Ok(Flow::Next)
    }
    fn exec_imul_n(&mut self, instr: &Instruction) -> Result<Flow, ExecError> {
        let size = instr.size;
        let (dst, a, b) = match instr.operands.as_slice() {
            [dst, src] => (dst, self.read_operand(dst, size)?, self.read_operand(src, size)?),
            [dst, src, imm] => (dst, self.read_operand(src, size)?, self.read_operand(imm, size)?),
            _ => return Err(ExecError::InvalidOperand),
        };
        let (_, res, overflow) = raw_imul(size, a, b);
        self.write_operand(dst, size, res)?;
        self.assign_mul_flags(overflow);
        Ok(Flow::Next)
    }
    fn exec_uidiv(&mut self, instr: &Instruction, divider: fn(Size, u128, u64) -> Option<(u64, u64)>) -> Result<Flow, ExecError> {
        let size = instr.size;
        let v = self.read_operand(unary(instr)?, size)?;
        if v == 0 { return Err(ExecError::DivisionByZero); }

        let (rax, rdx) = (self.regs.get_rax(), self.regs.get_rdx());
        let num = match size {
            Size::Byte => rax as u16 as u128,
            Size::Word => ((rdx as u16 as u128) << 16) | rax as u16 as u128,
            Size::Dword => ((rdx as u32 as u128) << 32) | rax as u32 as u128,
            _ => ((rdx as u128) << 64) | rax as u128,
        };
        let (quo, rem) = divider(size, num, v).ok_or(ExecError::DivisionOverflow)?;
        match size {
            Size::Byte => self.regs.write(RAX, Size::Word, ((rem & 0xff) << 8) | (quo & 0xff))?,
            _ => {
                self.regs.write(RDX, size, rem)?;
                self.regs.write(RAX, size, quo)?;
            }
        }
        // all flags are undefined and left as they were
        Ok(Flow::Next)
    }

    fn exec_shift(&mut self, instr: &Instruction, kind: ShiftOp) -> Result<Flow, ExecError> {
        let size = instr.size;
        let (dst, src) = binary(instr)?;
        let a = self.read_operand(dst, size)?;
        let b = self.read_operand(src, Size::Byte)?;

        let count = b as u32 & if size == Size::Qword { 0x3f } else { 0x1f };
        if count == 0 { return Ok(Flow::Next); }
        // narrow rotates wrap around the operand, but still update CF for any nonzero count
        let masked = match kind {
            ShiftOp::Rol | ShiftOp::Ror => count & (size.bits() - 1),
            _ => count,
        };
        debug_assert_eq!(a, truncate(a, size));

        let bits = size.bits();
        let (res, carry, overflow) = match kind {
            ShiftOp::Shl => {
                let res = a << masked;
                let carry = a.wrapping_shr(bits.wrapping_sub(masked)) & 1 != 0;
                (res, carry, sign_bit(res, size) ^ carry)
            }
            ShiftOp::Shr => (a >> masked, (a >> (masked - 1)) & 1 != 0, sign_bit(a, size)),
            ShiftOp::Sar => {
                let extended = sign_extend(a, size) as i64;
                ((extended >> masked) as u64, (extended >> (masked - 1)) & 1 != 0, false)
            }
            ShiftOp::Rol => {
                let res = rotate(size, a, masked, true);
                let carry = res & 1 != 0;
                (res, carry, sign_bit(res, size) ^ carry)
            }
            ShiftOp::Ror => {
                let res = rotate(size, a, masked, false);
                (res, sign_bit(res, size), sign_bit(res ^ (res << 1), size))
            }
        };

        let mut flags = self.flags;
        flags.assign_cf(carry);
        if count == 1 { flags.assign_of(overflow); } // OF is undefined for larger counts
        if !matches!(kind, ShiftOp::Rol | ShiftOp::Ror) { flags.update_zsp(res, size); }

        self.write_operand(dst, size, res)?;
        self.flags = flags;
        Ok(Flow::Next)
    }

    fn exec_bit_test(&mut self, instr: &Instruction, kind: BitTestOp) -> Result<Flow, ExecError> {
        let size = instr.size;
        let (dst, src) = binary(instr)?;
        let bits = size.bits() as u64;
        let b = self.read_operand(src, size)?;

        // a register offset can address bits outside of a memory operand
        let dst = match (dst, src) {
            (Operand::Mem(m), Operand::Reg(_)) if b >= bits => {
                let skip = (b / bits).wrapping_mul(size.bytes() as u64);
                Operand::Mem(Address { disp: m.disp.wrapping_add(skip as i64), ..*m })
            }
            _ => *dst,
        };
        let a = self.read_operand(&dst, size)?;
        let mask = 1 << (b & (bits - 1));

        let res = match kind {
            BitTestOp::Bt => None,
            BitTestOp::Bts => Some(a | mask),
            BitTestOp::Btr => Some(a & !mask),
            BitTestOp::Btc => Some(a ^ mask),
        };
        if let Some(res) = res { self.write_operand(&dst, size, res)?; }
        self.flags.assign_cf(a & mask != 0);
        Ok(Flow::Next)
    }

    /// Counts bits by repeatedly clearing the lowest set bit, so the work done is proportional to the result.
    fn exec_popcnt(&mut self, instr: &Instruction) -> Result<Flow, ExecError> {
        let size = instr.size;
        let (dst, src) = binary(instr)?;
        let v = self.read_operand(src, size)?;
        let (mut rest, mut count) = (v, 0);
        while rest != 0 {
            rest &= rest - 1;
            count += 1;
        }
        self.write_operand(dst, size, count)?;
        self.flags.0 &= !mask!(Flags: MASK_CF | MASK_OF | MASK_SF | MASK_PF);
        self.flags.assign_zf(v == 0);
        Ok(Flow::Next)
    }
    fn exec_blsr(&mut self, instr: &Instruction) -> Result<Flow, ExecError> {
        let size = instr.size;
        let (dst, src) = binary(instr)?;
        let v = self.read_operand(src, size)?;
        let res = truncate(v & v.wrapping_sub(1), size);
        self.write_operand(dst, size, res)?;
        self.flags.assign_zf(res == 0);
        self.flags.assign_sf(sign_bit(res, size));
        self.flags.assign_cf(v == 0);
        self.flags.clear_of();
        Ok(Flow::Next)
    }
    fn exec_bextr(&mut self, instr: &Instruction) -> Result<Flow, ExecError> {
        let size = instr.size;
        let (dst, src, ctrl) = ternary(instr)?;
        let v = self.read_operand(src, size)?;
        let ctrl = self.read_operand(ctrl, size)?;
        let (start, len) = ((ctrl & 0xff) as u32, ((ctrl >> 8) & 0xff) as u32);
        let res = match v.checked_shr(start) {
            None => 0,
            Some(shifted) if len >= 64 => shifted,
            Some(shifted) => shifted & ((1 << len) - 1),
        };
        let res = truncate(res, size);
        self.write_operand(dst, size, res)?;
        self.flags.assign_zf(res == 0);
        self.flags.clear_cf();
        self.flags.clear_of();
        Ok(Flow::Next)
    }

    fn exec_flag(&mut self, kind: FlagOp) -> Result<Flow, ExecError> {
        match kind {
            FlagOp::Clc => self.flags.clear_cf(),
            FlagOp::Stc => self.flags.set_cf(),
            FlagOp::Cmc => self.flags.flip_cf(),
            FlagOp::Cld => self.flags.clear_df(),
            FlagOp::Std => self.flags.set_df(),
        }
        Ok(Flow::Next)
    }

    fn exec_loopcc(&mut self, instr: &Instruction, kind: LoopOp) -> Result<Flow, ExecError> {
        let t = target(instr)?;
        let cnd = match kind {
            LoopOp::Loop => true,
            LoopOp::Loope => self.flags.get_zf(),
            LoopOp::Loopne => !self.flags.get_zf(),
        };
        let rcx = self.regs.get_rcx().wrapping_sub(1);
        self.regs.set_rcx(rcx);
        Ok(if rcx != 0 && cnd { Flow::Jump(t) } else { Flow::Next })
    }

    // -------------------------------------------------------------------------------------

    /// A `rep`-prefixed instruction runs to completion as a single step.
    /// A count of zero executes no iterations.
    fn exec_string(&mut self, kind: StringOp, size: Size, prefix: Option<Prefix>) -> Result<Flow, ExecError> {
        let func: fn(&mut Self, Size) -> Result<(), ExecError> = match kind {
            StringOp::Movs => Self::exec_string_movs,
            StringOp::Cmps => Self::exec_string_cmps,
            StringOp::Scas => Self::exec_string_scas,
            StringOp::Lods => Self::exec_string_lods,
            StringOp::Stos => Self::exec_string_stos,
        };
        match prefix {
            None => func(self, size)?,
            Some(Prefix::Rep) => self.exec_string_rep(size, func)?,
            Some(Prefix::Repe) => self.exec_string_repe(size, func)?,
            Some(Prefix::Repne) => self.exec_string_repne(size, func)?,
        }
        Ok(Flow::Next)
    }
    fn exec_string_rep(&mut self, size: Size, func: fn(&mut Self, Size) -> Result<(), ExecError>) -> Result<(), ExecError> { impl_string_repeat!(self, size, func, true) }
    fn exec_string_repe(&mut self, size: Size, func: fn(&mut Self, Size) -> Result<(), ExecError>) -> Result<(), ExecError> { impl_string_repeat!(self, size, func, self.flags.get_zf()) }
    fn exec_string_repne(&mut self, size: Size, func: fn(&mut Self, Size) -> Result<(), ExecError>) -> Result<(), ExecError> { impl_string_repeat!(self, size, func, !self.flags.get_zf()) }

    /// Moves a string pointer one element in the direction selected by DF.
    fn advance(&self, ptr: u64, size: Size) -> u64 {
        let step = size.bytes() as u64;
        if self.flags.get_df() { ptr.wrapping_sub(step) } else { ptr.wrapping_add(step) }
    }

    fn exec_string_movs(&mut self, size: Size) -> Result<(), ExecError> {
        let (rdi, rsi) = (self.regs.get_rdi(), self.regs.get_rsi());
        let v = self.memory.load(rsi, size)?;
        self.memory.store(rdi, size, v)?;
        let (rdi, rsi) = (self.advance(rdi, size), self.advance(rsi, size));
        self.regs.set_rdi(rdi);
        self.regs.set_rsi(rsi);
        Ok(())
    }
    fn exec_string_cmps(&mut self, size: Size) -> Result<(), ExecError> {
        let (rdi, rsi) = (self.regs.get_rdi(), self.regs.get_rsi());
        let a = self.memory.load(rsi, size)?;
        let b = self.memory.load(rdi, size)?;
        self.flags.update_from_arithmetic(ArithOp::Sub, a, b, a.wrapping_sub(b), size);
        let (rdi, rsi) = (self.advance(rdi, size), self.advance(rsi, size));
        self.regs.set_rdi(rdi);
        self.regs.set_rsi(rsi);
        Ok(())
    }
    fn exec_string_scas(&mut self, size: Size) -> Result<(), ExecError> {
        let rdi = self.regs.get_rdi();
        let a = self.regs.read(RAX, size)?;
        let b = self.memory.load(rdi, size)?;
        self.flags.update_from_arithmetic(ArithOp::Sub, a, b, a.wrapping_sub(b), size);
        let rdi = self.advance(rdi, size);
        self.regs.set_rdi(rdi);
        Ok(())
    }
    fn exec_string_lods(&mut self, size: Size) -> Result<(), ExecError> {
        let rsi = self.regs.get_rsi();
        let v = self.memory.load(rsi, size)?;
        self.regs.write(RAX, size, v)?;
        let rsi = self.advance(rsi, size);
        self.regs.set_rsi(rsi);
        Ok(())
    }
    fn exec_string_stos(&mut self, size: Size) -> Result<(), ExecError> {
        let rdi = self.regs.get_rdi();
        let v = self.regs.read(RAX, size)?;
        self.memory.store(rdi, size, v)?;
        let rdi = self.advance(rdi, size);
        self.regs.set_rdi(rdi);
        Ok(())
    }
}

//! Semantics of the SSE instructions.
//!
//! Arithmetic follows IEEE-754: division by zero and square roots of negative numbers produce infinities and NaNs, never errors.
//! `rsqrt` and `rcp` are computed exactly rather than approximated.

use num_traits::Float;

use crate::asm::{Instruction, Operand, SseOp, SseArith, SseLogic, Precision, Lanes, Conversion};
use crate::common::Size;
use crate::common::util::sign_extend;

use super::{ExecutionState, ExecError};
use super::registers::XmmRegister;
use super::ops::{Flow, binary};

fn arith<T: Float>(kind: SseArith, a: T, b: T) -> T {
    match kind {
        SseArith::Add => a + b,
        SseArith::Sub => a - b,
        SseArith::Mul => a * b,
        SseArith::Div => a / b,
        // the source is returned if either is NaN or both are zero
        SseArith::Min => if a < b { a } else { b },
        SseArith::Max => if a > b { a } else { b },
        SseArith::Sqrt => b.sqrt(),
        SseArith::Rsqrt => b.sqrt().recip(),
        SseArith::Rcp => b.recip(),
    }
}

/// Truncates toward zero, producing the "integer indefinite" value if the result is NaN or out of range.
fn truncate_to_int(val: f64, size: Size) -> u64 {
    let val = val.trunc();
    match size {
        Size::Dword => {
            if val.is_nan() || val < i32::MIN as f64 || val > i32::MAX as f64 { 0x8000_0000 } else { val as i32 as u32 as u64 }
        }
        _ => {
            if val.is_nan() || val < i64::MIN as f64 || val >= -(i64::MIN as f64) { 0x8000_0000_0000_0000 } else { val as i64 as u64 }
        }
    }
}

fn xmm_id(op: &Operand) -> Result<u8, ExecError> {
    match op {
        Operand::Xmm(id) => Ok(*id),
        _ => Err(ExecError::InvalidOperand),
    }
}

impl ExecutionState {
    /// Reads an xmm or memory source as a register image.
    /// Memory narrower than 16 bytes fills the low bytes and zeroes the rest.
    /// Full-width memory must be 16-byte aligned if `aligned` is set.
    fn read_xmm_source(&self, op: &Operand, aligned: bool) -> Result<XmmRegister, ExecError> {
        match op {
            Operand::Xmm(id) => Ok(*self.regs.xmm(*id)?),
            Operand::Mem(a) => {
                let addr = self.effective_address(a)?;
                let mut res = XmmRegister::default();
                match a.size.ok_or(ExecError::InvalidOperand)? {
                    Size::Xword => res.0 = self.memory.load_xmm(addr, aligned)?,
                    size => res.0[..size.bytes()].copy_from_slice(self.memory.get(addr, size.bytes() as u64)?),
                }
                Ok(res)
            }
            _ => Err(ExecError::InvalidOperand),
        }
    }
    /// Stores the low `size` bytes of a register image to memory.
    fn write_xmm_mem(&mut self, op: &Operand, value: &XmmRegister, size: Size, aligned: bool) -> Result<(), ExecError> {
        let addr = match op {
            Operand::Mem(a) => self.effective_address(a)?,
            _ => return Err(ExecError::InvalidOperand),
        };
        match size {
            Size::Xword => self.memory.store_xmm(addr, &value.0, aligned),
            _ => self.memory.set(addr, &value.0[..size.bytes()]),
        }
    }

    pub(super) fn exec_sse(&mut self, instr: &Instruction, op: SseOp) -> Result<Flow, ExecError> {
        match op {
            SseOp::MovScalar(p) => self.exec_mov_scalar(instr, p.size()),
            SseOp::MovPacked { aligned } => self.exec_mov_packed(instr, aligned),
            SseOp::MovD | SseOp::MovQ => self.exec_movdq(instr),
            SseOp::Arith(kind, p, lanes) => self.exec_sse_arith(instr, kind, p, lanes),
            SseOp::Logic(kind) => self.exec_sse_logic(instr, kind),
            SseOp::Shufps => self.exec_shufps(instr),
            SseOp::Comi(p) => self.exec_comi(instr, p),
            SseOp::Cvt(conv) => self.exec_cvt(instr, conv),
        }
    }

    fn exec_mov_scalar(&mut self, instr: &Instruction, size: Size) -> Result<Flow, ExecError> {
        let (dst, src) = binary(instr)?;
        match (dst, src) {
            // register to register moves only the low lane
            (Operand::Xmm(d), Operand::Xmm(_)) => {
                let s = self.read_xmm_source(src, false)?;
                let r = self.regs.xmm_mut(*d)?;
                r.0[..size.bytes()].copy_from_slice(&s.0[..size.bytes()]);
            }
            // a load zeroes the upper lanes
            (Operand::Xmm(d), _) => {
                let s = self.read_xmm_source(src, false)?;
                *self.regs.xmm_mut(*d)? = s;
            }
            _ => {
                let s = *self.regs.xmm(xmm_id(src)?)?;
                self.write_xmm_mem(dst, &s, size, false)?;
            }
        }
        Ok(Flow::Next)
    }
    fn exec_mov_packed(&mut self, instr: &Instruction, aligned: bool) -> Result<Flow, ExecError> {
        let (dst, src) = binary(instr)?;
        match dst {
            Operand::Xmm(d) => {
                let s = self.read_xmm_source(src, aligned)?;
                *self.regs.xmm_mut(*d)? = s;
            }
            _ => {
                let s = *self.regs.xmm(xmm_id(src)?)?;
                self.write_xmm_mem(dst, &s, Size::Xword, aligned)?;
            }
        }
        Ok(Flow::Next)
    }
    fn exec_movdq(&mut self, instr: &Instruction) -> Result<Flow, ExecError> {
        let size = instr.size;
        let (dst, src) = binary(instr)?;
        match (dst, src) {
            (Operand::Xmm(d), Operand::Xmm(s)) => {
                let v = self.regs.xmm(*s)?.get_u64(0);
                let mut r = XmmRegister::default();
                r.set_u64(0, v);
                *self.regs.xmm_mut(*d)? = r;
            }
            (Operand::Xmm(d), _) => {
                let v = self.read_operand(src, size)?;
                let mut r = XmmRegister::default();
                r.set_u64(0, v);
                *self.regs.xmm_mut(*d)? = r;
            }
            _ => {
                let v = self.regs.xmm(xmm_id(src)?)?.get_u64(0);
                self.write_operand(dst, size, v)?;
            }
        }
        Ok(Flow::Next)
    }

    fn exec_sse_arith(&mut self, instr: &Instruction, kind: SseArith, p: Precision, lanes: Lanes) -> Result<Flow, ExecError> {
        let (dst, src) = binary(instr)?;
        let d = xmm_id(dst)?;
        let s = self.read_xmm_source(src, lanes == Lanes::Packed)?;
        let mut r = *self.regs.xmm(d)?;

        let count = match (p, lanes) {
            (_, Lanes::Scalar) => 1,
            (Precision::Single, Lanes::Packed) => 4,
            (Precision::Double, Lanes::Packed) => 2,
        };
        for i in 0..count {
            match p {
                Precision::Single => r.set_f32(i, arith(kind, r.get_f32(i), s.get_f32(i))),
                Precision::Double => r.set_f64(i, arith(kind, r.get_f64(i), s.get_f64(i))),
            }
        }

        *self.regs.xmm_mut(d)? = r;
        Ok(Flow::Next)
    }
    fn exec_sse_logic(&mut self, instr: &Instruction, kind: SseLogic) -> Result<Flow, ExecError> {
        let (dst, src) = binary(instr)?;
        let d = xmm_id(dst)?;
        let s = self.read_xmm_source(src, true)?;
        let mut r = *self.regs.xmm(d)?;
        for i in 0..2 {
            let (a, b) = (r.get_u64(i), s.get_u64(i));
            r.set_u64(i, match kind {
                SseLogic::And => a & b,
                SseLogic::Or => a | b,
                SseLogic::Xor => a ^ b,
                SseLogic::Andn => !a & b,
            });
        }
        *self.regs.xmm_mut(d)? = r;
        Ok(Flow::Next)
    }
    /// The low two lanes are selected from the destination and the high two from the source.
    fn exec_shufps(&mut self, instr: &Instruction) -> Result<Flow, ExecError> {
        let (dst, src, imm) = match instr.operands.as_slice() {
            [dst, src, Operand::Imm(imm)] => (dst, src, *imm as usize),
            _ => return Err(ExecError::InvalidOperand),
        };
        let d = xmm_id(dst)?;
        let s = self.read_xmm_source(src, true)?;
        let a = *self.regs.xmm(d)?;

        let mut r = XmmRegister::default();
        r.set_u32(0, a.get_u32(imm & 3));
        r.set_u32(1, a.get_u32((imm >> 2) & 3));
        r.set_u32(2, s.get_u32((imm >> 4) & 3));
        r.set_u32(3, s.get_u32((imm >> 6) & 3));
        *self.regs.xmm_mut(d)? = r;
        Ok(Flow::Next)
    }
    fn exec_comi(&mut self, instr: &Instruction, p: Precision) -> Result<Flow, ExecError> {
        let (dst, src) = binary(instr)?;
        let a = *self.regs.xmm(xmm_id(dst)?)?;
        let b = self.read_xmm_source(src, false)?;
        let (a, b) = match p {
            Precision::Single => (a.get_f32(0) as f64, b.get_f32(0) as f64),
            Precision::Double => (a.get_f64(0), b.get_f64(0)),
        };

        let f = &mut self.flags;
        f.clear_of();
        f.clear_sf();
        if a.is_nan() || b.is_nan() {
            f.set_zf();
            f.set_pf();
            f.set_cf();
        } else {
            f.assign_zf(a == b);
            f.clear_pf();
            f.assign_cf(a < b);
        }
        Ok(Flow::Next)
    }
    fn exec_cvt(&mut self, instr: &Instruction, conv: Conversion) -> Result<Flow, ExecError> {
        let size = instr.size;
        let (dst, src) = binary(instr)?;
        match conv {
            Conversion::IntToSingle | Conversion::IntToDouble => {
                let d = xmm_id(dst)?;
                let v = sign_extend(self.read_operand(src, size)?, size) as i64;
                let r = self.regs.xmm_mut(d)?;
                if conv == Conversion::IntToSingle { r.set_f32(0, v as f32) } else { r.set_f64(0, v as f64) }
            }
            Conversion::SingleToInt | Conversion::DoubleToInt => {
                let s = self.read_xmm_source(src, false)?;
                let v = if conv == Conversion::SingleToInt { s.get_f32(0) as f64 } else { s.get_f64(0) };
                self.write_operand(dst, size, truncate_to_int(v, size))?;
            }
            Conversion::SingleToDouble => {
                let v = self.read_xmm_source(src, false)?.get_f32(0);
                self.regs.xmm_mut(xmm_id(dst)?)?.set_f64(0, v as f64);
            }
            Conversion::DoubleToSingle => {
                let v = self.read_xmm_source(src, false)?.get_f64(0);
                self.regs.xmm_mut(xmm_id(dst)?)?.set_f32(0, v as f32);
            }
        }
        Ok(Flow::Next)
    }
}

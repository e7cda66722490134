//! The general-purpose and XMM register files.

use num_traits::FromPrimitive;

use super::ExecError;
use crate::common::Size;

/// Identities of the 16 general-purpose registers.
/// The numeric value is the id used by register operands.
#[derive(Clone, Copy, PartialEq, Eq, Debug, FromPrimitive)]
#[repr(u8)]
pub enum Register {
    RAX = 0,
    RBX,
    RCX,
    RDX,
    RSI,
    RDI,
    RBP,
    RSP,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
}
impl Register {
    /// Resolves a register id, failing with `InvalidRegister` if out of range.
    pub fn from_id(id: u8) -> Result<Register, ExecError> {
        Register::from_u8(id).ok_or(ExecError::InvalidRegister)
    }
}

/// A 64-bit general-purpose register with standard x64 partitioning.
///
/// 32-bit writes zero the upper half; 16-bit and 8-bit writes leave every other bit untouched.
#[derive(Default, Clone, Copy, PartialEq, Eq, Debug)]
pub struct GpRegister(pub u64);
impl GpRegister {
    /// Gets the value of the given width view, zero extended to 64-bit.
    /// `Xword` is not a valid view of a general-purpose register.
    pub fn read(self, size: Size) -> Result<u64, ExecError> {
        Ok(match size {
            Size::Byte => self.0 as u8 as u64,
            Size::Word => self.0 as u16 as u64,
            Size::Dword => self.0 as u32 as u64,
            Size::Qword => self.0,
            Size::Xword => return Err(ExecError::InvalidRegister),
        })
    }
    /// Writes the given width view, truncating `value` to fit.
    pub fn write(&mut self, size: Size, value: u64) -> Result<(), ExecError> {
        self.0 = match size {
            Size::Byte => (self.0 & !0xff) | (value & 0xff),
            Size::Word => (self.0 & !0xffff) | (value & 0xffff),
            Size::Dword => value & 0xffff_ffff,
            Size::Qword => value,
            Size::Xword => return Err(ExecError::InvalidRegister),
        };
        Ok(())
    }

    /// Gets bits 8-15.
    pub const fn read_high(self) -> u8 {
        (self.0 >> 8) as u8
    }
    /// Sets bits 8-15 (without modifying any other bits).
    pub fn write_high(&mut self, val: u8) {
        self.0 = (self.0 & !0xff00) | ((val as u64) << 8);
    }
}

#[test]
fn test_gp_register() {
    let mut r = GpRegister::default();
    assert_eq!(r.read(Size::Qword).unwrap(), 0);

    r.write(Size::Qword, 0x2049381758392734).unwrap();
    assert_eq!(r.read(Size::Qword).unwrap(), 0x2049381758392734);
    assert_eq!(r.read(Size::Dword).unwrap(), 0x58392734);
    assert_eq!(r.read(Size::Word).unwrap(), 0x2734);
    assert_eq!(r.read(Size::Byte).unwrap(), 0x34);
    assert_eq!(r.read_high(), 0x27);

    r.write(Size::Word, 0x8692).unwrap();
    assert_eq!(r.0, 0x2049381758398692);

    r.write(Size::Byte, 0x1f5).unwrap();
    assert_eq!(r.0, 0x20493817583986f5);

    r.write_high(0x12);
    assert_eq!(r.0, 0x20493817583912f5);

    r.write(Size::Dword, 0x1_5928_8643).unwrap();
    assert_eq!(r.0, 0x59288643);

    assert_eq!(r.read(Size::Xword), Err(ExecError::InvalidRegister));
    assert_eq!(r.write(Size::Xword, 0), Err(ExecError::InvalidRegister));
}

/// A 128-bit XMM register.
///
/// Lanes are stored little-endian so that lane `i` of any width lines up with the bytes of a memory image.
#[derive(Default, Clone, Copy, PartialEq, Eq, Debug)]
#[repr(align(16))]
pub struct XmmRegister(pub [u8; 16]);

macro_rules! xmm_lane {
    ($get:ident : $set:ident => $t:ident) => {
        pub fn $get(&self, lane: usize) -> $t {
            $t::from_le(bytemuck::cast_slice::<u8, $t>(&self.0)[lane])
        }
        pub fn $set(&mut self, lane: usize, value: $t) {
            bytemuck::cast_slice_mut::<u8, $t>(&mut self.0)[lane] = value.to_le()
        }
    };
    (float $get:ident : $set:ident => $t:ident : $raw_get:ident : $raw_set:ident) => {
        pub fn $get(&self, lane: usize) -> $t {
            $t::from_bits(self.$raw_get(lane))
        }
        pub fn $set(&mut self, lane: usize, value: $t) {
            self.$raw_set(lane, value.to_bits())
        }
    };
}
impl XmmRegister {
    xmm_lane! { get_u32 : set_u32 => u32 }
    xmm_lane! { get_u64 : set_u64 => u64 }

    xmm_lane! { float get_f32 : set_f32 => f32 : get_u32 : set_u32 }
    xmm_lane! { float get_f64 : set_f64 => f64 : get_u64 : set_u64 }

    /// Views the register as four single-precision lanes.
    pub fn to_f32x4(&self) -> [f32; 4] {
        [self.get_f32(0), self.get_f32(1), self.get_f32(2), self.get_f32(3)]
    }
    pub fn from_f32x4(vals: [f32; 4]) -> Self {
        let mut r = Self::default();
        for (i, v) in vals.iter().enumerate() {
            r.set_f32(i, *v);
        }
        r
    }
    /// Views the register as two double-precision lanes.
    pub fn to_f64x2(&self) -> [f64; 2] {
        [self.get_f64(0), self.get_f64(1)]
    }
    pub fn from_f64x2(vals: [f64; 2]) -> Self {
        let mut r = Self::default();
        r.set_f64(0, vals[0]);
        r.set_f64(1, vals[1]);
        r
    }
}

#[test]
fn test_xmm_register() {
    assert_eq!(std::mem::align_of::<XmmRegister>(), 16);
    assert_eq!(std::mem::size_of::<XmmRegister>(), 16);

    let mut r = XmmRegister::default();
    for i in 0..16 {
        r.0[i] = i as u8;
    }
    assert_eq!(r.get_u32(1), u32::from_le_bytes([4, 5, 6, 7]));
    assert_eq!(r.get_u64(1), u64::from_le_bytes([8, 9, 10, 11, 12, 13, 14, 15]));

    let r = XmmRegister::from_f32x4([1.0, -2.5, 3.0, 0.125]);
    assert_eq!(r.to_f32x4(), [1.0, -2.5, 3.0, 0.125]);
    assert_eq!(r.get_u32(0), 1.0f32.to_bits());

    let r = XmmRegister::from_f64x2([6.5, -1.0]);
    assert_eq!(r.to_f64x2(), [6.5, -1.0]);
    assert_eq!(r.get_f64(1), -1.0);
}

macro_rules! register_aliases {
    ($([ $reg:ident => $get64:ident, $set64:ident, $get32:ident, $set32:ident ]),*$(,)?) => {$(
        pub fn $get64(&self) -> u64 {
            self.gp[Register::$reg as usize].0
        }
        pub fn $set64(&mut self, val: u64) {
            self.gp[Register::$reg as usize].0 = val;
        }
        pub fn $get32(&self) -> u32 {
            self.gp[Register::$reg as usize].0 as u32
        }
        pub fn $set32(&mut self, val: u32) {
            self.gp[Register::$reg as usize].0 = val as u64;
        }
    )*}
}

/// All 16 general-purpose and 16 XMM registers.
#[derive(Default, Clone, PartialEq, Eq, Debug)]
pub struct RegisterFile {
    pub gp: [GpRegister; 16],
    pub xmm: [XmmRegister; 16],
}
impl RegisterFile {
    /// Reads the given width view of a general-purpose register, zero extended to 64-bit.
    pub fn read(&self, id: u8, size: Size) -> Result<u64, ExecError> {
        self.gp[Register::from_id(id)? as usize].read(size)
    }
    /// Writes the given width view of a general-purpose register.
    /// 32-bit writes zero extend into the full register; 16-bit and 8-bit writes preserve the upper bits.
    pub fn write(&mut self, id: u8, size: Size, value: u64) -> Result<(), ExecError> {
        self.gp[Register::from_id(id)? as usize].write(size, value)
    }

    /// Reads one of the legacy high-byte registers (`AH`, `BH`, `CH`, `DH`).
    pub fn read_high(&self, id: u8) -> Result<u8, ExecError> {
        if id > Register::RDX as u8 { return Err(ExecError::InvalidRegister); }
        Ok(self.gp[id as usize].read_high())
    }
    pub fn write_high(&mut self, id: u8, value: u8) -> Result<(), ExecError> {
        if id > Register::RDX as u8 { return Err(ExecError::InvalidRegister); }
        self.gp[id as usize].write_high(value);
        Ok(())
    }

    pub fn xmm(&self, id: u8) -> Result<&XmmRegister, ExecError> {
        self.xmm.get(id as usize).ok_or(ExecError::InvalidRegister)
    }
    pub fn xmm_mut(&mut self, id: u8) -> Result<&mut XmmRegister, ExecError> {
        self.xmm.get_mut(id as usize).ok_or(ExecError::InvalidRegister)
    }

    register_aliases! {
        [ RAX => get_rax, set_rax, get_eax, set_eax ],
        [ RBX => get_rbx, set_rbx, get_ebx, set_ebx ],
        [ RCX => get_rcx, set_rcx, get_ecx, set_ecx ],
        [ RDX => get_rdx, set_rdx, get_edx, set_edx ],
        [ RSI => get_rsi, set_rsi, get_esi, set_esi ],
        [ RDI => get_rdi, set_rdi, get_edi, set_edi ],
        [ RBP => get_rbp, set_rbp, get_ebp, set_ebp ],
        [ RSP => get_rsp, set_rsp, get_esp, set_esp ],
        [ R8  => get_r8,  set_r8,  get_r8d,  set_r8d ],
        [ R9  => get_r9,  set_r9,  get_r9d,  set_r9d ],
        [ R10 => get_r10, set_r10, get_r10d, set_r10d ],
        [ R11 => get_r11, set_r11, get_r11d, set_r11d ],
        [ R12 => get_r12, set_r12, get_r12d, set_r12d ],
        [ R13 => get_r13, set_r13, get_r13d, set_r13d ],
        [ R14 => get_r14, set_r14, get_r14d, set_r14d ],
        [ R15 => get_r15, set_r15, get_r15d, set_r15d ],
    }

    pub fn get_al(&self) -> u8 {
        self.gp[Register::RAX as usize].0 as u8
    }
}

#[test]
fn test_register_file() {
    let mut r = RegisterFile::default();
    r.set_rax(0xffff_ffff_ffff_ffff);
    r.write(Register::RAX as u8, Size::Byte, 0x12).unwrap();
    assert_eq!(r.get_rax(), 0xffff_ffff_ffff_ff12);
    r.write(Register::RAX as u8, Size::Dword, 0x12).unwrap();
    assert_eq!(r.get_rax(), 0x12);

    r.write_high(Register::RCX as u8, 0xab).unwrap();
    assert_eq!(r.get_rcx(), 0xab00);
    assert_eq!(r.read_high(Register::RSI as u8), Err(ExecError::InvalidRegister));

    assert_eq!(r.read(16, Size::Qword), Err(ExecError::InvalidRegister));
    assert_eq!(r.write(200, Size::Byte, 1), Err(ExecError::InvalidRegister));
    assert!(r.xmm(15).is_ok());
    assert_eq!(r.xmm(16).err(), Some(ExecError::InvalidRegister));
}

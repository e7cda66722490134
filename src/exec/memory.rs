//! The flat, bounds-checked memory region of an execution state.

use memchr::memchr;

use std::convert::TryFrom;
use std::mem;

use super::ExecError;
use crate::common::Size;

macro_rules! impl_mem_primitive {
    ($([ $get:ident, $set:ident => $t:ty ]),*$(,)?) => {$(
        pub fn $get(&self, addr: u64) -> Result<$t, ExecError> {
            let mut v = [0; mem::size_of::<$t>()];
            v.copy_from_slice(self.get(addr, mem::size_of::<$t>() as u64)?);
            Ok(<$t>::from_le_bytes(v))
        }
        pub fn $set(&mut self, addr: u64, val: $t) -> Result<(), ExecError> {
            self.set(addr, &val.to_le_bytes())
        }
    )*}
}

/// A contiguous little-endian byte region starting at a base address.
///
/// The top `stack_size` bytes are reserved for the machine stack, which grows down from `end()`.
/// Everything below the stack is available to `alloc`.
/// Every access is checked against the region, so nothing outside of it is ever touched.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Memory {
    raw: Vec<u8>,
    base: u64,
    stack_limit: u64, // lowest address the stack may occupy (crossing it is stack overflow)
    heap_top: u64,    // next free address for alloc
}
impl Memory {
    /// Creates a zeroed region of `size` bytes at `base`, the top `stack_size` bytes of which are stack space.
    /// The region is truncated so that it ends at or below the top of the address space,
    /// and the stack size is clamped to the size of the region.
    pub fn new(base: u64, size: usize, stack_size: usize) -> Memory {
        let size = usize::try_from(u64::MAX - base).map_or(size, |room| size.min(room));
        let stack_size = stack_size.min(size) as u64;
        let end = base + size as u64;
        Memory { raw: vec![0; size], base, stack_limit: end - stack_size, heap_top: base }
    }

    /// Gets the size of the region in bytes.
    pub fn len(&self) -> usize {
        self.raw.len()
    }
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
    /// Gets the lowest valid address.
    pub fn base(&self) -> u64 {
        self.base
    }
    /// Gets the address one past the highest valid address, which is also the initial stack pointer.
    pub fn end(&self) -> u64 {
        self.base + self.raw.len() as u64
    }
    /// Gets the lowest address the stack is allowed to grow down to.
    pub fn stack_limit(&self) -> u64 {
        self.stack_limit
    }

    /// Zeroes the entire region and releases all allocations.
    pub fn clear(&mut self) {
        self.raw.fill(0);
        self.heap_top = self.base;
    }

    fn offset(&self, addr: u64, len: u64) -> Result<std::ops::Range<usize>, ExecError> {
        let start = addr.checked_sub(self.base).ok_or(ExecError::OutOfBounds)?;
        let stop = start.checked_add(len).ok_or(ExecError::OutOfBounds)?;
        if stop > self.raw.len() as u64 { return Err(ExecError::OutOfBounds); }
        Ok(start as usize..stop as usize)
    }

    /// Grabs a contiguous block of memory.
    /// Fails if any part of the block is outside the region.
    pub fn get(&self, addr: u64, len: u64) -> Result<&[u8], ExecError> {
        let range = self.offset(addr, len)?;
        Ok(&self.raw[range])
    }
    /// Similar to `get` but returns a mutable slice.
    pub fn get_mut(&mut self, addr: u64, len: u64) -> Result<&mut [u8], ExecError> {
        let range = self.offset(addr, len)?;
        Ok(&mut self.raw[range])
    }
    /// Assigns a binary value to memory.
    /// On failure, memory is unmodified.
    pub fn set(&mut self, addr: u64, value: &[u8]) -> Result<(), ExecError> {
        self.get_mut(addr, value.len() as u64)?.copy_from_slice(value);
        Ok(())
    }

    /// Loads an integer of the given width, zero extended to 64-bit.
    pub fn load(&self, addr: u64, size: Size) -> Result<u64, ExecError> {
        Ok(match size {
            Size::Byte => self.get_u8(addr)? as u64,
            Size::Word => self.get_u16(addr)? as u64,
            Size::Dword => self.get_u32(addr)? as u64,
            Size::Qword => self.get_u64(addr)?,
            Size::Xword => return Err(ExecError::InvalidOperand),
        })
    }
    /// Stores the low bytes of `value` at the given width.
    pub fn store(&mut self, addr: u64, size: Size, value: u64) -> Result<(), ExecError> {
        match size {
            Size::Byte => self.set_u8(addr, value as u8),
            Size::Word => self.set_u16(addr, value as u16),
            Size::Dword => self.set_u32(addr, value as u32),
            Size::Qword => self.set_u64(addr, value),
            Size::Xword => Err(ExecError::InvalidOperand),
        }
    }

    impl_mem_primitive! {
        [ get_u8,  set_u8  => u8 ],
        [ get_u16, set_u16 => u16 ],
        [ get_u32, set_u32 => u32 ],
        [ get_u64, set_u64 => u64 ],

        [ get_i8,  set_i8  => i8 ],
        [ get_i16, set_i16 => i16 ],
        [ get_i32, set_i32 => i32 ],
        [ get_i64, set_i64 => i64 ],

        [ get_f32, set_f32 => f32 ],
        [ get_f64, set_f64 => f64 ],
    }

    /// Scalar single-precision access, as used by `movss` and friends. No alignment is required.
    pub fn load_f32(&self, addr: u64) -> Result<f32, ExecError> {
        self.get_f32(addr)
    }
    pub fn store_f32(&mut self, addr: u64, value: f32) -> Result<(), ExecError> {
        self.set_f32(addr, value)
    }

    /// Loads 16 raw bytes.
    /// If `aligned` is set (as for `movaps`), the address must be a multiple of 16 or this fails with `MisalignedAccess`.
    pub fn load_xmm(&self, addr: u64, aligned: bool) -> Result<[u8; 16], ExecError> {
        if aligned && addr % 16 != 0 { return Err(ExecError::MisalignedAccess); }
        let mut v = [0; 16];
        v.copy_from_slice(self.get(addr, 16)?);
        Ok(v)
    }
    /// Stores 16 raw bytes, with the same alignment rule as `load_xmm`.
    pub fn store_xmm(&mut self, addr: u64, value: &[u8; 16], aligned: bool) -> Result<(), ExecError> {
        if aligned && addr % 16 != 0 { return Err(ExecError::MisalignedAccess); }
        self.set(addr, value)
    }
    /// Loads four packed single-precision floats.
    pub fn load_f32x4(&self, addr: u64, aligned: bool) -> Result<[f32; 4], ExecError> {
        let bytes = self.load_xmm(addr, aligned)?;
        let mut v = [0.0; 4];
        for (x, chunk) in v.iter_mut().zip(bytes.chunks_exact(4)) {
            *x = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(v)
    }
    /// Stores four packed single-precision floats.
    /// On failure, memory is unmodified.
    pub fn store_f32x4(&mut self, addr: u64, value: [f32; 4], aligned: bool) -> Result<(), ExecError> {
        let mut bytes = [0; 16];
        for (chunk, x) in bytes.chunks_exact_mut(4).zip(value.iter()) {
            chunk.copy_from_slice(&x.to_le_bytes());
        }
        self.store_xmm(addr, &bytes, aligned)
    }

    /// Reads a null-terminated binary string starting at the given address.
    /// The null terminator is not included in the result.
    /// Fails if no null terminator is found before the end of the region.
    pub fn get_null_terminated(&self, addr: u64) -> Result<&[u8], ExecError> {
        let start = self.offset(addr, 1)?.start;
        match memchr(0, &self.raw[start..]) {
            None => Err(ExecError::OutOfBounds),
            Some(stop) => Ok(&self.raw[start..start + stop]),
        }
    }

    /// Reserves `len` bytes aligned to `align` (a power of two) below the stack area and returns their address.
    /// The block is zeroed at reset, not at allocation.
    /// Fails with `OutOfBounds` if the block would reach into the stack.
    pub fn alloc(&mut self, len: usize, align: u64) -> Result<u64, ExecError> {
        debug_assert!(align.is_power_of_two());
        let addr = self.heap_top.checked_add(align - 1).ok_or(ExecError::OutOfBounds)? & !(align - 1);
        let stop = addr.checked_add(len as u64).ok_or(ExecError::OutOfBounds)?;
        if stop > self.stack_limit { return Err(ExecError::OutOfBounds); }
        self.heap_top = stop;
        Ok(addr)
    }
    /// Allocates a copy of `data` and returns its address.
    pub fn alloc_bytes(&mut self, data: &[u8], align: u64) -> Result<u64, ExecError> {
        let addr = self.alloc(data.len(), align)?;
        self.set(addr, data)?;
        Ok(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_are_checked() {
        let mut m = Memory::new(0x1000, 64, 16);
        assert_eq!(m.end(), 0x1040);
        assert_eq!(m.stack_limit(), 0x1030);

        m.set_u64(0x1038, 0x0102030405060708).unwrap();
        assert_eq!(m.get_u32(0x1038).unwrap(), 0x05060708);
        assert_eq!(m.load(0x103f, Size::Byte).unwrap(), 0x01);

        assert_eq!(m.get_u8(0xfff), Err(ExecError::OutOfBounds));
        assert_eq!(m.get_u16(0x103f), Err(ExecError::OutOfBounds));
        assert_eq!(m.set_u64(0x1039, 0), Err(ExecError::OutOfBounds));
        assert_eq!(m.get_u8(0x1039).unwrap(), 0x07);
        assert_eq!(m.get(u64::MAX, 2), Err(ExecError::OutOfBounds));
        assert_eq!(m.store(0x1000, Size::Xword, 0), Err(ExecError::InvalidOperand));
    }

    #[test]
    fn region_is_truncated_at_the_top_of_the_address_space() {
        let mut m = Memory::new(u64::MAX - 8, 64, 32);
        assert_eq!(m.len(), 8);
        assert_eq!(m.end(), u64::MAX);
        assert_eq!(m.stack_limit(), u64::MAX - 8);
        m.set_u64(u64::MAX - 8, 5).unwrap();
        assert_eq!(m.get_u64(u64::MAX - 8).unwrap(), 5);
        assert_eq!(m.get_u8(u64::MAX), Err(ExecError::OutOfBounds));
        assert_eq!(m.alloc(1, 1), Err(ExecError::OutOfBounds));

        let m = Memory::new(u64::MAX, 16, 0);
        assert!(m.is_empty());
        assert_eq!(m.end(), u64::MAX);
    }

    #[test]
    fn packed_alignment() {
        let mut m = Memory::new(0x1000, 64, 0);
        m.store_f32x4(0x1010, [1.0, 2.0, 3.0, 4.0], true).unwrap();
        assert_eq!(m.load_f32x4(0x1010, true).unwrap(), [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(m.load_f32(0x1014).unwrap(), 2.0);
        m.store_f32(0x1031, -1.5).unwrap();
        assert_eq!(m.get_f32(0x1031).unwrap(), -1.5);

        assert_eq!(m.load_f32x4(0x1004, true), Err(ExecError::MisalignedAccess));
        assert_eq!(m.load_f32x4(0x1004, false).unwrap(), [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(m.store_f32x4(0x1008, [0.0; 4], true), Err(ExecError::MisalignedAccess));
        assert_eq!(m.load_f32x4(0x1038, false), Err(ExecError::OutOfBounds));
    }

    #[test]
    fn null_terminated_strings() {
        let mut m = Memory::new(0, 16, 0);
        m.set(2, b"hello\0").unwrap();
        assert_eq!(m.get_null_terminated(2).unwrap(), b"hello");
        assert_eq!(m.get_null_terminated(7).unwrap(), b"");
        m.set(8, &[1; 8]).unwrap();
        assert_eq!(m.get_null_terminated(8), Err(ExecError::OutOfBounds));
        assert_eq!(m.get_null_terminated(16), Err(ExecError::OutOfBounds));
    }

    #[test]
    fn alloc_stays_below_stack() {
        let mut m = Memory::new(0x100, 64, 32);
        assert_eq!(m.alloc(3, 1).unwrap(), 0x100);
        assert_eq!(m.alloc(4, 16).unwrap(), 0x110);
        let s = m.alloc_bytes(b"abc", 4).unwrap();
        assert_eq!(s, 0x114);
        assert_eq!(m.get(s, 3).unwrap(), b"abc");
        assert_eq!(m.alloc(32, 1), Err(ExecError::OutOfBounds));

        m.clear();
        assert_eq!(m.get(s, 3).unwrap(), &[0, 0, 0]);
        assert_eq!(m.alloc(1, 1).unwrap(), 0x100);
    }
}

//! Everything that is used by both `asm` and `exec`.

use std::fmt;

pub(crate) mod util;

/// The width of an operand or memory access.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub enum Size {
    Byte,
    Word,
    Dword,
    Qword,

    Xword,
}
impl Size {
    /// Returns the size of this type in bytes.
    pub const fn bytes(self) -> usize {
        match self {
            Size::Byte => 1,
            Size::Word => 2,
            Size::Dword => 4,
            Size::Qword => 8,
            Size::Xword => 16,
        }
    }
    /// Returns the size of this type in bits.
    pub const fn bits(self) -> u32 {
        self.bytes() as u32 * 8
    }
    /// Checks if this is one of the integer sizes (byte, word, dword, qword).
    pub const fn is_basic(self) -> bool {
        !matches!(self, Size::Xword)
    }
    /// Gets the mask of all bits covered by a basic size.
    /// The mask for `Xword` saturates to all 64 bits.
    pub const fn mask(self) -> u64 {
        match self {
            Size::Byte => 0xff,
            Size::Word => 0xffff,
            Size::Dword => 0xffff_ffff,
            Size::Qword | Size::Xword => !0,
        }
    }
}
impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Size::Byte => "byte",
            Size::Word => "word",
            Size::Dword => "dword",
            Size::Qword => "qword",
            Size::Xword => "xmmword",
        })
    }
}
#[test]
fn test_size_fns() {
    assert_eq!(Size::Byte.bytes(), 1);
    assert_eq!(Size::Dword.bits(), 32);
    assert_eq!(Size::Word.mask(), 0xffff);
    assert!(Size::Qword.is_basic());
    assert!(!Size::Xword.is_basic());
    assert!(Size::Byte < Size::Qword);
}

/// The condition codes shared by `Jcc`, `CMOVcc`, and `SETcc`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Condition {
    Z, NZ,
    S, NS,
    P, NP,
    O, NO,
    B, BE, A, AE,
    L, LE, G, GE,
}
impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Condition::Z => "z",
            Condition::NZ => "nz",
            Condition::S => "s",
            Condition::NS => "ns",
            Condition::P => "p",
            Condition::NP => "np",
            Condition::O => "o",
            Condition::NO => "no",
            Condition::B => "b",
            Condition::BE => "be",
            Condition::A => "a",
            Condition::AE => "ae",
            Condition::L => "l",
            Condition::LE => "le",
            Condition::G => "g",
            Condition::GE => "ge",
        })
    }
}

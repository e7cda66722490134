use std::fmt;
use num_traits::{CheckedDiv, CheckedRem};

use super::Size;

/// Truncates a value to the given size, which is then zero extended to 64-bit.
pub(crate) fn truncate(val: u64, size: Size) -> u64 {
    val & size.mask()
}
/// Sign extends a value of the given initial size to 64-bit.
/// The conversion is first performed by truncation, so bits outside the specified size range are ignored.
pub(crate) fn sign_extend(val: u64, size: Size) -> u64 {
    match size {
        Size::Byte => val as i8 as u64,
        Size::Word => val as i16 as u64,
        Size::Dword => val as i32 as u64,
        Size::Qword | Size::Xword => val,
    }
}
/// Gets the sign bit of the value with given size.
/// Bits outside the range of the size are ignored.
pub(crate) fn sign_bit(val: u64, size: Size) -> bool {
    (val >> (size.bits().min(64) - 1)) & 1 != 0
}
/// Checks if the value has even parity.
pub(crate) fn is_parity_even(val: u8) -> bool {
    val.count_ones() % 2 == 0
}

#[test]
fn test_bit_helpers() {
    assert_eq!(truncate(0x1234_5678_9abc_def0, Size::Word), 0xdef0);
    assert_eq!(sign_extend(0x80, Size::Byte), 0xffff_ffff_ffff_ff80);
    assert_eq!(sign_extend(0x7fff, Size::Word), 0x7fff);
    assert!(sign_bit(0x8000_0000, Size::Dword));
    assert!(!sign_bit(0x8000_0000, Size::Qword));
    assert!(sign_bit(!0, Size::Qword));
    assert!(is_parity_even(0b1001_0000));
    assert!(!is_parity_even(0b1000_0000));
}

/// Returns the quotient and remainder of `a` divided by `b`.
/// Yields `None` if `b` is zero or the quotient is not representable in `T`.
pub(crate) fn checked_quotient_and_remainder<T>(a: T, b: T) -> Option<(T, T)> where T: CheckedDiv + CheckedRem {
    Some((a.checked_div(&b)?, a.checked_rem(&b)?))
}
#[test]
fn test_checked_quotient_and_remainder() {
    assert_eq!(checked_quotient_and_remainder(17i32, 5), Some((3, 2)));
    assert_eq!(checked_quotient_and_remainder(-17i32, 5), Some((-3, -2)));
    assert_eq!(checked_quotient_and_remainder(17u8, 0), None);
    assert_eq!(checked_quotient_and_remainder(i16::MIN, -1), None);
}

pub(crate) struct Punctuated<'a, T> {
    vals: &'a [T],
    sep_special: &'static str,
}
impl<'a, T> Punctuated<'a, T> {
    pub(crate) fn or(vals: &'a [T]) -> Self {
        Self { vals, sep_special: "or " }
    }
}
impl<'a, T: fmt::Display> fmt::Display for Punctuated<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.vals {
            [] => Ok(()),
            [x] => write!(f, "{}", x),
            [x, y] => write!(f, "{} {}{}", x, self.sep_special, y),
            [prev @ .., last] => {
                for x in prev {
                    write!(f, "{}, ", x)?;
                }
                write!(f, "{}{}", self.sep_special, last)
            }
        }
    }
}
#[test]
fn test_punctuated_or() {
    assert_eq!(format!("{}", Punctuated::or(&[] as &[i32])), "");
    assert_eq!(format!("{}", Punctuated::or(&[8])), "8");
    assert_eq!(format!("{}", Punctuated::or(&[8, 7])), "8 or 7");
    assert_eq!(format!("{}", Punctuated::or(&[8, 7, 5])), "8, 7, or 5");
    assert_eq!(format!("{}", Punctuated::or(&[0, 1, 2, 3])), "0, 1, 2, or 3");
}

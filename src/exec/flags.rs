//! The condition flags register and its update rules.

use crate::common::{Size, Condition};
use crate::common::util::{truncate, sign_bit, is_parity_even};

macro_rules! impl_flag {
    ($mask_name:ident, $set:ident, $clear:ident, $flip:ident, $get:ident, $assign:ident => [ $mask:literal ]) => {
        pub const $mask_name: u64 = $mask;
        pub fn $set(&mut self) { self.0 |= $mask }
        pub fn $clear(&mut self) { self.0 &= !$mask }
        pub fn $flip(&mut self) { self.0 ^= $mask }
        pub const fn $get(self) -> bool { (self.0 & $mask) != 0 }
        pub fn $assign(&mut self, value: bool) {
            if value { self.$set() } else { self.$clear() }
        }
    }
}

/// Names of the individual flags, for inspection by callers.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Flag {
    CF, PF, ZF, SF, DF, OF,
}

/// The kind of arithmetic that produced a result, which selects the carry/overflow rules.
/// `Adc` and `Sbb` carry the incoming carry bit.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ArithOp {
    Add,
    Adc(bool),
    Sub,
    Sbb(bool),
    /// Like `Add` with `b = 1`, but CF is preserved.
    Inc,
    /// Like `Sub` with `b = 1`, but CF is preserved.
    Dec,
    /// `0 - a`. `b` is ignored.
    Neg,
}

/// The flags register, laid out with the standard RFLAGS bit positions.
#[derive(Default, Clone, Copy, PartialEq, Eq, Debug)]
pub struct Flags(pub u64);
impl Flags {
    impl_flag! { MASK_CF, set_cf, clear_cf, flip_cf, get_cf, assign_cf => [0x0000000000000001] }
    impl_flag! { MASK_PF, set_pf, clear_pf, flip_pf, get_pf, assign_pf => [0x0000000000000004] }
    impl_flag! { MASK_ZF, set_zf, clear_zf, flip_zf, get_zf, assign_zf => [0x0000000000000040] }
    impl_flag! { MASK_SF, set_sf, clear_sf, flip_sf, get_sf, assign_sf => [0x0000000000000080] }
    impl_flag! { MASK_DF, set_df, clear_df, flip_df, get_df, assign_df => [0x0000000000000400] }
    impl_flag! { MASK_OF, set_of, clear_of, flip_of, get_of, assign_of => [0x0000000000000800] }

    /// Gets the current value of a flag.
    pub fn read(self, flag: Flag) -> bool {
        match flag {
            Flag::CF => self.get_cf(),
            Flag::PF => self.get_pf(),
            Flag::ZF => self.get_zf(),
            Flag::SF => self.get_sf(),
            Flag::DF => self.get_df(),
            Flag::OF => self.get_of(),
        }
    }

    /// Updates ZF SF PF to reflect the given value.
    /// Bits outside the range of the given size are ignored.
    pub fn update_zsp(&mut self, value: u64, size: Size) {
        self.0 &= !mask!(Self: MASK_ZF | MASK_SF | MASK_PF);
        if truncate(value, size) == 0 { self.set_zf(); }
        if sign_bit(value, size) { self.set_sf(); }
        if is_parity_even(value as u8) { self.set_pf(); }
    }

    /// Flag update for `and`, `or`, `xor` and `test`: OF and CF are cleared, ZF SF PF follow the result.
    pub fn update_from_logic(&mut self, result: u64, size: Size) {
        self.0 &= !mask!(Self: MASK_OF | MASK_CF);
        self.update_zsp(result, size);
    }

    /// Recomputes ZF SF CF OF PF after `result = a <op> b` at the given width.
    /// `cmp` uses `ArithOp::Sub` and discards the result.
    pub fn update_from_arithmetic(&mut self, op: ArithOp, a: u64, b: u64, result: u64, size: Size) {
        let (a, b, res) = (truncate(a, size), truncate(b, size), truncate(result, size));
        let mask = size.mask() as u128;

        self.update_zsp(res, size);
        match op {
            ArithOp::Add | ArithOp::Adc(_) => {
                let cin = if let ArithOp::Adc(true) = op { 1 } else { 0 };
                self.assign_cf(a as u128 + b as u128 + cin > mask);
                self.assign_of(sign_bit(!(a ^ b) & (a ^ res), size)); // sign(a)=sign(b) and sign(a)!=sign(res)
            }
            ArithOp::Sub | ArithOp::Sbb(_) => {
                let cin = if let ArithOp::Sbb(true) = op { 1 } else { 0 };
                self.assign_cf((a as u128) < b as u128 + cin);
                self.assign_of(sign_bit((a ^ b) & (a ^ res), size)); // sign(a)!=sign(b) and sign(a)!=sign(res)
            }
            ArithOp::Inc => self.assign_of(sign_bit(!a & res, size)),
            ArithOp::Dec => self.assign_of(sign_bit(a & !res, size)),
            ArithOp::Neg => {
                self.assign_cf(a != 0);
                self.assign_of(sign_bit(a & res, size));
            }
        }
    }

    /// Checks the "below" condition.
    pub const fn condition_b(self) -> bool { self.get_cf() }
    /// Checks the "below or equal" condition.
    pub const fn condition_be(self) -> bool { self.get_cf() || self.get_zf() }
    /// Checks the "above" condition.
    pub const fn condition_a(self) -> bool { !self.condition_be() }
    /// Checks the "above or equal" condition.
    pub const fn condition_ae(self) -> bool { !self.condition_b() }

    /// Checks the "less" condition.
    pub const fn condition_l(self) -> bool { self.get_sf() != self.get_of() }
    /// Checks the "less or equal" condition.
    pub const fn condition_le(self) -> bool { self.get_zf() || self.condition_l() }
    /// Checks the "greater" condition.
    pub const fn condition_g(self) -> bool { !self.condition_le() }
    /// Checks the "greater or equal" condition.
    pub const fn condition_ge(self) -> bool { !self.condition_l() }

    /// Evaluates a condition code against the current flags.
    pub fn condition(self, cc: Condition) -> bool {
        match cc {
            Condition::Z => self.get_zf(),
            Condition::NZ => !self.get_zf(),
            Condition::S => self.get_sf(),
            Condition::NS => !self.get_sf(),
            Condition::P => self.get_pf(),
            Condition::NP => !self.get_pf(),
            Condition::O => self.get_of(),
            Condition::NO => !self.get_of(),
            Condition::B => self.condition_b(),
            Condition::BE => self.condition_be(),
            Condition::A => self.condition_a(),
            Condition::AE => self.condition_ae(),
            Condition::L => self.condition_l(),
            Condition::LE => self.condition_le(),
            Condition::G => self.condition_g(),
            Condition::GE => self.condition_ge(),
        }
    }
}

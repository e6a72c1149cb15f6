//! Bit and bit-field tools for packing register images

use num_traits::{FromPrimitive, PrimInt, Unsigned};
use std::ops::{BitAndAssign, BitOrAssign, BitXorAssign};

/// Bitwise set/clear/toggle/check/change operations, plus multi-bit
/// field access, for the unsigned primitives.
pub trait BitOps:
    PrimInt
    + BitAndAssign
    + BitOrAssign
    + BitXorAssign
    + FromPrimitive
    + Unsigned
{
    fn set(&mut self, b: usize);
    fn clear(&mut self, b: usize);
    fn toggle(&mut self, b: usize);
    fn change(&mut self, b: usize, x: bool);
    fn check(self, b: usize) -> bool;
    /// Write the low `width` bits of `x` at bit offset `b`, leaving other bits alone
    fn put(&mut self, b: usize, width: usize, x: Self);
    /// Read the `width`-bit field at bit offset `b`
    fn field(self, b: usize, width: usize) -> Self;
}

macro_rules! impl_bit_ops {
    ($($t:ty),*) => {$(
        impl BitOps for $t {
            #[inline]
            fn set(&mut self, b: usize) {
                *self |= 1 << b;
            }

            #[inline]
            fn clear(&mut self, b: usize) {
                *self &= !(1 << b);
            }

            #[inline]
            fn toggle(&mut self, b: usize) {
                *self ^= 1 << b;
            }

            #[inline]
            fn change(&mut self, b: usize, x: bool) {
                *self = (*self & !(1 << b)) | ((x as $t) << b);
            }

            #[inline]
            fn check(self, b: usize) -> bool {
                return self >> b & 1 == 1;
            }

            #[inline]
            fn put(&mut self, b: usize, width: usize, x: $t) {
                let mask = mask::<$t>(width) << b;
                *self = (*self & !mask) | ((x << b) & mask);
            }

            #[inline]
            fn field(self, b: usize, width: usize) -> $t {
                (self >> b) & mask::<$t>(width)
            }
        }
    )*};
}

impl_bit_ops!(u8, u16, u32, u64, u128);

/// Mask of the lowest `width` bits, saturating at the full type width
#[inline]
pub fn mask<T: PrimInt>(width: usize) -> T {
    let bits = T::zero().count_zeros() as usize;
    if width >= bits {
        !T::zero()
    } else {
        (T::one() << width) - T::one()
    }
}

/// Stop inputs (0-indexed) whose bit is set in an enable mask
pub fn mask_to_stops(m: u8) -> Vec<u8> {
    bit_iter::BitIter::from(m).map(|b| b as u8).collect()
}

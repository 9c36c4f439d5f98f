use {bytemuck::Pod, std::fmt::Debug};

/// A machine scalar usable as a radix-R mantissa digit.
///
/// The word-level helpers back the triple-word arithmetic of the CRT
/// combiner; the `Pod` bound is what lets the disk layer move element
/// buffers as raw little-endian bytes.
pub trait Element:
    Pod + Default + Copy + Send + Sync + PartialEq + Eq + Ord + Debug + 'static
{
    /// Size of one element record on disk.
    const BYTES: u64;

    fn from_u64(value: u64) -> Option<Self>;
    fn to_u64(self) -> u64;

    /// `self + rhs + carry`, returning the low word and the carry out.
    fn add_with_carry(self, rhs: Self, carry: bool) -> (Self, bool);

    /// `self - rhs - borrow`, returning the low word and the borrow out.
    fn sub_with_borrow(self, rhs: Self, borrow: bool) -> (Self, bool);

    /// Full double-width product as `(low, high)`.
    fn wide_mul(self, rhs: Self) -> (Self, Self);

    /// Divides the double-width value `(high, low)` by `divisor`,
    /// returning `(quotient, remainder)`. Requires `high < divisor` so
    /// the quotient fits in one word.
    fn wide_div_rem(high: Self, low: Self, divisor: Self) -> (Self, Self);
}

impl Element for u32 {
    const BYTES: u64 = 4;

    #[inline]
    fn from_u64(value: u64) -> Option<Self> {
        u32::try_from(value).ok()
    }

    #[inline]
    fn to_u64(self) -> u64 {
        u64::from(self)
    }

    #[inline]
    fn add_with_carry(self, rhs: Self, carry: bool) -> (Self, bool) {
        let (sum, c1) = self.overflowing_add(rhs);
        let (sum, c2) = sum.overflowing_add(u32::from(carry));
        (sum, c1 | c2)
    }

    #[inline]
    fn sub_with_borrow(self, rhs: Self, borrow: bool) -> (Self, bool) {
        let (diff, b1) = self.overflowing_sub(rhs);
        let (diff, b2) = diff.overflowing_sub(u32::from(borrow));
        (diff, b1 | b2)
    }

    #[inline]
    fn wide_mul(self, rhs: Self) -> (Self, Self) {
        let product = u64::from(self) * u64::from(rhs);
        (product as u32, (product >> 32) as u32)
    }

    #[inline]
    fn wide_div_rem(high: Self, low: Self, divisor: Self) -> (Self, Self) {
        debug_assert!(high < divisor);
        let value = (u64::from(high) << 32) | u64::from(low);
        ((value / u64::from(divisor)) as u32, (value % u64::from(divisor)) as u32)
    }
}

impl Element for u64 {
    const BYTES: u64 = 8;

    #[inline]
    fn from_u64(value: u64) -> Option<Self> {
        Some(value)
    }

    #[inline]
    fn to_u64(self) -> u64 {
        self
    }

    #[inline]
    fn add_with_carry(self, rhs: Self, carry: bool) -> (Self, bool) {
        let (sum, c1) = self.overflowing_add(rhs);
        let (sum, c2) = sum.overflowing_add(u64::from(carry));
        (sum, c1 | c2)
    }

    #[inline]
    fn sub_with_borrow(self, rhs: Self, borrow: bool) -> (Self, bool) {
        let (diff, b1) = self.overflowing_sub(rhs);
        let (diff, b2) = diff.overflowing_sub(u64::from(borrow));
        (diff, b1 | b2)
    }

    #[inline]
    fn wide_mul(self, rhs: Self) -> (Self, Self) {
        let product = u128::from(self) * u128::from(rhs);
        (product as u64, (product >> 64) as u64)
    }

    #[inline]
    fn wide_div_rem(high: Self, low: Self, divisor: Self) -> (Self, Self) {
        debug_assert!(high < divisor);
        let value = (u128::from(high) << 64) | u128::from(low);
        ((value / u128::from(divisor)) as u64, (value % u128::from(divisor)) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::Element;

    #[test]
    fn wide_mul_matches_native() {
        let (lo, hi) = 0xFFFF_FFFF_FFFF_FFFFu64.wide_mul(0xFFFF_FFFF_FFFF_FFFF);
        assert_eq!(lo, 1);
        assert_eq!(hi, 0xFFFF_FFFF_FFFF_FFFE);
    }

    #[test]
    fn wide_div_rem_round_trips() {
        let divisor = 1_000_000_007u64;
        let (q, r) = u64::wide_div_rem(123, 456, divisor);
        let value = (u128::from(123u64) << 64) | 456;
        assert_eq!(u128::from(q) * u128::from(divisor) + u128::from(r), value);
    }

    #[test]
    fn carry_chain() {
        let (sum, carry) = u32::MAX.add_with_carry(0, true);
        assert_eq!(sum, 0);
        assert!(carry);
        let (diff, borrow) = 0u32.sub_with_borrow(0, true);
        assert_eq!(diff, u32::MAX);
        assert!(borrow);
    }
}

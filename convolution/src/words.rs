//! Two- and three-word little-endian arithmetic backing the CRT combiner.

use apmul_common::Element;

pub(crate) fn add2<E: Element>(a: [E; 2], b: [E; 2]) -> ([E; 2], bool) {
    let (w0, c0) = a[0].add_with_carry(b[0], false);
    let (w1, c1) = a[1].add_with_carry(b[1], c0);
    ([w0, w1], c1)
}

pub(crate) fn add3<E: Element>(a: [E; 3], b: [E; 3]) -> [E; 3] {
    let (w0, c0) = a[0].add_with_carry(b[0], false);
    let (w1, c1) = a[1].add_with_carry(b[1], c0);
    let (w2, c2) = a[2].add_with_carry(b[2], c1);
    debug_assert!(!c2, "triple-word accumulator overflow");
    [w0, w1, w2]
}

pub(crate) fn sub3<E: Element>(a: [E; 3], b: [E; 3]) -> [E; 3] {
    let (w0, b0) = a[0].sub_with_borrow(b[0], false);
    let (w1, b1) = a[1].sub_with_borrow(b[1], b0);
    let (w2, b2) = a[2].sub_with_borrow(b[2], b1);
    debug_assert!(!b2, "triple-word subtraction underflow");
    [w0, w1, w2]
}

/// `a >= b` on three little-endian words.
pub(crate) fn ge3<E: Element>(a: [E; 3], b: [E; 3]) -> bool {
    for i in (0..3).rev() {
        if a[i] != b[i] {
            return a[i] > b[i];
        }
    }
    true
}

pub(crate) fn is_zero2<E: Element>(a: [E; 2]) -> bool {
    a[0] == E::default() && a[1] == E::default()
}

/// Full `2×1`-word product.
pub(crate) fn mul_2x1<E: Element>(m: [E; 2], y: E) -> [E; 3] {
    let (lo0, hi0) = m[0].wide_mul(y);
    let (lo1, hi1) = m[1].wide_mul(y);
    let (w1, c1) = lo1.add_with_carry(hi0, false);
    let (w2, c2) = hi1.add_with_carry(E::default(), c1);
    debug_assert!(!c2);
    [lo0, w1, w2]
}

/// Long division of a three-word value by one word.
pub(crate) fn div3_by_word<E: Element>(value: [E; 3], divisor: E) -> ([E; 3], E) {
    let mut quotient = [E::default(); 3];
    let mut remainder = E::default();
    for i in (0..3).rev() {
        let (q, r) = E::wide_div_rem(remainder, value[i], divisor);
        quotient[i] = q;
        remainder = r;
    }
    (quotient, remainder)
}

pub(crate) fn div2_by_word<E: Element>(value: [E; 2], divisor: E) -> ([E; 2], E) {
    let (q1, r1) = E::wide_div_rem(E::default(), value[1], divisor);
    let (q0, r0) = E::wide_div_rem(r1, value[0], divisor);
    ([q0, q1], r0)
}

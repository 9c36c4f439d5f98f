use apmul_common::{Element, Error, Result};

/// Modular arithmetic over the three convolution primes of one element
/// representation.
///
/// Every transform layer is monomorphized over a kernel; per-element
/// operations never go through dynamic dispatch. Products run through the
/// double-width integer type, so residues are exact for all inputs in
/// `[0, m)`.
pub trait Kernel: Copy + Clone + Send + Sync + 'static {
    type Elem: Element;

    /// The three primes, `m0 > m1 > m2`, each of the form `k·2^s + 1` with
    /// `3 | k` so that roots of unity exist for lengths `3·2^j` as well.
    const MODULI: [Self::Elem; 3];
    /// A primitive root for each prime.
    const PRIMITIVE_ROOTS: [Self::Elem; 3];
    /// Largest power-of-two transform length every modulus supports.
    const MAX_POWER_OF_TWO_LENGTH: u64;

    // Precomputed CRT constants, little-endian word order.
    const M01: [Self::Elem; 2];
    const M02: [Self::Elem; 2];
    const M12: [Self::Elem; 2];
    const M012: [Self::Elem; 3];
    /// `Ti = (M012 / mi)^(-1) mod mi`.
    const T: [Self::Elem; 3];

    /// A kernel primed for modulus `index`.
    fn for_modulus(index: usize) -> Self;

    /// Re-primes the kernel for modulus `index`.
    fn set_modulus(&mut self, index: usize) {
        *self = Self::for_modulus(index);
    }

    fn modulus(&self) -> Self::Elem;
    fn primitive_root(&self) -> Self::Elem;

    fn add(&self, a: Self::Elem, b: Self::Elem) -> Self::Elem;
    fn sub(&self, a: Self::Elem, b: Self::Elem) -> Self::Elem;
    fn mul(&self, a: Self::Elem, b: Self::Elem) -> Self::Elem;
    fn neg(&self, a: Self::Elem) -> Self::Elem;

    /// Reduces an arbitrary machine value into the field.
    fn element(&self, value: u64) -> Self::Elem {
        Self::Elem::from_u64(value % self.modulus().to_u64())
            .expect("reduced value fits the element type")
    }

    fn pow(&self, base: Self::Elem, exponent: u64) -> Self::Elem {
        let mut result = self.element(1);
        let mut base = base;
        let mut exponent = exponent;
        while exponent > 0 {
            if exponent & 1 == 1 {
                result = self.mul(result, base);
            }
            base = self.mul(base, base);
            exponent >>= 1;
        }
        result
    }

    /// Modular inverse by Fermat; zero is not invertible.
    fn inv(&self, a: Self::Elem) -> Result<Self::Elem> {
        if a.to_u64() == 0 {
            return Err(Error::Arithmetic("zero has no modular inverse"));
        }
        Ok(self.pow(a, self.modulus().to_u64() - 2))
    }

    fn div(&self, a: Self::Elem, b: Self::Elem) -> Result<Self::Elem> {
        Ok(self.mul(a, self.inv(b)?))
    }

    /// A primitive n-th root of unity derived from the primitive root.
    fn forward_nth_root(&self, n: u64) -> Result<Self::Elem> {
        let m = self.modulus().to_u64();
        if n == 0 || (m - 1) % n != 0 {
            return Err(Error::TransformLengthExceeded {
                requested: n,
                maximum:   3 * Self::MAX_POWER_OF_TWO_LENGTH,
            });
        }
        Ok(self.pow(self.primitive_root(), (m - 1) / n))
    }

    fn inverse_nth_root(&self, n: u64) -> Result<Self::Elem> {
        self.inv(self.forward_nth_root(n)?)
    }

    /// The twiddle table `w^0, w^1, …, w^(n/2 − 1)`.
    fn create_w_table(&self, w: Self::Elem, n: usize) -> Vec<Self::Elem> {
        let mut table = Vec::with_capacity(n / 2);
        let mut power = self.element(1);
        for _ in 0..n / 2 {
            table.push(power);
            power = self.mul(power, w);
        }
        table
    }
}

/// Validates that `length` is `2^k` or `3·2^k` within the kernel's
/// supported range; detected at operation entry before anything is
/// allocated.
pub fn check_transform_length<K: Kernel>(length: u64) -> Result<()> {
    let maximum = 3 * K::MAX_POWER_OF_TWO_LENGTH;
    if length == 0 {
        return Err(Error::TransformLengthExceeded {
            requested: length,
            maximum,
        });
    }
    let power2 = 1u64 << length.trailing_zeros();
    let rest = length / power2;
    if (rest != 1 && rest != 3) || power2 > K::MAX_POWER_OF_TWO_LENGTH {
        return Err(Error::TransformLengthExceeded {
            requested: length,
            maximum,
        });
    }
    Ok(())
}

/// 64-bit elements; products run through `u128`.
#[derive(Clone, Copy, Debug)]
pub struct LongKernel {
    modulus: u64,
    root:    u64,
}

impl Kernel for LongKernel {
    type Elem = u64;

    const MODULI: [u64; 3] = [
        3_188_548_536_178_311_169, // 177·2^54 + 1
        2_485_986_994_308_513_793, // 69·2^55 + 1
        1_945_555_039_024_054_273, // 27·2^56 + 1
    ];
    const PRIMITIVE_ROOTS: [u64; 3] = [7, 5, 5];
    const MAX_POWER_OF_TWO_LENGTH: u64 = 1 << 54;

    const M01: [u64; 2] = [5_674_535_530_486_824_961, 429_706_736_320_905_216];
    const M02: [u64; 2] = [5_134_103_575_202_365_441, 336_292_228_425_056_256];
    const M12: [u64; 2] = [4_431_542_033_332_568_065, 262_193_940_805_976_064];
    const M012: [u64; 3] = [
        7_620_090_569_510_879_233,
        1_028_192_905_551_937_536,
        45_320_632_346_345_472,
    ];
    const T: [u64; 3] = [
        3_124_564_284_616_204_602,
        611_935_260_137_480_302,
        1_505_690_421_505_572_443,
    ];

    fn for_modulus(index: usize) -> Self {
        Self {
            modulus: Self::MODULI[index],
            root:    Self::PRIMITIVE_ROOTS[index],
        }
    }

    fn modulus(&self) -> u64 {
        self.modulus
    }

    fn primitive_root(&self) -> u64 {
        self.root
    }

    #[inline]
    fn add(&self, a: u64, b: u64) -> u64 {
        // Both operands are below 2^62, so the sum cannot wrap.
        let sum = a + b;
        if sum >= self.modulus {
            sum - self.modulus
        } else {
            sum
        }
    }

    #[inline]
    fn sub(&self, a: u64, b: u64) -> u64 {
        if a >= b {
            a - b
        } else {
            a + self.modulus - b
        }
    }

    #[inline]
    fn mul(&self, a: u64, b: u64) -> u64 {
        ((u128::from(a) * u128::from(b)) % u128::from(self.modulus)) as u64
    }

    #[inline]
    fn neg(&self, a: u64) -> u64 {
        if a == 0 {
            0
        } else {
            self.modulus - a
        }
    }
}

/// 32-bit elements; products run through `u64`.
#[derive(Clone, Copy, Debug)]
pub struct IntKernel {
    modulus: u32,
    root:    u32,
}

impl Kernel for IntKernel {
    type Elem = u32;

    const MODULI: [u32; 3] = [
        2_113_929_217, // 63·2^25 + 1
        2_013_265_921, // 15·2^27 + 1
        1_811_939_329, // 27·2^26 + 1
    ];
    const PRIMITIVE_ROOTS: [u32; 3] = [5, 31, 13];
    const MAX_POWER_OF_TWO_LENGTH: u64 = 1 << 25;

    const M01: [u32; 2] = [4_127_195_137, 990_904_320];
    const M02: [u32; 2] = [3_925_868_545, 891_813_888];
    const M12: [u32; 2] = [3_825_205_249, 849_346_560];
    const M012: [u32; 3] = [1_644_167_169, 2_732_064_769, 418_037_760];
    const T: [u32; 3] = [147, 2_013_265_721, 54];

    fn for_modulus(index: usize) -> Self {
        Self {
            modulus: Self::MODULI[index],
            root:    Self::PRIMITIVE_ROOTS[index],
        }
    }

    fn modulus(&self) -> u32 {
        self.modulus
    }

    fn primitive_root(&self) -> u32 {
        self.root
    }

    #[inline]
    fn add(&self, a: u32, b: u32) -> u32 {
        let sum = u64::from(a) + u64::from(b);
        let m = u64::from(self.modulus);
        if sum >= m {
            (sum - m) as u32
        } else {
            sum as u32
        }
    }

    #[inline]
    fn sub(&self, a: u32, b: u32) -> u32 {
        if a >= b {
            a - b
        } else {
            a + self.modulus - b
        }
    }

    #[inline]
    fn mul(&self, a: u32, b: u32) -> u32 {
        ((u64::from(a) * u64::from(b)) % u64::from(self.modulus)) as u32
    }

    #[inline]
    fn neg(&self, a: u32) -> u32 {
        if a == 0 {
            0
        } else {
            self.modulus - a
        }
    }
}

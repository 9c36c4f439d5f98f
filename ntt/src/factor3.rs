use {
    crate::{kernel::Kernel, rows::SendPtr, strategy::NttStrategy},
    apmul_common::{Context, Error, ParallelRunnable, ParallelRunner, Result},
    apmul_storage::{AccessMode, DataStorage},
    std::marker::PhantomData,
    tracing::instrument,
};

/// Extends a radix-2 transform from `2^k` to `3·2^k`: the data are three
/// adjacent subsequences, combined column-wise by a 3-point Winograd
/// butterfly with running twiddles `w^j`, `w^2j`, then each subsequence is
/// transformed by the wrapped strategy with the full length as its
/// normalization total.
pub struct Factor3Strategy<K: Kernel, S> {
    inner: S,
    _kernel: PhantomData<K>,
}

/// Winograd 3-point constants: `w1 = −3/2`, `w2 = ω3 + 1/2` with ω3 the
/// cube root of unity belonging to the transform direction.
#[derive(Clone, Copy)]
struct Butterfly<K: Kernel> {
    kernel: K,
    w1:     K::Elem,
    w2:     K::Elem,
}

impl<K: Kernel> Butterfly<K> {
    fn new(kernel: K, omega3: K::Elem) -> Result<Self> {
        let half = kernel.inv(kernel.element(2))?;
        Ok(Self {
            kernel,
            w1: kernel.neg(kernel.mul(kernel.element(3), half)),
            w2: kernel.add(omega3, half),
        })
    }

    /// Forward: butterfly, then twiddle the two rotated outputs.
    #[inline]
    fn forward(
        &self,
        d0: K::Elem,
        d1: K::Elem,
        d2: K::Elem,
        tw1: K::Elem,
        tw2: K::Elem,
    ) -> (K::Elem, K::Elem, K::Elem) {
        let kernel = &self.kernel;
        let t1 = kernel.add(d1, d2);
        let t2 = kernel.sub(d1, d2);
        let m0 = kernel.add(d0, t1);
        let m1 = kernel.mul(self.w1, t1);
        let m2 = kernel.mul(self.w2, t2);
        let s = kernel.add(m0, m1);
        (
            m0,
            kernel.mul(kernel.add(s, m2), tw1),
            kernel.mul(kernel.sub(s, m2), tw2),
        )
    }

    /// Inverse: strip the twiddles first, then the butterfly with ω3⁻¹.
    #[inline]
    fn inverse(
        &self,
        d0: K::Elem,
        d1: K::Elem,
        d2: K::Elem,
        tw1: K::Elem,
        tw2: K::Elem,
    ) -> (K::Elem, K::Elem, K::Elem) {
        let kernel = &self.kernel;
        let u1 = kernel.mul(d1, tw1);
        let u2 = kernel.mul(d2, tw2);
        let t1 = kernel.add(u1, u2);
        let t2 = kernel.sub(u1, u2);
        let m0 = kernel.add(d0, t1);
        let m1 = kernel.mul(self.w1, t1);
        let m2 = kernel.mul(self.w2, t2);
        let s = kernel.add(m0, m1);
        (m0, kernel.add(s, m2), kernel.sub(s, m2))
    }
}

/// Column pass over an in-memory block: indices `j`, `m+j`, `2m+j` are
/// disjoint across strides.
struct MemoryColumnsPass<K: Kernel> {
    butterfly: Butterfly<K>,
    data:      SendPtr<K::Elem>,
    m:         u64,
    w:         K::Elem,
    ww:        K::Elem,
    inverse:   bool,
}

impl<K: Kernel> ParallelRunnable for MemoryColumnsPass<K> {
    fn length(&self) -> u64 {
        self.m
    }

    fn run_stride(&self, start: u64, length: u64) -> Result<()> {
        let kernel = &self.butterfly.kernel;
        let mut tw1 = kernel.pow(self.w, start);
        let mut tw2 = kernel.pow(self.ww, start);
        let m = self.m as usize;
        for j in start as usize..(start + length) as usize {
            // SAFETY: each stride owns its columns; the three block slots
            // of column j are touched by no other stride.
            unsafe {
                let p0 = self.data.0.add(j);
                let p1 = self.data.0.add(m + j);
                let p2 = self.data.0.add(2 * m + j);
                let (r0, r1, r2) = if self.inverse {
                    self.butterfly.inverse(*p0, *p1, *p2, tw1, tw2)
                } else {
                    self.butterfly.forward(*p0, *p1, *p2, tw1, tw2)
                };
                *p0 = r0;
                *p1 = r1;
                *p2 = r2;
            }
            tw1 = kernel.mul(tw1, self.w);
            tw2 = kernel.mul(tw2, self.ww);
        }
        Ok(())
    }
}

/// Column pass over a disk-backed storage: each stride stages one block of
/// every subsequence through its own array access.
struct DiskColumnsPass<'a, K: Kernel> {
    butterfly: Butterfly<K>,
    data:      &'a DataStorage<K::Elem>,
    m:         u64,
    w:         K::Elem,
    ww:        K::Elem,
    inverse:   bool,
}

impl<K: Kernel> ParallelRunnable for DiskColumnsPass<'_, K> {
    fn length(&self) -> u64 {
        self.m
    }

    fn run_stride(&self, start: u64, length: u64) -> Result<()> {
        let kernel = &self.butterfly.kernel;
        let mut block0 = self
            .data
            .get_array(AccessMode::ReadWrite, start, length)?;
        let mut block1 = self
            .data
            .get_array(AccessMode::ReadWrite, self.m + start, length)?;
        let mut block2 = self
            .data
            .get_array(AccessMode::ReadWrite, 2 * self.m + start, length)?;
        let mut tw1 = kernel.pow(self.w, start);
        let mut tw2 = kernel.pow(self.ww, start);
        {
            let s0 = block0.as_mut_slice();
            let s1 = block1.as_mut_slice();
            let s2 = block2.as_mut_slice();
            for j in 0..length as usize {
                let (r0, r1, r2) = if self.inverse {
                    self.butterfly.inverse(s0[j], s1[j], s2[j], tw1, tw2)
                } else {
                    self.butterfly.forward(s0[j], s1[j], s2[j], tw1, tw2)
                };
                s0[j] = r0;
                s1[j] = r1;
                s2[j] = r2;
                tw1 = kernel.mul(tw1, self.w);
                tw2 = kernel.mul(tw2, self.ww);
            }
        }
        block0.close()?;
        block1.close()?;
        block2.close()
    }
}

impl<K: Kernel, S: NttStrategy<K>> Factor3Strategy<K, S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            _kernel: PhantomData,
        }
    }

    #[instrument(skip(self, ctx, data, kernel), fields(n = data.len(), modulus, inverse))]
    fn columns(
        &self,
        ctx: &Context,
        data: &DataStorage<K::Elem>,
        kernel: K,
        w: K::Elem,
        inverse: bool,
    ) -> Result<()> {
        let n = data.len();
        let m = n / 3;
        let ww = kernel.mul(w, w);
        let omega3 = kernel.pow(w, m);
        let butterfly = Butterfly::new(kernel, omega3)?;
        let runner = ParallelRunner::new(ctx);
        if data.is_disk_backed() {
            runner.run(&DiskColumnsPass {
                butterfly,
                data,
                m,
                w,
                ww,
                inverse,
            })
        } else {
            let mut access = data.get_array(AccessMode::ReadWrite, 0, n)?;
            runner.run(&MemoryColumnsPass {
                butterfly,
                data: SendPtr(access.as_mut_slice().as_mut_ptr()),
                m,
                w,
                ww,
                inverse,
            })?;
            access.close()
        }
    }
}

impl<K: Kernel, S: NttStrategy<K>> NttStrategy<K> for Factor3Strategy<K, S> {
    fn forward(
        &self,
        ctx: &Context,
        data: &mut DataStorage<K::Elem>,
        modulus: usize,
    ) -> Result<()> {
        let n = data.len();
        if n % 3 != 0 {
            return Err(Error::Internal("factor-3 length is not divisible by three"));
        }
        let m = n / 3;
        let kernel = K::for_modulus(modulus);
        let w = kernel.forward_nth_root(n)?;
        self.columns(ctx, data, kernel, w, false)?;
        for block in 0..3 {
            let mut subsequence = data.subsequence(block * m, m)?;
            self.inner.forward(ctx, &mut subsequence, modulus)?;
        }
        Ok(())
    }

    fn inverse(
        &self,
        ctx: &Context,
        data: &mut DataStorage<K::Elem>,
        modulus: usize,
        total: u64,
    ) -> Result<()> {
        let n = data.len();
        if n % 3 != 0 {
            return Err(Error::Internal("factor-3 length is not divisible by three"));
        }
        let m = n / 3;
        for block in 0..3 {
            let mut subsequence = data.subsequence(block * m, m)?;
            self.inner.inverse(ctx, &mut subsequence, modulus, total)?;
        }
        let kernel = K::for_modulus(modulus);
        let w = kernel.inverse_nth_root(n)?;
        self.columns(ctx, data, kernel, w, true)
    }
}

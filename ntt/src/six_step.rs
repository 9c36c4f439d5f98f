use {
    crate::{
        kernel::Kernel,
        rows::{RowTransformPass, SendPtr, TwiddlePass},
        strategy::NttStrategy,
        table::scramble_pairs,
    },
    apmul_common::{Context, Error, ParallelRunner, Result},
    apmul_storage::{transpose, AccessMode, DataStorage, TransposeTune},
    std::marker::PhantomData,
    tracing::instrument,
};

/// Bailey's six-step transform for in-memory lengths: `n = n1·n2` becomes
/// two batches of short row transforms around transposes and a twiddle
/// pass. The final transpose is omitted; the convolution driver only ever
/// pairs a forward with the matching inverse, which consumes the same
/// layout.
pub struct SixStepFntStrategy<K: Kernel>(PhantomData<K>);

impl<K: Kernel> SixStepFntStrategy<K> {
    pub fn new() -> Self {
        Self(PhantomData)
    }

    /// Splits `n` into `n1 ≤ n2 ≤ 2·n1`.
    pub(crate) fn split(n: u64) -> (u64, u64) {
        let k = n.trailing_zeros();
        let n1 = 1u64 << (k / 2);
        (n1, n / n1)
    }

    #[instrument(skip(self, ctx, data), fields(n = data.len(), modulus))]
    fn transform(
        &self,
        ctx: &Context,
        data: &mut DataStorage<K::Elem>,
        modulus: usize,
        inverse_total: Option<u64>,
    ) -> Result<()> {
        let n = data.len();
        if !n.is_power_of_two() || n < 4 {
            return Err(Error::Internal("six-step needs a power-of-two length >= 4"));
        }
        let (n1, n2) = Self::split(n);
        let kernel = K::for_modulus(modulus);
        let inverse = inverse_total.is_some();
        let w = if inverse {
            kernel.inverse_nth_root(n)?
        } else {
            kernel.forward_nth_root(n)?
        };

        let n1_len = usize::try_from(n1).map_err(|_| Error::SizeTooLarge)?;
        let n2_len = usize::try_from(n2).map_err(|_| Error::SizeTooLarge)?;
        let table_n2 = kernel.create_w_table(kernel.pow(w, n1), n2_len);
        // When n2 = 2·n1 the short table is the even-index decimation of
        // the long one.
        let table_n1: Vec<K::Elem> = if n2 == 2 * n1 {
            table_n2.iter().step_by(2).copied().collect()
        } else {
            table_n2.clone()
        };
        let pairs_n1 = scramble_pairs(n1_len);
        let pairs_n2 = scramble_pairs(n2_len);

        let tune = TransposeTune::from_context(ctx);
        let runner = ParallelRunner::new(ctx);
        let mut access = data.get_array(AccessMode::ReadWrite, 0, n)?;

        if !inverse {
            transpose(access.as_mut_slice(), n1_len, n2_len, &tune);
            runner.run(&RowTransformPass {
                kernel,
                data: SendPtr(access.as_mut_slice().as_mut_ptr()),
                rows: n2,
                row_length: n1_len,
                w_table: &table_n1,
                scramble: &pairs_n1,
                inverse: false,
            })?;
            transpose(access.as_mut_slice(), n2_len, n1_len, &tune);
            runner.run(&TwiddlePass {
                kernel,
                data: SendPtr(access.as_mut_slice().as_mut_ptr()),
                rows: n1,
                row_length: n2_len,
                w,
                row_offset: 0,
                scale: None,
            })?;
            runner.run(&RowTransformPass {
                kernel,
                data: SendPtr(access.as_mut_slice().as_mut_ptr()),
                rows: n1,
                row_length: n2_len,
                w_table: &table_n2,
                scramble: &pairs_n2,
                inverse: false,
            })?;
        } else {
            let total = inverse_total.expect("inverse pass carries a total");
            let scale = kernel.inv(kernel.element(total))?;
            runner.run(&RowTransformPass {
                kernel,
                data: SendPtr(access.as_mut_slice().as_mut_ptr()),
                rows: n1,
                row_length: n2_len,
                w_table: &table_n2,
                scramble: &pairs_n2,
                inverse: true,
            })?;
            runner.run(&TwiddlePass {
                kernel,
                data: SendPtr(access.as_mut_slice().as_mut_ptr()),
                rows: n1,
                row_length: n2_len,
                w,
                row_offset: 0,
                scale: Some(scale),
            })?;
            transpose(access.as_mut_slice(), n1_len, n2_len, &tune);
            runner.run(&RowTransformPass {
                kernel,
                data: SendPtr(access.as_mut_slice().as_mut_ptr()),
                rows: n2,
                row_length: n1_len,
                w_table: &table_n1,
                scramble: &pairs_n1,
                inverse: true,
            })?;
            transpose(access.as_mut_slice(), n2_len, n1_len, &tune);
        }
        access.close()
    }
}

impl<K: Kernel> Default for SixStepFntStrategy<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Kernel> NttStrategy<K> for SixStepFntStrategy<K> {
    fn forward(
        &self,
        ctx: &Context,
        data: &mut DataStorage<K::Elem>,
        modulus: usize,
    ) -> Result<()> {
        self.transform(ctx, data, modulus, None)
    }

    fn inverse(
        &self,
        ctx: &Context,
        data: &mut DataStorage<K::Elem>,
        modulus: usize,
        total: u64,
    ) -> Result<()> {
        self.transform(ctx, data, modulus, Some(total))
    }
}

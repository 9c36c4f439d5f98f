use {
    crate::{
        kernel::Kernel,
        rows::{RowTransformPass, SendPtr, TwiddlePass},
        strategy::NttStrategy,
        table::scramble_pairs,
    },
    apmul_common::{shared_memory_lock, Context, Element, Error, ParallelRunner, Result},
    apmul_storage::{AccessMode, DataStorage},
    std::marker::PhantomData,
    tracing::{debug, instrument},
};

/// Out-of-core transform: the data are an `n1 × n2` matrix on disk, swept
/// twice through memory. Columns come in through transposed-array slabs,
/// rows through contiguous slabs carrying the twiddle multiply; the whole
/// transform runs under the shared-memory lock.
pub struct TwoPassFntStrategy<K: Kernel>(PhantomData<K>);

impl<K: Kernel> TwoPassFntStrategy<K> {
    pub fn new() -> Self {
        Self(PhantomData)
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
            return Err(Error::Internal("two-pass needs a power-of-two length >= 4"));
        }
        let k = n.trailing_zeros();
        let n1 = 1u64 << (k / 2);
        let n2 = n / n1;
        if !(n1 <= n2 && n2 <= 2 * n1) {
            return Err(Error::Internal("two-pass factor split out of shape"));
        }
        let max_block_elems = (ctx.max_memory_block_size / K::Elem::BYTES).max(1);
        let slab_columns = (max_block_elems / n1).min(n2);
        let slab_rows = (max_block_elems / n2).min(n1);
        if slab_columns == 0 || slab_rows == 0 {
            return Err(Error::Internal("memory block cannot hold one matrix row"));
        }
        debug!(n1, n2, slab_columns, slab_rows, "two-pass slab geometry");

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
        let table_n1: Vec<K::Elem> = if n2 == 2 * n1 {
            table_n2.iter().step_by(2).copied().collect()
        } else {
            table_n2.clone()
        };
        let pairs_n1 = scramble_pairs(n1_len);
        let pairs_n2 = scramble_pairs(n2_len);

        // The working set is the whole storage; serialize with other heavy
        // computations and absorb their donated workers.
        let guard = shared_memory_lock(ctx.shared_memory_lock(), ctx.num_workers)?;
        let runner = ParallelRunner::new(ctx);

        let column_pass = |data: &DataStorage<K::Elem>| -> Result<()> {
            let mut start = 0;
            while start < n2 {
                let columns = slab_columns.min(n2 - start);
                let mut slab =
                    data.get_transposed_array(AccessMode::ReadWrite, start, columns, n1)?;
                runner.run_with_donations(
                    &RowTransformPass {
                        kernel,
                        data: SendPtr(slab.as_mut_slice().as_mut_ptr()),
                        rows: columns,
                        row_length: n1_len,
                        w_table: &table_n1,
                        scramble: &pairs_n1,
                        inverse,
                    },
                    Some(guard.donated()),
                )?;
                slab.close()?;
                start += columns;
            }
            Ok(())
        };

        let row_pass = |data: &DataStorage<K::Elem>, scale: Option<K::Elem>| -> Result<()> {
            let mut start = 0;
            while start < n1 {
                let rows = slab_rows.min(n1 - start);
                let mut slab = data.get_array(AccessMode::ReadWrite, start * n2, rows * n2)?;
                let transform = RowTransformPass {
                    kernel,
                    data: SendPtr(slab.as_mut_slice().as_mut_ptr()),
                    rows,
                    row_length: n2_len,
                    w_table: &table_n2,
                    scramble: &pairs_n2,
                    inverse,
                };
                let twiddle = TwiddlePass {
                    kernel,
                    data: SendPtr(slab.as_mut_slice().as_mut_ptr()),
                    rows,
                    row_length: n2_len,
                    w,
                    row_offset: start,
                    scale,
                };
                if inverse {
                    runner.run_with_donations(&transform, Some(guard.donated()))?;
                    runner.run_with_donations(&twiddle, Some(guard.donated()))?;
                } else {
                    runner.run_with_donations(&twiddle, Some(guard.donated()))?;
                    runner.run_with_donations(&transform, Some(guard.donated()))?;
                }
                slab.close()?;
                start += rows;
            }
            Ok(())
        };

        if let Some(total) = inverse_total {
            let scale = kernel.inv(kernel.element(total))?;
            row_pass(data, Some(scale))?;
            column_pass(data)?;
        } else {
            column_pass(data)?;
            row_pass(data, None)?;
        }
        drop(guard);
        Ok(())
    }
}

impl<K: Kernel> Default for TwoPassFntStrategy<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Kernel> NttStrategy<K> for TwoPassFntStrategy<K> {
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

//! Parallel row passes shared by the six-step and two-pass strategies.
//!
//! Workers address disjoint rows of one staged matrix through a raw
//! pointer; the runner's strides partition the row range, so no two
//! workers ever touch the same row.

use {
    crate::{kernel::Kernel, table},
    apmul_common::{ParallelRunnable, Result},
};

pub(crate) struct SendPtr<E>(pub *mut E);

// SAFETY: the passes below hand each worker a disjoint set of rows.
unsafe impl<E: Send> Send for SendPtr<E> {}
unsafe impl<E: Send> Sync for SendPtr<E> {}

/// Transforms each row of a row-major `rows × row_length` matrix with the
/// table FNT, in natural order.
pub(crate) struct RowTransformPass<'a, K: Kernel> {
    pub kernel:     K,
    pub data:       SendPtr<K::Elem>,
    pub rows:       u64,
    pub row_length: usize,
    pub w_table:    &'a [K::Elem],
    pub scramble:   &'a [(u32, u32)],
    pub inverse:    bool,
}

impl<K: Kernel> ParallelRunnable for RowTransformPass<'_, K> {
    fn length(&self) -> u64 {
        self.rows
    }

    fn run_stride(&self, start: u64, length: u64) -> Result<()> {
        for row in start..start + length {
            // SAFETY: rows are disjoint across strides and in bounds.
            let row = unsafe {
                std::slice::from_raw_parts_mut(
                    self.data.0.add(row as usize * self.row_length),
                    self.row_length,
                )
            };
            if self.inverse {
                table::inverse_row(&self.kernel, row, self.w_table, self.scramble);
            } else {
                table::forward_row(&self.kernel, row, self.w_table, self.scramble);
            }
        }
        Ok(())
    }
}

/// Multiplies element `(i, j)` by `w^((row_offset + i)·j)`, folding an
/// optional constant (the inverse normalization) into every element. Each
/// worker walks its rows with two running powers of `w`.
pub(crate) struct TwiddlePass<K: Kernel> {
    pub kernel:     K,
    pub data:       SendPtr<K::Elem>,
    pub rows:       u64,
    pub row_length: usize,
    pub w:          K::Elem,
    pub row_offset: u64,
    pub scale:      Option<K::Elem>,
}

impl<K: Kernel> ParallelRunnable for TwiddlePass<K> {
    fn length(&self) -> u64 {
        self.rows
    }

    fn run_stride(&self, start: u64, length: u64) -> Result<()> {
        let kernel = &self.kernel;
        let start_factor = self.scale.unwrap_or_else(|| kernel.element(1));
        let mut row_root = kernel.pow(self.w, self.row_offset + start);
        for row in start..start + length {
            // SAFETY: rows are disjoint across strides and in bounds.
            let row = unsafe {
                std::slice::from_raw_parts_mut(
                    self.data.0.add(row as usize * self.row_length),
                    self.row_length,
                )
            };
            let mut factor = start_factor;
            for value in row.iter_mut() {
                *value = kernel.mul(*value, factor);
                factor = kernel.mul(factor, row_root);
            }
            row_root = kernel.mul(row_root, self.w);
        }
        Ok(())
    }
}

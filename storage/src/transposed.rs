use {
    crate::{access::AccessMode, disk::DiskBacking, transpose::l1_tile_side},
    apmul_common::{Element, Result},
    tracing::warn,
};

/// Gathers a `columns × rows` submatrix of an on-disk `rows × rowLength`
/// matrix, transposed into memory so each original column becomes a
/// contiguous row. A WRITE close transposes back and scatters the block to
/// the file in the same pattern.
pub struct TransposedArray<'a, T: Element> {
    backing:      &'a DiskBacking,
    /// Row-major `columns × rows`: `buf[c·rows + r]` is matrix element
    /// `(r, start_column + c)`.
    buf:          Vec<T>,
    mode:         AccessMode,
    base_offset:  u64,
    start_column: u64,
    columns:      usize,
    rows:         usize,
    row_length:   u64,
    dirty:        bool,
    closed:       bool,
}

impl<'a, T: Element> TransposedArray<'a, T> {
    pub(crate) fn open(
        backing: &'a DiskBacking,
        mode: AccessMode,
        base_offset: u64,
        start_column: u64,
        columns: usize,
        rows: usize,
        row_length: u64,
    ) -> Result<Self> {
        let mut buf = vec![T::default(); columns * rows];
        if mode.reads() {
            let mut staging = vec![T::default(); columns * rows];
            for r in 0..rows {
                let elem_offset = base_offset + r as u64 * row_length + start_column;
                let row = &mut staging[r * columns..(r + 1) * columns];
                backing.read_at(elem_offset * T::BYTES, bytemuck::cast_slice_mut(row))?;
            }
            transpose_into(&staging, rows, columns, backing.l1_bytes, &mut buf);
        }
        Ok(Self {
            backing,
            buf,
            mode,
            base_offset,
            start_column,
            columns,
            rows,
            row_length,
            dirty: false,
            closed: false,
        })
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn as_slice(&self) -> &[T] {
        &self.buf
    }

    /// # Panics
    ///
    /// Panics when the handle was opened read-only.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        assert!(
            self.mode.writes(),
            "write access through a read-only transposed handle"
        );
        self.dirty = true;
        &mut self.buf
    }

    /// Transposes the block back and scatters it to the file.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        if self.dirty {
            let mut staging = vec![T::default(); self.columns * self.rows];
            transpose_into(
                &self.buf,
                self.columns,
                self.rows,
                self.backing.l1_bytes,
                &mut staging,
            );
            for r in 0..self.rows {
                let elem_offset =
                    self.base_offset + r as u64 * self.row_length + self.start_column;
                let row = &staging[r * self.columns..(r + 1) * self.columns];
                self.backing
                    .write_at(elem_offset * T::BYTES, bytemuck::cast_slice(row))?;
            }
            self.dirty = false;
        }
        Ok(())
    }
}

impl<T: Element> Drop for TransposedArray<'_, T> {
    fn drop(&mut self) {
        if !self.closed && self.dirty {
            warn!("transposed array dropped with uncommitted writes");
        }
    }
}

/// Out-of-place `rows × cols` transpose staged in L1-sized tiles.
fn transpose_into<T: Element>(src: &[T], rows: usize, cols: usize, l1_bytes: u64, dst: &mut [T]) {
    let tile = l1_tile_side::<T>(l1_bytes).max(1);
    for br in (0..rows).step_by(tile) {
        for bc in (0..cols).step_by(tile) {
            for r in br..(br + tile).min(rows) {
                for c in bc..(bc + tile).min(cols) {
                    dst[c * rows + r] = src[r * cols + c];
                }
            }
        }
    }
}

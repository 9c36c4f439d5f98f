//! Chinese-Remainder recombination of the three residue streams with
//! base-carry propagation.
//!
//! The sweep walks residue index i = L−1 down to 0 (least significant
//! first), reconstructs each convolution coefficient modulo m0·m1·m2 in a
//! three-word accumulator, adds the running carry and divides by the digit
//! base, emitting one digit per step. The first `L − full + 1` emissions
//! are the identically-zero tail of the padded convolution and are
//! skipped; the rest fill the destination backwards, and anything past the
//! destination's capacity is dropped.
//!
//! The walk is split into contiguous blocks processed by the parallel
//! runner. Every block computes its digits with carry-in zero, then waits
//! on a mailbox keyed by its starting offset for the previous block's
//! two-word carry-out, base-adds it through its own digits from the least
//! significant end, and publishes its own carry-out.

use {
    crate::words::{add2, add3, div2_by_word, div3_by_word, ge3, is_zero2, mul_2x1, sub3},
    apmul_common::{
        Context, Element, Error, ParallelRunnable, ParallelRunner, Result, MIN_BATCH_SIZE,
    },
    apmul_ntt::Kernel,
    apmul_storage::{AccessMode, DataStorage, StorageIterator},
    std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Condvar, Mutex,
        },
    },
    tracing::instrument,
};

/// Carry hand-off between adjacent blocks, keyed by the walk offset where
/// the receiving block starts. Poisoned when any block fails, so waiters
/// do not hang on a carry that will never arrive.
struct Mailboxes<E: Element> {
    slots:  Mutex<HashMap<u64, [E; 2]>>,
    ready:  Condvar,
    failed: AtomicBool,
}

impl<E: Element> Mailboxes<E> {
    fn new() -> Self {
        Self {
            slots:  Mutex::new(HashMap::new()),
            ready:  Condvar::new(),
            failed: AtomicBool::new(false),
        }
    }

    fn publish(&self, key: u64, carry: [E; 2]) -> Result<()> {
        let mut slots = self.slots.lock().map_err(|_| Error::Interrupted)?;
        slots.insert(key, carry);
        self.ready.notify_all();
        Ok(())
    }

    fn wait_for(&self, key: u64) -> Result<[E; 2]> {
        let mut slots = self.slots.lock().map_err(|_| Error::Interrupted)?;
        loop {
            if self.failed.load(Ordering::Relaxed) {
                return Err(Error::Internal("carry chain aborted"));
            }
            if let Some(carry) = slots.remove(&key) {
                return Ok(carry);
            }
            slots = self.ready.wait(slots).map_err(|_| Error::Interrupted)?;
        }
    }

    fn poison(&self) {
        self.failed.store(true, Ordering::Relaxed);
        self.ready.notify_all();
    }
}

enum DstTarget<E: Element> {
    /// Pre-opened destination slice; blocks write disjoint ranges.
    Memory(*mut E),
    /// Disk destination; blocks open their own range iterators.
    Disk,
}

// SAFETY: blocks partition the walk range, and the walk-to-destination
// mapping is monotone, so no two strides touch the same digit.
unsafe impl<E: Element> Send for DstTarget<E> {}
unsafe impl<E: Element> Sync for DstTarget<E> {}

/// One digit sink for a block's destination range, walking backwards from
/// the block's least significant digit.
enum BlockSink<'a, E: Element> {
    Memory { base: *mut E, next: u64 },
    Disk(StorageIterator<'a, E>),
    None,
}

impl<E: Element> BlockSink<'_, E> {
    fn push(&mut self, digit: E) -> Result<()> {
        match self {
            BlockSink::Memory { base, next } => {
                // SAFETY: `next` stays inside this block's digit range.
                unsafe { base.add(*next as usize).write(digit) };
                *next = next.wrapping_sub(1);
                Ok(())
            }
            BlockSink::Disk(cursor) => {
                cursor.set(digit)?;
                cursor.next()
            }
            BlockSink::None => Err(Error::Internal("digit emitted into a closed sink")),
        }
    }

    fn close(self) -> Result<()> {
        if let BlockSink::Disk(cursor) = self {
            cursor.close()?;
        }
        Ok(())
    }
}

struct CarryCrt<'a, K: Kernel> {
    kernels:     [K; 3],
    sources:     [&'a DataStorage<K::Elem>; 3],
    dst:         DstTarget<K::Elem>,
    dst_storage: &'a DataStorage<K::Elem>,
    mailboxes:   &'a Mailboxes<K::Elem>,
    base:        K::Elem,
    /// Transform length; also the walk length.
    length:      u64,
    skip:        u64,
    full_size:   u64,
    result_size: u64,
    batch:       u64,
}

impl<K: Kernel> CarryCrt<'_, K> {
    /// `dst` index of walk position `w`, when it has one.
    fn dst_index(&self, w: u64) -> Option<u64> {
        if w < self.skip {
            return None;
        }
        let back = w - self.skip;
        if back < self.result_size {
            Some(self.result_size - 1 - back)
        } else {
            None
        }
    }

    /// The CRT value of coefficient i: `M12·y0 + M02·y1 + M01·y2` reduced
    /// into `[0, M012)` by a conditional subtract after each partial add.
    #[inline]
    fn combine(&self, r0: K::Elem, r1: K::Elem, r2: K::Elem) -> [K::Elem; 3] {
        let y0 = self.kernels[0].mul(K::T[0], r0);
        let y1 = self.kernels[1].mul(K::T[1], r1);
        let y2 = self.kernels[2].mul(K::T[2], r2);
        let mut sum = mul_2x1(K::M12, y0);
        sum = add3(sum, mul_2x1(K::M02, y1));
        if ge3(sum, K::M012) {
            sum = sub3(sum, K::M012);
        }
        sum = add3(sum, mul_2x1(K::M01, y2));
        if ge3(sum, K::M012) {
            sum = sub3(sum, K::M012);
        }
        debug_assert!(!ge3(sum, K::M012));
        sum
    }

    fn sink_for(&self, d_lo: u64, d_hi: u64, mode: AccessMode) -> Result<BlockSink<'_, K::Elem>> {
        match &self.dst {
            DstTarget::Memory(base) => Ok(BlockSink::Memory {
                base: *base,
                next: d_hi,
            }),
            DstTarget::Disk => Ok(BlockSink::Disk(
                self.dst_storage.reverse_iterator(mode, d_lo, d_hi + 1)?,
            )),
        }
    }

    fn run_block(&self, start: u64, len: u64) -> Result<()> {
        let source_lo = self.length - start - len;
        let src0 = self.sources[0].get_array(AccessMode::Read, source_lo, len)?;
        let src1 = self.sources[1].get_array(AccessMode::Read, source_lo, len)?;
        let src2 = self.sources[2].get_array(AccessMode::Read, source_lo, len)?;
        let s0 = src0.as_slice();
        let s1 = src1.as_slice();
        let s2 = src2.as_slice();

        // Destination range of this block, if any digit of it survives.
        let w_first = start.max(self.skip);
        let w_last = (start + len - 1).min(self.skip + self.result_size - 1);
        let stored = w_first <= w_last;
        let (d_lo, d_hi) = if stored {
            (
                self.result_size - 1 - (w_last - self.skip),
                self.result_size - 1 - (w_first - self.skip),
            )
        } else {
            (0, 0)
        };
        let mut sink = if stored {
            self.sink_for(d_lo, d_hi, AccessMode::Write)?
        } else {
            BlockSink::None
        };

        // Local pass with carry-in zero, least significant index first.
        let zero = K::Elem::default();
        let mut carry = [zero; 3];
        for w in start..start + len {
            let index = (start + len - 1 - w) as usize;
            let sum = self.combine(s0[index], s1[index], s2[index]);
            let value = add3(sum, carry);
            let (next_carry, digit) = div3_by_word(value, self.base);
            debug_assert!(next_carry[2] == zero, "carry exceeds two words");
            carry = next_carry;
            if self.dst_index(w).is_some() {
                sink.push(digit)?;
            }
        }
        if stored {
            sink.close()?;
        }
        src0.close()?;
        src1.close()?;
        src2.close()?;
        let mut carry_out = [carry[0], carry[1]];

        // Stitch: fold the previous block's carry through our digits.
        let incoming = if start == 0 {
            [zero; 2]
        } else {
            self.mailboxes.wait_for(start)?
        };
        let truncated = self
            .dst_index(start + len - 1)
            .is_none()
            && start + len - 1 >= self.skip;
        if !is_zero2(incoming) {
            debug_assert!(
                start >= self.skip,
                "carry flowed into the zero-padded tail"
            );
            let residual = self.base_add_sweep(incoming, d_lo, d_hi, stored)?;
            if truncated {
                // Digits past the destination are dropped; so is whatever
                // would have carried through them.
            } else {
                let (sum, overflow) = add2(carry_out, residual);
                debug_assert!(!overflow, "block carry-out exceeds two words");
                carry_out = sum;
            }
        }

        let end = start + len;
        if end == self.length {
            self.finish(carry_out)?;
        } else if truncated {
            self.mailboxes.publish(end, [zero; 2])?;
        } else {
            self.mailboxes.publish(end, carry_out)?;
        }
        Ok(())
    }

    /// In-place base-add of `incoming` through this block's stored digits,
    /// starting at the least significant one; stops as soon as the carry
    /// dies. Returns whatever is still carrying past the block.
    fn base_add_sweep(
        &self,
        incoming: [K::Elem; 2],
        d_lo: u64,
        d_hi: u64,
        stored: bool,
    ) -> Result<[K::Elem; 2]> {
        let mut carry = incoming;
        if !stored {
            return Ok(carry);
        }
        match &self.dst {
            DstTarget::Memory(base) => {
                let mut d = d_hi;
                loop {
                    if is_zero2(carry) {
                        break;
                    }
                    // SAFETY: d stays within this block's digit range.
                    let slot = unsafe { base.add(d as usize) };
                    let digit = unsafe { slot.read() };
                    let (value, overflow) = add2(carry, [digit, K::Elem::default()]);
                    debug_assert!(!overflow);
                    let (next, low) = div2_by_word(value, self.base);
                    unsafe { slot.write(low) };
                    carry = next;
                    if d == d_lo {
                        break;
                    }
                    d -= 1;
                }
            }
            DstTarget::Disk => {
                let mut cursor =
                    self.dst_storage
                        .reverse_iterator(AccessMode::ReadWrite, d_lo, d_hi + 1)?;
                while cursor.has_next() {
                    if is_zero2(carry) {
                        break;
                    }
                    let digit = cursor.get()?;
                    let (value, overflow) = add2(carry, [digit, K::Elem::default()]);
                    debug_assert!(!overflow);
                    let (next, low) = div2_by_word(value, self.base);
                    cursor.set(low)?;
                    cursor.next()?;
                    carry = next;
                }
                cursor.close()?;
            }
        }
        Ok(carry)
    }

    /// Final block: flush the leading digit when the caller asked for the
    /// full product, and assert the carry is spent.
    fn finish(&self, carry_out: [K::Elem; 2]) -> Result<()> {
        if self.result_size < self.full_size {
            // Truncated request: the leading digits and their carry are
            // intentionally dropped.
            return Ok(());
        }
        let zero = K::Elem::default();
        if carry_out[1] != zero || carry_out[0] >= self.base {
            return Err(Error::Internal("terminal carry exceeds one digit"));
        }
        let flush_index = self.result_size - self.full_size;
        match &self.dst {
            DstTarget::Memory(base) => {
                // SAFETY: flush_index < result_size.
                unsafe { base.add(flush_index as usize).write(carry_out[0]) };
            }
            DstTarget::Disk => {
                let mut cursor = self.dst_storage.iterator(
                    AccessMode::Write,
                    flush_index,
                    flush_index + 1,
                )?;
                cursor.set(carry_out[0])?;
                cursor.next()?;
                cursor.close()?;
            }
        }
        Ok(())
    }
}

impl<K: Kernel> ParallelRunnable for CarryCrt<'_, K> {
    fn length(&self) -> u64 {
        self.length
    }

    fn preferred_batch_size(&self) -> u64 {
        self.batch
    }

    fn run_stride(&self, start: u64, length: u64) -> Result<()> {
        match self.run_block(start, length) {
            Ok(()) => Ok(()),
            Err(error) => {
                self.mailboxes.poison();
                Err(error)
            }
        }
    }
}

/// Combines three residue storages of length L into `result_size` digits
/// of the radix-`base` product.
#[instrument(skip_all, fields(full_size, result_size))]
pub(crate) fn carry_crt<K: Kernel>(
    ctx: &Context,
    sources: [&DataStorage<K::Elem>; 3],
    full_size: u64,
    result_size: u64,
    donated: Option<&AtomicUsize>,
) -> Result<DataStorage<K::Elem>> {
    let length = sources[0].len();
    if sources.iter().any(|source| source.len() < length) {
        return Err(Error::Internal("residue streams shorter than the transform"));
    }
    if full_size == 0 || full_size > length || result_size == 0 || result_size > full_size {
        return Err(Error::Internal("carry-CRT size bookkeeping is inconsistent"));
    }
    let base = K::Elem::from_u64(ctx.base).ok_or(Error::Arithmetic(
        "digit base does not fit the element type",
    ))?;
    let dst = DataStorage::<K::Elem>::new(ctx, result_size * K::Elem::BYTES)?;
    let mailboxes = Mailboxes::new();
    let batch = (length / (4 * ctx.num_workers as u64).max(1)).max(MIN_BATCH_SIZE);
    let runner = ParallelRunner::new(ctx);
    let kernels = [
        K::for_modulus(0),
        K::for_modulus(1),
        K::for_modulus(2),
    ];
    let skip = length - full_size + 1;

    if dst.is_disk_backed() {
        let task = CarryCrt {
            kernels,
            sources,
            dst: DstTarget::Disk,
            dst_storage: &dst,
            mailboxes: &mailboxes,
            base,
            length,
            skip,
            full_size,
            result_size,
            batch,
        };
        runner.run_with_donations(&task, donated)?;
    } else {
        let mut access = dst.get_array(AccessMode::Write, 0, result_size)?;
        let task = CarryCrt {
            kernels,
            sources,
            dst: DstTarget::Memory(access.as_mut_slice().as_mut_ptr()),
            dst_storage: &dst,
            mailboxes: &mailboxes,
            base,
            length,
            skip,
            full_size,
            result_size,
            batch,
        };
        runner.run_with_donations(&task, donated)?;
        access.close()?;
    }
    Ok(dst)
}

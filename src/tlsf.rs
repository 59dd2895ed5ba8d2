//! The allocator core: free-list matrix, splitting/coalescing block engine,
//! and the public `Tlsf` pool handle.
//!
//! This follows `tlsf.c`'s algorithm (fixed first-/second-level class
//! counts, boundary-tag headers, a zero-size sentinel terminating each
//! area, physically-adjacent area merging) rather than `rlsf`'s own
//! const-generic, sentinel-free redesign — the const-generic `Tlsf<FLBitmap,
//! SLBitmap, const FLLEN, const SLLEN>` shape doesn't fit a spec that fixes
//! those counts outright, and the sentinel is load-bearing for this spec's
//! multi-area story. What *is* kept from `rlsf` is the Rust idiom: a
//! standalone control struct borrowing pool memory via `NonNull`, not a
//! control block embedded in the buffer the way `tlsf.c`'s `tlsf_t` is —
//! see `DESIGN.md` for why.
mod area;
mod block;
mod map;


use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ptr::NonNull;

use crate::error::{AddAreaError, FailureReason, InitError};
use crate::int::BinInteger;
use crate::lock::RawPoolLock;

pub use block::GRANULARITY;
use block::{
    block_addr, block_from_payload, is_free, is_prev_free, next_phys, payload_ptr, payload_size,
    round_up_granularity, BlockHdr, FreeBlockHdr, FREE_BIT, HEADER_OVERHEAD, MIN_BLOCK_SIZE,
    MIN_SPLIT_REMAINDER, PREV_FREE_BIT,
};
use map::{map_insert, map_search, MAX_SLI, REAL_FLI};

/// The smallest buffer [`Tlsf::new`] will accept: enough to host an empty
/// area (`ib` header + info payload, one free block header, the sentinel).
pub const MIN_POOL_SIZE: usize = 3 * HEADER_OVERHEAD + 2 * MIN_BLOCK_SIZE;

#[cfg_attr(doc, svgbobdoc::transform)]
/// A Two-Level Segregated Fit allocator over one or more caller-supplied
/// memory regions.
///
/// `Tlsf` borrows its backing memory rather than owning it: the pool lives
/// wherever the caller put the buffer (a `static`, the stack, another
/// allocator's memory), and `'pool` ties the handle's lifetime to it. All
/// operations are O(1) with respect to the number of live allocations.
///
/// `L` is the locking strategy; see [`crate::lock::RawPoolLock`]. Pass
/// [`crate::lock::NullLock`] for single-threaded or externally-synchronized
/// use.
///
/// # Block layout
///
/// Every block, free or used, starts with a boundary-tag header holding a
/// back-pointer to the physically previous block and a size word whose low
/// two bits are stolen for the `FREE` and `PREV_FREE` flags. A free block's
/// payload doubles as its doubly-linked free-list pointers; a used block's
/// payload is entirely the caller's. Each area ends in a zero-size sentinel
/// so walking physical blocks forward never needs an explicit bounds check.
///
/// <center>
/// ```svgbob
///   ,---------------+---------------,   ,---------------+---------------,
///   | prev_phys      | size | FREE=1 |   | prev_phys      | size | FREE=0 |
///   +---------------+----------------+   +---------------+----------------+
///   | next_free                      |   | caller's payload               |
///   +---------------------------------+  |                                 |
///   | prev_free                      |   '---------------------------------'
///   '---------------------------------'
///           free block                          used block
/// ```
/// </center>
#[derive(Debug)]
pub struct Tlsf<'pool, L: RawPoolLock> {
    lock: L,
    area_head: Option<NonNull<area::AreaInfo>>,
    fl_bitmap: u32,
    sl_bitmap: [u32; REAL_FLI],
    matrix: [[Option<NonNull<FreeBlockHdr>>; MAX_SLI]; REAL_FLI],
    used_size: usize,
    max_size: usize,
    capacity: usize,
    last_failure: Option<FailureReason>,
    _pool: PhantomData<&'pool mut ()>,
}

// Safety: all pool mutation goes through `L`, which is the type responsible
// for making `Tlsf` safe to share across threads in the first place.
unsafe impl<'pool, L: RawPoolLock + Send> Send for Tlsf<'pool, L> {}

impl<'pool, L: RawPoolLock> Tlsf<'pool, L> {
    /// Create a pool over `buffer`, the initial area. Mirrors
    /// `init_memory_pool`. Returns the number of bytes immediately
    /// available for allocation.
    pub fn new(buffer: &'pool mut [MaybeUninit<u8>], lock: L) -> Result<(Self, usize), InitError> {
        if buffer.len() < MIN_POOL_SIZE {
            return Err(InitError::TooSmall);
        }
        if (buffer.as_ptr() as usize) % core::mem::align_of::<usize>() != 0 {
            return Err(InitError::Misaligned);
        }
        let mut this = Self {
            lock,
            area_head: None,
            fl_bitmap: 0,
            sl_bitmap: [0; REAL_FLI],
            matrix: [[None; MAX_SLI]; REAL_FLI],
            used_size: 0,
            max_size: 0,
            capacity: 0,
            last_failure: None,
            _pool: PhantomData,
        };
        let usable = this
            .add_area(buffer)
            .map_err(|_| InitError::TooSmall)?;
        log::debug!("tlsf: pool initialized, {usable} bytes usable");
        Ok((this, usable))
    }

    /// Add another, possibly discontiguous, region to the pool. Mirrors
    /// `add_new_area`: if the new region is physically adjacent to an
    /// existing area (on either side, with no gap), the two are merged into
    /// one rather than tracked separately. Returns the number of bytes the
    /// new region contributed to the pool's usable capacity.
    pub fn add_area(&mut self, region: &'pool mut [MaybeUninit<u8>]) -> Result<usize, AddAreaError> {
        let region_len = region.len();
        let usable = area::add_area(self, region)?;
        self.capacity += region_len;
        log::trace!("tlsf: added area of {region_len} bytes ({usable} usable)");
        Ok(usable)
    }

    /// Allocate `size` bytes. Returns `None` if no free block is large
    /// enough; the reason is then available from [`Self::last_failure`].
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        self.with_lock(|this| this.allocate_locked(size))
    }

    fn allocate_locked(&mut self, size: usize) -> Option<NonNull<u8>> {
        let rounded = round_up_granularity(size.max(MIN_BLOCK_SIZE));
        let (class_size, fl, sl) = map_search(rounded)?;
        let (fl, sl) = match self.find_suitable(fl, sl) {
            Some(v) => v,
            None => {
                self.last_failure = Some(FailureReason::OomMalloc);
                log::warn!("tlsf: allocate({size}): no free block large enough");
                return None;
            }
        };
        let b = unsafe { self.extract_head(fl, sl) };
        let block_payload = unsafe { payload_size(b) };
        let next_b = unsafe { next_phys(b) };

        if block_payload - class_size >= MIN_SPLIT_REMAINDER {
            let remainder_payload = block_payload - class_size - HEADER_OVERHEAD;
            let b2 = unsafe {
                NonNull::new_unchecked((block_addr(b) + HEADER_OVERHEAD + class_size) as *mut BlockHdr)
            };
            unsafe {
                (*b2.as_ptr()).prev_phys = None;
                (*b2.as_ptr()).size = remainder_payload | FREE_BIT;
                (*next_b.as_ptr()).prev_phys = Some(b2);
            }
            let (fl2, sl2) = map_insert(remainder_payload);
            unsafe { self.insert_free(b2.cast(), fl2, sl2) };
            unsafe {
                let prev_free_bit = (*b.as_ptr()).size & PREV_FREE_BIT;
                (*b.as_ptr()).size = class_size | prev_free_bit;
            }
        } else {
            unsafe {
                (*next_b.as_ptr()).size &= !PREV_FREE_BIT;
                (*b.as_ptr()).size &= !FREE_BIT;
            }
        }

        self.add_used(unsafe { payload_size(b) });
        Some(payload_ptr(b))
    }

    /// Free a block previously returned by [`Self::allocate`],
    /// [`Self::reallocate`], or [`Self::callocate`].
    ///
    /// # Safety
    ///
    /// `ptr` must have come from this pool and must not have already been
    /// freed.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>) {
        self.with_lock(|this| {
            let b = block_from_payload(ptr);
            this.free_block(b);
        });
    }

    /// [`Self::deallocate`], but accepting a possibly-null raw pointer and
    /// doing nothing for `NULL` — the `free(3)` convention.
    pub fn free_raw(&mut self, ptr: *mut u8) {
        if let Some(p) = NonNull::new(ptr) {
            unsafe { self.deallocate(p) };
        }
    }

    /// Resize a previously allocated block in place when possible, falling
    /// back to allocate-copy-free otherwise. Returns `None` only when
    /// growing and no strategy succeeds; the original block is left intact
    /// in that case.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from this pool and must not have already been
    /// freed.
    pub unsafe fn reallocate(&mut self, ptr: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>> {
        self.with_lock(|this| this.reallocate_locked(ptr, new_size))
    }

    unsafe fn reallocate_locked(&mut self, ptr: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>> {
        let b = block_from_payload(ptr);
        let new_payload = round_up_granularity(new_size.max(MIN_BLOCK_SIZE));
        let cur_payload = payload_size(b);

        if new_payload <= cur_payload {
            self.shrink_in_place(b, cur_payload, new_payload);
            return Some(ptr);
        }

        if self.try_grow_in_place(b, cur_payload, new_payload) {
            return Some(ptr);
        }

        let new_ptr = self.allocate_locked(new_size)?;
        core::ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), cur_payload.min(new_payload));
        self.free_block(b);
        Some(new_ptr)
    }

    unsafe fn shrink_in_place(&mut self, b: NonNull<BlockHdr>, cur_payload: usize, new_payload: usize) {
        self.remove_used(cur_payload);
        let mut avail = cur_payload;
        let next_b = next_phys(b);
        let mut after = next_b;
        if is_free(next_b) {
            let np = payload_size(next_b);
            let (fl, sl) = map_insert(np);
            self.extract(next_b.cast(), fl, sl);
            avail += np + HEADER_OVERHEAD;
            after = NonNull::new_unchecked((block_addr(b) + HEADER_OVERHEAD + avail) as *mut BlockHdr);
        }
        let leftover = avail - new_payload;
        let final_payload = if leftover >= MIN_SPLIT_REMAINDER {
            let split_payload = leftover - HEADER_OVERHEAD;
            let tail =
                NonNull::new_unchecked((block_addr(b) + HEADER_OVERHEAD + new_payload) as *mut BlockHdr);
            (*tail.as_ptr()).prev_phys = None;
            (*tail.as_ptr()).size = split_payload | FREE_BIT;
            (*after.as_ptr()).prev_phys = Some(tail);
            (*after.as_ptr()).size |= PREV_FREE_BIT;
            let (fl2, sl2) = map_insert(split_payload);
            self.insert_free(tail.cast(), fl2, sl2);
            new_payload
        } else {
            avail
        };
        let prev_free_bit = (*b.as_ptr()).size & PREV_FREE_BIT;
        (*b.as_ptr()).size = final_payload | prev_free_bit;
        self.add_used(final_payload);
    }

    /// Try to satisfy a growing reallocation by absorbing a free physical
    /// successor. Returns `false` (leaving the block untouched) if the
    /// successor isn't free or isn't big enough.
    unsafe fn try_grow_in_place(&mut self, b: NonNull<BlockHdr>, cur_payload: usize, new_payload: usize) -> bool {
        let next_b = next_phys(b);
        if !is_free(next_b) {
            return false;
        }
        let np = payload_size(next_b);
        if new_payload > cur_payload + np + HEADER_OVERHEAD {
            return false;
        }

        self.remove_used(cur_payload);
        let (fl, sl) = map_insert(np);
        self.extract(next_b.cast(), fl, sl);
        let mut avail = cur_payload + np + HEADER_OVERHEAD;
        let mut after = NonNull::new_unchecked((block_addr(b) + HEADER_OVERHEAD + avail) as *mut BlockHdr);
        (*after.as_ptr()).prev_phys = Some(b);
        (*after.as_ptr()).size &= !PREV_FREE_BIT;

        let leftover = avail - new_payload;
        if leftover >= MIN_SPLIT_REMAINDER {
            let split_payload = leftover - HEADER_OVERHEAD;
            let tail =
                NonNull::new_unchecked((block_addr(b) + HEADER_OVERHEAD + new_payload) as *mut BlockHdr);
            (*tail.as_ptr()).prev_phys = None;
            (*tail.as_ptr()).size = split_payload | FREE_BIT;
            (*after.as_ptr()).prev_phys = Some(tail);
            (*after.as_ptr()).size |= PREV_FREE_BIT;
            let (fl2, sl2) = map_insert(split_payload);
            self.insert_free(tail.cast(), fl2, sl2);
            avail = new_payload;
        }

        let prev_free_bit = (*b.as_ptr()).size & PREV_FREE_BIT;
        (*b.as_ptr()).size = avail | prev_free_bit;
        self.add_used(avail);
        true
    }

    /// Allocate storage for `n` elements of `elem_size` bytes, zeroed.
    /// Returns `None` (without allocating) on multiplication overflow.
    pub fn callocate(&mut self, n: usize, elem_size: usize) -> Option<NonNull<u8>> {
        if n == 0 || elem_size == 0 {
            return None;
        }
        let total = n.checked_mul(elem_size)?;
        let p = self.allocate(total)?;
        unsafe { core::ptr::write_bytes(p.as_ptr(), 0, total) };
        Some(p)
    }

    /// `realloc(3)`-style entry point: a null `ptr` behaves like `allocate`,
    /// a zero `new_size` behaves like `deallocate`, and the return value is
    /// null on failure (in which case, if `ptr` was non-null, it is still
    /// valid and unchanged).
    pub fn realloc_raw(&mut self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        match (NonNull::new(ptr), new_size) {
            (None, 0) => core::ptr::null_mut(),
            (None, _) => self
                .allocate(new_size)
                .map_or(core::ptr::null_mut(), NonNull::as_ptr),
            (Some(p), 0) => {
                unsafe { self.deallocate(p) };
                core::ptr::null_mut()
            }
            (Some(p), _) => unsafe {
                self.reallocate(p, new_size)
                    .map_or(core::ptr::null_mut(), NonNull::as_ptr)
            },
        }
    }

    /// Bytes currently handed out to the caller, including per-block
    /// header overhead.
    pub fn used_size(&self) -> usize {
        self.used_size
    }

    /// High-water mark of [`Self::used_size`] across this pool's lifetime.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// The reason the most recent failed operation failed, if any.
    pub fn last_failure(&self) -> Option<FailureReason> {
        self.last_failure
    }

    fn with_lock<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let skip = self.lock.in_isr();
        if !skip {
            self.lock.lock();
        }
        let r = f(self);
        if !skip {
            self.lock.unlock();
        }
        r
    }

    fn add_used(&mut self, payload: usize) {
        self.used_size += payload + HEADER_OVERHEAD;
        if self.used_size > self.max_size {
            self.max_size = self.used_size;
        }
        if self.used_size > self.capacity {
            // Every byte ever counted as used came from a block carved out
            // of a tracked area, so this can only happen if the boundary
            // tags have been corrupted.
            self.last_failure = Some(FailureReason::UsedSizeExceedsPool);
            log::error!("tlsf: used_size ({}) exceeds pool capacity ({}) — corrupted heap?", self.used_size, self.capacity);
        }
    }

    fn remove_used(&mut self, payload: usize) {
        self.used_size -= payload + HEADER_OVERHEAD;
    }

    /// Free `b`, coalescing with physically adjacent free neighbors, and
    /// return the final free block's payload size.
    unsafe fn free_block(&mut self, mut b: NonNull<BlockHdr>) -> usize {
        let orig_payload = payload_size(b);
        (*b.as_ptr()).size |= FREE_BIT;
        self.remove_used(orig_payload);

        let n = next_phys(b);
        if is_free(n) {
            let n_payload = payload_size(n);
            let (fl, sl) = map_insert(n_payload);
            self.extract(n.cast(), fl, sl);
            let prev_free_bit = (*b.as_ptr()).size & PREV_FREE_BIT;
            (*b.as_ptr()).size = (payload_size(b) + n_payload + HEADER_OVERHEAD) | FREE_BIT | prev_free_bit;
        }

        if is_prev_free(b) {
            let p = (*b.as_ptr()).prev_phys.expect("PREV_FREE set implies prev_phys is Some");
            let p_payload = payload_size(p);
            let (fl, sl) = map_insert(p_payload);
            self.extract(p.cast(), fl, sl);
            let b_payload = payload_size(b);
            let p_prev_free_bit = (*p.as_ptr()).size & PREV_FREE_BIT;
            (*p.as_ptr()).size = (p_payload + b_payload + HEADER_OVERHEAD) | FREE_BIT | p_prev_free_bit;
            b = p;
        }

        let final_payload = payload_size(b);
        let (fl, sl) = map_insert(final_payload);
        self.insert_free(b.cast(), fl, sl);

        let nxt = next_phys(b);
        (*nxt.as_ptr()).size |= PREV_FREE_BIT;
        (*nxt.as_ptr()).prev_phys = Some(b);

        final_payload
    }

    /// Find the smallest nonempty class at or above `(fl, sl)`, returning
    /// its coordinates. This is the bitmap double bit-scan described in
    /// spec §4.2: first try the same first-level row above `sl`, then fall
    /// back to the next nonempty row entirely.
    fn find_suitable(&self, fl_in: usize, sl_in: usize) -> Option<(usize, usize)> {
        let same_row = self.sl_bitmap[fl_in].bit_scan_forward(sl_in as u32);
        if same_row != u32::BITS {
            return Some((fl_in, same_row as usize));
        }
        if fl_in + 1 >= REAL_FLI {
            return None;
        }
        let fl = self.fl_bitmap.bit_scan_forward(fl_in as u32 + 1);
        if fl == u32::BITS {
            return None;
        }
        let sl = self.sl_bitmap[fl as usize].bit_scan_forward(0);
        Some((fl as usize, sl as usize))
    }

    unsafe fn insert_free(&mut self, mut b: NonNull<FreeBlockHdr>, fl: usize, sl: usize) {
        let head = self.matrix[fl][sl];
        b.as_mut().prev_free = None;
        b.as_mut().next_free = head;
        if let Some(mut h) = head {
            h.as_mut().prev_free = Some(b);
        }
        self.matrix[fl][sl] = Some(b);
        self.sl_bitmap[fl].set_bit(sl as u32);
        self.fl_bitmap.set_bit(fl as u32);
    }

    unsafe fn extract(&mut self, mut b: NonNull<FreeBlockHdr>, fl: usize, sl: usize) {
        let next = b.as_mut().next_free;
        let prev = b.as_mut().prev_free;
        if let Some(mut n) = next {
            n.as_mut().prev_free = prev;
        }
        match prev {
            Some(mut p) => p.as_mut().next_free = next,
            None => {
                self.matrix[fl][sl] = next;
                if next.is_none() {
                    self.sl_bitmap[fl].clear_bit(sl as u32);
                    if self.sl_bitmap[fl] == 0 {
                        self.fl_bitmap.clear_bit(fl as u32);
                    }
                }
            }
        }
    }

    unsafe fn extract_head(&mut self, fl: usize, sl: usize) -> NonNull<BlockHdr> {
        let mut b = self.matrix[fl][sl].expect("find_suitable only returns nonempty classes");
        let next = b.as_mut().next_free;
        self.matrix[fl][sl] = next;
        if let Some(mut n) = next {
            n.as_mut().prev_free = None;
        } else {
            self.sl_bitmap[fl].clear_bit(sl as u32);
            if self.sl_bitmap[fl] == 0 {
                self.fl_bitmap.clear_bit(fl as u32);
            }
        }
        b.cast()
    }
}

//! A pool that grows on demand instead of requiring its entire capacity up
//! front.
//!
//! Grounded on `rlsf`'s `FlexSource`/`FlexTlsf` (`crates/rlsf/src/flex.rs`).
//! This is a narrower cut of that design: because this crate's [`Tlsf`]
//! core takes plain byte sizes rather than `core::alloc::Layout`, and
//! already has an area manager that knows how to merge physically adjacent
//! regions, `FlexTlsf` doesn't need its own pool-footer bookkeeping —
//! growing is just acquiring more memory and handing it to
//! [`Tlsf::add_area`]. What's dropped relative to `rlsf::FlexTlsf` is
//! giving memory back to the source: this crate has no concept of
//! releasing an area once added, matching the base pool's own "bounded,
//! caller-supplied regions" model.
use core::mem::MaybeUninit;
use core::ptr::NonNull;

use crate::error::InitError;
use crate::lock::RawPoolLock;
use crate::tlsf::{Tlsf, MIN_POOL_SIZE};

/// A source of fresh memory for a [`FlexTlsf`] to grow into.
///
/// # Safety
///
/// Each region returned by [`Self::acquire`] must be disjoint from every
/// other region this source has ever returned, and must remain valid and
/// exclusively owned by the pool for the `'static` lifetime the trait
/// signature promises.
pub unsafe trait PoolSource {
    /// Request at least `min_size` bytes of fresh memory. Implementations
    /// may return more (e.g. rounding up to a page size) but never less.
    /// Returns `None` if no more memory is available.
    fn acquire(&mut self, min_size: usize) -> Option<&'static mut [MaybeUninit<u8>]>;
}

/// A [`Tlsf`] pool that calls into a [`PoolSource`] for more memory when it
/// runs out of space, rather than requiring its entire capacity up front.
pub struct FlexTlsf<S: PoolSource, L: RawPoolLock> {
    source: S,
    inner: Tlsf<'static, L>,
}

impl<S: PoolSource, L: RawPoolLock> FlexTlsf<S, L> {
    /// Create a pool backed by `source`, requesting an initial region of at
    /// least `initial_size` usable bytes.
    pub fn new(mut source: S, initial_size: usize, lock: L) -> Result<Self, InitError> {
        let region = source
            .acquire(initial_size.max(MIN_POOL_SIZE))
            .ok_or(InitError::TooSmall)?;
        let (inner, _) = Tlsf::new(region, lock)?;
        Ok(Self { source, inner })
    }

    /// Allocate `size` bytes, growing the pool through the source if the
    /// current areas can't satisfy the request.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if let Some(p) = self.inner.allocate(size) {
            return Some(p);
        }
        let region = self.source.acquire(size + MIN_POOL_SIZE)?;
        self.inner.add_area(region).ok()?;
        self.inner.allocate(size)
    }

    /// Free a block previously returned by [`Self::allocate`].
    ///
    /// # Safety
    ///
    /// `ptr` must have come from this pool and must not have already been
    /// freed.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>) {
        self.inner.deallocate(ptr);
    }

    /// Bytes currently handed out to the caller.
    pub fn used_size(&self) -> usize {
        self.inner.used_size()
    }

    /// Bytes contributed by the largest single pool grown so far, at its
    /// high-water mark.
    pub fn max_size(&self) -> usize {
        self.inner.max_size()
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::lock::NullLock;
    use std::alloc::{alloc, Layout};
    use std::vec::Vec;

    struct VecSource;

    unsafe impl PoolSource for VecSource {
        fn acquire(&mut self, min_size: usize) -> Option<&'static mut [MaybeUninit<u8>]> {
            let size = min_size.next_power_of_two().max(4096);
            let layout = Layout::from_size_align(size, crate::tlsf::GRANULARITY).ok()?;
            let ptr = unsafe { alloc(layout) };
            if ptr.is_null() {
                return None;
            }
            // Leaked deliberately: the pool keeps using this region for the
            // rest of its life, same contract `rlsf`'s own `unix::Source`
            // makes via `mmap` without ever `munmap`-ing.
            Some(unsafe { core::slice::from_raw_parts_mut(ptr as *mut MaybeUninit<u8>, size) })
        }
    }

    #[test]
    fn grows_past_its_initial_region() {
        let mut pool = FlexTlsf::new(VecSource, 4096, NullLock).unwrap();
        let mut allocations = Vec::new();
        for _ in 0..64 {
            allocations.push(pool.allocate(1024).expect("source should supply more memory"));
        }
        for p in allocations {
            unsafe { pool.deallocate(p) };
        }
    }
}

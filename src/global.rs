//! A `#[global_allocator]` adapter backed by a fixed-size static array.
//!
//! Grounded on `rlsf`'s `GlobalTlsf` (`crates/rlsf/src/global.rs`,
//! `global/unix.rs`): a lock-guarded pool exposed through `GlobalAlloc`.
//! Two things differ from that design. First, this crate's core [`Tlsf`]
//! takes byte sizes rather than `Layout`s, so [`TlsfGlobal`] can only back
//! allocations whose alignment doesn't exceed [`GRANULARITY`] — fine for
//! ordinary `Box`/`Vec` usage, not for explicitly over-aligned types.
//! Second, `rlsf`'s `Init` trait lets its pool be const-constructed in one
//! shot; this crate's [`Tlsf::new`] validates the backing buffer and can
//! fail, so `TlsfGlobal` defers construction to the first allocation
//! instead, guarded by the same lock that serializes every other access.
use core::alloc::{GlobalAlloc, Layout};
use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::ptr;

use crate::lock::{NullLock, RawPoolLock, SpinLock};
use crate::tlsf::{Tlsf, GRANULARITY};

/// A `#[global_allocator]`-compatible pool of `N` bytes, carried inline in
/// the adapter itself.
///
/// Must be used as a `static` (or otherwise never moved after its first
/// allocation): the pool it lazily builds borrows the backing array by
/// `'static` reference derived from `self`'s address.
pub struct TlsfGlobal<const N: usize> {
    heap: UnsafeCell<[MaybeUninit<u8>; N]>,
    lock: SpinLock,
    pool: UnsafeCell<Option<Tlsf<'static, NullLock>>>,
}

// Safety: every access to `heap` and `pool` happens inside `with_pool`,
// which serializes callers through `lock` before touching either cell.
unsafe impl<const N: usize> Sync for TlsfGlobal<N> {}

impl<const N: usize> TlsfGlobal<N> {
    /// Create an unpopulated global pool. The backing array is left
    /// uninitialized and isn't carved into TLSF blocks until the first
    /// allocation request.
    pub const fn new() -> Self {
        Self {
            heap: UnsafeCell::new([MaybeUninit::uninit(); N]),
            lock: SpinLock::new(),
            pool: UnsafeCell::new(None),
        }
    }

    /// Run `f` with exclusive access to the lazily-initialized inner pool.
    ///
    /// # Safety
    ///
    /// `self` must be `'static` (a `static` item satisfies this trivially);
    /// the raw-pointer reborrow of `heap` below assumes so.
    unsafe fn with_pool<R>(&self, f: impl FnOnce(&mut Tlsf<'static, NullLock>) -> R) -> R {
        self.lock.lock();
        let pool_slot = &mut *self.pool.get();
        if pool_slot.is_none() {
            let heap: &'static mut [MaybeUninit<u8>; N] = &mut *self.heap.get();
            match Tlsf::new(heap.as_mut_slice(), NullLock) {
                Ok((tlsf, _)) => *pool_slot = Some(tlsf),
                Err(e) => {
                    self.lock.unlock();
                    panic!("TlsfGlobal's backing array is unusable as a pool: {:?}", e);
                }
            }
        }
        let result = f(pool_slot.as_mut().unwrap_unchecked());
        self.lock.unlock();
        result
    }
}

impl<const N: usize> Default for TlsfGlobal<N> {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<const N: usize> GlobalAlloc for TlsfGlobal<N> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > GRANULARITY {
            return ptr::null_mut();
        }
        self.with_pool(|p| p.allocate(layout.size()).map_or(ptr::null_mut(), |p| p.as_ptr()))
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.with_pool(|p| p.free_raw(ptr));
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() > GRANULARITY {
            return ptr::null_mut();
        }
        self.with_pool(|p| p.callocate(1, layout.size()).map_or(ptr::null_mut(), |p| p.as_ptr()))
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > GRANULARITY {
            return core::ptr::null_mut();
        }
        self.with_pool(|p| p.realloc_raw(ptr, new_size))
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use std::vec::Vec;

    #[test]
    fn allocates_and_frees_through_the_global_alloc_trait() {
        let pool: TlsfGlobal<65536> = TlsfGlobal::new();
        unsafe {
            let layout = Layout::from_size_align(128, 8).unwrap();
            let p = pool.alloc(layout);
            assert!(!p.is_null());
            p.write_bytes(0x11, 128);
            pool.dealloc(p, layout);
        }
    }

    #[test]
    fn survives_many_sequential_allocations() {
        let pool: TlsfGlobal<1048576> = TlsfGlobal::new();
        let mut live = Vec::new();
        let layout = Layout::new::<u64>();
        for i in 0..256u64 {
            unsafe {
                let p = pool.alloc(layout) as *mut u64;
                assert!(!p.is_null());
                p.write(i);
                live.push(p);
            }
        }
        for p in live {
            unsafe { pool.dealloc(p as *mut u8, layout) };
        }
    }
}

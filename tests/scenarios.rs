//! End-to-end scenarios exercising only the public API, as opposed to the
//! crate's own `src/tlsf/tests.rs` unit tests, which reach into
//! crate-private helpers to check internal layout.
use core::mem::MaybeUninit;
use std::alloc::{alloc, dealloc, Layout};

use tlsf_pool::lock::NullLock;
use tlsf_pool::{Tlsf, GRANULARITY};

struct Arena {
    ptr: *mut u8,
    layout: Layout,
}

impl Arena {
    fn new(size: usize) -> Self {
        let layout = Layout::from_size_align(size, GRANULARITY).unwrap();
        let ptr = unsafe { alloc(layout) };
        assert!(!ptr.is_null());
        Self { ptr, layout }
    }

    fn as_slice(&mut self) -> &mut [MaybeUninit<u8>] {
        unsafe { core::slice::from_raw_parts_mut(self.ptr as *mut MaybeUninit<u8>, self.layout.size()) }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr, self.layout) };
    }
}

#[test]
fn tiny_pool_single_alloc_free() {
    let mut arena = Arena::new(4096);
    let (mut pool, _usable) = Tlsf::new(arena.as_slice(), NullLock).unwrap();

    let a = pool.allocate(16).unwrap();
    assert_eq!(a.as_ptr() as usize % 8, 0);
    let used_after_first = pool.used_size();
    assert!(used_after_first > 16);

    unsafe { pool.deallocate(a) };
    assert_eq!(pool.used_size(), 0);

    let b = pool.allocate(16).unwrap();
    assert_eq!(b, a, "the freed block should be handed straight back out");
    unsafe { pool.deallocate(b) };
}

#[test]
fn split_and_merge_restores_the_original_free_block() {
    let mut arena = Arena::new(4096);
    let (mut pool, usable) = Tlsf::new(arena.as_slice(), NullLock).unwrap();

    let a = pool.allocate(64).unwrap();
    let b = pool.allocate(64).unwrap();
    unsafe {
        pool.deallocate(a);
        pool.deallocate(b);
    }
    assert_eq!(pool.used_size(), 0);

    // If the two splits didn't coalesce back together, an allocation request
    // for most of the original pool would fail.
    let whole = pool.allocate(usable - 4 * GRANULARITY).unwrap();
    unsafe { pool.deallocate(whole) };
}

#[test]
fn realloc_grows_into_a_free_successor_in_place() {
    let mut arena = Arena::new(4096);
    let (mut pool, _) = Tlsf::new(arena.as_slice(), NullLock).unwrap();

    let p = pool.allocate(64).unwrap();
    let q = pool.allocate(64).unwrap();
    unsafe { pool.deallocate(q) };

    let r = unsafe { pool.reallocate(p, 120) }.unwrap();
    assert_eq!(r, p);
    unsafe { pool.deallocate(r) };
}

#[test]
fn realloc_falls_back_to_copy_when_the_successor_is_pinned() {
    let mut arena = Arena::new(4096);
    let (mut pool, _) = Tlsf::new(arena.as_slice(), NullLock).unwrap();

    let a = pool.allocate(64).unwrap();
    let b = pool.allocate(64).unwrap();
    let c = pool.allocate(64).unwrap();

    unsafe {
        a.as_ptr().write_bytes(0x5A, 64);
    }

    let used_before = pool.used_size();
    let grown = unsafe { pool.reallocate(a, 512) }.unwrap();
    assert_ne!(grown, a, "a's successor (b) is still live, so growth in place is impossible");
    assert_eq!(unsafe { *grown.as_ptr() }, 0x5A);

    // a is gone, replaced by the larger `grown` allocation; c is untouched.
    let used_after = pool.used_size();
    assert!(used_after > used_before);

    unsafe {
        pool.deallocate(grown);
        pool.deallocate(b);
        pool.deallocate(c);
    }
    assert_eq!(pool.used_size(), 0);
}

#[test]
fn adding_a_discontiguous_area_keeps_two_areas() {
    let mut arena1 = Arena::new(4096);
    let mut arena2 = Arena::new(4096);
    let (mut pool, usable1) = Tlsf::new(arena1.as_slice(), NullLock).unwrap();
    let usable2 = pool.add_area(arena2.as_slice()).unwrap();

    // Neither area alone can satisfy a request bigger than itself, but each
    // can satisfy a request sized to fit only in it.
    let a = pool.allocate(usable1 - 4 * GRANULARITY).unwrap();
    let b = pool.allocate(usable2 - 4 * GRANULARITY).unwrap();
    unsafe {
        pool.deallocate(a);
        pool.deallocate(b);
    }
}

#[test]
fn adding_a_contiguous_area_merges_into_one_free_run() {
    let mut arena = Arena::new(8192);
    let slice = arena.as_slice();
    let (first_half, second_half) = slice.split_at_mut(4096);
    let (mut pool, usable1) = Tlsf::new(first_half, NullLock).unwrap();
    let usable2 = pool.add_area(second_half).unwrap();

    // A single allocation spanning (most of) both halves only succeeds if
    // the two areas coalesced into one free block.
    let spanning = pool.allocate(usable1 + usable2 - 8 * GRANULARITY).unwrap();
    unsafe { pool.deallocate(spanning) };
}

#[test]
fn max_size_tracks_the_high_water_mark_not_the_current_usage() {
    let mut arena = Arena::new(4096);
    let (mut pool, _) = Tlsf::new(arena.as_slice(), NullLock).unwrap();

    let a = pool.allocate(256).unwrap();
    let high_water = pool.max_size();
    unsafe { pool.deallocate(a) };

    assert_eq!(pool.used_size(), 0);
    assert_eq!(pool.max_size(), high_water, "max_size must never decrease on free");
}

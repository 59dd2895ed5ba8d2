//! A Two-Level Segregated Fit (TLSF) dynamic memory allocator over one or
//! more caller-supplied memory regions.
//!
//! TLSF gives `malloc`/`free`/`realloc` in O(1) time regardless of heap
//! occupancy, at the cost of a fixed, small amount of internal
//! fragmentation — the usual tradeoff for embedded and real-time systems
//! where a GC pause or an unbounded best-fit search is not an option. This
//! crate does not own any memory itself: you give it a `&mut [MaybeUninit<u8>]`
//! (a `static`, a stack buffer, a slab carved out of another allocator) and
//! it manages blocks inside it.
//!
//! ```
//! use core::mem::MaybeUninit;
//! use tlsf_pool::{Tlsf, lock::NullLock};
//!
//! let mut heap = [MaybeUninit::uninit(); 4096];
//! let (mut pool, usable) = Tlsf::new(&mut heap, NullLock).unwrap();
//! assert!(usable > 0);
//!
//! let p = pool.allocate(128).unwrap();
//! unsafe {
//!     p.as_ptr().write_bytes(0, 128);
//!     pool.deallocate(p);
//! }
//! ```
//!
//! Multiple, possibly discontiguous, regions can be added after the fact
//! with [`Tlsf::add_area`] — useful when memory becomes available in
//! stages (e.g. heap growth, hot-pluggable memory banks).
//!
//! # Locking
//!
//! [`Tlsf`] is generic over a [`lock::RawPoolLock`] so the pool can be
//! shared across preemptible contexts without this crate hard-coding a
//! particular RTOS's mutex. [`lock::NullLock`] is appropriate for
//! single-threaded or externally-synchronized use; the `spin` feature
//! (enabled by default) adds [`lock::SpinLock`] for a working
//! multi-threaded default.
//!
//! # Cargo features
//!
//! - `std` — adds trait impls bridging to `std::alloc` where useful; the
//!   core allocator is `no_std` regardless.
//! - `spin` (default) — enables [`lock::SpinLock`].
//! - `global` — enables [`global::TlsfGlobal`], a `#[global_allocator]`
//!   adapter backed by a fixed-size static array.
//! - `flex` — enables [`flex::FlexTlsf`], which grows its pool on demand
//!   from a caller-provided memory source instead of requiring every byte
//!   up front.
#![no_std]
#![cfg_attr(feature = "doc_cfg", feature(doc_cfg))]

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod error;
pub mod int;
pub mod lock;
pub mod tlsf;

#[cfg(feature = "flex")]
#[cfg_attr(feature = "doc_cfg", doc(cfg(feature = "flex")))]
pub mod flex;

#[cfg(feature = "global")]
#[cfg_attr(feature = "doc_cfg", doc(cfg(feature = "global")))]
pub mod global;

pub use self::tlsf::{Tlsf, GRANULARITY, MIN_POOL_SIZE};

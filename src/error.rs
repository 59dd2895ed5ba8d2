//! Narrow, `no_std`-friendly error types.
//!
//! The allocator core reports failure the way `tlsf.c` does: a handful of
//! named reasons, never an unwind. There's no `thiserror`/`anyhow` here
//! because those pull in formatting machinery this crate has no use for.

/// Why [`crate::Tlsf::new`](crate::tlsf::Tlsf::new) refused a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    /// The buffer is smaller than
    /// [`MIN_POOL_SIZE`](crate::tlsf::MIN_POOL_SIZE). Unlike `tlsf.c`'s
    /// embedded `tlsf_t`, the control block here is a plain Rust struct
    /// that doesn't live inside the buffer, so the threshold is just
    /// "enough room for one empty area", not a control-block size.
    TooSmall,
    /// The buffer's base address is not aligned to a machine word.
    Misaligned,
}

/// Why [`crate::Tlsf::add_area`](crate::tlsf::Tlsf::add_area) refused a
/// region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddAreaError {
    /// The region is too small to host even an empty area (`ib` + one free
    /// block + `lb`).
    TooSmall,
    /// The region's base address is not aligned to a machine word.
    Misaligned,
}

/// The pool's sticky "last thing that went wrong" indicator (spec §6: "a
/// single optional byte-sized status indicator").
///
/// This is not an error *return* value — `allocate`/`reallocate`/`calloc`
/// already signal failure via `None`. It exists so a caller (or a debugger)
/// can distinguish ordinary exhaustion from heap corruption after the fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FailureReason {
    /// A `malloc`/`calloc`/`realloc`-equivalent call found no suitable free
    /// block.
    OomMalloc = 1,
    /// `used_size` exceeds the pool's total capacity after an operation —
    /// a corruption canary, not a normal failure mode.
    UsedSizeExceedsPool = 2,
}

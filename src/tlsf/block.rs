//! Block headers and boundary-tag primitives.
//!
//! Every block (free or used) is preceded by a [`BlockHdr`]. A block's
//! "payload size" (the value stored in [`BlockHdr::size`], masked) never
//! includes the header itself — it is the number of bytes between the end
//! of this header and the start of the next block's header. This matches
//! `tlsf.c`'s convention (`b->size` is the size of `b->ptr.buffer`, not of
//! `b` itself) and is why [`next_phys`] adds [`HEADER_OVERHEAD`] before
//! adding the payload size.
use core::{mem, ptr::NonNull};

/// Bit 0 of [`BlockHdr::size`]: the block is free.
pub(crate) const FREE_BIT: usize = 0b01;
/// Bit 1 of [`BlockHdr::size`]: the physically preceding block is free.
pub(crate) const PREV_FREE_BIT: usize = 0b10;
/// The bits of [`BlockHdr::size`] that encode the payload size.
pub(crate) const SIZE_MASK: usize = !0b11;

/// The allocator's granularity: every block is a multiple of this many bytes,
/// and every payload pointer is aligned to it. Spec §3's `BLOCK_ALIGN`.
pub const GRANULARITY: usize = mem::size_of::<usize>() * 2;

/// The constant overhead of a block header, in bytes. Spec's `BHDR_OVERHEAD`.
pub(crate) const HEADER_OVERHEAD: usize = mem::size_of::<BlockHdr>();

/// The smallest payload a block can have: it must be able to host the two
/// free-list pointers ([`FreeBlockHdr::prev_free`], [`FreeBlockHdr::next_free`])
/// while free. Spec's `MIN_BLOCK_SIZE`.
pub(crate) const MIN_BLOCK_SIZE: usize = 2 * mem::size_of::<usize>();

/// The smallest amount by which a block's unused remainder can be split off
/// into its own free block: header plus one minimum-sized payload.
pub(crate) const MIN_SPLIT_REMAINDER: usize = HEADER_OVERHEAD + MIN_BLOCK_SIZE;

const _: () = assert!(HEADER_OVERHEAD == GRANULARITY, "header overhead must equal one granule");

/// Round `x` up to the nearest multiple of [`GRANULARITY`].
#[inline]
pub(crate) const fn round_up_granularity(x: usize) -> usize {
    (x + GRANULARITY - 1) & !(GRANULARITY - 1)
}

/// The common prefix of every block, free or used.
///
/// `prev_phys` is meaningful only when this block's [`PREV_FREE_BIT`] is
/// set — spec §3: "meaningful only when the previous block is free". It
/// must still always hold a valid `Option<NonNull<_>>` bit pattern (`None`
/// when not meaningful), since partially-initialized `Option<NonNull<_>>`
/// is not a thing Rust allows us to leave lying around.
#[repr(C)]
pub(crate) struct BlockHdr {
    pub prev_phys: Option<NonNull<BlockHdr>>,
    pub size: usize,
}

/// The header of a free block: [`BlockHdr`] plus the doubly-linked free-list
/// pointers that overlay what would be payload in a used block.
#[repr(C)]
pub(crate) struct FreeBlockHdr {
    pub common: BlockHdr,
    pub prev_free: Option<NonNull<FreeBlockHdr>>,
    pub next_free: Option<NonNull<FreeBlockHdr>>,
}

const _: () = assert!(
    mem::size_of::<FreeBlockHdr>() - mem::size_of::<BlockHdr>() == MIN_BLOCK_SIZE,
    "free-list pointers must exactly fill MIN_BLOCK_SIZE"
);

#[inline]
pub(crate) fn block_addr(b: NonNull<BlockHdr>) -> usize {
    b.as_ptr() as usize
}

#[inline]
pub(crate) unsafe fn is_free(b: NonNull<BlockHdr>) -> bool {
    (*b.as_ptr()).size & FREE_BIT != 0
}

#[inline]
pub(crate) unsafe fn is_prev_free(b: NonNull<BlockHdr>) -> bool {
    (*b.as_ptr()).size & PREV_FREE_BIT != 0
}

#[inline]
pub(crate) unsafe fn payload_size(b: NonNull<BlockHdr>) -> usize {
    (*b.as_ptr()).size & SIZE_MASK
}

/// Get the physically next block.
///
/// # Safety
///
/// `b`'s size field must be valid, and the block at the computed address
/// must exist (guaranteed for any non-sentinel block by the area's layout;
/// calling this on a sentinel reads past the area, which callers must never
/// do — sentinels are recognized by their zero payload size beforehand).
#[inline]
pub(crate) unsafe fn next_phys(b: NonNull<BlockHdr>) -> NonNull<BlockHdr> {
    NonNull::new_unchecked((block_addr(b) + HEADER_OVERHEAD + payload_size(b)) as *mut BlockHdr)
}

/// Get the block header at the payload pointer `ptr` returned by a previous
/// allocation.
///
/// # Safety
///
/// `ptr` must be a payload pointer previously returned by this pool.
#[inline]
pub(crate) unsafe fn block_from_payload(ptr: NonNull<u8>) -> NonNull<BlockHdr> {
    NonNull::new_unchecked((ptr.as_ptr() as usize - HEADER_OVERHEAD) as *mut BlockHdr)
}

/// Get the payload pointer of a block.
#[inline]
pub(crate) fn payload_ptr(b: NonNull<BlockHdr>) -> NonNull<u8> {
    unsafe { NonNull::new_unchecked((block_addr(b) + HEADER_OVERHEAD) as *mut u8) }
}

//! Pool & area manager: turning a raw byte region into a bounded run of
//! blocks terminated by a sentinel, and merging new regions into existing
//! ones when they turn out to be physically adjacent.
//!
//! Ports `tlsf.c`'s `process_area`/`add_new_area`. The two adjacency checks
//! in [`add_area`] are the same pointer-arithmetic conditions as the C
//! original; only the pointer types changed.
use core::mem::MaybeUninit;
use core::ptr::NonNull;

use super::block::{
    block_addr, next_phys, payload_size, round_up_granularity, BlockHdr, GRANULARITY, HEADER_OVERHEAD,
    MIN_BLOCK_SIZE, PREV_FREE_BIT,
};
use super::Tlsf;
use crate::error::AddAreaError;
use crate::lock::RawPoolLock;

/// Lives in the payload of an area's `ib` block. Tracks where the area ends
/// (its sentinel) and chains areas together so [`add_area`] can walk them
/// looking for adjacency.
pub(crate) struct AreaInfo {
    pub end: NonNull<BlockHdr>,
    pub next: Option<NonNull<AreaInfo>>,
}

#[inline]
fn area_info_of(ib: NonNull<BlockHdr>) -> NonNull<AreaInfo> {
    unsafe { NonNull::new_unchecked((block_addr(ib) + HEADER_OVERHEAD) as *mut AreaInfo) }
}

#[inline]
fn ib_of_area_info(ai: NonNull<AreaInfo>) -> NonNull<BlockHdr> {
    unsafe { NonNull::new_unchecked((ai.as_ptr() as usize - HEADER_OVERHEAD) as *mut BlockHdr) }
}

/// Lay out a fresh region as `ib` (a tiny used block carrying the area's
/// bookkeeping), `b` (one large block spanning the rest, marked used — the
/// caller immediately frees it), and `lb` (a zero-size sentinel so
/// [`next_phys`] is always safe to call without an explicit end check).
///
/// `lb`'s `PREV_FREE` bit is set here even though `b` is still marked used
/// at this exact moment: `b` is freed by the caller immediately after this
/// returns, so this just pre-states the bit rather than leaving an instant
/// where the layout is inconsistent.
fn process_area(region: &mut [MaybeUninit<u8>]) -> Result<(NonNull<BlockHdr>, NonNull<BlockHdr>, NonNull<BlockHdr>), AddAreaError> {
    let base = region.as_mut_ptr() as usize;
    if base % core::mem::align_of::<usize>() != 0 {
        return Err(AddAreaError::Misaligned);
    }

    let ib_payload = round_up_granularity(core::mem::size_of::<AreaInfo>()).max(MIN_BLOCK_SIZE);
    let min_len = 3 * HEADER_OVERHEAD + ib_payload + MIN_BLOCK_SIZE;
    if region.len() < min_len {
        return Err(AddAreaError::TooSmall);
    }

    // Round down, not up: we must not claim bytes past the caller's region.
    let raw_b_payload = region.len() - 3 * HEADER_OVERHEAD - ib_payload;
    let b_payload = raw_b_payload - (raw_b_payload % GRANULARITY);

    let ib = unsafe { NonNull::new_unchecked(base as *mut BlockHdr) };
    let b = unsafe { next_phys_from(ib, ib_payload) };
    let lb = unsafe { next_phys_from(b, b_payload) };

    unsafe {
        (*ib.as_ptr()).prev_phys = None;
        (*ib.as_ptr()).size = ib_payload; // used, prev unknown/irrelevant (area start)

        (*b.as_ptr()).prev_phys = None; // meaningless: ib (prev) is used
        (*b.as_ptr()).size = b_payload; // used for now; caller frees it right after

        (*lb.as_ptr()).prev_phys = Some(b);
        (*lb.as_ptr()).size = PREV_FREE_BIT; // zero payload, used, prev (b) will be free
    }

    Ok((ib, b, lb))
}

#[inline]
unsafe fn next_phys_from(hdr: NonNull<BlockHdr>, payload: usize) -> NonNull<BlockHdr> {
    NonNull::new_unchecked((block_addr(hdr) + HEADER_OVERHEAD + payload) as *mut BlockHdr)
}

pub(crate) fn add_area<'pool, L: RawPoolLock>(
    tlsf: &mut Tlsf<'pool, L>,
    region: &'pool mut [MaybeUninit<u8>],
) -> Result<usize, AddAreaError> {
    let (mut ib0, mut b0, mut lb0) = process_area(region)?;

    let mut prev: Option<NonNull<AreaInfo>> = None;
    let mut cur = tlsf.area_head;
    while let Some(ai) = cur {
        let ib1 = ib_of_area_info(ai);
        let b1 = unsafe { next_phys(ib1) };
        let lb1 = unsafe { (*ai.as_ptr()).end };
        let next_ai = unsafe { (*ai.as_ptr()).next };

        if block_addr(ib1) == block_addr(lb0) + HEADER_OVERHEAD {
            // The new area's sentinel is immediately followed by an
            // existing area's `ib`: they're one contiguous region. Fold
            // `ib1` (now redundant bookkeeping) and the gap into `b0`, and
            // splice `b1` onward as what comes after it.
            unlink_area(tlsf, prev, ai);
            unsafe {
                let prev_free_bit = (*b0.as_ptr()).size & PREV_FREE_BIT;
                let combined = payload_size(b0) + payload_size(ib1) + 2 * HEADER_OVERHEAD;
                (*b0.as_ptr()).size = combined | prev_free_bit;
                (*b1.as_ptr()).prev_phys = Some(b0);
            }
            lb0 = lb1;
            cur = next_ai;
            continue;
        }

        if block_addr(lb1) + HEADER_OVERHEAD == block_addr(ib0) {
            // Symmetric case: an existing area's sentinel is immediately
            // followed by the new area's `ib`. Extend `lb1` to absorb the
            // gap and `ib0`'s bookkeeping, then keep merging forward from
            // there as if it were our own `b0`/`ib0`.
            unlink_area(tlsf, prev, ai);
            unsafe {
                let prev_free_bit = (*lb1.as_ptr()).size & PREV_FREE_BIT;
                let combined = payload_size(b0) + payload_size(ib0) + 2 * HEADER_OVERHEAD;
                (*lb1.as_ptr()).size = combined | prev_free_bit;
                let after = next_phys(lb1);
                (*after.as_ptr()).prev_phys = Some(lb1);
            }
            b0 = lb1;
            ib0 = ib1;
            cur = next_ai;
            continue;
        }

        prev = cur;
        cur = next_ai;
    }

    let ai = area_info_of(ib0);
    unsafe {
        (*ai.as_ptr()).next = tlsf.area_head;
        (*ai.as_ptr()).end = lb0;
    }
    tlsf.area_head = Some(ai);

    // `b0` is still marked used here and was never counted via `add_used`,
    // so `free_block`'s unconditional `remove_used(orig_payload)` would
    // underflow `used_size` (it's 0 at first-time init). Pre-credit it by
    // exactly the amount `free_block` is about to subtract, mirroring
    // tlsf.c's post-init fixup (`tlsf->used_size = mem_pool_size -
    // (b->size & BLOCK_SIZE)`) without touching `max_size`: this is area
    // bring-up bookkeeping, not caller-visible usage.
    tlsf.used_size += unsafe { payload_size(b0) } + HEADER_OVERHEAD;
    Ok(unsafe { tlsf.free_block(b0) })
}

fn unlink_area<'pool, L: RawPoolLock>(tlsf: &mut Tlsf<'pool, L>, prev: Option<NonNull<AreaInfo>>, node: NonNull<AreaInfo>) {
    let next = unsafe { (*node.as_ptr()).next };
    match prev {
        Some(p) => unsafe { (*p.as_ptr()).next = next },
        None => tlsf.area_head = next,
    }
}

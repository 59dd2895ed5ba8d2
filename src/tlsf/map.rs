//! The size-class mapper.
//!
//! Pure functions from a byte size to a `(first_level, second_level)`
//! coordinate in the free-list matrix. Fixed-constant port of `tlsf.c`'s
//! `MAPPING_INSERT`/`MAPPING_SEARCH` macros — this crate does not make
//! `FLI_OFFSET`/`MAX_FLI`/`MAX_LOG2_SLI` generic parameters the way
//! `rlsf::tlsf::map::MapParams` does, because the values this pool uses are
//! fixed by design, not chosen per instantiation.

/// `log2` of the size below which blocks are "small" and get a flat,
/// non-logarithmic set of second-level classes.
pub(crate) const FLI_OFFSET: u32 = 6;
/// Highest first-level index handled, before subtracting [`FLI_OFFSET`].
pub(crate) const MAX_FLI: u32 = 13;
/// `log2` of the number of second-level classes per first-level class.
pub(crate) const MAX_LOG2_SLI: u32 = 5;
/// Number of second-level classes per first-level class (`2^MAX_LOG2_SLI`).
pub(crate) const MAX_SLI: usize = 1 << MAX_LOG2_SLI;
/// Number of first-level rows actually stored (`MAX_FLI - FLI_OFFSET`).
pub(crate) const REAL_FLI: usize = (MAX_FLI - FLI_OFFSET) as usize;
/// Sizes below this use a flat division into [`MAX_SLI`] equal-width bins
/// instead of a logarithmic split.
pub(crate) const SMALL_BLOCK: usize = 128;

#[inline]
fn msb(r: usize) -> u32 {
    usize::BITS - 1 - r.leading_zeros()
}

/// Classify a block of known size `r` into the free-list class that owns
/// it. Used when inserting a free block: every block in the class is
/// guaranteed usable for `r`, so no rounding is needed, only division.
///
/// `r` may exceed the largest size [`map_search`] will ever round a request
/// into (the fixed `REAL_FLI` table has no row for it) — a pool's initial
/// free block commonly does, for any pool bigger than a few dozen KiB. Such
/// oversized blocks are clamped into the top class, `matrix[REAL_FLI -
/// 1][MAX_SLI - 1]`, the standard TLSF "largest class catches everything
/// bigger" rule, rather than indexing the bitmap/matrix out of bounds.
pub(crate) fn map_insert(r: usize) -> (usize, usize) {
    debug_assert!(r > 0);
    if r < SMALL_BLOCK {
        (0, r / (SMALL_BLOCK / MAX_SLI))
    } else {
        let msb_val = msb(r);
        let sl = (r >> (msb_val - MAX_LOG2_SLI)) - MAX_SLI;
        match msb_val.checked_sub(FLI_OFFSET) {
            Some(fl) if (fl as usize) < REAL_FLI => (fl as usize, sl),
            _ => (REAL_FLI - 1, MAX_SLI - 1),
        }
    }
}

/// Round a requested size `r` up to the next class boundary and classify
/// it, so that *every* block in the resulting class (and not just some of
/// them) is guaranteed big enough. Returns `(r', fl, sl)` where `r'` is the
/// rounded-up size, or `None` if `r` exceeds what this pool's fixed class
/// table can ever describe.
pub(crate) fn map_search(r: usize) -> Option<(usize, usize, usize)> {
    if r < SMALL_BLOCK {
        let sl = r / (SMALL_BLOCK / MAX_SLI);
        return Some((r, 0, sl));
    }
    let t = (1usize << (msb(r) - MAX_LOG2_SLI)).checked_sub(1)?;
    let r2 = r.checked_add(t)? & !t;
    let fl = msb(r2);
    let sl = (r2 >> (fl - MAX_LOG2_SLI)) - MAX_SLI;
    let fl = fl.checked_sub(FLI_OFFSET)? as usize;
    if fl >= REAL_FLI {
        return None;
    }
    Some((r2, fl, sl))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_blocks_use_flat_division() {
        assert_eq!(map_insert(1), (0, 0));
        assert_eq!(map_insert(4), (0, 1));
        assert_eq!(map_insert(127), map_insert(124));
    }

    #[test]
    fn search_never_returns_a_class_smaller_than_requested() {
        for r in (SMALL_BLOCK..1 << 16).step_by(17) {
            let (r2, fl, sl) = map_search(r).unwrap();
            assert!(r2 >= r);
            assert_eq!(map_insert(r2), (fl, sl));
        }
    }

    #[test]
    fn insert_and_search_agree_at_exact_class_boundaries() {
        for fl in 0..REAL_FLI {
            for sl in 0..MAX_SLI {
                let msb_val = fl as u32 + FLI_OFFSET;
                let r = (1usize << msb_val) + (sl << (msb_val - MAX_LOG2_SLI));
                if r < SMALL_BLOCK {
                    continue;
                }
                assert_eq!(map_insert(r), (fl, sl));
            }
        }
    }
}

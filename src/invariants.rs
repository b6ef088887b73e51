//! Debug assertion macros for the slab/cursor invariants documented in
//! `SPEC_FULL.md` section 3.
//!
//! Only active in debug builds (`#[cfg(debug_assertions)]`), so there is
//! zero overhead in release builds. Mirrors the `INV-*` macro style used for
//! the ring buffer invariants this crate's engine is not otherwise related
//! to, but whose documentation discipline is worth keeping.

// =============================================================================
// I1: Contiguous slab range
// =============================================================================

/// Assert that `head_slab <= tail_slab` and the range is non-empty.
///
/// **Invariant**: `I1`: the on-disk slab ids form a contiguous non-empty
/// range `[head_slab, tail_slab]`.
macro_rules! debug_assert_contiguous_slab_range {
    ($head:expr, $tail:expr) => {
        debug_assert!(
            $head <= $tail,
            "I1 violated: head_slab {} > tail_slab {}",
            $head,
            $tail
        )
    };
}

// =============================================================================
// I2: Cursor slab within range
// =============================================================================

/// Assert that the cursor's slab id is within `[head_slab, tail_slab]`.
///
/// **Invariant**: `I2`.
macro_rules! debug_assert_cursor_in_range {
    ($cursor_slab:expr, $head:expr, $tail:expr) => {
        debug_assert!(
            $cursor_slab >= $head && $cursor_slab <= $tail,
            "I2 violated: cursor slab {} outside [{}, {}]",
            $cursor_slab,
            $head,
            $tail
        )
    };
}

// =============================================================================
// I4: Bounded live slab count
// =============================================================================

/// Assert that the number of live slabs never exceeds the configured bound.
///
/// **Invariant**: `I4`: `(tail_slab - head_slab + 1) <= max_number_of_slabs`.
macro_rules! debug_assert_bounded_slab_count {
    ($live_count:expr, $max:expr) => {
        debug_assert!(
            $live_count <= $max,
            "I4 violated: live slab count {} exceeds max {}",
            $live_count,
            $max
        )
    };
}

// =============================================================================
// I5: peek/poll agreement
// =============================================================================

/// Assert that a value just returned by `peek` matches what `poll` returns
/// next, when nothing else has mutated the queue in between.
///
/// **Invariant**: `I5`.
macro_rules! debug_assert_peek_poll_agree {
    ($peeked:expr, $polled:expr) => {
        debug_assert!(
            $peeked == $polled,
            "I5 violated: peek and the following poll disagreed"
        )
    };
}

pub(crate) use debug_assert_bounded_slab_count;
pub(crate) use debug_assert_contiguous_slab_range;
pub(crate) use debug_assert_cursor_in_range;
pub(crate) use debug_assert_peek_poll_agree;

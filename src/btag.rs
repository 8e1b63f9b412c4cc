//! ## bTag allocator
//!
//! The bTag is the 8-bit transaction identifier carried in every USBTMC
//! bulk header, paired with its bitwise complement for validation. This
//! module hands out monotonic tags, skipping zero, and remembers the most
//! recent tag issued on each direction so the control procedures can
//! address the right transaction when they abort one.
//!

use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy)]
struct BTagState {
    next: u8,
    last_out: u8,
    last_in: u8,
}

/// Per-session bTag allocator.
///
/// `next()` always returns a value in `1..=255` and never produces zero;
/// the counter wraps from 255 back to 1.
#[derive(Debug, Clone)]
pub struct BTag(Arc<Mutex<BTagState>>);

impl BTag {
    /// Return a fresh allocator with the initial tag set to 1.
    pub fn new() -> BTag {
        BTag(Arc::new(Mutex::new(BTagState {
            next: 1,
            last_out: 0,
            last_in: 0,
        })))
    }

    /// Allocate the next tag for an OUT bulk transfer (a `DEV_DEP_MSG_OUT`
    /// write, or the OUT stage of a `REQUEST_DEV_DEP_MSG_IN`). Advances the
    /// counter and records the tag as `last_out`.
    pub fn next_out(&self) -> u8 {
        let mut state = self.0.lock().unwrap();
        let tag = state.next;
        state.next = if tag == 255 { 1 } else { tag + 1 };
        state.last_out = tag;
        tag
    }

    /// Record the bTag observed on a completed IN transfer, for use as the
    /// abort wValue if that transfer later needs to be aborted.
    pub fn record_in(&self, tag: u8) {
        self.0.lock().unwrap().last_in = tag;
    }

    /// The most recently issued OUT-direction tag.
    pub fn last_out(&self) -> u8 {
        self.0.lock().unwrap().last_out
    }

    /// The most recently observed IN-direction tag.
    pub fn last_in(&self) -> u8 {
        self.0.lock().unwrap().last_in
    }
}

impl Default for BTag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_one() {
        let btag = BTag::new();
        assert_eq!(btag.next_out(), 1);
    }

    #[test]
    fn wraps_from_255_to_1_skipping_zero() {
        let btag = BTag::new();
        for expected in 1u16..=255 {
            assert_eq!(btag.next_out() as u16, expected);
        }
        assert_eq!(btag.next_out(), 1);
    }

    #[test]
    fn tracks_last_out_and_last_in_independently() {
        let btag = BTag::new();
        let t1 = btag.next_out();
        assert_eq!(btag.last_out(), t1);
        btag.record_in(t1);
        assert_eq!(btag.last_in(), t1);

        let t2 = btag.next_out();
        assert_eq!(btag.last_out(), t2);
        assert_eq!(btag.last_in(), t1);
    }
}

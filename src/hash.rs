//! Stack hashing.
//!
//! A hash is a probabilistic correlation key between the stack observed at
//! pause time and the stack of a later, independently constructed exception
//! report. Only the frames closest to the throw site participate: that is
//! where call sites actually differ, and it bounds hash computation cost.
//! Two unrelated stacks may collide; that is an accepted limitation, not a
//! correctness bug.

use crate::frame::{StackFrame, StackParser};
use std::fmt::Write;

/// Max frames (counted from the throw site) participating in a hash.
const HASH_WINDOW: usize = 10;

/// Hash an outermost-first frame list. Pure and deterministic.
pub fn hash_frames(frames: Option<&[StackFrame]>) -> Option<String> {
    let frames = frames?;
    let skip = frames.len().saturating_sub(HASH_WINDOW);

    let hash = frames[skip..].iter().fold(String::new(), |mut acc, frame| {
        let _ = write!(
            acc,
            ",{},{},{}",
            frame.function.as_deref().unwrap_or_default(),
            frame.lineno.map(|l| l.to_string()).unwrap_or_default(),
            frame.colno.map(|c| c.to_string()).unwrap_or_default(),
        );
        acc
    });

    Some(hash)
}

/// Parse a raw stack string and hash the result.
pub fn hash_from_stack(parser: &dyn StackParser, stack: Option<&str>) -> Option<String> {
    let stack = stack?;
    hash_frames(Some(&parser.parse(stack)))
}

//! Error taxonomy. Hand-rolled enum with a manual `Display` and
//! `core::error::Error` impl, matching the teacher's `BPlusTreeError` —
//! the crate is `no_std` and never reaches for an error-derive crate.
//!
//! `ContractViolation` is represented by the variants below; `Exhaustion`
//! is not an error value at all (`alloc` returns `Option<Range>`, and a
//! `None` is the "no fit" condition); `InvariantFailure` is a `debug_assert!`
//! panic from the `validate` module; `ProviderFailure` is `.expect(..)` on
//! the memory provider in `node_alloc`.

use core::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VmError {
    /// A range starting at this address is already indexed.
    DuplicateStart(u64),
    /// The new range overlaps its left neighbor.
    OverlapLeft { new_start: u64, neighbor_end: u64 },
    /// The new range overlaps its right neighbor.
    OverlapRight { new_end: u64, neighbor_start: u64 },
    /// `start >= end`, or `end <= start` for the allocator's address window.
    InvalidWindow { start: u64, end: u64 },
    /// No indexed range starts at this address.
    NotFound(u64),
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::DuplicateStart(s) => write!(f, "a range already starts at {s:#x}"),
            VmError::OverlapLeft {
                new_start,
                neighbor_end,
            } => write!(
                f,
                "range starting at {new_start:#x} overlaps the left neighbor ending at {neighbor_end:#x}"
            ),
            VmError::OverlapRight {
                new_end,
                neighbor_start,
            } => write!(
                f,
                "range ending at {new_end:#x} overlaps the right neighbor starting at {neighbor_start:#x}"
            ),
            VmError::InvalidWindow { start, end } => {
                write!(f, "invalid window [{start:#x}, {end:#x})")
            }
            VmError::NotFound(s) => write!(f, "no range starts at {s:#x}"),
        }
    }
}

impl core::error::Error for VmError {}

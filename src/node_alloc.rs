//! The memory provider: the only place this crate calls into the allocator.
//!
//! Kept in the teacher's idiom (`alloc::alloc::{alloc, dealloc, Layout}`,
//! `.expect()` on a failed allocation) but simplified from runtime
//! byte-budget blocks to fixed-size `LeafNode`/`BranchNode`/`Range`
//! allocations, since node geometry is a compile-time constant here.

use alloc::alloc::{alloc, dealloc, Layout};
use core::mem::MaybeUninit;
use core::ptr::{self, NonNull};

use crate::layout::{BranchNode, LeafNode, NodeHeader, NodeTag, MAX_ENTRIES, ORDER};
use crate::range::Range;

#[inline]
pub unsafe fn alloc_leaf() -> NonNull<LeafNode> {
    let layout = Layout::new::<LeafNode>();
    let raw = alloc(layout) as *mut LeafNode;
    let p = NonNull::new(raw).expect("memory provider: leaf node allocation failed");
    ptr::write(
        p.as_ptr(),
        LeafNode {
            hdr: NodeHeader {
                parent: None,
                ppos: 0,
                len: 0,
                tag: NodeTag::Leaf,
            },
            next: None,
            prev: None,
            ranges: [MaybeUninit::uninit(); MAX_ENTRIES],
        },
    );
    p
}

#[inline]
pub unsafe fn dealloc_leaf(p: NonNull<LeafNode>) {
    dealloc(p.as_ptr() as *mut u8, Layout::new::<LeafNode>());
}

#[inline]
pub unsafe fn alloc_branch() -> NonNull<BranchNode> {
    let layout = Layout::new::<BranchNode>();
    let raw = alloc(layout) as *mut BranchNode;
    let p = NonNull::new(raw).expect("memory provider: branch node allocation failed");
    ptr::write(
        p.as_ptr(),
        BranchNode {
            hdr: NodeHeader {
                parent: None,
                ppos: 0,
                len: 0,
                tag: NodeTag::Branch,
            },
            keys: [MaybeUninit::uninit(); MAX_ENTRIES],
            children: [MaybeUninit::uninit(); ORDER],
            suba: [0; ORDER],
        },
    );
    p
}

#[inline]
pub unsafe fn dealloc_branch(p: NonNull<BranchNode>) {
    dealloc(p.as_ptr() as *mut u8, Layout::new::<BranchNode>());
}

#[inline]
pub unsafe fn alloc_range(start: u64, end: u64) -> NonNull<Range> {
    let layout = Layout::new::<Range>();
    let raw = alloc(layout) as *mut Range;
    let p = NonNull::new(raw).expect("memory provider: range descriptor allocation failed");
    ptr::write(p.as_ptr(), Range { start, end });
    p
}

#[inline]
pub unsafe fn dealloc_range(p: NonNull<Range>) {
    dealloc(p.as_ptr() as *mut u8, Layout::new::<Range>());
}

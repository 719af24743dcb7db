//! Invariant verifier, ported in spirit from the teacher's
//! `check_invariants`/`check_invariants_detailed`. Not on the production
//! path — nothing in `vm_ops`/`insert`/`delete` calls it — but left always
//! compiled (rather than test-gated) so integration tests under `tests/`
//! can call it against an ordinary build of the crate.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::ptr::NonNull;

use crate::layout::{BranchNode, LeafNode, MAX_ENTRIES, MIN_ENTRIES_INTERNAL, MIN_ENTRIES_LEAF};
use crate::node::{self, NodeRef};
use crate::VmTree;

/// Walk the whole tree and report every invariant violation found, rather
/// than stopping at the first one — useful for debugging a failing test.
pub fn check_invariants(tree: &VmTree) -> Result<(), String> {
    let mut errors = Vec::new();
    if let Some(root) = tree.root {
        unsafe {
            walk(root, None, 0, u64::MAX, true, &mut errors);
        }
    }
    check_leaf_chain(tree, &mut errors);
    check_sorted_no_adjacency(tree, &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("\n"))
    }
}

unsafe fn walk(
    n: NodeRef,
    parent: Option<NonNull<BranchNode>>,
    lo: u64,
    hi: u64,
    is_root: bool,
    errors: &mut Vec<String>,
) {
    if n.parent() != parent {
        errors.push(format!("node's stored parent pointer does not match its actual parent"));
    }
    match n {
        NodeRef::Leaf(leaf) => {
            let len = leaf.as_ref().hdr.len as usize;
            if !is_root && len < MIN_ENTRIES_LEAF {
                errors.push(format!("leaf underflow: {len} < {MIN_ENTRIES_LEAF}"));
            }
            if len > MAX_ENTRIES {
                errors.push(format!("leaf overflow: {len} > {MAX_ENTRIES}"));
            }
            for i in 0..len {
                let r = node::leaf_get(leaf, i).as_ref();
                if r.start >= r.end {
                    errors.push(format!("empty or inverted range [{:#x},{:#x})", r.start, r.end));
                }
                if r.start < lo || r.end > hi {
                    errors.push(format!(
                        "range [{:#x},{:#x}) escapes subtree bound [{:#x},{:#x})",
                        r.start, r.end, lo, hi
                    ));
                }
            }
            let expected = augment_of(n);
            if expected != crate::augment::leaf_max_free(leaf) {
                errors.push(String::from("leaf augment mismatch"));
            }
        }
        NodeRef::Branch(b) => {
            let len = b.as_ref().hdr.len as usize;
            if !is_root && len < MIN_ENTRIES_INTERNAL {
                errors.push(format!("branch underflow: {len} < {MIN_ENTRIES_INTERNAL}"));
            }
            if len > MAX_ENTRIES {
                errors.push(format!("branch overflow: {len} > {MAX_ENTRIES}"));
            }
            for i in 0..len {
                let k = node::branch_key_at(b, i);
                if i > 0 && k <= node::branch_key_at(b, i - 1) {
                    errors.push(String::from("branch keys not strictly increasing"));
                }
            }
            for i in 0..=len {
                let child = node::branch_child_at(b, i);
                let child_lo = if i == 0 { lo } else { node::branch_key_at(b, i - 1) };
                let child_hi = if i == len { hi } else { node::branch_key_at(b, i) };
                if b.as_ref().suba[i] != augment_of(child) {
                    errors.push(format!("suba[{i}] stale"));
                }
                walk(child, Some(b), child_lo, child_hi, false, errors);
            }
        }
    }
}

unsafe fn augment_of(n: NodeRef) -> u64 {
    crate::augment::node_max_free(n)
}

fn check_leaf_chain(tree: &VmTree, errors: &mut Vec<String>) {
    let mut prev: Option<NonNull<LeafNode>> = None;
    let mut cur = unsafe { leftmost_leaf(tree) };
    while let Some(leaf) = cur {
        unsafe {
            if leaf.as_ref().prev != prev {
                errors.push(String::from("leaf chain prev pointer mismatch"));
            }
            prev = Some(leaf);
            cur = leaf.as_ref().next;
        }
    }
}

unsafe fn leftmost_leaf(tree: &VmTree) -> Option<NonNull<LeafNode>> {
    let mut n = tree.root?;
    loop {
        match n {
            NodeRef::Leaf(l) => return Some(l),
            NodeRef::Branch(b) => n = node::branch_child_at(b, 0),
        }
    }
}

fn check_sorted_no_adjacency(tree: &VmTree, errors: &mut Vec<String>) {
    let mut prev_end: Option<u64> = None;
    for r in tree.ranges() {
        if let Some(pe) = prev_end {
            if r.start < pe {
                errors.push(String::from("ranges out of order across leaves"));
            } else if r.start == pe {
                errors.push(String::from("adjacent ranges were not coalesced (I2 violated)"));
            }
        }
        prev_end = Some(r.end);
    }
}

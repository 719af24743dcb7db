//! Augment maintenance: keeping `suba[i]` (max free-range length under
//! `children[i]`) correct after every mutation, ported from the original's
//! `fixup_metadata`/`fixup_subavail` (`examples/original_source/vm/vm_ops.c`).

use core::ptr::NonNull;

use crate::layout::{BranchNode, LeafNode};
use crate::node::{self, NodeRef, PosCC};

pub unsafe fn leaf_max_free(n: NonNull<LeafNode>) -> u64 {
    let node = n.as_ref();
    let len = node.hdr.len as usize;
    let mut max = 0u64;
    for i in 0..len {
        let r = node.ranges[i].assume_init().as_ref();
        let size = r.end - r.start;
        if size > max {
            max = size;
        }
    }
    max
}

pub unsafe fn branch_max_free(n: NonNull<BranchNode>) -> u64 {
    let node = n.as_ref();
    let mut max = 0u64;
    for i in 0..=node.hdr.len as usize {
        if node.suba[i] > max {
            max = node.suba[i];
        }
    }
    max
}

pub unsafe fn node_max_free(n: NodeRef) -> u64 {
    match n {
        NodeRef::Leaf(p) => leaf_max_free(p),
        NodeRef::Branch(p) => branch_max_free(p),
    }
}

/// Walk upward from `node`, using each ancestor's `ppos` breadcrumb (set by
/// the descent that just reached `node`) to find `node`'s own slot in its
/// parent, recomputing `suba` until a value stops changing. Ported from
/// `fixup_metadata`.
pub unsafe fn repair_from(mut node: NodeRef) {
    loop {
        let parent = match node.parent() {
            Some(p) => p,
            None => break,
        };
        let child_index = parent.as_ref().hdr.ppos as usize;
        let new_val = node_max_free(node);
        let mut p = parent;
        if p.as_ref().suba[child_index] == new_val {
            break;
        }
        p.as_mut().suba[child_index] = new_val;
        node = NodeRef::Branch(parent);
    }
}

/// Like `repair_from`, but locates `node`'s slot in each ancestor by
/// re-searching for `key` instead of trusting the `ppos` breadcrumb.
///
/// `repair_from` only works when the current descent's `ppos` trail actually
/// passed through `node`'s ancestors. After a cross-leaf free coalesce, the
/// leaf whose content changed (`prev` or `next`) is a *sibling* of the leaf
/// the descent actually reached — its ancestors' `ppos` breadcrumbs still
/// hold the original descent's child indices, which point at the wrong slot
/// once they diverge from `node`'s own path. `key` must be a key that still
/// lives in `node`'s subtree (e.g. its first entry's start), so the same
/// routing `branch_bin_search` uses elsewhere lands on `node`'s slot at
/// every level. Ported from `fixup_subavail`.
pub unsafe fn repair_from_by_key(mut node: NodeRef, key: u64) {
    loop {
        let parent = match node.parent() {
            Some(p) => p,
            None => break,
        };
        let (cc, mut pos) = node::branch_bin_search(parent, key);
        if matches!(cc, PosCC::Eq) {
            pos += 1;
        }
        let new_val = node_max_free(node);
        let mut p = parent;
        if p.as_ref().suba[pos] == new_val {
            break;
        }
        p.as_mut().suba[pos] = new_val;
        node = NodeRef::Branch(parent);
    }
}

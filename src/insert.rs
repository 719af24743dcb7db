//! B+ tree engine: preemptive-split descent and the raw insert primitive.
//! Ported from the original's `bpt_insert_non_full`/`bpn_split`
//! (`examples/original_source/vm/vm.c`).

use core::mem::MaybeUninit;
use core::ptr::NonNull;

use crate::augment;
use crate::error::VmError;
use crate::layout::{BranchNode, LeafNode, MAX_ENTRIES};
use crate::node::{self, NodeRef, PosCC};
use crate::node_alloc;
use crate::range::Range;
use crate::VmTree;

/// Insert `key` at `parent`'s slot `pindex`, with `child` becoming the new
/// right sibling at `pindex + 1`. Shared by leaf and branch splits and by
/// root creation.
unsafe fn insert_into_branch(mut parent: NonNull<BranchNode>, pindex: usize, key: u64, child: NodeRef) {
    let entries = parent.as_ref().hdr.len as usize;
    let p = parent.as_mut();
    node::shift_right(p.keys.as_mut_ptr() as *mut u64, pindex, entries);
    p.keys[pindex] = MaybeUninit::new(key);
    node::shift_right(
        p.children.as_mut_ptr() as *mut NodeRef,
        pindex + 1,
        entries + 1,
    );
    p.children[pindex + 1] = MaybeUninit::new(child);
    node::shift_right(p.suba.as_mut_ptr(), pindex, entries + 1);
    p.hdr.len = (entries + 1) as u16;
    child.set_parent_only(Some(parent));
}

/// Split a full child (`n`, currently `parent`'s child at `pindex`) in two,
/// promoting a separator into `parent`. Ported from `bpn_split`.
unsafe fn split_node(n: NodeRef, parent: NonNull<BranchNode>, pindex: usize) {
    n.set_parent_only(Some(parent));
    match n {
        NodeRef::Leaf(mut left) => {
            let right = node_alloc::alloc_leaf();
            let mut right_m = right;
            let total = MAX_ENTRIES;
            let right_count = (total + 1) / 2;
            let left_count = total - right_count;

            node::copy_slice(
                right_m.as_mut().ranges.as_mut_ptr() as *mut NonNull<Range>,
                (left.as_ref().ranges.as_ptr() as *const NonNull<Range>).add(left_count),
                right_count,
            );
            left.as_mut().hdr.len = left_count as u16;
            right_m.as_mut().hdr.len = right_count as u16;

            let old_next = left.as_ref().next;
            right_m.as_mut().next = old_next;
            right_m.as_mut().prev = Some(left);
            if let Some(mut nx) = old_next {
                nx.as_mut().prev = Some(right);
            }
            left.as_mut().next = Some(right);

            let sep = node::leaf_get(right, 0).as_ref().start;
            insert_into_branch(parent, pindex, sep, NodeRef::Leaf(right));

            let mut p = parent;
            p.as_mut().suba[pindex] = augment::leaf_max_free(left);
            p.as_mut().suba[pindex + 1] = augment::leaf_max_free(right);
        }
        NodeRef::Branch(mut left) => {
            let right = node_alloc::alloc_branch();
            let mut right_m = right;
            let total = MAX_ENTRIES;
            let right_keys = (total + 1) / 2 - 1;
            let left_keys = total - right_keys - 1;

            let sep = left.as_ref().keys[left_keys].assume_init();
            node::copy_slice(
                right_m.as_mut().keys.as_mut_ptr() as *mut u64,
                (left.as_ref().keys.as_ptr() as *const u64).add(left_keys + 1),
                right_keys,
            );
            node::copy_slice(
                right_m.as_mut().children.as_mut_ptr() as *mut NodeRef,
                (left.as_ref().children.as_ptr() as *const NodeRef).add(left_keys + 1),
                right_keys + 1,
            );
            node::copy_slice(
                right_m.as_mut().suba.as_mut_ptr(),
                (left.as_ref().suba.as_ptr()).add(left_keys + 1),
                right_keys + 1,
            );
            left.as_mut().hdr.len = left_keys as u16;
            right_m.as_mut().hdr.len = right_keys as u16;

            for i in 0..=right_keys {
                let c = node::branch_child_at(right, i);
                c.set_parent_only(Some(right));
            }

            insert_into_branch(parent, pindex, sep, NodeRef::Branch(right));

            let mut p = parent;
            p.as_mut().suba[pindex] = augment::branch_max_free(left);
            p.as_mut().suba[pindex + 1] = augment::branch_max_free(right);
        }
    }
}

unsafe fn split_root(tree: &mut VmTree) {
    let old_root = tree.root.expect("split_root requires an existing root");
    let new_root = node_alloc::alloc_branch();
    let mut nr = new_root;
    nr.as_mut().children[0] = MaybeUninit::new(old_root);
    split_node(old_root, new_root, 0);
    tree.root = Some(NodeRef::Branch(new_root));
}

/// Descend from the root, splitting any full child found along the way,
/// until a leaf with room for one more entry is reached. Ported from
/// `bpt_insert_non_full`'s traversal loop plus `bpt_po_insert`'s root check.
pub(crate) unsafe fn descend_for_insert(tree: &mut VmTree, key: u64) -> NonNull<LeafNode> {
    if tree.root.is_none() {
        let leaf = node_alloc::alloc_leaf();
        tree.root = Some(NodeRef::Leaf(leaf));
    }
    if node::is_full(tree.root.unwrap()) {
        split_root(tree);
    }
    let mut n = tree.root.unwrap();
    loop {
        match n {
            NodeRef::Leaf(leaf) => return leaf,
            NodeRef::Branch(mut b) => {
                let (cc, pos) = node::branch_bin_search(b, key);
                let mut idx = if matches!(cc, PosCC::Eq) { pos + 1 } else { pos };
                b.as_mut().hdr.ppos = idx as u16;
                let mut child = node::branch_child_at(b, idx);
                if node::is_full(child) {
                    split_node(child, b, idx);
                    if key >= node::branch_key_at(b, idx) {
                        idx += 1;
                    }
                    b.as_mut().hdr.ppos = idx as u16;
                    child = node::branch_child_at(b, idx);
                }
                n = child;
            }
        }
    }
}

/// Descend to the leaf that would hold `key`, without mutating the tree.
/// Used by read-only lookups; unlike `descend_for_insert`, never splits.
pub(crate) unsafe fn descend_for_insert_readonly(tree: &VmTree, key: u64) -> Option<NonNull<LeafNode>> {
    let mut n = tree.root?;
    loop {
        match n {
            NodeRef::Leaf(leaf) => return Some(leaf),
            NodeRef::Branch(b) => {
                let (cc, pos) = node::branch_bin_search(b, key);
                let idx = if matches!(cc, PosCC::Eq) { pos + 1 } else { pos };
                n = node::branch_child_at(b, idx);
            }
        }
    }
}

/// The raw insert primitive: descend with preemptive split, reject
/// duplicates and overlaps (I1/I2), then write. This is the operation
/// `free` falls back to when no coalescing applies.
pub(crate) unsafe fn insert_range(tree: &mut VmTree, r: Range) -> Result<(), VmError> {
    let leaf = descend_for_insert(tree, r.start);
    let (cc, pos) = node::leaf_bin_search(leaf, r.start);
    if matches!(cc, PosCC::Eq) {
        return Err(VmError::DuplicateStart(r.start));
    }
    let len = leaf.as_ref().hdr.len as usize;
    if pos > 0 {
        let left = node::leaf_get(leaf, pos - 1).as_ref();
        if left.end > r.start {
            return Err(VmError::OverlapLeft {
                new_start: r.start,
                neighbor_end: left.end,
            });
        }
    }
    if pos < len {
        let right = node::leaf_get(leaf, pos).as_ref();
        if right.start < r.end {
            return Err(VmError::OverlapRight {
                new_end: r.end,
                neighbor_start: right.start,
            });
        }
    }
    let handle = node_alloc::alloc_range(r.start, r.end);
    node::leaf_insert_at(leaf, pos, handle);
    tree.len += 1;
    augment::repair_from(NodeRef::Leaf(leaf));
    Ok(())
}

//! B+ tree engine: preemptive-merge descent. Ported from the original's
//! `bpt_po_delete`/`bpn_merge_siblings`/`bpn_try_shift_left`/
//! `bpn_try_shift_right` (`examples/original_source/vm/vm.c`).

use core::mem::MaybeUninit;
use core::ptr::NonNull;

use crate::augment;
use crate::layout::BranchNode;
use crate::node::{self, NodeRef, PosCC};
use crate::node_alloc;
use crate::range::Range;
use crate::VmTree;

/// Merge the siblings adjacent to `parent`'s separator at `pos` (clamped to
/// `entries - 1` if `pos == entries`) into the left one; shrink `parent`.
/// Returns the surviving (left) node. Ported from `bpn_merge_siblings`.
unsafe fn merge_siblings(mut parent: NonNull<BranchNode>, mut pos: usize) -> NodeRef {
    let entries = parent.as_ref().hdr.len as usize;
    if pos == entries {
        pos -= 1;
    }
    let l = node::branch_child_at(parent, pos);
    let r = node::branch_child_at(parent, pos + 1);

    match (l, r) {
        (NodeRef::Branch(mut lb), NodeRef::Branch(rb)) => {
            let l_len = lb.as_ref().hdr.len as usize;
            let r_len = rb.as_ref().hdr.len as usize;
            let sep = node::branch_key_at(parent, pos);
            lb.as_mut().keys[l_len] = MaybeUninit::new(sep);
            node::copy_slice(
                (lb.as_mut().keys.as_mut_ptr() as *mut u64).add(l_len + 1),
                rb.as_ref().keys.as_ptr() as *const u64,
                r_len,
            );
            node::copy_slice(
                (lb.as_mut().children.as_mut_ptr() as *mut NodeRef).add(l_len + 1),
                rb.as_ref().children.as_ptr() as *const NodeRef,
                r_len + 1,
            );
            node::copy_slice(
                lb.as_mut().suba.as_mut_ptr().add(l_len + 1),
                rb.as_ref().suba.as_ptr(),
                r_len + 1,
            );
            for i in 0..=r_len {
                let c = node::branch_child_at(lb, l_len + 1 + i);
                c.set_parent_only(Some(lb));
            }
            lb.as_mut().hdr.len = (l_len + 1 + r_len) as u16;
            node_alloc::dealloc_branch(rb);
        }
        (NodeRef::Leaf(mut ll), NodeRef::Leaf(rl)) => {
            let l_len = ll.as_ref().hdr.len as usize;
            let r_len = rl.as_ref().hdr.len as usize;
            node::copy_slice(
                (ll.as_mut().ranges.as_mut_ptr() as *mut NonNull<Range>).add(l_len),
                rl.as_ref().ranges.as_ptr() as *const NonNull<Range>,
                r_len,
            );
            ll.as_mut().hdr.len = (l_len + r_len) as u16;
            let next = rl.as_ref().next;
            ll.as_mut().next = next;
            if let Some(mut nx) = next {
                nx.as_mut().prev = Some(ll);
            }
            node_alloc::dealloc_leaf(rl);
        }
        _ => unreachable!("adjacent siblings always share a node kind"),
    }

    let entries = parent.as_ref().hdr.len as usize;
    let p = parent.as_mut();
    node::shift_left(p.keys.as_mut_ptr() as *mut u64, pos, entries);
    node::shift_left(p.children.as_mut_ptr() as *mut NodeRef, pos + 1, entries + 1);
    node::shift_left(p.suba.as_mut_ptr(), pos + 1, entries + 1);
    p.hdr.len = (entries - 1) as u16;
    l
}

/// Rotate `r`'s front entry into `l`'s back through the `parent` separator
/// at child index `pos`, growing `l` and shrinking `r`. Returns `false` if
/// the rotation isn't available (`l` has no room, or `r` has nothing to
/// spare). Ported from `bpn_try_shift_left`.
unsafe fn try_shift_left(l: NodeRef, r: NodeRef, mut p: NonNull<BranchNode>, pos: usize) -> bool {
    let entries = p.as_ref().hdr.len as usize;
    let pos = if pos == entries { pos - 1 } else { pos };
    if node::is_full(l) {
        return false;
    }
    if !node::is_gt_min(r) {
        return false;
    }
    match (l, r) {
        (NodeRef::Branch(mut lb), NodeRef::Branch(mut rb)) => {
            let l_len = lb.as_ref().hdr.len as usize;
            let r_len = rb.as_ref().hdr.len as usize;
            lb.as_mut().keys[l_len] = MaybeUninit::new(node::branch_key_at(p, pos));
            let moved_key = node::branch_key_at(rb, 0);
            p.as_mut().keys[pos] = MaybeUninit::new(moved_key);
            let moved_child = node::branch_child_at(rb, 0);
            lb.as_mut().children[l_len + 1] = MaybeUninit::new(moved_child);
            lb.as_mut().suba[l_len + 1] = rb.as_ref().suba[0];
            moved_child.set_parent_only(Some(lb));
            node::shift_left(rb.as_mut().keys.as_mut_ptr() as *mut u64, 0, r_len);
            node::shift_left(rb.as_mut().children.as_mut_ptr() as *mut NodeRef, 0, r_len + 1);
            node::shift_left(rb.as_mut().suba.as_mut_ptr(), 0, r_len + 1);
            lb.as_mut().hdr.len = (l_len + 1) as u16;
            rb.as_mut().hdr.len = (r_len - 1) as u16;
        }
        (NodeRef::Leaf(mut ll), NodeRef::Leaf(mut rl)) => {
            let l_len = ll.as_ref().hdr.len as usize;
            let r_len = rl.as_ref().hdr.len as usize;
            let moved = node::leaf_get(rl, 0);
            ll.as_mut().ranges[l_len] = MaybeUninit::new(moved);
            node::shift_left(rl.as_mut().ranges.as_mut_ptr() as *mut NonNull<Range>, 0, r_len);
            ll.as_mut().hdr.len = (l_len + 1) as u16;
            rl.as_mut().hdr.len = (r_len - 1) as u16;
            let new_sep = node::leaf_get(rl, 0).as_ref().start;
            p.as_mut().keys[pos] = MaybeUninit::new(new_sep);
        }
        _ => unreachable!("adjacent siblings always share a node kind"),
    }
    true
}

/// Mirror of `try_shift_left`: rotate `l`'s last entry into `r`'s front.
/// Ported from `bpn_try_shift_right`.
unsafe fn try_shift_right(l: NodeRef, r: NodeRef, mut p: NonNull<BranchNode>, pos: usize) -> bool {
    let entries = p.as_ref().hdr.len as usize;
    let pos = if pos == entries { pos - 1 } else { pos };
    if !node::is_gt_min(l) {
        return false;
    }
    if node::is_full(r) {
        return false;
    }
    match (l, r) {
        (NodeRef::Branch(mut lb), NodeRef::Branch(mut rb)) => {
            let l_len = lb.as_ref().hdr.len as usize;
            let r_len = rb.as_ref().hdr.len as usize;
            node::shift_right(rb.as_mut().keys.as_mut_ptr() as *mut u64, 0, r_len);
            node::shift_right(rb.as_mut().children.as_mut_ptr() as *mut NodeRef, 0, r_len + 1);
            node::shift_right(rb.as_mut().suba.as_mut_ptr(), 0, r_len + 1);
            rb.as_mut().keys[0] = MaybeUninit::new(node::branch_key_at(p, pos));
            let moved_child = node::branch_child_at(lb, l_len);
            rb.as_mut().children[0] = MaybeUninit::new(moved_child);
            rb.as_mut().suba[0] = lb.as_ref().suba[l_len];
            moved_child.set_parent_only(Some(rb));
            let new_sep = node::branch_key_at(lb, l_len - 1);
            p.as_mut().keys[pos] = MaybeUninit::new(new_sep);
            lb.as_mut().hdr.len = (l_len - 1) as u16;
            rb.as_mut().hdr.len = (r_len + 1) as u16;
        }
        (NodeRef::Leaf(mut ll), NodeRef::Leaf(mut rl)) => {
            let l_len = ll.as_ref().hdr.len as usize;
            let r_len = rl.as_ref().hdr.len as usize;
            node::shift_right(rl.as_mut().ranges.as_mut_ptr() as *mut NonNull<Range>, 0, r_len);
            let moved = node::leaf_get(ll, l_len - 1);
            rl.as_mut().ranges[0] = MaybeUninit::new(moved);
            ll.as_mut().hdr.len = (l_len - 1) as u16;
            rl.as_mut().hdr.len = (r_len + 1) as u16;
            let new_sep = moved.as_ref().start;
            p.as_mut().keys[pos] = MaybeUninit::new(new_sep);
        }
        _ => unreachable!("adjacent siblings always share a node kind"),
    }
    true
}

/// Delete the entry whose range starts at `key`, rebalancing on the way
/// down so no child is ever visited at minimum occupancy (preemptive
/// merge). Returns the removed range's provider handle so the caller can
/// deallocate it (or splice its value elsewhere, as `vm_ops::free` does).
/// Ported from `bpt_po_delete`.
pub(crate) unsafe fn delete_by_start(tree: &mut VmTree, key: u64) -> Option<NonNull<Range>> {
    let mut n = tree.root?;
    loop {
        let (cc, pos) = node::node_bin_search(n, key);
        if let NodeRef::Leaf(leaf) = n {
            if !matches!(cc, PosCC::Eq) {
                return None;
            }
            let rng = node::leaf_remove_at(leaf, pos);
            augment::repair_from(NodeRef::Leaf(leaf));
            return Some(rng);
        }
        let mut b = match n {
            NodeRef::Branch(b) => b,
            NodeRef::Leaf(_) => unreachable!(),
        };
        let child_idx = if matches!(cc, PosCC::Eq) { pos + 1 } else { pos };
        b.as_mut().hdr.ppos = child_idx as u16;
        let child = node::branch_child_at(b, child_idx);
        if node::is_gt_min(child) {
            n = child;
            continue;
        }

        let entries = b.as_ref().hdr.len as usize;
        let (lpos, rpos) = if child_idx < entries {
            (child_idx, child_idx + 1)
        } else {
            (child_idx - 1, child_idx)
        };
        let l = node::branch_child_at(b, lpos);
        let r = node::branch_child_at(b, rpos);
        let child_is_left = child_idx == lpos;

        let balanced = if child_is_left {
            try_shift_left(l, r, b, child_idx)
        } else {
            try_shift_right(l, r, b, child_idx)
        };

        if balanced {
            let mut bm = b;
            bm.as_mut().suba[lpos] = augment::node_max_free(l);
            bm.as_mut().suba[rpos] = augment::node_max_free(r);
            n = child;
        } else {
            let merged = merge_siblings(b, child_idx);
            let mut bm = b;
            bm.as_mut().suba[lpos] = augment::node_max_free(merged);
            merged.set_ppos(lpos as u16);
            if b.as_ref().hdr.len == 0 && tree.root == Some(NodeRef::Branch(b)) {
                merged.set_parent_only(None);
                tree.root = Some(merged);
                node_alloc::dealloc_branch(b);
            }
            n = merged;
        }
    }
}

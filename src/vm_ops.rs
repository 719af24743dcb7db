//! VM allocator: augmented smallest-lowest-fit lookup, clip classification,
//! and coalescing free. Ported from the original's `lookup_smallest_va`,
//! `va_clip`/`va_alloc`, and `get_va_merge_state`/`do_merge_va`
//! (`examples/original_source/vm/vm_ops.c`).

use core::ptr::NonNull;

use crate::augment;
use crate::delete;
use crate::error::VmError;
use crate::insert;
use crate::layout::{self, LeafNode};
use crate::node::{self, NodeRef};
use crate::node_alloc;
use crate::range::Range;
use crate::VmTree;

fn effective_length(size: u64, align: u64) -> u64 {
    if align > layout::PAGE_SIZE {
        size + align - 1
    } else {
        size
    }
}

/// Does range `r` contain an aligned window of `size` bytes at or after
/// `vstart`? Returns the aligned start if so.
fn fits(r: &Range, size: u64, align: u64, vstart: u64) -> Option<u64> {
    let base = if r.start > vstart { r.start } else { vstart };
    let nva = layout::align_up(base, align);
    if nva < base {
        return None; // overflow
    }
    let end = nva.checked_add(size)?;
    if end <= r.end {
        Some(nva)
    } else {
        None
    }
}

unsafe fn leaf_scan(leaf: NonNull<LeafNode>, size: u64, align: u64, vstart: u64) -> Option<(usize, u64)> {
    let len = leaf.as_ref().hdr.len as usize;
    for i in 0..len {
        let r = node::leaf_get(leaf, i).as_ref();
        if let Some(nva) = fits(r, size, align, vstart) {
            return Some((i, nva));
        }
    }
    None
}

/// Descend from the root toward the lowest leaf that could contain a fit:
/// at each branch, take the first child whose subtree separator exceeds
/// `vstart` and whose `suba` is large enough. Ported from
/// `bpt_lookup_lowest_leaf`.
unsafe fn descend_lowest_leaf(tree: &VmTree, length: u64, vstart: u64) -> Option<NonNull<LeafNode>> {
    let mut n = tree.root?;
    loop {
        match n {
            NodeRef::Leaf(l) => return Some(l),
            NodeRef::Branch(mut b) => {
                let entries = b.as_ref().hdr.len as usize;
                let mut idx = entries;
                for j in 0..entries {
                    if vstart < node::branch_key_at(b, j) && b.as_ref().suba[j] >= length {
                        idx = j;
                        break;
                    }
                }
                b.as_mut().hdr.ppos = idx as u16;
                n = node::branch_child_at(b, idx);
            }
        }
    }
}

/// After a leaf scan misses, climb until an ancestor has a sibling subtree
/// with enough room, and return the separator key bounding that subtree's
/// start. Ported from `first_next_sub_avail`.
unsafe fn climb_next_subavail(leaf: NonNull<LeafNode>, length: u64) -> Option<u64> {
    let mut cur = NodeRef::Leaf(leaf);
    loop {
        let parent = cur.parent()?;
        let entries = parent.as_ref().hdr.len as usize;
        let my_pos = parent.as_ref().hdr.ppos as usize;
        for i in (my_pos + 1)..=entries {
            if parent.as_ref().suba[i] >= length {
                return Some(node::branch_key_at(parent, i - 1));
            }
        }
        cur = NodeRef::Branch(parent);
    }
}

/// Smallest-lowest-fit search: descend, scan the leaf, and on a miss climb
/// to the next viable subtree and redescend — at most once. Ported from
/// `lookup_smallest_va`.
unsafe fn lookup_smallest(
    tree: &VmTree,
    size: u64,
    align: u64,
    mut vstart: u64,
) -> Option<(NonNull<LeafNode>, usize, u64)> {
    let length = effective_length(size, align);
    for _ in 0..2 {
        let leaf = descend_lowest_leaf(tree, length, vstart)?;
        if let Some((pos, nva)) = leaf_scan(leaf, size, align, vstart) {
            return Some((leaf, pos, nva));
        }
        vstart = climb_next_subavail(leaf, length)?;
    }
    None
}

/// Find the (node, index) of the internal separator whose key equals
/// `key`, by descending the unique branch chain an exact match would
/// follow. Used to rewrite a stale separator after a cross-leaf coalesce —
/// an explicit re-search in place of the original's ppos-breadcrumb climb
/// (`fixup_subavail`'s caller), licensed by the design notes as an
/// equivalent alternative.
unsafe fn find_separator(tree: &VmTree, key: u64) -> Option<(NonNull<layout::BranchNode>, usize)> {
    let mut n = tree.root?;
    loop {
        match n {
            NodeRef::Branch(b) => {
                let (cc, pos) = node::branch_bin_search(b, key);
                if matches!(cc, node::PosCC::Eq) {
                    return Some((b, pos));
                }
                n = node::branch_child_at(b, pos);
            }
            NodeRef::Leaf(_) => return None,
        }
    }
}

unsafe fn rewrite_boundary(tree: &VmTree, old_boundary: u64, new_boundary: u64) {
    if let Some((mut b, idx)) = find_separator(tree, old_boundary) {
        b.as_mut().keys[idx] = core::mem::MaybeUninit::new(new_boundary);
    }
}

/// Clip an aligned `size`-byte window starting at `nva` out of the range
/// indexed at `leaf[pos]`, shrinking, removing, or splitting that entry as
/// needed. Ported from `va_clip`.
unsafe fn clip(tree: &mut VmTree, leaf: NonNull<LeafNode>, pos: usize, nva: u64, size: u64) -> Range {
    let handle = node::leaf_get(leaf, pos);
    let r = *handle.as_ptr();
    let full = r.start == nva && r.end == nva + size;
    let left_edge = r.start == nva;
    let right_edge = r.end == nva + size;

    if full {
        let removed = node::leaf_remove_at(leaf, pos);
        node_alloc::dealloc_range(removed);
        tree.len -= 1;
        augment::repair_from(NodeRef::Leaf(leaf));
    } else if left_edge {
        (*handle.as_ptr()).start = nva + size;
        augment::repair_from(NodeRef::Leaf(leaf));
    } else if right_edge {
        (*handle.as_ptr()).end = nva;
        augment::repair_from(NodeRef::Leaf(leaf));
    } else {
        let remainder = Range {
            start: r.start,
            end: nva,
        };
        (*handle.as_ptr()).start = nva + size;
        augment::repair_from(NodeRef::Leaf(leaf));
        insert::insert_range(tree, remainder).expect("remainder cannot violate I1/I2");
    }
    Range {
        start: nva,
        end: nva + size,
    }
}

/// Find and remove the smallest free range at or after `vstart` that can
/// hold an aligned `size`-byte allocation, without exceeding `vend`.
/// Returns `None` on exhaustion. Ported from `alloc_vmap_area`.
pub(crate) fn alloc(tree: &mut VmTree, size: u64, align: u64, vstart: u64, vend: u64) -> Option<Range> {
    debug_assert!(size > 0 && align.is_power_of_two() && vstart < vend);
    unsafe {
        let (leaf, pos, nva) = lookup_smallest(tree, size, align, vstart)?;
        if nva.checked_add(size)? > vend {
            return None;
        }
        Some(clip(tree, leaf, pos, nva, size))
    }
}

/// Insert `r` back into the tree, coalescing with any adjacent range —
/// within the same leaf or across a leaf boundary — so no two indexed
/// ranges are ever adjacent (I2). Ported from `free_vmap_area`/
/// `get_va_merge_state`/`do_merge_va`.
pub(crate) fn free(tree: &mut VmTree, mut r: Range) -> Result<(), VmError> {
    if r.start >= r.end {
        return Err(VmError::InvalidWindow {
            start: r.start,
            end: r.end,
        });
    }
    unsafe {
        for _ in 0..2 {
            let leaf = insert::descend_for_insert(tree, r.start);
            let (cc, pos) = node::leaf_bin_search(leaf, r.start);
            if matches!(cc, node::PosCC::Eq) {
                return Err(VmError::DuplicateStart(r.start));
            }
            let len = leaf.as_ref().hdr.len as usize;

            let left_adj = pos > 0 && node::leaf_get(leaf, pos - 1).as_ref().end == r.start;
            let right_adj = pos < len && node::leaf_get(leaf, pos).as_ref().start == r.end;
            let left_leaf_adj = pos == 0
                && leaf
                    .as_ref()
                    .prev
                    .map(|p| {
                        let plen = p.as_ref().hdr.len as usize;
                        plen > 0 && node::leaf_get(p, plen - 1).as_ref().end == r.start
                    })
                    .unwrap_or(false);
            let right_leaf_adj = pos == len
                && leaf
                    .as_ref()
                    .next
                    .map(|p| p.as_ref().hdr.len > 0 && node::leaf_get(p, 0).as_ref().start == r.end)
                    .unwrap_or(false);

            debug_assert!(
                !(left_leaf_adj && right_leaf_adj),
                "a leaf reachable by free() is never empty, so LEFT_LEAF and RIGHT_LEAF cannot both apply"
            );

            if pos == 0 {
                if let Some(p) = leaf.as_ref().prev {
                    let plen = p.as_ref().hdr.len as usize;
                    if plen > 0 {
                        let last = node::leaf_get(p, plen - 1).as_ref();
                        if last.end > r.start {
                            return Err(VmError::OverlapLeft {
                                new_start: r.start,
                                neighbor_end: last.end,
                            });
                        }
                    }
                }
            }
            if pos == len {
                if let Some(nx) = leaf.as_ref().next {
                    if nx.as_ref().hdr.len > 0 {
                        let first = node::leaf_get(nx, 0).as_ref();
                        if first.start < r.end {
                            return Err(VmError::OverlapRight {
                                new_end: r.end,
                                neighbor_start: first.start,
                            });
                        }
                    }
                }
            }

            if left_adj && right_adj {
                let left = node::leaf_get(leaf, pos - 1);
                let right = node::leaf_get(leaf, pos);
                let right_start = right.as_ref().start;
                (*left.as_ptr()).end = right.as_ref().end;
                augment::repair_from(NodeRef::Leaf(leaf));
                let removed = delete::delete_by_start(tree, right_start)
                    .expect("coalesced right neighbor must exist");
                node_alloc::dealloc_range(removed);
                return Ok(());
            } else if left_adj && right_leaf_adj {
                let left = node::leaf_get(leaf, pos - 1);
                let left_start = left.as_ref().start;
                r.start = left_start;
                let removed = delete::delete_by_start(tree, left_start)
                    .expect("coalesced left neighbor must exist");
                node_alloc::dealloc_range(removed);
                continue;
            } else if left_adj {
                let left = node::leaf_get(leaf, pos - 1);
                (*left.as_ptr()).end = r.end;
                augment::repair_from(NodeRef::Leaf(leaf));
                return Ok(());
            } else if right_adj && left_leaf_adj {
                let right = node::leaf_get(leaf, pos);
                let right_end = right.as_ref().end;
                let right_start = right.as_ref().start;
                r.end = right_end;
                let removed = delete::delete_by_start(tree, right_start)
                    .expect("coalesced right neighbor must exist");
                node_alloc::dealloc_range(removed);
                continue;
            } else if right_adj {
                let right = node::leaf_get(leaf, pos);
                (*right.as_ptr()).start = r.start;
                augment::repair_from(NodeRef::Leaf(leaf));
                return Ok(());
            } else if left_leaf_adj {
                let prev = leaf.as_ref().prev.unwrap();
                let idx = prev.as_ref().hdr.len as usize - 1;
                let last = node::leaf_get(prev, idx);
                let old_boundary = r.start;
                let prev_key = node::leaf_get(prev, 0).as_ref().start;
                let new_boundary = node::leaf_get(leaf, 0).as_ref().start;
                (*last.as_ptr()).end = r.end;
                rewrite_boundary(tree, old_boundary, new_boundary);
                augment::repair_from_by_key(NodeRef::Leaf(prev), prev_key);
                return Ok(());
            } else if right_leaf_adj {
                let next = leaf.as_ref().next.unwrap();
                let first = node::leaf_get(next, 0);
                let old_boundary = r.end;
                (*first.as_ptr()).start = r.start;
                rewrite_boundary(tree, old_boundary, r.start);
                augment::repair_from_by_key(NodeRef::Leaf(next), r.start);
                return Ok(());
            } else {
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
                return Ok(());
            }
        }
        unreachable!("cross-leaf coalesce retry budget exceeded")
    }
}

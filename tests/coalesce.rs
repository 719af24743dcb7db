//! Merge-state table coverage (spec.md §4.5) and the cross-leaf retry path.
//! Grounded on `examples/original_source/vm/vm_ops.c`'s `get_va_merge_state`/
//! `do_merge_va`.


use test_utils::{assert_invariants, striped_tree};
use vmtree::{Range, VmTree};

// NONE: no adjacency, a plain insert.
#[test]
fn merge_state_none() {
    let mut tree = VmTree::init(0, 1000).unwrap();
    tree.insert(Range::new(100, 110)).unwrap();
    assert_invariants(&tree);
    assert_eq!(tree.ranges().copied().collect::<Vec<_>>(), vec![Range::new(100, 110)]);
}

// LEFT only: freed range's start equals the left neighbor's end.
#[test]
fn merge_state_left_only() {
    let mut tree = VmTree::init(0, 1000).unwrap();
    tree.insert(Range::new(100, 200)).unwrap();
    tree.insert(Range::new(300, 400)).unwrap();
    tree.free(Range::new(200, 250)).unwrap();
    assert_invariants(&tree);
    let all: Vec<_> = tree.ranges().copied().collect();
    assert!(all.contains(&Range::new(100, 250)));
    assert!(all.contains(&Range::new(300, 400)));
}

// RIGHT only: freed range's end equals the right neighbor's start.
#[test]
fn merge_state_right_only() {
    let mut tree = VmTree::init(0, 1000).unwrap();
    tree.insert(Range::new(100, 200)).unwrap();
    tree.insert(Range::new(300, 400)).unwrap();
    tree.free(Range::new(250, 300)).unwrap();
    assert_invariants(&tree);
    let all: Vec<_> = tree.ranges().copied().collect();
    assert!(all.contains(&Range::new(100, 200)));
    assert!(all.contains(&Range::new(250, 400)));
}

// LEFT & RIGHT: both neighbors in the same leaf, three pieces fuse into one.
#[test]
fn merge_state_left_and_right_same_leaf() {
    let mut tree = VmTree::init(0, 1000).unwrap();
    tree.insert(Range::new(100, 200)).unwrap();
    tree.insert(Range::new(300, 400)).unwrap();
    tree.free(Range::new(200, 300)).unwrap();
    assert_invariants(&tree);
    assert_eq!(tree.ranges().copied().collect::<Vec<_>>(), vec![Range::new(100, 400)]);
    assert_eq!(tree.len(), 1);
}

// Freeing a range that touches neither neighbor stays a distinct entry.
#[test]
fn merge_state_no_merge_leaves_entry_distinct() {
    let mut tree = VmTree::init(0, 1000).unwrap();
    tree.insert(Range::new(100, 200)).unwrap();
    tree.insert(Range::new(300, 400)).unwrap();
    tree.free(Range::new(220, 280)).unwrap();
    assert_invariants(&tree);
    assert_eq!(tree.len(), 3);
}

// Full drain: repeatedly free every allocated gap in a many-leaf striped
// tree, ascending. With `ORDER = 24` and hundreds of free ranges this tree
// spans many leaves, so this sweep necessarily exercises LEFT_LEAF-only,
// RIGHT_LEAF-only, and both cross-leaf retry rows (LEFT & RIGHT_LEAF,
// RIGHT & LEFT_LEAF) somewhere along the way, in addition to the in-leaf
// rows — and must end with the whole window re-fused into one range.
#[test]
fn full_drain_exercises_every_merge_pattern_including_cross_leaf() {
    const WINDOW: u64 = 200_000;
    const FREE_LEN: u64 = 10;
    const GAP_LEN: u64 = 10;
    const COUNT: u64 = 500;
    let mut tree = striped_tree(WINDOW, FREE_LEN, GAP_LEN, COUNT);
    assert!(tree.leaf_count() > 4, "test setup should span several leaves");
    assert_invariants(&tree);

    let stride = FREE_LEN + GAP_LEN;
    for i in 0..COUNT {
        let gap_start = i * stride + FREE_LEN;
        tree.free(Range::new(gap_start, gap_start + GAP_LEN)).unwrap();
        assert_invariants(&tree);
    }

    // The last freed gap is adjacent to the untouched tail left over by
    // `striped_tree` (never carved further), so the final free() call
    // fuses everything into the whole original window.
    assert_eq!(tree.ranges().copied().collect::<Vec<_>>(), vec![Range::new(0, WINDOW)]);
    assert_eq!(tree.leaf_count(), 1);
}

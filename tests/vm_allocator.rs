//! Concrete allocator scenarios, boundary behaviors, and invariant checks
//! from spec.md §8. Initial state in every test is an empty index over
//! `[0, 1000)` unless stated otherwise.


use test_utils::{assert_invariants, striped_tree, Xorshift64};
use vmtree::{Range, VmTree};

fn ranges_of(tree: &VmTree) -> Vec<Range> {
    tree.ranges().copied().collect()
}

// 1. insert (10,20); insert (30,40); insert (20,30) -> single coalesced (10,40).
#[test]
fn scenario_1_chained_coalesce_on_insert() {
    let mut tree = VmTree::init(0, 1000).unwrap();
    tree.insert(Range::new(10, 20)).unwrap();
    tree.insert(Range::new(30, 40)).unwrap();
    tree.insert(Range::new(20, 30)).unwrap();
    assert_invariants(&tree);
    let all = ranges_of(&tree);
    assert!(all.contains(&Range::new(10, 40)));
    assert!(!all.iter().any(|r| r.start == 20 || r.start == 30));
}

// 2. insert (0,100); alloc(30, align=1, vstart=0) -> start=0, leaf has (30,100).
#[test]
fn scenario_2_full_fit_at_left_edge() {
    let mut tree = VmTree::init(0, 1000).unwrap();
    tree.insert(Range::new(0, 100)).unwrap();
    let carved = tree.alloc(30, 1, 0, 1000).expect("must fit");
    assert_eq!(carved, Range::new(0, 30));
    assert_invariants(&tree);
    assert_eq!(ranges_of(&tree), vec![Range::new(30, 100)]);
}

// 3. insert (0,100); alloc(30, align=16, vstart=5) -> start=16, leaves
//    (0,16) and (46,100) (INTERIOR classification).
#[test]
fn scenario_3_interior_clip_splits_remainder() {
    let mut tree = VmTree::init(0, 1000).unwrap();
    tree.insert(Range::new(0, 100)).unwrap();
    let carved = tree.alloc(30, 16, 5, 1000).expect("must fit");
    assert_eq!(carved, Range::new(16, 46));
    assert_invariants(&tree);
    let all = ranges_of(&tree);
    assert!(all.contains(&Range::new(0, 16)));
    assert!(all.contains(&Range::new(46, 100)));
}

// 4. 50 free ranges of length 10 on a stride of 20; a size-15 request is
//    Exhaustion; a size-10 request floored at 500 returns start=500.
#[test]
fn scenario_4_exhaustion_and_floored_fit() {
    let mut tree = striped_tree(1000, 10, 10, 50);
    assert_invariants(&tree);
    assert!(tree.alloc(15, 1, 0, 1000).is_none());
    let carved = tree.alloc(10, 1, 500, 1000).expect("must fit");
    assert_eq!(carved, Range::new(500, 510));
    assert_invariants(&tree);
}

// 6. insert (100,200); insert (300,400); insert (200,300) crossing a leaf
//    boundary in a multi-leaf tree -> single coalesced (100,400).
#[test]
fn scenario_6_cross_leaf_coalesce_on_insert() {
    // Force a multi-leaf tree first by populating enough disjoint, widely
    // separated ranges that (100,200) and (300,400) end up in different
    // leaves, then bridge them.
    let mut tree = VmTree::init(0, 1_000_000).unwrap();
    let mut start = 500u64;
    while tree.leaf_count() < 3 {
        tree.insert(Range::new(start, start + 2)).unwrap();
        start += 4;
    }
    tree.insert(Range::new(100, 200)).unwrap();
    tree.insert(Range::new(300, 400)).unwrap();
    assert_invariants(&tree);
    tree.insert(Range::new(200, 300)).unwrap();
    assert_invariants(&tree);
    assert!(ranges_of(&tree).contains(&Range::new(100, 400)));
}

// B1. size == length of the unique free range -> FULL-fit classification
// (the range disappears entirely rather than being clipped at an edge).
#[test]
fn boundary_b1_full_fit_removes_the_range() {
    let mut tree = VmTree::init(0, 100).unwrap();
    let carved = tree.alloc(100, 1, 0, 100).expect("must fit");
    assert_eq!(carved, Range::new(0, 100));
    assert_invariants(&tree);
    assert!(tree.is_empty());
}

// B2. with align > PAGE_SIZE the effective length includes align-1 padding,
// so a free range of exactly `size` bytes, deliberately unaligned to the
// oversized requested alignment, fails even though its length equals size.
#[test]
fn boundary_b2_large_alignment_padding_can_exhaust_an_exact_length_range() {
    let mut tree = VmTree::init(0, 1_000_000).unwrap();
    let size = 4096u64;
    let align = 8192u64;
    tree.insert(Range::new(10, 10 + size)).unwrap();
    assert!(tree.alloc(size, align, 0, 1_000_000).is_none());
}

// B3. Coalescing across a leaf boundary where the absorbed boundary is an
// internal separator rewrites that separator (and its suba) rather than
// leaving it stale.
#[test]
fn boundary_b3_cross_leaf_coalesce_rewrites_separator() {
    let mut tree = VmTree::init(0, 1_000_000).unwrap();
    let mut start = 10_000u64;
    while tree.leaf_count() < 3 {
        tree.insert(Range::new(start, start + 2)).unwrap();
        start += 4;
    }
    tree.insert(Range::new(100, 200)).unwrap();
    tree.insert(Range::new(300, 400)).unwrap();
    assert_invariants(&tree);
    tree.free(Range::new(200, 300)).unwrap();
    assert_invariants(&tree);
    assert!(ranges_of(&tree).contains(&Range::new(100, 400)));
}

// B4. Root collapse: deleting the last key of a root whose single
// remaining child is a leaf replaces the root with that leaf.
#[test]
fn boundary_b4_root_collapses_to_surviving_leaf() {
    let mut tree = VmTree::init(0, 1000).unwrap();
    // Drive the tree to two levels, then drain it back down via coalescing
    // frees until only one leaf's worth of ranges remain.
    for i in 0..40u64 {
        let base = i * 20;
        tree.alloc(10, 1, base, 1000).expect("carve");
    }
    assert_invariants(&tree);
    for i in 0..40u64 {
        let base = i * 20;
        tree.free(Range::new(base, base + 10)).unwrap();
    }
    assert_invariants(&tree);
    assert_eq!(tree.leaf_count(), 1);
    assert_eq!(ranges_of(&tree), vec![Range::new(0, 1000)]);
}

// P1-P6, P9: randomized stress test (scenario 5, trimmed from 1e5 to a size
// that keeps the suite fast while still forcing three tree levels and many
// coalesce/split/merge paths).
#[test]
fn scenario_5_randomized_stress_preserves_invariants() {
    let window = 2_000_000u64;
    let mut tree = VmTree::init(0, window).unwrap();
    let mut rng = Xorshift64::new(0xC0FFEE);
    let mut outstanding: Vec<Range> = Vec::new();

    for step in 0..20_000u32 {
        if outstanding.is_empty() || rng.next_below(2) == 0 {
            let size = 16 + rng.next_below(256);
            if let Some(r) = tree.alloc(size, 1, 0, window) {
                outstanding.push(r);
            }
        } else {
            let idx = rng.next_below(outstanding.len() as u64) as usize;
            let r = outstanding.swap_remove(idx);
            tree.free(r).unwrap();
        }
        if step % 500 == 0 {
            assert_invariants(&tree);
        }
    }
    assert_invariants(&tree);
}

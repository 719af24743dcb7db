//! Dump/visualize sink: a textual description of tree shape for debugging.
//! Off in production (`dump` feature, not in `default`), matching spec's
//! "Dump/visualize sink ... off in production" and built the way the
//! teacher's own `check_invariants_detailed` builds diagnostic strings —
//! `alloc::format!`/`alloc::string::String`, no formatting crate needed.

#![cfg(feature = "dump")]

use alloc::format;
use alloc::string::String;
use core::fmt::Write as _;

use crate::node::{self, NodeRef};
use crate::VmTree;

/// Render the tree as an indented textual tree: each internal node shows
/// its separator keys and `suba` values, each leaf shows its ranges.
pub fn dump(tree: &VmTree) -> String {
    let mut out = String::new();
    match tree.root {
        Some(root) => unsafe { dump_node(&mut out, root, 0) },
        None => out.push_str("(empty)\n"),
    }
    out
}

unsafe fn dump_node(out: &mut String, n: NodeRef, depth: usize) {
    let pad = "  ".repeat(depth);
    match n {
        NodeRef::Leaf(leaf) => {
            let len = leaf.as_ref().hdr.len as usize;
            let _ = write!(out, "{pad}leaf[{len}]: ");
            for i in 0..len {
                let r = node::leaf_get(leaf, i).as_ref();
                let _ = write!(out, "[{:#x},{:#x}) ", r.start, r.end);
            }
            out.push('\n');
        }
        NodeRef::Branch(b) => {
            let len = b.as_ref().hdr.len as usize;
            let _ = write!(out, "{pad}branch[{len}] keys=");
            for i in 0..len {
                let _ = write!(out, "{:#x} ", node::branch_key_at(b, i));
            }
            let _ = write!(out, "suba=");
            for i in 0..=len {
                let _ = write!(out, "{} ", b.as_ref().suba[i]);
            }
            out.push('\n');
            for i in 0..=len {
                dump_node(out, node::branch_child_at(b, i), depth + 1);
            }
        }
    }
}

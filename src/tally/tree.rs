//! Builds a tree mirroring the working directory with a winning tally at
//! every node.
//!
//! Leaves carry the per-path tallies directly; interior nodes get theirs by
//! combining their children during [`TreeNode::rank`], so a directory's
//! numbers always equal the merge of everything under it. Renamed files
//! were already attributed to their post-rename path upstream, which means
//! history follows a file to where it lives in the tree today.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::Result;
use tracing::debug;

use crate::error::Error;
use crate::tally::path::{TalliesByPath, NO_DIFF_PATHNAME};
use crate::tally::{FinalTally, Tally, TallyMode};

#[derive(Debug, Default)]
pub struct TreeNode {
    pub children: BTreeMap<String, TreeNode>,
    /// Per-author tallies: inserted at leaves, propagated to interior
    /// nodes by `rank`.
    pub tallies: HashMap<String, Tally>,
    /// Whether this node or any descendant is a file currently present in
    /// the working tree.
    pub in_worktree: bool,
    /// The winning tally after `rank`.
    pub final_tally: Option<FinalTally>,
}

impl TreeNode {
    /// A node with no children is a file inserted from a path.
    pub fn is_file(&self) -> bool {
        self.children.is_empty()
    }

    fn insert(&mut self, path: &str, key: String, tally: Tally, in_worktree: bool) {
        let mut node = self;
        for segment in path.split('/') {
            node = node.children.entry(segment.to_string()).or_default();
        }

        if !node.children.is_empty() {
            // A file path that is also a directory prefix elsewhere in
            // history. Rare, but git allows it across renames.
            debug!(path, "path is both file and directory in history");
        }

        node.in_worktree = in_worktree;
        match node.tallies.remove(&key) {
            Some(existing) => {
                node.tallies.insert(key, existing.combine(tally));
            }
            None => {
                node.tallies.insert(key, tally);
            }
        }
    }

    /// Post-order pass: combine children's tallies into each interior
    /// node, OR `in_worktree` upward, and pick every node's winner under
    /// `mode`.
    pub fn rank(mut self, mode: TallyMode) -> TreeNode {
        fn walk(node: &mut TreeNode, mode: TallyMode) {
            for child in node.children.values_mut() {
                walk(child, mode);
                node.in_worktree |= child.in_worktree;
            }

            // Collect child tallies first so the borrow on children ends
            // before we mutate our own map.
            let mut merged: Vec<(String, Tally)> = Vec::new();
            for child in node.children.values() {
                for (key, tally) in &child.tallies {
                    merged.push((key.clone(), tally.clone()));
                }
            }
            for (key, tally) in merged {
                match node.tallies.remove(&key) {
                    Some(existing) => {
                        node.tallies.insert(key, existing.combine(tally));
                    }
                    None => {
                        node.tallies.insert(key, tally);
                    }
                }
            }

            node.final_tally = node
                .tallies
                .values()
                .cloned()
                .map(Tally::finalize)
                .max_by(|a, b| {
                    a.compare(b, mode)
                        .then_with(|| b.author_name.cmp(&a.author_name))
                });
        }

        walk(&mut self, mode);
        self
    }

    /// Drop every subtree with no working-tree descendant. Display-only;
    /// callers wanting hidden paths simply skip this.
    pub fn prune(&mut self) {
        self.children.retain(|_, child| {
            child.prune();
            child.in_worktree
        });
    }
}

/// Assemble per-path tallies into a tree rooted at the repository root.
pub fn build_tree(
    by_path: TalliesByPath,
    worktree: &HashSet<String>,
) -> Result<TreeNode> {
    let mut root = TreeNode::default();

    for (key, path, tally) in by_path.into_entries() {
        if path == NO_DIFF_PATHNAME {
            continue;
        }

        if path.is_empty() || path.starts_with('/') {
            return Err(Error::Usage(format!("cannot tally tree path: \"{path}\"")).into());
        }

        let in_worktree = worktree.contains(&path);
        root.insert(&path, key, tally, in_worktree);
    }

    Ok(root)
}

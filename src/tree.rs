// SPDX-License-Identifier: Apache-2.0

//! Document tree: one root node plus the pool that backs it.

use crate::arena::Pool;
use crate::node::Node;

/// The unit of document ownership.
///
/// Every node reachable from the root has its heap storage in this tree's
/// pool; views handed out by the navigation API borrow the tree and are
/// invalidated by any mutation. A tree and its pool are one
/// exclusive-ownership unit: no sharing across trees, no sharing across
/// threads.
pub struct Tree {
    root: Node,
    pool: Pool,
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree").field("root", &self.root).finish()
    }
}

impl Tree {
    pub fn new() -> Self {
        Self {
            root: Node::new(),
            pool: Pool::new(),
        }
    }

    /// True while the root is still `Null`.
    pub fn is_empty(&self) -> bool {
        self.root.is_null()
    }

    /// Reset the root to `Null`, returning all node storage to the pool.
    pub fn clear(&mut self) {
        self.root.destruct(&mut self.pool);
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Split borrow for callers that mutate the root while allocating.
    pub fn split_mut(&mut self) -> (&mut Node, &mut Pool) {
        (&mut self.root, &mut self.pool)
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Tree {
    fn drop(&mut self) {
        self.clear();
    }
}

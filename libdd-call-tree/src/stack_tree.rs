// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::{CallFrame, FrameFilter, NodeId, ProfileFragment, ProfileNode, ThreadKey};
use std::collections::BTreeSet;
use std::hash::BuildHasherDefault;
use tracing::debug;

pub(crate) type FxIndexMap<K, V> =
    indexmap::IndexMap<K, V, BuildHasherDefault<rustc_hash::FxHasher>>;
pub(crate) type FxHashSet<K> =
    std::collections::HashSet<K, BuildHasherDefault<rustc_hash::FxHasher>>;

/// One node of a frozen [`StackTree`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StackNode {
    pub frame: CallFrame,
    /// `None` for roots, i.e. the bottommost frame of a stack.
    pub parent: Option<NodeId>,
    pub children: BTreeSet<NodeId>,
}

/// The merged call graph of one thread's profile, keyed by node id.
///
/// Nodes are stored in an arena and refer to each other by id, so the
/// parent/child links never form ownership cycles.
#[derive(Clone, Debug)]
pub struct StackTree {
    key: ThreadKey,
    nodes: FxIndexMap<NodeId, StackNode>,
}

impl StackTree {
    pub fn builder(key: ThreadKey, filter: FrameFilter) -> StackTreeBuilder {
        StackTreeBuilder::new(key, filter)
    }

    /// The thread whose profile this tree was built from.
    pub fn key(&self) -> ThreadKey {
        self.key
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&StackNode> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn frame(&self, id: NodeId) -> Option<&CallFrame> {
        self.get(id).map(|node| &node.frame)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|node| node.parent)
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.get(id)
            .into_iter()
            .flat_map(|node| node.children.iter().copied())
    }

    /// Nodes without a parent link, in ascending id order.
    pub fn roots(&self) -> Vec<NodeId> {
        let mut roots: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.parent.is_none())
            .map(|(id, _)| *id)
            .collect();
        roots.sort_unstable();
        roots
    }

    /// Walks from `id` towards the root, yielding `id` first. The walk stops
    /// at the first id that has no node in the tree, so a chain whose parent
    /// was filtered out ends there.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            next: Some(id),
            remaining: self.nodes.len(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &StackNode)> {
        self.nodes.iter().map(|(id, node)| (*id, node))
    }
}

pub struct Ancestors<'a> {
    tree: &'a StackTree,
    next: Option<NodeId>,
    /// Bounds the walk on malformed input whose parent links loop.
    remaining: usize,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = (NodeId, &'a StackNode);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next.take()?;
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let node = self.tree.get(id)?;
        self.next = node.parent;
        Some((id, node))
    }
}

#[derive(Debug, Default)]
struct PendingNode {
    /// Stays `None` while the node has only been seen as someone's parent.
    frame: Option<CallFrame>,
    parent: Option<NodeId>,
    children: BTreeSet<NodeId>,
}

/// Accumulates node triples from every fragment of a profile.
///
/// Fragments may arrive in any order: a node referenced as a parent before
/// its own triple shows up gets a shell entry that is filled in later. Shells
/// that are never filled in are dropped by [`StackTreeBuilder::build`].
#[derive(Debug)]
pub struct StackTreeBuilder {
    key: ThreadKey,
    filter: FrameFilter,
    nodes: FxIndexMap<NodeId, PendingNode>,
    excluded: FxHashSet<NodeId>,
}

impl StackTreeBuilder {
    pub fn new(key: ThreadKey, filter: FrameFilter) -> Self {
        Self {
            key,
            filter,
            nodes: FxIndexMap::default(),
            excluded: FxHashSet::default(),
        }
    }

    pub fn add_fragment(&mut self, fragment: &ProfileFragment) {
        if let ProfileFragment::Chunk(chunk) = fragment {
            for node in &chunk.nodes {
                self.add_node(node);
            }
        }
    }

    pub fn add_node(&mut self, node: &ProfileNode) {
        let id = node.id;
        if !self.filter.is_allowed(&node.call_frame) {
            let already_defined = self
                .nodes
                .get(&id)
                .is_some_and(|pending| pending.frame.is_some());
            if !already_defined && self.excluded.insert(id) {
                // Nobody may resolve to this id, not even children that
                // registered themselves on its shell.
                self.nodes.shift_remove(&id);
            }
            return;
        }
        if self.excluded.contains(&id) {
            return;
        }

        let pending = self.nodes.entry(id).or_default();
        if pending.frame.is_none() {
            pending.frame = Some(node.call_frame.clone());
        } else if pending.frame.as_ref() != Some(&node.call_frame) {
            debug!(node = id.0, "conflicting frame for node, keeping the first one");
        }

        if let Some(parent) = node.parent {
            if pending.parent.is_none() {
                pending.parent = Some(parent);
            }
            if !self.excluded.contains(&parent) {
                self.nodes.entry(parent).or_default().children.insert(id);
            }
        }
    }

    /// Freezes the graph.
    pub fn build(self) -> StackTree {
        let mut shells = 0usize;
        let nodes: FxIndexMap<NodeId, StackNode> = self
            .nodes
            .into_iter()
            .filter_map(|(id, pending)| match pending.frame {
                Some(frame) => Some((
                    id,
                    StackNode {
                        frame,
                        parent: pending.parent,
                        children: pending.children,
                    },
                )),
                None => {
                    shells += 1;
                    None
                }
            })
            .collect();
        debug!(
            thread = %self.key,
            nodes = nodes.len(),
            excluded = self.excluded.len(),
            undefined_parents = shells,
            "built stack tree"
        );
        StackTree {
            key: self.key,
            nodes,
        }
    }
}

//! # Scene Hierarchy
//!
//! Parent/child relations between entities, kept outside the chunk storage
//! in an index arena.
//!
//! ```text
//! nodes: [ root0 | a | b | root1 | c ]
//!
//! root0 ──first_child──> a ──next_sibling──> b
//!                        └──first_child──> c
//! root1
//! ```
//!
//! Siblings keep insertion order. Removed nodes go to a free list and their
//! index is reused by the next insert.

use crate::ecs::{EntityId, World};
use crate::error::{StoreError, StoreResult};

/// Index of a node in a [`Hierarchy`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    /// Arena index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug)]
struct Node {
    entity: EntityId,
    parent: Option<u32>,
    first_child: Option<u32>,
    next_sibling: Option<u32>,
}

/// Arena of entity nodes linked parent / first child / next sibling.
#[derive(Clone, Debug, Default)]
pub struct Hierarchy {
    nodes: Vec<Option<Node>>,
    free: Vec<u32>,
    first_root: Option<u32>,
    len: usize,
}

impl Hierarchy {
    /// Creates an empty hierarchy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if there are no nodes.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn node(&self, id: NodeId) -> StoreResult<&Node> {
        self.nodes
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(StoreError::UnknownNode(id.0))
    }

    fn node_mut(&mut self, index: u32) -> StoreResult<&mut Node> {
        self.nodes
            .get_mut(index as usize)
            .and_then(Option::as_mut)
            .ok_or(StoreError::UnknownNode(index))
    }

    /// Entity held by a node.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownNode`].
    pub fn entity(&self, node: NodeId) -> StoreResult<EntityId> {
        Ok(self.node(node)?.entity)
    }

    /// Parent of a node, `None` for roots.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownNode`].
    pub fn parent(&self, node: NodeId) -> StoreResult<Option<NodeId>> {
        Ok(self.node(node)?.parent.map(NodeId))
    }

    /// Adds `entity` as the last child of `parent` (or as the last root).
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownNode`] if `parent` is not live.
    pub fn insert(&mut self, entity: EntityId, parent: Option<NodeId>) -> StoreResult<NodeId> {
        if let Some(parent) = parent {
            self.node(parent)?;
        }
        let node = Node {
            entity,
            parent: None,
            first_child: None,
            next_sibling: None,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.nodes[index as usize] = Some(node);
                index
            }
            None => {
                self.nodes.push(Some(node));
                (self.nodes.len() - 1) as u32
            }
        };
        self.len += 1;
        self.link(index, parent.map(|p| p.0))?;
        Ok(NodeId(index))
    }

    /// Removes a node and its whole subtree. Returns the removed entities,
    /// depth-first.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownNode`].
    pub fn remove(&mut self, node: NodeId) -> StoreResult<Vec<EntityId>> {
        let subtree = self.depth_first_from(node)?;
        self.unlink(node.0)?;
        let mut entities = Vec::with_capacity(subtree.len());
        for id in subtree {
            if let Some(removed) = self.nodes[id.index()].take() {
                entities.push(removed.entity);
                self.free.push(id.0);
                self.len -= 1;
            }
        }
        Ok(entities)
    }

    /// Moves a node (with its subtree) under `parent`, or to the roots.
    ///
    /// # Errors
    ///
    /// - [`StoreError::UnknownNode`]
    /// - [`StoreError::HierarchyCycle`] if `parent` is `node` or one of its
    ///   descendants
    pub fn reparent(&mut self, node: NodeId, parent: Option<NodeId>) -> StoreResult<()> {
        self.node(node)?;
        if let Some(parent) = parent {
            self.node(parent)?;
            let mut cursor = Some(parent.0);
            while let Some(index) = cursor {
                if index == node.0 {
                    return Err(StoreError::HierarchyCycle {
                        node: node.0,
                        parent: parent.0,
                    });
                }
                cursor = self.node(NodeId(index))?.parent;
            }
        }
        self.unlink(node.0)?;
        self.link(node.0, parent.map(|p| p.0))
    }

    /// Direct children, in insertion order.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownNode`].
    pub fn children(&self, node: NodeId) -> StoreResult<Vec<NodeId>> {
        Ok(self.siblings_from(self.node(node)?.first_child))
    }

    /// Root nodes, in insertion order.
    #[must_use]
    pub fn roots(&self) -> Vec<NodeId> {
        self.siblings_from(self.first_root)
    }

    /// Every node, pre-order, roots in insertion order.
    #[must_use]
    pub fn depth_first(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.len);
        for root in self.roots() {
            self.walk(root.0, &mut order);
        }
        order
    }

    /// The subtree of `node`, pre-order.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownNode`].
    pub fn depth_first_from(&self, node: NodeId) -> StoreResult<Vec<NodeId>> {
        self.node(node)?;
        let mut order = Vec::new();
        self.walk(node.0, &mut order);
        Ok(order)
    }

    /// Expands every node into one `(entity, instance)` pair per instance,
    /// in depth-first order. Nodes whose entity is dead are skipped.
    #[must_use]
    pub fn flatten(&self, world: &World) -> Vec<(EntityId, u32)> {
        let mut out = Vec::new();
        for id in self.depth_first() {
            let Ok(entity) = self.entity(id) else {
                continue;
            };
            match world.get_entity_instance_count(entity) {
                Ok(count) => out.extend((0..count).map(|instance| (entity, instance))),
                Err(_) => tracing::trace!("Skipping dead entity {:?} in hierarchy", entity),
            }
        }
        out
    }

    // =========================================================================
    // Links
    // =========================================================================

    fn siblings_from(&self, first: Option<u32>) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cursor = first;
        while let Some(index) = cursor {
            out.push(NodeId(index));
            cursor = self.nodes[index as usize].as_ref().and_then(|n| n.next_sibling);
        }
        out
    }

    fn walk(&self, index: u32, order: &mut Vec<NodeId>) {
        let mut stack = vec![index];
        while let Some(index) = stack.pop() {
            order.push(NodeId(index));
            let children = self.siblings_from(
                self.nodes[index as usize].as_ref().and_then(|n| n.first_child),
            );
            stack.extend(children.into_iter().rev().map(|c| c.0));
        }
    }

    /// Appends a detached node to the child list of `parent` (or the roots).
    fn link(&mut self, index: u32, parent: Option<u32>) -> StoreResult<()> {
        let first = match parent {
            Some(p) => self.node_mut(p)?.first_child,
            None => self.first_root,
        };
        match self.siblings_from(first).last() {
            Some(last) => self.node_mut(last.0)?.next_sibling = Some(index),
            None => match parent {
                Some(p) => self.node_mut(p)?.first_child = Some(index),
                None => self.first_root = Some(index),
            },
        }
        let node = self.node_mut(index)?;
        node.parent = parent;
        node.next_sibling = None;
        Ok(())
    }

    /// Detaches a node from its sibling list. Its subtree stays attached.
    fn unlink(&mut self, index: u32) -> StoreResult<()> {
        let (parent, next) = {
            let node = self.node_mut(index)?;
            (node.parent, node.next_sibling)
        };
        let first = match parent {
            Some(p) => self.node_mut(p)?.first_child,
            None => self.first_root,
        };
        if first == Some(index) {
            match parent {
                Some(p) => self.node_mut(p)?.first_child = next,
                None => self.first_root = next,
            }
        } else {
            let previous = self
                .siblings_from(first)
                .into_iter()
                .find(|s| self.nodes[s.index()].as_ref().and_then(|n| n.next_sibling) == Some(index));
            if let Some(previous) = previous {
                self.node_mut(previous.0)?.next_sibling = next;
            }
        }
        let node = self.node_mut(index)?;
        node.parent = None;
        node.next_sibling = None;
        Ok(())
    }
}

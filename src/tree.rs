use glam::Mat4;

use crate::chain::MeshAllocation;
use crate::shader_info::SlotRef;

/// Sentinel for "no node" / "no command" in arena links.
pub(crate) const INVALID: u32 = u32::MAX;

/// Sentinel marking the tail entry of a dirty queue, distinct from
/// [`INVALID`] so "queued last" and "not queued" never get confused.
pub(crate) const DIRTY_TAIL: u32 = u32::MAX - 1;

/// Number of independent dirty categories (clip, transform, visuals).
pub(crate) const DIRTY_CATEGORIES: usize = 3;

/// Handle to the render state of one external element. Handed out when the
/// element enters the chain and stored by the external tree as its
/// back-reference; stale handles fail validation and events carrying them
/// are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// How an element constrains the drawing of its descendants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClipMethod {
    #[default]
    NotClipped,
    Scissor,
    ShaderDiscard,
    Stencil,
}

/// Per-node booleans. `stencil_clipped` is the inherited "some ancestor
/// masks via stencil" state; the rest are local.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeFlags {
    pub stencil_clipped: bool,
    pub hierarchy_hidden: bool,
    pub uses_atlas: bool,
    pub uses_text: bool,
    pub nudge_disabled: bool,
    pub group_transform: bool,
    pub skinned: bool,
}

/// Render state for one element: topology mirror, flattened-view links,
/// dirty-queue links, command run boundaries, and GPU-side ownership.
#[derive(Debug)]
pub(crate) struct Node {
    pub parent: u32,
    pub first_child: u32,
    pub last_child: u32,
    pub prev_sibling: u32,
    pub next_sibling: u32,

    /// Depth-first doubly linked view of the whole forest, kept consistent
    /// with topology on every insert/remove/reorder.
    pub flat_prev: u32,
    pub flat_next: u32,

    /// Intrusive singly linked dirty queues, one link per category.
    pub next_dirty: [u32; DIRTY_CATEGORIES],
    /// Generation stamp of the last drain pass that visited this node.
    pub dirty_id: u32,
    /// Whether a queued visuals entry asks for a hierarchical repaint.
    pub pending_hierarchical: bool,

    /// Opening command run (INVALID when the element owns no commands).
    pub first_command: u32,
    pub last_command: u32,
    /// Closing run; exists only when an opening run exists.
    pub first_closing: u32,
    pub last_closing: u32,

    pub mesh: Option<MeshAllocation>,
    /// Index range of the stencil mask draw inside the mesh, reused by the
    /// closing run to lower the stencil again.
    pub mask_range: Option<(u32, u32)>,
    pub transform_slot: SlotRef,
    pub clip_slot: SlotRef,
    pub clip_method: ClipMethod,
    pub flags: NodeFlags,

    /// World transform baked into the vertices at last paint; the nudge
    /// delta is computed against it.
    pub paint_transform: Mat4,
    /// Bumped when a transform-group root moves; consumed by the text queue.
    pub group_epoch: u32,
}

impl Node {
    fn new() -> Self {
        Self {
            parent: INVALID,
            first_child: INVALID,
            last_child: INVALID,
            prev_sibling: INVALID,
            next_sibling: INVALID,
            flat_prev: INVALID,
            flat_next: INVALID,
            next_dirty: [INVALID; DIRTY_CATEGORIES],
            dirty_id: 0,
            pending_hierarchical: false,
            first_command: INVALID,
            last_command: INVALID,
            first_closing: INVALID,
            last_closing: INVALID,
            mesh: None,
            mask_range: None,
            transform_slot: SlotRef::None,
            clip_slot: SlotRef::None,
            clip_method: ClipMethod::NotClipped,
            flags: NodeFlags::default(),
            paint_transform: Mat4::IDENTITY,
            group_epoch: 0,
        }
    }

    pub fn has_commands(&self) -> bool {
        self.first_command != INVALID
    }
}

/// Arena of render states mirroring the external element tree. Freed
/// slots are recycled through a free list; generation counters make stale
/// [`NodeId`]s detectable so late events can be ignored.
pub struct RenderTree {
    nodes: Vec<Node>,
    generations: Vec<u32>,
    free_list: Vec<u32>,
    roots: Vec<u32>,
    flat_head: u32,
    live: usize,
}

impl RenderTree {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            generations: Vec::new(),
            free_list: Vec::new(),
            roots: Vec::new(),
            flat_head: INVALID,
            live: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn is_alive(&self, id: NodeId) -> bool {
        (id.index as usize) < self.generations.len()
            && self.generations[id.index as usize] == id.generation
    }

    /// Validated arena index, or `None` for stale handles.
    pub(crate) fn index_of(&self, id: NodeId) -> Option<u32> {
        if self.is_alive(id) {
            Some(id.index)
        } else {
            None
        }
    }

    pub(crate) fn id_at(&self, index: u32) -> NodeId {
        NodeId {
            index,
            generation: self.generations[index as usize],
        }
    }

    pub(crate) fn node(&self, index: u32) -> &Node {
        &self.nodes[index as usize]
    }

    pub(crate) fn node_mut(&mut self, index: u32) -> &mut Node {
        &mut self.nodes[index as usize]
    }

    pub(crate) fn flat_head(&self) -> u32 {
        self.flat_head
    }

    pub(crate) fn root_indices(&self) -> &[u32] {
        &self.roots
    }

    /// Creates render state for an element entering the chain as the
    /// `index`-th child of `parent` (or the `index`-th root).
    pub fn create(&mut self, parent: Option<NodeId>, index: usize) -> Option<NodeId> {
        let parent_index = match parent {
            Some(id) => Some(self.index_of(id)?),
            None => None,
        };

        let new_index = if let Some(recycled) = self.free_list.pop() {
            self.nodes[recycled as usize] = Node::new();
            recycled
        } else {
            self.nodes.push(Node::new());
            self.generations.push(0);
            self.nodes.len() as u32 - 1
        };
        self.live += 1;

        // Topology splice.
        let flat_pred = match parent_index {
            Some(parent_idx) => {
                let clamped = index.min(self.child_count(parent_idx));
                self.link_child(parent_idx, new_index, clamped);
                if clamped == 0 {
                    parent_idx
                } else {
                    self.subtree_last(self.nth_child_before(parent_idx, clamped))
                }
            }
            None => {
                let clamped = index.min(self.roots.len());
                self.roots.insert(clamped, new_index);
                if clamped == 0 {
                    INVALID
                } else {
                    self.subtree_last(self.roots[clamped - 1])
                }
            }
        };
        self.flat_link_run_after(flat_pred, new_index, new_index);

        Some(self.id_at(new_index))
    }

    /// Removes an element and its whole subtree from the mirror. Returns
    /// the removed arena indices in depth-first order so the caller can
    /// release commands, meshes, and slots before the slots recycle.
    /// Stale handles return an empty vec (idempotent removal).
    pub fn remove(&mut self, id: NodeId) -> Vec<u32> {
        let Some(index) = self.index_of(id) else {
            return Vec::new();
        };
        let subtree = self.subtree_indices(index);
        let last = self.subtree_last(index);

        // Unlink from parent's child list or from the root list.
        let parent = self.nodes[index as usize].parent;
        if parent == INVALID {
            self.roots.retain(|&root| root != index);
        } else {
            self.unlink_child(parent, index);
        }
        self.flat_unlink_run(index, last);

        for &node_index in &subtree {
            self.generations[node_index as usize] += 1;
            self.free_list.push(node_index);
            self.live -= 1;
        }
        subtree
    }

    /// Reorders `parent`'s children to match `order`, re-splicing each
    /// child's subtree run in the flattened view. Ignores the event unless
    /// `order` is exactly the current child set.
    pub fn reorder(&mut self, parent: NodeId, order: &[NodeId]) -> bool {
        let Some(parent_index) = self.index_of(parent) else {
            return false;
        };
        let current = self.children_of(parent_index);
        if current.len() != order.len() {
            return false;
        }
        let mut wanted = Vec::with_capacity(order.len());
        for id in order {
            match self.index_of(*id) {
                Some(index) if current.contains(&index) => wanted.push(index),
                _ => return false,
            }
        }

        // Detach every child run, then re-link in the requested order.
        for &child in &current {
            let last = self.subtree_last(child);
            self.flat_unlink_run(child, last);
        }
        self.nodes[parent_index as usize].first_child = INVALID;
        self.nodes[parent_index as usize].last_child = INVALID;

        let mut pred = parent_index;
        for (position, &child) in wanted.iter().enumerate() {
            self.nodes[child as usize].prev_sibling = INVALID;
            self.nodes[child as usize].next_sibling = INVALID;
            self.link_child(parent_index, child, position);
            let last = self.subtree_last(child);
            self.flat_link_run_after(pred, child, last);
            pred = last;
        }
        true
    }

    /// Arena indices of `index`'s subtree in depth-first order.
    pub(crate) fn subtree_indices(&self, index: u32) -> Vec<u32> {
        let last = self.subtree_last(index);
        let mut out = Vec::new();
        let mut cursor = index;
        loop {
            out.push(cursor);
            if cursor == last {
                break;
            }
            cursor = self.nodes[cursor as usize].flat_next;
        }
        out
    }

    /// Deepest last descendant; the end of the subtree's flattened run.
    pub(crate) fn subtree_last(&self, index: u32) -> u32 {
        let mut cursor = index;
        while self.nodes[cursor as usize].last_child != INVALID {
            cursor = self.nodes[cursor as usize].last_child;
        }
        cursor
    }

    pub(crate) fn is_ancestor(&self, ancestor: u32, node: u32) -> bool {
        let mut cursor = self.nodes[node as usize].parent;
        while cursor != INVALID {
            if cursor == ancestor {
                return true;
            }
            cursor = self.nodes[cursor as usize].parent;
        }
        false
    }

    pub(crate) fn children_of(&self, index: u32) -> Vec<u32> {
        let mut out = Vec::new();
        let mut cursor = self.nodes[index as usize].first_child;
        while cursor != INVALID {
            out.push(cursor);
            cursor = self.nodes[cursor as usize].next_sibling;
        }
        out
    }

    fn child_count(&self, index: u32) -> usize {
        let mut count = 0;
        let mut cursor = self.nodes[index as usize].first_child;
        while cursor != INVALID {
            count += 1;
            cursor = self.nodes[cursor as usize].next_sibling;
        }
        count
    }

    /// The child occupying position `position - 1`, used to find the flat
    /// predecessor when inserting at `position`.
    fn nth_child_before(&self, parent: u32, position: usize) -> u32 {
        let mut cursor = self.nodes[parent as usize].first_child;
        for _ in 0..position.saturating_sub(1) {
            cursor = self.nodes[cursor as usize].next_sibling;
        }
        cursor
    }

    fn link_child(&mut self, parent: u32, child: u32, position: usize) {
        self.nodes[child as usize].parent = parent;
        let mut before = INVALID;
        let mut after = self.nodes[parent as usize].first_child;
        for _ in 0..position {
            before = after;
            after = self.nodes[after as usize].next_sibling;
        }
        self.nodes[child as usize].prev_sibling = before;
        self.nodes[child as usize].next_sibling = after;
        if before == INVALID {
            self.nodes[parent as usize].first_child = child;
        } else {
            self.nodes[before as usize].next_sibling = child;
        }
        if after == INVALID {
            self.nodes[parent as usize].last_child = child;
        } else {
            self.nodes[after as usize].prev_sibling = child;
        }
    }

    fn unlink_child(&mut self, parent: u32, child: u32) {
        let before = self.nodes[child as usize].prev_sibling;
        let after = self.nodes[child as usize].next_sibling;
        if before == INVALID {
            self.nodes[parent as usize].first_child = after;
        } else {
            self.nodes[before as usize].next_sibling = after;
        }
        if after == INVALID {
            self.nodes[parent as usize].last_child = before;
        } else {
            self.nodes[after as usize].prev_sibling = before;
        }
        self.nodes[child as usize].parent = INVALID;
        self.nodes[child as usize].prev_sibling = INVALID;
        self.nodes[child as usize].next_sibling = INVALID;
    }

    fn flat_link_run_after(&mut self, pred: u32, first: u32, last: u32) {
        let next = if pred == INVALID {
            let old_head = self.flat_head;
            self.flat_head = first;
            old_head
        } else {
            let next = self.nodes[pred as usize].flat_next;
            self.nodes[pred as usize].flat_next = first;
            next
        };
        self.nodes[first as usize].flat_prev = pred;
        self.nodes[last as usize].flat_next = next;
        if next != INVALID {
            self.nodes[next as usize].flat_prev = last;
        }
    }

    fn flat_unlink_run(&mut self, first: u32, last: u32) {
        let before = self.nodes[first as usize].flat_prev;
        let after = self.nodes[last as usize].flat_next;
        if before == INVALID {
            self.flat_head = after;
        } else {
            self.nodes[before as usize].flat_next = after;
        }
        if after != INVALID {
            self.nodes[after as usize].flat_prev = before;
        }
        self.nodes[first as usize].flat_prev = INVALID;
        self.nodes[last as usize].flat_next = INVALID;
    }
}

impl Default for RenderTree {
    fn default() -> Self {
        Self::new()
    }
}

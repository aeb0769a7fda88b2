//! The persistent command chain and mesh-buffer bookkeeping.
//!
//! Commands live in an arena and stay linked in depth-first element order
//! across frames; per-element runs are spliced in and out without
//! rebuilding the chain. Mesh uploads reuse existing device buffers when
//! capacity allows, and pure transform changes go through the in-place
//! vertex "nudge" instead of retessellation.

use std::fmt;

use glam::{Mat4, Vec3};

use crate::renderer::{DrawState, GraphicsDevice, MeshId, SlotId};
use crate::tree::{RenderTree, INVALID};
use crate::utils::{mat4_max_abs_diff, Rectangle, Vertex, NUDGE_EPSILON};

/// One draw over a contiguous index range of an element's mesh.
#[derive(Debug, Clone, Copy)]
pub struct DrawCommand {
    pub mesh: MeshId,
    pub first_index: u32,
    pub index_count: u32,
    pub state: DrawState,
}

pub type ImmediateCallback = Box<dyn Fn(&mut dyn GraphicsDevice)>;

pub enum CommandKind {
    Draw(DrawCommand),
    PushView(SlotId),
    PopView,
    PushScissor(Rectangle),
    PopScissor,
    Immediate(ImmediateCallback),
}

impl fmt::Debug for CommandKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::Draw(draw) => formatter.debug_tuple("Draw").field(draw).finish(),
            CommandKind::PushView(slot) => formatter.debug_tuple("PushView").field(slot).finish(),
            CommandKind::PopView => formatter.write_str("PopView"),
            CommandKind::PushScissor(rect) => {
                formatter.debug_tuple("PushScissor").field(rect).finish()
            }
            CommandKind::PopScissor => formatter.write_str("PopScissor"),
            CommandKind::Immediate(_) => formatter.write_str("Immediate"),
        }
    }
}

#[derive(Debug)]
struct CommandNode {
    prev: u32,
    next: u32,
    owner: u32,
    kind: CommandKind,
}

#[derive(Debug)]
enum Slot {
    Occupied(CommandNode),
    Free(u32),
}

/// Doubly linked command sequence in an index arena. The front of the
/// chain is the first command drawn.
pub struct CommandChain {
    slots: Vec<Slot>,
    head: u32,
    free_head: u32,
    len: usize,
}

impl CommandChain {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            head: INVALID,
            free_head: INVALID,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn node(&self, id: u32) -> &CommandNode {
        match &self.slots[id as usize] {
            Slot::Occupied(node) => node,
            Slot::Free(_) => unreachable!("command id {id} points at a freed slot"),
        }
    }

    fn node_mut(&mut self, id: u32) -> &mut CommandNode {
        match &mut self.slots[id as usize] {
            Slot::Occupied(node) => node,
            Slot::Free(_) => unreachable!("command id {id} points at a freed slot"),
        }
    }

    /// Inserts a command after `anchor` (`INVALID` = chain front) and
    /// returns its id.
    pub(crate) fn insert_after(&mut self, anchor: u32, owner: u32, kind: CommandKind) -> u32 {
        let id = match self.free_head {
            INVALID => {
                self.slots.push(Slot::Free(INVALID));
                self.slots.len() as u32 - 1
            }
            recycled => {
                self.free_head = match &self.slots[recycled as usize] {
                    Slot::Free(next) => *next,
                    Slot::Occupied(_) => unreachable!("free list entry is occupied"),
                };
                recycled
            }
        };

        let next = if anchor == INVALID {
            let old_head = self.head;
            self.head = id;
            old_head
        } else {
            let next = self.node(anchor).next;
            self.node_mut(anchor).next = id;
            next
        };
        if next != INVALID {
            self.node_mut(next).prev = id;
        }
        self.slots[id as usize] = Slot::Occupied(CommandNode {
            prev: anchor,
            next,
            owner,
            kind,
        });
        self.len += 1;
        id
    }

    pub(crate) fn remove(&mut self, id: u32) {
        let (prev, next) = {
            let node = self.node(id);
            (node.prev, node.next)
        };
        if prev == INVALID {
            self.head = next;
        } else {
            self.node_mut(prev).next = next;
        }
        if next != INVALID {
            self.node_mut(next).prev = prev;
        }
        self.slots[id as usize] = Slot::Free(self.free_head);
        self.free_head = id;
        self.len -= 1;
    }

    /// Removes the inclusive run `first..=last` (must be linked in order).
    pub(crate) fn remove_run(&mut self, first: u32, last: u32) {
        let mut cursor = first;
        loop {
            let next = self.node(cursor).next;
            let done = cursor == last;
            self.remove(cursor);
            if done {
                break;
            }
            debug_assert!(next != INVALID, "command run ended before its last entry");
            cursor = next;
        }
    }

    /// Forgets every command without unlinking. Device-loss path: the
    /// referenced meshes are already gone.
    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.head = INVALID;
        self.free_head = INVALID;
        self.len = 0;
    }

    /// Walks the chain front to back issuing device calls in order.
    pub fn execute(&self, device: &mut dyn GraphicsDevice) {
        let mut cursor = self.head;
        while cursor != INVALID {
            let node = self.node(cursor);
            match &node.kind {
                CommandKind::Draw(draw) => {
                    device.draw_indexed(draw.mesh, draw.first_index, draw.index_count, &draw.state);
                }
                CommandKind::PushView(slot) => device.push_view(*slot),
                CommandKind::PopView => device.pop_view(),
                CommandKind::PushScissor(rect) => device.push_scissor(*rect),
                CommandKind::PopScissor => device.pop_scissor(),
                CommandKind::Immediate(callback) => callback(device),
            }
            cursor = node.next;
        }
    }

    /// Front-to-back (owner, kind) walk, mostly for assertions on order.
    pub(crate) fn iter(&self) -> ChainIter<'_> {
        ChainIter {
            chain: self,
            cursor: self.head,
        }
    }
}

impl Default for CommandChain {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct ChainIter<'a> {
    chain: &'a CommandChain,
    cursor: u32,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = (u32, &'a CommandKind);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == INVALID {
            return None;
        }
        let node = self.chain.node(self.cursor);
        self.cursor = node.next;
        Some((node.owner, &node.kind))
    }
}

/// Last command the chain holds for `index`, closing run included.
fn last_command_of(tree: &RenderTree, index: u32) -> u32 {
    let node = tree.node(index);
    if node.last_closing != INVALID {
        node.last_closing
    } else {
        node.last_command
    }
}

/// Finds the command after which `node`'s opening run belongs.
///
/// Walks the flattened view backwards to the nearest element that owns
/// commands: amortized O(1) for the sibling case, O(depth) when the
/// nearest owner is an ancestor, and a bounded linear scan only when
/// skipping into a command-free cousin subtree. Returns `INVALID` when
/// the run belongs at the chain front.
pub(crate) fn find_opening_anchor(tree: &RenderTree, node: u32) -> u32 {
    let mut prev = tree.node(node).flat_prev;
    while prev != INVALID && !tree.node(prev).has_commands() {
        prev = tree.node(prev).flat_prev;
    }
    if prev == INVALID {
        return INVALID;
    }
    if tree.is_ancestor(prev, node) {
        // Inside the ancestor's bracket: right after its opening run.
        return tree.node(prev).last_command;
    }
    // `prev` sits in a finished sibling/cousin subtree. Skip past the
    // closing runs of its ancestors up to (exclusive) the common ancestor.
    let mut anchor = last_command_of(tree, prev);
    let mut ancestor = tree.node(prev).parent;
    while ancestor != INVALID && !tree.is_ancestor(ancestor, node) {
        if tree.node(ancestor).last_closing != INVALID {
            anchor = tree.node(ancestor).last_closing;
        }
        ancestor = tree.node(ancestor).parent;
    }
    anchor
}

/// Finds the command after which `node`'s closing run belongs: after the
/// last command inside its subtree, else after its own opening run.
pub(crate) fn find_closing_anchor(tree: &RenderTree, node: u32) -> u32 {
    let last = tree.subtree_last(node);
    let mut cursor = last;
    while cursor != node && !tree.node(cursor).has_commands() {
        cursor = tree.node(cursor).flat_prev;
    }
    if cursor == node {
        return tree.node(node).last_command;
    }
    let mut anchor = last_command_of(tree, cursor);
    let mut ancestor = tree.node(cursor).parent;
    while ancestor != node && ancestor != INVALID {
        if tree.node(ancestor).last_closing != INVALID {
            anchor = tree.node(ancestor).last_closing;
        }
        ancestor = tree.node(ancestor).parent;
    }
    anchor
}

/// A mesh region owned by exactly one element.
#[derive(Debug, Clone, Copy)]
pub struct MeshAllocation {
    pub mesh: MeshId,
    pub vertex_capacity: u32,
    pub index_capacity: u32,
    pub vertex_count: u32,
    pub index_count: u32,
}

/// Whether an upload fit the existing buffer or forced a reallocation.
/// Tracked separately so diagnostics and tests can tell the paths apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshUpdate {
    InPlace,
    Reallocated,
}

/// Uploads geometry, reusing `existing` when its capacity suffices.
pub(crate) fn upload_mesh(
    device: &mut dyn GraphicsDevice,
    existing: Option<MeshAllocation>,
    vertices: &[Vertex],
    indices: &[u16],
) -> (MeshAllocation, MeshUpdate) {
    let vertex_count = vertices.len() as u32;
    let index_count = indices.len() as u32;
    if let Some(mut allocation) = existing {
        if allocation.vertex_capacity >= vertex_count && allocation.index_capacity >= index_count {
            device.update_mesh(allocation.mesh, vertices, indices);
            allocation.vertex_count = vertex_count;
            allocation.index_count = index_count;
            return (allocation, MeshUpdate::InPlace);
        }
        device.free_mesh(allocation.mesh);
    }
    let mesh = device.allocate_mesh(vertex_count, index_count);
    device.update_mesh(mesh, vertices, indices);
    (
        MeshAllocation {
            mesh,
            vertex_capacity: vertex_count,
            index_capacity: index_count,
            vertex_count,
            index_count,
        },
        MeshUpdate::Reallocated,
    )
}

/// Re-transforms existing vertices in place for a transform-only change.
///
/// Computes the delta `new * old⁻¹`, then verifies that reapplying it to
/// the old transform reproduces the requested one within
/// [`NUDGE_EPSILON`]; on any doubt the caller falls back to a full
/// repaint rather than shipping wrong geometry.
pub(crate) fn try_nudge(
    device: &mut dyn GraphicsDevice,
    allocation: &MeshAllocation,
    old_transform: &Mat4,
    new_transform: &Mat4,
) -> bool {
    let inverse = old_transform.inverse();
    if !inverse.is_finite() {
        return false;
    }
    let delta = *new_transform * inverse;
    let reconstructed = delta * *old_transform;
    if mat4_max_abs_diff(&reconstructed, new_transform) > NUDGE_EPSILON {
        return false;
    }

    let vertices = device.vertices_mut(allocation.mesh);
    if vertices.len() < allocation.vertex_count as usize {
        return false;
    }
    for vertex in &mut vertices[..allocation.vertex_count as usize] {
        let position = delta.transform_point3(Vec3::from_array(vertex.position));
        vertex.position = position.to_array();
        if vertex.displacement != 0.0 {
            let moved = delta.transform_vector3(Vec3::new(
                vertex.tex_coords[0],
                vertex.tex_coords[1],
                0.0,
            ));
            vertex.tex_coords = [moved.x, moved.y];
        }
    }
    true
}

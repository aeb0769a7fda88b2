//! Retained-mode UI rendering core.
//!
//! Converts a hierarchy of styled elements into GPU-ready draw commands,
//! incrementally: an external tree signals changes, three dirty queues
//! drain once per frame, and only the affected elements re-derive their
//! clipping, transforms, and geometry. The resulting persistent command
//! chain is handed to a [`GraphicsDevice`] for drawing.
//!
//! The element tree, layout/style resolution, text shaping, and the GPU
//! backend are external collaborators behind traits; this crate owns the
//! bookkeeping in between.

pub mod chain;
pub mod painter;
pub mod renderer;
pub mod scheduler;
pub mod shader_info;
pub mod tessellation;
pub mod text;
pub mod texture_atlas;
pub mod traits;
pub mod tree;
pub mod utils;

use chain::CommandChain;
use painter::FrameCtx;
use scheduler::{RenderScheduler, CLIP, VISUALS};
use shader_info::{SlotAllocator, SlotRef};
use text::TextUpdateQueue;
use texture_atlas::AtlasManager;
use tree::{RenderTree, INVALID};

pub use chain::{CommandKind, DrawCommand, ImmediateCallback, MeshAllocation, MeshUpdate};
pub use painter::PaintContext;
pub use renderer::{
    AtlasBlit, ColorSpace, DeviceCaps, DeviceOp, DrawState, FilterMode, GraphicsDevice, MeshId,
    NullDevice, PixelFormat, SlotId, SlotKind, StencilMode, TextureBinding, TextureInfo, WrapMode,
};
pub use text::{ShapedQuad, TextRequest, TextShaper};
pub use traits::{ClipInfo, ElementSource, RenderHints};
pub use tree::{ClipMethod, NodeId};
pub use utils::{Position, Rectangle, Size, TransformUniform, UVTransform, Vertex};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("unknown pixel format {0:?} cannot be atlased")]
    UnknownPixelFormat(PixelFormat),
}

/// Cumulative diagnostics counters, readable by an external overlay.
/// Not required for correctness; call [`RenderCore::reset_stats`] to
/// start a fresh window.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct FrameStats {
    pub elements_added: usize,
    pub elements_removed: usize,
    pub mesh_allocations: usize,
    pub mesh_updates: usize,
    pub nudges_applied: usize,
    pub nudges_rejected: usize,
    pub tessellations: usize,
    pub commands_inserted: usize,
    pub commands_removed: usize,
    pub recursive_clip_updates: usize,
    pub text_elements_processed: usize,
    pub atlas_blits_committed: usize,
}

/// The rendering core: render-state tree, dirty scheduler, command chain,
/// texture atlas, and shader-info slot allocators, wired together behind
/// the inbound event API.
///
/// Single-threaded and frame-stepped: events merely append to dirty
/// queues; all GPU-visible work happens inside [`update`](Self::update),
/// and [`draw`](Self::draw) walks the finished chain.
pub struct RenderCore {
    tree: RenderTree,
    chain: CommandChain,
    scheduler: RenderScheduler,
    atlas: AtlasManager,
    transforms: SlotAllocator,
    clips: SlotAllocator,
    text: TextUpdateQueue,
    stats: FrameStats,
    caps: DeviceCaps,
    pending_mesh_frees: Vec<MeshId>,
}

impl RenderCore {
    pub fn new(caps: DeviceCaps, color_space: ColorSpace) -> Self {
        let max_image_size = (caps.max_atlas_size / 4).max(64);
        Self {
            tree: RenderTree::new(),
            chain: CommandChain::new(),
            scheduler: RenderScheduler::new(),
            atlas: AtlasManager::new(color_space, max_image_size),
            transforms: SlotAllocator::new(SlotKind::Transform),
            clips: SlotAllocator::new(SlotKind::Clip),
            text: TextUpdateQueue::new(),
            stats: FrameStats::default(),
            caps,
            pending_mesh_frees: Vec::new(),
        }
    }

    /* INBOUND TREE EVENTS */

    /// An element entered the tree as the `index`-th child of `parent`
    /// (`None` for a root). Returns the handle the external element keeps
    /// as its render-state back-reference, or `None` when `parent` is
    /// stale.
    pub fn on_child_added(&mut self, parent: Option<NodeId>, index: usize) -> Option<NodeId> {
        let id = self.tree.create(parent, index)?;
        let node_index = self.tree.index_of(id)?;
        self.stats.elements_added += 1;
        self.scheduler.queue(&mut self.tree, node_index, CLIP);
        self.scheduler
            .queue(&mut self.tree, node_index, scheduler::TRANSFORM);
        self.scheduler.queue(&mut self.tree, node_index, VISUALS);
        Some(id)
    }

    /// An element (and its subtree) is leaving the tree. Commands unlink
    /// immediately; device-side meshes are released at the start of the
    /// next update, since no device is at hand between frames. Stale
    /// handles are ignored.
    pub fn on_child_removing(&mut self, child: NodeId) {
        let Some(index) = self.tree.index_of(child) else {
            return;
        };
        let subtree = self.tree.subtree_indices(index);
        self.scheduler.purge(&mut self.tree, &subtree);
        for &node_index in &subtree {
            painter::strip_commands(&mut self.tree, &mut self.chain, node_index, &mut self.stats);
            let (mesh, transform_slot, clip_slot) = {
                let node = self.tree.node_mut(node_index);
                (
                    node.mesh.take(),
                    std::mem::take(&mut node.transform_slot),
                    std::mem::take(&mut node.clip_slot),
                )
            };
            if let Some(allocation) = mesh {
                self.pending_mesh_frees.push(allocation.mesh);
            }
            if let SlotRef::Owned(slot) = transform_slot {
                self.transforms.free(slot);
            }
            if let SlotRef::Owned(slot) = clip_slot {
                self.clips.free(slot);
            }
        }
        self.stats.elements_removed += subtree.len();
        self.tree.remove(child);
    }

    /// `parent`'s children were reordered into `order`. The flattened
    /// view re-splices and the subtree repaints so the chain follows the
    /// new depth-first order.
    pub fn on_children_reordered(&mut self, parent: NodeId, order: &[NodeId]) {
        let Some(parent_index) = self.tree.index_of(parent) else {
            return;
        };
        if !self.tree.reorder(parent, order) {
            return;
        }
        for node_index in self.tree.subtree_indices(parent_index) {
            painter::strip_commands(&mut self.tree, &mut self.chain, node_index, &mut self.stats);
        }
        self.tree.node_mut(parent_index).pending_hierarchical = true;
        self.scheduler.queue(&mut self.tree, parent_index, VISUALS);
    }

    pub fn on_transform_or_size_changed(&mut self, element: NodeId) {
        if let Some(index) = self.tree.index_of(element) {
            self.scheduler
                .queue(&mut self.tree, index, scheduler::TRANSFORM);
        }
    }

    pub fn on_clipping_changed(&mut self, element: NodeId) {
        if let Some(index) = self.tree.index_of(element) {
            self.scheduler.queue(&mut self.tree, index, CLIP);
        }
    }

    pub fn on_visuals_changed(&mut self, element: NodeId, hierarchical: bool) {
        if let Some(index) = self.tree.index_of(element) {
            if hierarchical {
                self.tree.node_mut(index).pending_hierarchical = true;
            }
            self.scheduler.queue(&mut self.tree, index, VISUALS);
        }
    }

    /// The standard shader was swapped: every element repaints.
    pub fn on_standard_shader_changed(&mut self) {
        let roots: Vec<u32> = self.tree.root_indices().to_vec();
        for root in roots {
            self.tree.node_mut(root).pending_hierarchical = true;
            self.scheduler.queue(&mut self.tree, root, VISUALS);
        }
    }

    /// The device was lost. Every GPU-owned handle is dropped without
    /// device-side frees (the backing storage is gone) and the whole tree
    /// is flagged for slot re-derivation and full repaint.
    pub fn on_device_lost(&mut self) {
        self.chain.clear();
        self.atlas.drop_page();
        self.transforms.reset();
        self.clips.reset();
        self.pending_mesh_frees.clear();

        let mut live = Vec::new();
        let mut cursor = self.tree.flat_head();
        while cursor != INVALID {
            live.push(cursor);
            let node = self.tree.node_mut(cursor);
            node.mesh = None;
            node.mask_range = None;
            node.transform_slot = SlotRef::None;
            node.clip_slot = SlotRef::None;
            node.first_command = INVALID;
            node.last_command = INVALID;
            node.first_closing = INVALID;
            node.last_closing = INVALID;
            cursor = node.flat_next;
        }
        for index in live {
            self.scheduler.queue(&mut self.tree, index, CLIP);
        }
        let roots: Vec<u32> = self.tree.root_indices().to_vec();
        for root in roots {
            self.tree.node_mut(root).pending_hierarchical = true;
            self.scheduler.queue(&mut self.tree, root, VISUALS);
        }
    }

    /* FRAME STEP */

    /// Drains the dirty queues (clip → transform → visuals → text) and
    /// commits queued atlas copies. Runs to completion; nothing mutates
    /// render state concurrently.
    pub fn update(
        &mut self,
        source: &dyn ElementSource,
        shaper: &mut dyn TextShaper,
        device: &mut dyn GraphicsDevice,
    ) {
        self.caps = device.caps();
        for mesh in self.pending_mesh_frees.drain(..) {
            device.free_mesh(mesh);
        }

        // A mid-frame atlas invalidation (grow or reset) moves UVs under
        // painted elements; one extra round flushes their repaints in the
        // same frame.
        for _ in 0..2 {
            let generation_before = self.atlas.generation();
            let mut ctx = FrameCtx {
                tree: &mut self.tree,
                chain: &mut self.chain,
                transforms: &mut self.transforms,
                clips: &mut self.clips,
                atlas: &mut self.atlas,
                text: &mut self.text,
                device: &mut *device,
                source,
                shaper: &mut *shaper,
                stats: &mut self.stats,
                caps: self.caps,
            };
            self.scheduler.process_frame(&mut ctx);
            if self.atlas.generation() == generation_before {
                break;
            }
            let mut stale = Vec::new();
            let mut cursor = self.tree.flat_head();
            while cursor != INVALID {
                if self.tree.node(cursor).flags.uses_atlas {
                    stale.push(cursor);
                }
                cursor = self.tree.node(cursor).flat_next;
            }
            for index in stale {
                self.scheduler.queue(&mut self.tree, index, VISUALS);
            }
        }

        let blits_before = self.atlas.committed_blit_count();
        self.atlas.commit(device);
        self.stats.atlas_blits_committed += self.atlas.committed_blit_count() - blits_before;
    }

    /// Hands the finished chain to the device, front to back.
    pub fn draw(&self, device: &mut dyn GraphicsDevice) {
        self.chain.execute(device);
    }

    /* HOUSEKEEPING & DIAGNOSTICS */

    /// Invalidates the texture atlas (color-space change, device
    /// reconfiguration) and repaints every element that sampled it.
    pub fn reset_atlas(&mut self, device: &mut dyn GraphicsDevice) {
        self.atlas.reset(device);
        let mut stale = Vec::new();
        let mut cursor = self.tree.flat_head();
        while cursor != INVALID {
            if self.tree.node(cursor).flags.uses_atlas {
                stale.push(cursor);
            }
            cursor = self.tree.node(cursor).flat_next;
        }
        for index in stale {
            self.scheduler.queue(&mut self.tree, index, VISUALS);
        }
    }

    /// Per-frame budget for time-sliced text regeneration.
    pub fn set_text_budget(&mut self, budget: usize) {
        self.text.set_budget(budget);
    }

    pub fn contains(&self, element: NodeId) -> bool {
        self.tree.is_alive(element)
    }

    pub fn element_count(&self) -> usize {
        self.tree.len()
    }

    pub fn command_count(&self) -> usize {
        self.chain.len()
    }

    /// Owners of every command front to back; an element appears once per
    /// command it owns. Depth-first tree order is the invariant.
    pub fn command_owners(&self) -> Vec<NodeId> {
        self.chain
            .iter()
            .map(|(owner, _)| self.tree.id_at(owner))
            .collect()
    }

    pub fn clip_method(&self, element: NodeId) -> Option<ClipMethod> {
        let index = self.tree.index_of(element)?;
        Some(self.tree.node(index).clip_method)
    }

    /// Scale epoch of a transform-group root; moves every time the group
    /// transform changes and its text reshapes.
    pub fn group_epoch(&self, element: NodeId) -> Option<u32> {
        let index = self.tree.index_of(element)?;
        Some(self.tree.node(index).group_epoch)
    }

    pub fn has_pending_work(&self) -> bool {
        self.scheduler.has_pending()
    }

    pub fn atlas(&self) -> &AtlasManager {
        &self.atlas
    }

    /// Live transform-slot allocations, borrowers excluded.
    pub fn transform_slot_count(&self) -> usize {
        self.transforms.live_slots()
    }

    pub fn clip_slot_count(&self) -> usize {
        self.clips.live_slots()
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = FrameStats::default();
    }
}

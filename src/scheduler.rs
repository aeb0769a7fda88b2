//! Dirty propagation: three singly linked queues drained once per frame.
//!
//! External tree events append elements to the clip, transform, and
//! visuals queues; one frame step drains them in that fixed order, then
//! gives the time-sliced text queue its budget. A generation stamp shared
//! across the pass keeps any element from being processed twice in one
//! drain, which is what keeps shared ancestors from going quadratic.

use crate::chain::try_nudge;
use crate::painter::{self, FrameCtx};
use crate::shader_info::SlotRef;
use crate::tree::{ClipMethod, RenderTree, DIRTY_TAIL, INVALID};
use crate::utils::{TransformUniform, SIZE_EPSILON};

pub(crate) const CLIP: usize = 0;
pub(crate) const TRANSFORM: usize = 1;
pub(crate) const VISUALS: usize = 2;

/// Depth cap for recursive clip re-walks. Deeper cascades smell like a
/// runaway layout; the subtree is escalated to a plain repaint instead of
/// hanging the frame.
const MAX_CLIP_WALK_DEPTH: u32 = 128;

pub struct RenderScheduler {
    heads: [u32; 3],
    tails: [u32; 3],
    dirty_id: u32,
}

impl RenderScheduler {
    pub fn new() -> Self {
        Self {
            heads: [INVALID; 3],
            tails: [INVALID; 3],
            dirty_id: 0,
        }
    }

    /// Appends `index` to a dirty queue unless it is already waiting there.
    pub(crate) fn queue(&mut self, tree: &mut RenderTree, index: u32, category: usize) {
        if tree.node(index).next_dirty[category] != INVALID {
            return;
        }
        tree.node_mut(index).next_dirty[category] = DIRTY_TAIL;
        if self.tails[category] == INVALID {
            self.heads[category] = index;
        } else {
            tree.node_mut(self.tails[category]).next_dirty[category] = index;
        }
        self.tails[category] = index;
    }

    /// Drops queued entries for nodes about to leave the arena, so their
    /// recycled slots cannot be visited under a stale queue link.
    pub(crate) fn purge(&mut self, tree: &mut RenderTree, removed: &[u32]) {
        for category in 0..3 {
            let entries = self.collect_queue(tree, category);
            for index in entries {
                if !removed.contains(&index) {
                    self.queue(tree, index, category);
                }
            }
        }
    }

    /// Unlinks and returns the whole queue for `category`, in order.
    fn collect_queue(&mut self, tree: &mut RenderTree, category: usize) -> Vec<u32> {
        let mut out = Vec::new();
        let mut cursor = self.heads[category];
        while cursor != INVALID && cursor != DIRTY_TAIL {
            let next = tree.node(cursor).next_dirty[category];
            tree.node_mut(cursor).next_dirty[category] = INVALID;
            out.push(cursor);
            cursor = next;
        }
        self.heads[category] = INVALID;
        self.tails[category] = INVALID;
        out
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.heads.iter().any(|head| *head != INVALID)
    }

    /// One frame step: clip, then transform, then visuals, then the text
    /// budget.
    pub(crate) fn process_frame(&mut self, ctx: &mut FrameCtx<'_>) {
        self.drain_clip(ctx);
        self.drain_transform(ctx);
        self.drain_visuals(ctx);
        self.drain_text(ctx);
    }

    fn drain_clip(&mut self, ctx: &mut FrameCtx<'_>) {
        self.dirty_id = self.dirty_id.wrapping_add(1);
        for index in self.collect_queue(ctx.tree, CLIP) {
            if ctx.tree.node(index).dirty_id != self.dirty_id {
                self.process_clip(ctx, index, 0);
            }
        }
    }

    fn drain_transform(&mut self, ctx: &mut FrameCtx<'_>) {
        self.dirty_id = self.dirty_id.wrapping_add(1);
        for index in self.collect_queue(ctx.tree, TRANSFORM) {
            if ctx.tree.node(index).dirty_id != self.dirty_id {
                self.walk_transform(ctx, index, true);
            }
        }
    }

    fn drain_visuals(&mut self, ctx: &mut FrameCtx<'_>) {
        self.dirty_id = self.dirty_id.wrapping_add(1);
        for index in self.collect_queue(ctx.tree, VISUALS) {
            if ctx.tree.node(index).dirty_id != self.dirty_id {
                let hierarchical = ctx.tree.node(index).pending_hierarchical;
                ctx.tree.node_mut(index).pending_hierarchical = false;
                self.process_visuals(ctx, index, hierarchical);
            }
        }
    }

    fn drain_text(&mut self, ctx: &mut FrameCtx<'_>) {
        if ctx.text.sync_atlas_generation(ctx.shaper.atlas_generation()) {
            // Font atlas rebuilt: every text element regenerates, starting
            // over from index zero.
            let mut cursor = ctx.tree.flat_head();
            while cursor != INVALID {
                if ctx.tree.node(cursor).flags.uses_text {
                    let id = ctx.tree.id_at(cursor);
                    ctx.text.enqueue(id);
                }
                cursor = ctx.tree.node(cursor).flat_next;
            }
        }
        for id in ctx.text.take_batch() {
            painter::repaint_for_text(ctx, id);
        }
    }

    /// Clip pass for one element: derive the clip method, reconcile slot
    /// ownership, and re-walk descendants when inherited state moved.
    fn process_clip(&mut self, ctx: &mut FrameCtx<'_>, index: u32, depth: u32) {
        if depth > MAX_CLIP_WALK_DEPTH {
            log::warn!("clip re-walk exceeded depth {MAX_CLIP_WALK_DEPTH}; repainting subtree");
            ctx.tree.node_mut(index).pending_hierarchical = true;
            self.queue(ctx.tree, index, VISUALS);
            return;
        }
        ctx.tree.node_mut(index).dirty_id = self.dirty_id;
        let id = ctx.tree.id_at(index);
        let hints = ctx.source.hints(id);
        let info = ctx.source.clip_info(id);

        {
            let flags = &mut ctx.tree.node_mut(index).flags;
            flags.group_transform = hints.group_transform;
            flags.skinned = hints.skinned;
            flags.nudge_disabled = hints.no_nudging;
        }

        // Rounded shapes can only be masked; flat rects prefer fragment
        // discard and fall back to scissoring when the device cannot clip
        // in the fragment stage or a hint insists.
        let new_method = if !info.clips_children {
            ClipMethod::NotClipped
        } else if info.radius > SIZE_EPSILON {
            ClipMethod::Stencil
        } else if hints.prefer_scissor || !ctx.caps.fragment_clipping {
            ClipMethod::Scissor
        } else {
            ClipMethod::ShaderDiscard
        };

        let parent = ctx.tree.node(index).parent;
        let inherited_stencil = parent != INVALID
            && (ctx.tree.node(parent).flags.stencil_clipped
                || ctx.tree.node(parent).clip_method == ClipMethod::Stencil);

        // A transform slot is needed when shader-side clipping must index
        // a matrix, or when a skinned element has no ancestor slot to
        // borrow.
        let ancestor_slot = ancestor_transform_slot(ctx.tree, index);
        let needs_own_slot = matches!(new_method, ClipMethod::Stencil | ClipMethod::ShaderDiscard)
            || (hints.skinned && ancestor_slot.is_none());

        let old_transform_slot = ctx.tree.node(index).transform_slot;
        let new_transform_slot = if needs_own_slot {
            match old_transform_slot {
                SlotRef::Owned(slot) => SlotRef::Owned(slot),
                _ => SlotRef::Owned(ctx.transforms.allocate(ctx.device)),
            }
        } else {
            if let SlotRef::Owned(slot) = old_transform_slot {
                ctx.transforms.free(slot);
            }
            match ancestor_slot {
                Some(slot) => SlotRef::Borrowed(slot),
                None => SlotRef::None,
            }
        };

        let needs_clip_slot = new_method == ClipMethod::ShaderDiscard;
        let old_clip_slot = ctx.tree.node(index).clip_slot;
        let new_clip_slot = if needs_clip_slot {
            match old_clip_slot {
                SlotRef::Owned(slot) => SlotRef::Owned(slot),
                _ => SlotRef::Owned(ctx.clips.allocate(ctx.device)),
            }
        } else {
            if let SlotRef::Owned(slot) = old_clip_slot {
                ctx.clips.free(slot);
            }
            match ancestor_clip_slot(ctx.tree, index) {
                Some(slot) => SlotRef::Borrowed(slot),
                None => SlotRef::None,
            }
        };

        let method_changed = ctx.tree.node(index).clip_method != new_method;
        let slot_changed =
            old_transform_slot != new_transform_slot || old_clip_slot != new_clip_slot;
        let stencil_changed = ctx.tree.node(index).flags.stencil_clipped != inherited_stencil;
        {
            let node = ctx.tree.node_mut(index);
            node.clip_method = new_method;
            node.transform_slot = new_transform_slot;
            node.clip_slot = new_clip_slot;
            node.flags.stencil_clipped = inherited_stencil;
        }

        if let SlotRef::Owned(slot) = new_transform_slot {
            let world = ctx.source.world_transform(id);
            ctx.device.update_transform(
                slot,
                &TransformUniform::from_mat4(&world),
                info.rect.transformed(&world),
            );
        }

        if method_changed || slot_changed {
            self.queue(ctx.tree, index, VISUALS);
        }
        if method_changed || slot_changed || stencil_changed {
            // Inherited state moved: re-walk descendants. Children that
            // own their clip setup re-derive to the same answer and stop
            // the cascade at the subtree boundary.
            ctx.stats.recursive_clip_updates += 1;
            for child in ctx.tree.children_of(index) {
                self.process_clip(ctx, child, depth + 1);
            }
        }
    }

    /// Transform pass: slot owners get their device matrices refreshed,
    /// everyone else is nudged in place or escalated to a repaint.
    fn walk_transform(&mut self, ctx: &mut FrameCtx<'_>, index: u32, is_origin: bool) {
        let node_flags = ctx.tree.node(index).flags;
        if !is_origin && node_flags.group_transform {
            // Transform-group boundary: propagation stops here and the
            // group's text reshapes at its own pace instead.
            ctx.tree.node_mut(index).group_epoch += 1;
            for sub_index in ctx.tree.subtree_indices(index) {
                if ctx.tree.node(sub_index).flags.uses_text {
                    let sub_id = ctx.tree.id_at(sub_index);
                    ctx.text.enqueue(sub_id);
                }
            }
            return;
        }
        ctx.tree.node_mut(index).dirty_id = self.dirty_id;
        let id = ctx.tree.id_at(index);
        let world = ctx.source.world_transform(id);

        let transform_slot = ctx.tree.node(index).transform_slot;
        match transform_slot {
            SlotRef::Owned(slot) => {
                let info = ctx.source.clip_info(id);
                ctx.device.update_transform(
                    slot,
                    &TransformUniform::from_mat4(&world),
                    info.rect.transformed(&world),
                );
                ctx.tree.node_mut(index).paint_transform = world;
            }
            _ => {
                let mesh = ctx.tree.node(index).mesh;
                match mesh {
                    Some(allocation) if !node_flags.nudge_disabled => {
                        let old = ctx.tree.node(index).paint_transform;
                        if try_nudge(ctx.device, &allocation, &old, &world) {
                            ctx.tree.node_mut(index).paint_transform = world;
                            ctx.stats.nudges_applied += 1;
                        } else {
                            ctx.stats.nudges_rejected += 1;
                            self.queue(ctx.tree, index, VISUALS);
                        }
                    }
                    Some(_) => {
                        self.queue(ctx.tree, index, VISUALS);
                    }
                    None => {
                        ctx.tree.node_mut(index).paint_transform = world;
                    }
                }
            }
        }
        // A scissoring element carries a device-space rect in its command;
        // it must be re-emitted under the new transform.
        if ctx.tree.node(index).clip_method == ClipMethod::Scissor {
            self.queue(ctx.tree, index, VISUALS);
        }

        for child in ctx.tree.children_of(index) {
            self.walk_transform(ctx, child, false);
        }
    }

    /// Visuals pass: repaint the element (hierarchically when the hidden
    /// state moved or the event asked for it) and finalize closing
    /// commands only after descendants are done.
    fn process_visuals(&mut self, ctx: &mut FrameCtx<'_>, index: u32, hierarchical: bool) {
        {
            let node = ctx.tree.node_mut(index);
            node.dirty_id = self.dirty_id;
            node.pending_hierarchical = false;
        }
        let id = ctx.tree.id_at(index);
        let hints = ctx.source.hints(id);
        let parent = ctx.tree.node(index).parent;
        let parent_hidden = parent != INVALID && ctx.tree.node(parent).flags.hierarchy_hidden;
        let hidden = hints.hidden || parent_hidden;
        let hidden_changed = ctx.tree.node(index).flags.hierarchy_hidden != hidden;
        ctx.tree.node_mut(index).flags.hierarchy_hidden = hidden;

        painter::paint_element(ctx, index);
        if hierarchical || hidden_changed {
            for child in ctx.tree.children_of(index) {
                self.process_visuals(ctx, child, true);
            }
        }
        painter::finalize_closing(ctx, index);
    }
}

impl Default for RenderScheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn ancestor_transform_slot(
    tree: &RenderTree,
    index: u32,
) -> Option<crate::renderer::SlotId> {
    let mut cursor = tree.node(index).parent;
    while cursor != INVALID {
        if let SlotRef::Owned(slot) = tree.node(cursor).transform_slot {
            return Some(slot);
        }
        cursor = tree.node(cursor).parent;
    }
    None
}

fn ancestor_clip_slot(tree: &RenderTree, index: u32) -> Option<crate::renderer::SlotId> {
    let mut cursor = tree.node(index).parent;
    while cursor != INVALID {
        if let SlotRef::Owned(slot) = tree.node(cursor).clip_slot {
            return Some(slot);
        }
        cursor = tree.node(cursor).parent;
    }
    None
}

//! Converts element styles into mesh data and command-chain runs.
//!
//! The painter visits one element at a time: the element emits draw
//! primitives through [`PaintContext`], the tessellator turns them into
//! vertex/index data, texture primitives get resolved against the atlas,
//! and the resulting draw + clip commands are spliced into the chain at
//! the position the flattened tree dictates.

use glam::Vec3;

use crate::chain::{
    find_closing_anchor, find_opening_anchor, upload_mesh, CommandChain, CommandKind, DrawCommand,
    ImmediateCallback, MeshUpdate,
};
use crate::renderer::{
    DeviceCaps, DrawState, GraphicsDevice, StencilMode, TextureBinding, TextureInfo,
};
use crate::shader_info::SlotAllocator;
use crate::tessellation::{self, MeshBuilder, TessParams};
use crate::text::{ShapedQuad, TextRequest, TextShaper, TextUpdateQueue};
use crate::texture_atlas::AtlasManager;
use crate::tree::{ClipMethod, RenderTree, INVALID};
use crate::utils::{Position, Rectangle, UVTransform};
use crate::FrameStats;
use crate::{ElementSource, NodeId};

/// Everything one drain pass touches, borrowed together so the scheduler
/// and painter stay free of self-referential state.
pub(crate) struct FrameCtx<'a> {
    pub tree: &'a mut RenderTree,
    pub chain: &'a mut CommandChain,
    pub transforms: &'a mut SlotAllocator,
    pub clips: &'a mut SlotAllocator,
    pub atlas: &'a mut AtlasManager,
    pub text: &'a mut TextUpdateQueue,
    pub device: &'a mut dyn GraphicsDevice,
    pub source: &'a dyn ElementSource,
    pub shaper: &'a mut dyn TextShaper,
    pub stats: &'a mut FrameStats,
    pub caps: DeviceCaps,
}

enum Primitive {
    Shape {
        params: TessParams,
        binding: TextureBinding,
    },
    Text {
        font: uuid::Uuid,
        text: String,
        font_size: f32,
        wrap_width: Option<f32>,
        color: [f32; 4],
        origin: Position,
    },
    Immediate(ImmediateCallback),
}

/// Collects the draw primitives one element emits during its paint
/// callback. Texture placement is resolved eagerly so the element learns
/// nothing about atlas internals.
pub struct PaintContext<'a> {
    atlas: &'a mut AtlasManager,
    caps: DeviceCaps,
    primitives: Vec<Primitive>,
    used_atlas: bool,
    used_text: bool,
}

impl<'a> PaintContext<'a> {
    fn new(atlas: &'a mut AtlasManager, caps: DeviceCaps) -> Self {
        Self {
            atlas,
            caps,
            primitives: Vec::new(),
            used_atlas: false,
            used_text: false,
        }
    }

    /// Solid rectangle, optionally rounded.
    pub fn rect(&mut self, rect: Rectangle, color: [f32; 4], radius: f32) {
        self.primitives.push(Primitive::Shape {
            params: TessParams {
                rect,
                color,
                border_width: 0.0,
                radius,
                uv: None,
            },
            binding: TextureBinding::Solid,
        });
    }

    /// Border stroke, optionally rounded.
    pub fn border(&mut self, rect: Rectangle, color: [f32; 4], width: f32, radius: f32) {
        self.primitives.push(Primitive::Shape {
            params: TessParams {
                rect,
                color,
                border_width: width,
                radius,
                uv: None,
            },
            binding: TextureBinding::Solid,
        });
    }

    /// Textured quad. Atlas-eligible textures sample the shared page;
    /// everything else falls back to an unatlased custom-texture draw.
    pub fn textured_rect(&mut self, rect: Rectangle, tint: [f32; 4], texture: &TextureInfo) {
        let placement = match self.atlas.try_place(texture, &self.caps) {
            Ok(placement) => placement,
            Err(error) => {
                log::error!("atlas placement failed: {error}");
                None
            }
        };
        let (uv, binding) = match placement {
            Some(uv) => {
                self.used_atlas = true;
                (uv, TextureBinding::Atlas)
            }
            None => (UVTransform::full(), TextureBinding::Custom(texture.id)),
        };
        self.primitives.push(Primitive::Shape {
            params: TessParams {
                rect,
                color: tint,
                border_width: 0.0,
                radius: 0.0,
                uv: Some(uv),
            },
            binding,
        });
    }

    /// Text run shaped externally, positioned and tinted here.
    pub fn text(
        &mut self,
        origin: Position,
        font: uuid::Uuid,
        text: &str,
        font_size: f32,
        wrap_width: Option<f32>,
        color: [f32; 4],
    ) {
        self.used_text = true;
        self.primitives.push(Primitive::Text {
            font,
            text: text.to_owned(),
            font_size,
            wrap_width,
            color,
            origin,
        });
    }

    /// Opaque callback executed at this element's position in the chain.
    pub fn immediate(&mut self, callback: ImmediateCallback) {
        self.primitives.push(Primitive::Immediate(callback));
    }
}

/// A primitive resolved to concrete geometry sources.
enum Resolved {
    Shape(TessParams, DrawState),
    Quads(Vec<ShapedQuad>, [f32; 4], Position, DrawState),
    Immediate(ImmediateCallback),
}

fn slot_scalar(slot: crate::shader_info::SlotRef) -> f32 {
    match slot.id() {
        Some(id) => (id.page as u32 * 512 + id.index as u32) as f32,
        None => -1.0,
    }
}

/// Removes an element's command runs from the chain, leaving the mesh in
/// place for reuse.
pub(crate) fn strip_commands(
    tree: &mut RenderTree,
    chain: &mut CommandChain,
    index: u32,
    stats: &mut FrameStats,
) {
    let (first, last, first_closing, last_closing) = {
        let node = tree.node(index);
        (
            node.first_command,
            node.last_command,
            node.first_closing,
            node.last_closing,
        )
    };
    if first != INVALID {
        chain.remove_run(first, last);
        stats.commands_removed += 1;
    }
    if first_closing != INVALID {
        chain.remove_run(first_closing, last_closing);
    }
    let node = tree.node_mut(index);
    node.first_command = INVALID;
    node.last_command = INVALID;
    node.first_closing = INVALID;
    node.last_closing = INVALID;
    node.mask_range = None;
}

/// Repaints one element: re-emits its primitives, refreshes its mesh, and
/// re-splices its opening command run. Closing commands are finalized
/// separately once descendants have been processed.
pub(crate) fn paint_element(ctx: &mut FrameCtx<'_>, index: u32) {
    strip_commands(ctx.tree, ctx.chain, index, ctx.stats);

    if ctx.tree.node(index).flags.hierarchy_hidden {
        return;
    }

    let id = ctx.tree.id_at(index);
    let world = ctx.source.world_transform(id);

    // Let the element emit its primitives.
    let mut paint_ctx = PaintContext::new(ctx.atlas, ctx.caps);
    ctx.source.paint(id, &mut paint_ctx);
    let PaintContext {
        primitives,
        used_atlas,
        used_text,
        ..
    } = paint_ctx;

    {
        let node = ctx.tree.node_mut(index);
        node.flags.uses_atlas = used_atlas;
        node.flags.uses_text = used_text;
        node.paint_transform = world;
    }

    // Resolve primitives: shaping happens now so counts are exact.
    let mut resolved = Vec::with_capacity(primitives.len());
    for primitive in primitives {
        match primitive {
            Primitive::Shape { params, binding } => {
                let state = DrawState {
                    texture: binding,
                    stencil: StencilMode::Normal,
                };
                resolved.push(Resolved::Shape(params, state));
            }
            Primitive::Text {
                font,
                text,
                font_size,
                wrap_width,
                color,
                origin,
            } => {
                let quads = ctx.shaper.shape(&TextRequest {
                    font,
                    text: &text,
                    font_size,
                    wrap_width,
                    scale: world.x_axis.x.abs().max(world.y_axis.y.abs()),
                });
                let state = DrawState {
                    texture: TextureBinding::Font,
                    stencil: StencilMode::Normal,
                };
                resolved.push(Resolved::Quads(quads, color, origin, state));
            }
            Primitive::Immediate(callback) => resolved.push(Resolved::Immediate(callback)),
        }
    }

    // Stencil clipping masks with the element's own clip shape; the mask
    // range is drawn once to raise the stencil and once more in the
    // closing run to lower it.
    let clip_method = ctx.tree.node(index).clip_method;
    let clip_info = ctx.source.clip_info(id);
    if clip_method == ClipMethod::Stencil {
        resolved.insert(
            0,
            Resolved::Shape(
                TessParams {
                    rect: clip_info.rect,
                    color: [0.0, 0.0, 0.0, 0.0],
                    border_width: 0.0,
                    radius: clip_info.radius,
                    uv: None,
                },
                DrawState {
                    texture: TextureBinding::Solid,
                    stencil: StencilMode::WriteMask,
                },
            ),
        );
    }

    // Count pass, with the 16-bit index-range guard: anything past the
    // cap is dropped (text at whole-quad granularity) with a warning
    // instead of corrupting the chain.
    let mut total_vertices: u32 = 0;
    let mut kept = Vec::with_capacity(resolved.len());
    let mut truncated = false;
    for entry in resolved {
        match entry {
            Resolved::Shape(params, state) => {
                let counts = tessellation::count(&params);
                if total_vertices + counts.vertices > u16::MAX as u32 {
                    truncated = true;
                    continue;
                }
                total_vertices += counts.vertices;
                kept.push(Resolved::Shape(params, state));
            }
            Resolved::Quads(mut quads, color, origin, state) => {
                let room = (u16::MAX as u32 - total_vertices) / 4;
                if (quads.len() as u32) > room {
                    truncated = true;
                    quads.truncate(room as usize);
                }
                total_vertices += quads.len() as u32 * 4;
                kept.push(Resolved::Quads(quads, color, origin, state));
            }
            Resolved::Immediate(callback) => kept.push(Resolved::Immediate(callback)),
        }
    }
    if truncated {
        log::warn!("element geometry exceeds 16-bit index range; trailing primitives dropped");
    }

    // Fill pass. Draw ranges are recorded per primitive and merged when
    // adjacent primitives share state.
    let slot_ids = {
        let node = ctx.tree.node(index);
        [slot_scalar(node.transform_slot), slot_scalar(node.clip_slot)]
    };
    let mut builder = MeshBuilder::new(slot_ids);
    // (first_index, index_count, state) per draw; None marks an immediate.
    let mut ranges: Vec<Option<(u32, u32, DrawState)>> = Vec::new();
    let mut callbacks: Vec<ImmediateCallback> = Vec::new();
    let mut mask_range: Option<(u32, u32)> = None;

    for entry in kept {
        match entry {
            Resolved::Shape(params, state) => {
                let start = builder.counts().indices;
                tessellation::fill(&params, &mut builder);
                let len = builder.counts().indices - start;
                if len == 0 {
                    continue;
                }
                if state.stencil == StencilMode::WriteMask {
                    mask_range = Some((start, len));
                }
                push_range(&mut ranges, start, len, state);
            }
            Resolved::Quads(quads, color, origin, state) => {
                let start = builder.counts().indices;
                for quad in &quads {
                    let rect = Rectangle::new(
                        origin.x + quad.rect.x,
                        origin.y + quad.rect.y,
                        quad.rect.width,
                        quad.rect.height,
                    );
                    tessellation::fill(
                        &TessParams {
                            rect,
                            color,
                            border_width: 0.0,
                            radius: 0.0,
                            uv: Some(quad.uv),
                        },
                        &mut builder,
                    );
                }
                let len = builder.counts().indices - start;
                if len == 0 {
                    continue;
                }
                push_range(&mut ranges, start, len, state);
            }
            Resolved::Immediate(callback) => {
                ranges.push(None);
                callbacks.push(callback);
            }
        }
    }

    // Vertices are baked into world space unless the element owns a
    // transform slot the vertex shader will apply instead.
    let counts = builder.counts();
    let (vertices, indices) = {
        let (mut vertices, indices) = builder.into_parts();
        if !ctx.tree.node(index).transform_slot.is_owned() {
            for vertex in &mut vertices {
                let position = world.transform_point3(Vec3::from_array(vertex.position));
                vertex.position = position.to_array();
            }
        }
        (vertices, indices)
    };

    // Mesh upload, reusing the existing allocation when it still fits.
    if counts.is_empty() {
        if let Some(allocation) = ctx.tree.node(index).mesh {
            ctx.device.free_mesh(allocation.mesh);
            ctx.tree.node_mut(index).mesh = None;
        }
    } else {
        ctx.stats.tessellations += 1;
        let existing = ctx.tree.node(index).mesh;
        let (allocation, update) = upload_mesh(ctx.device, existing, &vertices, &indices);
        match update {
            MeshUpdate::InPlace => ctx.stats.mesh_updates += 1,
            MeshUpdate::Reallocated => ctx.stats.mesh_allocations += 1,
        }
        ctx.tree.node_mut(index).mesh = Some(allocation);
    }

    // Splice the opening run: clip state first, then draws in emit order.
    let mesh = ctx.tree.node(index).mesh.map(|allocation| allocation.mesh);
    let mut commands: Vec<CommandKind> = Vec::new();
    match clip_method {
        ClipMethod::NotClipped => {}
        ClipMethod::Scissor => {
            commands.push(CommandKind::PushScissor(
                clip_info.rect.transformed(&world),
            ));
        }
        ClipMethod::ShaderDiscard | ClipMethod::Stencil => {
            if let Some(slot) = ctx.tree.node(index).transform_slot.id() {
                commands.push(CommandKind::PushView(slot));
            }
        }
    }
    let mut callback_queue = callbacks.into_iter();
    for range in ranges {
        match range {
            Some((first_index, index_count, state)) => {
                if let Some(mesh) = mesh {
                    commands.push(CommandKind::Draw(DrawCommand {
                        mesh,
                        first_index,
                        index_count,
                        state,
                    }));
                }
            }
            None => {
                if let Some(callback) = callback_queue.next() {
                    commands.push(CommandKind::Immediate(callback));
                }
            }
        }
    }

    if commands.is_empty() {
        return;
    }
    let mut anchor = find_opening_anchor(ctx.tree, index);
    let mut first = INVALID;
    for kind in commands {
        anchor = ctx.chain.insert_after(anchor, index, kind);
        if first == INVALID {
            first = anchor;
        }
    }
    let node = ctx.tree.node_mut(index);
    node.first_command = first;
    node.last_command = anchor;
    node.mask_range = mask_range;
    ctx.stats.commands_inserted += 1;
}

fn push_range(
    ranges: &mut Vec<Option<(u32, u32, DrawState)>>,
    start: u32,
    len: u32,
    state: DrawState,
) {
    if let Some(Some((_, last_len, last_state))) = ranges.last_mut() {
        if *last_state == state && state.stencil == StencilMode::Normal {
            *last_len += len;
            return;
        }
    }
    ranges.push(Some((start, len, state)));
}

/// Emits the element's closing run (mask clear, matrix pop, scissor pop)
/// after its descendants' commands, keeping the bracket
/// `[opening][children][closing]` contiguous.
pub(crate) fn finalize_closing(ctx: &mut FrameCtx<'_>, index: u32) {
    let node = ctx.tree.node(index);
    if node.first_command == INVALID || node.first_closing != INVALID {
        return;
    }
    let clip_method = node.clip_method;
    let mesh = node.mesh.map(|allocation| allocation.mesh);
    let mask_range = node.mask_range;

    let mut commands: Vec<CommandKind> = Vec::new();
    match clip_method {
        ClipMethod::NotClipped => {}
        ClipMethod::Scissor => commands.push(CommandKind::PopScissor),
        ClipMethod::ShaderDiscard => {
            if ctx.tree.node(index).transform_slot.id().is_some() {
                commands.push(CommandKind::PopView);
            }
        }
        ClipMethod::Stencil => {
            if let (Some(mesh), Some((first_index, index_count))) = (mesh, mask_range) {
                commands.push(CommandKind::Draw(DrawCommand {
                    mesh,
                    first_index,
                    index_count,
                    state: DrawState {
                        texture: TextureBinding::Solid,
                        stencil: StencilMode::ClearMask,
                    },
                }));
            }
            if ctx.tree.node(index).transform_slot.id().is_some() {
                commands.push(CommandKind::PopView);
            }
        }
    }
    if commands.is_empty() {
        return;
    }

    let mut anchor = find_closing_anchor(ctx.tree, index);
    let mut first = INVALID;
    for kind in commands {
        anchor = ctx.chain.insert_after(anchor, index, kind);
        if first == INVALID {
            first = anchor;
        }
    }
    let node = ctx.tree.node_mut(index);
    node.first_closing = first;
    node.last_closing = anchor;
}

/// Repaint that also refreshes text, used by the time-sliced text pass.
pub(crate) fn repaint_for_text(ctx: &mut FrameCtx<'_>, id: NodeId) {
    if let Some(index) = ctx.tree.index_of(id) {
        paint_element(ctx, index);
        finalize_closing(ctx, index);
        ctx.stats.text_elements_processed += 1;
    }
}

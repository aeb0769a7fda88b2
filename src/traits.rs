use glam::Mat4;

use crate::painter::PaintContext;
use crate::tree::NodeId;
use crate::utils::Rectangle;

/// Per-element rendering hints resolved by the external tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderHints {
    /// Transform changes stop propagating at this element; its subtree
    /// follows the group matrix instead.
    pub group_transform: bool,
    /// Element is skinned and needs a transform slot a vertex shader can
    /// index, its own or a borrowed ancestor one.
    pub skinned: bool,
    /// Force scissor clipping even where fragment discard would do.
    pub prefer_scissor: bool,
    /// Opt this element out of the vertex nudge fast path.
    pub no_nudging: bool,
    /// Element and its whole subtree emit no draw commands.
    pub hidden: bool,
}

/// How an element clips its descendants, as resolved by styling.
#[derive(Debug, Clone, Copy)]
pub struct ClipInfo {
    pub clips_children: bool,
    /// Clip rect in element-local coordinates.
    pub rect: Rectangle,
    /// Corner radius; a rounded clip shape forces stencil masking.
    pub radius: f32,
}

impl Default for ClipInfo {
    fn default() -> Self {
        Self {
            clips_children: false,
            rect: Rectangle::zero(),
            radius: 0.0,
        }
    }
}

/// The external element tree, as this core sees it: resolved transforms,
/// resolved style answers, and a paint callback that emits primitives.
/// The core never creates or destroys elements, only the render state
/// hanging off them.
pub trait ElementSource {
    fn world_transform(&self, element: NodeId) -> Mat4;
    fn hints(&self, element: NodeId) -> RenderHints;
    fn clip_info(&self, element: NodeId) -> ClipInfo;
    fn paint(&self, element: NodeId, ctx: &mut PaintContext<'_>);
}

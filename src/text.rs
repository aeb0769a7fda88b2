use uuid::Uuid;

use crate::tree::NodeId;
use crate::utils::{Rectangle, UVTransform};

/// A shaping request for one run of text. Shaping itself (fonts, bidi,
/// line breaking) happens outside this core.
#[derive(Debug, Clone, Copy)]
pub struct TextRequest<'a> {
    pub font: Uuid,
    pub text: &'a str,
    pub font_size: f32,
    pub wrap_width: Option<f32>,
    /// Effective scale of the enclosing transform group; regenerated text
    /// is re-shaped at this scale so glyphs stay crisp.
    pub scale: f32,
}

/// One pre-shaped glyph quad in element-local coordinates with its UV
/// rectangle in the font atlas. This core only positions, tints, and
/// clip-tags these.
#[derive(Debug, Clone, Copy)]
pub struct ShapedQuad {
    pub rect: Rectangle,
    pub uv: UVTransform,
}

pub trait TextShaper {
    fn shape(&mut self, request: &TextRequest<'_>) -> Vec<ShapedQuad>;

    /// Bumped whenever the font atlas is rebuilt; glyph UVs obtained
    /// before the bump are stale and their elements must regenerate.
    fn atlas_generation(&self) -> u32;
}

/// Default number of text elements regenerated per frame.
pub const DEFAULT_TEXT_BUDGET: usize = 8;

/// Time-sliced text regeneration. Dirty text elements accumulate here and
/// at most `budget` of them are reprocessed per frame, resuming from the
/// last index on the next one. This is the only amortization mechanism in
/// the core; a font-atlas invalidation restarts the walk at zero.
pub struct TextUpdateQueue {
    pending: Vec<NodeId>,
    cursor: usize,
    budget: usize,
    seen_atlas_generation: u32,
}

impl TextUpdateQueue {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            cursor: 0,
            budget: DEFAULT_TEXT_BUDGET,
            seen_atlas_generation: 0,
        }
    }

    pub fn set_budget(&mut self, budget: usize) {
        self.budget = budget.max(1);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len().saturating_sub(self.cursor)
    }

    pub fn enqueue(&mut self, id: NodeId) {
        // The un-processed tail is scanned for duplicates; already
        // processed entries ahead of the cursor are fine to re-add.
        if !self.pending[self.cursor..].contains(&id) {
            self.pending.push(id);
        }
    }

    /// Up to one frame budget of elements, resuming where the previous
    /// frame stopped.
    pub fn take_batch(&mut self) -> Vec<NodeId> {
        let end = (self.cursor + self.budget).min(self.pending.len());
        let batch = self.pending[self.cursor..end].to_vec();
        self.cursor = end;
        if self.cursor >= self.pending.len() {
            self.pending.clear();
            self.cursor = 0;
        }
        batch
    }

    /// Restarts the walk when the shaper reports a rebuilt font atlas.
    /// Returns true when the caller must re-enqueue every text element.
    pub fn sync_atlas_generation(&mut self, generation: u32) -> bool {
        if generation == self.seen_atlas_generation {
            return false;
        }
        self.seen_atlas_generation = generation;
        self.pending.clear();
        self.cursor = 0;
        true
    }
}

impl Default for TextUpdateQueue {
    fn default() -> Self {
        Self::new()
    }
}

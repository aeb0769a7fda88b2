//! Shared test doubles: a scriptable element tree and a stub text shaper.

use std::cell::RefCell;
use std::collections::HashMap;

use glam::Mat4;
use uuid::Uuid;

use thorium_render::{
    ClipInfo, ElementSource, NodeId, PaintContext, Position, Rectangle, RenderHints, ShapedQuad,
    TextRequest, TextShaper, TextureInfo, UVTransform,
};

#[derive(Clone)]
pub enum Prim {
    Rect {
        rect: Rectangle,
        color: [f32; 4],
        radius: f32,
    },
    Border {
        rect: Rectangle,
        color: [f32; 4],
        width: f32,
        radius: f32,
    },
    Texture {
        rect: Rectangle,
        tint: [f32; 4],
        info: TextureInfo,
    },
    Text {
        origin: Position,
        font: Uuid,
        text: String,
    },
}

#[derive(Clone, Default)]
pub struct StubElement {
    pub transform: Option<Mat4>,
    pub hints: RenderHints,
    pub clip: Option<ClipInfo>,
    pub prims: Vec<Prim>,
}

/// A scriptable stand-in for the external element tree. Paint invocations
/// are counted per element so tests can assert visit counts.
#[derive(Default)]
pub struct StubTree {
    pub elements: RefCell<HashMap<NodeId, StubElement>>,
    pub paint_counts: RefCell<HashMap<NodeId, usize>>,
}

impl StubTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, id: NodeId, element: StubElement) {
        self.elements.borrow_mut().insert(id, element);
    }

    pub fn set_transform(&self, id: NodeId, transform: Mat4) {
        self.elements.borrow_mut().entry(id).or_default().transform = Some(transform);
    }

    pub fn paint_count(&self, id: NodeId) -> usize {
        self.paint_counts.borrow().get(&id).copied().unwrap_or(0)
    }
}

impl ElementSource for StubTree {
    fn world_transform(&self, element: NodeId) -> Mat4 {
        self.elements
            .borrow()
            .get(&element)
            .and_then(|spec| spec.transform)
            .unwrap_or(Mat4::IDENTITY)
    }

    fn hints(&self, element: NodeId) -> RenderHints {
        self.elements
            .borrow()
            .get(&element)
            .map(|spec| spec.hints)
            .unwrap_or_default()
    }

    fn clip_info(&self, element: NodeId) -> ClipInfo {
        self.elements
            .borrow()
            .get(&element)
            .and_then(|spec| spec.clip)
            .unwrap_or_default()
    }

    fn paint(&self, element: NodeId, ctx: &mut PaintContext<'_>) {
        *self
            .paint_counts
            .borrow_mut()
            .entry(element)
            .or_insert(0) += 1;
        let prims = match self.elements.borrow().get(&element) {
            Some(spec) => spec.prims.clone(),
            None => return,
        };
        for prim in prims {
            match prim {
                Prim::Rect {
                    rect,
                    color,
                    radius,
                } => ctx.rect(rect, color, radius),
                Prim::Border {
                    rect,
                    color,
                    width,
                    radius,
                } => ctx.border(rect, color, width, radius),
                Prim::Texture { rect, tint, info } => ctx.textured_rect(rect, tint, &info),
                Prim::Text { origin, font, text } => {
                    ctx.text(origin, font, &text, 14.0, None, [0.0, 0.0, 0.0, 1.0]);
                }
            }
        }
    }
}

/// Shapes one 8x16 quad per character; enough structure to count quads
/// and observe regeneration.
pub struct StubShaper {
    pub generation: u32,
    pub shape_calls: usize,
}

impl StubShaper {
    pub fn new() -> Self {
        Self {
            generation: 0,
            shape_calls: 0,
        }
    }
}

impl TextShaper for StubShaper {
    fn shape(&mut self, request: &TextRequest<'_>) -> Vec<ShapedQuad> {
        self.shape_calls += 1;
        request
            .text
            .chars()
            .enumerate()
            .map(|(position, _)| ShapedQuad {
                rect: Rectangle::new(position as f32 * 8.0, 0.0, 8.0, 16.0),
                uv: UVTransform::full(),
            })
            .collect()
    }

    fn atlas_generation(&self) -> u32 {
        self.generation
    }
}

/// Route core warnings into test output; safe to call repeatedly.
#[allow(dead_code)]
pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn solid_rect(width: f32, height: f32) -> Prim {
    Prim::Rect {
        rect: Rectangle::new(0.0, 0.0, width, height),
        color: [0.2, 0.4, 0.6, 1.0],
        radius: 0.0,
    }
}

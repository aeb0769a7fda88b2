//! Turns rect + border/radius/color parameters into vertex/index data.
//!
//! Callers run the same parameters through [`count`] first, pre-size their
//! buffers, then [`fill`]; the two passes always agree exactly.

use crate::utils::{Rectangle, UVTransform, Vertex, SIZE_EPSILON};

/// Quarter-circle subdivision for corner fans.
pub const CORNER_SEGMENTS: u32 = 4;

#[derive(Debug, Clone, Copy)]
pub struct TessParams {
    pub rect: Rectangle,
    pub color: [f32; 4],
    pub border_width: f32,
    pub radius: f32,
    /// UV mapping for the plain-quad path; rounded and bordered geometry
    /// is always solid color.
    pub uv: Option<UVTransform>,
}

impl TessParams {
    pub fn solid(rect: Rectangle, color: [f32; 4]) -> Self {
        Self {
            rect,
            color,
            border_width: 0.0,
            radius: 0.0,
            uv: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeshCounts {
    pub vertices: u32,
    pub indices: u32,
}

impl MeshCounts {
    pub fn add(&mut self, other: MeshCounts) {
        self.vertices += other.vertices;
        self.indices += other.indices;
    }

    pub fn is_empty(&self) -> bool {
        self.indices == 0
    }
}

/// Accumulates vertices and indices for one element's mesh. Every vertex
/// carries the element's transform/clip slot ids so the vertex shader can
/// look them up.
pub struct MeshBuilder {
    vertices: Vec<Vertex>,
    indices: Vec<u16>,
    slot_ids: [f32; 2],
}

impl MeshBuilder {
    pub fn new(slot_ids: [f32; 2]) -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            slot_ids,
        }
    }

    pub fn counts(&self) -> MeshCounts {
        MeshCounts {
            vertices: self.vertices.len() as u32,
            indices: self.indices.len() as u32,
        }
    }

    pub fn push_vertex(
        &mut self,
        position: [f32; 2],
        tex_coords: [f32; 2],
        color: [f32; 4],
        edge: f32,
        displacement: f32,
    ) -> u16 {
        let index = self.vertices.len() as u16;
        self.vertices.push(Vertex {
            position: [position[0], position[1], 0.0],
            tex_coords,
            color,
            edge,
            displacement,
            slot_ids: self.slot_ids,
        });
        index
    }

    pub fn triangle(&mut self, a: u16, b: u16, c: u16) {
        self.indices.extend_from_slice(&[a, b, c]);
    }

    pub fn quad(&mut self, a: u16, b: u16, c: u16, d: u16) {
        self.indices.extend_from_slice(&[a, b, c, a, c, d]);
    }

    pub fn into_parts(self) -> (Vec<Vertex>, Vec<u16>) {
        (self.vertices, self.indices)
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u16] {
        &self.indices
    }
}

/// Count pass: exact vertex/index totals [`fill`] will produce for the
/// same parameters.
pub fn count(params: &TessParams) -> MeshCounts {
    let seg = CORNER_SEGMENTS;
    if params.rect.is_degenerate() {
        return MeshCounts::default();
    }
    let has_radius = params.radius > SIZE_EPSILON;
    let has_border = params.border_width > SIZE_EPSILON;
    match (has_radius, has_border) {
        (false, false) => MeshCounts {
            vertices: 4,
            indices: 6,
        },
        // Square frame: four quads between the outer and inner rings.
        (false, true) => MeshCounts {
            vertices: 8,
            indices: 24,
        },
        // Four mirrored corner fans.
        (true, false) => MeshCounts {
            vertices: 4 * (seg + 5),
            indices: 12 * (seg + 4),
        },
        // Four mirrored border rings.
        (true, true) => MeshCounts {
            vertices: 8 * (seg + 3),
            indices: 24 * (seg + 2),
        },
    }
}

/// Fill pass. Appends exactly [`count`]`(params)` vertices and indices to
/// `builder`; a disagreement between the passes is a programming error.
pub fn fill(params: &TessParams, builder: &mut MeshBuilder) {
    let before = builder.counts();
    if params.rect.is_degenerate() {
        return;
    }
    let has_radius = params.radius > SIZE_EPSILON;
    let has_border = params.border_width > SIZE_EPSILON;
    match (has_radius, has_border) {
        (false, false) => fill_quad(params, builder),
        (false, true) => fill_frame(params, builder),
        (true, false) => fill_rounded(params, builder),
        (true, true) => fill_rounded_border(params, builder),
    }

    let after = builder.counts();
    let expected = count(params);
    debug_assert_eq!(
        after.vertices - before.vertices,
        expected.vertices,
        "tessellation count/fill vertex mismatch"
    );
    debug_assert_eq!(
        after.indices - before.indices,
        expected.indices,
        "tessellation count/fill index mismatch"
    );
}

fn fill_quad(params: &TessParams, builder: &mut MeshBuilder) {
    let rect = params.rect;
    let uv = params.uv.unwrap_or(UVTransform {
        uv_offset: [0.0, 0.0],
        uv_scale: [0.0, 0.0],
    });
    let (u0, v0) = (uv.uv_offset[0], uv.uv_offset[1]);
    let (u1, v1) = (u0 + uv.uv_scale[0], v0 + uv.uv_scale[1]);
    let color = params.color;

    let a = builder.push_vertex([rect.x, rect.y], [u0, v0], color, 1.0, 0.0);
    let b = builder.push_vertex([rect.x + rect.width, rect.y], [u1, v0], color, 1.0, 0.0);
    let c = builder.push_vertex(
        [rect.x + rect.width, rect.y + rect.height],
        [u1, v1],
        color,
        1.0,
        0.0,
    );
    let d = builder.push_vertex([rect.x, rect.y + rect.height], [u0, v1], color, 1.0, 0.0);
    builder.quad(a, b, c, d);
}

fn fill_frame(params: &TessParams, builder: &mut MeshBuilder) {
    let rect = params.rect;
    let bw = params
        .border_width
        .min(rect.width / 2.0)
        .min(rect.height / 2.0);
    let color = params.color;
    let outer = [
        [rect.x, rect.y],
        [rect.x + rect.width, rect.y],
        [rect.x + rect.width, rect.y + rect.height],
        [rect.x, rect.y + rect.height],
    ];
    let inner = [
        [rect.x + bw, rect.y + bw],
        [rect.x + rect.width - bw, rect.y + bw],
        [rect.x + rect.width - bw, rect.y + rect.height - bw],
        [rect.x + bw, rect.y + rect.height - bw],
    ];
    let mut outer_ids = [0_u16; 4];
    let mut inner_ids = [0_u16; 4];
    for corner in 0..4 {
        outer_ids[corner] = builder.push_vertex(outer[corner], [0.0, 0.0], color, 1.0, 0.0);
        inner_ids[corner] = builder.push_vertex(inner[corner], [0.0, 0.0], color, 1.0, 0.0);
    }
    for corner in 0..4 {
        let next = (corner + 1) % 4;
        builder.quad(
            outer_ids[corner],
            outer_ids[next],
            inner_ids[next],
            inner_ids[corner],
        );
    }
}

/// Mirror signs per quadrant: top-left is computed, the rest are
/// reflections about the rect center. A single horizontal or vertical
/// mirror flips triangle winding; the bottom-right double mirror restores
/// it.
const QUADRANTS: [(f32, f32); 4] = [(1.0, 1.0), (-1.0, 1.0), (1.0, -1.0), (-1.0, -1.0)];

struct QuadrantPoint {
    offset: [f32; 2], // from the rect center, top-left quadrant space
    edge: f32,
}

fn emit_quadrant_fan(
    builder: &mut MeshBuilder,
    center: [f32; 2],
    pivot: &QuadrantPoint,
    rim: &[QuadrantPoint],
    color: [f32; 4],
    signs: (f32, f32),
) {
    let flip = signs.0 * signs.1 < 0.0;
    let place = |point: &QuadrantPoint| {
        [
            center[0] + signs.0 * point.offset[0],
            center[1] + signs.1 * point.offset[1],
        ]
    };
    let pivot_id = builder.push_vertex(place(pivot), [0.0, 0.0], color, pivot.edge, 0.0);
    let mut rim_ids = Vec::with_capacity(rim.len());
    for point in rim {
        rim_ids.push(builder.push_vertex(place(point), [0.0, 0.0], color, point.edge, 0.0));
    }
    for index in 0..rim_ids.len() {
        let next = (index + 1) % rim_ids.len();
        if flip {
            builder.triangle(pivot_id, rim_ids[next], rim_ids[index]);
        } else {
            builder.triangle(pivot_id, rim_ids[index], rim_ids[next]);
        }
    }
}

fn emit_quadrant_ring(
    builder: &mut MeshBuilder,
    center: [f32; 2],
    outer: &[QuadrantPoint],
    inner: &[QuadrantPoint],
    color: [f32; 4],
    signs: (f32, f32),
) {
    let flip = signs.0 * signs.1 < 0.0;
    let place = |point: &QuadrantPoint| {
        [
            center[0] + signs.0 * point.offset[0],
            center[1] + signs.1 * point.offset[1],
        ]
    };
    let mut outer_ids = Vec::with_capacity(outer.len());
    for point in outer {
        outer_ids.push(builder.push_vertex(place(point), [0.0, 0.0], color, point.edge, 0.0));
    }
    let mut inner_ids = Vec::with_capacity(inner.len());
    for point in inner {
        inner_ids.push(builder.push_vertex(place(point), [0.0, 0.0], color, point.edge, 0.0));
    }
    for index in 0..outer_ids.len() - 1 {
        let (a, b, c, d) = (
            outer_ids[index],
            outer_ids[index + 1],
            inner_ids[index + 1],
            inner_ids[index],
        );
        if flip {
            builder.quad(d, c, b, a);
        } else {
            builder.quad(a, b, c, d);
        }
    }
}

/// Arc across the top-left corner, from the left edge tangent point to
/// the top edge tangent point, as offsets from the rect center.
fn corner_arc(half_width: f32, half_height: f32, radius: f32, inset: f32, edge: f32) -> Vec<QuadrantPoint> {
    let seg = CORNER_SEGMENTS;
    // Circle center sits `radius` in from both edges of the corner.
    let cx = -half_width + radius;
    let cy = -half_height + radius;
    let arc_radius = (radius - inset).max(0.0);
    let mut points = Vec::with_capacity(seg as usize + 1);
    for step in 0..=seg {
        let theta = std::f32::consts::PI * (1.0 + 0.5 * step as f32 / seg as f32);
        points.push(QuadrantPoint {
            offset: [cx + arc_radius * theta.cos(), cy + arc_radius * theta.sin()],
            edge,
        });
    }
    points
}

fn fill_rounded(params: &TessParams, builder: &mut MeshBuilder) {
    let rect = params.rect;
    let half_width = rect.width / 2.0;
    let half_height = rect.height / 2.0;
    let radius = params.radius.min(half_width).min(half_height);
    let center = [rect.x + half_width, rect.y + half_height];

    // Rim: corner arc plus the three straight corners of the quadrant,
    // star-shaped around the circle center so a single fan covers it.
    let mut rim = corner_arc(half_width, half_height, radius, 0.0, 1.0);
    rim.push(QuadrantPoint {
        offset: [0.0, -half_height],
        edge: 1.0,
    });
    rim.push(QuadrantPoint {
        offset: [0.0, 0.0],
        edge: 0.0,
    });
    rim.push(QuadrantPoint {
        offset: [-half_width, 0.0],
        edge: 1.0,
    });
    // Filled fans keep the innermost point solid; only the silhouette
    // gets the shader-side antialiasing tag.
    let pivot = QuadrantPoint {
        offset: [-half_width + radius, -half_height + radius],
        edge: 0.0,
    };

    for signs in QUADRANTS {
        emit_quadrant_fan(builder, center, &pivot, &rim, params.color, signs);
    }
}

fn fill_rounded_border(params: &TessParams, builder: &mut MeshBuilder) {
    let rect = params.rect;
    let half_width = rect.width / 2.0;
    let half_height = rect.height / 2.0;
    let radius = params.radius.min(half_width).min(half_height);
    let bw = params.border_width.min(half_width).min(half_height);
    let center = [rect.x + half_width, rect.y + half_height];

    let mut outer = vec![QuadrantPoint {
        offset: [-half_width, 0.0],
        edge: 1.0,
    }];
    outer.extend(corner_arc(half_width, half_height, radius, 0.0, 1.0));
    outer.push(QuadrantPoint {
        offset: [0.0, -half_height],
        edge: 1.0,
    });

    // Bordered rings tag the innermost ring as edge too, so both border
    // silhouettes antialias.
    let mut inner = vec![QuadrantPoint {
        offset: [-half_width + bw, 0.0],
        edge: 1.0,
    }];
    inner.extend(corner_arc(half_width, half_height, radius, bw, 1.0));
    inner.push(QuadrantPoint {
        offset: [0.0, -half_height + bw],
        edge: 1.0,
    });

    for signs in QUADRANTS {
        emit_quadrant_ring(builder, center, &outer, &inner, params.color, signs);
    }
}

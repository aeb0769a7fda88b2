use std::ops::{Add, Mul};

use glam::Mat4;

/// Rects thinner than this in either axis produce no geometry.
pub const SIZE_EPSILON: f32 = 1e-5;

/// Maximum per-entry deviation tolerated when verifying a reconstructed
/// transform against the requested one before vertices are nudged in place.
pub const NUDGE_EPSILON: f32 = 1e-4;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable, Debug)]
pub struct UVTransform {
    pub uv_offset: [f32; 2],
    pub uv_scale: [f32; 2],
}

impl UVTransform {
    pub fn full() -> Self {
        Self {
            uv_offset: [0.0, 0.0],
            uv_scale: [1.0, 1.0],
        }
    }
}

/// A single tessellated vertex as it lands in device vertex storage.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable, Debug, PartialEq)]
pub struct Vertex {
    pub position: [f32; 3],   // x, y, z coordinates
    pub tex_coords: [f32; 2], // u, v texture coordinates
    pub color: [f32; 4],
    /// 1.0 on silhouette vertices the fragment shader antialiases, 0.0 inside.
    pub edge: f32,
    /// 1.0 when `tex_coords` encode a world-space displacement that must be
    /// re-transformed together with `position` during a nudge.
    pub displacement: f32,
    /// Transform-slot and clip-slot indices the vertex shader looks up.
    pub slot_ids: [f32; 2],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TransformUniform {
    pub transform: [[f32; 4]; 4], // 4x4 transformation matrix
}

impl TransformUniform {
    pub fn identity() -> Self {
        Self {
            transform: Mat4::IDENTITY.to_cols_array_2d(),
        }
    }

    pub fn from_mat4(matrix: &Mat4) -> Self {
        Self {
            transform: matrix.to_cols_array_2d(),
        }
    }
}

/// Largest absolute difference between any pair of matrix entries.
pub fn mat4_max_abs_diff(lhs: &Mat4, rhs: &Mat4) -> f32 {
    let left = lhs.to_cols_array();
    let right = rhs.to_cols_array();
    let mut max = 0.0_f32;
    for (a, b) in left.iter().zip(right.iter()) {
        max = max.max((a - b).abs());
    }
    max
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Mul<f32> for Size {
    type Output = Size;

    fn mul(self, rhs: f32) -> Self::Output {
        Size {
            width: self.width * rhs,
            height: self.height * rhs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Mul<f32> for Position {
    type Output = Position;
    fn mul(self, factor: f32) -> Self::Output {
        Position {
            x: self.x * factor,
            y: self.y * factor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rectangle {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rectangle {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }

    pub fn contains(&self, position: Position) -> bool {
        position.x >= self.x
            && position.x <= self.x + self.width
            && position.y >= self.y
            && position.y <= self.y + self.height
    }

    pub fn pos(&self) -> Position {
        Position {
            x: self.x,
            y: self.y,
        }
    }

    pub fn size(&self) -> Size {
        Size {
            width: self.width,
            height: self.height,
        }
    }

    /// True when the rect is too thin in either axis to produce geometry.
    pub fn is_degenerate(&self) -> bool {
        self.width < SIZE_EPSILON || self.height < SIZE_EPSILON
    }

    pub fn intersect(&self, other: &Rectangle) -> Rectangle {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.width).min(other.x + other.width);
        let bottom = (self.y + self.height).min(other.y + other.height);
        Rectangle::new(left, top, (right - left).max(0.0), (bottom - top).max(0.0))
    }

    /// The rect transformed by `matrix`, assuming an axis-aligned transform.
    pub fn transformed(&self, matrix: &Mat4) -> Rectangle {
        let a = matrix.transform_point3(glam::Vec3::new(self.x, self.y, 0.0));
        let b = matrix.transform_point3(glam::Vec3::new(
            self.x + self.width,
            self.y + self.height,
            0.0,
        ));
        let left = a.x.min(b.x);
        let top = a.y.min(b.y);
        Rectangle::new(left, top, (a.x - b.x).abs(), (a.y - b.y).abs())
    }
}

impl Add<f32> for Rectangle {
    type Output = Rectangle;
    fn add(self, other: f32) -> Self::Output {
        Rectangle::new(self.x, self.y, self.width + other, self.height + other)
    }
}

impl Mul<f32> for Rectangle {
    type Output = Rectangle;
    fn mul(self, factor: f32) -> Self::Output {
        Rectangle::new(self.x, self.y, self.width * factor, self.height * factor)
    }
}

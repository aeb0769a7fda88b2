use std::collections::HashMap;

use uuid::Uuid;

use crate::utils::{Rectangle, TransformUniform, Vertex};

/// Opaque handle to vertex/index storage owned by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshId(pub u32);

/// Index of a fixed-size transform or clip-rect slot inside the
/// device-resident shader-info table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotId {
    pub page: u16,
    pub index: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    Transform,
    Clip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgba8,
    Bgra8,
    R8,
    Rg8,
    Rgba4444,
    /// HDR and compressed formats are never atlased.
    RgbaFloat16,
    RgbaFloat32,
    /// A format this core has no entry for; callers hit a configuration
    /// error rather than a silent fallback.
    Unknown(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapMode {
    Clamp,
    Repeat,
    Mirror,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    Linear,
    Gamma,
}

/// Everything the atlas needs to know about a source texture. The pixel
/// data itself stays on the device; the core only sees identity and shape.
#[derive(Debug, Clone, Copy)]
pub struct TextureInfo {
    pub id: Uuid,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub filter: FilterMode,
    pub wrap_u: WrapMode,
    pub wrap_v: WrapMode,
    pub color_space: ColorSpace,
}

#[derive(Debug, Clone, Copy)]
pub struct DeviceCaps {
    /// Whether fragment shaders can discard against a clip rect.
    pub fragment_clipping: bool,
    /// Texture sampler slots available to one blit batch.
    pub sampler_slots: usize,
    pub max_atlas_size: u32,
}

impl Default for DeviceCaps {
    fn default() -> Self {
        Self {
            fragment_clipping: true,
            sampler_slots: 8,
            max_atlas_size: 4096,
        }
    }
}

/// One queued copy of a source texture into the shared atlas page.
#[derive(Debug, Clone, Copy)]
pub struct AtlasBlit {
    pub source: Uuid,
    pub destination: Rectangle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureBinding {
    #[default]
    Solid,
    Atlas,
    Custom(Uuid),
    Font,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StencilMode {
    #[default]
    Normal,
    WriteMask,
    ClearMask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawState {
    pub texture: TextureBinding,
    pub stencil: StencilMode,
}

/// The outbound device contract. The core allocates, updates, and frees
/// GPU-side storage through this trait and walks the finished command
/// chain against it; it never touches a graphics API directly. Devices
/// may batch or sort internally but must preserve the relative order of
/// draw and state calls within one chain execution.
pub trait GraphicsDevice {
    fn caps(&self) -> DeviceCaps;

    fn allocate_mesh(&mut self, vertex_count: u32, index_count: u32) -> MeshId;
    fn update_mesh(&mut self, mesh: MeshId, vertices: &[Vertex], indices: &[u16]);
    fn free_mesh(&mut self, mesh: MeshId);
    /// Mapped vertex storage for in-place nudging.
    fn vertices_mut(&mut self, mesh: MeshId) -> &mut [Vertex];

    /// Grow the shader-info table so `page_count` pages exist for `kind`.
    fn ensure_slot_pages(&mut self, kind: SlotKind, page_count: u32);
    fn update_transform(&mut self, slot: SlotId, matrix: &TransformUniform, clip_rect: Rectangle);

    fn create_atlas_page(&mut self, size: u32);
    fn destroy_atlas_page(&mut self);
    /// Perform one batch of queued copies into the atlas page. One call is
    /// one draw call on the device side; the batch length never exceeds
    /// [`DeviceCaps::sampler_slots`].
    fn commit_blits(&mut self, blits: &[AtlasBlit]);

    fn draw_indexed(&mut self, mesh: MeshId, first_index: u32, index_count: u32, state: &DrawState);
    fn push_view(&mut self, slot: SlotId);
    fn pop_view(&mut self);
    fn push_scissor(&mut self, rect: Rectangle);
    fn pop_scissor(&mut self);
}

/// Every operation a [`NullDevice`] has been asked to perform, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceOp {
    AllocateMesh(MeshId),
    UpdateMesh(MeshId),
    FreeMesh(MeshId),
    UpdateTransform(SlotId),
    CommitBlits(usize),
    Draw {
        mesh: MeshId,
        first_index: u32,
        index_count: u32,
        state: DrawState,
    },
    PushView(SlotId),
    PopView,
    PushScissor(Rectangle),
    PopScissor,
}

/// A headless device that records every call and keeps mesh contents in
/// CPU memory. Serves as the reference implementation of the contract and
/// as the observation point for tests.
pub struct NullDevice {
    caps: DeviceCaps,
    next_mesh: u32,
    meshes: HashMap<MeshId, (Vec<Vertex>, Vec<u16>)>,
    slot_pages: HashMap<SlotKind, u32>,
    pub ops: Vec<DeviceOp>,
    pub mesh_allocations: usize,
    pub mesh_updates: usize,
    pub transform_updates: usize,
    pub blit_batches: usize,
    pub atlas_page_size: Option<u32>,
}

impl NullDevice {
    pub fn new() -> Self {
        Self::with_caps(DeviceCaps::default())
    }

    pub fn with_caps(caps: DeviceCaps) -> Self {
        Self {
            caps,
            next_mesh: 0,
            meshes: HashMap::new(),
            slot_pages: HashMap::new(),
            ops: Vec::new(),
            mesh_allocations: 0,
            mesh_updates: 0,
            transform_updates: 0,
            blit_batches: 0,
            atlas_page_size: None,
        }
    }

    pub fn mesh_contents(&self, mesh: MeshId) -> Option<(&[Vertex], &[u16])> {
        self.meshes
            .get(&mesh)
            .map(|(vertices, indices)| (vertices.as_slice(), indices.as_slice()))
    }

    pub fn live_mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }
}

impl Default for NullDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsDevice for NullDevice {
    fn caps(&self) -> DeviceCaps {
        self.caps
    }

    fn allocate_mesh(&mut self, vertex_count: u32, index_count: u32) -> MeshId {
        let id = MeshId(self.next_mesh);
        self.next_mesh += 1;
        let zero = Vertex {
            position: [0.0; 3],
            tex_coords: [0.0; 2],
            color: [0.0; 4],
            edge: 0.0,
            displacement: 0.0,
            slot_ids: [0.0; 2],
        };
        self.meshes.insert(
            id,
            (
                vec![zero; vertex_count as usize],
                vec![0; index_count as usize],
            ),
        );
        self.mesh_allocations += 1;
        self.ops.push(DeviceOp::AllocateMesh(id));
        id
    }

    fn update_mesh(&mut self, mesh: MeshId, vertices: &[Vertex], indices: &[u16]) {
        if let Some((stored_vertices, stored_indices)) = self.meshes.get_mut(&mesh) {
            stored_vertices[..vertices.len()].copy_from_slice(vertices);
            stored_indices[..indices.len()].copy_from_slice(indices);
        }
        self.mesh_updates += 1;
        self.ops.push(DeviceOp::UpdateMesh(mesh));
    }

    fn free_mesh(&mut self, mesh: MeshId) {
        self.meshes.remove(&mesh);
        self.ops.push(DeviceOp::FreeMesh(mesh));
    }

    fn vertices_mut(&mut self, mesh: MeshId) -> &mut [Vertex] {
        self.meshes
            .get_mut(&mesh)
            .map(|(vertices, _)| vertices.as_mut_slice())
            .unwrap_or(&mut [])
    }

    fn ensure_slot_pages(&mut self, kind: SlotKind, page_count: u32) {
        let pages = self.slot_pages.entry(kind).or_insert(0);
        *pages = (*pages).max(page_count);
    }

    fn update_transform(&mut self, slot: SlotId, _matrix: &TransformUniform, _clip_rect: Rectangle) {
        self.transform_updates += 1;
        self.ops.push(DeviceOp::UpdateTransform(slot));
    }

    fn create_atlas_page(&mut self, size: u32) {
        self.atlas_page_size = Some(size);
    }

    fn destroy_atlas_page(&mut self) {
        self.atlas_page_size = None;
    }

    fn commit_blits(&mut self, blits: &[AtlasBlit]) {
        self.blit_batches += 1;
        self.ops.push(DeviceOp::CommitBlits(blits.len()));
    }

    fn draw_indexed(&mut self, mesh: MeshId, first_index: u32, index_count: u32, state: &DrawState) {
        self.ops.push(DeviceOp::Draw {
            mesh,
            first_index,
            index_count,
            state: *state,
        });
    }

    fn push_view(&mut self, slot: SlotId) {
        self.ops.push(DeviceOp::PushView(slot));
    }

    fn pop_view(&mut self) {
        self.ops.push(DeviceOp::PopView);
    }

    fn push_scissor(&mut self, rect: Rectangle) {
        self.ops.push(DeviceOp::PushScissor(rect));
    }

    fn pop_scissor(&mut self) {
        self.ops.push(DeviceOp::PopScissor);
    }
}

use std::collections::HashMap;

use uuid::Uuid;

use crate::renderer::{
    AtlasBlit, ColorSpace, DeviceCaps, GraphicsDevice, PixelFormat, TextureInfo, WrapMode,
};
use crate::utils::{Rectangle, UVTransform};
use crate::RenderError;

/// Border around every placed texture so bilinear sampling never bleeds
/// into a neighbor.
const GUTTER: u32 = 1;
const INITIAL_PAGE_SIZE: u32 = 1024;

#[derive(Debug, Clone, Copy)]
struct PixelRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

#[derive(Debug, Clone, Copy)]
struct Placed {
    rect: PixelRect,
    source_width: u32,
    source_height: u32,
}

enum FormatSupport {
    Supported,
    Rejected,
    Unknown,
}

/// Greedy packer merging small, format-eligible textures into one shared
/// page. Placements are keyed by source-texture identity and stay stable
/// until [`reset`](AtlasManager::reset) or a page grow bumps the
/// generation; copies into the page are deferred and committed once per
/// frame in sampler-bounded batches.
pub struct AtlasManager {
    page_size: u32,
    max_image_size: u32,
    color_space: ColorSpace,
    free_rects: Vec<PixelRect>,
    placed: HashMap<Uuid, Placed>,
    insertion_order: Vec<Uuid>,
    pending: Vec<AtlasBlit>,
    committed_blits: usize,
    page_created: bool,
    page_stale: bool,
    generation: u32,
}

impl AtlasManager {
    pub fn new(color_space: ColorSpace, max_image_size: u32) -> Self {
        Self {
            page_size: INITIAL_PAGE_SIZE,
            max_image_size,
            color_space,
            free_rects: vec![PixelRect {
                x: 0,
                y: 0,
                width: INITIAL_PAGE_SIZE,
                height: INITIAL_PAGE_SIZE,
            }],
            placed: HashMap::new(),
            insertion_order: Vec::new(),
            pending: Vec::new(),
            committed_blits: 0,
            page_created: false,
            page_stale: true,
            generation: 0,
        }
    }

    /// Bumped whenever previously returned UV rectangles become invalid
    /// (reset, device loss, page grow). Elements that sampled the atlas
    /// must repaint when this moves.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn committed_blit_count(&self) -> usize {
        self.committed_blits
    }

    pub fn pending_blit_count(&self) -> usize {
        self.pending.len()
    }

    pub fn placed_count(&self) -> usize {
        self.placed.len()
    }

    /// Attempts to place `texture` in the shared page.
    ///
    /// `Ok(Some(uv))` grants a normalized UV rectangle, repeated calls for
    /// the same texture id return the same rectangle without re-packing.
    /// `Ok(None)` rejects the texture (ineligible or page exhausted) and
    /// the caller falls back to an unatlased draw. Truly unknown pixel
    /// formats are a configuration error and fail loudly instead.
    pub fn try_place(
        &mut self,
        texture: &TextureInfo,
        caps: &DeviceCaps,
    ) -> Result<Option<UVTransform>, RenderError> {
        if let Some(existing) = self.placed.get(&texture.id) {
            return Ok(Some(self.uv_of(existing)));
        }

        match Self::format_support(texture.format) {
            FormatSupport::Supported => {}
            FormatSupport::Rejected => return Ok(None),
            FormatSupport::Unknown => {
                log::error!(
                    "texture {} has unknown pixel format {:?}; fix the texture import",
                    texture.id,
                    texture.format
                );
                return Err(RenderError::UnknownPixelFormat(texture.format));
            }
        }
        if texture.wrap_u != WrapMode::Clamp || texture.wrap_v != WrapMode::Clamp {
            return Ok(None);
        }
        if texture.color_space != self.color_space {
            return Ok(None);
        }
        let padded_width = texture.width + 2 * GUTTER;
        let padded_height = texture.height + 2 * GUTTER;
        if padded_width.max(padded_height) > self.max_image_size {
            return Ok(None);
        }

        let mut rect = self.allocate_rect(padded_width, padded_height);
        while rect.is_none() && self.grow(caps) {
            rect = self.allocate_rect(padded_width, padded_height);
        }
        let Some(padded) = rect else {
            log::warn!(
                "atlas page exhausted at {}x{}; texture {} drawn unatlased",
                self.page_size,
                self.page_size,
                texture.id
            );
            return Ok(None);
        };

        let inner = PixelRect {
            x: padded.x + GUTTER,
            y: padded.y + GUTTER,
            width: texture.width,
            height: texture.height,
        };
        let entry = Placed {
            rect: inner,
            source_width: texture.width,
            source_height: texture.height,
        };
        self.pending.push(Self::blit_for(texture.id, inner));
        self.placed.insert(texture.id, entry);
        self.insertion_order.push(texture.id);
        Ok(Some(self.uv_of(&entry)))
    }

    /// Performs all queued copies. Each batch is bounded by the device's
    /// sampler slots and costs one draw call.
    pub fn commit(&mut self, device: &mut dyn GraphicsDevice) {
        if self.pending.is_empty() {
            return;
        }
        if self.page_stale {
            if self.page_created {
                device.destroy_atlas_page();
            }
            device.create_atlas_page(self.page_size);
            self.page_created = true;
            self.page_stale = false;
        }
        let batch_size = device.caps().sampler_slots.max(1);
        for batch in self.pending.chunks(batch_size) {
            device.commit_blits(batch);
            self.committed_blits += batch.len();
        }
        self.pending.clear();
    }

    /// Invalidates everything: placements, queued copies, and the GPU
    /// page. Safe mid-session; used on color-space change and device
    /// reconfiguration. Previously placed textures become re-placeable.
    pub fn reset(&mut self, device: &mut dyn GraphicsDevice) {
        if self.page_created {
            device.destroy_atlas_page();
        }
        self.clear_state();
    }

    /// Device-loss variant of [`reset`](Self::reset): the backing page is
    /// already gone, so nothing is freed device-side.
    pub fn drop_page(&mut self) {
        self.clear_state();
    }

    fn clear_state(&mut self) {
        self.page_size = INITIAL_PAGE_SIZE;
        self.free_rects = vec![PixelRect {
            x: 0,
            y: 0,
            width: self.page_size,
            height: self.page_size,
        }];
        self.placed.clear();
        self.insertion_order.clear();
        self.pending.clear();
        self.committed_blits = 0;
        self.page_created = false;
        self.page_stale = true;
        self.generation += 1;
    }

    /// Doubles the page and replays every placement. Copies already
    /// committed to the old page are lost with it, so the whole placement
    /// set is re-queued, not just the pending tail.
    fn grow(&mut self, caps: &DeviceCaps) -> bool {
        if self.page_size * 2 > caps.max_atlas_size {
            return false;
        }
        self.page_size *= 2;
        self.generation += 1;
        self.page_stale = true;
        self.free_rects = vec![PixelRect {
            x: 0,
            y: 0,
            width: self.page_size,
            height: self.page_size,
        }];
        self.pending.clear();

        let order = std::mem::take(&mut self.insertion_order);
        let old_entries: Vec<(Uuid, Placed)> = order
            .iter()
            .filter_map(|id| self.placed.remove(id).map(|entry| (*id, entry)))
            .collect();
        for (id, old) in old_entries {
            let padded = self
                .allocate_rect(old.source_width + 2 * GUTTER, old.source_height + 2 * GUTTER)
                .unwrap_or_else(|| {
                    // A doubled page always has room for the previous
                    // contents; reaching this means the packer regressed.
                    debug_assert!(false, "atlas grow failed to re-place {id}");
                    PixelRect {
                        x: 0,
                        y: 0,
                        width: old.source_width + 2 * GUTTER,
                        height: old.source_height + 2 * GUTTER,
                    }
                });
            let inner = PixelRect {
                x: padded.x + GUTTER,
                y: padded.y + GUTTER,
                width: old.source_width,
                height: old.source_height,
            };
            self.placed.insert(
                id,
                Placed {
                    rect: inner,
                    source_width: old.source_width,
                    source_height: old.source_height,
                },
            );
            self.insertion_order.push(id);
            self.pending.push(Self::blit_for(id, inner));
        }
        true
    }

    /// Best-fit search over the free-rectangle list, splitting the chosen
    /// rect guillotine style.
    fn allocate_rect(&mut self, width: u32, height: u32) -> Option<PixelRect> {
        let mut best: Option<usize> = None;
        for (index, free) in self.free_rects.iter().enumerate() {
            if free.width >= width && free.height >= height {
                let better = match best {
                    Some(current) => {
                        let held = &self.free_rects[current];
                        free.width * free.height < held.width * held.height
                    }
                    None => true,
                };
                if better {
                    best = Some(index);
                }
            }
        }
        let index = best?;
        let free = self.free_rects.swap_remove(index);
        let taken = PixelRect {
            x: free.x,
            y: free.y,
            width,
            height,
        };
        // Split the remainder along the longer leftover axis.
        let right = PixelRect {
            x: free.x + width,
            y: free.y,
            width: free.width - width,
            height,
        };
        let bottom = PixelRect {
            x: free.x,
            y: free.y + height,
            width: free.width,
            height: free.height - height,
        };
        if right.width > 0 && right.height > 0 {
            self.free_rects.push(right);
        }
        if bottom.width > 0 && bottom.height > 0 {
            self.free_rects.push(bottom);
        }
        Some(taken)
    }

    fn blit_for(id: Uuid, inner: PixelRect) -> AtlasBlit {
        AtlasBlit {
            source: id,
            destination: Rectangle::new(
                inner.x as f32,
                inner.y as f32,
                inner.width as f32,
                inner.height as f32,
            ),
        }
    }

    fn uv_of(&self, entry: &Placed) -> UVTransform {
        let page = self.page_size as f32;
        UVTransform {
            uv_offset: [entry.rect.x as f32 / page, entry.rect.y as f32 / page],
            uv_scale: [
                entry.rect.width as f32 / page,
                entry.rect.height as f32 / page,
            ],
        }
    }

    fn format_support(format: PixelFormat) -> FormatSupport {
        match format {
            PixelFormat::Rgba8
            | PixelFormat::Bgra8
            | PixelFormat::R8
            | PixelFormat::Rg8
            | PixelFormat::Rgba4444 => FormatSupport::Supported,
            PixelFormat::RgbaFloat16 | PixelFormat::RgbaFloat32 => FormatSupport::Rejected,
            PixelFormat::Unknown(_) => FormatSupport::Unknown,
        }
    }
}

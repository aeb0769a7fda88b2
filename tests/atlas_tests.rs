use uuid::Uuid;

use thorium_render::texture_atlas::AtlasManager;
use thorium_render::{
    ColorSpace, DeviceCaps, FilterMode, GraphicsDevice, NullDevice, PixelFormat, TextureInfo,
    WrapMode,
};

fn texture(width: u32, height: u32) -> TextureInfo {
    TextureInfo {
        id: Uuid::new_v4(),
        width,
        height,
        format: PixelFormat::Rgba8,
        filter: FilterMode::Linear,
        wrap_u: WrapMode::Clamp,
        wrap_v: WrapMode::Clamp,
        color_space: ColorSpace::Gamma,
    }
}

fn manager() -> AtlasManager {
    AtlasManager::new(ColorSpace::Gamma, 1024)
}

#[test]
fn placement_is_stable_until_reset() {
    let mut atlas = manager();
    let caps = DeviceCaps::default();
    let tex = texture(64, 64);

    let first = atlas.try_place(&tex, &caps).unwrap().unwrap();
    for _ in 0..3 {
        let again = atlas.try_place(&tex, &caps).unwrap().unwrap();
        assert_eq!(again.uv_offset, first.uv_offset, "uv must not move");
        assert_eq!(again.uv_scale, first.uv_scale, "uv must not resize");
    }
    assert_eq!(atlas.placed_count(), 1, "repeat lookups must not re-pack");
}

#[test]
fn distinct_textures_get_disjoint_rects() {
    let mut atlas = manager();
    let caps = DeviceCaps::default();
    let a = atlas.try_place(&texture(100, 100), &caps).unwrap().unwrap();
    let b = atlas.try_place(&texture(100, 100), &caps).unwrap().unwrap();

    let overlap_x = (a.uv_offset[0] - b.uv_offset[0]).abs() < a.uv_scale[0].min(b.uv_scale[0]);
    let overlap_y = (a.uv_offset[1] - b.uv_offset[1]).abs() < a.uv_scale[1].min(b.uv_scale[1]);
    assert!(!(overlap_x && overlap_y), "placements overlap: {a:?} vs {b:?}");
}

#[test]
fn oversized_and_hdr_textures_are_rejected() {
    let mut atlas = manager();
    let caps = DeviceCaps::default();

    let huge = texture(2000, 16);
    assert!(atlas.try_place(&huge, &caps).unwrap().is_none());

    let mut hdr = texture(32, 32);
    hdr.format = PixelFormat::RgbaFloat16;
    assert!(atlas.try_place(&hdr, &caps).unwrap().is_none());

    let mut repeating = texture(32, 32);
    repeating.wrap_u = WrapMode::Repeat;
    assert!(atlas.try_place(&repeating, &caps).unwrap().is_none());

    let mut mismatched = texture(32, 32);
    mismatched.color_space = ColorSpace::Linear;
    assert!(atlas.try_place(&mismatched, &caps).unwrap().is_none());
}

#[test]
fn unknown_formats_fail_loudly() {
    let mut atlas = manager();
    let caps = DeviceCaps::default();
    let mut odd = texture(32, 32);
    odd.format = PixelFormat::Unknown(99);
    assert!(
        atlas.try_place(&odd, &caps).is_err(),
        "unknown formats are a configuration error, not a silent fallback"
    );
}

#[test]
fn reset_makes_everything_replaceable() {
    let mut atlas = manager();
    let mut device = NullDevice::new();
    let caps = device.caps();
    let textures: Vec<TextureInfo> = (0..5).map(|_| texture(50, 50)).collect();
    for tex in &textures {
        assert!(atlas.try_place(tex, &caps).unwrap().is_some());
    }
    atlas.commit(&mut device);
    let generation = atlas.generation();

    atlas.reset(&mut device);
    assert!(atlas.generation() > generation);
    assert_eq!(atlas.placed_count(), 0);
    for tex in &textures {
        assert!(
            atlas.try_place(tex, &caps).unwrap().is_some(),
            "previously placed textures must be re-placeable after reset"
        );
    }
}

#[test]
fn commit_batches_are_bounded_by_sampler_slots() {
    let mut atlas = manager();
    let mut device = NullDevice::with_caps(DeviceCaps {
        sampler_slots: 2,
        ..DeviceCaps::default()
    });
    let caps = device.caps();
    for _ in 0..5 {
        assert!(atlas.try_place(&texture(20, 20), &caps).unwrap().is_some());
    }
    atlas.commit(&mut device);
    assert_eq!(device.blit_batches, 3, "5 blits in slots of 2 = 3 batches");
    assert_eq!(atlas.committed_blit_count(), 5);
    assert_eq!(atlas.pending_blit_count(), 0);
}

#[test]
fn a_full_page_grows_and_replays_every_blit() {
    let mut atlas = AtlasManager::new(ColorSpace::Gamma, 4096);
    let mut device = NullDevice::new();
    let caps = device.caps();

    // Fill past the initial 1024 page with 600px tiles.
    let generation = atlas.generation();
    for _ in 0..4 {
        assert!(atlas.try_place(&texture(600, 600), &caps).unwrap().is_some());
    }
    assert!(atlas.generation() > generation, "grow must bump the generation");
    atlas.commit(&mut device);
    // Growth replays the whole placement set, not just the newest entry.
    assert_eq!(atlas.committed_blit_count(), atlas.placed_count());
}

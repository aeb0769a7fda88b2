mod common;

use common::{solid_rect, Prim, StubElement, StubShaper, StubTree};
use thorium_render::{
    ClipInfo, ColorSpace, DeviceCaps, NullDevice, Position, Rectangle, RenderCore, RenderHints,
};

fn core() -> RenderCore {
    RenderCore::new(DeviceCaps::default(), ColorSpace::Gamma)
}

fn update(core: &mut RenderCore, tree: &StubTree, device: &mut NullDevice) {
    let mut shaper = StubShaper::new();
    core.update(tree, &mut shaper, device);
}

#[test]
fn repaints_reuse_the_mesh_until_it_outgrows_its_capacity() {
    let mut core = core();
    let tree = StubTree::new();
    let mut device = NullDevice::new();

    let element = core.on_child_added(None, 0).unwrap();
    tree.set(
        element,
        StubElement {
            prims: vec![solid_rect(50.0, 50.0)],
            ..StubElement::default()
        },
    );
    update(&mut core, &tree, &mut device);
    assert_eq!(core.stats().mesh_allocations, 1);

    // Same vertex count: the buffer is updated in place.
    tree.set(
        element,
        StubElement {
            prims: vec![Prim::Rect {
                rect: Rectangle::new(0.0, 0.0, 80.0, 30.0),
                color: [1.0, 0.0, 0.0, 1.0],
                radius: 0.0,
            }],
            ..StubElement::default()
        },
    );
    core.on_visuals_changed(element, false);
    core.reset_stats();
    update(&mut core, &tree, &mut device);
    assert_eq!(core.stats().mesh_updates, 1, "same size reuses the buffer");
    assert_eq!(core.stats().mesh_allocations, 0);

    // Rounded corners need far more vertices: reallocation.
    tree.set(
        element,
        StubElement {
            prims: vec![Prim::Rect {
                rect: Rectangle::new(0.0, 0.0, 80.0, 30.0),
                color: [1.0, 0.0, 0.0, 1.0],
                radius: 6.0,
            }],
            ..StubElement::default()
        },
    );
    core.on_visuals_changed(element, false);
    core.reset_stats();
    update(&mut core, &tree, &mut device);
    assert_eq!(core.stats().mesh_allocations, 1, "larger mesh reallocates");

    // Shrinking back fits the big buffer: update in place again.
    tree.set(
        element,
        StubElement {
            prims: vec![solid_rect(50.0, 50.0)],
            ..StubElement::default()
        },
    );
    core.on_visuals_changed(element, false);
    core.reset_stats();
    update(&mut core, &tree, &mut device);
    assert_eq!(core.stats().mesh_updates, 1);
    assert_eq!(core.stats().mesh_allocations, 0);
}

#[test]
fn skinned_descendants_borrow_the_ancestor_slot() {
    let mut core = core();
    let tree = StubTree::new();
    let mut device = NullDevice::new();

    let clipper = core.on_child_added(None, 0).unwrap();
    tree.set(
        clipper,
        StubElement {
            clip: Some(ClipInfo {
                clips_children: true,
                rect: Rectangle::new(0.0, 0.0, 200.0, 200.0),
                radius: 0.0,
            }),
            prims: vec![solid_rect(200.0, 200.0)],
            ..StubElement::default()
        },
    );
    let skinned = core.on_child_added(Some(clipper), 0).unwrap();
    tree.set(
        skinned,
        StubElement {
            hints: RenderHints {
                skinned: true,
                ..RenderHints::default()
            },
            prims: vec![solid_rect(40.0, 40.0)],
            ..StubElement::default()
        },
    );
    update(&mut core, &tree, &mut device);

    // The clipper owns one slot; the skinned child borrows it instead of
    // allocating a second one.
    assert_eq!(core.transform_slot_count(), 1);

    // A skinned element without any ancestor owner allocates its own.
    let lone = core.on_child_added(None, 1).unwrap();
    tree.set(
        lone,
        StubElement {
            hints: RenderHints {
                skinned: true,
                ..RenderHints::default()
            },
            prims: vec![solid_rect(40.0, 40.0)],
            ..StubElement::default()
        },
    );
    update(&mut core, &tree, &mut device);
    assert_eq!(core.transform_slot_count(), 2);

    // Removal frees owned slots exactly once.
    core.on_child_removing(clipper);
    update(&mut core, &tree, &mut device);
    assert_eq!(core.transform_slot_count(), 1, "only the lone owner remains");
}

#[test]
fn atlas_reset_repaints_atlas_users() {
    let mut core = core();
    let tree = StubTree::new();
    let mut device = NullDevice::new();

    let textured = core.on_child_added(None, 0).unwrap();
    let info = thorium_render::TextureInfo {
        id: uuid::Uuid::new_v4(),
        width: 64,
        height: 64,
        format: thorium_render::PixelFormat::Rgba8,
        filter: thorium_render::FilterMode::Linear,
        wrap_u: thorium_render::WrapMode::Clamp,
        wrap_v: thorium_render::WrapMode::Clamp,
        color_space: ColorSpace::Gamma,
    };
    tree.set(
        textured,
        StubElement {
            prims: vec![Prim::Texture {
                rect: Rectangle::new(0.0, 0.0, 64.0, 64.0),
                tint: [1.0; 4],
                info,
            }],
            ..StubElement::default()
        },
    );
    let plain = core.on_child_added(None, 1).unwrap();
    tree.set(
        plain,
        StubElement {
            prims: vec![solid_rect(20.0, 20.0)],
            ..StubElement::default()
        },
    );
    update(&mut core, &tree, &mut device);
    assert_eq!(core.atlas().placed_count(), 1);

    core.reset_atlas(&mut device);
    let textured_before = tree.paint_count(textured);
    let plain_before = tree.paint_count(plain);
    update(&mut core, &tree, &mut device);
    assert_eq!(
        tree.paint_count(textured) - textured_before,
        1,
        "atlas users repaint after a reset"
    );
    assert_eq!(
        tree.paint_count(plain) - plain_before,
        0,
        "untextured elements are untouched"
    );
    assert_eq!(core.atlas().placed_count(), 1, "texture re-placed on repaint");
}

#[test]
fn runaway_text_is_truncated_at_the_index_range() {
    common::init_logs();
    let mut core = core();
    let tree = StubTree::new();
    let mut device = NullDevice::new();

    let marquee = core.on_child_added(None, 0).unwrap();
    // 17k glyphs would need 68k vertices, past the 16-bit index range.
    let long_text: String = std::iter::repeat('x').take(17_000).collect();
    tree.set(
        marquee,
        StubElement {
            prims: vec![Prim::Text {
                origin: Position { x: 0.0, y: 0.0 },
                font: uuid::Uuid::new_v4(),
                text: long_text,
            }],
            ..StubElement::default()
        },
    );
    update(&mut core, &tree, &mut device);

    let draws: Vec<_> = device
        .ops
        .iter()
        .filter_map(|op| match op {
            thorium_render::DeviceOp::AllocateMesh(mesh) => device.mesh_contents(*mesh),
            _ => None,
        })
        .collect();
    assert_eq!(draws.len(), 1);
    let (vertices, _) = draws[0];
    assert!(
        vertices.len() <= u16::MAX as usize,
        "vertex count stays addressable by 16-bit indices"
    );
    assert_eq!(vertices.len() % 4, 0, "truncation lands on a whole quad");
}

#[test]
fn stats_snapshot_serializes_for_the_overlay() -> anyhow::Result<()> {
    let mut core = core();
    let tree = StubTree::new();
    let mut device = NullDevice::new();

    let element = core.on_child_added(None, 0).unwrap();
    tree.set(
        element,
        StubElement {
            prims: vec![solid_rect(10.0, 10.0)],
            ..StubElement::default()
        },
    );
    update(&mut core, &tree, &mut device);

    let json = serde_json::to_value(core.stats())?;
    assert_eq!(json["elements_added"], 1);
    assert_eq!(json["mesh_allocations"], 1);
    assert_eq!(json["tessellations"], 1);
    Ok(())
}

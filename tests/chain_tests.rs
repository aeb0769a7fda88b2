mod common;

use common::{solid_rect, Prim, StubElement, StubShaper, StubTree};
use thorium_render::{
    ClipInfo, ColorSpace, DeviceCaps, DeviceOp, NodeId, NullDevice, Rectangle, RenderCore,
    StencilMode, TextureBinding,
};

fn core() -> RenderCore {
    RenderCore::new(DeviceCaps::default(), ColorSpace::Gamma)
}

fn update(core: &mut RenderCore, tree: &StubTree, device: &mut NullDevice) {
    let mut shaper = StubShaper::new();
    core.update(tree, &mut shaper, device);
}

#[test]
fn solid_child_produces_one_quad_draw() {
    let mut core = core();
    let tree = StubTree::new();
    let mut device = NullDevice::new();

    let root = core.on_child_added(None, 0).unwrap();
    let child = core.on_child_added(Some(root), 0).unwrap();
    tree.set(
        child,
        StubElement {
            prims: vec![solid_rect(100.0, 40.0)],
            ..StubElement::default()
        },
    );
    update(&mut core, &tree, &mut device);

    assert_eq!(core.command_count(), 1, "one solid rect, one draw command");
    device.clear_ops();
    core.draw(&mut device);
    let draws: Vec<_> = device
        .ops
        .iter()
        .filter_map(|op| match op {
            DeviceOp::Draw {
                mesh, index_count, ..
            } => Some((*mesh, *index_count)),
            _ => None,
        })
        .collect();
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].1, 6);
    let (vertices, indices) = device.mesh_contents(draws[0].0).unwrap();
    assert_eq!(vertices.len(), 4);
    assert_eq!(indices.len(), 6);
}

#[test]
fn rounded_clip_brackets_the_subtree_with_push_pop() {
    let mut core = core();
    let tree = StubTree::new();
    let mut device = NullDevice::new();

    let root = core.on_child_added(None, 0).unwrap();
    tree.set(
        root,
        StubElement {
            clip: Some(ClipInfo {
                clips_children: true,
                rect: Rectangle::new(0.0, 0.0, 80.0, 80.0),
                radius: 8.0,
            }),
            prims: vec![
                solid_rect(80.0, 80.0),
                Prim::Border {
                    rect: Rectangle::new(0.0, 0.0, 80.0, 80.0),
                    color: [0.0, 0.0, 0.0, 1.0],
                    width: 2.0,
                    radius: 8.0,
                },
            ],
            ..StubElement::default()
        },
    );
    let child = core.on_child_added(Some(root), 0).unwrap();
    tree.set(
        child,
        StubElement {
            prims: vec![solid_rect(20.0, 20.0)],
            ..StubElement::default()
        },
    );
    update(&mut core, &tree, &mut device);

    assert_eq!(
        core.clip_method(root),
        Some(thorium_render::ClipMethod::Stencil),
        "rounded shapes force stencil clipping"
    );

    device.clear_ops();
    core.draw(&mut device);
    let first = device.ops.first().expect("chain must not be empty");
    assert!(
        matches!(first, DeviceOp::PushView(_)),
        "stencil bracket opens the chain, got {first:?}"
    );
    assert!(
        matches!(device.ops.last(), Some(DeviceOp::PopView)),
        "stencil bracket closes the chain"
    );
    let masks = device
        .ops
        .iter()
        .filter(|op| {
            matches!(op, DeviceOp::Draw { state, .. } if state.stencil == StencilMode::WriteMask)
        })
        .count();
    let clears = device
        .ops
        .iter()
        .filter(|op| {
            matches!(op, DeviceOp::Draw { state, .. } if state.stencil == StencilMode::ClearMask)
        })
        .count();
    assert_eq!(masks, 1, "one mask raise");
    assert_eq!(clears, 1, "one mask lower");
}

fn owners_in_first_seen_order(core: &RenderCore) -> Vec<NodeId> {
    let mut seen = Vec::new();
    for owner in core.command_owners() {
        if !seen.contains(&owner) {
            seen.push(owner);
        }
    }
    seen
}

#[test]
fn chain_follows_depth_first_order_across_mutations() {
    let mut core = core();
    let tree = StubTree::new();
    let mut device = NullDevice::new();

    let root = core.on_child_added(None, 0).unwrap();
    let a = core.on_child_added(Some(root), 0).unwrap();
    let b = core.on_child_added(Some(root), 1).unwrap();
    let a1 = core.on_child_added(Some(a), 0).unwrap();
    let c = core.on_child_added(Some(root), 2).unwrap();
    for (id, size) in [(root, 300.0), (a, 100.0), (a1, 50.0), (b, 100.0), (c, 100.0)] {
        tree.set(
            id,
            StubElement {
                prims: vec![solid_rect(size, size)],
                ..StubElement::default()
            },
        );
    }
    update(&mut core, &tree, &mut device);
    assert_eq!(owners_in_first_seen_order(&core), vec![root, a, a1, b, c]);

    // Insert between existing siblings.
    let between = core.on_child_added(Some(root), 1).unwrap();
    tree.set(
        between,
        StubElement {
            prims: vec![solid_rect(10.0, 10.0)],
            ..StubElement::default()
        },
    );
    update(&mut core, &tree, &mut device);
    assert_eq!(
        owners_in_first_seen_order(&core),
        vec![root, a, a1, between, b, c]
    );

    // Reorder: move c to the front.
    core.on_children_reordered(root, &[c, a, between, b]);
    update(&mut core, &tree, &mut device);
    assert_eq!(
        owners_in_first_seen_order(&core),
        vec![root, c, a, a1, between, b]
    );

    // Remove a subtree; its commands leave the chain.
    core.on_child_removing(a);
    update(&mut core, &tree, &mut device);
    assert_eq!(
        owners_in_first_seen_order(&core),
        vec![root, c, between, b]
    );
    assert!(!core.contains(a));
    assert!(!core.contains(a1));
}

#[test]
fn events_for_stale_handles_are_ignored() {
    let mut core = core();
    let tree = StubTree::new();
    let mut device = NullDevice::new();

    let root = core.on_child_added(None, 0).unwrap();
    tree.set(
        root,
        StubElement {
            prims: vec![solid_rect(10.0, 10.0)],
            ..StubElement::default()
        },
    );
    update(&mut core, &tree, &mut device);

    core.on_child_removing(root);
    // All of these carry a dead handle and must be no-ops.
    core.on_child_removing(root);
    core.on_transform_or_size_changed(root);
    core.on_clipping_changed(root);
    core.on_visuals_changed(root, true);
    assert!(core.on_child_added(Some(root), 0).is_none());
    update(&mut core, &tree, &mut device);
    assert_eq!(core.command_count(), 0);
    assert_eq!(core.element_count(), 0);
}

#[test]
fn immediate_commands_keep_their_position_in_the_run() {
    let mut core = core();
    let mut device = NullDevice::new();

    let _root = core.on_child_added(None, 0).unwrap();
    // Script the paint by hand: rect, immediate marker, rect.
    struct Scripted;
    impl thorium_render::ElementSource for Scripted {
        fn world_transform(&self, _: NodeId) -> glam::Mat4 {
            glam::Mat4::IDENTITY
        }
        fn hints(&self, _: NodeId) -> thorium_render::RenderHints {
            thorium_render::RenderHints::default()
        }
        fn clip_info(&self, _: NodeId) -> ClipInfo {
            ClipInfo::default()
        }
        fn paint(&self, _: NodeId, ctx: &mut thorium_render::PaintContext<'_>) {
            ctx.rect(Rectangle::new(0.0, 0.0, 10.0, 10.0), [1.0; 4], 0.0);
            ctx.immediate(Box::new(|device| {
                device.push_scissor(Rectangle::new(7.0, 7.0, 7.0, 7.0));
                device.pop_scissor();
            }));
            ctx.rect(Rectangle::new(5.0, 5.0, 10.0, 10.0), [1.0; 4], 0.0);
        }
    }
    let scripted = Scripted;
    let mut shaper = StubShaper::new();
    core.update(&scripted, &mut shaper, &mut device);

    device.clear_ops();
    core.draw(&mut device);
    let kinds: Vec<&DeviceOp> = device.ops.iter().collect();
    assert_eq!(kinds.len(), 4, "draw, scissor push, scissor pop, draw");
    assert!(matches!(kinds[0], DeviceOp::Draw { .. }));
    assert!(matches!(kinds[1], DeviceOp::PushScissor(_)));
    assert!(matches!(kinds[2], DeviceOp::PopScissor));
    assert!(matches!(kinds[3], DeviceOp::Draw { .. }));
}

#[test]
fn oversized_texture_falls_back_to_custom_draw() {
    let mut core = core();
    let tree = StubTree::new();
    let mut device = NullDevice::new();

    let root = core.on_child_added(None, 0).unwrap();
    let info = thorium_render::TextureInfo {
        id: uuid::Uuid::new_v4(),
        width: 3000,
        height: 3000,
        format: thorium_render::PixelFormat::Rgba8,
        filter: thorium_render::FilterMode::Linear,
        wrap_u: thorium_render::WrapMode::Clamp,
        wrap_v: thorium_render::WrapMode::Clamp,
        color_space: ColorSpace::Gamma,
    };
    tree.set(
        root,
        StubElement {
            prims: vec![Prim::Texture {
                rect: Rectangle::new(0.0, 0.0, 128.0, 128.0),
                tint: [1.0; 4],
                info,
            }],
            ..StubElement::default()
        },
    );
    update(&mut core, &tree, &mut device);

    device.clear_ops();
    core.draw(&mut device);
    let custom = device.ops.iter().any(|op| {
        matches!(op, DeviceOp::Draw { state, .. } if state.texture == TextureBinding::Custom(info.id))
    });
    assert!(custom, "rejected texture must draw unatlased");
    assert_eq!(device.blit_batches, 0, "nothing was atlased");
}

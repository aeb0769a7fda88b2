use thorium_render::tessellation::{count, fill, MeshBuilder, TessParams};
use thorium_render::Rectangle;

fn filled(rect: Rectangle, radius: f32, border: f32) -> TessParams {
    TessParams {
        rect,
        color: [1.0, 0.0, 0.0, 1.0],
        border_width: border,
        radius,
        uv: None,
    }
}

#[test]
fn plain_rect_is_a_single_quad() {
    let params = filled(Rectangle::new(10.0, 20.0, 100.0, 50.0), 0.0, 0.0);
    let counts = count(&params);
    assert_eq!(counts.vertices, 4);
    assert_eq!(counts.indices, 6);

    let mut builder = MeshBuilder::new([-1.0, -1.0]);
    fill(&params, &mut builder);
    assert_eq!(builder.vertices().len(), 4);
    assert_eq!(builder.indices().len(), 6);
}

#[test]
fn count_and_fill_agree_for_all_combinations() {
    let rect = Rectangle::new(0.0, 0.0, 64.0, 40.0);
    for radius in [0.0, 0.5, 4.0, 12.0, 100.0] {
        for border in [0.0, 1.0, 3.0, 25.0] {
            let params = filled(rect, radius, border);
            let expected = count(&params);
            let mut builder = MeshBuilder::new([-1.0, -1.0]);
            fill(&params, &mut builder);
            assert_eq!(
                builder.vertices().len() as u32,
                expected.vertices,
                "vertex count mismatch for radius {radius} border {border}"
            );
            assert_eq!(
                builder.indices().len() as u32,
                expected.indices,
                "index count mismatch for radius {radius} border {border}"
            );
        }
    }
}

#[test]
fn degenerate_rects_produce_no_geometry() {
    for rect in [
        Rectangle::new(0.0, 0.0, 0.0, 10.0),
        Rectangle::new(0.0, 0.0, 10.0, 0.0),
        Rectangle::new(5.0, 5.0, 1e-7, 1e-7),
    ] {
        let params = filled(rect, 3.0, 2.0);
        assert!(count(&params).is_empty());
        let mut builder = MeshBuilder::new([-1.0, -1.0]);
        fill(&params, &mut builder);
        assert!(builder.indices().is_empty(), "degenerate rect must not tessellate");
    }
}

#[test]
fn indices_stay_in_vertex_range() {
    let params = filled(Rectangle::new(0.0, 0.0, 30.0, 30.0), 8.0, 2.0);
    let mut builder = MeshBuilder::new([-1.0, -1.0]);
    fill(&params, &mut builder);
    let vertex_count = builder.vertices().len() as u16;
    for &index in builder.indices() {
        assert!(index < vertex_count);
    }
    assert_eq!(builder.indices().len() % 3, 0, "triangle list expected");
}

#[test]
fn filled_fan_keeps_a_solid_interior_while_border_ring_is_all_edge() {
    let rounded = filled(Rectangle::new(0.0, 0.0, 40.0, 40.0), 10.0, 0.0);
    let mut builder = MeshBuilder::new([-1.0, -1.0]);
    fill(&rounded, &mut builder);
    let solid = builder.vertices().iter().filter(|v| v.edge == 0.0).count();
    let tagged = builder.vertices().iter().filter(|v| v.edge == 1.0).count();
    assert!(solid > 0, "filled fan needs solid interior vertices");
    assert!(tagged > 0, "filled fan needs antialiased rim vertices");

    let ring = filled(Rectangle::new(0.0, 0.0, 40.0, 40.0), 10.0, 3.0);
    let mut builder = MeshBuilder::new([-1.0, -1.0]);
    fill(&ring, &mut builder);
    assert!(
        builder.vertices().iter().all(|v| v.edge == 1.0),
        "both silhouettes of a border ring are antialiased"
    );
}

#[test]
fn quadrants_mirror_about_the_rect_center() {
    let params = filled(Rectangle::new(0.0, 0.0, 40.0, 40.0), 10.0, 0.0);
    let mut builder = MeshBuilder::new([-1.0, -1.0]);
    fill(&params, &mut builder);
    // For a centered square every vertex must have a mirror partner.
    for vertex in builder.vertices() {
        let mirrored = [40.0 - vertex.position[0], vertex.position[1]];
        assert!(
            builder.vertices().iter().any(|other| {
                (other.position[0] - mirrored[0]).abs() < 1e-3
                    && (other.position[1] - mirrored[1]).abs() < 1e-3
            }),
            "vertex {:?} lacks a horizontal mirror",
            vertex.position
        );
    }
}

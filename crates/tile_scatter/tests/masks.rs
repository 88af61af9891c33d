use glam::Vec2;
use tile_scatter::prelude::*;

fn grid() -> CanvasGrid {
    CanvasGrid::new(Vec2::ZERO, 1.0, 48, 48)
}

fn in_unit_range(r: &Raster) -> bool {
    r.data.iter().all(|v| (0.0..=1.0).contains(v))
}

#[test]
fn hierarchy_output_stays_in_unit_range() {
    let textures = TextureRegistry::new();
    let noise = NoiseParams::default().with_zoom(8.0);
    let mut biome = MaskStack::new("biome")
        .with_node(MaskNode::noise(noise.clone().with_seed(3)))
        .with_node(MaskNode::constant(0.9).with_blend(BlendMode::Add));
    let mut spawner = MaskStack::new("spawner")
        .with_node(MaskNode::noise(noise.clone().with_kind(NoiseKind::Billow)))
        .with_node(MaskNode::constant(0.7).with_blend(BlendMode::Subtract))
        .with_node(MaskNode::constant(1.0).with_blend(BlendMode::Max).inverted());
    let mut rule = MaskStack::new("rule")
        .with_node(MaskNode::passthrough())
        .with_node(MaskNode::noise(noise.with_seed(11)).with_blend(BlendMode::Add));
    // Overshoots above 1 in the middle of the range.
    let strength = Curve::from_keys([(0.0, 0.0), (0.5, 1.6), (1.0, 1.2)]);

    let mut sink = VecSink::new();
    let mut ctx = MaskContext::new(Vec2::splat(24.0), &textures);
    let field = evaluate_hierarchy(
        MaskHierarchy {
            biome: Some(&mut biome),
            spawner: &mut spawner,
            rule: &mut rule,
            strength: &strength,
        },
        &grid(),
        &mut ctx,
        &mut sink,
    )
    .expect("evaluate");

    assert_eq!(field.data.len(), 48 * 48);
    assert!(in_unit_range(&field));
    assert_eq!(sink.count(SpawnEventKind::Warning), 0);
}

#[test]
fn add_first_node_warns_once_then_stays_corrected() {
    let textures = TextureRegistry::new();
    let mut stack = MaskStack::new("rule:meadow")
        .with_node(MaskNode::constant(0.5).with_blend(BlendMode::Add))
        .with_node(MaskNode::constant(0.5));
    let mut sink = VecSink::new();

    for _ in 0..3 {
        let mut ctx = MaskContext::new(Vec2::ZERO, &textures);
        let out = stack.evaluate(&grid(), &mut ctx, &mut sink).expect("evaluate");
        assert!(out.field.data.iter().all(|v| (v - 0.25).abs() < 1e-6));
    }
    assert_eq!(sink.count(SpawnEventKind::Warning), 1);
    assert_eq!(stack.nodes[0].blend, BlendMode::Multiply);
}

#[test]
fn texture_mask_samples_world_space() {
    let mut painted = Raster::new(CanvasGrid::new(Vec2::ZERO, 1.0, 48, 48));
    for iy in 0..48 {
        for ix in 24..48 {
            painted.set(ix, iy, 1.0);
        }
    }
    let mut textures = TextureRegistry::new();
    textures.register("paint", RasterTexture::new(painted));

    let mut stack =
        MaskStack::new("painted").with_node(MaskNode::texture("paint", TextureChannel::R));
    let mut sink = VecSink::new();
    let mut ctx = MaskContext::new(Vec2::splat(24.0), &textures);
    let out = stack.evaluate(&grid(), &mut ctx, &mut sink).expect("evaluate");

    assert_eq!(out.field.sample_nearest(Vec2::new(10.5, 30.5)), 0.0);
    assert_eq!(out.field.sample_nearest(Vec2::new(40.5, 30.5)), 1.0);
    assert!(in_unit_range(&out.field));
}

//! Biome, spawner and rule stacks combined into one rule density field.
//!
//! Each level is evaluated on the same grid with the combined field of the levels above it as
//! its parent. A level that used a passthrough node already carries its parent, so its output
//! replaces the parent instead of being multiplied with it. The spawner's strength curve is
//! applied to the final field. Every intermediate field is lent from the context's pool.
use super::curve::Curve;
use super::stack::{MaskContext, MaskStack};
use crate::error::Result;
use crate::raster::{CanvasGrid, PooledRaster};
use crate::spawn::events::EventSink;

/// The stacks feeding one rule evaluation.
pub struct MaskHierarchy<'s> {
    pub biome: Option<&'s mut MaskStack>,
    pub spawner: &'s mut MaskStack,
    pub rule: &'s mut MaskStack,
    pub strength: &'s Curve,
}

/// Combined rule field in `[0, 1]` on `grid`.
///
/// Intermediate fields go back to `ctx.pool` on return, including when a stack fails.
pub fn evaluate_hierarchy(
    hierarchy: MaskHierarchy<'_>,
    grid: &CanvasGrid,
    ctx: &mut MaskContext<'_>,
    sink: &mut dyn EventSink,
) -> Result<PooledRaster> {
    let MaskHierarchy {
        biome,
        spawner,
        rule,
        strength,
    } = hierarchy;

    let biome_field = match biome {
        Some(stack) => Some(stack.evaluate_with_parent(grid, ctx, None, sink)?.field),
        None => None,
    };

    let spawner_out = spawner.evaluate_with_parent(grid, ctx, biome_field.as_deref(), sink)?;
    let parent = combine(biome_field, spawner_out.field, spawner_out.passthrough);

    let rule_out = rule.evaluate_with_parent(grid, ctx, Some(&*parent), sink)?;
    let mut field = combine(Some(parent), rule_out.field, rule_out.passthrough);

    if !strength.is_identity() {
        for v in &mut field.data {
            *v = strength.evaluate(*v);
        }
    }
    field.clamp01();
    Ok(field)
}

fn combine(
    parent: Option<PooledRaster>,
    mut child: PooledRaster,
    passthrough: bool,
) -> PooledRaster {
    match parent {
        Some(parent) if !passthrough => {
            for (c, p) in child.data.iter_mut().zip(parent.data.iter()) {
                *c *= *p;
            }
            child
        }
        _ => child,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use glam::Vec2;

    use super::*;
    use crate::mask::node::{BlendMode, MaskNode};
    use crate::mask::noise::NoiseParams;
    use crate::mask::texture::TextureRegistry;
    use crate::raster::{BufferPool, Raster};

    fn grid() -> CanvasGrid {
        CanvasGrid::new(Vec2::ZERO, 1.0, 2, 2)
    }

    fn approx_all(r: &Raster, expected: f32) -> bool {
        r.data.iter().all(|v| (*v - expected).abs() < 1e-5)
    }

    #[test]
    fn levels_multiply_without_passthrough() {
        let textures = TextureRegistry::new();
        let mut ctx = MaskContext::new(Vec2::ZERO, &textures);
        let mut biome = MaskStack::new("biome").with_node(MaskNode::constant(0.5));
        let mut spawner = MaskStack::new("spawner").with_node(MaskNode::constant(0.8));
        let mut rule = MaskStack::new("rule").with_node(MaskNode::constant(0.5));
        let curve = Curve::linear();
        let field = evaluate_hierarchy(
            MaskHierarchy {
                biome: Some(&mut biome),
                spawner: &mut spawner,
                rule: &mut rule,
                strength: &curve,
            },
            &grid(),
            &mut ctx,
            &mut (),
        )
        .expect("evaluate");
        assert!(approx_all(&field, 0.2));
    }

    #[test]
    fn passthrough_replaces_the_parent_multiply() {
        let textures = TextureRegistry::new();
        let mut ctx = MaskContext::new(Vec2::ZERO, &textures);
        let mut spawner = MaskStack::new("spawner").with_node(MaskNode::constant(0.4));
        // Max with the parent: 0.3 then max(0.3, 0.4) = 0.4, not 0.3 * 0.4.
        let mut rule = MaskStack::new("rule")
            .with_node(MaskNode::constant(0.3))
            .with_node(MaskNode::passthrough().with_blend(BlendMode::Max));
        let curve = Curve::linear();
        let field = evaluate_hierarchy(
            MaskHierarchy {
                biome: None,
                spawner: &mut spawner,
                rule: &mut rule,
                strength: &curve,
            },
            &grid(),
            &mut ctx,
            &mut (),
        )
        .expect("evaluate");
        assert!(approx_all(&field, 0.4));
    }

    #[test]
    fn strength_curve_applies_last() {
        let textures = TextureRegistry::new();
        let mut ctx = MaskContext::new(Vec2::ZERO, &textures);
        let mut spawner = MaskStack::new("spawner");
        let mut rule = MaskStack::new("rule").with_node(MaskNode::constant(0.5));
        let curve = Curve::from_keys([(0.0, 0.0), (0.5, 1.0), (1.0, 1.0)]);
        let field = evaluate_hierarchy(
            MaskHierarchy {
                biome: None,
                spawner: &mut spawner,
                rule: &mut rule,
                strength: &curve,
            },
            &grid(),
            &mut ctx,
            &mut (),
        )
        .expect("evaluate");
        assert!(approx_all(&field, 1.0));
    }

    #[test]
    fn intermediate_fields_return_to_the_pool() {
        let textures = TextureRegistry::new();
        let pool = Arc::new(BufferPool::new());
        let mut ctx = MaskContext::new(Vec2::ZERO, &textures).with_pool(Arc::clone(&pool));
        let mut biome = MaskStack::new("biome").with_node(MaskNode::constant(0.5));
        let mut spawner = MaskStack::new("spawner").with_node(MaskNode::constant(0.8));
        let mut rule = MaskStack::new("rule").with_node(MaskNode::constant(0.5));
        let curve = Curve::linear();

        for _ in 0..3 {
            let field = evaluate_hierarchy(
                MaskHierarchy {
                    biome: Some(&mut biome),
                    spawner: &mut spawner,
                    rule: &mut rule,
                    strength: &curve,
                },
                &grid(),
                &mut ctx,
                &mut (),
            )
            .expect("evaluate");
            assert_eq!(pool.outstanding(), 1);
            assert!(approx_all(&field, 0.2));
        }
        assert_eq!(pool.outstanding(), 0);
        // Later evaluations reuse the buffers of the first.
        let stats = pool.stats();
        assert!(stats.reuses > 0);
        assert!(stats.allocations <= 6);
    }

    #[test]
    fn failing_stack_still_returns_its_buffers() {
        let textures = TextureRegistry::new();
        let pool = Arc::new(BufferPool::new());
        let mut ctx = MaskContext::new(Vec2::ZERO, &textures).with_pool(Arc::clone(&pool));
        let mut biome = MaskStack::new("biome").with_node(MaskNode::constant(0.5));
        let mut spawner = MaskStack::new("spawner").with_node(MaskNode::constant(0.8));
        let broken = NoiseParams {
            lacunarity: f32::NAN,
            ..Default::default()
        };
        let mut rule = MaskStack::new("rule").with_node(MaskNode::noise(broken));
        let curve = Curve::linear();

        let result = evaluate_hierarchy(
            MaskHierarchy {
                biome: Some(&mut biome),
                spawner: &mut spawner,
                rule: &mut rule,
                strength: &curve,
            },
            &grid(),
            &mut ctx,
            &mut (),
        );
        assert!(result.is_err());
        assert_eq!(pool.outstanding(), 0);
        assert!(pool.stats().allocations > 0);
    }

    #[test]
    fn nan_samples_clamp_to_zero() {
        let mut r = Raster::filled(grid(), f32::NAN);
        r.clamp01();
        assert!(approx_all(&r, 0.0));
    }
}

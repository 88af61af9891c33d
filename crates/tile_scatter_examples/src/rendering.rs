use std::collections::HashMap;
use std::path::Path;

use glam::Vec2;
use image::{Rgb, RgbImage};
use tile_scatter::prelude::*;
use tracing_subscriber::EnvFilter;

/// Installs a fmt subscriber honoring `RUST_LOG`, `info` by default.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// How instances of one prototype are drawn.
#[derive(Clone, Copy, Debug)]
pub struct InstanceStyle {
    pub color: [u8; 3],
    /// Minimum radius in pixels; larger footprints are drawn to scale.
    pub min_radius_px: i32,
}

/// Image size, world window and colors of a rendering.
#[derive(Clone, Debug)]
pub struct RenderConfig {
    pub image_size: (u32, u32),
    pub bounds: WorldRect,
    pub background: [u8; 3],
    /// Ground color when a tile has no splat layers.
    pub ground: [u8; 3],
    /// Color per splat layer index.
    pub splat_colors: Vec<[u8; 3]>,
    pub detail_color: [u8; 3],
    pub tile_border: Option<[u8; 3]>,
    /// Styles by instance tag; unknown tags draw in `default_style`.
    pub styles: HashMap<String, InstanceStyle>,
    pub default_style: InstanceStyle,
}

impl RenderConfig {
    pub fn new(image_size: (u32, u32), bounds: WorldRect) -> Self {
        Self {
            image_size,
            bounds,
            background: [24, 24, 28],
            ground: [150, 130, 100],
            splat_colors: Vec::new(),
            detail_color: [120, 200, 80],
            tile_border: Some([60, 60, 70]),
            styles: HashMap::new(),
            default_style: InstanceStyle {
                color: [255, 0, 255],
                min_radius_px: 2,
            },
        }
    }

    pub fn with_splat_colors(mut self, colors: Vec<[u8; 3]>) -> Self {
        self.splat_colors = colors;
        self
    }

    pub fn with_style(mut self, tag: impl Into<String>, style: InstanceStyle) -> Self {
        self.styles.insert(tag.into(), style);
        self
    }

    fn pixel_to_world(&self, x: u32, y: u32) -> Vec2 {
        let (w, h) = self.image_size;
        let size = self.bounds.size();
        // Image rows grow downwards, world z upwards.
        Vec2::new(
            self.bounds.min.x + (x as f32 + 0.5) / w as f32 * size.x,
            self.bounds.max.y - (y as f32 + 0.5) / h as f32 * size.y,
        )
    }

    fn world_to_pixel(&self, p: Vec2) -> (i32, i32) {
        let (w, h) = self.image_size;
        let size = self.bounds.size();
        let u = (p.x - self.bounds.min.x) / size.x;
        let v = (self.bounds.max.y - p.y) / size.y;
        ((u * w as f32) as i32, (v * h as f32) as i32)
    }

    fn pixels_per_unit(&self) -> f32 {
        self.image_size.0 as f32 / self.bounds.size().x.max(f32::EPSILON)
    }
}

struct TileSnapshot {
    bounds: WorldRect,
    height: Option<Raster>,
    splats: Vec<Raster>,
    details: Vec<Raster>,
}

fn snapshot(tile: &dyn Tile) -> TileSnapshot {
    TileSnapshot {
        bounds: tile.bounds(),
        height: tile.read_channel(&ChannelKind::Height),
        splats: (0..tile.splat_layer_count())
            .filter_map(|i| tile.read_channel(&ChannelKind::Splat(i)))
            .collect(),
        details: (0..tile.detail_layer_count())
            .filter_map(|i| tile.read_channel(&ChannelKind::Detail(i)))
            .collect(),
    }
}

fn mix(a: [f32; 3], b: [u8; 3], t: f32) -> [f32; 3] {
    let t = t.clamp(0.0, 1.0);
    [
        a[0] + (b[0] as f32 - a[0]) * t,
        a[1] + (b[1] as f32 - a[1]) * t,
        a[2] + (b[2] as f32 - a[2]) * t,
    ]
}

fn to_rgb(c: [f32; 3]) -> Rgb<u8> {
    Rgb([
        c[0].clamp(0.0, 255.0) as u8,
        c[1].clamp(0.0, 255.0) as u8,
        c[2].clamp(0.0, 255.0) as u8,
    ])
}

/// Renders heights, splat weights, detail density and instances of every tile in `store`
/// overlapping the configured bounds.
pub fn render_store_to_png(
    store: &dyn TileStore,
    config: &RenderConfig,
    path: impl AsRef<Path>,
) -> anyhow::Result<()> {
    let ids = store.tiles_overlapping(config.bounds);
    let tiles: HashMap<TileId, TileSnapshot> = ids
        .iter()
        .filter_map(|id| store.tile(*id).map(|t| (*id, snapshot(t))))
        .collect();

    let (hmin, hmax) = tiles
        .values()
        .filter_map(|t| t.height.as_ref())
        .flat_map(|r| r.data.iter().copied())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    let hspan = (hmax - hmin).max(1e-3);
    let border = 1.0 / config.pixels_per_unit();

    let (w, h) = config.image_size;
    let mut img = RgbImage::from_pixel(w, h, Rgb(config.background));

    for y in 0..h {
        for x in 0..w {
            let p = config.pixel_to_world(x, y);
            let Some(tile) = store.tile_at(p).and_then(|id| tiles.get(&id)) else {
                continue;
            };

            let mut color = if tile.splats.is_empty() {
                config.ground.map(f32::from)
            } else {
                let mut c = [0.0; 3];
                for (i, layer) in tile.splats.iter().enumerate() {
                    let weight = layer.sample_nearest(p);
                    let layer_color = config.splat_colors.get(i).copied().unwrap_or(config.ground);
                    for (ck, lk) in c.iter_mut().zip(layer_color) {
                        *ck += weight * lk as f32;
                    }
                }
                c
            };
            let density: f32 = tile.details.iter().map(|d| d.sample_nearest(p)).sum();
            color = mix(color, config.detail_color, density * 0.35);

            let shade = tile
                .height
                .as_ref()
                .map_or(1.0, |r| 0.55 + 0.45 * (r.sample_nearest(p) - hmin) / hspan);
            color = color.map(|c| c * shade);

            if let Some(border_color) = config.tile_border {
                let b = tile.bounds;
                let near_edge = (p.x - b.min.x).abs() < border
                    || (b.max.x - p.x).abs() < border
                    || (p.y - b.min.y).abs() < border
                    || (b.max.y - p.y).abs() < border;
                if near_edge {
                    color = border_color.map(f32::from);
                }
            }

            img.put_pixel(x, y, to_rgb(color));
        }
    }

    let ppu = config.pixels_per_unit();
    for id in &ids {
        let Some(tile) = store.tile(*id) else {
            continue;
        };
        for kind in [
            InstanceKind::GameObject,
            InstanceKind::Tree,
            InstanceKind::Extension,
        ] {
            for instance in tile.instances(kind) {
                let p = Vec2::new(instance.position.x, instance.position.z);
                if !config.bounds.contains(p) {
                    continue;
                }
                let style = config
                    .styles
                    .get(&instance.tag)
                    .copied()
                    .unwrap_or(config.default_style);
                let r = ((instance.radius * instance.scale * ppu) as i32).max(style.min_radius_px);
                draw_disk(&mut img, config.world_to_pixel(p), r, Rgb(style.color));
            }
        }
    }

    img.save(path.as_ref())?;
    Ok(())
}

fn draw_disk(img: &mut RgbImage, (cx, cy): (i32, i32), r: i32, color: Rgb<u8>) {
    let (w, h) = (img.width() as i32, img.height() as i32);
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy > r * r {
                continue;
            }
            let (x, y) = (cx + dx, cy + dy);
            if x >= 0 && y >= 0 && x < w && y < h {
                img.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

#![forbid(unsafe_code)]

mod rendering;
mod scene;

pub use rendering::{init_tracing, render_store_to_png, InstanceStyle, RenderConfig};
pub use scene::{demo_registry, forest_spawners, hilly_world, log_sink, TILE_RESOLUTION, TILE_SIZE};

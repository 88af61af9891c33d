//! Seeded fractal noise for noise mask nodes.
use glam::Vec2;
use noise::{Billow, Fbm, MultiFractal, NoiseFn, Perlin, RidgedMulti};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::raster::Raster;

/// Fractal generator family.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum NoiseKind {
    /// Fractal Brownian motion over Perlin noise.
    #[default]
    Perlin,
    Billow,
    RidgedMulti,
}

/// Parameters of a noise mask.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Clone, Debug, PartialEq)]
pub struct NoiseParams {
    pub kind: NoiseKind,
    pub seed: u32,
    pub octaves: usize,
    pub persistence: f32,
    pub lacunarity: f32,
    /// World units per noise period.
    pub zoom: f32,
    /// Added to the sample position before scaling.
    pub offset: Vec2,
}

impl Default for NoiseParams {
    fn default() -> Self {
        Self {
            kind: NoiseKind::Perlin,
            seed: 0,
            octaves: 4,
            persistence: 0.5,
            lacunarity: 2.0,
            zoom: 64.0,
            offset: Vec2::ZERO,
        }
    }
}

impl NoiseParams {
    pub fn with_kind(mut self, kind: NoiseKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_seed(mut self, seed: u32) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_octaves(mut self, octaves: usize) -> Self {
        self.octaves = octaves;
        self
    }

    pub fn with_zoom(mut self, zoom: f32) -> Self {
        self.zoom = zoom;
        self
    }

    pub fn with_offset(mut self, offset: Vec2) -> Self {
        self.offset = offset;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.octaves == 0 || self.octaves > 32 {
            return Err(Error::InvalidConfig(format!(
                "noise octaves must be in 1..=32, got {}",
                self.octaves
            )));
        }
        if !(self.zoom.is_finite() && self.zoom > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "noise zoom must be > 0, got {}",
                self.zoom
            )));
        }
        if !self.lacunarity.is_finite() || !self.persistence.is_finite() {
            return Err(Error::InvalidConfig(
                "noise lacunarity and persistence must be finite".into(),
            ));
        }
        Ok(())
    }

    /// Builds the generator. Out-of-range octaves are clamped.
    pub fn build(&self) -> Box<dyn NoiseFn<f64, 2> + Send + Sync> {
        let octaves = self.octaves.clamp(1, 32);
        let frequency = 1.0 / f64::from(self.zoom.max(f32::EPSILON));
        let lacunarity = f64::from(self.lacunarity);
        let persistence = f64::from(self.persistence);
        match self.kind {
            NoiseKind::Perlin => Box::new(
                Fbm::<Perlin>::new(self.seed)
                    .set_frequency(frequency)
                    .set_octaves(octaves)
                    .set_lacunarity(lacunarity)
                    .set_persistence(persistence),
            ),
            NoiseKind::Billow => Box::new(
                Billow::<Perlin>::new(self.seed)
                    .set_frequency(frequency)
                    .set_octaves(octaves)
                    .set_lacunarity(lacunarity)
                    .set_persistence(persistence),
            ),
            NoiseKind::RidgedMulti => Box::new(
                RidgedMulti::<Perlin>::new(self.seed)
                    .set_frequency(frequency)
                    .set_octaves(octaves)
                    .set_lacunarity(lacunarity)
                    .set_persistence(persistence),
            ),
        }
    }
}

/// Samples `noise` at `p`, remapped from `[-1, 1]` to `[0, 1]`.
#[inline]
pub fn sample01(noise: &(dyn NoiseFn<f64, 2> + Send + Sync), p: Vec2) -> f32 {
    let v = noise.get([f64::from(p.x), f64::from(p.y)]) as f32;
    ((v + 1.0) * 0.5).clamp(0.0, 1.0)
}

/// Fills `out` with noise sampled at pixel centers shifted by `-origin`.
pub fn fill_noise(params: &NoiseParams, origin: Vec2, out: &mut Raster) {
    let noise = params.build();
    let grid = out.grid.clone();
    for iy in 0..grid.height {
        for ix in 0..grid.width {
            let p = grid.index_to_world(ix, iy) - origin + params.offset;
            out.set(ix, iy, sample01(noise.as_ref(), p));
        }
    }
}

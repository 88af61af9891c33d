//! Euclidean distance transform of occupancy rasters.
//!
//! Exact Felzenszwalb–Huttenlocher transform: one lower-envelope pass over rows, then one over
//! columns, on squared distances.
use crate::raster::Raster;

/// Pixels above this value are sources of the transform.
pub const OCCUPIED_THRESHOLD: f32 = 0.5;

/// Distance from every pixel to the nearest occupied pixel, in world units, divided by
/// `max_distance` and clamped to `[0, 1]`. With no occupied pixel the result is all ones.
pub fn normalized_distance(occupancy: &Raster, max_distance: f32) -> Raster {
    let mut out = Raster::new(occupancy.grid.clone());
    normalized_distance_into(occupancy, max_distance, &mut out);
    out
}

/// [`normalized_distance`] written into `out`, which must share the occupancy layout.
pub fn normalized_distance_into(occupancy: &Raster, max_distance: f32, out: &mut Raster) {
    debug_assert_eq!(out.data.len(), occupancy.data.len());
    let (w, h) = occupancy.size();
    if !occupancy.data.iter().any(|v| *v > OCCUPIED_THRESHOLD) {
        out.fill(1.0);
        return;
    }

    let sources: Vec<bool> = occupancy
        .data
        .iter()
        .map(|v| *v > OCCUPIED_THRESHOLD)
        .collect();
    let squared = squared_distance(&sources, w, h);
    let scale = occupancy.grid.cell_size;
    let max_distance = max_distance.max(f32::EPSILON);
    for (dst, d2) in out.data.iter_mut().zip(squared) {
        *dst = (d2.sqrt() * scale / max_distance).min(1.0);
    }
}

/// Squared pixel distance to the nearest `true` entry of a row-major `w × h` mask.
pub fn squared_distance(sources: &[bool], w: usize, h: usize) -> Vec<f32> {
    debug_assert_eq!(sources.len(), w * h);
    // Larger than any squared distance inside the raster.
    let far = (w * w + h * h) as f32 + 1.0;
    let mut grid: Vec<f32> = sources
        .iter()
        .map(|s| if *s { 0.0 } else { far })
        .collect();

    let mut envelope = Envelope::with_capacity(w.max(h));
    let mut line = vec![0.0; w.max(h)];
    let mut result = vec![0.0; w.max(h)];

    for y in 0..h {
        let row = &mut grid[y * w..(y + 1) * w];
        envelope.transform(row, &mut result[..w]);
        row.copy_from_slice(&result[..w]);
    }

    for x in 0..w {
        for y in 0..h {
            line[y] = grid[y * w + x];
        }
        envelope.transform(&line[..h], &mut result[..h]);
        for y in 0..h {
            grid[y * w + x] = result[y];
        }
    }
    grid
}

/// Scratch buffers for the 1D lower-envelope transform.
struct Envelope {
    vertices: Vec<usize>,
    bounds: Vec<f32>,
}

impl Envelope {
    fn with_capacity(n: usize) -> Self {
        Self {
            vertices: vec![0; n],
            bounds: vec![0.0; n + 1],
        }
    }

    fn transform(&mut self, f: &[f32], out: &mut [f32]) {
        let n = f.len();
        if n == 0 {
            return;
        }
        let v = &mut self.vertices;
        let z = &mut self.bounds;
        let mut k = 0usize;
        v[0] = 0;
        z[0] = f32::NEG_INFINITY;
        z[1] = f32::INFINITY;

        for q in 1..n {
            let mut s = crossing(f, q, v[k]);
            while k > 0 && s <= z[k] {
                k -= 1;
                s = crossing(f, q, v[k]);
            }
            k += 1;
            v[k] = q;
            z[k] = s;
            z[k + 1] = f32::INFINITY;
        }

        let mut k = 0usize;
        for (q, dst) in out.iter_mut().enumerate() {
            while z[k + 1] < q as f32 {
                k += 1;
            }
            let dx = q as f32 - v[k] as f32;
            *dst = dx * dx + f[v[k]];
        }
    }
}

/// Abscissa where the parabolas rooted at `q` and `p` intersect.
#[inline]
fn crossing(f: &[f32], q: usize, p: usize) -> f32 {
    let (qf, pf) = (q as f32, p as f32);
    ((f[q] + qf * qf) - (f[p] + pf * pf)) / (2.0 * (qf - pf))
}

#[cfg(test)]
mod tests {
    use glam::Vec2;

    use super::*;
    use crate::raster::CanvasGrid;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn single_row_distances() {
        let d = squared_distance(&[true, false, false, true, false], 5, 1);
        assert_eq!(d, vec![0.0, 1.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn center_source_gives_euclidean_ring() {
        let mut mask = vec![false; 25];
        mask[12] = true;
        let d = squared_distance(&mask, 5, 5);
        assert_eq!(d[12], 0.0);
        assert!(approx_eq(d[7], 1.0));
        assert!(approx_eq(d[13], 1.0));
        assert!(approx_eq(d[6], 2.0));
        assert!(approx_eq(d[0], 8.0));
    }

    #[test]
    fn several_sources_take_nearest() {
        let mut mask = vec![false; 16];
        mask[0] = true;
        mask[15] = true;
        let d = squared_distance(&mask, 4, 4);
        assert!(approx_eq(d[1], 1.0));
        assert!(approx_eq(d[14], 1.0));
        assert!(approx_eq(d[3], 9.0));
    }

    #[test]
    fn normalized_uses_world_units() {
        let grid = CanvasGrid::new(Vec2::ZERO, 2.0, 4, 1);
        let mut occ = Raster::new(grid);
        occ.set(0, 0, 1.0);
        let n = normalized_distance(&occ, 4.0);
        assert!(approx_eq(n.at(0, 0), 0.0));
        assert!(approx_eq(n.at(1, 0), 0.5));
        assert!(approx_eq(n.at(2, 0), 1.0));
        assert!(approx_eq(n.at(3, 0), 1.0));
    }

    #[test]
    fn empty_occupancy_is_all_far() {
        let occ = Raster::new(CanvasGrid::new(Vec2::ZERO, 1.0, 3, 3));
        let n = normalized_distance(&occ, 2.0);
        assert!(n.data.iter().all(|v| *v == 1.0));
    }
}

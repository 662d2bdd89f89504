//! Local binary pattern histograms (LBPH).
//!
//! Each pixel is encoded by comparing `neighbors` points sampled on a
//! circle of `radius` around it; the code image is split into a grid and
//! every cell contributes a normalized histogram of codes. Faces are
//! compared with a chi-square distance over the concatenated histograms.

use image::GrayImage;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest supported neighbour count (histograms have `2^neighbors` bins).
pub const MAX_NEIGHBORS: u32 = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LbphParamsError {
    #[error("radius must be at least 1")]
    RadiusZero,
    #[error("neighbors must be in 1..={MAX_NEIGHBORS}, got {0}")]
    NeighborsOutOfRange(u32),
    #[error("grid must have at least one cell per axis, got {0}x{1}")]
    EmptyGrid(u32, u32),
}

/// LBPH hyperparameters. Stored with the model so inference matches training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbphParams {
    pub radius: u32,
    pub neighbors: u32,
    pub grid_x: u32,
    pub grid_y: u32,
}

impl Default for LbphParams {
    fn default() -> Self {
        Self {
            radius: 1,
            neighbors: 8,
            grid_x: 8,
            grid_y: 8,
        }
    }
}

impl LbphParams {
    /// Describe why these parameters cannot be used, if they cannot.
    pub fn validate(&self) -> Result<(), LbphParamsError> {
        if self.radius == 0 {
            return Err(LbphParamsError::RadiusZero);
        }
        if self.neighbors == 0 || self.neighbors > MAX_NEIGHBORS {
            return Err(LbphParamsError::NeighborsOutOfRange(self.neighbors));
        }
        if self.grid_x == 0 || self.grid_y == 0 {
            return Err(LbphParamsError::EmptyGrid(self.grid_x, self.grid_y));
        }
        Ok(())
    }

    pub fn bins(&self) -> usize {
        1usize << self.neighbors
    }

    /// Length of one spatial histogram.
    pub fn histogram_len(&self) -> usize {
        self.bins() * self.grid_x as usize * self.grid_y as usize
    }
}

/// Circular LBP code image, `(height - 2r) x (width - 2r)`.
pub fn lbp_codes(image: &GrayImage, radius: u32, neighbors: u32) -> Array2<u32> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let r = radius as usize;
    if w <= 2 * r || h <= 2 * r {
        return Array2::zeros((0, 0));
    }
    let raw = image.as_raw();
    let px = |x: usize, y: usize| raw[y * w + x] as f32;
    let mut codes = Array2::<u32>::zeros((h - 2 * r, w - 2 * r));

    for n in 0..neighbors {
        let angle = 2.0 * std::f64::consts::PI * n as f64 / neighbors as f64;
        let sx = (radius as f64 * angle.cos()) as f32;
        let sy = (-(radius as f64) * angle.sin()) as f32;
        let (fx, fy) = (sx.floor() as isize, sy.floor() as isize);
        let (cx, cy) = (sx.ceil() as isize, sy.ceil() as isize);
        let tx = sx - fx as f32;
        let ty = sy - fy as f32;
        let w1 = (1.0 - tx) * (1.0 - ty);
        let w2 = tx * (1.0 - ty);
        let w3 = (1.0 - tx) * ty;
        let w4 = tx * ty;

        for y in r..h - r {
            for x in r..w - r {
                let at = |dx: isize, dy: isize| px((x as isize + dx) as usize, (y as isize + dy) as usize);
                let sample = w1 * at(fx, fy) + w2 * at(cx, fy) + w3 * at(fx, cy) + w4 * at(cx, cy);
                let centre = px(x, y);
                if sample > centre || (sample - centre).abs() < f32::EPSILON {
                    codes[[y - r, x - r]] |= 1 << n;
                }
            }
        }
    }

    codes
}

/// Concatenated per-cell histograms, each normalized by its cell's pixel
/// count. Cells are `floor(cols / grid_x) x floor(rows / grid_y)`; leftover
/// rows and columns are ignored.
pub fn spatial_histogram(codes: &Array2<u32>, bins: usize, grid_x: u32, grid_y: u32) -> Vec<f32> {
    let (rows, cols) = codes.dim();
    let (gx, gy) = (grid_x as usize, grid_y as usize);
    let cell_w = cols / gx;
    let cell_h = rows / gy;
    let mut hist = vec![0.0f32; bins * gx * gy];
    if cell_w == 0 || cell_h == 0 {
        return hist;
    }
    let cell_total = (cell_w * cell_h) as f32;

    for i in 0..gy {
        for j in 0..gx {
            let offset = (i * gx + j) * bins;
            for y in i * cell_h..(i + 1) * cell_h {
                for x in j * cell_w..(j + 1) * cell_w {
                    let code = codes[[y, x]] as usize;
                    if code < bins {
                        hist[offset + code] += 1.0;
                    }
                }
            }
            for v in &mut hist[offset..offset + bins] {
                *v /= cell_total;
            }
        }
    }

    hist
}

/// Spatial histogram of a face image under `params`.
pub fn describe(image: &GrayImage, params: &LbphParams) -> Vec<f32> {
    let codes = lbp_codes(image, params.radius, params.neighbors);
    spatial_histogram(&codes, params.bins(), params.grid_x, params.grid_y)
}

/// Chi-square distance, alternative form: `Σ 2(a-b)² / (a+b)` over bins
/// where `a + b` exceeds `f32::EPSILON`.
pub fn chi_square(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .filter_map(|(&a, &b)| {
            let (a, b) = (a as f64, b as f64);
            let sum = a + b;
            (sum > f32::EPSILON as f64).then(|| 2.0 * (a - b) * (a - b) / sum)
        })
        .sum()
}

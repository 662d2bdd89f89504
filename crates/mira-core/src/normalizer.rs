//! Face normalization: area-averaging resize to the canonical resolution
//! followed by global histogram equalization.

use crate::types::FaceSample;
use image::GrayImage;

/// Side length every face sample is normalized to.
pub const CANONICAL_SIZE: u32 = 150;

/// Resize `region` to the canonical resolution and equalize it.
///
/// Pure and deterministic: identical input pixels give identical output.
pub fn normalize(region: &GrayImage) -> FaceSample {
    let resized = resize_area(region, CANONICAL_SIZE, CANONICAL_SIZE);
    FaceSample::from_normalized(equalize_histogram(&resized))
}

/// Area-averaging resize.
///
/// Each output pixel is the mean of the source pixels under its footprint,
/// each weighted by how much of it the footprint covers.
pub fn resize_area(src: &GrayImage, new_w: u32, new_h: u32) -> GrayImage {
    let (w, h) = src.dimensions();
    if w == 0 || h == 0 || new_w == 0 || new_h == 0 {
        return GrayImage::new(new_w, new_h);
    }
    if (w, h) == (new_w, new_h) {
        return src.clone();
    }

    let x_spans = footprints(w, new_w);
    let y_spans = footprints(h, new_h);
    let raw = src.as_raw();
    let stride = w as usize;

    let mut out = Vec::with_capacity(new_w as usize * new_h as usize);
    for ys in &y_spans {
        for xs in &x_spans {
            let mut acc = 0.0f64;
            for &(sy, wy) in ys {
                let row = sy * stride;
                for &(sx, wx) in xs {
                    acc += raw[row + sx] as f64 * wx * wy;
                }
            }
            out.push(acc.round().clamp(0.0, 255.0) as u8);
        }
    }

    GrayImage::from_raw(new_w, new_h, out).unwrap_or_else(|| GrayImage::new(new_w, new_h))
}

/// For each destination index, the source indices it overlaps and their
/// normalized weights (summing to 1).
fn footprints(src_len: u32, dst_len: u32) -> Vec<Vec<(usize, f64)>> {
    let scale = src_len as f64 / dst_len as f64;
    (0..dst_len)
        .map(|d| {
            let start = d as f64 * scale;
            let end = start + scale;
            let first = start.floor() as u32;
            let last = (end.ceil() as u32).min(src_len);
            let mut weights: Vec<(usize, f64)> = (first..last)
                .filter_map(|s| {
                    let overlap = (end.min(s as f64 + 1.0) - start.max(s as f64)).max(0.0);
                    (overlap > 1e-12).then_some((s as usize, overlap))
                })
                .collect();
            let total: f64 = weights.iter().map(|(_, wt)| wt).sum();
            for (_, wt) in &mut weights {
                *wt /= total;
            }
            weights
        })
        .collect()
}

/// Global histogram equalization.
///
/// `lut[v] = round((cdf[v] - cdf_min) * 255 / (N - cdf_min))`; a constant
/// image is returned unchanged.
pub fn equalize_histogram(src: &GrayImage) -> GrayImage {
    let raw = src.as_raw();
    if raw.is_empty() {
        return src.clone();
    }

    let mut hist = [0u32; 256];
    for &v in raw {
        hist[v as usize] += 1;
    }

    let mut cdf = [0u32; 256];
    cdf[0] = hist[0];
    for i in 1..256 {
        cdf[i] = cdf[i - 1] + hist[i];
    }

    let cdf_min = cdf.iter().find(|&&x| x > 0).copied().unwrap_or(0);
    let total = raw.len() as u32;
    if total <= cdf_min {
        return src.clone();
    }

    let denom = (total - cdf_min) as f32;
    let mut lut = [0u8; 256];
    for (i, slot) in lut.iter_mut().enumerate() {
        *slot = (cdf[i].saturating_sub(cdf_min) as f32 / denom * 255.0).round() as u8;
    }

    let mut output = src.clone();
    for p in output.iter_mut() {
        *p = lut[*p as usize];
    }
    output
}

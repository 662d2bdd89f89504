//! Haar cascade classifier (Viola-Jones) via OpenCV's XML cascade format.
//!
//! Loads `haarcascade_*.xml` files in the current `<cascade>` layout,
//! evaluates boosted tree stages on variance-normalized windows over
//! integral images, and scans an image pyramid.

use crate::grouping::group_rectangles;
use crate::types::BoundingBox;
use image::GrayImage;
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
/// OpenCV subtracts this from every stage threshold when loading.
const STAGE_THRESHOLD_EPS: f64 = 1e-5;
/// Relative tolerance used when clustering raw window hits.
const GROUPING_EPS: f64 = 0.2;
/// Smallest window that still leaves a one-pixel inset for normalization.
const MIN_WINDOW_SIDE: u32 = 3;

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("cascade file not found: {0}")]
    NotFound(String),
    #[error("failed to read cascade: {0}")]
    Io(#[from] std::io::Error),
    #[error("cascade XML: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("malformed cascade: {0}")]
    Malformed(String),
}

/// Parameters for one multi-scale scan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanParams {
    /// Pyramid step between scales; must be greater than 1.
    pub scale_factor: f64,
    /// Raw hits a cluster needs (strictly more than this) to be reported.
    /// 0 disables grouping.
    pub min_neighbors: u32,
    /// Smallest window (width, height) reported.
    pub min_size: (u32, u32),
    /// Largest window (width, height) scanned; `None` = image size.
    pub max_size: Option<(u32, u32)>,
}

#[derive(Debug, Clone)]
struct HaarRect {
    x: i64,
    y: i64,
    width: i64,
    height: i64,
    weight: f64,
}

#[derive(Debug, Clone)]
struct HaarFeature {
    rects: Vec<HaarRect>,
    tilted: bool,
}

#[derive(Debug, Clone)]
struct TreeNode {
    left: i32,
    right: i32,
    feature: usize,
    threshold: f64,
}

#[derive(Debug, Clone)]
struct WeakClassifier {
    nodes: Vec<TreeNode>,
    leaves: Vec<f64>,
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f64,
    classifiers: Vec<WeakClassifier>,
}

/// Outcome of running the cascade on one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowVerdict {
    Accepted,
    Rejected { stage: usize },
}

/// Boosted Haar cascade with its training window size.
#[derive(Debug, Clone)]
pub struct HaarCascade {
    window: (u32, u32),
    stages: Vec<Stage>,
    features: Vec<HaarFeature>,
    has_tilted: bool,
}

impl HaarCascade {
    /// Load a cascade from an OpenCV XML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CascadeError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CascadeError::NotFound(path.display().to_string()));
        }
        let xml = std::fs::read_to_string(path)?;
        let cascade = Self::from_xml(&xml)?;

        tracing::info!(
            path = %path.display(),
            window = ?cascade.window,
            stages = cascade.stages.len(),
            features = cascade.features.len(),
            tilted = cascade.has_tilted,
            "loaded Haar cascade"
        );

        Ok(cascade)
    }

    /// Parse a cascade from XML text.
    pub fn from_xml(xml: &str) -> Result<Self, CascadeError> {
        let doc = roxmltree::Document::parse(xml)?;
        let root = doc.root_element();
        let cascade = if root.has_tag_name("cascade") {
            root
        } else {
            root.children().find(|n| n.has_tag_name("cascade")).ok_or_else(|| {
                CascadeError::Malformed(
                    "no <cascade> element (legacy opencv-haar-classifier files are not supported)"
                        .into(),
                )
            })?
        };

        let feature_type = child(cascade, "featureType")?.text().unwrap_or("").trim();
        if !feature_type.eq_ignore_ascii_case("HAAR") {
            return Err(CascadeError::Malformed(format!(
                "unsupported feature type {feature_type:?}, expected HAAR"
            )));
        }

        let width = scalar::<u32>(child(cascade, "width")?)?;
        let height = scalar::<u32>(child(cascade, "height")?)?;
        if width < MIN_WINDOW_SIDE || height < MIN_WINDOW_SIDE {
            return Err(CascadeError::Malformed(format!(
                "window {width}x{height} is too small"
            )));
        }

        let features = items(child(cascade, "features")?)
            .map(|node| parse_feature(node, width as i64, height as i64))
            .collect::<Result<Vec<_>, _>>()?;

        let stages = items(child(cascade, "stages")?)
            .map(|node| parse_stage(node, features.len()))
            .collect::<Result<Vec<_>, _>>()?;

        if stages.is_empty() {
            return Err(CascadeError::Malformed("cascade has no stages".into()));
        }

        let has_tilted = features.iter().any(|f| f.tilted);

        Ok(Self {
            window: (width, height),
            stages,
            features,
            has_tilted,
        })
    }

    /// Training window size (width, height).
    pub fn window_size(&self) -> (u32, u32) {
        self.window
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Scan `image` at every pyramid level and return grouped detections
    /// in input image coordinates.
    pub fn detect_multi_scale(&self, image: &GrayImage, params: &ScanParams) -> Vec<BoundingBox> {
        let hits = self.scan(image, params);
        let grouped = group_rectangles(hits, params.min_neighbors, GROUPING_EPS);
        tracing::trace!(count = grouped.len(), "cascade scan finished");
        grouped
    }

    /// Raw window hits, before grouping.
    fn scan(&self, image: &GrayImage, params: &ScanParams) -> Vec<BoundingBox> {
        if !(params.scale_factor > 1.0) {
            tracing::warn!(
                scale_factor = params.scale_factor,
                "scale factor must be greater than 1; skipping scan"
            );
            return Vec::new();
        }

        let (img_w, img_h) = image.dimensions();
        let (base_w, base_h) = self.window;
        let mut hits = Vec::new();
        let mut factor = 1.0f64;

        loop {
            let win_w = (base_w as f64 * factor).round() as u32;
            let win_h = (base_h as f64 * factor).round() as u32;
            let scaled_w = (img_w as f64 / factor).round() as u32;
            let scaled_h = (img_h as f64 / factor).round() as u32;

            if scaled_w <= base_w || scaled_h <= base_h {
                break;
            }
            if let Some((max_w, max_h)) = params.max_size {
                if win_w > max_w || win_h > max_h {
                    break;
                }
            }

            if win_w >= params.min_size.0 && win_h >= params.min_size.1 {
                let level = if scaled_w == img_w && scaled_h == img_h {
                    image.clone()
                } else {
                    resize_bilinear(image, scaled_w, scaled_h)
                };
                let integral = Integral::new(&level, self.has_tilted);
                let step = if factor > 2.0 { 1 } else { 2 };
                let range_x = scaled_w - base_w;
                let range_y = scaled_h - base_h;

                let mut y = 0;
                while y < range_y {
                    let mut x = 0;
                    while x < range_x {
                        match self.evaluate(&integral, x as usize, y as usize) {
                            WindowVerdict::Accepted => hits.push(BoundingBox::new(
                                (x as f64 * factor).round() as u32,
                                (y as f64 * factor).round() as u32,
                                win_w,
                                win_h,
                            )),
                            // Rejected by the very first stage: the neighbour is
                            // unlikely to pass either.
                            WindowVerdict::Rejected { stage: 0 } => x += step,
                            WindowVerdict::Rejected { .. } => {}
                        }
                        x += step;
                    }
                    y += step;
                }
            }

            factor *= params.scale_factor;
        }

        hits
    }

    /// Run every stage on the window whose top-left corner is (`ox`, `oy`).
    fn evaluate(&self, integral: &Integral, ox: usize, oy: usize) -> WindowVerdict {
        let (win_w, win_h) = (self.window.0 as usize, self.window.1 as usize);
        let norm_w = win_w - 2;
        let norm_h = win_h - 2;
        let area = (norm_w * norm_h) as f64;
        let sum = integral.sum(ox + 1, oy + 1, norm_w, norm_h) as f64;
        let sq_sum = integral.sq_sum(ox + 1, oy + 1, norm_w, norm_h) as f64;
        let variance = area * sq_sum - sum * sum;
        let inv_norm = if variance > 0.0 { 1.0 / variance.sqrt() } else { 1.0 };

        for (index, stage) in self.stages.iter().enumerate() {
            let total: f64 = stage
                .classifiers
                .iter()
                .map(|weak| {
                    weak.predict(|feature| {
                        self.feature_value(feature, integral, ox as i64, oy as i64) * inv_norm
                    })
                })
                .sum();

            if total < stage.threshold {
                return WindowVerdict::Rejected { stage: index };
            }
        }

        WindowVerdict::Accepted
    }

    fn feature_value(&self, index: usize, integral: &Integral, ox: i64, oy: i64) -> f64 {
        let feature = &self.features[index];
        feature
            .rects
            .iter()
            .map(|r| {
                let rect_sum = if feature.tilted {
                    integral.tilted_sum(ox + r.x, oy + r.y, r.width, r.height)
                } else {
                    integral.sum(
                        (ox + r.x) as usize,
                        (oy + r.y) as usize,
                        r.width as usize,
                        r.height as usize,
                    )
                };
                r.weight * rect_sum as f64
            })
            .sum()
    }
}

impl WeakClassifier {
    /// Walk the tree; children `<= 0` index into the leaf values.
    fn predict(&self, mut value_of: impl FnMut(usize) -> f64) -> f64 {
        let mut idx = 0i32;
        loop {
            let node = &self.nodes[idx as usize];
            idx = if value_of(node.feature) < node.threshold {
                node.left
            } else {
                node.right
            };
            if idx <= 0 {
                return self.leaves[(-idx) as usize];
            }
        }
    }
}

// --- Integral images ---

/// Upright sum and squared-sum tables, plus the 45° table when needed.
struct Integral {
    stride: usize,
    sum: Vec<i64>,
    sq_sum: Vec<i64>,
    tilted: Option<TiltedIntegral>,
}

impl Integral {
    fn new(image: &GrayImage, with_tilted: bool) -> Self {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0i64; stride * (h + 1)];
        let mut sq_sum = vec![0i64; stride * (h + 1)];
        let raw = image.as_raw();

        for y in 0..h {
            let mut row = 0i64;
            let mut row_sq = 0i64;
            for x in 0..w {
                let p = raw[y * w + x] as i64;
                row += p;
                row_sq += p * p;
                let idx = (y + 1) * stride + (x + 1);
                sum[idx] = sum[idx - stride] + row;
                sq_sum[idx] = sq_sum[idx - stride] + row_sq;
            }
        }

        let tilted = with_tilted.then(|| TiltedIntegral::new(image));

        Self {
            stride,
            sum,
            sq_sum,
            tilted,
        }
    }

    fn sum(&self, x: usize, y: usize, w: usize, h: usize) -> i64 {
        box_sum(&self.sum, self.stride, x, y, w, h)
    }

    fn sq_sum(&self, x: usize, y: usize, w: usize, h: usize) -> i64 {
        box_sum(&self.sq_sum, self.stride, x, y, w, h)
    }

    fn tilted_sum(&self, x: i64, y: i64, w: i64, h: i64) -> i64 {
        match &self.tilted {
            Some(t) => t.at(x, y) - t.at(x - h, y + h) - t.at(x + w, y + w) + t.at(x + w - h, y + w + h),
            None => 0,
        }
    }
}

fn box_sum(table: &[i64], stride: usize, x: usize, y: usize, w: usize, h: usize) -> i64 {
    let (x1, y1) = (x + w, y + h);
    table[y1 * stride + x1] + table[y * stride + x] - table[y * stride + x1] - table[y1 * stride + x]
}

/// Rotated (45°) summed-area table.
///
/// `T(X, Y)` is the sum of pixels `(x, y)` with `y < Y` and
/// `|x - X + 1| <= Y - y - 1`: an upward-opening triangle whose apex is
/// pixel `(X - 1, Y - 1)`. Columns are padded by `height + 1` on both sides
/// so the recurrence never reads outside the table; the padding columns
/// hold true zeros.
struct TiltedIntegral {
    stride: usize,
    pad: i64,
    rows: usize,
    data: Vec<i64>,
}

impl TiltedIntegral {
    fn new(image: &GrayImage) -> Self {
        let (w, h) = (image.width() as i64, image.height() as i64);
        let pad = h + 1;
        let stride = (w + 2 * pad + 1) as usize;
        let rows = (h + 1) as usize;
        let mut data = vec![0i64; stride * rows];
        let raw = image.as_raw();
        let pixel = |x: i64, y: i64| -> i64 {
            if x >= 0 && x < w && y >= 0 && y < h {
                raw[(y * w + x) as usize] as i64
            } else {
                0
            }
        };

        for row in 1..rows {
            let yy = row as i64;
            for col in 1..stride - 1 {
                let xx = col as i64 - pad;
                let above = (row - 1) * stride;
                let mut value = data[above + col - 1] + data[above + col + 1] + pixel(xx - 1, yy - 1);
                if row >= 2 {
                    value += pixel(xx - 1, yy - 2) - data[(row - 2) * stride + col];
                }
                data[row * stride + col] = value;
            }
        }

        Self {
            stride,
            pad,
            rows,
            data,
        }
    }

    fn at(&self, x: i64, y: i64) -> i64 {
        let col = x + self.pad;
        if y < 0 || y as usize >= self.rows || col < 0 || col as usize >= self.stride {
            return 0;
        }
        self.data[y as usize * self.stride + col as usize]
    }
}

/// Bilinear resize used to build pyramid levels.
fn resize_bilinear(src: &GrayImage, new_w: u32, new_h: u32) -> GrayImage {
    let (width, height) = (src.width() as usize, src.height() as usize);
    let (new_w, new_h) = (new_w as usize, new_h as usize);
    let frame = src.as_raw();
    let inv_scale_x = width as f32 / new_w as f32;
    let inv_scale_y = height as f32 / new_h as f32;

    let mut resized = vec![0u8; new_w * new_h];
    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * inv_scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * inv_scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            let tl = frame[y0 * width + x0] as f32;
            let tr = frame[y0 * width + x1] as f32;
            let bl = frame[y1 * width + x0] as f32;
            let br = frame[y1 * width + x1] as f32;

            let val = tl * (1.0 - fx) * (1.0 - fy)
                + tr * fx * (1.0 - fy)
                + bl * (1.0 - fx) * fy
                + br * fx * fy;

            resized[y * new_w + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }

    // Buffer length is new_w * new_h by construction.
    GrayImage::from_raw(new_w as u32, new_h as u32, resized)
        .unwrap_or_else(|| GrayImage::new(new_w as u32, new_h as u32))
}

// --- XML parsing ---

fn child<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    name: &str,
) -> Result<roxmltree::Node<'a, 'input>, CascadeError> {
    node.children().find(|n| n.has_tag_name(name)).ok_or_else(|| {
        CascadeError::Malformed(format!("missing <{name}> in <{}>", node.tag_name().name()))
    })
}

fn items<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
) -> impl Iterator<Item = roxmltree::Node<'a, 'input>> {
    node.children().filter(|n| n.is_element())
}

fn numbers(node: roxmltree::Node<'_, '_>) -> Result<Vec<f64>, CascadeError> {
    node.text()
        .unwrap_or("")
        .split_whitespace()
        .map(|token| {
            token.parse::<f64>().map_err(|_| {
                CascadeError::Malformed(format!(
                    "bad number {token:?} in <{}>",
                    node.tag_name().name()
                ))
            })
        })
        .collect()
}

fn scalar<T: std::str::FromStr>(node: roxmltree::Node<'_, '_>) -> Result<T, CascadeError> {
    let text = node.text().unwrap_or("").trim();
    text.parse().map_err(|_| {
        CascadeError::Malformed(format!("bad value {text:?} in <{}>", node.tag_name().name()))
    })
}

fn parse_feature(
    node: roxmltree::Node<'_, '_>,
    win_w: i64,
    win_h: i64,
) -> Result<HaarFeature, CascadeError> {
    let tilted = match node.children().find(|n| n.has_tag_name("tilted")) {
        Some(t) => scalar::<i32>(t)? != 0,
        None => false,
    };

    let rects = items(child(node, "rects")?)
        .map(|r| {
            let v = numbers(r)?;
            if v.len() != 5 || v[..4].iter().any(|c| c.fract() != 0.0) {
                return Err(CascadeError::Malformed(format!(
                    "rect needs 4 integers and a weight, got {v:?}"
                )));
            }
            let rect = HaarRect {
                x: v[0] as i64,
                y: v[1] as i64,
                width: v[2] as i64,
                height: v[3] as i64,
                weight: v[4],
            };
            let fits = if tilted {
                rect.x - rect.height >= 0
                    && rect.x + rect.width <= win_w
                    && rect.y >= 0
                    && rect.y + rect.width + rect.height <= win_h
            } else {
                rect.x >= 0
                    && rect.y >= 0
                    && rect.width >= 0
                    && rect.height >= 0
                    && rect.x + rect.width <= win_w
                    && rect.y + rect.height <= win_h
            };
            if !fits {
                return Err(CascadeError::Malformed(format!(
                    "rect {v:?} does not fit the {win_w}x{win_h} window"
                )));
            }
            Ok(rect)
        })
        .collect::<Result<Vec<_>, _>>()?;

    if rects.is_empty() {
        return Err(CascadeError::Malformed("feature without rects".into()));
    }

    Ok(HaarFeature { rects, tilted })
}

fn parse_stage(node: roxmltree::Node<'_, '_>, feature_count: usize) -> Result<Stage, CascadeError> {
    let threshold = scalar::<f64>(child(node, "stageThreshold")?)? - STAGE_THRESHOLD_EPS;
    let classifiers = items(child(node, "weakClassifiers")?)
        .map(|wc| parse_weak_classifier(wc, feature_count))
        .collect::<Result<Vec<_>, _>>()?;
    if classifiers.is_empty() {
        return Err(CascadeError::Malformed("stage without weak classifiers".into()));
    }
    Ok(Stage {
        threshold,
        classifiers,
    })
}

fn parse_weak_classifier(
    node: roxmltree::Node<'_, '_>,
    feature_count: usize,
) -> Result<WeakClassifier, CascadeError> {
    let raw = numbers(child(node, "internalNodes")?)?;
    let leaves = numbers(child(node, "leafValues")?)?;
    if raw.is_empty() || raw.len() % 4 != 0 {
        return Err(CascadeError::Malformed(format!(
            "internalNodes must hold groups of 4 values, got {}",
            raw.len()
        )));
    }

    let nodes: Vec<TreeNode> = raw
        .chunks_exact(4)
        .map(|c| TreeNode {
            left: c[0] as i32,
            right: c[1] as i32,
            feature: c[2] as usize,
            threshold: c[3],
        })
        .collect();

    for (i, n) in nodes.iter().enumerate() {
        if n.feature >= feature_count {
            return Err(CascadeError::Malformed(format!(
                "feature index {} out of range ({feature_count} features)",
                n.feature
            )));
        }
        for c in [n.left, n.right] {
            // Internal children always point forward, so the walk terminates.
            let ok = if c > 0 {
                (c as usize) > i && (c as usize) < nodes.len()
            } else {
                ((-c) as usize) < leaves.len()
            };
            if !ok {
                return Err(CascadeError::Malformed(format!("tree child {c} out of range")));
            }
        }
    }

    Ok(WeakClassifier { nodes, leaves })
}

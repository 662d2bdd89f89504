use image::{imageops, GrayImage};
use serde::{Deserialize, Serialize};

/// Axis-aligned face rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Box covering the whole image.
    pub fn full(image: &GrayImage) -> Self {
        Self::new(0, 0, image.width(), image.height())
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Clip the box to an image of the given size.
    ///
    /// Returns `None` when nothing of the box lies inside the image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(Self::new(self.x, self.y, w, h))
    }

    /// Copy the region under this box out of `image`.
    pub fn crop(&self, image: &GrayImage) -> Option<GrayImage> {
        let clipped = self.clamp_to(image.width(), image.height())?;
        Some(
            imageops::crop_imm(image, clipped.x, clipped.y, clipped.width, clipped.height)
                .to_image(),
        )
    }
}

/// A face normalized to the canonical resolution and equalized.
///
/// Only [`crate::normalizer::normalize`] constructs samples, so every
/// sample in the system shares the same dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceSample {
    image: GrayImage,
}

impl FaceSample {
    pub(crate) fn from_normalized(image: GrayImage) -> Self {
        Self { image }
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// A training sample tagged with the label of the person it belongs to.
#[derive(Debug, Clone)]
pub struct LabeledSample {
    pub label_id: u32,
    pub sample: FaceSample,
}

/// An enrolled person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub label_id: u32,
    pub name: String,
}

/// Raw nearest-match answer from the appearance model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label_id: u32,
    /// Chi-square distance to the closest training histogram. 0 = identical.
    pub distance: f64,
}

/// Prediction enriched with the label-map lookup and derived confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub label_id: u32,
    pub distance: f64,
    /// Person name, `None` when the label is absent from the label map.
    pub name: Option<String>,
    /// `max(0, 100 - distance)`, always in [0, 100].
    pub confidence: f64,
    /// Box of the face that was matched, in input image coordinates.
    pub face: BoundingBox,
}

//! Face detection with a frontal → profile cascade fallback.
//!
//! Enrollment images go through the frontal cascade first and the profile
//! cascade only when the frontal one finds nothing; small images are taken
//! as already-cropped faces. Live images use the frontal cascade alone.

use crate::cascade::{CascadeError, HaarCascade, ScanParams};
use crate::types::BoundingBox;
use image::GrayImage;
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
/// Images whose smaller side is at or below this are treated as face crops
/// during enrollment.
pub const PRECROPPED_MAX_SIDE: u32 = 80;

/// Scan parameters for enrollment photos.
pub const ENROLLMENT_SCAN: ScanParams = ScanParams {
    scale_factor: 1.1,
    min_neighbors: 4,
    min_size: (30, 30),
    max_size: None,
};

/// Scan parameters for live captures.
pub const LIVE_SCAN: ScanParams = ScanParams {
    scale_factor: 1.3,
    min_neighbors: 5,
    min_size: (0, 0),
    max_size: None,
};

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("cascade: {0}")]
    Cascade(#[from] CascadeError),
    #[error("no face detected")]
    NoFaceDetected,
}

/// Where the image came from, which decides the detection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMode {
    /// Curated training photos: frontal, then profile, small images pass through.
    Enrollment,
    /// Interactive captures: frontal only.
    Live,
}

/// A multi-scale sliding-window detector.
pub trait ObjectDetector: Send + Sync {
    fn detect_multi_scale(&self, image: &GrayImage, params: &ScanParams) -> Vec<BoundingBox>;
}

impl ObjectDetector for HaarCascade {
    fn detect_multi_scale(&self, image: &GrayImage, params: &ScanParams) -> Vec<BoundingBox> {
        HaarCascade::detect_multi_scale(self, image, params)
    }
}

/// Tunables for [`FaceDetector`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    pub enrollment: ScanParams,
    pub live: ScanParams,
    pub precropped_max_side: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            enrollment: ENROLLMENT_SCAN,
            live: LIVE_SCAN,
            precropped_max_side: PRECROPPED_MAX_SIDE,
        }
    }
}

/// Frontal detector with an optional profile fallback.
pub struct FaceDetector {
    frontal: Box<dyn ObjectDetector>,
    profile: Option<Box<dyn ObjectDetector>>,
    config: DetectorConfig,
}

impl FaceDetector {
    pub fn new(
        frontal: Box<dyn ObjectDetector>,
        profile: Option<Box<dyn ObjectDetector>>,
        config: DetectorConfig,
    ) -> Self {
        Self {
            frontal,
            profile,
            config,
        }
    }

    /// Load cascades from OpenCV XML files.
    pub fn load(frontal_path: &Path, profile_path: Option<&Path>) -> Result<Self, DetectorError> {
        let frontal = HaarCascade::load(frontal_path)?;
        let profile = match profile_path {
            Some(path) => Some(Box::new(HaarCascade::load(path)?) as Box<dyn ObjectDetector>),
            None => {
                tracing::warn!("no profile cascade configured; enrollment will not fall back to profile detection");
                None
            }
        };
        Ok(Self::new(Box::new(frontal), profile, DetectorConfig::default()))
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Candidate face boxes, possibly empty, in detector order.
    pub fn detect(&self, image: &GrayImage, mode: DetectionMode) -> Vec<BoundingBox> {
        match mode {
            DetectionMode::Live => self.frontal.detect_multi_scale(image, &self.config.live),
            DetectionMode::Enrollment => {
                let (w, h) = image.dimensions();
                if w.min(h) <= self.config.precropped_max_side {
                    tracing::trace!(width = w, height = h, "small image taken as a face crop");
                    return vec![BoundingBox::full(image)];
                }

                let frontal = self.frontal.detect_multi_scale(image, &self.config.enrollment);
                if !frontal.is_empty() {
                    return frontal;
                }

                match &self.profile {
                    Some(profile) => {
                        let boxes = profile.detect_multi_scale(image, &self.config.enrollment);
                        tracing::trace!(found = boxes.len(), "frontal found nothing; profile fallback");
                        boxes
                    }
                    None => Vec::new(),
                }
            }
        }
    }

    /// The largest detected face, or [`DetectorError::NoFaceDetected`].
    pub fn detect_largest(
        &self,
        image: &GrayImage,
        mode: DetectionMode,
    ) -> Result<BoundingBox, DetectorError> {
        select_largest(&self.detect(image, mode)).ok_or(DetectorError::NoFaceDetected)
    }
}

/// Pick the box with the largest area; the first one wins a tie.
pub fn select_largest(boxes: &[BoundingBox]) -> Option<BoundingBox> {
    boxes.iter().fold(None, |best: Option<BoundingBox>, b| match best {
        Some(current) if current.area() >= b.area() => Some(current),
        _ => Some(*b),
    })
}

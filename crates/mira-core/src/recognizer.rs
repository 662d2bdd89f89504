//! Inference service: detect → normalize → nearest match → confidence.
//!
//! A [`Recognizer`] is built once from persisted artifacts and is read-only
//! afterwards, so it can be shared by reference (or `Arc`) across threads.
//! [`RecognizerHandle`] is the load-once slot a serving process installs it
//! into.

use crate::confidence::{confidence_from_distance, ConfidencePolicy, Outcome};
use crate::detector::{DetectionMode, DetectorError, FaceDetector};
use crate::label_map::LabelMap;
use crate::model::{self, ModelError, TrainedModel};
use crate::normalizer::normalize;
use crate::types::PredictionResult;
use image::GrayImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("artifact not found: {}", .0.display())]
    ArtifactMissing(PathBuf),
    #[error("recognizer used before the model was loaded")]
    ModelNotLoaded,
    #[error("recognizer is already loaded")]
    AlreadyLoaded,
    #[error("no face detected")]
    NoFaceDetected,
    #[error("unreadable image: {0}")]
    UnreadableImage(#[from] image::ImageError),
    #[error("model: {0}")]
    Model(ModelError),
    #[error("detector: {0}")]
    Detector(DetectorError),
}

impl From<DetectorError> for RecognizerError {
    fn from(e: DetectorError) -> Self {
        match e {
            DetectorError::NoFaceDetected => RecognizerError::NoFaceDetected,
            other => RecognizerError::Detector(other),
        }
    }
}

impl From<ModelError> for RecognizerError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::ArtifactMissing(path) => RecognizerError::ArtifactMissing(path),
            other => RecognizerError::Model(other),
        }
    }
}

/// Prediction plus the decision derived from it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recognition {
    pub prediction: PredictionResult,
    pub outcome: Outcome,
}

/// Loaded model, label map and live-mode detector.
pub struct Recognizer {
    model: TrainedModel,
    labels: LabelMap,
    detector: FaceDetector,
    policy: ConfidencePolicy,
}

impl Recognizer {
    pub fn new(model: TrainedModel, labels: LabelMap, detector: FaceDetector) -> Self {
        Self {
            model,
            labels,
            detector,
            policy: ConfidencePolicy::default(),
        }
    }

    /// Load the model and label-map artifacts.
    pub fn load(
        model_path: &Path,
        labels_path: &Path,
        detector: FaceDetector,
    ) -> Result<Self, RecognizerError> {
        let model = TrainedModel::load(model_path)?;
        let labels = model::load_label_map(labels_path)?;

        let orphans = model
            .labels()
            .iter()
            .filter(|&&id| !labels.contains(id))
            .count();
        if orphans > 0 {
            tracing::warn!(orphans, "model has samples whose label is not in the label map");
        }

        Ok(Self::new(model, labels, detector))
    }

    pub fn with_policy(mut self, policy: ConfidencePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    pub fn model(&self) -> &TrainedModel {
        &self.model
    }

    /// Predict from encoded image bytes (any format `image` can decode).
    pub fn predict(&self, encoded: &[u8]) -> Result<PredictionResult, RecognizerError> {
        let gray = image::load_from_memory(encoded)?.to_luma8();
        self.predict_image(&gray)
    }

    /// Predict from an already-decoded grayscale image.
    pub fn predict_image(&self, gray: &GrayImage) -> Result<PredictionResult, RecognizerError> {
        let face = self.detector.detect_largest(gray, DetectionMode::Live)?;
        let region = face.crop(gray).ok_or(RecognizerError::NoFaceDetected)?;
        let prediction = self.model.predict(&normalize(&region));

        tracing::debug!(
            label_id = prediction.label_id,
            distance = prediction.distance,
            x = face.x,
            y = face.y,
            width = face.width,
            height = face.height,
            "face matched"
        );

        Ok(PredictionResult {
            label_id: prediction.label_id,
            distance: prediction.distance,
            name: self.labels.name(prediction.label_id).map(str::to_string),
            confidence: confidence_from_distance(prediction.distance),
            face,
        })
    }

    /// Predict and classify.
    pub fn recognize(&self, encoded: &[u8]) -> Result<Recognition, RecognizerError> {
        let prediction = self.predict(encoded)?;
        Ok(self.classify(prediction))
    }

    pub fn recognize_image(&self, gray: &GrayImage) -> Result<Recognition, RecognizerError> {
        let prediction = self.predict_image(gray)?;
        Ok(self.classify(prediction))
    }

    fn classify(&self, prediction: PredictionResult) -> Recognition {
        let outcome = self
            .policy
            .classify(prediction.label_id, prediction.distance, &self.labels);
        Recognition {
            prediction,
            outcome,
        }
    }
}

/// Shared, install-once slot for a [`Recognizer`].
#[derive(Clone, Default)]
pub struct RecognizerHandle {
    slot: Arc<OnceLock<Recognizer>>,
}

impl RecognizerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the recognizer. Fails if one is already installed.
    pub fn install(&self, recognizer: Recognizer) -> Result<(), RecognizerError> {
        self.slot
            .set(recognizer)
            .map_err(|_| RecognizerError::AlreadyLoaded)
    }

    pub fn is_loaded(&self) -> bool {
        self.slot.get().is_some()
    }

    pub fn get(&self) -> Result<&Recognizer, RecognizerError> {
        self.slot.get().ok_or(RecognizerError::ModelNotLoaded)
    }

    pub fn predict(&self, encoded: &[u8]) -> Result<PredictionResult, RecognizerError> {
        self.get()?.predict(encoded)
    }

    pub fn recognize(&self, encoded: &[u8]) -> Result<Recognition, RecognizerError> {
        self.get()?.recognize(encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::tests::FixedDetector;
    use crate::detector::DetectorConfig;
    use crate::trainer;
    use crate::types::{BoundingBox, LabeledSample};
    use image::Luma;
    use std::io::Cursor;

    fn face(seed: u32) -> GrayImage {
        GrayImage::from_fn(64, 64, |x, y| {
            Luma([((x * (seed + 2) + y * (2 * seed + 1) + x * y * seed) % 256) as u8])
        })
    }

    fn png(img: &GrayImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    /// Recognizer whose detector reports the whole 64x64 frame.
    fn recognizer() -> Recognizer {
        let mut labels = LabelMap::new();
        labels.insert(0, "Ana").unwrap();
        labels.insert(1, "Bea").unwrap();
        let samples: Vec<_> = (0..6)
            .map(|i| LabeledSample {
                label_id: i % 2,
                sample: normalize(&face(i)),
            })
            .collect();
        let training = trainer::train(&samples, &labels).unwrap();
        let detector = FaceDetector::new(
            Box::new(FixedDetector::new(vec![BoundingBox::new(0, 0, 64, 64)])),
            None,
            DetectorConfig::default(),
        );
        Recognizer::new(training.model, training.label_map, detector)
    }

    #[test]
    fn test_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Recognizer>();
        assert_send_sync::<RecognizerHandle>();
    }

    #[test]
    fn test_predict_training_image() {
        let r = recognizer();
        let result = r.predict(&png(&face(3))).unwrap();
        assert_eq!(result.label_id, 1);
        assert_eq!(result.name.as_deref(), Some("Bea"));
        assert_eq!(result.distance, 0.0);
        assert_eq!(result.confidence, 100.0);
        assert_eq!(result.face, BoundingBox::new(0, 0, 64, 64));
    }

    #[test]
    fn test_recognize_high_confidence() {
        let r = recognizer();
        let recognition = r.recognize(&png(&face(2))).unwrap();
        assert_eq!(
            recognition.outcome,
            Outcome::HighConfidence {
                name: "Ana".into(),
                confidence: 100.0
            }
        );
    }

    #[test]
    fn test_no_face() {
        let mut labels = LabelMap::new();
        labels.insert(0, "Ana").unwrap();
        labels.insert(1, "Bea").unwrap();
        let base = recognizer();
        let detector = FaceDetector::new(
            Box::new(FixedDetector::new(vec![])),
            None,
            DetectorConfig::default(),
        );
        let r = Recognizer::new(base.model.clone(), labels, detector);
        assert!(matches!(
            r.predict(&png(&face(1))),
            Err(RecognizerError::NoFaceDetected)
        ));
    }

    #[test]
    fn test_garbage_bytes() {
        assert!(matches!(
            recognizer().predict(b"definitely not an image"),
            Err(RecognizerError::UnreadableImage(_))
        ));
    }

    #[test]
    fn test_load_missing_artifacts() {
        let detector = FaceDetector::new(
            Box::new(FixedDetector::new(vec![])),
            None,
            DetectorConfig::default(),
        );
        let err = Recognizer::load(
            Path::new("/nonexistent/model.bin"),
            Path::new("/nonexistent/labels.json"),
            detector,
        )
        .err()
        .unwrap();
        assert!(matches!(err, RecognizerError::ArtifactMissing(_)));
    }

    #[test]
    fn test_handle_before_install() {
        let handle = RecognizerHandle::new();
        assert!(!handle.is_loaded());
        assert!(matches!(
            handle.predict(&png(&face(1))),
            Err(RecognizerError::ModelNotLoaded)
        ));
    }

    #[test]
    fn test_handle_install_once() {
        let handle = RecognizerHandle::new();
        handle.install(recognizer()).unwrap();
        assert!(handle.is_loaded());
        assert!(matches!(
            handle.install(recognizer()),
            Err(RecognizerError::AlreadyLoaded)
        ));
    }

    #[test]
    fn test_handle_shared_across_threads() {
        let handle = RecognizerHandle::new();
        handle.install(recognizer()).unwrap();
        let bytes = Arc::new(png(&face(4)));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let handle = handle.clone();
                let bytes = Arc::clone(&bytes);
                std::thread::spawn(move || handle.predict(&bytes).unwrap())
            })
            .collect();

        for w in workers {
            let result = w.join().unwrap();
            assert_eq!(result.label_id, 0);
            assert_eq!(result.distance, 0.0);
        }
    }
}

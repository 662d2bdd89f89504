//! mira-core: face detection and recognition over a closed roster.
//!
//! Haar cascades locate faces (frontal first, profile as an enrollment
//! fallback), faces are normalized to 150×150 and histogram-equalized, and
//! an LBPH model matches them against the enrolled persons.

pub mod cascade;
pub mod confidence;
pub mod dataset;
pub mod detector;
pub mod grouping;
pub mod label_map;
pub mod lbph;
pub mod model;
pub mod normalizer;
pub mod recognizer;
pub mod trainer;
pub mod types;

pub use confidence::{classify, ConfidencePolicy, Outcome};
pub use dataset::{Dataset, DatasetBuilder, DatasetError, FileOutcome, SkipReason};
pub use detector::{DetectionMode, FaceDetector, ObjectDetector};
pub use label_map::LabelMap;
pub use model::{ModelError, TrainedModel};
pub use recognizer::{Recognition, Recognizer, RecognizerError, RecognizerHandle};
pub use trainer::{train, Diagnostics, Imbalance, TrainError, Training};
pub use types::{BoundingBox, FaceSample, LabeledSample, Person, Prediction, PredictionResult};

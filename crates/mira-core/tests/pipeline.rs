//! End-to-end training and inference over synthetic datasets.

use image::{GrayImage, ImageFormat, Luma};
use mira_core::cascade::{HaarCascade, ScanParams};
use mira_core::detector::DetectorConfig;
use mira_core::normalizer::normalize;
use mira_core::{
    train, BoundingBox, DatasetBuilder, DatasetError, FaceDetector, FileOutcome, ObjectDetector,
    Outcome, Recognizer, RecognizerError, RecognizerHandle, SkipReason, TrainedModel,
};
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Reports the whole frame as one face.
struct WholeFrame;

impl ObjectDetector for WholeFrame {
    fn detect_multi_scale(&self, image: &GrayImage, _params: &ScanParams) -> Vec<BoundingBox> {
        vec![BoundingBox::full(image)]
    }
}

/// Never finds a face.
struct Blind;

impl ObjectDetector for Blind {
    fn detect_multi_scale(&self, _image: &GrayImage, _params: &ScanParams) -> Vec<BoundingBox> {
        Vec::new()
    }
}

/// Reports the same region on every image.
struct FixedBox(BoundingBox);

impl ObjectDetector for FixedBox {
    fn detect_multi_scale(&self, _image: &GrayImage, _params: &ScanParams) -> Vec<BoundingBox> {
        vec![self.0]
    }
}

fn detector() -> FaceDetector {
    FaceDetector::new(Box::new(WholeFrame), None, DetectorConfig::default())
}

/// A 72x72 textured crop, distinct for each (person, index) pair.
fn face(person: u32, index: u32) -> GrayImage {
    let a = 3 + person * 5;
    let b = 7 + index * 3;
    GrayImage::from_fn(72, 72, |x, y| {
        let v = x * a + y * b + (x * y * (person + 1) + index * 29) / 3;
        Luma([(v % 256) as u8])
    })
}

/// Where [`photo`] pastes the face.
const PHOTO_FACE: BoundingBox = BoundingBox {
    x: 24,
    y: 16,
    width: 72,
    height: 72,
};

/// A 128x112 photo: `face(person, index)` over a gradient background.
fn photo(person: u32, index: u32) -> GrayImage {
    let crop = face(person, index);
    let (fx, fy) = (PHOTO_FACE.x, PHOTO_FACE.y);
    GrayImage::from_fn(128, 112, |x, y| {
        if (fx..fx + 72).contains(&x) && (fy..fy + 72).contains(&y) {
            *crop.get_pixel(x - fx, y - fy)
        } else {
            Luma([((x * 5 + y * 3) % 256) as u8])
        }
    })
}

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// The face-like pattern the synthetic cascade accepts, top-left of a
/// `size` x `size` skin-coloured frame.
fn synthetic_face_frame(size: u32) -> GrayImage {
    GrayImage::from_fn(size, size, |x, y| {
        let v = match (x, y) {
            (5..=9 | 14..=18, 6..=9) => 40,
            (10..=13, 6..=9) => 190,
            (8..=15, 15..=17) => 60,
            _ => 150,
        };
        Luma([v])
    })
}

fn encode(img: &GrayImage) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

/// Writes `count` images for `name`; returns their paths.
fn enroll(root: &Path, name: &str, person: u32, count: u32) -> Vec<PathBuf> {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    (0..count)
        .map(|i| {
            let path = dir.join(format!("{i:03}.png"));
            face(person, i).save(&path).unwrap();
            path
        })
        .collect()
}

#[test]
fn test_two_persons_train_and_recognize() {
    let root = tempfile::tempdir().unwrap();
    enroll(root.path(), "Ana", 0, 10);
    enroll(root.path(), "Bruno", 1, 10);

    let detector = detector();
    let dataset = DatasetBuilder::new(&detector).build(root.path()).unwrap();
    let training = train(&dataset.samples, &dataset.label_map).unwrap();
    assert_eq!(training.diagnostics.total_persons, 2);
    assert_eq!(training.diagnostics.total_samples, 20);
    assert!(training.diagnostics.imbalance.is_none());

    let recognizer = Recognizer::new(training.model, training.label_map, detector);
    for (person, name) in [(0, "Ana"), (1, "Bruno")] {
        let recognition = recognizer.recognize(&encode(&face(person, 4))).unwrap();
        assert_eq!(recognition.prediction.label_id, person);
        assert_eq!(recognition.prediction.name.as_deref(), Some(name));
        assert!(recognition.prediction.confidence >= 70.0);
        assert!(matches!(recognition.outcome, Outcome::HighConfidence { .. }));
    }
}

#[test]
fn test_imbalanced_roster_still_trains() {
    let root = tempfile::tempdir().unwrap();
    enroll(root.path(), "A", 0, 30);
    enroll(root.path(), "B", 1, 5);

    let detector = detector();
    let dataset = DatasetBuilder::new(&detector).build(root.path()).unwrap();
    let training = train(&dataset.samples, &dataset.label_map).unwrap();

    let imbalance = training.diagnostics.imbalance.unwrap();
    assert_eq!((imbalance.min, imbalance.max), (5, 30));
    assert!((imbalance.ratio - 6.0).abs() < 1e-12);
    assert_eq!(training.diagnostics.distribution.get("A"), Some(&30));
    assert_eq!(training.diagnostics.distribution.get("B"), Some(&5));
}

#[test]
fn test_single_person_writes_no_artifacts() {
    let root = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    enroll(root.path(), "Solo", 0, 4);
    let model_path = out.path().join("model.bin");
    let labels_path = out.path().join("labels.json");

    let detector = detector();
    let result = DatasetBuilder::new(&detector)
        .build(root.path())
        .map(|dataset| train(&dataset.samples, &dataset.label_map));
    assert!(matches!(
        result,
        Err(DatasetError::InsufficientLabels { found: 1 })
    ));
    assert!(!model_path.exists());
    assert!(!labels_path.exists());
}

#[test]
fn test_missing_data_directory() {
    let root = tempfile::tempdir().unwrap();
    let detector = detector();
    let err = DatasetBuilder::new(&detector)
        .build(root.path().join("absent"))
        .unwrap_err();
    assert!(matches!(err, DatasetError::DataDirectoryMissing(_)));
}

#[test]
fn test_persisted_model_predicts_identically() {
    let root = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    enroll(root.path(), "Ana", 0, 6);
    enroll(root.path(), "Bruno", 1, 6);
    enroll(root.path(), "Carla", 2, 6);

    let detector = detector();
    let dataset = DatasetBuilder::new(&detector).build(root.path()).unwrap();
    let training = train(&dataset.samples, &dataset.label_map).unwrap();
    let model_path = out.path().join("model.bin");
    let labels_path = out.path().join("labels.json");
    training.save_artifacts(&model_path, &labels_path).unwrap();

    let before = Recognizer::new(training.model.clone(), training.label_map.clone(), detector);
    let after = Recognizer::load(&model_path, &labels_path, self::detector()).unwrap();

    // Not in the training set.
    let query = encode(&face(2, 17));
    assert_eq!(before.predict(&query).unwrap(), after.predict(&query).unwrap());
    assert_eq!(TrainedModel::load(&model_path).unwrap(), training.model);
}

#[test]
fn test_label_assignment_is_reproducible() {
    let root = tempfile::tempdir().unwrap();
    enroll(root.path(), "Marta", 0, 2);
    enroll(root.path(), "Diego", 1, 2);
    enroll(root.path(), "Lucia", 2, 2);

    let detector = detector();
    let first = DatasetBuilder::new(&detector).build(root.path()).unwrap();
    let second = DatasetBuilder::new(&detector).build(root.path()).unwrap();
    assert_eq!(first.label_map, second.label_map);
    let names: Vec<_> = first.label_map.persons().map(|p| p.name).collect();
    assert_eq!(names, vec!["Diego", "Lucia", "Marta"]);
}

#[test]
fn test_unreadable_file_does_not_abort() {
    let root = tempfile::tempdir().unwrap();
    enroll(root.path(), "Ana", 0, 3);
    enroll(root.path(), "Bruno", 1, 3);
    std::fs::write(root.path().join("Ana").join("zz_corrupt.jpg"), b"\xff\xd8garbage").unwrap();

    let detector = detector();
    let dataset = DatasetBuilder::new(&detector).build(root.path()).unwrap();
    assert_eq!(dataset.samples.len(), 6);
    assert_eq!(dataset.skipped().count(), 1);
}

#[test]
fn test_inference_failures_are_distinguishable() {
    let root = tempfile::tempdir().unwrap();
    enroll(root.path(), "Ana", 0, 3);
    enroll(root.path(), "Bruno", 1, 3);
    let detector = detector();
    let dataset = DatasetBuilder::new(&detector).build(root.path()).unwrap();
    let training = train(&dataset.samples, &dataset.label_map).unwrap();

    let handle = RecognizerHandle::new();
    assert!(matches!(
        handle.recognize(&encode(&face(0, 0))),
        Err(RecognizerError::ModelNotLoaded)
    ));

    let blind = FaceDetector::new(Box::new(Blind), None, DetectorConfig::default());
    handle
        .install(Recognizer::new(training.model, training.label_map, blind))
        .unwrap();
    assert!(matches!(
        handle.recognize(&encode(&face(0, 0))),
        Err(RecognizerError::NoFaceDetected)
    ));

    let missing = Recognizer::load(
        &root.path().join("model.bin"),
        &root.path().join("labels.json"),
        self::detector(),
    );
    assert!(matches!(missing, Err(RecognizerError::ArtifactMissing(_))));
}

#[test]
fn test_large_photos_are_cropped_to_detected_box() {
    let root = tempfile::tempdir().unwrap();
    for (person, name) in [(0, "Ana"), (1, "Bruno")] {
        let dir = root.path().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..6 {
            photo(person, i).save(dir.join(format!("{i:03}.png"))).unwrap();
        }
    }

    let detector = FaceDetector::new(
        Box::new(FixedBox(PHOTO_FACE)),
        None,
        DetectorConfig::default(),
    );
    let dataset = DatasetBuilder::new(&detector).build(root.path()).unwrap();
    assert_eq!(dataset.samples.len(), 12);
    assert!(dataset
        .files
        .iter()
        .all(|f| f.outcome == FileOutcome::Accepted(PHOTO_FACE)));
    // Only the face region reaches the normalizer.
    assert_eq!(
        dataset.samples[0].sample.image(),
        normalize(&face(0, 0)).image()
    );

    let training = train(&dataset.samples, &dataset.label_map).unwrap();
    let recognizer = Recognizer::new(training.model, training.label_map, detector);
    let recognition = recognizer.recognize(&encode(&photo(1, 3))).unwrap();
    assert_eq!(recognition.prediction.label_id, 1);
    assert_eq!(recognition.prediction.name.as_deref(), Some("Bruno"));
    assert!(matches!(recognition.outcome, Outcome::HighConfidence { .. }));
}

#[test]
fn test_opencv_cascade_locates_face() {
    let cascade = HaarCascade::load(fixture("haarcascade_synthetic_face.xml")).unwrap();
    let frame = synthetic_face_frame(30);
    let mut params = ScanParams {
        scale_factor: 1.25,
        min_neighbors: 0,
        min_size: (0, 0),
        max_size: None,
    };
    assert!(cascade
        .detect_multi_scale(&frame, &params)
        .contains(&BoundingBox::new(0, 0, 24, 24)));

    params.min_size = (25, 25);
    assert!(cascade.detect_multi_scale(&frame, &params).is_empty());
}

#[test]
fn test_opencv_cascade_enrollment_skips_faceless_photos() {
    let root = tempfile::tempdir().unwrap();
    enroll(root.path(), "Ana", 0, 2);
    enroll(root.path(), "Bruno", 1, 2);
    for name in ["Ana", "Bruno"] {
        GrayImage::from_pixel(120, 120, Luma([150]))
            .save(root.path().join(name).join("plain.png"))
            .unwrap();
    }

    // Frontal and profile both run on the large photos and find nothing.
    let cascade = fixture("haarcascade_synthetic_face.xml");
    let detector = FaceDetector::load(&cascade, Some(cascade.as_path())).unwrap();
    let dataset = DatasetBuilder::new(&detector).build(root.path()).unwrap();
    assert_eq!(dataset.samples.len(), 4);
    let skipped: Vec<_> = dataset.skipped().collect();
    assert_eq!(skipped.len(), 2);
    assert!(skipped
        .iter()
        .all(|f| f.outcome == FileOutcome::Skipped(SkipReason::NoFaceDetected)));

    let training = train(&dataset.samples, &dataset.label_map).unwrap();
    let recognizer = Recognizer::new(training.model, training.label_map, detector);
    assert!(matches!(
        recognizer.recognize(&encode(&GrayImage::from_pixel(120, 120, Luma([150])))),
        Err(RecognizerError::NoFaceDetected)
    ));
}

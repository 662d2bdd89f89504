//! Dataset construction from a directory tree of enrolled persons.
//!
//! Layout: `<root>/<person name>/<image files>`. Each image goes through
//! enrollment detection and normalization; per-file failures are recorded
//! and skipped, never fatal.

use crate::detector::{DetectionMode, FaceDetector};
use crate::label_map::{LabelMap, LabelMapError};
use crate::normalizer::normalize;
use crate::types::{BoundingBox, FaceSample, LabeledSample};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Extensions accepted as training images (compared case-insensitively).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

/// A discriminating model needs at least this many persons.
pub const MIN_PERSONS: usize = 2;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("data directory not found: {}", .0.display())]
    DataDirectoryMissing(PathBuf),
    #[error("need at least {MIN_PERSONS} persons with usable images, found {found}")]
    InsufficientLabels { found: usize },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("label map: {0}")]
    LabelMap(#[from] LabelMapError),
}

/// Why a file contributed no sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The file could not be decoded as an image.
    Unreadable(String),
    NoFaceDetected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Accepted(BoundingBox),
    Skipped(SkipReason),
}

/// What happened to one candidate image.
#[derive(Debug, Clone)]
pub struct FileReport {
    pub path: PathBuf,
    pub person: String,
    pub outcome: FileOutcome,
}

/// Output of [`DatasetBuilder::build`].
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Samples in person order, then file-name order.
    pub samples: Vec<LabeledSample>,
    /// Persons that contributed at least one sample.
    pub label_map: LabelMap,
    pub files: Vec<FileReport>,
}

impl Dataset {
    /// Sample count per label id.
    pub fn counts(&self) -> BTreeMap<u32, usize> {
        let mut counts = BTreeMap::new();
        for s in &self.samples {
            *counts.entry(s.label_id).or_insert(0) += 1;
        }
        counts
    }

    pub fn skipped(&self) -> impl Iterator<Item = &FileReport> {
        self.files
            .iter()
            .filter(|f| matches!(f.outcome, FileOutcome::Skipped(_)))
    }
}

/// Builds a [`Dataset`] with a borrowed detector.
pub struct DatasetBuilder<'a> {
    detector: &'a FaceDetector,
}

impl<'a> DatasetBuilder<'a> {
    pub fn new(detector: &'a FaceDetector) -> Self {
        Self { detector }
    }

    /// Walk `root` and collect one sample per usable image.
    ///
    /// Person directories are sorted by name and numbered from 0; a person
    /// whose images all fail keeps its number but is left out of the label
    /// map.
    pub fn build(&self, root: impl AsRef<Path>) -> Result<Dataset, DatasetError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(DatasetError::DataDirectoryMissing(root.to_path_buf()));
        }

        let persons = person_directories(root)?;
        tracing::info!(root = %root.display(), persons = persons.len(), "scanning dataset");

        let mut samples = Vec::new();
        let mut label_map = LabelMap::new();
        let mut files = Vec::new();

        for (label_id, (name, dir)) in (0u32..).zip(persons) {
            let mut accepted = 0usize;
            for path in person_images(&name, &dir) {
                let outcome = match self.process(&path) {
                    Ok((face, sample)) => {
                        samples.push(LabeledSample { label_id, sample });
                        accepted += 1;
                        FileOutcome::Accepted(face)
                    }
                    Err(reason) => {
                        tracing::debug!(path = %path.display(), reason = ?reason, "skipping image");
                        FileOutcome::Skipped(reason)
                    }
                };
                files.push(FileReport {
                    path,
                    person: name.clone(),
                    outcome,
                });
            }

            if accepted > 0 {
                tracing::debug!(person = %name, label_id, samples = accepted, "person enrolled");
                label_map.insert(label_id, name)?;
            } else {
                tracing::warn!(person = %name, "no usable images; person left out");
            }
        }

        if label_map.len() < MIN_PERSONS {
            return Err(DatasetError::InsufficientLabels {
                found: label_map.len(),
            });
        }

        Ok(Dataset {
            samples,
            label_map,
            files,
        })
    }

    fn process(&self, path: &Path) -> Result<(BoundingBox, FaceSample), SkipReason> {
        let gray = image::open(path)
            .map_err(|e| SkipReason::Unreadable(e.to_string()))?
            .to_luma8();
        let face = self
            .detector
            .detect_largest(&gray, DetectionMode::Enrollment)
            .map_err(|_| SkipReason::NoFaceDetected)?;
        let region = face.crop(&gray).ok_or(SkipReason::NoFaceDetected)?;
        Ok((face, normalize(&region)))
    }
}

/// Immediate subdirectories of `root`, sorted by name.
fn person_directories(root: &Path) -> Result<Vec<(String, PathBuf)>, DatasetError> {
    let mut persons = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => persons.push((name, path)),
            Err(raw) => tracing::warn!(name = ?raw, "skipping non UTF-8 directory name"),
        }
    }
    persons.sort();
    Ok(persons)
}

/// Images of one person. An unreadable directory counts as empty so the
/// other persons still enroll.
fn person_images(person: &str, dir: &Path) -> Vec<PathBuf> {
    image_files(dir).unwrap_or_else(|e| {
        tracing::warn!(person, dir = %dir.display(), error = %e, "cannot list person directory");
        Vec::new()
    })
}

/// Image files directly inside `dir`, sorted by file name.
fn image_files(dir: &Path) -> Result<Vec<PathBuf>, DatasetError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && has_image_extension(p))
        .collect();
    files.sort();
    Ok(files)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

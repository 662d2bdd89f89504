//! Trained LBPH appearance model and artifact persistence.
//!
//! The model is a matrix of spatial histograms (one row per training sample)
//! with the label of each row. Prediction is a nearest-neighbour search
//! under the chi-square distance.

use crate::label_map::{LabelMap, LabelMapError};
use crate::lbph::{self, LbphParams, LbphParamsError};
use crate::normalizer::CANONICAL_SIZE;
use crate::types::{FaceSample, LabeledSample, Prediction};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Bumped whenever the serialized layout changes.
pub const MODEL_FORMAT_VERSION: u32 = 1;

/// Default file name of the model artifact.
pub const MODEL_FILE_NAME: &str = "model.bin";
/// Default file name of the label-map artifact.
pub const LABELS_FILE_NAME: &str = "labels.json";

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("artifact not found: {}", .0.display())]
    ArtifactMissing(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("model encoding: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("label map encoding: {0}")]
    LabelEncoding(#[from] serde_json::Error),
    #[error("label map: {0}")]
    LabelMap(#[from] LabelMapError),
    #[error("invalid LBPH parameters: {0}")]
    Params(#[from] LbphParamsError),
    #[error("invalid model: {0}")]
    Invalid(String),
    #[error("incompatible model: {0}")]
    Incompatible(String),
}

/// LBPH model. Immutable once trained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    format_version: u32,
    params: LbphParams,
    sample_size: (u32, u32),
    /// One spatial histogram per training sample.
    histograms: Array2<f32>,
    /// Label of each histogram row.
    labels: Vec<u32>,
    /// RFC 3339 creation time.
    trained_at: String,
}

impl TrainedModel {
    /// Compute one histogram per sample.
    pub fn fit(params: LbphParams, samples: &[LabeledSample]) -> Result<Self, ModelError> {
        params.validate()?;
        let first = samples
            .first()
            .ok_or_else(|| ModelError::Invalid("no training samples".into()))?;
        let sample_size = (first.sample.width(), first.sample.height());

        let len = params.histogram_len();
        let mut histograms = Array2::<f32>::zeros((samples.len(), len));
        for (row, s) in samples.iter().enumerate() {
            if (s.sample.width(), s.sample.height()) != sample_size {
                return Err(ModelError::Invalid(format!(
                    "sample {row} is {}x{}, expected {}x{}",
                    s.sample.width(),
                    s.sample.height(),
                    sample_size.0,
                    sample_size.1
                )));
            }
            let hist = lbph::describe(s.sample.image(), &params);
            histograms
                .row_mut(row)
                .iter_mut()
                .zip(hist)
                .for_each(|(dst, v)| *dst = v);
        }

        Ok(Self {
            format_version: MODEL_FORMAT_VERSION,
            params,
            sample_size,
            histograms,
            labels: samples.iter().map(|s| s.label_id).collect(),
            trained_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    pub fn params(&self) -> &LbphParams {
        &self.params
    }

    pub fn sample_size(&self) -> (u32, u32) {
        self.sample_size
    }

    pub fn sample_count(&self) -> usize {
        self.labels.len()
    }

    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    pub fn trained_at(&self) -> &str {
        &self.trained_at
    }

    /// Nearest training histogram; the first one wins a tie.
    pub fn predict(&self, sample: &FaceSample) -> Prediction {
        let query = lbph::describe(sample.image(), &self.params);
        let mut best = Prediction {
            label_id: self.labels.first().copied().unwrap_or_default(),
            distance: f64::INFINITY,
        };

        for (row, &label_id) in self.histograms.rows().into_iter().zip(&self.labels) {
            let distance = match row.as_slice() {
                Some(slice) => lbph::chi_square(slice, &query),
                None => lbph::chi_square(&row.to_vec(), &query),
            };
            if distance < best.distance {
                best = Prediction { label_id, distance };
            }
        }

        best
    }

    /// Check invariants after deserialization.
    fn check(&self) -> Result<(), ModelError> {
        if self.format_version != MODEL_FORMAT_VERSION {
            return Err(ModelError::Incompatible(format!(
                "format version {} (expected {MODEL_FORMAT_VERSION})",
                self.format_version
            )));
        }
        if self.sample_size != (CANONICAL_SIZE, CANONICAL_SIZE) {
            return Err(ModelError::Incompatible(format!(
                "trained on {}x{} samples, canonical size is {CANONICAL_SIZE}x{CANONICAL_SIZE}",
                self.sample_size.0, self.sample_size.1
            )));
        }
        self.params.validate()?;
        let (rows, cols) = self.histograms.dim();
        if rows == 0 || rows != self.labels.len() || cols != self.params.histogram_len() {
            return Err(ModelError::Invalid(format!(
                "histogram matrix {rows}x{cols} does not match {} labels / {} bins",
                self.labels.len(),
                self.params.histogram_len()
            )));
        }
        Ok(())
    }

    /// Load a model from a binary file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ModelError::ArtifactMissing(path.to_path_buf()));
        }
        let mut reader = BufReader::new(File::open(path)?);
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let model: Self = bincode::deserialize(&bytes)?;
        model.check()?;

        tracing::info!(
            path = %path.display(),
            samples = model.sample_count(),
            trained_at = %model.trained_at,
            "loaded LBPH model"
        );
        Ok(model)
    }

    /// Save the model to a binary file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ModelError> {
        self.stage(path.as_ref())?.commit()
    }

    /// Encode the model into a temp file next to `path`.
    pub(crate) fn stage(&self, path: &Path) -> Result<Staged, ModelError> {
        Staged::write(path, &bincode::serialize(self)?)
    }
}

/// Load a label map from its JSON artifact.
pub fn load_label_map(path: impl AsRef<Path>) -> Result<LabelMap, ModelError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ModelError::ArtifactMissing(path.to_path_buf()));
    }
    let map: LabelMap = serde_json::from_reader(BufReader::new(File::open(path)?))?;
    tracing::info!(path = %path.display(), persons = map.len(), "loaded label map");
    Ok(map)
}

/// Write a label map as pretty JSON.
pub fn save_label_map(map: &LabelMap, path: impl AsRef<Path>) -> Result<(), ModelError> {
    stage_label_map(map, path.as_ref())?.commit()
}

pub(crate) fn stage_label_map(map: &LabelMap, path: &Path) -> Result<Staged, ModelError> {
    Staged::write(path, &serde_json::to_vec_pretty(map)?)
}

/// An artifact fully written to `<target>.tmp`, waiting to be renamed over
/// its target. Dropping it without [`Staged::commit`] removes the temp file.
#[derive(Debug)]
pub(crate) struct Staged {
    tmp: Option<PathBuf>,
    target: PathBuf,
}

impl Staged {
    fn write(target: &Path, bytes: &[u8]) -> Result<Self, ModelError> {
        if target.is_dir() {
            return Err(ModelError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is a directory", target.display()),
            )));
        }
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut tmp_name = target.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");

        // Owned before the first write so a failed write still cleans up.
        let staged = Self {
            tmp: Some(target.with_file_name(tmp_name)),
            target: target.to_path_buf(),
        };
        staged.fill(bytes)?;
        Ok(staged)
    }

    fn fill(&self, bytes: &[u8]) -> Result<(), ModelError> {
        let Some(tmp) = &self.tmp else {
            return Ok(());
        };
        let mut writer = BufWriter::new(File::create(tmp)?);
        writer.write_all(bytes)?;
        writer.flush()?;
        Ok(())
    }

    /// Rename the temp file over the target.
    pub(crate) fn commit(mut self) -> Result<(), ModelError> {
        if let Some(tmp) = self.tmp.take() {
            if let Err(e) = std::fs::rename(&tmp, &self.target) {
                let _ = std::fs::remove_file(&tmp);
                return Err(e.into());
            }
        }
        Ok(())
    }
}

impl Drop for Staged {
    fn drop(&mut self) {
        if let Some(tmp) = self.tmp.take() {
            let _ = std::fs::remove_file(tmp);
        }
    }
}

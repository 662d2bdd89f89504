//! Model training and training diagnostics.

use crate::dataset::{Dataset, MIN_PERSONS};
use crate::label_map::LabelMap;
use crate::lbph::LbphParams;
use crate::model::{self, ModelError, TrainedModel};
use crate::types::LabeledSample;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;

/// Warn when the most-sampled person has more than this many times the
/// samples of the least-sampled one.
pub const IMBALANCE_RATIO_LIMIT: usize = 3;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("need at least {MIN_PERSONS} persons with samples, found {found}")]
    InsufficientLabels { found: usize },
    #[error("sample label {0} is missing from the label map")]
    UnknownLabel(u32),
    #[error("model: {0}")]
    Model(#[from] ModelError),
}

/// Sample-count spread between the best and worst represented persons.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Imbalance {
    pub min: usize,
    pub max: usize,
    pub ratio: f64,
}

/// Summary of a training run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    pub total_persons: usize,
    pub total_samples: usize,
    /// Enrolled names in label order.
    pub persons: Vec<String>,
    /// Samples per person, ordered by name.
    pub distribution: BTreeMap<String, usize>,
    /// Set when `max > IMBALANCE_RATIO_LIMIT * min`.
    pub imbalance: Option<Imbalance>,
}

impl Diagnostics {
    fn compute(samples: &[LabeledSample], label_map: &LabelMap) -> Self {
        let mut per_label: BTreeMap<u32, usize> = BTreeMap::new();
        for s in samples {
            *per_label.entry(s.label_id).or_insert(0) += 1;
        }

        let represented: Vec<_> = label_map
            .persons()
            .filter_map(|p| per_label.get(&p.label_id).map(|&n| (p.name, n)))
            .collect();
        let persons: Vec<String> = represented.iter().map(|(name, _)| name.clone()).collect();
        let distribution: BTreeMap<String, usize> = represented.into_iter().collect();

        let min = distribution.values().copied().min().unwrap_or(0);
        let max = distribution.values().copied().max().unwrap_or(0);
        let imbalance = (min > 0 && max > IMBALANCE_RATIO_LIMIT * min).then(|| Imbalance {
            min,
            max,
            ratio: max as f64 / min as f64,
        });

        Self {
            total_persons: persons.len(),
            total_samples: samples.len(),
            persons,
            distribution,
            imbalance,
        }
    }
}

/// A trained model together with its label map and diagnostics.
#[derive(Debug, Clone)]
pub struct Training {
    pub model: TrainedModel,
    pub label_map: LabelMap,
    pub diagnostics: Diagnostics,
}

/// Fit an LBPH model with the default hyperparameters.
pub fn train(samples: &[LabeledSample], label_map: &LabelMap) -> Result<Training, TrainError> {
    train_with(LbphParams::default(), samples, label_map)
}

/// Fit an LBPH model with explicit hyperparameters.
///
/// Persons of `label_map` without samples are left out of the diagnostics
/// and of the returned label map.
pub fn train_with(
    params: LbphParams,
    samples: &[LabeledSample],
    label_map: &LabelMap,
) -> Result<Training, TrainError> {
    if let Some(s) = samples.iter().find(|s| !label_map.contains(s.label_id)) {
        return Err(TrainError::UnknownLabel(s.label_id));
    }
    let diagnostics = Diagnostics::compute(samples, label_map);
    if diagnostics.total_persons < MIN_PERSONS {
        return Err(TrainError::InsufficientLabels {
            found: diagnostics.total_persons,
        });
    }
    let label_map = represented_only(label_map, samples)?;

    let model = TrainedModel::fit(params, samples)?;

    tracing::info!(
        persons = diagnostics.total_persons,
        samples = diagnostics.total_samples,
        radius = params.radius,
        neighbors = params.neighbors,
        grid_x = params.grid_x,
        grid_y = params.grid_y,
        "LBPH model trained"
    );
    if let Some(imb) = &diagnostics.imbalance {
        tracing::warn!(
            min = imb.min,
            max = imb.max,
            ratio = imb.ratio,
            "sample counts are imbalanced across persons"
        );
    }

    Ok(Training {
        model,
        label_map,
        diagnostics,
    })
}

/// The persons of `label_map` that own at least one sample.
fn represented_only(
    label_map: &LabelMap,
    samples: &[LabeledSample],
) -> Result<LabelMap, ModelError> {
    let sampled: BTreeSet<u32> = samples.iter().map(|s| s.label_id).collect();
    let mut map = LabelMap::new();
    for person in label_map.persons() {
        if sampled.contains(&person.label_id) {
            map.insert(person.label_id, person.name)?;
        } else {
            tracing::warn!(
                person = %person.name,
                label_id = person.label_id,
                "no samples; person left out"
            );
        }
    }
    Ok(map)
}

/// Train on a built dataset.
pub fn train_dataset(dataset: &Dataset) -> Result<Training, TrainError> {
    train(&dataset.samples, &dataset.label_map)
}

impl Training {
    /// Persist the model and label map. Both files are written to temporary
    /// siblings first and renamed into place only once both writes succeed,
    /// so a failed write leaves the previous artifacts untouched.
    pub fn save_artifacts(&self, model_path: &Path, labels_path: &Path) -> Result<(), ModelError> {
        let staged_model = self.model.stage(model_path)?;
        let staged_labels = model::stage_label_map(&self.label_map, labels_path)?;
        staged_model.commit()?;
        staged_labels.commit()?;
        tracing::info!(
            model = %model_path.display(),
            labels = %labels_path.display(),
            "saved training artifacts"
        );
        Ok(())
    }
}

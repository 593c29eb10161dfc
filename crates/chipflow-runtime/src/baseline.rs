//! Reference collaborators used by the development server and in tests.
//!
//! `StableDetector` reports every pixel as a single unbroken segment. `PriorTrainer` fits the
//! class prior of the training labels, which is the floor any real classifier has to beat.

use std::collections::BTreeMap;

use anyhow::{bail, Context};
use chipflow_core::band::Band;
use chipflow_core::features::{LabeledMatrix, COEFFICIENT_COUNT};
use chipflow_core::types::{Detection, RawBandFit, RawChangeModel, TimeSeriesRecord};
use serde::{Deserialize, Serialize};

use crate::collab::{Detector, ModelArtifact, Trainer};
use crate::config::TrainingParams;
use crate::sample::label_key;

const PROBABILITY_FLOOR: f64 = 1e-15;

#[derive(Debug, Clone, Copy, Default)]
pub struct StableDetector;

impl Detector for StableDetector {
    fn detect(&self, series: &TimeSeriesRecord) -> anyhow::Result<Detection> {
        let (Some(first), Some(last)) = (series.dates.iter().min(), series.dates.iter().max())
        else {
            return Ok(Detection::default());
        };

        let bands = Band::ALL
            .iter()
            .filter_map(|band| {
                let values = series.band(band.name())?;
                let n = values.len().max(1) as f64;
                let mean = values.iter().sum::<f64>() / n;
                let rmse = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
                Some((
                    *band,
                    RawBandFit {
                        magnitude: Some(0.0),
                        rmse: Some(rmse),
                        intercept: Some(mean),
                        coefficients: Some(vec![0.0; COEFFICIENT_COUNT]),
                    },
                ))
            })
            .collect();

        Ok(Detection {
            change_models: vec![RawChangeModel {
                start_day: Some(*first),
                end_day: Some(*last),
                break_day: Some(*last),
                change_probability: Some(0.0),
                curve_qa: Some(0),
                bands,
            }],
            processing_mask: vec![true; series.dates.len()],
        })
    }
}

/// Class-frequency model with its held-out log loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorModel {
    pub probabilities: BTreeMap<i64, f64>,
    pub train_mlogloss: f64,
    pub test_mlogloss: f64,
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl PriorModel {
    fn mlogloss(&self, labels: &[f64]) -> anyhow::Result<f64> {
        if labels.is_empty() {
            return Ok(0.0);
        }
        let mut total = 0.0;
        for label in labels {
            let p = self
                .probabilities
                .get(&label_key(*label)?)
                .copied()
                .unwrap_or(0.0)
                .max(PROBABILITY_FLOOR);
            total -= p.ln();
        }
        Ok(total / labels.len() as f64)
    }
}

impl ModelArtifact for PriorModel {
    fn serialize(&self) -> anyhow::Result<Vec<u8>> {
        serde_json::to_vec(self).context("encoding prior model")
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PriorTrainer;

impl Trainer for PriorTrainer {
    fn fit(
        &self,
        train: &LabeledMatrix,
        test: &LabeledMatrix,
        params: &TrainingParams,
    ) -> anyhow::Result<Box<dyn ModelArtifact>> {
        if train.rows() == 0 {
            bail!("empty training set");
        }
        let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
        for label in &train.labels {
            *counts.entry(label_key(*label)?).or_insert(0) += 1;
        }
        let n = train.rows() as f64;
        let mut model = PriorModel {
            probabilities: counts
                .into_iter()
                .map(|(k, c)| (k, c as f64 / n))
                .collect(),
            train_mlogloss: 0.0,
            test_mlogloss: 0.0,
            parameters: params.parameters.clone(),
        };
        model.train_mlogloss = model.mlogloss(&train.labels)?;
        model.test_mlogloss = model.mlogloss(&test.labels)?;
        if params.verbose_eval {
            tracing::info!(
                train_mlogloss = model.train_mlogloss,
                test_mlogloss = model.test_mlogloss,
                classes = model.probabilities.len(),
                "prior model fitted"
            );
        }
        Ok(Box::new(model))
    }
}

use std::collections::BTreeMap;

use serde_json::Value;

/// Explicit configuration threaded into both pipelines.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Worker count for every per-request fan-out.
    pub cpus_per_worker: usize,
    /// Pixels processed per segment request when the request does not say (`n`).
    pub default_pixel_limit: usize,
    /// Acquisition range used when fetching auxiliary covariates.
    pub aux_acquired: String,
    pub training: TrainingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cpus_per_worker: 4,
            default_pixel_limit: 10_000,
            aux_acquired: "1982/2018".to_string(),
            training: TrainingConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainingConfig {
    /// Fraction of rows held out for evaluation, in `(0, 1)`.
    pub test_size: f64,
    pub num_round: u32,
    pub early_stopping_rounds: u32,
    pub verbose_eval: bool,
    /// Booster parameters handed verbatim to the trainer.
    pub parameters: BTreeMap<String, Value>,
    /// Class-balanced sample size; `None` keeps every row.
    pub sample_size: Option<usize>,
    /// Seed for shuffling, sampling and splitting; `None` draws from entropy.
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert("objective".to_string(), Value::from("multi:softprob"));
        parameters.insert("tree_method".to_string(), Value::from("hist"));
        parameters.insert("eval_metric".to_string(), Value::from("mlogloss"));
        parameters.insert("max_depth".to_string(), Value::from(8));
        Self {
            test_size: 0.2,
            num_round: 500,
            early_stopping_rounds: 10,
            verbose_eval: false,
            parameters,
            sample_size: None,
            seed: None,
        }
    }
}

impl TrainingConfig {
    pub fn params(&self) -> TrainingParams {
        TrainingParams {
            parameters: self.parameters.clone(),
            num_round: self.num_round,
            early_stopping_rounds: self.early_stopping_rounds,
            verbose_eval: self.verbose_eval,
        }
    }
}

/// What a `Trainer` receives besides the data.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingParams {
    pub parameters: BTreeMap<String, Value>,
    pub num_round: u32,
    pub early_stopping_rounds: u32,
    pub verbose_eval: bool,
}

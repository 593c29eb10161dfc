#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};

use chipflow_core::band::Band;
use chipflow_core::features::{LabeledMatrix, AUX_FIELDS, COEFFICIENT_COUNT};
use chipflow_core::types::{ChipKey, Detection, RawBandFit, RawChangeModel, TimeSeriesRecord};
use chipflow_runtime::collab::{Detector, ModelArtifact, Profile, TimeSeriesSource, Trainer};
use chipflow_runtime::config::TrainingParams;
use chipflow_store::{MemoryStore, Row, Statement, Storage, StoreError, Table};

pub const DAY0: i64 = 730_000;

pub fn series(chip: ChipKey, px: i64, py: i64) -> TimeSeriesRecord {
    let dates = vec![DAY0, DAY0 + 16, DAY0 + 32];
    let bands = Band::ALL
        .iter()
        .map(|b| (b.name().to_string(), vec![100.0, 110.0, 120.0]))
        .collect();
    TimeSeriesRecord {
        cx: chip.cx,
        cy: chip.cy,
        px,
        py,
        dates,
        bands,
    }
}

pub fn aux_series(chip: ChipKey, px: i64, py: i64, label: f64) -> TimeSeriesRecord {
    let mut bands = BTreeMap::new();
    for (i, field) in AUX_FIELDS.iter().enumerate() {
        let value = if i == 0 { label } else { i as f64 };
        bands.insert(field.to_string(), vec![value]);
    }
    TimeSeriesRecord {
        cx: chip.cx,
        cy: chip.cy,
        px,
        py,
        dates: vec![DAY0],
        bands,
    }
}

/// Serves canned series per `(chip, profile)` and counts fetches.
#[derive(Default)]
pub struct FakeSource {
    data: Mutex<Vec<(ChipKey, Profile, Vec<TimeSeriesRecord>)>>,
    failing: Mutex<Option<Profile>>,
    pub fetches: AtomicUsize,
}

impl FakeSource {
    pub fn with(self, chip: ChipKey, profile: Profile, records: Vec<TimeSeriesRecord>) -> Self {
        self.data.lock().unwrap().push((chip, profile, records));
        self
    }

    pub fn fail_on(self, profile: Profile) -> Self {
        *self.failing.lock().unwrap() = Some(profile);
        self
    }
}

impl TimeSeriesSource for FakeSource {
    fn fetch(
        &self,
        chip: ChipKey,
        _acquired: &str,
        profile: Profile,
    ) -> Result<Vec<TimeSeriesRecord>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if *self.failing.lock().unwrap() == Some(profile) {
            bail!("retrieval service unavailable");
        }
        Ok(self
            .data
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, p, _)| *c == chip && *p == profile)
            .flat_map(|(_, _, r)| r.clone())
            .collect())
    }
}

/// Reports `models` back-to-back segments for every pixel.
pub struct ScriptedDetector {
    pub models: usize,
    pub fail_pixel: Option<(i64, i64)>,
    pub calls: AtomicUsize,
}

impl ScriptedDetector {
    pub fn new(models: usize) -> Self {
        Self {
            models,
            fail_pixel: None,
            calls: AtomicUsize::new(0),
        }
    }
}

/// Start/end ordinals of the `i`-th scripted segment.
pub fn segment_days(i: usize) -> (i64, i64) {
    let start = DAY0 + (i as i64) * 1000;
    (start, start + 999)
}

impl Detector for ScriptedDetector {
    fn detect(&self, series: &TimeSeriesRecord) -> Result<Detection> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_pixel == Some((series.px, series.py)) {
            return Err(anyhow!("model fit diverged"));
        }
        let change_models = (0..self.models)
            .map(|i| {
                let (start, end) = segment_days(i);
                RawChangeModel {
                    start_day: Some(start),
                    end_day: Some(end),
                    break_day: Some(end),
                    change_probability: Some(if i + 1 == self.models { 0.0 } else { 1.0 }),
                    curve_qa: Some(8),
                    bands: Band::ALL
                        .iter()
                        .map(|b| {
                            (
                                *b,
                                RawBandFit {
                                    magnitude: Some(1.0),
                                    rmse: Some(2.0),
                                    intercept: Some(3.0),
                                    coefficients: Some(vec![0.5; COEFFICIENT_COUNT]),
                                },
                            )
                        })
                        .collect(),
                }
            })
            .collect();
        Ok(Detection {
            change_models,
            processing_mask: vec![true; series.dates.len()],
        })
    }
}

/// `MemoryStore` that records every statement and can be told to fail some of them.
pub struct FlakyStore {
    pub inner: MemoryStore,
    fail: Mutex<Option<Box<dyn Fn(&Statement) -> bool + Send + Sync>>>,
    pub log: Mutex<Vec<Statement>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail: Mutex::new(None),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_when(&self, pred: impl Fn(&Statement) -> bool + Send + Sync + 'static) {
        *self.fail.lock().unwrap() = Some(Box::new(pred));
    }

    pub fn heal(&self) {
        *self.fail.lock().unwrap() = None;
    }

    pub fn writes_to(&self, table: Table) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|s| !s.is_read() && s.table() == table)
            .count()
    }

    fn check(&self, statement: &Statement) -> Result<(), StoreError> {
        self.log.lock().unwrap().push(statement.clone());
        match &*self.fail.lock().unwrap() {
            Some(pred) if pred(statement) => Err(StoreError::Backend(format!(
                "injected failure on {} table",
                statement.table().name()
            ))),
            _ => Ok(()),
        }
    }
}

impl Storage for FlakyStore {
    fn execute(&self, statement: &Statement) -> Result<Vec<Row>, StoreError> {
        self.check(statement)?;
        self.inner.execute(statement)
    }

    fn execute_batch(&self, statements: &[Statement]) -> Result<(), StoreError> {
        for s in statements {
            self.check(s)?;
        }
        self.inner.execute_batch(statements)
    }
}

pub struct BytesModel(pub Vec<u8>);

impl ModelArtifact for BytesModel {
    fn serialize(&self) -> Result<Vec<u8>> {
        Ok(self.0.clone())
    }
}

/// Records the shape of every fit; optionally fails.
#[derive(Default)]
pub struct RecordingTrainer {
    pub fail: bool,
    pub fits: Mutex<Vec<(usize, usize, usize)>>,
    pub last_params: Mutex<Option<TrainingParams>>,
}

impl Trainer for RecordingTrainer {
    fn fit(
        &self,
        train: &LabeledMatrix,
        test: &LabeledMatrix,
        params: &TrainingParams,
    ) -> Result<Box<dyn ModelArtifact>> {
        self.fits
            .lock()
            .unwrap()
            .push((train.rows(), test.rows(), train.width));
        *self.last_params.lock().unwrap() = Some(params.clone());
        if self.fail {
            bail!("booster failed to converge");
        }
        Ok(Box::new(BytesModel(
            format!("model:{}:{}", train.rows(), test.rows()).into_bytes(),
        )))
    }
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}

/// In-memory sink for a test-scoped `tracing` subscriber.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

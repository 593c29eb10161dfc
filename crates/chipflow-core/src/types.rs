use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::band::{Band, BandSet};

/// A chip: the unit of detection and storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChipKey {
    pub cx: i64,
    pub cy: i64,
}

impl ChipKey {
    pub const fn new(cx: i64, cy: i64) -> Self {
        Self { cx, cy }
    }
}

impl fmt::Display for ChipKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.cx, self.cy)
    }
}

/// A tile: a group of chips sharing one trained model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileKey {
    pub tx: i64,
    pub ty: i64,
}

impl TileKey {
    pub const fn new(tx: i64, ty: i64) -> Self {
        Self { tx, ty }
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.tx, self.ty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PixelKey {
    pub cx: i64,
    pub cy: i64,
    pub px: i64,
    pub py: i64,
}

impl PixelKey {
    pub fn chip(&self) -> ChipKey {
        ChipKey::new(self.cx, self.cy)
    }
}

/// Observation history of one pixel, as returned by the retrieval service.
///
/// `dates` are day ordinals (1 == 0001-01-01); every band array is aligned with `dates`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesRecord {
    pub cx: i64,
    pub cy: i64,
    pub px: i64,
    pub py: i64,
    pub dates: Vec<i64>,
    #[serde(default)]
    pub bands: BTreeMap<String, Vec<f64>>,
}

impl TimeSeriesRecord {
    pub fn pixel(&self) -> PixelKey {
        PixelKey {
            cx: self.cx,
            cy: self.cy,
            px: self.px,
            py: self.py,
        }
    }

    pub fn band(&self, name: &str) -> Option<&[f64]> {
        self.bands.get(name).map(Vec::as_slice)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawBandFit {
    pub magnitude: Option<f64>,
    pub rmse: Option<f64>,
    pub intercept: Option<f64>,
    pub coefficients: Option<Vec<f64>>,
}

/// One change model as reported by the detector. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawChangeModel {
    pub start_day: Option<i64>,
    pub end_day: Option<i64>,
    pub break_day: Option<i64>,
    pub change_probability: Option<f64>,
    pub curve_qa: Option<i64>,
    pub bands: BTreeMap<Band, RawBandFit>,
}

/// Detector output for one pixel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Detection {
    pub change_models: Vec<RawChangeModel>,
    pub processing_mask: Vec<bool>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("day ordinal {0} is outside the supported calendar range")]
    InvalidDayOrdinal(i64),
}

/// Converts a day ordinal (1 == 0001-01-01) to a calendar date.
pub fn date_from_ordinal(ordinal: i64) -> Result<NaiveDate, RecordError> {
    i32::try_from(ordinal)
        .ok()
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .ok_or(RecordError::InvalidDayOrdinal(ordinal))
}

/// Ordinal used for day fields the detector leaves unset.
pub const DEFAULT_DAY_ORDINAL: i64 = 1;

/// One detected segment for one pixel, ready for storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeModelRecord {
    pub cx: i64,
    pub cy: i64,
    pub px: i64,
    pub py: i64,
    pub sday: NaiveDate,
    pub eday: NaiveDate,
    pub bday: NaiveDate,
    pub chprob: f64,
    pub curqa: i64,
    pub bands: BandSet,
    pub dates: Vec<NaiveDate>,
    pub mask: Vec<bool>,
}

impl ChangeModelRecord {
    /// Expands a detection into one record per change model.
    ///
    /// A detection without change models still yields a single record carrying defaults, so
    /// every processed pixel is visible in storage.
    pub fn expand(series: &TimeSeriesRecord, detection: Detection) -> Result<Vec<Self>, RecordError> {
        let dates = series
            .dates
            .iter()
            .map(|o| date_from_ordinal(*o))
            .collect::<Result<Vec<_>, _>>()?;

        let Detection {
            change_models,
            processing_mask,
        } = detection;
        let models = if change_models.is_empty() {
            vec![RawChangeModel::default()]
        } else {
            change_models
        };

        models
            .iter()
            .map(|cm| {
                let mut bands = BandSet::default();
                for (band, raw) in &cm.bands {
                    let fit = bands.get_mut(*band);
                    fit.magnitude = raw.magnitude.unwrap_or(0.0);
                    fit.rmse = raw.rmse.unwrap_or(0.0);
                    fit.intercept = raw.intercept.unwrap_or(0.0);
                    fit.coefficients = raw.coefficients.clone().unwrap_or_default();
                }
                Ok(Self {
                    cx: series.cx,
                    cy: series.cy,
                    px: series.px,
                    py: series.py,
                    sday: date_from_ordinal(cm.start_day.unwrap_or(DEFAULT_DAY_ORDINAL))?,
                    eday: date_from_ordinal(cm.end_day.unwrap_or(DEFAULT_DAY_ORDINAL))?,
                    bday: date_from_ordinal(cm.break_day.unwrap_or(DEFAULT_DAY_ORDINAL))?,
                    chprob: cm.change_probability.unwrap_or(0.0),
                    curqa: cm.curve_qa.unwrap_or(0),
                    bands,
                    dates: dates.clone(),
                    mask: processing_mask.clone(),
                })
            })
            .collect()
    }

    pub fn pixel(&self) -> PixelKey {
        PixelKey {
            cx: self.cx,
            cy: self.cy,
            px: self.px,
            py: self.py,
        }
    }

    pub fn chip_row(&self) -> ChipRow {
        ChipRow {
            cx: self.cx,
            cy: self.cy,
            dates: self.dates.clone(),
        }
    }

    pub fn pixel_row(&self) -> PixelRow {
        PixelRow {
            cx: self.cx,
            cy: self.cy,
            px: self.px,
            py: self.py,
            mask: self.mask.clone(),
        }
    }

    pub fn segment_row(&self) -> SegmentRow {
        SegmentRow {
            cx: self.cx,
            cy: self.cy,
            px: self.px,
            py: self.py,
            sday: self.sday,
            eday: self.eday,
            bday: self.bday,
            chprob: self.chprob,
            curqa: self.curqa,
            bands: self.bands.clone(),
        }
    }
}

/// Chip table row, keyed by `(cx, cy)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChipRow {
    pub cx: i64,
    pub cy: i64,
    pub dates: Vec<NaiveDate>,
}

impl ChipRow {
    pub fn key(&self) -> ChipKey {
        ChipKey::new(self.cx, self.cy)
    }
}

/// Pixel table row, keyed by `(cx, cy, px, py)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelRow {
    pub cx: i64,
    pub cy: i64,
    pub px: i64,
    pub py: i64,
    pub mask: Vec<bool>,
}

impl PixelRow {
    pub fn key(&self) -> PixelKey {
        PixelKey {
            cx: self.cx,
            cy: self.cy,
            px: self.px,
            py: self.py,
        }
    }
}

/// Segment table row, keyed by `(cx, cy, px, py, sday)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRow {
    pub cx: i64,
    pub cy: i64,
    pub px: i64,
    pub py: i64,
    pub sday: NaiveDate,
    pub eday: NaiveDate,
    pub bday: NaiveDate,
    pub chprob: f64,
    pub curqa: i64,
    pub bands: BandSet,
}

impl SegmentRow {
    pub fn key(&self) -> (PixelKey, NaiveDate) {
        (
            PixelKey {
                cx: self.cx,
                cy: self.cy,
                px: self.px,
                py: self.py,
            },
            self.sday,
        )
    }

    pub fn pixel(&self) -> PixelKey {
        self.key().0
    }

    /// True when `date` falls inside `[sday, eday]`.
    pub fn spans(&self, date: NaiveDate) -> bool {
        self.sday <= date && date <= self.eday
    }
}

/// Serialized model for one tile, keyed by `(tx, ty)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileModelRow {
    pub tx: i64,
    pub ty: i64,
    pub model: Vec<u8>,
}

impl TileModelRow {
    pub fn key(&self) -> TileKey {
        TileKey::new(self.tx, self.ty)
    }
}

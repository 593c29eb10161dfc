//! Training feature vectors.
//!
//! Row layout (the model depends on it, so training and inference must agree):
//!
//! ```text
//! [nlcdtrn, aspect, posidex, slope, mpw, dem,
//!  for band in FEATURE_BANDS: coef_0 .. coef_6, intercept, magnitude, rmse]
//! ```
//!
//! Element 0 is the label (dependent variable); the rest are independent variables.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::band::Band;
use crate::types::{SegmentRow, TimeSeriesRecord};

/// Harmonic coefficients per band in a segment fit.
pub const COEFFICIENT_COUNT: usize = 7;

/// Band order inside a feature vector. Note nir precedes red.
pub const FEATURE_BANDS: [Band; 7] = [
    Band::Blue,
    Band::Green,
    Band::Nir,
    Band::Red,
    Band::Swir1,
    Band::Swir2,
    Band::Thermal,
];

/// Auxiliary fields in vector order; the first one is the label.
pub const AUX_FIELDS: [&str; 6] = ["nlcdtrn", "aspect", "posidex", "slope", "mpw", "dem"];

pub const FEATURE_WIDTH: usize = AUX_FIELDS.len() + FEATURE_BANDS.len() * (COEFFICIENT_COUNT + 3);

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FeatureError {
    #[error("aux record for pixel {px},{py} is missing field '{field}'")]
    MissingAuxField { field: &'static str, px: i64, py: i64 },
    #[error("segment at pixel {px},{py} has {found} {band:?} coefficients, expected {expected}")]
    CoefficientCount {
        band: Band,
        expected: usize,
        found: usize,
        px: i64,
        py: i64,
    },
    #[error("row width {found} does not match dataset width {expected}")]
    WidthMismatch { expected: usize, found: usize },
}

/// Per-pixel covariates from the auxiliary profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AuxRecord {
    pub nlcdtrn: f64,
    pub aspect: f64,
    pub posidex: f64,
    pub slope: f64,
    pub mpw: f64,
    pub dem: f64,
}

impl AuxRecord {
    /// Reads the first value of each auxiliary band.
    pub fn from_series(series: &TimeSeriesRecord) -> Result<Self, FeatureError> {
        let field = |name: &'static str| {
            series
                .band(name)
                .and_then(|v| v.first().copied())
                .ok_or(FeatureError::MissingAuxField {
                    field: name,
                    px: series.px,
                    py: series.py,
                })
        };
        Ok(Self {
            nlcdtrn: field("nlcdtrn")?,
            aspect: field("aspect")?,
            posidex: field("posidex")?,
            slope: field("slope")?,
            mpw: field("mpw")?,
            dem: field("dem")?,
        })
    }

    fn values(&self) -> [f64; 6] {
        [
            self.nlcdtrn,
            self.aspect,
            self.posidex,
            self.slope,
            self.mpw,
            self.dem,
        ]
    }
}

/// Joins one segment with its pixel's aux record into a `FEATURE_WIDTH` row.
pub fn feature_vector(aux: &AuxRecord, segment: &SegmentRow) -> Result<Vec<f64>, FeatureError> {
    let mut row = Vec::with_capacity(FEATURE_WIDTH);
    row.extend_from_slice(&aux.values());
    for band in FEATURE_BANDS {
        let fit = segment.bands.get(band);
        if fit.coefficients.len() != COEFFICIENT_COUNT {
            return Err(FeatureError::CoefficientCount {
                band,
                expected: COEFFICIENT_COUNT,
                found: fit.coefficients.len(),
                px: segment.px,
                py: segment.py,
            });
        }
        row.extend_from_slice(&fit.coefficients);
        row.push(fit.intercept);
        row.push(fit.magnitude);
        row.push(fit.rmse);
    }
    debug_assert_eq!(row.len(), FEATURE_WIDTH);
    Ok(row)
}

/// The label of a row.
pub fn dependent(row: &[f64]) -> f64 {
    row.first().copied().unwrap_or(f64::NAN)
}

/// Everything but the label.
pub fn independent(row: &[f64]) -> &[f64] {
    row.get(1..).unwrap_or(&[])
}

/// Fixed-width, row-major table of feature vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    width: usize,
    values: Vec<f64>,
}

impl Dataset {
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(1),
            values: Vec::new(),
        }
    }

    pub fn from_rows(width: usize, rows: impl IntoIterator<Item = Vec<f64>>) -> Result<Self, FeatureError> {
        let mut out = Self::new(width);
        for row in rows {
            out.push_row(&row)?;
        }
        Ok(out)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn len(&self) -> usize {
        self.values.len() / self.width
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn push_row(&mut self, row: &[f64]) -> Result<(), FeatureError> {
        if row.len() != self.width {
            return Err(FeatureError::WidthMismatch {
                expected: self.width,
                found: row.len(),
            });
        }
        self.values.extend_from_slice(row);
        Ok(())
    }

    /// Appends every row of `other`.
    pub fn append(&mut self, other: &Dataset) -> Result<(), FeatureError> {
        if other.is_empty() {
            return Ok(());
        }
        if other.width != self.width {
            return Err(FeatureError::WidthMismatch {
                expected: self.width,
                found: other.width,
            });
        }
        self.values.extend_from_slice(&other.values);
        Ok(())
    }

    pub fn row(&self, index: usize) -> Option<&[f64]> {
        let start = index.checked_mul(self.width)?;
        self.values.get(start..start + self.width)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.values.chunks_exact(self.width)
    }

    pub fn labels(&self) -> impl Iterator<Item = f64> + '_ {
        self.rows().map(dependent)
    }

    /// New dataset made of the rows at `indices`, in that order. Out-of-range indices are skipped.
    pub fn select(&self, indices: &[usize]) -> Dataset {
        let mut out = Dataset::new(self.width);
        out.values.reserve(indices.len() * self.width);
        for &i in indices {
            if let Some(row) = self.row(i) {
                out.values.extend_from_slice(row);
            }
        }
        out
    }

    /// Splits into `(independent, dependent)` for the rows at `indices`.
    pub fn labeled(&self, indices: &[usize]) -> LabeledMatrix {
        let features_width = self.width - 1;
        let mut features = Vec::with_capacity(indices.len() * features_width);
        let mut labels = Vec::with_capacity(indices.len());
        for &i in indices {
            if let Some(row) = self.row(i) {
                labels.push(dependent(row));
                features.extend_from_slice(independent(row));
            }
        }
        LabeledMatrix {
            width: features_width,
            features,
            labels,
        }
    }
}

/// Independent variables (row-major) with their labels, as handed to a trainer.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledMatrix {
    pub width: usize,
    pub features: Vec<f64>,
    pub labels: Vec<f64>,
}

impl LabeledMatrix {
    pub fn rows(&self) -> usize {
        self.labels.len()
    }
}

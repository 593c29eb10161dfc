//! Label statistics, row shuffling and class-balanced sampling over a `Dataset`.

use std::collections::BTreeMap;

use chipflow_core::features::Dataset;
use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SampleError {
    #[error("label {0} is not an integral class value")]
    NonIntegralLabel(f64),
    #[error("sample size {requested} is smaller than the number of labels ({labels})")]
    TooSmall { requested: usize, labels: usize },
}

pub fn label_key(label: f64) -> Result<i64, SampleError> {
    if !label.is_finite() || label.fract() != 0.0 {
        return Err(SampleError::NonIntegralLabel(label));
    }
    Ok(label as i64)
}

/// Row count per label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelCounts(BTreeMap<i64, usize>);

impl LabelCounts {
    pub fn from_dataset(data: &Dataset) -> Result<Self, SampleError> {
        let mut counts = BTreeMap::new();
        for label in data.labels() {
            *counts.entry(label_key(label)?).or_insert(0) += 1;
        }
        Ok(Self(counts))
    }

    pub fn get(&self, label: i64) -> usize {
        self.0.get(&label).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, usize)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }
}

/// Random permutation of whole rows.
pub fn shuffle<R: Rng + ?Sized>(data: &Dataset, rng: &mut R) -> Dataset {
    let mut order: Vec<usize> = (0..data.len()).collect();
    order.shuffle(rng);
    data.select(&order)
}

/// Rows to draw per label for a sample of roughly `target` rows.
///
/// Each label gets its proportional share, at least one row and never more than it has. When
/// rounding up to one pushes the sum past `target`, the largest quotas give rows back.
pub fn quotas(counts: &LabelCounts, target: usize) -> Result<BTreeMap<i64, usize>, SampleError> {
    if target < counts.len() {
        return Err(SampleError::TooSmall {
            requested: target,
            labels: counts.len(),
        });
    }
    let total = counts.total().max(1);
    let mut out: BTreeMap<i64, usize> = counts
        .iter()
        .map(|(label, count)| {
            let share = (target as u128 * count as u128 / total as u128) as usize;
            (label, share.max(1).min(count))
        })
        .collect();

    let mut sum: usize = out.values().sum();
    while sum > target {
        let Some((_, largest)) = out
            .iter_mut()
            .filter(|(_, q)| **q > 1)
            .max_by_key(|(_, q)| **q)
        else {
            break;
        };
        *largest -= 1;
        sum -= 1;
    }
    Ok(out)
}

/// Class-balanced sample of `data`. Kept rows stay in their original relative order.
pub fn balanced<R: Rng + ?Sized>(
    data: &Dataset,
    counts: &LabelCounts,
    target: usize,
    rng: &mut R,
) -> Result<Dataset, SampleError> {
    let quotas = quotas(counts, target)?;

    let mut by_label: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (i, label) in data.labels().enumerate() {
        by_label.entry(label_key(label)?).or_default().push(i);
    }

    let mut keep = Vec::with_capacity(target.min(data.len()));
    for (label, mut rows) in by_label {
        let take = quotas.get(&label).copied().unwrap_or(0);
        rows.shuffle(rng);
        keep.extend(rows.into_iter().take(take));
    }
    keep.sort_unstable();
    Ok(data.select(&keep))
}

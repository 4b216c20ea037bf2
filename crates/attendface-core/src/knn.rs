//! Brute-force k-nearest-neighbor vote over raw pixel vectors.

use ndarray::ArrayView2;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use thiserror::Error;

/// Neighbors consulted per vote.
pub const DEFAULT_NEIGHBORS: usize = 5;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifierError {
    #[error("training set is empty")]
    EmptyTrainingSet,
    #[error("probe has {probe} values but training rows have {expected}")]
    DimensionMismatch { probe: usize, expected: usize },
    #[error("{rows} training rows but {labels} labels")]
    LabelCountMismatch { rows: usize, labels: usize },
}

/// Outcome of one vote.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: usize,
    /// Neighbors that voted for `label`.
    pub votes: usize,
    /// Neighbors consulted: `min(k, rows)`.
    pub neighbors: usize,
    /// Distance to the closest neighbor carrying `label`.
    pub distance: f64,
}

/// Sum of squared differences, computed exactly in integer arithmetic.
fn squared_distance<'a>(
    a: impl IntoIterator<Item = &'a u8>,
    b: impl IntoIterator<Item = &'a u8>,
) -> u64 {
    a.into_iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = u64::from(x.abs_diff(y));
            d * d
        })
        .sum()
}

/// Euclidean distance between two vectors of the same length.
pub fn distance(a: &[u8], b: &[u8]) -> Result<f64, ClassifierError> {
    if a.len() != b.len() {
        return Err(ClassifierError::DimensionMismatch {
            probe: a.len(),
            expected: b.len(),
        });
    }
    Ok((squared_distance(a, b) as f64).sqrt())
}

/// k-nearest-neighbor classifier with a deterministic tie-break.
///
/// The winning label has the most votes among the `k` nearest rows. Ties
/// on votes go to the label whose voting neighbors have the smallest
/// summed distance, then to the smallest label.
#[derive(Debug, Clone, Copy)]
pub struct KnnClassifier {
    k: usize,
}

impl Default for KnnClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_NEIGHBORS)
    }
}

#[derive(Default)]
struct Tally {
    votes: usize,
    total: f64,
    nearest: f64,
}

impl KnnClassifier {
    /// `k` is raised to 1 if zero.
    pub fn new(k: usize) -> Self {
        Self { k: k.max(1) }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Classify `probe` against `samples` (one row per vector) with the
    /// parallel `labels` column.
    pub fn classify(
        &self,
        samples: ArrayView2<u8>,
        labels: &[usize],
        probe: &[u8],
    ) -> Result<Prediction, ClassifierError> {
        let (rows, cols) = samples.dim();
        if rows == 0 {
            return Err(ClassifierError::EmptyTrainingSet);
        }
        if labels.len() != rows {
            return Err(ClassifierError::LabelCountMismatch {
                rows,
                labels: labels.len(),
            });
        }
        if probe.len() != cols {
            return Err(ClassifierError::DimensionMismatch {
                probe: probe.len(),
                expected: cols,
            });
        }

        let mut scored: Vec<(u64, usize)> = samples
            .rows()
            .into_iter()
            .zip(labels)
            .map(|(row, &label)| (squared_distance(row.iter(), probe), label))
            .collect();

        let k = self.k.min(rows);
        // Stable sort: equal distances keep training-row order.
        scored.sort_by_key(|&(d, _)| d);

        let mut tallies: BTreeMap<usize, Tally> = BTreeMap::new();
        for &(squared, label) in &scored[..k] {
            let d = (squared as f64).sqrt();
            let tally = tallies.entry(label).or_insert_with(|| Tally {
                nearest: f64::INFINITY,
                ..Tally::default()
            });
            tally.votes += 1;
            tally.total += d;
            tally.nearest = tally.nearest.min(d);
        }

        // BTreeMap iterates labels ascending, so `min_by` keeps the smaller
        // label on a full tie.
        let (label, tally) = tallies
            .into_iter()
            .min_by(|(_, a), (_, b)| {
                b.votes
                    .cmp(&a.votes)
                    .then_with(|| a.total.partial_cmp(&b.total).unwrap_or(Ordering::Equal))
            })
            .ok_or(ClassifierError::EmptyTrainingSet)?;

        Ok(Prediction {
            label,
            votes: tally.votes,
            neighbors: k,
            distance: tally.nearest,
        })
    }
}

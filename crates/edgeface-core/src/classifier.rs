//! k-nearest-neighbor face classifier over raw pixel vectors.
//!
//! The model answers with its best guess among the enrolled labels and never
//! with "unknown"; rejecting far-away faces is the caller's policy.

use crate::dataset::Dataset;
use crate::types::{euclidean_distance, Prediction};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Added to every distance before inverting it, so exact matches stay finite.
pub const DISTANCE_EPSILON: f64 = 1e-6;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("no enrolled samples: run `collect` for at least one person first")]
    EmptyDataset,
    #[error("invalid classifier configuration: {0}")]
    InvalidConfiguration(String),
    #[error("query has {actual} values, reference vectors have {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl ClassifierError {
    /// True for errors caused by hyperparameters or the reference set,
    /// as opposed to a bad query.
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::EmptyDataset | Self::InvalidConfiguration(_))
    }
}

/// How neighbors contribute to the vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weighting {
    /// One vote per neighbor.
    Uniform,
    /// `1 / (distance + ε)` per neighbor.
    #[default]
    Distance,
}

/// Strategy for labeling a single feature vector.
pub trait Classifier {
    fn predict(&self, vector: &[u8]) -> Result<Prediction, ClassifierError>;
}

/// Untrained k-NN hyperparameters.
#[derive(Debug, Clone, Copy)]
pub struct KnnClassifier {
    k: usize,
    weighting: Weighting,
}

impl KnnClassifier {
    pub fn new(k: usize, weighting: Weighting) -> Result<Self, ClassifierError> {
        if k == 0 {
            return Err(ClassifierError::InvalidConfiguration(
                "k must be at least 1".into(),
            ));
        }
        Ok(Self { k, weighting })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn weighting(&self) -> Weighting {
        self.weighting
    }

    /// Fit on a loaded dataset.
    pub fn train(&self, dataset: Dataset) -> Result<KnnModel, ClassifierError> {
        self.train_arrays(dataset.vectors, dataset.labels)
    }

    /// Fit on a raw reference set. Vectors are kept verbatim.
    pub fn train_arrays(
        &self,
        vectors: Array2<u8>,
        labels: Vec<String>,
    ) -> Result<KnnModel, ClassifierError> {
        if vectors.nrows() == 0 || labels.is_empty() {
            return Err(ClassifierError::EmptyDataset);
        }
        if vectors.nrows() != labels.len() {
            return Err(ClassifierError::InvalidConfiguration(format!(
                "{} reference vectors but {} labels",
                vectors.nrows(),
                labels.len()
            )));
        }
        if self.k > vectors.nrows() {
            return Err(ClassifierError::InvalidConfiguration(format!(
                "k = {} exceeds the {} enrolled samples",
                self.k,
                vectors.nrows()
            )));
        }

        tracing::info!(
            samples = vectors.nrows(),
            dimension = vectors.ncols(),
            k = self.k,
            weighting = ?self.weighting,
            "k-NN model trained"
        );

        Ok(KnnModel {
            vectors: vectors.as_standard_layout().into_owned(),
            labels,
            k: self.k,
            weighting: self.weighting,
        })
    }
}

/// Reference set plus hyperparameters. Immutable once built.
#[derive(Debug, Clone)]
pub struct KnnModel {
    vectors: Array2<u8>,
    labels: Vec<String>,
    k: usize,
    weighting: Weighting,
}

/// Aggregated vote for one label among the k neighbors.
#[derive(Debug, Default)]
struct Tally {
    score: f64,
    distance_sum: f64,
    nearest: f64,
}

impl KnnModel {
    pub fn dimension(&self) -> usize {
        self.vectors.ncols()
    }

    /// The k nearest reference rows as `(distance, row)`, closest first.
    ///
    /// Equal distances are ordered by row index.
    fn neighbors(&self, vector: &[u8]) -> Vec<(f64, usize)> {
        let mut distances: Vec<(f64, usize)> = self
            .vectors
            .rows()
            .into_iter()
            .enumerate()
            .map(|(i, row)| {
                // Standard layout: every row is contiguous.
                let reference = row.to_slice().unwrap_or_default();
                (euclidean_distance(vector, reference), i)
            })
            .collect();

        distances.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        distances.truncate(self.k);
        distances
    }
}

impl Classifier for KnnModel {
    fn predict(&self, vector: &[u8]) -> Result<Prediction, ClassifierError> {
        if vector.len() != self.dimension() {
            return Err(ClassifierError::DimensionMismatch {
                expected: self.dimension(),
                actual: vector.len(),
            });
        }

        let neighbors = self.neighbors(vector);

        let mut tallies: HashMap<&str, Tally> = HashMap::new();
        let mut total = 0.0;
        for &(distance, row) in &neighbors {
            let vote = match self.weighting {
                Weighting::Uniform => 1.0,
                Weighting::Distance => 1.0 / (distance + DISTANCE_EPSILON),
            };
            total += vote;

            let tally = tallies.entry(self.labels[row].as_str()).or_insert(Tally {
                nearest: f64::INFINITY,
                ..Tally::default()
            });
            tally.score += vote;
            tally.distance_sum += distance;
            tally.nearest = tally.nearest.min(distance);
        }

        // Highest score, then smallest summed distance, then label order.
        let (label, tally) = tallies
            .into_iter()
            .max_by(|(la, a), (lb, b)| {
                a.score
                    .total_cmp(&b.score)
                    .then_with(|| b.distance_sum.total_cmp(&a.distance_sum))
                    .then_with(|| lb.cmp(la))
            })
            .ok_or(ClassifierError::EmptyDataset)?;

        let confidence = if total > 0.0 { tally.score / total } else { 0.0 };

        tracing::trace!(label, confidence, nearest = tally.nearest, "k-NN prediction");

        Ok(Prediction {
            label: label.to_string(),
            confidence: confidence.min(1.0),
            nearest_distance: tally.nearest,
        })
    }
}

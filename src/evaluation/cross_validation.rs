//! Cross-validation splitters

use crate::error::{DecoderError, Result};
use ndarray::Array1;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default seed for every shuffling splitter.
pub const DEFAULT_RANDOM_STATE: u64 = 42;

/// Cross-validation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CVStrategy {
    /// K-Fold over epochs
    KFold { n_splits: usize, shuffle: bool },
    /// Group K-Fold (a subject never straddles train and test)
    GroupKFold { n_splits: usize },
    /// Leave one subject out, then an unshuffled K-Fold inside that subject
    IntraSubject { n_splits: usize },
}

impl Default for CVStrategy {
    fn default() -> Self {
        CVStrategy::GroupKFold { n_splits: 5 }
    }
}

impl CVStrategy {
    pub fn n_splits(&self) -> usize {
        match self {
            CVStrategy::KFold { n_splits, .. }
            | CVStrategy::GroupKFold { n_splits }
            | CVStrategy::IntraSubject { n_splits } => *n_splits,
        }
    }

    pub fn requires_groups(&self) -> bool {
        !matches!(self, CVStrategy::KFold { .. })
    }
}

/// A single train/test split
#[derive(Debug, Clone)]
pub struct CVSplit {
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
    pub fold_idx: usize,
    /// Subject the fold was drawn from, for intra-subject splits
    pub subject: Option<usize>,
}

/// Cross-validation splitter
#[derive(Debug, Clone)]
pub struct CrossValidator {
    strategy: CVStrategy,
    random_state: u64,
}

impl CrossValidator {
    /// Create a new cross-validator
    pub fn new(strategy: CVStrategy) -> Self {
        Self {
            strategy,
            random_state: DEFAULT_RANDOM_STATE,
        }
    }

    /// Set random state for reproducibility
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    pub fn strategy(&self) -> CVStrategy {
        self.strategy
    }

    /// Generate train/test splits.
    ///
    /// Identical inputs always produce identical partitions.
    pub fn split(&self, n_samples: usize, groups: Option<&Array1<usize>>) -> Result<Vec<CVSplit>> {
        match self.strategy {
            CVStrategy::KFold { n_splits, shuffle } => {
                let indices: Vec<usize> = (0..n_samples).collect();
                self.k_fold_split(&indices, n_splits, shuffle)
            }
            CVStrategy::GroupKFold { n_splits } => {
                let groups = self.require_groups(n_samples, groups)?;
                self.group_k_fold_split(groups, n_splits)
            }
            CVStrategy::IntraSubject { n_splits } => {
                let groups = self.require_groups(n_samples, groups)?;
                self.intra_subject_split(groups, n_splits)
            }
        }
    }

    fn require_groups<'a>(
        &self,
        n_samples: usize,
        groups: Option<&'a Array1<usize>>,
    ) -> Result<&'a Array1<usize>> {
        let groups = groups.ok_or_else(|| {
            DecoderError::ValidationError(format!("{:?} requires a groups array", self.strategy))
        })?;
        if groups.len() != n_samples {
            return Err(DecoderError::ShapeError {
                expected: format!("{} group entries", n_samples),
                actual: format!("{} group entries", groups.len()),
            });
        }
        Ok(groups)
    }

    /// K-Fold over an arbitrary index set. Test folds are contiguous chunks of
    /// the (optionally shuffled) index list, the first `n % k` one larger.
    fn k_fold_split(&self, indices: &[usize], n_splits: usize, shuffle: bool) -> Result<Vec<CVSplit>> {
        let n_samples = indices.len();
        if n_splits < 2 {
            return Err(DecoderError::ValidationError(
                "n_splits must be at least 2".to_string(),
            ));
        }
        if n_samples < n_splits {
            return Err(DecoderError::ValidationError(format!(
                "n_samples ({}) must be >= n_splits ({})",
                n_samples, n_splits
            )));
        }

        let mut indices = indices.to_vec();
        if shuffle {
            let mut rng = ChaCha8Rng::seed_from_u64(self.random_state);
            indices.shuffle(&mut rng);
        }

        let base = n_samples / n_splits;
        let remainder = n_samples % n_splits;

        let mut splits = Vec::with_capacity(n_splits);
        let mut current = 0;
        for fold_idx in 0..n_splits {
            let fold_size = if fold_idx < remainder { base + 1 } else { base };
            let test_indices = indices[current..current + fold_size].to_vec();
            let train_indices: Vec<usize> = indices[..current]
                .iter()
                .chain(indices[current + fold_size..].iter())
                .copied()
                .collect();

            splits.push(CVSplit {
                train_indices,
                test_indices,
                fold_idx,
                subject: None,
            });
            current += fold_size;
        }

        Ok(splits)
    }

    /// Groups are placed largest first, each into the fold currently holding
    /// the fewest samples (lowest fold index on ties).
    fn group_k_fold_split(&self, groups: &Array1<usize>, n_splits: usize) -> Result<Vec<CVSplit>> {
        if n_splits < 2 {
            return Err(DecoderError::ValidationError(
                "n_splits must be at least 2".to_string(),
            ));
        }

        let mut sizes: BTreeMap<usize, usize> = BTreeMap::new();
        for &g in groups.iter() {
            *sizes.entry(g).or_insert(0) += 1;
        }
        if sizes.len() < n_splits {
            return Err(DecoderError::ValidationError(format!(
                "Number of groups ({}) must be >= n_splits ({})",
                sizes.len(),
                n_splits
            )));
        }

        let mut ordered: Vec<(usize, usize)> = sizes.into_iter().collect();
        ordered.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let mut fold_load = vec![0usize; n_splits];
        let mut group_to_fold: BTreeMap<usize, usize> = BTreeMap::new();
        for (group, size) in ordered {
            let lightest = (0..n_splits)
                .min_by_key(|&f| (fold_load[f], f))
                .unwrap_or(0);
            fold_load[lightest] += size;
            group_to_fold.insert(group, lightest);
        }

        let splits = (0..n_splits)
            .map(|fold_idx| {
                let (test_indices, train_indices): (Vec<usize>, Vec<usize>) = (0..groups.len())
                    .partition(|&i| group_to_fold.get(&groups[i]) == Some(&fold_idx));
                CVSplit {
                    train_indices,
                    test_indices,
                    fold_idx,
                    subject: None,
                }
            })
            .collect();

        Ok(splits)
    }

    fn intra_subject_split(&self, groups: &Array1<usize>, n_splits: usize) -> Result<Vec<CVSplit>> {
        let mut by_subject: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (i, &g) in groups.iter().enumerate() {
            by_subject.entry(g).or_default().push(i);
        }

        let mut all_splits = Vec::new();
        for (subject, indices) in by_subject {
            let inner = self.k_fold_split(&indices, n_splits, false).map_err(|e| {
                DecoderError::ValidationError(format!("subject {}: {}", subject, e))
            })?;
            for mut split in inner {
                split.fold_idx = all_splits.len();
                split.subject = Some(subject);
                all_splits.push(split);
            }
        }

        Ok(all_splits)
    }
}

/// Cross-validation results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CVResults {
    /// Scores for each fold
    pub scores: Vec<f64>,
    /// Mean score across folds
    pub mean_score: f64,
    /// Standard deviation of scores
    pub std_score: f64,
    /// Number of folds
    pub n_folds: usize,
}

impl CVResults {
    /// Create CV results from fold scores
    pub fn from_scores(scores: Vec<f64>) -> Self {
        let n_folds = scores.len();
        if n_folds == 0 {
            return Self {
                scores,
                mean_score: 0.0,
                std_score: 0.0,
                n_folds,
            };
        }
        let mean_score = scores.iter().sum::<f64>() / n_folds as f64;
        let variance = scores.iter().map(|s| (s - mean_score).powi(2)).sum::<f64>() / n_folds as f64;
        let std_score = variance.sqrt();

        Self {
            scores,
            mean_score,
            std_score,
            n_folds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_k_fold() {
        let cv = CrossValidator::new(CVStrategy::KFold { n_splits: 5, shuffle: false });
        let splits = cv.split(100, None).unwrap();

        assert_eq!(splits.len(), 5);
        for split in &splits {
            assert_eq!(split.test_indices.len(), 20);
            assert_eq!(split.train_indices.len(), 80);
        }

        let mut all_test: Vec<usize> = splits.iter().flat_map(|s| s.test_indices.clone()).collect();
        all_test.sort();
        assert_eq!(all_test, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_k_fold_partitions_every_fold() {
        let cv = CrossValidator::new(CVStrategy::KFold { n_splits: 3, shuffle: true });
        for split in cv.split(17, None).unwrap() {
            let train: HashSet<usize> = split.train_indices.iter().copied().collect();
            let test: HashSet<usize> = split.test_indices.iter().copied().collect();
            assert!(train.is_disjoint(&test));
            assert_eq!(train.len() + test.len(), 17);
        }
    }

    #[test]
    fn test_shuffled_k_fold_is_deterministic() {
        let cv = CrossValidator::new(CVStrategy::KFold { n_splits: 4, shuffle: true });
        let a = cv.split(40, None).unwrap();
        let b = cv.split(40, None).unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.test_indices, y.test_indices);
        }

        let other = CrossValidator::new(CVStrategy::KFold { n_splits: 4, shuffle: true })
            .with_random_state(7)
            .split(40, None)
            .unwrap();
        assert_ne!(a[0].test_indices, other[0].test_indices);
    }

    #[test]
    fn test_group_k_fold_keeps_groups_together() {
        let groups = Array1::from_vec(vec![0, 0, 0, 1, 1, 2, 2, 2, 2, 3, 4, 4]);
        let cv = CrossValidator::new(CVStrategy::GroupKFold { n_splits: 3 });
        let splits = cv.split(groups.len(), Some(&groups)).unwrap();
        assert_eq!(splits.len(), 3);

        for split in &splits {
            let train: HashSet<usize> = split.train_indices.iter().map(|&i| groups[i]).collect();
            let test: HashSet<usize> = split.test_indices.iter().map(|&i| groups[i]).collect();
            assert!(train.is_disjoint(&test));
            assert!(!split.test_indices.is_empty());
        }
    }

    #[test]
    fn test_group_k_fold_needs_enough_groups() {
        let groups = Array1::from_vec(vec![0, 0, 1, 1]);
        let cv = CrossValidator::new(CVStrategy::GroupKFold { n_splits: 3 });
        assert!(cv.split(4, Some(&groups)).is_err());
        assert!(cv.split(4, None).is_err());
    }

    #[test]
    fn test_intra_subject_stays_inside_subject() {
        let groups = Array1::from_vec(vec![0, 0, 0, 0, 1, 1, 1, 1, 1, 1]);
        let cv = CrossValidator::new(CVStrategy::IntraSubject { n_splits: 2 });
        let splits = cv.split(groups.len(), Some(&groups)).unwrap();
        assert_eq!(splits.len(), 4);

        for split in &splits {
            let subject = split.subject.unwrap();
            assert!(split
                .train_indices
                .iter()
                .chain(split.test_indices.iter())
                .all(|&i| groups[i] == subject));
        }
        assert_eq!(splits[0].test_indices, vec![0, 1]);
        assert_eq!(splits[2].test_indices, vec![4, 5, 6]);
    }

    #[test]
    fn test_cv_results() {
        let results = CVResults::from_scores(vec![0.5, 1.0]);
        assert!((results.mean_score - 0.75).abs() < 1e-12);
        assert!((results.std_score - 0.25).abs() < 1e-12);
        assert_eq!(CVResults::from_scores(vec![]).n_folds, 0);
    }
}

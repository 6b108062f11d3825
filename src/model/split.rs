//! Stratified train/validation split.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Sample indices for each side of the split
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

/// Validation size for one class of `count` samples
fn validation_count(count: usize, ratio: f32) -> usize {
    if count < 2 {
        return 0;
    }
    let wanted = (count as f32 * ratio).round() as usize;
    wanted.clamp(1, count - 1)
}

/// Split sample indices so each class keeps roughly `ratio` of its samples
/// in validation.
///
/// Classes with at least two samples always land on both sides; a class
/// with a single sample stays in training. Both index lists are returned
/// sorted.
pub fn stratified_split(labels: &[i64], ratio: f32, rng: &mut StdRng) -> SplitIndices {
    let mut by_class: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (index, &label) in labels.iter().enumerate() {
        by_class.entry(label).or_default().push(index);
    }

    let mut split = SplitIndices::default();
    for (_, mut indices) in by_class {
        indices.shuffle(rng);
        let n_val = validation_count(indices.len(), ratio);
        split.validation.extend_from_slice(&indices[..n_val]);
        split.train.extend_from_slice(&indices[n_val..]);
    }

    split.train.sort_unstable();
    split.validation.sort_unstable();
    split
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn labels(per_class: &[usize]) -> Vec<i64> {
        per_class
            .iter()
            .enumerate()
            .flat_map(|(class, &n)| std::iter::repeat(class as i64).take(n))
            .collect()
    }

    #[test]
    fn test_balanced_two_classes() {
        let labels = labels(&[5, 5]);
        let split = stratified_split(&labels, 0.2, &mut StdRng::seed_from_u64(42));

        assert_eq!(split.validation.len(), 2);
        assert_eq!(split.train.len(), 8);
        for class in 0..2 {
            let in_val = split
                .validation
                .iter()
                .filter(|&&i| labels[i] == class)
                .count();
            assert_eq!(in_val, 1, "class {} validation count", class);
        }
    }

    #[test]
    fn test_split_is_a_partition() {
        let labels = labels(&[12, 7, 30]);
        let split = stratified_split(&labels, 0.2, &mut StdRng::seed_from_u64(1));

        let mut all: Vec<usize> = split.train.iter().chain(&split.validation).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..labels.len()).collect::<Vec<_>>());
    }

    #[test]
    fn test_same_seed_same_split() {
        let labels = labels(&[9, 11, 4]);
        let a = stratified_split(&labels, 0.2, &mut StdRng::seed_from_u64(42));
        let b = stratified_split(&labels, 0.2, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn test_singleton_class_stays_in_training() {
        assert_eq!(validation_count(1, 0.2), 0);
        assert_eq!(validation_count(2, 0.2), 1);
        assert_eq!(validation_count(3, 0.9), 2);
        assert_eq!(validation_count(100, 0.2), 20);
    }
}

//! # Split Lineage and Smoothing
//!
//! Every split records, for each new substate, which substate of the
//! previous generation it descends from. Substates with the same parent are
//! siblings: they are the only candidates for merging, and smoothing pulls
//! their distributions towards each other.

use serde::{Deserialize, Serialize};

/// Split ancestry of one category's substates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    parents: Vec<usize>,
}

impl Lineage {
    /// `count` substates freshly carved out of one unsplit category.
    pub fn uniform(count: usize) -> Self {
        Self {
            parents: vec![0; count],
        }
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn parent(&self, substate: usize) -> usize {
        self.parents[substate]
    }

    /// Lineage after doubling every substate: `2i` and `2i + 1` descend from `i`.
    pub fn split(&self) -> Self {
        Self {
            parents: (0..self.parents.len() * 2).map(|s| s / 2).collect(),
        }
    }

    /// Lineage of a category that was left unsplit while others doubled:
    /// every substate becomes its own only child.
    pub fn unsplit(&self) -> Self {
        Self {
            parents: (0..self.parents.len()).collect(),
        }
    }

    /// Lineage after collapsing substates according to `mapping`
    /// (old substate to new substate). A merged substate keeps the parent of
    /// the lower-numbered substate it absorbed.
    pub fn merge(&self, mapping: &[usize], new_count: usize) -> Self {
        let mut parents = vec![usize::MAX; new_count];
        for (old, &new) in mapping.iter().enumerate() {
            if parents[new] == usize::MAX {
                parents[new] = self.parents[old];
            }
        }
        Self { parents }
    }

    /// Sibling groups in substate order.
    pub fn groups(&self) -> Vec<Vec<usize>> {
        let mut groups: Vec<(usize, Vec<usize>)> = Vec::new();
        for (s, &p) in self.parents.iter().enumerate() {
            match groups.iter_mut().find(|(parent, _)| *parent == p) {
                Some((_, members)) => members.push(s),
                None => groups.push((p, vec![s])),
            }
        }
        groups.into_iter().map(|(_, m)| m).collect()
    }

    /// Disjoint sibling pairs, the candidates for merging.
    pub fn sibling_pairs(&self) -> Vec<(usize, usize)> {
        self.groups()
            .into_iter()
            .flat_map(|g| {
                g.chunks_exact(2)
                    .map(|pair| (pair[0], pair[1]))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

/// Redistribution of probability mass across related substates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum Smoother {
    #[default]
    None,
    /// Mix each substate's value with the mean of its siblings:
    /// `(1 - strength) * own + strength * mean(siblings)`.
    AcrossParentBits { strength: f64 },
}

impl Smoother {
    pub fn across_parent_bits(strength: f64) -> Self {
        Self::AcrossParentBits {
            strength: strength.clamp(0.0, 1.0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Smoother::None)
    }

    /// Smooth one value per substate of a category with the given lineage.
    ///
    /// A convex combination per substate, so a set of per-substate
    /// distributions that each sum to one still does afterwards.
    pub fn smooth(&self, lineage: &Lineage, values: &mut [f64]) {
        let Smoother::AcrossParentBits { strength } = *self else {
            return;
        };
        if lineage.len() != values.len() {
            tracing::debug!(
                lineage = lineage.len(),
                values = values.len(),
                "lineage does not match substates, skipping smoothing"
            );
            return;
        }
        let original = values.to_vec();
        for group in lineage.groups() {
            if group.len() < 2 {
                continue;
            }
            let total: f64 = group.iter().map(|&s| original[s]).sum();
            let others = (group.len() - 1) as f64;
            for &s in &group {
                let mean_others = (total - original[s]) / others;
                values[s] = (1.0 - strength) * original[s] + strength * mean_others;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_doubles_and_records_parents() {
        let lineage = Lineage::uniform(2).split();
        assert_eq!(lineage.len(), 4);
        assert_eq!(lineage.parent(3), 1);
        assert_eq!(lineage.sibling_pairs(), vec![(0, 1), (2, 3)]);
    }

    #[test]
    fn merge_keeps_first_parent() {
        let lineage = Lineage::uniform(2).split();
        // 0 and 1 collapse into 0; 2, 3 become 1, 2
        let merged = lineage.merge(&[0, 0, 1, 2], 3);
        assert_eq!(merged.parent(0), 0);
        assert_eq!(merged.sibling_pairs(), vec![(1, 2)]);
    }

    #[test]
    fn unsplit_categories_have_no_siblings() {
        let lineage = Lineage::uniform(3).unsplit();
        assert!(lineage.sibling_pairs().is_empty());
    }

    #[test]
    fn smoothing_mixes_siblings_only() {
        let lineage = Lineage::uniform(2).split();
        let mut values = vec![1.0, 0.0, 0.5, 0.5];
        Smoother::across_parent_bits(0.5).smooth(&lineage, &mut values);
        assert_eq!(values, vec![0.5, 0.5, 0.5, 0.5]);
    }

    #[test]
    fn smoothing_preserves_totals() {
        let lineage = Lineage::uniform(4);
        let mut values = vec![0.1, 0.2, 0.3, 0.4];
        Smoother::across_parent_bits(0.1).smooth(&lineage, &mut values);
        let total: f64 = values.iter().sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn no_smoother_is_identity() {
        let lineage = Lineage::uniform(2);
        let mut values = vec![0.9, 0.1];
        Smoother::None.smooth(&lineage, &mut values);
        assert_eq!(values, vec![0.9, 0.1]);
    }
}

//! Named first-derivative maps.
//!
//! Each batched value owns an ordered map from parameter name to its
//! derivative with respect to that parameter. Algebra merges two maps by
//! taking the union of their keys and summing the entries present in both.

use crate::batch::Batch;
use crate::error::RotationResult;
use std::collections::BTreeMap;

/// Ordered map of parameter name to derivative.
pub type Derivs = BTreeMap<String, Batch>;

/// Union of two derivative maps, summing entries that share a key.
pub fn merge_derivs(left: Derivs, right: Derivs) -> RotationResult<Derivs> {
    let mut merged = left;
    for (key, term) in right {
        let combined = match merged.remove(&key) {
            Some(existing) => existing.add(&term)?,
            None => term,
        };
        merged.insert(key, combined);
    }
    Ok(merged)
}

/// Apply `f` to every derivative, keeping the keys.
pub fn map_derivs<F>(derivs: &Derivs, mut f: F) -> RotationResult<Derivs>
where
    F: FnMut(&Batch) -> RotationResult<Batch>,
{
    derivs
        .iter()
        .map(|(key, deriv)| Ok((key.clone(), f(deriv)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    fn constant(value: f64) -> Batch {
        Batch::new(
            ArrayD::from_elem(IxDyn(&[2, 1]), value),
            Default::default(),
            0,
            1,
        )
        .unwrap()
    }

    #[test]
    fn test_merge_sums_shared_keys() {
        let mut left = Derivs::new();
        left.insert("t".to_string(), constant(1.0));
        left.insert("u".to_string(), constant(2.0));

        let mut right = Derivs::new();
        right.insert("t".to_string(), constant(3.0));
        right.insert("v".to_string(), constant(5.0));

        let merged = merge_derivs(left, right).unwrap();
        let keys: Vec<_> = merged.keys().cloned().collect();
        assert_eq!(keys, vec!["t", "u", "v"]);
        assert!(merged["t"].values().iter().all(|&v| v == 4.0));
        assert!(merged["u"].values().iter().all(|&v| v == 2.0));
        assert!(merged["v"].values().iter().all(|&v| v == 5.0));
    }

    #[test]
    fn test_map_derivs_keeps_keys() {
        let mut derivs = Derivs::new();
        derivs.insert("t".to_string(), constant(1.5));

        let doubled = map_derivs(&derivs, |d| Ok(d.scale_const(2.0))).unwrap();
        assert!(doubled["t"].values().iter().all(|&v| v == 3.0));
    }
}

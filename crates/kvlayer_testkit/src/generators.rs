//! Property-based test generators using proptest.
//!
//! Keys are drawn from a small alphabet so that generated ranges, seeks and
//! batches actually hit stored entries.

use kvlayer_core::{BatchOperation, RangeOptions};
use proptest::prelude::*;

/// A generated batch operation, kept as plain strings so a model can replay
/// it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelOp {
    /// Put `key` = `value`.
    Put(String, String),
    /// Delete `key`.
    Del(String),
}

impl ModelOp {
    /// Converts to a database batch operation.
    pub fn to_operation(&self) -> BatchOperation {
        match self {
            ModelOp::Put(k, v) => BatchOperation::put(k.as_str(), v.as_str()),
            ModelOp::Del(k) => BatchOperation::del(k.as_str()),
        }
    }
}

/// A generated range: bounds, direction and limit.
#[derive(Debug, Clone, Default)]
pub struct ModelRange {
    /// Lower bound and whether it is inclusive.
    pub lower: Option<(String, bool)>,
    /// Upper bound and whether it is inclusive.
    pub upper: Option<(String, bool)>,
    /// Iterate in descending order.
    pub reverse: bool,
    /// Cap on yielded entries.
    pub limit: Option<usize>,
}

impl ModelRange {
    /// Converts to database range options.
    pub fn to_options(&self) -> RangeOptions {
        let mut range = RangeOptions::new().reverse(self.reverse);
        range = match &self.lower {
            Some((k, true)) => range.gte(k.as_str()),
            Some((k, false)) => range.gt(k.as_str()),
            None => range,
        };
        range = match &self.upper {
            Some((k, true)) => range.lte(k.as_str()),
            Some((k, false)) => range.lt(k.as_str()),
            None => range,
        };
        if let Some(limit) = self.limit {
            range = range.limit(limit);
        }
        range
    }

    /// Returns whether `key` lies within the bounds.
    pub fn contains(&self, key: &str) -> bool {
        let above = match &self.lower {
            Some((k, true)) => key >= k.as_str(),
            Some((k, false)) => key > k.as_str(),
            None => true,
        };
        let below = match &self.upper {
            Some((k, true)) => key <= k.as_str(),
            Some((k, false)) => key < k.as_str(),
            None => true,
        };
        above && below
    }

    /// Applies bounds, direction and limit to sorted `keys`.
    pub fn select<'a>(&self, keys: impl DoubleEndedIterator<Item = &'a String>) -> Vec<String> {
        let inside = keys.filter(|k| self.contains(k)).cloned();
        let ordered: Vec<String> = if self.reverse {
            inside.rev().collect()
        } else {
            inside.collect()
        };
        match self.limit {
            Some(limit) => ordered.into_iter().take(limit).collect(),
            None => ordered,
        }
    }
}

/// Strategy for generating short keys over a small alphabet.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-e]{1,3}").expect("Invalid regex")
}

/// Strategy for generating values.
pub fn value_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9]{0,8}").expect("Invalid regex")
}

/// Strategy for generating a single batch operation.
pub fn op_strategy() -> impl Strategy<Value = ModelOp> {
    prop_oneof![
        3 => (key_strategy(), value_strategy()).prop_map(|(k, v)| ModelOp::Put(k, v)),
        1 => key_strategy().prop_map(ModelOp::Del),
    ]
}

/// Strategy for generating a batch of operations.
pub fn batch_strategy(max_ops: usize) -> impl Strategy<Value = Vec<ModelOp>> {
    prop::collection::vec(op_strategy(), 1..=max_ops)
}

/// Strategy for generating ranges.
pub fn range_strategy() -> impl Strategy<Value = ModelRange> {
    (
        prop::option::of((key_strategy(), any::<bool>())),
        prop::option::of((key_strategy(), any::<bool>())),
        any::<bool>(),
        prop::option::of(0usize..8),
    )
        .prop_map(|(lower, upper, reverse, limit)| ModelRange {
            lower,
            upper,
            reverse,
            limit,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn keys_are_short(key in key_strategy()) {
            prop_assert!(!key.is_empty() && key.len() <= 3);
        }

        #[test]
        fn select_respects_limit(range in range_strategy()) {
            let keys: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
            let selected = range.select(keys.iter());
            if let Some(limit) = range.limit {
                prop_assert!(selected.len() <= limit);
            }
            for key in &selected {
                prop_assert!(range.contains(key));
            }
        }
    }

    #[test]
    fn select_reverses() {
        let keys: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let range = ModelRange {
            lower: Some(("a".into(), false)),
            reverse: true,
            ..ModelRange::default()
        };
        assert_eq!(range.select(keys.iter()), vec!["c", "b"]);
    }
}

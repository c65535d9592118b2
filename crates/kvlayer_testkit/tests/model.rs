//! Random batches and ranges checked against an ordered-map model.

use kvlayer_core::{ClearOptions, IteratorOptions, Value};
use kvlayer_testkit::{batch_strategy, range_strategy, ModelOp, ModelRange, TestDatabase};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn apply(model: &mut BTreeMap<String, String>, ops: &[ModelOp]) {
    for op in ops {
        match op {
            ModelOp::Put(k, v) => {
                model.insert(k.clone(), v.clone());
            }
            ModelOp::Del(k) => {
                model.remove(k);
            }
        }
    }
}

fn texts(values: Vec<Value>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.as_str().unwrap_or_default().to_string())
        .collect()
}

fn iterator_options(range: &ModelRange) -> IteratorOptions {
    let mut options = IteratorOptions::new().reverse(range.reverse);
    options = match &range.lower {
        Some((k, true)) => options.gte(k.as_str()),
        Some((k, false)) => options.gt(k.as_str()),
        None => options,
    };
    options = match &range.upper {
        Some((k, true)) => options.lte(k.as_str()),
        Some((k, false)) => options.lt(k.as_str()),
        None => options,
    };
    match range.limit {
        Some(limit) => options.limit(limit),
        None => options,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn keys_match_model(batches in prop::collection::vec(batch_strategy(8), 1..4), range in range_strategy()) {
        let rt = runtime();
        let (expected, actual) = rt.block_on(async {
            let db = TestDatabase::memory();
            let mut model = BTreeMap::new();
            for ops in &batches {
                db.batch(ops.iter().map(ModelOp::to_operation).collect()).await.unwrap();
                apply(&mut model, ops);
            }
            let keys = db.keys(iterator_options(&range)).unwrap().all().await.unwrap();
            (range.select(model.keys()), texts(keys))
        });
        prop_assert_eq!(expected, actual);
    }

    #[test]
    fn clear_matches_model(ops in batch_strategy(12), range in range_strategy()) {
        let rt = runtime();
        let (expected, actual) = rt.block_on(async {
            let db = TestDatabase::memory();
            let mut model = BTreeMap::new();
            db.batch(ops.iter().map(ModelOp::to_operation).collect()).await.unwrap();
            apply(&mut model, &ops);

            db.clear_with(ClearOptions::new().range(range.to_options())).await.unwrap();
            for key in range.select(model.keys()) {
                model.remove(&key);
            }

            let keys = db.keys(IteratorOptions::new()).unwrap().all().await.unwrap();
            (model.keys().cloned().collect::<Vec<_>>(), texts(keys))
        });
        prop_assert_eq!(expected, actual);
    }
}

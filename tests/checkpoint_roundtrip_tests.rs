//! Checkpoint persistence properties
use proptest::prelude::*;
use serde_json::{Value, json};
use tempfile::TempDir;

use promo_harvester::domain::{PriceData, ProductData, PromotionData, ResultRecord, ResultStore};
use promo_harvester::infrastructure::CheckpointStore;

fn json_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<i64>().prop_map(|n| json!(n)),
        any::<bool>().prop_map(Value::Bool),
        "\\PC{0,24}".prop_map(Value::String),
    ]
}

fn product() -> impl Strategy<Value = ProductData> {
    (
        json_scalar(),
        json_scalar(),
        json_scalar(),
        json_scalar(),
        (json_scalar(), json_scalar(), json_scalar()),
    )
        .prop_map(|(id, title, description, status, (actual, unit_price, unit_of_measure))| {
            ProductData {
                id,
                title,
                description,
                bulk_buy_limit: json!(1),
                status,
                price: PriceData {
                    actual,
                    unit_price,
                    unit_of_measure,
                },
            }
        })
}

fn promotion() -> impl Strategy<Value = PromotionData> {
    (json_scalar(), json_scalar(), json_scalar()).prop_map(|(id, description, unit_selling_info)| {
        PromotionData {
            id,
            start_date: json!("2024-01-01"),
            end_date: Value::Null,
            description,
            unit_selling_info,
        }
    })
}

fn store() -> impl Strategy<Value = ResultStore> {
    prop::collection::btree_map(
        "[0-9]{1,12}",
        (prop::option::of(product()), prop::option::of(promotion())).prop_map(
            |(product_data, promotion_data)| ResultRecord {
                product_data,
                promotion_data,
            },
        ),
        0..12,
    )
    .prop_map(|records| records.into_iter().collect())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn load_after_flush_returns_the_same_store(store in store()) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let checkpoint = CheckpointStore::new(temp_dir.path().join("combined.json"));

        let loaded = runtime.block_on(async {
            checkpoint.flush(&store).await.unwrap();
            checkpoint.load().await
        });

        prop_assert_eq!(loaded, store);
    }

    #[test]
    fn completed_ids_follow_store_keys(store in store()) {
        let ids = store.completed_ids();
        prop_assert_eq!(ids.len(), store.len());
        for (id, _) in store.iter() {
            prop_assert!(ids.contains(id));
        }
    }
}

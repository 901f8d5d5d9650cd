//! Property tests for the transfer planner: budget bounds and
//! determinism over generated item sets.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use proptest::prelude::*;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

use packmule::domain::error::SyncResult;
use packmule::domain::models::content_type::{ContentType, SyncDirection};
use packmule::domain::models::transfer::{ItemMetadata, SourceItem};
use packmule::domain::ports::source_provider::{ByteStream, ItemStream, SourceProvider};
use packmule::services::planner::TransferPlanner;

struct ListProvider {
    items: HashMap<String, Vec<SourceItem>>,
}

#[async_trait]
impl SourceProvider for ListProvider {
    fn name(&self) -> &str {
        "list"
    }

    async fn enumerate(
        &self,
        content_type: &ContentType,
        _cancel: &CancellationToken,
    ) -> SyncResult<ItemStream> {
        let items = self
            .items
            .get(&content_type.name)
            .cloned()
            .unwrap_or_default();
        Ok(stream::iter(items.into_iter().map(Ok)).boxed())
    }

    async fn fetch(&self, _source_ref: &str, _cancel: &CancellationToken) -> SyncResult<ByteStream> {
        Ok(stream::empty().boxed())
    }
}

fn content_type(name: &str, max_size: u64, priority: i32) -> ContentType {
    ContentType {
        name: name.to_string(),
        local_path: format!("/data/{name}"),
        remote_path: None,
        max_size_bytes: max_size,
        allowed_extensions: None,
        schedule: None,
        priority,
        direction: SyncDirection::FromSource,
        filters: vec![],
        priority_rules: vec![],
    }
}

fn items_strategy() -> impl Strategy<Value = Vec<(String, u64)>> {
    prop::collection::vec(
        ("[a-z]{3,8}", 1u64..500),
        0..40,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: the plan never charges a content type more than its
    /// configured budget.
    #[test]
    fn prop_budget_bound_holds(
        raw_items in items_strategy(),
        budget in 1u64..2_000,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime");
        runtime.block_on(async move {
            let items: Vec<SourceItem> = raw_items
                .iter()
                .enumerate()
                .map(|(i, (name, size))| SourceItem {
                    source_ref: format!("src/{name}-{i}"),
                    metadata: ItemMetadata {
                        name: format!("{name}-{i}"),
                        size_bytes: *size,
                        modified_at: None,
                    },
                })
                .collect();
            let provider = ListProvider {
                items: HashMap::from([("data".to_string(), items)]),
            };
            let types = vec![content_type("data", budget, 1)];

            let plan = TransferPlanner::new()
                .plan(&types, &provider, &CancellationToken::new())
                .await
                .expect("plan");

            assert!(
                plan.bytes_for("data") <= budget,
                "plan charged {} over budget {budget}",
                plan.bytes_for("data")
            );
            // Every transfer fits the budget individually too.
            for transfer in &plan.transfers {
                assert!(transfer.estimated_bytes <= budget);
            }
        });
    }

    /// Property: identical inputs produce identical plans.
    #[test]
    fn prop_plan_deterministic(
        raw_items in items_strategy(),
        budget in 1u64..2_000,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime");
        runtime.block_on(async move {
            let items: Vec<SourceItem> = raw_items
                .iter()
                .enumerate()
                .map(|(i, (name, size))| SourceItem {
                    source_ref: format!("src/{name}-{i}"),
                    metadata: ItemMetadata {
                        name: format!("{name}-{i}"),
                        size_bytes: *size,
                        modified_at: None,
                    },
                })
                .collect();
            let provider = ListProvider {
                items: HashMap::from([("data".to_string(), items)]),
            };
            let types = vec![content_type("data", budget, 1)];
            let planner = TransferPlanner::new();

            let first = planner
                .plan(&types, &provider, &CancellationToken::new())
                .await
                .expect("plan");
            let second = planner
                .plan(&types, &provider, &CancellationToken::new())
                .await
                .expect("plan");
            assert_eq!(first, second);

            let serialized_a = serde_json::to_vec(&first).expect("serialize");
            let serialized_b = serde_json::to_vec(&second).expect("serialize");
            assert_eq!(serialized_a, serialized_b, "plans must be byte-identical");
        });
    }

    /// Property: every enumerated item is either planned or named in a
    /// warning; nothing silently disappears.
    #[test]
    fn prop_no_item_silently_dropped(
        raw_items in items_strategy(),
        budget in 1u64..2_000,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime");
        runtime.block_on(async move {
            let items: Vec<SourceItem> = raw_items
                .iter()
                .enumerate()
                .map(|(i, (name, size))| SourceItem {
                    source_ref: format!("src/{name}-{i}"),
                    metadata: ItemMetadata {
                        name: format!("{name}-{i}"),
                        size_bytes: *size,
                        modified_at: None,
                    },
                })
                .collect();
            let total = items.len();
            let provider = ListProvider {
                items: HashMap::from([("data".to_string(), items)]),
            };
            let types = vec![content_type("data", budget, 1)];

            let plan = TransferPlanner::new()
                .plan(&types, &provider, &CancellationToken::new())
                .await
                .expect("plan");

            assert_eq!(
                plan.transfers.len() + plan.warnings.len(),
                total,
                "planned + warned must cover every candidate"
            );
        });
    }
}

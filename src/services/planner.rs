//! Transfer planner: filter, score, and budget candidate items into a
//! deterministic transfer plan.
//!
//! Content types are planned in ascending configured priority. Within one
//! content type, survivors are ordered by priority score descending, then
//! name ascending, and admitted while they fit the byte budget; an
//! oversized item is skipped so later smaller items can still fit.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::error::{SyncError, SyncResult};
use crate::domain::models::content_type::{ContentType, FilterRule};
use crate::domain::models::transfer::{
    ItemMetadata, PlanWarning, PlannedTransfer, SourceItem, TransferPlan,
};
use crate::domain::ports::source_provider::SourceProvider;

/// Filter rule with its regex compiled.
enum CompiledRule {
    MinSize(u64),
    MaxSize(u64),
    ModifiedWithin(chrono::Duration),
    Name(Regex),
    Extension(Vec<String>),
}

impl CompiledRule {
    fn compile(rule: &FilterRule) -> SyncResult<Self> {
        Ok(match rule {
            FilterRule::MinSizeBytes { bytes } => Self::MinSize(*bytes),
            FilterRule::MaxSizeBytes { bytes } => Self::MaxSize(*bytes),
            FilterRule::ModifiedWithinDays { days } => {
                Self::ModifiedWithin(chrono::Duration::days(i64::from(*days)))
            }
            FilterRule::NameMatches { pattern } => {
                let regex = Regex::new(pattern).map_err(|regex_error| {
                    SyncError::InvalidConfig(format!(
                        "invalid name pattern '{pattern}': {regex_error}"
                    ))
                })?;
                Self::Name(regex)
            }
            FilterRule::ExtensionIn { extensions } => Self::Extension(
                extensions.iter().map(|e| e.to_ascii_lowercase()).collect(),
            ),
        })
    }

    fn matches(&self, item: &ItemMetadata, now: DateTime<Utc>) -> bool {
        match self {
            Self::MinSize(bytes) => item.size_bytes >= *bytes,
            Self::MaxSize(bytes) => item.size_bytes <= *bytes,
            Self::ModifiedWithin(window) => item
                .modified_at
                .is_some_and(|modified| now.signed_duration_since(modified) <= *window),
            Self::Name(regex) => regex.is_match(&item.name),
            Self::Extension(allowed) => item
                .extension()
                .is_some_and(|ext| allowed.iter().any(|a| a == &ext)),
        }
    }
}

/// Builds transfer plans from configuration and a source provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferPlanner;

impl TransferPlanner {
    /// Create a planner.
    pub const fn new() -> Self {
        Self
    }

    /// Plan transfers for the given content types.
    ///
    /// Deterministic: identical configuration and enumeration output
    /// produce an identical plan.
    pub async fn plan(
        &self,
        content_types: &[ContentType],
        provider: &dyn SourceProvider,
        cancel: &CancellationToken,
    ) -> SyncResult<TransferPlan> {
        self.plan_at(Utc::now(), content_types, provider, cancel).await
    }

    async fn plan_at(
        &self,
        now: DateTime<Utc>,
        content_types: &[ContentType],
        provider: &dyn SourceProvider,
        cancel: &CancellationToken,
    ) -> SyncResult<TransferPlan> {
        let mut ordered: Vec<&ContentType> = content_types.iter().collect();
        ordered.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));

        let mut plan = TransferPlan::default();

        for content_type in ordered {
            if cancel.is_cancelled() {
                return Err(SyncError::Canceled);
            }
            let (items, enumeration_error) =
                Self::enumerate(content_type, provider, cancel).await?;
            if let Some(error) = enumeration_error {
                plan.warnings.push(PlanWarning::EnumerationPartial {
                    content_type: content_type.name.clone(),
                    error,
                });
            }
            self.plan_content_type(now, content_type, items, &mut plan)?;
        }

        debug!(
            transfers = plan.transfers.len(),
            warnings = plan.warnings.len(),
            total_bytes = plan.total_estimated_bytes(),
            "plan built"
        );
        Ok(plan)
    }

    /// Drain the provider's item stream, capturing a mid-stream error as a
    /// partial-enumeration diagnostic instead of failing the whole plan.
    async fn enumerate(
        content_type: &ContentType,
        provider: &dyn SourceProvider,
        cancel: &CancellationToken,
    ) -> SyncResult<(Vec<SourceItem>, Option<String>)> {
        let mut stream = match provider.enumerate(content_type, cancel).await {
            Ok(stream) => stream,
            Err(enumerate_error) => {
                warn!(content_type = %content_type.name, error = %enumerate_error,
                      "enumeration failed");
                return Ok((vec![], Some(enumerate_error.to_string())));
            }
        };

        let mut items = Vec::new();
        let mut partial = None;
        while let Some(next) = stream.next().await {
            if cancel.is_cancelled() {
                return Err(SyncError::Canceled);
            }
            match next {
                Ok(item) => items.push(item),
                Err(stream_error) => {
                    partial = Some(stream_error.to_string());
                    break;
                }
            }
        }
        Ok((items, partial))
    }

    fn plan_content_type(
        &self,
        now: DateTime<Utc>,
        content_type: &ContentType,
        items: Vec<SourceItem>,
        plan: &mut TransferPlan,
    ) -> SyncResult<()> {
        let filters: Vec<CompiledRule> = content_type
            .filters
            .iter()
            .map(CompiledRule::compile)
            .collect::<SyncResult<_>>()?;
        let scoring: Vec<(f64, CompiledRule)> = content_type
            .priority_rules
            .iter()
            .map(|rule| Ok((rule.weight, CompiledRule::compile(&rule.matcher)?)))
            .collect::<SyncResult<_>>()?;
        let allowed_extensions: Option<Vec<String>> = content_type
            .allowed_extensions
            .as_ref()
            .map(|exts| exts.iter().map(|e| e.to_ascii_lowercase()).collect());

        // Ordered filters short-circuit on the first rejection.
        let mut survivors: Vec<(f64, SourceItem)> = items
            .into_iter()
            .filter(|item| {
                if let Some(allowed) = &allowed_extensions {
                    if !item
                        .metadata
                        .extension()
                        .is_some_and(|ext| allowed.iter().any(|a| a == &ext))
                    {
                        return false;
                    }
                }
                filters.iter().all(|rule| rule.matches(&item.metadata, now))
            })
            .map(|item| {
                let score: f64 = scoring
                    .iter()
                    .filter(|(_, rule)| rule.matches(&item.metadata, now))
                    .map(|(weight, _)| *weight)
                    .sum();
                (score, item)
            })
            .collect();

        survivors.sort_by(|(score_a, item_a), (score_b, item_b)| {
            score_b
                .total_cmp(score_a)
                .then_with(|| item_a.metadata.name.cmp(&item_b.metadata.name))
        });

        let mut accumulated: u64 = 0;
        for (score, item) in survivors {
            let size = item.metadata.size_bytes;
            if size > content_type.max_size_bytes {
                plan.warnings.push(PlanWarning::ItemExceedsBudget {
                    content_type: content_type.name.clone(),
                    item: item.metadata.name.clone(),
                    estimated_bytes: size,
                    max_size_bytes: content_type.max_size_bytes,
                });
                continue;
            }
            if accumulated + size > content_type.max_size_bytes {
                plan.warnings.push(PlanWarning::BudgetExcluded {
                    content_type: content_type.name.clone(),
                    item: item.metadata.name.clone(),
                    estimated_bytes: size,
                });
                continue;
            }
            accumulated += size;
            plan.transfers.push(PlannedTransfer {
                content_type: content_type.name.clone(),
                destination_ref: destination_ref(&content_type.local_path, &item.metadata.name),
                source_ref: item.source_ref,
                estimated_bytes: size,
                priority_score: score,
            });
        }
        Ok(())
    }
}

fn destination_ref(local_path: &str, name: &str) -> String {
    format!("{}/{name}", local_path.trim_end_matches('/'))
}

//! Transfer planning value types: candidate items, planned transfers, and
//! the plan itself with its warnings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata the planner filters and scores on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadata {
    /// Item name, unique within its content type's enumeration
    pub name: String,
    /// Size in bytes as advertised by the source
    pub size_bytes: u64,
    /// Last modification time, when the source reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

impl ItemMetadata {
    /// File extension of the name, lowercased, without the dot.
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

/// A candidate item enumerated from a source provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceItem {
    /// Provider-specific reference used later by `fetch`
    pub source_ref: String,
    /// Metadata for filtering and scoring
    pub metadata: ItemMetadata,
}

/// One entry in a transfer plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedTransfer {
    /// Owning content type name
    pub content_type: String,
    /// Provider reference to fetch from
    pub source_ref: String,
    /// Destination reference to write to
    pub destination_ref: String,
    /// Size charged against the content type budget
    pub estimated_bytes: u64,
    /// Score that ordered this item within its content type
    pub priority_score: f64,
}

/// Why the planner left something out or could not see everything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanWarning {
    /// An eligible item did not fit the remaining budget
    BudgetExcluded {
        /// Content type whose budget was exhausted
        content_type: String,
        /// Excluded item name
        item: String,
        /// Size the item would have charged
        estimated_bytes: u64,
    },
    /// A single item is larger than the whole configured budget
    ItemExceedsBudget {
        /// Content type whose budget is too small
        content_type: String,
        /// Oversized item name
        item: String,
        /// Item size
        estimated_bytes: u64,
        /// Configured budget
        max_size_bytes: u64,
    },
    /// Source enumeration stopped early; the plan may be incomplete
    EnumerationPartial {
        /// Content type whose enumeration failed
        content_type: String,
        /// Error that interrupted enumeration
        error: String,
    },
}

impl std::fmt::Display for PlanWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BudgetExcluded {
                content_type,
                item,
                estimated_bytes,
            } => write!(
                f,
                "{content_type}: '{item}' ({estimated_bytes} bytes) excluded by budget"
            ),
            Self::ItemExceedsBudget {
                content_type,
                item,
                estimated_bytes,
                max_size_bytes,
            } => write!(
                f,
                "{content_type}: '{item}' ({estimated_bytes} bytes) exceeds the whole budget ({max_size_bytes} bytes)"
            ),
            Self::EnumerationPartial {
                content_type,
                error,
            } => write!(f, "{content_type}: enumeration incomplete: {error}"),
        }
    }
}

/// Ordered transfer list plus planning diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferPlan {
    /// Transfers in execution order
    pub transfers: Vec<PlannedTransfer>,
    /// Diagnostics accumulated during planning
    pub warnings: Vec<PlanWarning>,
}

impl TransferPlan {
    /// Total bytes the plan will charge across all content types.
    pub fn total_estimated_bytes(&self) -> u64 {
        self.transfers.iter().map(|t| t.estimated_bytes).sum()
    }

    /// Bytes charged against one content type.
    pub fn bytes_for(&self, content_type: &str) -> u64 {
        self.transfers
            .iter()
            .filter(|t| t.content_type == content_type)
            .map(|t| t.estimated_bytes)
            .sum()
    }

    /// True when nothing was planned.
    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }
}

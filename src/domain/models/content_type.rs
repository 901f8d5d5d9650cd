//! Content type configuration: a bucket of items synced together under a
//! shared budget, schedule, and rule set.

use serde::{Deserialize, Serialize};

use crate::domain::error::SyncError;

/// Transfer direction for a content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Items flow both ways; the agent's transferor reconciles
    #[default]
    Bidirectional,
    /// Push-only toward the destination
    ToDestination,
    /// Pull-only from the source
    FromSource,
}

impl SyncDirection {
    /// Stable lowercase name for logs and status output.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bidirectional => "bidirectional",
            Self::ToDestination => "to_destination",
            Self::FromSource => "from_source",
        }
    }
}

/// A predicate over candidate item metadata.
///
/// Filters run in configured order and short-circuit on the first rule that
/// rejects an item. The same shapes double as matchers inside
/// [`PriorityRule`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum FilterRule {
    /// Item must be at least this many bytes
    MinSizeBytes {
        /// Inclusive lower bound
        bytes: u64,
    },
    /// Item must be at most this many bytes
    MaxSizeBytes {
        /// Inclusive upper bound
        bytes: u64,
    },
    /// Item must have been modified within the trailing window
    ModifiedWithinDays {
        /// Window length in days
        days: u32,
    },
    /// Item name must match the regular expression
    NameMatches {
        /// Regex applied to the item name
        pattern: String,
    },
    /// Item extension must be one of the listed values (case-insensitive)
    ExtensionIn {
        /// Allowed extensions, without leading dot
        extensions: Vec<String>,
    },
}

impl FilterRule {
    /// Check that the rule is usable: regex patterns must compile and
    /// extension lists must be non-empty.
    pub fn validate(&self) -> Result<(), SyncError> {
        match self {
            Self::NameMatches { pattern } => {
                regex::Regex::new(pattern).map_err(|regex_error| {
                    SyncError::InvalidConfig(format!(
                        "invalid name pattern '{pattern}': {regex_error}"
                    ))
                })?;
            }
            Self::ExtensionIn { extensions } => {
                if extensions.is_empty() {
                    return Err(SyncError::InvalidConfig(
                        "extension_in rule with no extensions".to_string(),
                    ));
                }
            }
            Self::MinSizeBytes { .. } | Self::MaxSizeBytes { .. } | Self::ModifiedWithinDays { .. } => {}
        }
        Ok(())
    }
}

/// A weighted scoring rule applied to items that survive filtering.
///
/// An item's priority score is the sum of the weights of every rule whose
/// matcher accepts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PriorityRule {
    /// Contribution when the matcher accepts the item
    pub weight: f64,
    /// Predicate deciding whether the rule applies
    #[serde(flatten)]
    pub matcher: FilterRule,
}

/// A configured bucket of items to sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ContentType {
    /// Unique name within the service
    pub name: String,

    /// Destination path on the appliance
    pub local_path: String,

    /// Source-specific path or prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_path: Option<String>,

    /// Storage budget for one planning pass
    pub max_size_bytes: u64,

    /// Extensions accepted at enumeration time, without leading dot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_extensions: Option<Vec<String>>,

    /// Cron expression for the recurring sync trigger
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,

    /// Planning order; lower values plan earlier
    #[serde(default)]
    pub priority: i32,

    /// Transfer direction
    #[serde(default)]
    pub direction: SyncDirection,

    /// Ordered filter chain applied to candidates
    #[serde(default)]
    pub filters: Vec<FilterRule>,

    /// Scoring rules for survivors
    #[serde(default)]
    pub priority_rules: Vec<PriorityRule>,
}

impl ContentType {
    /// Check structural invariants of one configured content type.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.name.trim().is_empty() {
            return Err(SyncError::MissingField("content_type.name".to_string()));
        }
        if self.local_path.trim().is_empty() {
            return Err(SyncError::MissingField(format!(
                "content_types.{}.local_path",
                self.name
            )));
        }
        if self
            .local_path
            .split('/')
            .any(|segment| segment == "..")
        {
            return Err(SyncError::PathTraversal(self.local_path.clone()));
        }
        if self.max_size_bytes == 0 {
            return Err(SyncError::InvalidSizeBudget(self.name.clone()));
        }
        for rule in &self.filters {
            rule.validate()?;
        }
        for rule in &self.priority_rules {
            rule.matcher.validate()?;
            if !rule.weight.is_finite() {
                return Err(SyncError::InvalidConfig(format!(
                    "content_types.{}: priority rule weight must be finite",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

//! Merges planned leaves into one ordered, deduplicated dataset.

use std::collections::HashSet;
use std::fmt;

use crate::query::TimeRange;
use crate::splitter::Leaf;
use crate::types::{PageStatus, Record};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarningKind {
    /// The remote answered this range with an application error; its
    /// records are missing from the dataset.
    RemoteError { title: String },
    /// The range could not be split further and was capped at the offset
    /// window; records past the window are missing.
    TooDense,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarningKind::RemoteError { title } => write!(f, "remote error: {title}"),
            WarningKind::TooDense => write!(f, "too dense for the offset window"),
        }
    }
}

/// A sub-range whose records are known to be partly or wholly absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeWarning {
    pub range: TimeRange,
    pub kind: WarningKind,
}

/// Aggregation output: every retrieved record in observation-time order,
/// plus the ranges that could not be fully retrieved.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub records: Vec<Record>,
    pub warnings: Vec<RangeWarning>,
}

impl Dataset {
    /// True when every planned range was retrieved in full.
    pub fn is_complete(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Concatenate leaves into one dataset, sorted ascending by observation
/// timestamp. The sort is stable: ties keep plan order, and records without
/// a parseable timestamp sort first.
///
/// Split boundaries are constructed disjoint, so duplicates cannot occur
/// unless boundary arithmetic regressed. When two adjacent leaves abut or
/// overlap anyway, a record at the shared boundary instant that is identical
/// to one already taken from the earlier leaf is dropped.
pub fn aggregate(leaves: Vec<Leaf>) -> Dataset {
    // Boundary instants shared by adjacent leaves. Empty in the normal
    // case, where every leaf starts strictly after its predecessor ends.
    let mut hot_instants = HashSet::new();
    for pair in leaves.windows(2) {
        if pair[0].range.end() >= pair[1].range.start() {
            hot_instants.insert(pair[0].range.end());
            hot_instants.insert(pair[1].range.start());
        }
    }

    let mut records = Vec::new();
    let mut warnings = Vec::new();
    let mut at_boundary: Vec<Record> = Vec::new();

    for leaf in leaves {
        if leaf.dense {
            warnings.push(RangeWarning {
                range: leaf.range,
                kind: WarningKind::TooDense,
            });
        }
        for page in leaf.pages {
            match page.status {
                PageStatus::Success => {
                    for record in page.results {
                        let shared = record
                            .observation_time()
                            .is_some_and(|at| hot_instants.contains(&at));
                        if shared {
                            if at_boundary.contains(&record) {
                                tracing::debug!(
                                    "dropped duplicate record at a shared split boundary"
                                );
                                continue;
                            }
                            at_boundary.push(record.clone());
                        }
                        records.push(record);
                    }
                }
                // Unauthorized pages never reach aggregation (the plan
                // aborts first); treat one like any other failed page.
                PageStatus::OtherError | PageStatus::Unauthorized => {
                    warnings.push(RangeWarning {
                        range: leaf.range,
                        kind: WarningKind::RemoteError {
                            title: page.title.clone(),
                        },
                    });
                }
            }
        }
    }

    records.sort_by_key(Record::observation_time);

    Dataset { records, warnings }
}

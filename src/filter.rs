//! Operation filter.
//!
//! Decides per entry whether it reaches the destination. No-op entries
//! (heartbeats) carry no data change and are dropped; entries outside the
//! replicated databases are dropped too, which only matters for backends
//! whose log query cannot express the namespace restriction.

use crate::entry::LogEntry;
use crate::store::NamespaceFilter;

/// Why an entry was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NoOp,
    Namespace,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::NoOp => "noop",
            DropReason::Namespace => "namespace",
        }
    }
}

/// Filter outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    Drop(DropReason),
}

/// Stateless entry filter.
#[derive(Debug, Clone, Default)]
pub struct OperationFilter {
    namespaces: NamespaceFilter,
}

impl OperationFilter {
    pub fn new(namespaces: NamespaceFilter) -> Self {
        Self { namespaces }
    }

    pub fn filter(&self, entry: &LogEntry) -> Verdict {
        if entry.is_noop() {
            Verdict::Drop(DropReason::NoOp)
        } else if !self.namespaces.matches(&entry.namespace) {
            Verdict::Drop(DropReason::Namespace)
        } else {
            Verdict::Keep
        }
    }
}

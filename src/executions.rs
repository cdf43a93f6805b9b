//! Execution Registry - in-flight execution tracking.
//!
//! Every procedure execution registers itself here for its lifetime, so the
//! client can expose an aggregate busy flag and the ordered labels of
//! everything currently in flight (progress indicators, debug overlays).
//!
//! The active set lives in a signal, so `is_busy()` and `labels()` establish
//! reactive dependencies when read inside an effect or derived - the same
//! trick the component registry uses for its allocated-index set.
//!
//! Each client owns one registry; there is no process-wide singleton.

use std::cell::Cell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use spark_signals::{signal, untrack, Signal};

/// Largest id handed out before wrapping back to 1.
///
/// 2^53 - 1: the bound below which integer increments are exact in the
/// runtimes this layer interoperates with.
const ID_WRAP: u64 = (1 << 53) - 1;

// =============================================================================
// Execution Record
// =============================================================================

/// One in-flight execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Registry-assigned id, unique among concurrently active records.
    pub id: u64,
    /// Optional human-readable label supplied by the binding.
    pub label: Option<String>,
}

// =============================================================================
// Execution Registry
// =============================================================================

/// Tracks in-flight executions for one client instance.
///
/// Cheap to clone; clones share the same underlying state.
#[derive(Clone)]
pub struct ExecutionRegistry {
    /// Active records in insertion order.
    active: Signal<Vec<ExecutionRecord>>,
    /// Next id candidate.
    next_id: Rc<Cell<u64>>,
}

impl ExecutionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            active: signal(Vec::new()),
            next_id: Rc::new(Cell::new(1)),
        }
    }

    /// Register the start of an execution. Returns the id to pass to
    /// [`end`](Self::end) when the execution settles.
    ///
    /// Ids increase monotonically and wrap at 2^53 - 1 back to 1; after
    /// wraparound, ids still held by active records are skipped so no two
    /// concurrently active records ever share an id.
    pub fn begin(&self, label: Option<&str>) -> u64 {
        // Untracked: begin() runs inside watcher effects, which must not
        // subscribe to the active set. Only is_busy()/labels()/active_count()
        // are reactive reads.
        let mut active = untrack(|| self.active.get());

        let mut id = self.next_id.get();
        // Bounded by the number of concurrently active executions.
        while active.iter().any(|record| record.id == id) {
            id = if id >= ID_WRAP { 1 } else { id + 1 };
        }
        self.next_id.set(if id >= ID_WRAP { 1 } else { id + 1 });

        active.push(ExecutionRecord {
            id,
            label: label.map(str::to_string),
        });
        self.active.set(active);
        id
    }

    /// Register the end of an execution. Removes exactly the record created
    /// by the matching [`begin`](Self::begin); unknown ids are ignored.
    pub fn end(&self, id: u64) {
        let mut active = untrack(|| self.active.get());
        if let Some(position) = active.iter().position(|record| record.id == id) {
            active.remove(position);
            self.active.set(active);
        }
    }

    /// True while any execution is in flight. Reactive read.
    pub fn is_busy(&self) -> bool {
        !self.active.get().is_empty()
    }

    /// Labels of active executions in insertion order. Reactive read.
    pub fn labels(&self) -> Vec<Option<String>> {
        self.active
            .get()
            .iter()
            .map(|record| record.label.clone())
            .collect()
    }

    /// Number of active executions. Reactive read.
    pub fn active_count(&self) -> usize {
        self.active.get().len()
    }
}

impl Default for ExecutionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

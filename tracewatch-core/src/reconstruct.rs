//! Stream reconstruction
//!
//! Incoming batches are flat: the producer may split one logical operation
//! across batches, and a trace's structural parent may already have been
//! committed to the tree by the time the trace arrives. Reconstruction
//! therefore attaches by identity lookup over the whole known tree instead
//! of requiring in-order delivery.
//!
//! Each batch is folded in with two backward passes: first parent-linked
//! records, then `task.run` subtree grafts. Whatever survives both passes
//! becomes new roots, in batch order.

use crate::filter::DURATION_FLOOR_MS;
use crate::types::Trace;

/// Name tag of the records that carry a background task's subtree.
const TASK_RUN: &str = "task.run";

/// The accumulated trace tree of one sampling session.
#[derive(Debug, Default)]
pub struct TraceStore {
    roots: Vec<Trace>,
    max_duration: u64,
}

impl TraceStore {
    pub fn new() -> Self {
        Self {
            roots: Vec::new(),
            max_duration: DURATION_FLOOR_MS,
        }
    }

    /// The committed root traces, in arrival order of first sight.
    pub fn roots(&self) -> &[Trace] {
        &self.roots
    }

    /// Running maximum duration ever observed; monotone for the life of the
    /// session, floored at 500 ms.
    pub fn max_duration(&self) -> u64 {
        self.max_duration
    }

    /// Drop all accumulated traces and reset the duration floor.
    pub fn clear(&mut self) {
        self.roots.clear();
        self.max_duration = DURATION_FLOOR_MS;
    }

    /// Fold one incoming batch into the tree.
    ///
    /// Returns the "structure changed" signal: `true` when any record was
    /// attached inside the existing tree, meaning previously rendered output
    /// must be invalidated rather than appended to.
    pub fn apply_batch(&mut self, mut records: Vec<Trace>, observed_max: u64) -> bool {
        let mut changed = false;

        // Parent-linking pass, scanned from the end backward so removal
        // does not disturb the unvisited prefix.
        let mut i = records.len();
        while i > 0 {
            i -= 1;
            if records[i].data.parent_id.is_some() {
                let record = records.remove(i);
                changed |= self.link_parented(record);
            }
        }

        // Task-subtree pass over what parent linking left behind.
        let mut i = records.len();
        while i > 0 {
            i -= 1;
            if records[i].name == TASK_RUN {
                let record = records.remove(i);
                changed |= self.graft_task(record);
            }
        }

        // Everything not consumed above is a new root.
        self.roots.extend(records);

        self.max_duration = self.max_duration.max(observed_max);
        changed
    }

    /// Attach a parent-linked record under the trace it references, anywhere
    /// in the known tree. Records whose parent is not (yet) known are
    /// dropped, matching the producer contract: there is no retry.
    fn link_parented(&mut self, mut record: Trace) -> bool {
        let mut changed = false;

        // The record's own payload may carry nested parent-linked children
        // that belong elsewhere in the known tree; resolve those first.
        let mut j = record.children.len();
        while j > 0 {
            j -= 1;
            if record.children[j].data.parent_id.is_some() {
                let nested = record.children.remove(j);
                changed |= self.link_parented(nested);
            }
        }

        let Some(parent_id) = record.data.parent_id.clone() else {
            return changed;
        };
        match find_mut(&mut self.roots, &parent_id) {
            Some(parent) => {
                parent.children.push(record);
                true
            }
            None => {
                tracing::debug!(
                    id = %record.id,
                    parent_id = %parent_id,
                    name = %record.name,
                    "Dropping orphan trace, parent not in tree"
                );
                changed
            }
        }
    }

    /// Graft a `task.run` record's children onto the committed trace whose
    /// id matches the record's own id, preserving each child's subtree.
    fn graft_task(&mut self, record: Trace) -> bool {
        match find_mut(&mut self.roots, &record.id) {
            Some(target) => {
                target.children.extend(record.children);
                true
            }
            None => {
                tracing::debug!(
                    id = %record.id,
                    "Dropping task subtree, no matching trace in tree"
                );
                false
            }
        }
    }
}

/// Recursive identity lookup over a forest, roots and descendants alike.
///
/// Linear scan per lookup; the tree is bounded by session size.
fn find_mut<'a>(forest: &'a mut [Trace], id: &str) -> Option<&'a mut Trace> {
    let idx = forest.iter().position(|t| contains(t, id))?;
    let trace = &mut forest[idx];
    if trace.id == id {
        Some(trace)
    } else {
        find_mut(&mut trace.children, id)
    }
}

fn contains(trace: &Trace, id: &str) -> bool {
    trace.id == id || trace.children.iter().any(|c| contains(c, id))
}

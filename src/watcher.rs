//! Mutation watcher: turns batches of DOM changes into one debounced re-apply

use tokio::time::Instant;
use tracing::trace;

use crate::debounce::Debouncer;
use crate::dom::MutationRecord;

#[derive(Debug, Default)]
pub struct MutationWatcher {
    debouncer: Debouncer,
    batches_scheduled: u64,
    batches_ignored: u64,
}

impl MutationWatcher {
    /// Observe a batch of records. Schedules (or pushes back) a re-apply when
    /// the batch added or removed nodes, the engine is not reverting, and the
    /// site is active. Returns whether a re-apply is now scheduled by this batch.
    pub fn on_mutations(&mut self, records: &[MutationRecord], reverting: bool, active: bool, now: Instant) -> bool {
        if records.is_empty() {
            return false;
        }
        if reverting || !active || !records.iter().any(MutationRecord::changes_children) {
            self.batches_ignored += 1;
            trace!(records = records.len(), reverting, active, "ignoring mutation batch");
            return false;
        }
        self.debouncer.schedule(now);
        self.batches_scheduled += 1;
        trace!(records = records.len(), "mutation batch scheduled re-apply");
        true
    }

    pub fn cancel(&mut self) -> bool {
        self.debouncer.cancel()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    pub fn take_due(&mut self, now: Instant) -> bool {
        self.debouncer.take_due(now)
    }

    pub fn batches_scheduled(&self) -> u64 {
        self.batches_scheduled
    }

    pub fn batches_ignored(&self) -> u64 {
        self.batches_ignored
    }
}

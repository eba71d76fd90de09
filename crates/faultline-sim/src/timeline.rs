//! ---
//! fl_section: "11-simulation-test-harness"
//! fl_subsection: "module"
//! fl_type: "source"
//! fl_scope: "code"
//! fl_description: "Ordered queue of planned host failures."
//! fl_version: "v0.1.0"
//! fl_owner: "tbd"
//! ---
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use faultline_resilience::{FailureEvent, FaultTimeline};

#[derive(Debug)]
struct Entry {
    seq: u64,
    event: FailureEvent,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.event
            .time
            .total_cmp(&other.event.time)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Failures waiting for delivery, earliest first; ties keep scheduling order.
#[derive(Debug, Default)]
pub struct FailureTimeline {
    heap: BinaryHeap<Reverse<Entry>>,
    seq: u64,
}

impl FailureTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Time of the earliest pending failure.
    pub fn peek_time(&self) -> Option<f64> {
        self.heap.peek().map(|Reverse(entry)| entry.event.time)
    }

    /// Remove the earliest failure if it is due at or before `now`.
    pub fn pop_due(&mut self, now: f64) -> Option<FailureEvent> {
        if self.peek_time()? <= now {
            self.heap.pop().map(|Reverse(entry)| entry.event)
        } else {
            None
        }
    }
}

impl FaultTimeline for FailureTimeline {
    fn schedule(&mut self, event: FailureEvent) {
        self.seq += 1;
        self.heap.push(Reverse(Entry {
            seq: self.seq,
            event,
        }));
    }
}

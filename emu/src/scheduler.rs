//! The event scheduler.
//!
//! A priority queue of timestamped events keyed on the absolute cycle
//! counter. Everything that has to happen "later" (a DMA acquiring the bus,
//! the end of a scanline, a timer overflow) goes through here; the bus pops
//! due events at instruction boundaries and dispatches them.
//!
//! Payloads are a tagged enum rather than callbacks, so the whole pending
//! queue serializes into snapshots and restores bit-exactly.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};

use crate::hardware::dma::DmaTiming;

/// What to do when an event comes due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// The visible part of a scanline ended.
    HBlankStart,
    /// HBlank ended, move to the next scanline.
    HBlankEnd,
    /// A DMA trigger condition elapsed; scan channels of this timing class.
    DmaTransfer(DmaTiming),
    /// An audio FIFO requested a refill on this channel.
    DmaFifo(usize),
    /// A timer counter wrapped.
    TimerOverflow(usize),
    /// Emit one audio sample pair at the configured resample rate.
    ApuSample,
}

/// A scheduled event. `seq` breaks ties between events scheduled for the
/// same cycle: insertion order wins, which keeps replay deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub cycle: u64,
    seq: u64,
    pub kind: EventKind,
}

// `BinaryHeap` is a max-heap, so compare reversed to pop the earliest
// (cycle, seq) first.
impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cycle
            .cmp(&self.cycle)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Scheduler {
    queue: BinaryHeap<Event>,
    next_seq: u64,
}

impl Scheduler {
    /// Inserts an event firing at `at_cycle`.
    ///
    /// Scheduling in the past is fine: the event fires on the very next
    /// pump. This models trigger conditions that have already elapsed by
    /// the time they are evaluated.
    pub fn schedule(&mut self, kind: EventKind, at_cycle: u64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Event {
            cycle: at_cycle,
            seq,
            kind,
        });
    }

    /// Removes every pending event matching `kind`.
    pub fn cancel(&mut self, kind: EventKind) {
        self.queue.retain(|event| event.kind != kind);
    }

    /// Pops the earliest event whose trigger cycle is due at `now`.
    ///
    /// Callers drain in a loop; an event handler may schedule further
    /// events and the head is re-checked on every call, so a newly
    /// scheduled already-due event fires within the same drain.
    pub fn pop_due(&mut self, now: u64) -> Option<Event> {
        if self.queue.peek().is_some_and(|event| event.cycle <= now) {
            self.queue.pop()
        } else {
            None
        }
    }

    /// Trigger cycle of the earliest pending event.
    #[must_use]
    pub fn next_due(&self) -> Option<u64> {
        self.queue.peek().map(|event| event.cycle)
    }

    /// Flushes every pending event (reset/stop).
    pub fn clear(&mut self) {
        self.queue.clear();
        self.next_seq = 0;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn drain(scheduler: &mut Scheduler, now: u64) -> Vec<Event> {
        let mut fired = Vec::new();
        while let Some(event) = scheduler.pop_due(now) {
            fired.push(event);
        }
        fired
    }

    #[test]
    fn fires_in_cycle_order_with_fifo_ties() {
        let mut scheduler = Scheduler::default();
        scheduler.schedule(EventKind::HBlankStart, 100);
        scheduler.schedule(EventKind::HBlankEnd, 50);
        scheduler.schedule(EventKind::ApuSample, 100);
        scheduler.schedule(EventKind::TimerOverflow(0), 10);

        let fired = drain(&mut scheduler, 200);
        let cycles: Vec<u64> = fired.iter().map(|e| e.cycle).collect();
        assert_eq!(cycles, vec![10, 50, 100, 100]);

        // Equal trigger cycles keep insertion order.
        assert_eq!(fired[2].kind, EventKind::HBlankStart);
        assert_eq!(fired[3].kind, EventKind::ApuSample);
    }

    #[test]
    fn events_in_the_future_stay_queued() {
        let mut scheduler = Scheduler::default();
        scheduler.schedule(EventKind::HBlankStart, 960);

        assert!(scheduler.pop_due(959).is_none());
        assert_eq!(scheduler.len(), 1);
        assert!(scheduler.pop_due(960).is_some());
    }

    #[test]
    fn past_dated_events_fire_on_next_pump() {
        let mut scheduler = Scheduler::default();
        scheduler.schedule(EventKind::HBlankEnd, 5);

        let fired = drain(&mut scheduler, 1000);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].cycle, 5);
    }

    #[test]
    fn cancel_removes_all_matching() {
        let mut scheduler = Scheduler::default();
        scheduler.schedule(EventKind::TimerOverflow(2), 10);
        scheduler.schedule(EventKind::TimerOverflow(2), 20);
        scheduler.schedule(EventKind::TimerOverflow(3), 30);

        scheduler.cancel(EventKind::TimerOverflow(2));

        let fired = drain(&mut scheduler, 100);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].kind, EventKind::TimerOverflow(3));
    }
}

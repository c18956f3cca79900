//! Scheduled transitions and the queue that orders them.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};

use crate::node::Compartment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Presymptomatic,
    Asymptomatic,
    MildOnset,
    SevereOnset,
    Hospitalized,
    Critical,
    PostCritical,
    Death,
    RecoverAsymptomatic,
    RecoverMild,
    RecoverHospital,
    RecoverCritical,
    LossOfImmunity,
    /// A potential transmission from an infectious individual in the source
    /// node to a random member of the target node.
    Contact,
}

impl EventKind {
    /// Compartment left and compartment entered. `None` for `Contact`,
    /// which only changes counters when it turns into an infection.
    pub const fn transition(self) -> Option<(Compartment, Compartment)> {
        use Compartment as C;
        let pair = match self {
            EventKind::Presymptomatic => (C::Exposed, C::Presymptomatic),
            EventKind::Asymptomatic => (C::Exposed, C::Asymptomatic),
            EventKind::MildOnset => (C::Presymptomatic, C::Mild),
            EventKind::SevereOnset => (C::Presymptomatic, C::Severe),
            EventKind::Hospitalized => (C::Severe, C::Hospitalized),
            EventKind::Critical => (C::Hospitalized, C::Critical),
            EventKind::PostCritical => (C::Critical, C::HospitalizedPostCritical),
            EventKind::Death => (C::Critical, C::Death),
            EventKind::RecoverAsymptomatic => (C::Asymptomatic, C::Resistant),
            EventKind::RecoverMild => (C::Mild, C::Resistant),
            EventKind::RecoverHospital => (C::Hospitalized, C::Resistant),
            EventKind::RecoverCritical => (C::HospitalizedPostCritical, C::Resistant),
            EventKind::LossOfImmunity => (C::Resistant, C::Susceptible),
            EventKind::Contact => return None,
        };
        Some(pair)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub time: f64,
    pub kind: EventKind,
    /// Index of the node the individual belongs to.
    pub source: usize,
    /// Index of the node the transition lands in.
    pub target: usize,
    /// Whether the individual had been detected by the time this was scheduled.
    pub detected: bool,
    /// Scheduling order; breaks ties between equal times.
    pub seq: u64,
}

impl Eq for Event {}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the max-heap pops the earliest event first.
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pending events, earliest first.
///
/// Events with equal times come out in the order they were scheduled. The
/// sequence counter is part of the persisted state, so that order survives a
/// checkpoint; nothing in the model depends on it beyond time order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventQueue {
    heap: BinaryHeap<Event>,
    next_seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(
        &mut self,
        time: f64,
        kind: EventKind,
        source: usize,
        target: usize,
        detected: bool,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Event {
            time,
            kind,
            source,
            target,
            detected,
            seq,
        });
    }

    pub fn pop(&mut self) -> Option<Event> {
        self.heap.pop()
    }

    pub fn peek(&self) -> Option<&Event> {
        self.heap.peek()
    }

    pub fn next_time(&self) -> Option<f64> {
        self.heap.peek().map(|e| e.time)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.next_seq = 0;
    }

    /// Pending events in dispatch order, without consuming the queue.
    pub fn to_sorted_vec(&self) -> Vec<Event> {
        let mut events = self.heap.clone().into_sorted_vec();
        events.reverse();
        events
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Event> {
        self.heap.iter()
    }
}

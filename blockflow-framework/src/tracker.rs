//! Dependency trackers and the per-context dependency graph
//!
//! Every ticket a system declares gets one [`DependencyTracker`] in each
//! context. Trackers live in an arena indexed by ticket; edges are stored as
//! ticket lists on both ends. Change notification only stamps serials on the
//! affected trackers, it never recomputes anything.

use crate::error::{FrameworkError, Result};
use blockflow_types::{CacheIndex, DependencyTicket};
use std::collections::VecDeque;
use std::fmt;

/// Monotonic stamp recording when a tracker last saw an upstream change
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ChangeSerial(pub u64);

impl ChangeSerial {
    pub const ZERO: ChangeSerial = ChangeSerial(0);

    pub fn next(self) -> ChangeSerial {
        ChangeSerial(self.0 + 1)
    }
}

impl fmt::Display for ChangeSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// A node of the dependency graph
#[derive(Debug, Clone)]
pub struct DependencyTracker {
    ticket: DependencyTicket,
    description: String,
    prerequisites: Vec<DependencyTicket>,
    subscribers: Vec<DependencyTicket>,
    change_serial: ChangeSerial,
    cache_index: Option<CacheIndex>,
}

impl DependencyTracker {
    fn new(ticket: DependencyTicket, description: String) -> Self {
        DependencyTracker {
            ticket,
            description,
            prerequisites: Vec::new(),
            subscribers: Vec::new(),
            change_serial: ChangeSerial::ZERO,
            cache_index: None,
        }
    }

    pub fn ticket(&self) -> DependencyTicket {
        self.ticket
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Trackers this one depends on
    pub fn prerequisites(&self) -> &[DependencyTicket] {
        &self.prerequisites
    }

    /// Trackers that depend on this one
    pub fn subscribers(&self) -> &[DependencyTicket] {
        &self.subscribers
    }

    pub fn change_serial(&self) -> ChangeSerial {
        self.change_serial
    }

    /// The cache entry value whose freshness this tracker governs, if any
    pub fn cache_index(&self) -> Option<CacheIndex> {
        self.cache_index
    }

    /// A tracker with no prerequisites is driven only from outside the graph
    pub fn is_source(&self) -> bool {
        self.prerequisites.is_empty()
    }

    pub(crate) fn set_cache_index(&mut self, index: CacheIndex) {
        self.cache_index = Some(index);
    }
}

/// Arena of trackers owned by a single context
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    trackers: Vec<Option<DependencyTracker>>,
    creation_order: Vec<DependencyTicket>,
    latest_serial: ChangeSerial,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an unconnected tracker for `ticket`.
    ///
    /// Fails if a tracker already exists for that ticket.
    pub fn create_new_dependency_tracker(
        &mut self,
        ticket: DependencyTicket,
        description: impl Into<String>,
    ) -> Result<&mut DependencyTracker> {
        let description = description.into();
        if self.has_tracker(ticket) {
            return Err(FrameworkError::DuplicateTracker {
                ticket,
                description,
            });
        }

        let slot = ticket.as_usize();
        if self.trackers.len() <= slot {
            self.trackers.resize_with(slot + 1, || None);
        }
        self.creation_order.push(ticket);
        Ok(self.trackers[slot].insert(DependencyTracker::new(ticket, description)))
    }

    pub fn has_tracker(&self, ticket: DependencyTicket) -> bool {
        matches!(self.trackers.get(ticket.as_usize()), Some(Some(_)))
    }

    pub fn get_tracker(&self, ticket: DependencyTicket) -> Result<&DependencyTracker> {
        self.trackers
            .get(ticket.as_usize())
            .and_then(Option::as_ref)
            .ok_or(FrameworkError::UnknownTracker { ticket })
    }

    pub(crate) fn get_mutable_tracker(
        &mut self,
        ticket: DependencyTicket,
    ) -> Result<&mut DependencyTracker> {
        self.trackers
            .get_mut(ticket.as_usize())
            .and_then(Option::as_mut)
            .ok_or(FrameworkError::UnknownTracker { ticket })
    }

    /// Record that `subscriber` depends on `prerequisite`, and the reciprocal
    /// edge. Both trackers must already exist. Repeated subscriptions are
    /// recorded once.
    pub fn subscribe_to_prerequisite(
        &mut self,
        subscriber: DependencyTicket,
        prerequisite: DependencyTicket,
    ) -> Result<()> {
        self.get_tracker(prerequisite)?;
        let sub = self.get_mutable_tracker(subscriber)?;
        if sub.prerequisites.contains(&prerequisite) {
            return Ok(());
        }
        sub.prerequisites.push(prerequisite);
        self.get_mutable_tracker(prerequisite)?
            .subscribers
            .push(subscriber);
        Ok(())
    }

    /// Stamp a fresh serial on `ticket` and every transitive subscriber.
    ///
    /// Returns the touched trackers in visiting order, starting with `ticket`.
    pub fn note_value_change(&mut self, ticket: DependencyTicket) -> Result<Vec<DependencyTicket>> {
        self.get_tracker(ticket)?;
        let serial = self.latest_serial.next();
        self.latest_serial = serial;

        let mut touched = Vec::new();
        let mut pending = VecDeque::from([ticket]);
        while let Some(next) = pending.pop_front() {
            let tracker = self.get_mutable_tracker(next)?;
            // Already reached through another path during this change.
            if tracker.change_serial == serial {
                continue;
            }
            tracker.change_serial = serial;
            pending.extend(tracker.subscribers.iter().copied());
            touched.push(next);
        }
        Ok(touched)
    }

    /// The most recent serial handed out by [`note_value_change`]
    ///
    /// [`note_value_change`]: DependencyGraph::note_value_change
    pub fn latest_serial(&self) -> ChangeSerial {
        self.latest_serial
    }

    pub fn num_trackers(&self) -> usize {
        self.creation_order.len()
    }

    /// Tickets in the order their trackers were created
    pub fn creation_order(&self) -> &[DependencyTicket] {
        &self.creation_order
    }

    pub fn trackers(&self) -> impl Iterator<Item = &DependencyTracker> {
        self.trackers.iter().flatten()
    }

    /// A prerequisites-first ordering of every tracker, or `None` if the
    /// subscription relation contains a cycle.
    pub fn topological_order(&self) -> Option<Vec<DependencyTicket>> {
        let mut remaining: Vec<usize> = self
            .trackers
            .iter()
            .map(|t| t.as_ref().map_or(0, |t| t.prerequisites.len()))
            .collect();

        let mut ready: VecDeque<DependencyTicket> = self
            .creation_order
            .iter()
            .copied()
            .filter(|t| remaining[t.as_usize()] == 0)
            .collect();

        let mut order = Vec::with_capacity(self.num_trackers());
        while let Some(ticket) = ready.pop_front() {
            order.push(ticket);
            let tracker = self.get_tracker(ticket).ok()?;
            for sub in &tracker.subscribers {
                let count = &mut remaining[sub.as_usize()];
                *count -= 1;
                if *count == 0 {
                    ready.push_back(*sub);
                }
            }
        }

        (order.len() == self.num_trackers()).then_some(order)
    }
}

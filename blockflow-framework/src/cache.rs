//! Cache entries and their per-context values
//!
//! A [`CacheEntry`] is the static description a system declares once: what
//! the value depends on, how to allocate it and how to compute it. Every
//! context holds one [`CacheEntryValue`] per entry, at the same index, bound
//! to its own tracker in that context's dependency graph.

use crate::context::ContextRef;
use crate::error::{FrameworkError, Result};
use crate::metrics::{CacheEntryMetrics, MetricsSnapshot};
use crate::system::SystemBase;
use crate::tracker::{ChangeSerial, DependencyGraph};
use crate::value::AbstractValue;
use blockflow_types::{CacheIndex, DependencyTicket};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Computes a cache entry's value in place from a context
pub type ValueProducer =
    Arc<dyn Fn(&SystemBase, ContextRef<'_>, &mut AbstractValue) -> Result<()> + Send + Sync>;

/// Produces a correctly typed default value for a cache entry
pub type ValueAllocator = Arc<dyn Fn() -> AbstractValue + Send + Sync>;

/// Static declaration of a lazily computed value
pub struct CacheEntry {
    index: CacheIndex,
    ticket: DependencyTicket,
    description: String,
    prerequisites: BTreeSet<DependencyTicket>,
    allocator: ValueAllocator,
    producer: ValueProducer,
    disabled_by_default: bool,
}

impl CacheEntry {
    pub(crate) fn new(
        index: CacheIndex,
        ticket: DependencyTicket,
        description: String,
        allocator: ValueAllocator,
        producer: ValueProducer,
        prerequisites: BTreeSet<DependencyTicket>,
        pathname: String,
    ) -> Result<Self> {
        if prerequisites.is_empty() {
            return Err(FrameworkError::EmptyPrerequisites {
                description,
                pathname,
            });
        }
        Ok(CacheEntry {
            index,
            ticket,
            description,
            prerequisites,
            allocator,
            producer,
            disabled_by_default: false,
        })
    }

    pub fn cache_index(&self) -> CacheIndex {
        self.index
    }

    pub fn ticket(&self) -> DependencyTicket {
        self.ticket
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn prerequisites(&self) -> &BTreeSet<DependencyTicket> {
        &self.prerequisites
    }

    /// Fresh default value of the right type
    pub fn allocate(&self) -> AbstractValue {
        (self.allocator)()
    }

    /// Run the producer, overwriting `value`
    pub fn calc(
        &self,
        system: &SystemBase,
        context: ContextRef<'_>,
        value: &mut AbstractValue,
    ) -> Result<()> {
        (self.producer)(system, context, value)
    }

    /// Contexts created after this call start with caching disabled for
    /// this entry, so every evaluation recomputes.
    pub fn disable_caching_by_default(&mut self) -> &mut Self {
        self.disabled_by_default = true;
        self
    }

    pub fn is_disabled_by_default(&self) -> bool {
        self.disabled_by_default
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("index", &self.index)
            .field("ticket", &self.ticket)
            .field("description", &self.description)
            .field("prerequisites", &self.prerequisites)
            .field("disabled_by_default", &self.disabled_by_default)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
struct CacheSlot {
    // None only while the producer is running.
    value: Option<Arc<AbstractValue>>,
    computed_at: Option<ChangeSerial>,
}

/// The per-context slot holding one cache entry's current value
#[derive(Debug)]
pub struct CacheEntryValue {
    index: CacheIndex,
    ticket: DependencyTicket,
    description: String,
    slot: Mutex<CacheSlot>,
    caching_disabled: bool,
    metrics: CacheEntryMetrics,
}

impl CacheEntryValue {
    fn new(index: CacheIndex, ticket: DependencyTicket, description: String) -> Self {
        CacheEntryValue {
            index,
            ticket,
            description,
            slot: Mutex::new(CacheSlot::default()),
            caching_disabled: false,
            metrics: CacheEntryMetrics::new(),
        }
    }

    pub fn cache_index(&self) -> CacheIndex {
        self.index
    }

    pub fn ticket(&self) -> DependencyTicket {
        self.ticket
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Seed the slot with an allocated default; the value stays out of date
    /// until first computed.
    pub(crate) fn set_initial_value(&mut self, value: AbstractValue) {
        let slot = self.slot.get_mut();
        slot.value = Some(Arc::new(value));
        slot.computed_at = None;
    }

    /// Current contents of the slot, fresh or not, without computing
    pub fn peek(&self) -> Option<Arc<AbstractValue>> {
        self.slot.lock().value.clone()
    }

    /// True unless the value was computed at the tracker's `current` serial
    pub fn is_out_of_date(&self, current: ChangeSerial) -> bool {
        self.slot.lock().computed_at != Some(current)
    }

    pub(crate) fn mark_out_of_date(&mut self) {
        self.slot.get_mut().computed_at = None;
    }

    pub fn disable_caching(&mut self) {
        self.caching_disabled = true;
    }

    pub fn enable_caching(&mut self) {
        self.caching_disabled = false;
    }

    pub fn is_cache_disabled(&self) -> bool {
        self.caching_disabled
    }

    pub fn metrics(&self) -> &CacheEntryMetrics {
        &self.metrics
    }

    /// Returns the cached value if it may be served at serial `current`
    pub(crate) fn get_if_fresh(&self, current: ChangeSerial) -> Option<Arc<AbstractValue>> {
        if self.caching_disabled {
            return None;
        }
        let slot = self.slot.lock();
        match (&slot.value, slot.computed_at) {
            (Some(value), Some(at)) if at == current => Some(Arc::clone(value)),
            _ => None,
        }
    }

    /// Move the value out of the slot so the producer can update it without
    /// the lock held. The returned guard puts it back when dropped.
    pub(crate) fn take_for_update(&self) -> Result<SlotUpdate<'_>> {
        let mut slot = self.slot.lock();
        slot.computed_at = None;
        let value = slot
            .value
            .take()
            .ok_or_else(|| FrameworkError::CacheEntryReentered {
                description: self.description.clone(),
            })?;
        Ok(SlotUpdate {
            owner: self,
            value,
            computed_at: None,
        })
    }

    fn restore(&self, value: Arc<AbstractValue>, computed_at: Option<ChangeSerial>) {
        let mut slot = self.slot.lock();
        slot.value = Some(value);
        slot.computed_at = computed_at;
    }
}

/// A value taken out of its slot for recomputation
///
/// Dropping the guard without [`commit`] (an error return or a panicking
/// producer) leaves the value in the slot marked out of date.
///
/// [`commit`]: SlotUpdate::commit
pub(crate) struct SlotUpdate<'a> {
    owner: &'a CacheEntryValue,
    value: Arc<AbstractValue>,
    computed_at: Option<ChangeSerial>,
}

impl SlotUpdate<'_> {
    /// The value to overwrite, cloned first if readers still hold it
    pub(crate) fn value_mut(&mut self) -> &mut AbstractValue {
        Arc::make_mut(&mut self.value)
    }

    /// Record the value as computed at `serial` and return it
    pub(crate) fn commit(mut self, serial: ChangeSerial) -> Arc<AbstractValue> {
        self.computed_at = Some(serial);
        Arc::clone(&self.value)
    }
}

impl Drop for SlotUpdate<'_> {
    fn drop(&mut self) {
        self.owner.restore(Arc::clone(&self.value), self.computed_at);
    }
}

impl Clone for CacheEntryValue {
    fn clone(&self) -> Self {
        CacheEntryValue {
            index: self.index,
            ticket: self.ticket,
            description: self.description.clone(),
            slot: Mutex::new(self.slot.lock().clone()),
            caching_disabled: self.caching_disabled,
            metrics: self.metrics.clone(),
        }
    }
}

/// Indexed table of cache entry values owned by one context
#[derive(Debug, Clone, Default)]
pub struct Cache {
    values: Vec<CacheEntryValue>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the value for cache entry `index`, creating its tracker in `graph`
    /// and subscribing it to every prerequisite.
    ///
    /// Entries must arrive in ascending index order, so an entry can only
    /// name trackers that already exist.
    pub fn create_new_cache_entry_value(
        &mut self,
        index: CacheIndex,
        ticket: DependencyTicket,
        description: &str,
        prerequisites: &BTreeSet<DependencyTicket>,
        graph: &mut DependencyGraph,
    ) -> Result<&mut CacheEntryValue> {
        let expected = CacheIndex(self.values.len());
        if index != expected {
            return Err(FrameworkError::CacheEntryOutOfOrder {
                expected,
                actual: index,
            });
        }

        graph
            .create_new_dependency_tracker(ticket, description)?
            .set_cache_index(index);
        for prerequisite in prerequisites {
            graph.subscribe_to_prerequisite(ticket, *prerequisite)?;
        }

        self.values
            .push(CacheEntryValue::new(index, ticket, description.to_string()));
        Ok(&mut self.values[index.as_usize()])
    }

    pub fn get(&self, index: CacheIndex) -> Option<&CacheEntryValue> {
        self.values.get(index.as_usize())
    }

    pub fn get_mut(&mut self, index: CacheIndex) -> Option<&mut CacheEntryValue> {
        self.values.get_mut(index.as_usize())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CacheEntryValue> {
        self.values.iter()
    }

    pub fn disable_caching(&mut self) {
        self.values.iter_mut().for_each(CacheEntryValue::disable_caching);
    }

    pub fn enable_caching(&mut self) {
        self.values.iter_mut().for_each(CacheEntryValue::enable_caching);
    }

    /// Forget every computed value; allocated contents stay in place.
    pub fn mark_all_out_of_date(&mut self) {
        self.values
            .iter_mut()
            .for_each(CacheEntryValue::mark_out_of_date);
    }

    pub fn metrics(&self) -> Vec<MetricsSnapshot> {
        self.values
            .iter()
            .map(|v| v.metrics.snapshot(&v.description))
            .collect()
    }
}

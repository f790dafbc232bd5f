//! Static system declarations and the operations built on them
//!
//! A [`SystemBase`] describes a computational block: its ports, its state and
//! parameter groups, and its cache entries. The description is created once
//! and shared by every context allocated for the system. Each context is
//! filled in by replaying the declarations in a fixed order (sources, then
//! cache entries by ascending index, then output ports), which is what keeps
//! the dependency graph acyclic without a separate cycle check.

use crate::cache::{CacheEntry, ValueAllocator, ValueProducer};
use crate::context::{ContextBase, ContextBaseInternals, ContextId, ContextRef, ContextTree, SourceGroup};
use crate::deprecation::{deprecation_key, process_registry, DeprecationRegistry};
use crate::error::{FrameworkError, Result};
use crate::naming;
use crate::parent::SystemParentService;
use crate::port::{InputPortBase, OutputPortBase, OutputPortPrerequisite, PortBase, PortDataType, PortKind};
use crate::value::{AbstractValue, BasicVector};
use blockflow_types::{CacheIndex, DependencyTicket, InputPortIndex, OutputPortIndex, SystemId};
use once_cell::sync::OnceCell;
use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// A declared source ticket and its description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerInfo {
    pub ticket: DependencyTicket,
    pub description: String,
}

/// Base of every system: declarations plus the evaluation protocol
pub struct SystemBase {
    name: String,
    system_type: &'static str,
    system_id: SystemId,
    parent_service: OnceCell<Weak<dyn SystemParentService>>,
    input_ports: Vec<InputPortBase>,
    output_ports: Vec<OutputPortBase>,
    cache_entries: Vec<CacheEntry>,
    discrete_state_tickets: Vec<TrackerInfo>,
    abstract_state_tickets: Vec<TrackerInfo>,
    numeric_parameter_tickets: Vec<TrackerInfo>,
    abstract_parameter_tickets: Vec<TrackerInfo>,
    next_ticket: DependencyTicket,
    deprecation_registry: Arc<dyn DeprecationRegistry>,
}

impl SystemBase {
    /// Create an empty system whose type tag is the name of `T`
    pub fn new<T: ?Sized + 'static>(name: impl Into<String>) -> Self {
        SystemBase {
            name: name.into(),
            system_type: std::any::type_name::<T>(),
            system_id: SystemId::get_new_id(),
            parent_service: OnceCell::new(),
            input_ports: Vec::new(),
            output_ports: Vec::new(),
            cache_entries: Vec::new(),
            discrete_state_tickets: Vec::new(),
            abstract_state_tickets: Vec::new(),
            numeric_parameter_tickets: Vec::new(),
            abstract_parameter_tickets: Vec::new(),
            next_ticket: DependencyTicket::FIRST_ASSIGNABLE,
            deprecation_registry: process_registry(),
        }
    }

    /// Report deprecated ports through `registry` instead of the
    /// process-wide one
    pub fn with_deprecation_registry(mut self, registry: Arc<dyn DeprecationRegistry>) -> Self {
        self.deprecation_registry = registry;
        self
    }

    // ---------------------------------------------------------------------
    // Identity and naming

    pub fn get_name(&self) -> &str {
        &self.name
    }

    /// The name, or `_` when it is empty
    pub fn get_system_name(&self) -> &str {
        if self.name.is_empty() {
            naming::UNNAMED
        } else {
            &self.name
        }
    }

    /// Human-readable type tag of the concrete system
    pub fn get_system_type(&self) -> &'static str {
        self.system_type
    }

    pub fn get_system_id(&self) -> SystemId {
        self.system_id
    }

    /// Full path from the root, e.g. `::diagram::plant`
    pub fn get_system_pathname(&self) -> String {
        let parent_path = self
            .get_parent_service()
            .map(|p| p.parent_pathname())
            .unwrap_or_default();
        naming::join_pathname(&parent_path, &self.name)
    }

    /// Type name without generics plus this object's address, unique among
    /// live systems
    pub fn get_memory_object_name(&self) -> String {
        naming::memory_object_name(self.system_type, self as *const Self as usize)
    }

    pub fn get_parent_service(&self) -> Option<Arc<dyn SystemParentService>> {
        self.parent_service.get().and_then(Weak::upgrade)
    }

    /// Attach this system to its enclosing coordinator. Can happen once.
    pub fn set_parent_service(&self, parent: Weak<dyn SystemParentService>) -> Result<()> {
        self.parent_service
            .set(parent)
            .map_err(|_| FrameworkError::ParentAlreadySet {
                pathname: self.get_system_pathname(),
            })
    }

    // ---------------------------------------------------------------------
    // Declarations

    pub fn assign_next_dependency_ticket(&mut self) -> DependencyTicket {
        let ticket = self.next_ticket;
        self.next_ticket = ticket.next();
        ticket
    }

    pub fn declare_input_port(
        &mut self,
        name: impl Into<String>,
        data_type: PortDataType,
    ) -> InputPortIndex {
        let index = InputPortIndex(self.input_ports.len());
        let ticket = self.assign_next_dependency_ticket();
        self.input_ports.push(InputPortBase::new(
            name.into(),
            index,
            ticket,
            data_type,
            self.system_id,
        ));
        index
    }

    pub fn declare_output_port(
        &mut self,
        name: impl Into<String>,
        data_type: PortDataType,
        prerequisite: OutputPortPrerequisite,
    ) -> OutputPortIndex {
        let index = OutputPortIndex(self.output_ports.len());
        let ticket = self.assign_next_dependency_ticket();
        self.output_ports.push(OutputPortBase::new(
            name.into(),
            index,
            ticket,
            data_type,
            self.system_id,
            prerequisite,
        ));
        index
    }

    pub fn declare_discrete_state_group(&mut self, description: impl Into<String>) -> DependencyTicket {
        self.declare_source(SourceGroup::DiscreteState, description.into())
    }

    pub fn declare_abstract_state(&mut self, description: impl Into<String>) -> DependencyTicket {
        self.declare_source(SourceGroup::AbstractState, description.into())
    }

    pub fn declare_numeric_parameter(&mut self, description: impl Into<String>) -> DependencyTicket {
        self.declare_source(SourceGroup::NumericParameter, description.into())
    }

    pub fn declare_abstract_parameter(&mut self, description: impl Into<String>) -> DependencyTicket {
        self.declare_source(SourceGroup::AbstractParameter, description.into())
    }

    fn declare_source(&mut self, group: SourceGroup, description: String) -> DependencyTicket {
        let ticket = self.assign_next_dependency_ticket();
        let info = TrackerInfo {
            ticket,
            description,
        };
        match group {
            SourceGroup::DiscreteState => self.discrete_state_tickets.push(info),
            SourceGroup::AbstractState => self.abstract_state_tickets.push(info),
            SourceGroup::NumericParameter => self.numeric_parameter_tickets.push(info),
            SourceGroup::AbstractParameter => self.abstract_parameter_tickets.push(info),
        }
        ticket
    }

    pub fn source_tickets(&self, group: SourceGroup) -> &[TrackerInfo] {
        match group {
            SourceGroup::DiscreteState => &self.discrete_state_tickets,
            SourceGroup::AbstractState => &self.abstract_state_tickets,
            SourceGroup::NumericParameter => &self.numeric_parameter_tickets,
            SourceGroup::AbstractParameter => &self.abstract_parameter_tickets,
        }
    }

    /// Mark an input port deprecated. An empty message is reported as
    /// "no deprecation details were provided".
    pub fn deprecate_input_port(&mut self, index: InputPortIndex, message: impl Into<String>) -> Result<()> {
        let count = self.input_ports.len();
        let pathname = self.get_system_pathname();
        let port = self
            .input_ports
            .get_mut(index.as_usize())
            .ok_or(FrameworkError::InputPortIndexOutOfRange {
                func: "DeprecateInputPort",
                index: index.as_usize(),
                count,
                pathname,
            })?;
        port.base_mut().set_deprecation(message.into());
        Ok(())
    }

    pub fn deprecate_output_port(&mut self, index: OutputPortIndex, message: impl Into<String>) -> Result<()> {
        let count = self.output_ports.len();
        let pathname = self.get_system_pathname();
        let port = self
            .output_ports
            .get_mut(index.as_usize())
            .ok_or(FrameworkError::OutputPortIndexOutOfRange {
                func: "DeprecateOutputPort",
                index: index.as_usize(),
                count,
                pathname,
            })?;
        port.base_mut().set_deprecation(message.into());
        Ok(())
    }

    /// Declare a cache entry with a freshly assigned ticket.
    ///
    /// Fails if `prerequisites` is empty or names a ticket that is neither
    /// built in nor already declared by this system.
    pub fn declare_cache_entry(
        &mut self,
        description: impl Into<String>,
        allocator: ValueAllocator,
        producer: ValueProducer,
        prerequisites: impl IntoIterator<Item = DependencyTicket>,
    ) -> Result<&mut CacheEntry> {
        let ticket = self.assign_next_dependency_ticket();
        self.declare_cache_entry_with_known_ticket(ticket, description, allocator, producer, prerequisites)
    }

    /// Declare a cache entry using a ticket the caller assigned earlier.
    ///
    /// The caller must still keep every prerequisite declared ahead of this
    /// entry; only tickets unknown to the system are rejected here.
    pub fn declare_cache_entry_with_known_ticket(
        &mut self,
        known_ticket: DependencyTicket,
        description: impl Into<String>,
        allocator: ValueAllocator,
        producer: ValueProducer,
        prerequisites: impl IntoIterator<Item = DependencyTicket>,
    ) -> Result<&mut CacheEntry> {
        let description = description.into();
        let prerequisites: BTreeSet<DependencyTicket> = prerequisites.into_iter().collect();

        if let Some(unknown) = prerequisites
            .iter()
            .copied()
            .find(|t| !self.is_known_prerequisite(*t, known_ticket))
        {
            return Err(FrameworkError::UnknownPrerequisite {
                description,
                ticket: unknown,
                pathname: self.get_system_pathname(),
            });
        }

        let index = CacheIndex(self.cache_entries.len());
        let entry = CacheEntry::new(
            index,
            known_ticket,
            description,
            allocator,
            producer,
            prerequisites,
            self.get_system_pathname(),
        )?;
        self.cache_entries.push(entry);
        Ok(&mut self.cache_entries[index.as_usize()])
    }

    /// Declare a cache entry holding a `T`, computed in place by `calc`
    pub fn declare_typed_cache_entry<T, F>(
        &mut self,
        description: impl Into<String>,
        default_value: T,
        calc: F,
        prerequisites: impl IntoIterator<Item = DependencyTicket>,
    ) -> Result<&mut CacheEntry>
    where
        T: Any + Clone + Send + Sync + fmt::Debug,
        F: Fn(&SystemBase, ContextRef<'_>, &mut T) -> Result<()> + Send + Sync + 'static,
    {
        let description = description.into();
        let entry_name = description.clone();
        let allocator: ValueAllocator = Arc::new(move || AbstractValue::new(default_value.clone()));
        let producer: ValueProducer = Arc::new(
            move |system: &SystemBase, context: ContextRef<'_>, value: &mut AbstractValue| -> Result<()> {
                let actual = value.type_name();
                match value.get_mut::<T>() {
                    Some(typed) => calc(system, context, typed),
                    None => Err(FrameworkError::ComputationFailed {
                        description: entry_name.clone(),
                        message: format!(
                            "cached value has type {actual}, expected {}",
                            std::any::type_name::<T>()
                        ),
                    }),
                }
            },
        );
        self.declare_cache_entry(description, allocator, producer, prerequisites)
    }

    fn is_known_prerequisite(&self, ticket: DependencyTicket, own_ticket: DependencyTicket) -> bool {
        if ticket == own_ticket {
            return false;
        }
        if ticket.is_built_in() {
            return true;
        }
        // Nothing inside the system may depend on its own outputs.
        ticket < self.next_ticket && !self.output_ports.iter().any(|p| p.ticket() == ticket)
    }

    // ---------------------------------------------------------------------
    // Accessors

    pub fn num_input_ports(&self) -> usize {
        self.input_ports.len()
    }

    pub fn num_output_ports(&self) -> usize {
        self.output_ports.len()
    }

    pub fn num_cache_entries(&self) -> usize {
        self.cache_entries.len()
    }

    pub fn get_input_port_base(&self, index: InputPortIndex) -> Result<&InputPortBase> {
        self.input_port_checked("get_input_port_base", index)
    }

    pub fn get_output_port_base(&self, index: OutputPortIndex) -> Result<&OutputPortBase> {
        self.output_port_checked("get_output_port_base", index)
    }

    pub fn get_cache_entry(&self, index: CacheIndex) -> Result<&CacheEntry> {
        self.cache_entry_checked("get_cache_entry", index)
    }

    pub fn cache_entries(&self) -> &[CacheEntry] {
        &self.cache_entries
    }

    /// What output port `index` depends on inside this system; consumed by
    /// the coordinator when it wires exported ports.
    pub fn get_output_prerequisite(&self, index: OutputPortIndex) -> Result<OutputPortPrerequisite> {
        Ok(self
            .output_port_checked("GetOutputPrerequisite", index)?
            .get_prerequisite())
    }

    /// Convert a raw, possibly negative, port number into a checked index
    pub fn input_port_index_from_raw(&self, func: &'static str, raw: i64) -> Result<InputPortIndex> {
        if raw < 0 {
            return Err(FrameworkError::NegativePortIndex {
                func,
                index: raw,
                pathname: self.get_system_pathname(),
            });
        }
        let index = InputPortIndex(raw as usize);
        self.input_port_checked(func, index)?;
        Ok(index)
    }

    fn input_port_checked(&self, func: &'static str, index: InputPortIndex) -> Result<&InputPortBase> {
        self.input_ports
            .get(index.as_usize())
            .ok_or_else(|| FrameworkError::InputPortIndexOutOfRange {
                func,
                index: index.as_usize(),
                count: self.input_ports.len(),
                pathname: self.get_system_pathname(),
            })
    }

    fn output_port_checked(&self, func: &'static str, index: OutputPortIndex) -> Result<&OutputPortBase> {
        self.output_ports
            .get(index.as_usize())
            .ok_or_else(|| FrameworkError::OutputPortIndexOutOfRange {
                func,
                index: index.as_usize(),
                count: self.output_ports.len(),
                pathname: self.get_system_pathname(),
            })
    }

    fn cache_entry_checked(&self, func: &'static str, index: CacheIndex) -> Result<&CacheEntry> {
        self.cache_entries
            .get(index.as_usize())
            .ok_or_else(|| FrameworkError::CacheIndexOutOfRange {
                func,
                index: index.as_usize(),
                count: self.cache_entries.len(),
                pathname: self.get_system_pathname(),
            })
    }

    // ---------------------------------------------------------------------
    // Context construction

    /// Add a context for this system to `tree`, below `parent` if given,
    /// and initialize it.
    pub fn create_context(&self, tree: &mut ContextTree, parent: Option<ContextId>) -> Result<ContextId> {
        let id = match parent {
            Some(parent) => tree.add_child_context(parent)?,
            None => tree.add_root_context()?,
        };
        self.initialize_context(tree.get_mut(id)?)?;
        Ok(id)
    }

    /// Replay this system's declarations into a fresh context. Must be called
    /// exactly once per context.
    pub fn initialize_context(&self, context: &mut ContextBase) -> Result<()> {
        if context.is_initialized() {
            return Err(FrameworkError::ContextAlreadyInitialized {
                pathname: self.get_system_pathname(),
            });
        }

        context.set_system_name(&self.name);
        context.set_system_id(self.system_id);

        self.create_source_trackers(context)?;

        // Entry i may only name sources and entries 0..i, all of which
        // already have trackers by the time it is reached.
        let caching_enabled = context.caching_enabled();
        let (graph, cache) = context.graph_and_cache();
        for entry in &self.cache_entries {
            let value = cache.create_new_cache_entry_value(
                entry.cache_index(),
                entry.ticket(),
                entry.description(),
                entry.prerequisites(),
                graph,
            )?;
            value.set_initial_value(entry.allocate());
            if entry.is_disabled_by_default() || !caching_enabled {
                value.disable_caching();
            }
        }

        // Output trackers come last; nothing in this system may subscribe to
        // them.
        for port in &self.output_ports {
            context.add_output_port(port.get_index(), port.ticket(), port.get_prerequisite())?;
        }

        context.mark_initialized();
        debug!(
            system = %self.get_system_pathname(),
            trackers = context.dependency_graph().num_trackers(),
            cache_entries = context.cache().len(),
            "context initialized"
        );
        Ok(())
    }

    fn create_source_trackers(&self, context: &mut ContextBase) -> Result<()> {
        for group in [
            SourceGroup::DiscreteState,
            SourceGroup::AbstractState,
            SourceGroup::NumericParameter,
            SourceGroup::AbstractParameter,
        ] {
            let aggregate = group.aggregate_ticket();
            for info in self.source_tickets(group) {
                let graph = context.mutable_dependency_graph();
                graph.create_new_dependency_tracker(info.ticket, info.description.as_str())?;
                graph.subscribe_to_prerequisite(aggregate, info.ticket)?;
                context.add_source_ticket(group, info.ticket);
            }
        }

        for port in &self.input_ports {
            context.add_input_port(port.get_index(), port.ticket(), port.get_name(), port.data_type().clone())?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Context validation

    /// Check that `context` was initialized by this system
    pub fn validate_context(&self, context: ContextRef<'_>) -> Result<()> {
        match context.get_system_id() {
            Some(id) if id == self.system_id => Ok(()),
            None => Err(FrameworkError::NotAssociatedWithSystem {
                object: "Context",
                system_type: self.system_type.to_string(),
                pathname: self.get_system_pathname(),
            }),
            Some(_) => Err(self.diagnose_context_mismatch(context)),
        }
    }

    fn diagnose_context_mismatch(&self, context: ContextRef<'_>) -> FrameworkError {
        if let Some(parent) = self.get_parent_service() {
            if context.get_system_id() == Some(parent.root_system_id()) {
                return FrameworkError::RootContextPassedToSubsystem {
                    system_type: self.system_type.to_string(),
                    pathname: self.get_system_pathname(),
                };
            }
        }

        if context.root().get_system_id() == Some(self.system_id) {
            return FrameworkError::SubcontextPassedToRoot {
                subcontext_pathname: context.get_system_pathname(),
            };
        }

        FrameworkError::ContextMismatch {
            system_type: self.system_type.to_string(),
            pathname: self.get_system_pathname(),
            context_pathname: context.get_system_pathname(),
        }
    }

    // ---------------------------------------------------------------------
    // Input evaluation

    /// Value of input port `index`: the fixed value if there is one, else
    /// whatever the parent coordinator resolves it to. `None` means the port
    /// is unconnected.
    pub fn eval_abstract_input(
        &self,
        context: ContextRef<'_>,
        index: InputPortIndex,
    ) -> Result<Option<Arc<AbstractValue>>> {
        self.validate_context(context)?;
        self.eval_abstract_input_impl("EvalAbstractInput", context, index)
    }

    fn eval_abstract_input_impl(
        &self,
        func: &'static str,
        context: ContextRef<'_>,
        index: InputPortIndex,
    ) -> Result<Option<Arc<AbstractValue>>> {
        let port = self.input_port_checked(func, index)?;

        if port.base().get_deprecation().is_some() && context.config().deprecation_warnings {
            self.warn_port_deprecation(PortKind::Input, index.as_usize());
        }

        if let Some(fixed) = context.maybe_get_fixed_input_port_value(index) {
            return Ok(Some(Arc::clone(fixed)));
        }

        // A root system's ports can only be satisfied by fixing them.
        let Some(parent) = self.get_parent_service() else {
            return Ok(None);
        };
        let Some(parent_context) = context.parent() else {
            return Ok(None);
        };

        parent.eval_connected_subsystem_input_port(parent_context, port)
    }

    /// Input value downcast to `T`
    pub fn eval_input_value<T: Any + Clone>(
        &self,
        context: ContextRef<'_>,
        index: InputPortIndex,
    ) -> Result<Option<T>> {
        self.validate_context(context)?;
        let Some(value) = self.eval_abstract_input_impl("EvalInputValue", context, index)? else {
            return Ok(None);
        };
        match value.get::<T>() {
            Some(typed) => Ok(Some(typed.clone())),
            None => Err(FrameworkError::InputPortWrongType {
                func: "EvalInputValue",
                port_name: self.input_ports[index.as_usize()].get_name().to_string(),
                index: index.as_usize(),
                expected: std::any::type_name::<T>().to_string(),
                actual: value.type_name().to_string(),
                pathname: self.get_system_pathname(),
            }),
        }
    }

    /// Input value of a vector-valued port
    pub fn eval_vector_input(
        &self,
        context: ContextRef<'_>,
        index: InputPortIndex,
    ) -> Result<Option<BasicVector>> {
        self.validate_context(context)?;
        let port = self.input_port_checked("EvalVectorInput", index)?;
        if !port.data_type().is_vector() {
            return Err(FrameworkError::NotAVectorInputPort {
                func: "EvalVectorInput",
                port_name: port.get_name().to_string(),
                index: index.as_usize(),
                pathname: self.get_system_pathname(),
            });
        }
        self.eval_input_value::<BasicVector>(context, index)
    }

    /// Like [`eval_abstract_input`], but an unconnected port is an error
    ///
    /// [`eval_abstract_input`]: SystemBase::eval_abstract_input
    pub fn eval_required_input(
        &self,
        context: ContextRef<'_>,
        index: InputPortIndex,
    ) -> Result<Arc<AbstractValue>> {
        self.validate_context(context)?;
        self.eval_abstract_input_impl("EvalRequiredInput", context, index)?
            .ok_or_else(|| FrameworkError::CantEvaluateInputPort {
                func: "EvalRequiredInput",
                port_name: self.input_ports[index.as_usize()].get_name().to_string(),
                index: index.as_usize(),
                pathname: self.get_system_pathname(),
            })
    }

    // ---------------------------------------------------------------------
    // Cache and output evaluation

    /// Current value of cache entry `index`, recomputing it only if one of
    /// its prerequisites changed since it was last computed
    pub fn eval_cache_entry(&self, context: ContextRef<'_>, index: CacheIndex) -> Result<Arc<AbstractValue>> {
        self.validate_context(context)?;
        self.eval_cache_entry_impl(context, index)
    }

    fn eval_cache_entry_impl(&self, context: ContextRef<'_>, index: CacheIndex) -> Result<Arc<AbstractValue>> {
        let entry = self.cache_entry_checked("EvalCacheEntry", index)?;
        let value = context
            .cache()
            .get(index)
            .ok_or_else(|| FrameworkError::CacheIndexOutOfRange {
                func: "EvalCacheEntry",
                index: index.as_usize(),
                count: context.cache().len(),
                pathname: context.get_system_pathname(),
            })?;

        let serial = context
            .dependency_graph()
            .get_tracker(value.ticket())?
            .change_serial();
        if let Some(hit) = value.get_if_fresh(serial) {
            value.metrics().record_hit();
            return Ok(hit);
        }

        // Dropping the update on any early exit puts the value back stale.
        let mut update = value.take_for_update()?;
        let started = Instant::now();
        let outcome = entry.calc(self, context, update.value_mut());
        value.metrics().record_computation(started.elapsed());
        outcome?;

        trace!(entry = entry.description(), serial = %serial, "cache entry recomputed");
        Ok(update.commit(serial))
    }

    /// Value of output port `index`, computed by the cache entry named as
    /// its intra-system prerequisite
    pub fn eval_output(&self, context: ContextRef<'_>, index: OutputPortIndex) -> Result<Arc<AbstractValue>> {
        const FUNC: &str = "EvalOutput";

        self.validate_context(context)?;
        let port = self.output_port_checked(FUNC, index)?;

        if port.base().get_deprecation().is_some() && context.config().deprecation_warnings {
            self.warn_port_deprecation(PortKind::Output, index.as_usize());
        }

        let prerequisite = port.get_prerequisite();
        let cache_index = prerequisite
            .child_subsystem
            .is_none()
            .then(|| {
                self.cache_entries
                    .iter()
                    .find(|e| e.ticket() == prerequisite.dependency)
                    .map(CacheEntry::cache_index)
            })
            .flatten();

        match cache_index {
            Some(cache_index) => self.eval_cache_entry_impl(context, cache_index),
            None => Err(FrameworkError::OutputNotCacheBacked {
                func: FUNC,
                port_name: port.get_name().to_string(),
                index: index.as_usize(),
                pathname: self.get_system_pathname(),
            }),
        }
    }

    // ---------------------------------------------------------------------
    // Deprecation

    /// Report a deprecated port, at most once per process for each
    /// (system type, direction, port name). Returns true if a warning was
    /// emitted by this call. Evaluation only calls this when
    /// `FrameworkConfig::deprecation_warnings` is on; direct calls always report.
    pub fn warn_port_deprecation(&self, kind: PortKind, index: usize) -> bool {
        let port: Option<&PortBase> = match kind {
            PortKind::Input => self.input_ports.get(index).map(InputPortBase::base),
            PortKind::Output => self.output_ports.get(index).map(OutputPortBase::base),
        };
        let Some(port) = port else {
            return false;
        };
        let Some(deprecation) = port.get_deprecation() else {
            return false;
        };

        if port.exchange_deprecation_warned() {
            return false;
        }

        let key = deprecation_key(self.system_type, kind == PortKind::Input, port.get_name());
        if !self.deprecation_registry.insert_if_absent(key) {
            return false;
        }

        let description = port.get_full_description(&self.get_system_pathname(), self.system_type);
        let message = if deprecation.is_empty() {
            "no deprecation details were provided"
        } else {
            deprecation
        };
        warn!("{} is deprecated: {}", description, message);
        true
    }
}

impl fmt::Debug for SystemBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemBase")
            .field("name", &self.name)
            .field("system_type", &self.system_type)
            .field("system_id", &self.system_id)
            .field("input_ports", &self.input_ports.len())
            .field("output_ports", &self.output_ports.len())
            .field("cache_entries", &self.cache_entries.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deprecation::WarnedPortSet;

    struct Plant;
    struct OtherPlant;

    fn counter_system() -> (SystemBase, CacheIndex) {
        let mut system = SystemBase::new::<Plant>("plant");
        let u = system.declare_input_port("u", PortDataType::abstract_of::<f64>());
        let ticket = system.get_input_port_base(u).unwrap().ticket();
        let entry = system
            .declare_typed_cache_entry(
                "doubled",
                0.0_f64,
                move |sys: &SystemBase, ctx: ContextRef<'_>, out: &mut f64| {
                    *out = 2.0 * sys.eval_input_value::<f64>(ctx, u)?.unwrap_or(0.0);
                    Ok(())
                },
                [ticket],
            )
            .unwrap()
            .cache_index();
        (system, entry)
    }

    #[test]
    fn test_tickets_assigned_after_built_ins() {
        let mut system = SystemBase::new::<Plant>("plant");
        let u = system.declare_input_port("u", PortDataType::vector(1));
        assert_eq!(
            system.get_input_port_base(u).unwrap().ticket(),
            DependencyTicket::FIRST_ASSIGNABLE
        );
        assert_eq!(system.assign_next_dependency_ticket(), DependencyTicket::FIRST_ASSIGNABLE.next());
    }

    #[test]
    fn test_empty_prerequisites_rejected() {
        let mut system = SystemBase::new::<Plant>("plant");
        let err = system
            .declare_typed_cache_entry("bad", 0_u8, |_: &SystemBase, _: ContextRef<'_>, _: &mut u8| Ok(()), [])
            .unwrap_err();
        assert!(matches!(err, FrameworkError::EmptyPrerequisites { .. }));
        assert_eq!(system.num_cache_entries(), 0);
    }

    #[test]
    fn test_unknown_prerequisite_rejected() {
        let mut system = SystemBase::new::<Plant>("plant");
        let err = system
            .declare_typed_cache_entry(
                "bad",
                0_u8,
                |_: &SystemBase, _: ContextRef<'_>, _: &mut u8| Ok(()),
                [DependencyTicket(500)],
            )
            .unwrap_err();
        assert!(matches!(err, FrameworkError::UnknownPrerequisite { ticket, .. } if ticket == DependencyTicket(500)));
    }

    #[test]
    fn test_output_ticket_is_not_a_valid_prerequisite() {
        let mut system = SystemBase::new::<Plant>("plant");
        let y = system.declare_output_port(
            "y",
            PortDataType::vector(1),
            OutputPortPrerequisite::internal(DependencyTicket::TIME),
        );
        let y_ticket = system.get_output_port_base(y).unwrap().ticket();
        let err = system
            .declare_typed_cache_entry("bad", 0_u8, |_: &SystemBase, _: ContextRef<'_>, _: &mut u8| Ok(()), [y_ticket])
            .unwrap_err();
        assert!(matches!(err, FrameworkError::UnknownPrerequisite { .. }));
    }

    #[test]
    fn test_known_ticket_ordering_checked_at_replay() {
        let mut system = SystemBase::new::<Plant>("plant");
        let first = system.assign_next_dependency_ticket();
        let second = system.assign_next_dependency_ticket();
        let noop = |_: &SystemBase, _: ContextRef<'_>, _: &mut u8| -> Result<()> { Ok(()) };

        // Entry 0 names entry 1, which has no tracker yet when 0 is replayed.
        system
            .declare_typed_cache_entry("placeholder", 0_u8, noop, [DependencyTicket::TIME])
            .unwrap();
        let err = system
            .declare_cache_entry_with_known_ticket(
                first,
                "self",
                Arc::new(|| AbstractValue::new(0_u8)),
                Arc::new(|_: &SystemBase, _: ContextRef<'_>, _: &mut AbstractValue| -> Result<()> { Ok(()) }),
                [first],
            )
            .unwrap_err();
        assert!(matches!(err, FrameworkError::UnknownPrerequisite { .. }));

        system
            .declare_cache_entry_with_known_ticket(
                first,
                "early",
                Arc::new(|| AbstractValue::new(0_u8)),
                Arc::new(|_: &SystemBase, _: ContextRef<'_>, _: &mut AbstractValue| -> Result<()> { Ok(()) }),
                [second],
            )
            .unwrap();
        system
            .declare_cache_entry_with_known_ticket(
                second,
                "late",
                Arc::new(|| AbstractValue::new(0_u8)),
                Arc::new(|_: &SystemBase, _: ContextRef<'_>, _: &mut AbstractValue| -> Result<()> { Ok(()) }),
                [DependencyTicket::TIME],
            )
            .unwrap();

        let mut tree = ContextTree::new();
        let err = system.create_context(&mut tree, None).unwrap_err();
        assert!(matches!(err, FrameworkError::UnknownTracker { ticket } if ticket == second));
    }

    #[test]
    fn test_reinitialization_fails() {
        let (system, _) = counter_system();
        let mut tree = ContextTree::new();
        let id = system.create_context(&mut tree, None).unwrap();

        let err = system.initialize_context(tree.get_mut(id).unwrap()).unwrap_err();
        assert!(matches!(err, FrameworkError::ContextAlreadyInitialized { .. }));
    }

    #[test]
    fn test_cache_recomputes_only_after_change() {
        let (system, entry) = counter_system();
        let mut tree = ContextTree::new();
        let id = system.create_context(&mut tree, None).unwrap();
        tree.fix_input_port(id, InputPortIndex(0), AbstractValue::new(1.5_f64)).unwrap();

        let first = system.eval_cache_entry(tree.get(id).unwrap(), entry).unwrap();
        assert_eq!(first.get::<f64>(), Some(&3.0));
        system.eval_cache_entry(tree.get(id).unwrap(), entry).unwrap();

        let metrics = tree.get_base(id).unwrap().cache().metrics();
        assert_eq!(metrics[0].computations, 1);
        assert_eq!(metrics[0].hits, 1);

        tree.fix_input_port(id, InputPortIndex(0), AbstractValue::new(4.0_f64)).unwrap();
        let second = system.eval_cache_entry(tree.get(id).unwrap(), entry).unwrap();
        assert_eq!(second.get::<f64>(), Some(&8.0));
    }

    #[test]
    fn test_negative_port_index() {
        let (system, _) = counter_system();
        let err = system.input_port_index_from_raw("EvalInput", -1).unwrap_err();
        insta::assert_snapshot!(
            err.to_string(),
            @"System::EvalInput(): negative port index -1 is illegal. (System ::plant)"
        );
    }

    #[test]
    fn test_deprecation_warns_once_per_type_and_port() {
        let registry = Arc::new(WarnedPortSet::new());

        let make = |registry: &Arc<WarnedPortSet>| {
            let mut system = SystemBase::new::<Plant>("plant")
                .with_deprecation_registry(registry.clone());
            let u = system.declare_input_port("u", PortDataType::vector(1));
            system.deprecate_input_port(u, "use v instead").unwrap();
            system
        };

        let first = make(&registry);
        let second = make(&registry);
        assert!(first.warn_port_deprecation(PortKind::Input, 0));
        assert!(!first.warn_port_deprecation(PortKind::Input, 0));
        assert!(!second.warn_port_deprecation(PortKind::Input, 0));

        let mut other = SystemBase::new::<OtherPlant>("plant")
            .with_deprecation_registry(registry.clone());
        let u = other.declare_input_port("u", PortDataType::vector(1));
        other.deprecate_input_port(u, "").unwrap();
        assert!(other.warn_port_deprecation(PortKind::Input, 0));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_system_names() {
        let system = SystemBase::new::<Plant>("");
        assert_eq!(system.get_system_name(), "_");
        assert_eq!(system.get_system_pathname(), "::_");
        assert!(system.get_system_type().ends_with("Plant"));

        let memory_name = system.get_memory_object_name();
        let (type_part, address) = memory_name.split_once('@').unwrap();
        assert!(type_part.ends_with("/Plant"));
        assert_eq!(address.len(), 16);
    }
}

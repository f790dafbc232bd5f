//! Runtime contexts
//!
//! A context is the per-instance runtime state of one system: its
//! dependency graph, its cache and the values fixed on its input ports.
//! Contexts of a system hierarchy form a tree that mirrors the systems; the
//! tree is stored as an arena in [`ContextTree`] and nodes refer to each
//! other by [`ContextId`].
//!
//! A context is filled in by replaying its system's declarations exactly
//! once (see `SystemBase::initialize_context`). The mutators that replay
//! needs are exposed to the system through the crate-private
//! [`ContextBaseInternals`] capability rather than the public API.

use crate::cache::Cache;
use crate::config::FrameworkConfig;
use crate::error::{FrameworkError, Result};
use crate::naming;
use crate::port::{OutputPortPrerequisite, PortDataType};
use crate::tracker::DependencyGraph;
use crate::value::AbstractValue;
use blockflow_types::{DependencyTicket, InputPortIndex, OutputPortIndex, SubsystemIndex, SystemId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tracing::debug;

/// Handle of a context within its [`ContextTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(usize);

impl ContextId {
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx{}", self.0)
    }
}

/// A tracker addressed across the whole tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackerLocation {
    pub context: ContextId,
    pub ticket: DependencyTicket,
}

/// Groups of independent sources whose trackers are created during replay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceGroup {
    DiscreteState,
    AbstractState,
    NumericParameter,
    AbstractParameter,
}

impl SourceGroup {
    /// The built-in tracker that subscribes to every member of the group
    pub fn aggregate_ticket(&self) -> DependencyTicket {
        match self {
            SourceGroup::DiscreteState => DependencyTicket::XD,
            SourceGroup::AbstractState => DependencyTicket::XA,
            SourceGroup::NumericParameter => DependencyTicket::PN,
            SourceGroup::AbstractParameter => DependencyTicket::PA,
        }
    }
}

#[derive(Debug, Clone)]
struct InputPortSlot {
    name: String,
    ticket: DependencyTicket,
    data_type: PortDataType,
    fixed_value: Option<Arc<AbstractValue>>,
}

/// Runtime state of a single system
#[derive(Debug, Clone)]
pub struct ContextBase {
    id: ContextId,
    parent: Option<ContextId>,
    children: Vec<ContextId>,
    system_name: String,
    system_id: Option<SystemId>,
    graph: DependencyGraph,
    cache: Cache,
    discrete_state_tickets: Vec<DependencyTicket>,
    abstract_state_tickets: Vec<DependencyTicket>,
    numeric_parameter_tickets: Vec<DependencyTicket>,
    abstract_parameter_tickets: Vec<DependencyTicket>,
    input_ports: Vec<InputPortSlot>,
    output_port_tickets: Vec<DependencyTicket>,
    caching_enabled: bool,
    is_initialized: bool,
}

impl ContextBase {
    fn new(id: ContextId, parent: Option<ContextId>, caching_enabled: bool) -> Result<Self> {
        let mut context = ContextBase {
            id,
            parent,
            children: Vec::new(),
            system_name: String::new(),
            system_id: None,
            graph: DependencyGraph::new(),
            cache: Cache::new(),
            discrete_state_tickets: Vec::new(),
            abstract_state_tickets: Vec::new(),
            numeric_parameter_tickets: Vec::new(),
            abstract_parameter_tickets: Vec::new(),
            input_ports: Vec::new(),
            output_port_tickets: Vec::new(),
            caching_enabled,
            is_initialized: false,
        };
        context.create_built_in_trackers()?;
        Ok(context)
    }

    fn create_built_in_trackers(&mut self) -> Result<()> {
        use DependencyTicket as T;

        let graph = &mut self.graph;
        for (ticket, description) in [
            (T::NOTHING, "nothing"),
            (T::TIME, "t"),
            (T::ACCURACY, "accuracy"),
            (T::XC, "xc"),
            (T::XD, "xd"),
            (T::XA, "xa"),
            (T::X, "x"),
            (T::PN, "pn"),
            (T::PA, "pa"),
            (T::ALL_PARAMETERS, "p"),
            (T::ALL_INPUT_PORTS, "u"),
            (T::ALL_SOURCES_EXCEPT_INPUT_PORTS, "all sources except input ports"),
            (T::ALL_SOURCES, "all sources"),
        ] {
            graph.create_new_dependency_tracker(ticket, description)?;
        }

        for (subscriber, prerequisite) in [
            (T::X, T::XC),
            (T::X, T::XD),
            (T::X, T::XA),
            (T::ALL_PARAMETERS, T::PN),
            (T::ALL_PARAMETERS, T::PA),
            (T::ALL_SOURCES_EXCEPT_INPUT_PORTS, T::TIME),
            (T::ALL_SOURCES_EXCEPT_INPUT_PORTS, T::ACCURACY),
            (T::ALL_SOURCES_EXCEPT_INPUT_PORTS, T::X),
            (T::ALL_SOURCES_EXCEPT_INPUT_PORTS, T::ALL_PARAMETERS),
            (T::ALL_SOURCES, T::ALL_SOURCES_EXCEPT_INPUT_PORTS),
            (T::ALL_SOURCES, T::ALL_INPUT_PORTS),
        ] {
            graph.subscribe_to_prerequisite(subscriber, prerequisite)?;
        }
        Ok(())
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn parent_id(&self) -> Option<ContextId> {
        self.parent
    }

    pub fn children(&self) -> &[ContextId] {
        &self.children
    }

    pub fn is_root_context(&self) -> bool {
        self.parent.is_none()
    }

    pub fn system_name(&self) -> &str {
        &self.system_name
    }

    /// Identity of the system that initialized this context
    pub fn get_system_id(&self) -> Option<SystemId> {
        self.system_id
    }

    pub fn is_initialized(&self) -> bool {
        self.is_initialized
    }

    pub fn dependency_graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut Cache {
        &mut self.cache
    }

    pub fn num_input_ports(&self) -> usize {
        self.input_ports.len()
    }

    pub fn num_output_ports(&self) -> usize {
        self.output_port_tickets.len()
    }

    pub fn input_port_ticket(&self, index: InputPortIndex) -> Option<DependencyTicket> {
        self.input_ports.get(index.as_usize()).map(|p| p.ticket)
    }

    pub fn output_port_ticket(&self, index: OutputPortIndex) -> Option<DependencyTicket> {
        self.output_port_tickets.get(index.as_usize()).copied()
    }

    pub fn source_tickets(&self, group: SourceGroup) -> &[DependencyTicket] {
        match group {
            SourceGroup::DiscreteState => &self.discrete_state_tickets,
            SourceGroup::AbstractState => &self.abstract_state_tickets,
            SourceGroup::NumericParameter => &self.numeric_parameter_tickets,
            SourceGroup::AbstractParameter => &self.abstract_parameter_tickets,
        }
    }

    /// The value fixed on input port `index`, if any
    pub fn maybe_get_fixed_input_port_value(
        &self,
        index: InputPortIndex,
    ) -> Option<&Arc<AbstractValue>> {
        self.input_ports
            .get(index.as_usize())
            .and_then(|p| p.fixed_value.as_ref())
    }

    pub fn caching_enabled(&self) -> bool {
        self.caching_enabled
    }
}

/// Mutators used only while a system replays its declarations
pub(crate) trait ContextBaseInternals {
    fn set_system_name(&mut self, name: &str);
    fn set_system_id(&mut self, id: SystemId);
    fn mutable_dependency_graph(&mut self) -> &mut DependencyGraph;
    fn graph_and_cache(&mut self) -> (&mut DependencyGraph, &mut Cache);
    fn add_source_ticket(&mut self, group: SourceGroup, ticket: DependencyTicket);
    fn add_input_port(
        &mut self,
        index: InputPortIndex,
        ticket: DependencyTicket,
        name: &str,
        data_type: PortDataType,
    ) -> Result<()>;
    fn add_output_port(
        &mut self,
        index: OutputPortIndex,
        ticket: DependencyTicket,
        prerequisite: OutputPortPrerequisite,
    ) -> Result<()>;
    fn mark_initialized(&mut self);
}

impl ContextBaseInternals for ContextBase {
    fn set_system_name(&mut self, name: &str) {
        self.system_name = name.to_string();
    }

    fn set_system_id(&mut self, id: SystemId) {
        self.system_id = Some(id);
    }

    fn mutable_dependency_graph(&mut self) -> &mut DependencyGraph {
        &mut self.graph
    }

    fn graph_and_cache(&mut self) -> (&mut DependencyGraph, &mut Cache) {
        (&mut self.graph, &mut self.cache)
    }

    fn add_source_ticket(&mut self, group: SourceGroup, ticket: DependencyTicket) {
        match group {
            SourceGroup::DiscreteState => self.discrete_state_tickets.push(ticket),
            SourceGroup::AbstractState => self.abstract_state_tickets.push(ticket),
            SourceGroup::NumericParameter => self.numeric_parameter_tickets.push(ticket),
            SourceGroup::AbstractParameter => self.abstract_parameter_tickets.push(ticket),
        }
    }

    fn add_input_port(
        &mut self,
        index: InputPortIndex,
        ticket: DependencyTicket,
        name: &str,
        data_type: PortDataType,
    ) -> Result<()> {
        debug_assert_eq!(index.as_usize(), self.input_ports.len());
        self.graph
            .create_new_dependency_tracker(ticket, format!("u{index}"))?;
        self.graph
            .subscribe_to_prerequisite(DependencyTicket::ALL_INPUT_PORTS, ticket)?;
        self.input_ports.push(InputPortSlot {
            name: name.to_string(),
            ticket,
            data_type,
            fixed_value: None,
        });
        Ok(())
    }

    fn add_output_port(
        &mut self,
        index: OutputPortIndex,
        ticket: DependencyTicket,
        prerequisite: OutputPortPrerequisite,
    ) -> Result<()> {
        debug_assert_eq!(index.as_usize(), self.output_port_tickets.len());
        self.graph
            .create_new_dependency_tracker(ticket, format!("y{index}"))?;
        // Exported ports are wired by the coordinator that owns the child.
        if prerequisite.child_subsystem.is_none() {
            self.graph
                .subscribe_to_prerequisite(ticket, prerequisite.dependency)?;
        }
        self.output_port_tickets.push(ticket);
        Ok(())
    }

    fn mark_initialized(&mut self) {
        self.is_initialized = true;
    }
}

/// Arena holding a tree of contexts
#[derive(Debug, Clone, Default)]
pub struct ContextTree {
    contexts: Vec<ContextBase>,
    // Prerequisite tracker -> trackers in other contexts subscribed to it.
    links: HashMap<TrackerLocation, Vec<TrackerLocation>>,
    config: FrameworkConfig,
}

impl ContextTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: FrameworkConfig) -> Self {
        ContextTree {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &FrameworkConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Add an empty context holding only the built-in trackers
    pub fn add_root_context(&mut self) -> Result<ContextId> {
        self.push_context(None)
    }

    /// Add an empty context below `parent`. Children are numbered in
    /// insertion order, matching the parent system's subsystem indices.
    pub fn add_child_context(&mut self, parent: ContextId) -> Result<ContextId> {
        self.get_base(parent)?;
        let id = self.push_context(Some(parent))?;
        self.contexts[parent.0].children.push(id);
        Ok(id)
    }

    fn push_context(&mut self, parent: Option<ContextId>) -> Result<ContextId> {
        let id = ContextId(self.contexts.len());
        self.contexts
            .push(ContextBase::new(id, parent, self.config.caching_enabled)?);
        Ok(id)
    }

    pub fn get(&self, id: ContextId) -> Result<ContextRef<'_>> {
        self.get_base(id)?;
        Ok(ContextRef { tree: self, id })
    }

    pub fn get_base(&self, id: ContextId) -> Result<&ContextBase> {
        self.contexts
            .get(id.0)
            .ok_or(FrameworkError::UnknownContext { id: id.0 })
    }

    pub fn get_mut(&mut self, id: ContextId) -> Result<&mut ContextBase> {
        self.contexts
            .get_mut(id.0)
            .ok_or(FrameworkError::UnknownContext { id: id.0 })
    }

    /// Record that the source `ticket` of context `id` changed, stamping
    /// every downstream tracker, including those reached through
    /// cross-context subscriptions. Returns the number of trackers touched.
    pub fn note_value_change(&mut self, id: ContextId, ticket: DependencyTicket) -> Result<usize> {
        let mut pending = vec![TrackerLocation { context: id, ticket }];
        let mut visited = HashSet::new();
        let mut total = 0;

        while let Some(location) = pending.pop() {
            if !visited.insert(location) {
                continue;
            }
            let touched = self
                .get_mut(location.context)?
                .graph
                .note_value_change(location.ticket)?;
            total += touched.len();
            for ticket in touched {
                let key = TrackerLocation {
                    context: location.context,
                    ticket,
                };
                if let Some(subscribers) = self.links.get(&key) {
                    pending.extend(subscribers.iter().copied());
                }
            }
        }

        debug!(context = %id, ticket = %ticket, touched = total, "value change propagated");
        Ok(total)
    }

    /// Fix the value of input port `port` of context `id`, replacing any
    /// earlier fixed value. The value must match the port's data type.
    pub fn fix_input_port(
        &mut self,
        id: ContextId,
        port: InputPortIndex,
        value: AbstractValue,
    ) -> Result<Arc<AbstractValue>> {
        const FUNC: &str = "FixInputPort";

        let pathname = self.get(id)?.get_system_pathname();
        let context = self.get_mut(id)?;
        let count = context.input_ports.len();
        let slot = context
            .input_ports
            .get_mut(port.as_usize())
            .ok_or_else(|| FrameworkError::InputPortIndexOutOfRange {
                func: FUNC,
                index: port.as_usize(),
                count,
                pathname: pathname.clone(),
            })?;

        if let Some((expected, actual)) = slot.data_type.mismatch(&value) {
            return Err(FrameworkError::InputPortWrongType {
                func: FUNC,
                port_name: slot.name.clone(),
                index: port.as_usize(),
                expected,
                actual,
                pathname,
            });
        }

        let value = Arc::new(value);
        slot.fixed_value = Some(Arc::clone(&value));
        let ticket = slot.ticket;
        self.note_value_change(id, ticket)?;
        Ok(value)
    }

    /// Remove a fixed value; the port goes back to being resolved through
    /// the parent coordinator.
    pub fn clear_fixed_input_port(&mut self, id: ContextId, port: InputPortIndex) -> Result<()> {
        let pathname = self.get(id)?.get_system_pathname();
        let context = self.get_mut(id)?;
        let count = context.input_ports.len();
        let slot = context
            .input_ports
            .get_mut(port.as_usize())
            .ok_or(FrameworkError::InputPortIndexOutOfRange {
                func: "ClearFixedInputPort",
                index: port.as_usize(),
                count,
                pathname,
            })?;
        if slot.fixed_value.take().is_some() {
            let ticket = slot.ticket;
            self.note_value_change(id, ticket)?;
        }
        Ok(())
    }

    /// Make the tracker at `subscriber` depend on the tracker at
    /// `prerequisite`, typically in another context. Both trackers must
    /// exist. The subscriber is treated as changed.
    pub fn subscribe_across(&mut self, subscriber: TrackerLocation, prerequisite: TrackerLocation) -> Result<()> {
        for location in [subscriber, prerequisite] {
            self.get_base(location.context)?
                .graph
                .get_tracker(location.ticket)?;
        }

        let subscribers = self.links.entry(prerequisite).or_default();
        if !subscribers.contains(&subscriber) {
            subscribers.push(subscriber);
        }

        self.note_value_change(subscriber.context, subscriber.ticket)?;
        Ok(())
    }

    /// Feed the input port `input` of `consumer` from the output port
    /// `output` of its sibling `producer`.
    pub fn subscribe_input_to_output(
        &mut self,
        consumer: ContextId,
        input: InputPortIndex,
        producer: ContextId,
        output: OutputPortIndex,
    ) -> Result<()> {
        const FUNC: &str = "SubscribeInputToOutput";
        let subscriber = self.input_location(FUNC, consumer, input)?;
        let prerequisite = self.output_location(FUNC, producer, output)?;
        self.subscribe_across(subscriber, prerequisite)
    }

    /// Feed the input port `input` of the child context `child` from the
    /// input port `exported` of its parent, for a parent input that is
    /// exported to the child.
    pub fn subscribe_input_to_input(
        &mut self,
        child: ContextId,
        input: InputPortIndex,
        parent: ContextId,
        exported: InputPortIndex,
    ) -> Result<()> {
        const FUNC: &str = "SubscribeInputToInput";
        let subscriber = self.input_location(FUNC, child, input)?;
        let prerequisite = self.input_location(FUNC, parent, exported)?;
        self.subscribe_across(subscriber, prerequisite)
    }

    /// Make the exported output port `exported` of `parent` depend on the
    /// output port `output` of the child context `child`.
    pub fn subscribe_output_to_output(
        &mut self,
        parent: ContextId,
        exported: OutputPortIndex,
        child: ContextId,
        output: OutputPortIndex,
    ) -> Result<()> {
        const FUNC: &str = "SubscribeOutputToOutput";
        let subscriber = self.output_location(FUNC, parent, exported)?;
        let prerequisite = self.output_location(FUNC, child, output)?;
        self.subscribe_across(subscriber, prerequisite)
    }

    fn input_location(&self, func: &'static str, id: ContextId, port: InputPortIndex) -> Result<TrackerLocation> {
        let context = self.get(id)?;
        let ticket = context
            .input_port_ticket(port)
            .ok_or_else(|| FrameworkError::InputPortIndexOutOfRange {
                func,
                index: port.as_usize(),
                count: context.num_input_ports(),
                pathname: context.get_system_pathname(),
            })?;
        Ok(TrackerLocation { context: id, ticket })
    }

    fn output_location(&self, func: &'static str, id: ContextId, port: OutputPortIndex) -> Result<TrackerLocation> {
        let context = self.get(id)?;
        let ticket = context
            .output_port_ticket(port)
            .ok_or_else(|| FrameworkError::OutputPortIndexOutOfRange {
                func,
                index: port.as_usize(),
                count: context.num_output_ports(),
                pathname: context.get_system_pathname(),
            })?;
        Ok(TrackerLocation { context: id, ticket })
    }

    /// Trackers in other contexts subscribed to `prerequisite`
    pub fn cross_context_subscribers(&self, prerequisite: TrackerLocation) -> &[TrackerLocation] {
        self.links
            .get(&prerequisite)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Disable caching in context `id` and every context below it
    pub fn disable_caching(&mut self, id: ContextId) -> Result<()> {
        self.for_each_in_subtree(id, |c| c.cache.disable_caching())
    }

    /// Re-enable caching in context `id` and every context below it.
    /// Previously computed values are treated as out of date.
    pub fn enable_caching(&mut self, id: ContextId) -> Result<()> {
        self.for_each_in_subtree(id, |c| {
            c.cache.enable_caching();
            c.cache.mark_all_out_of_date();
        })
    }

    fn for_each_in_subtree(&mut self, id: ContextId, mut f: impl FnMut(&mut ContextBase)) -> Result<()> {
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            let context = self.get_mut(next)?;
            f(context);
            pending.extend(context.children.iter().copied());
        }
        Ok(())
    }
}

/// Read-only view of one context together with the tree it lives in
#[derive(Clone, Copy)]
pub struct ContextRef<'a> {
    tree: &'a ContextTree,
    id: ContextId,
}

impl<'a> ContextRef<'a> {
    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn tree(&self) -> &'a ContextTree {
        self.tree
    }

    pub fn base(&self) -> &'a ContextBase {
        &self.tree.contexts[self.id.0]
    }

    pub fn parent(&self) -> Option<ContextRef<'a>> {
        self.base().parent.map(|id| ContextRef {
            tree: self.tree,
            id,
        })
    }

    /// The root of the tree this context belongs to
    pub fn root(&self) -> ContextRef<'a> {
        let mut current = *self;
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    pub fn child(&self, index: SubsystemIndex) -> Option<ContextRef<'a>> {
        self.base()
            .children
            .get(index.as_usize())
            .map(|id| ContextRef {
                tree: self.tree,
                id: *id,
            })
    }

    pub fn num_children(&self) -> usize {
        self.base().children.len()
    }

    pub fn config(&self) -> &'a FrameworkConfig {
        &self.tree.config
    }

    /// Pathname built from the system names recorded in this context and
    /// its ancestors
    pub fn get_system_pathname(&self) -> String {
        let parent_path = self
            .parent()
            .map(|p| p.get_system_pathname())
            .unwrap_or_default();
        naming::join_pathname(&parent_path, &self.base().system_name)
    }
}

impl Deref for ContextRef<'_> {
    type Target = ContextBase;

    fn deref(&self) -> &ContextBase {
        self.base()
    }
}

impl fmt::Debug for ContextRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextRef")
            .field("id", &self.id)
            .field("system", &self.base().system_name)
            .finish()
    }
}

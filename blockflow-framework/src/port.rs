//! Port descriptors
//!
//! Ports are static: they record a name, index, ticket and data type. The
//! value of an input port lives in a context (when fixed) or is resolved
//! through the parent coordinator (when connected); never in the port.

use crate::value::{AbstractValue, BasicVector};
use blockflow_types::{DependencyTicket, InputPortIndex, OutputPortIndex, SubsystemIndex, SystemId};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shape of the values a port carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortDataType {
    /// A [`BasicVector`] of exactly `size` elements
    Vector { size: usize },
    /// Any value whose concrete type has the given name
    Abstract { type_name: &'static str },
}

impl PortDataType {
    pub fn vector(size: usize) -> Self {
        PortDataType::Vector { size }
    }

    pub fn abstract_of<T: 'static>() -> Self {
        PortDataType::Abstract {
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, PortDataType::Vector { .. })
    }

    /// Describe why `value` cannot be held by a port of this type, or `None`
    /// if it can
    pub fn mismatch(&self, value: &AbstractValue) -> Option<(String, String)> {
        match self {
            PortDataType::Vector { size } => match value.get::<BasicVector>() {
                Some(v) if v.len() == *size => None,
                Some(v) => Some((
                    format!("BasicVector of size {size}"),
                    format!("BasicVector of size {}", v.len()),
                )),
                None => Some((
                    std::any::type_name::<BasicVector>().to_string(),
                    value.type_name().to_string(),
                )),
            },
            PortDataType::Abstract { type_name } if *type_name == value.type_name() => None,
            PortDataType::Abstract { type_name } => {
                Some((type_name.to_string(), value.type_name().to_string()))
            }
        }
    }
}

/// Direction of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    Input,
    Output,
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortKind::Input => write!(f, "InputPort"),
            PortKind::Output => write!(f, "OutputPort"),
        }
    }
}

/// Fields shared by input and output ports
#[derive(Debug)]
pub struct PortBase {
    kind: PortKind,
    name: String,
    index: usize,
    ticket: DependencyTicket,
    data_type: PortDataType,
    system_id: SystemId,
    deprecation: Option<String>,
    deprecation_already_warned: AtomicBool,
}

impl PortBase {
    fn new(
        kind: PortKind,
        name: String,
        index: usize,
        ticket: DependencyTicket,
        data_type: PortDataType,
        system_id: SystemId,
    ) -> Self {
        PortBase {
            kind,
            name,
            index,
            ticket,
            data_type,
            system_id,
            deprecation: None,
            deprecation_already_warned: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> PortKind {
        self.kind
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn ticket(&self) -> DependencyTicket {
        self.ticket
    }

    pub fn data_type(&self) -> &PortDataType {
        &self.data_type
    }

    /// Identity of the system that declared this port
    pub fn system_id(&self) -> SystemId {
        self.system_id
    }

    pub fn get_deprecation(&self) -> Option<&str> {
        self.deprecation.as_deref()
    }

    pub(crate) fn set_deprecation(&mut self, message: String) {
        self.deprecation = Some(message);
    }

    /// Atomically mark this port as reported; returns the previous state.
    pub(crate) fn exchange_deprecation_warned(&self) -> bool {
        self.deprecation_already_warned.swap(true, Ordering::AcqRel)
    }

    /// e.g. `InputPort[0] (u0) of System ::diagram::adder (my_crate::Adder)`
    pub fn get_full_description(&self, system_pathname: &str, system_type: &str) -> String {
        format!(
            "{}[{}] ({}) of System {} ({})",
            self.kind, self.index, self.name, system_pathname, system_type
        )
    }
}

/// An input port declaration
#[derive(Debug)]
pub struct InputPortBase {
    base: PortBase,
}

impl InputPortBase {
    pub(crate) fn new(
        name: String,
        index: InputPortIndex,
        ticket: DependencyTicket,
        data_type: PortDataType,
        system_id: SystemId,
    ) -> Self {
        InputPortBase {
            base: PortBase::new(PortKind::Input, name, index.as_usize(), ticket, data_type, system_id),
        }
    }

    pub fn get_index(&self) -> InputPortIndex {
        InputPortIndex(self.base.index)
    }

    pub fn base(&self) -> &PortBase {
        &self.base
    }

    pub(crate) fn base_mut(&mut self) -> &mut PortBase {
        &mut self.base
    }

    pub fn get_name(&self) -> &str {
        self.base.get_name()
    }

    pub fn ticket(&self) -> DependencyTicket {
        self.base.ticket()
    }

    pub fn data_type(&self) -> &PortDataType {
        self.base.data_type()
    }

    pub fn system_id(&self) -> SystemId {
        self.base.system_id()
    }
}

/// What an output port's value depends on
///
/// `child_subsystem` is `None` when the dependency lives inside the
/// declaring system, and names the child when a coordinator exports a
/// subsystem's port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputPortPrerequisite {
    pub child_subsystem: Option<SubsystemIndex>,
    pub dependency: DependencyTicket,
}

impl OutputPortPrerequisite {
    pub fn internal(dependency: DependencyTicket) -> Self {
        OutputPortPrerequisite {
            child_subsystem: None,
            dependency,
        }
    }

    pub fn exported(child: SubsystemIndex, dependency: DependencyTicket) -> Self {
        OutputPortPrerequisite {
            child_subsystem: Some(child),
            dependency,
        }
    }
}

/// An output port declaration
#[derive(Debug)]
pub struct OutputPortBase {
    base: PortBase,
    prerequisite: OutputPortPrerequisite,
}

impl OutputPortBase {
    pub(crate) fn new(
        name: String,
        index: OutputPortIndex,
        ticket: DependencyTicket,
        data_type: PortDataType,
        system_id: SystemId,
        prerequisite: OutputPortPrerequisite,
    ) -> Self {
        OutputPortBase {
            base: PortBase::new(PortKind::Output, name, index.as_usize(), ticket, data_type, system_id),
            prerequisite,
        }
    }

    pub fn get_index(&self) -> OutputPortIndex {
        OutputPortIndex(self.base.index)
    }

    pub fn base(&self) -> &PortBase {
        &self.base
    }

    pub(crate) fn base_mut(&mut self) -> &mut PortBase {
        &mut self.base
    }

    pub fn get_name(&self) -> &str {
        self.base.get_name()
    }

    pub fn ticket(&self) -> DependencyTicket {
        self.base.ticket()
    }

    pub fn get_prerequisite(&self) -> OutputPortPrerequisite {
        self.prerequisite
    }
}

//! Interface a system uses to reach its enclosing coordinator

use crate::context::ContextRef;
use crate::error::Result;
use crate::port::InputPortBase;
use crate::value::AbstractValue;
use blockflow_types::SystemId;
use std::sync::Arc;

/// Services a parent coordinator provides to its child systems
///
/// The coordinator knows how its children are wired together; a child
/// delegates to it whenever one of its input ports has no fixed value.
pub trait SystemParentService: Send + Sync {
    /// Identity of the root system of the hierarchy
    fn root_system_id(&self) -> SystemId;

    /// Pathname of the coordinator itself, used as the prefix of every
    /// child pathname
    fn parent_pathname(&self) -> String;

    /// Evaluate `port` of one of this coordinator's children, given the
    /// coordinator's own context. Returns `None` if the port is not
    /// connected to anything.
    fn eval_connected_subsystem_input_port(
        &self,
        parent_context: ContextRef<'_>,
        port: &InputPortBase,
    ) -> Result<Option<Arc<AbstractValue>>>;
}

//! Error types for the framework
//!
//! Messages name the failing operation (rendered as `System::EvalInput()`)
//! and the pathname of the system involved.

use blockflow_types::{CacheIndex, DependencyTicket};

/// Errors raised by system declarations, context replay and evaluation
#[derive(Debug, thiserror::Error)]
pub enum FrameworkError {
    #[error("System::{func}(): negative port index {index} is illegal. (System {pathname})")]
    NegativePortIndex {
        func: &'static str,
        index: i64,
        pathname: String,
    },

    #[error(
        "System::{func}(): there is no input port with index {index} because there \
         are only {count} input ports in system {pathname}."
    )]
    InputPortIndexOutOfRange {
        func: &'static str,
        index: usize,
        count: usize,
        pathname: String,
    },

    #[error(
        "System::{func}(): there is no output port with index {index} because there \
         are only {count} output ports in system {pathname}."
    )]
    OutputPortIndexOutOfRange {
        func: &'static str,
        index: usize,
        count: usize,
        pathname: String,
    },

    #[error(
        "System::{func}(): there is no cache entry with index {index} because there \
         are only {count} cache entries in system {pathname}."
    )]
    CacheIndexOutOfRange {
        func: &'static str,
        index: usize,
        count: usize,
        pathname: String,
    },

    #[error(
        "System::{func}(): vector port required, but input port '{port_name}' (index {index}) \
         was declared abstract. Even if the actual value is a vector, use eval_input_value \
         instead for an abstract port containing a vector. (System {pathname})"
    )]
    NotAVectorInputPort {
        func: &'static str,
        port_name: String,
        index: usize,
        pathname: String,
    },

    #[error(
        "System::{func}(): expected value of type {expected} for input port '{port_name}' \
         (index {index}) but the actual type was {actual}. (System {pathname})"
    )]
    InputPortWrongType {
        func: &'static str,
        port_name: String,
        index: usize,
        expected: String,
        actual: String,
        pathname: String,
    },

    #[error(
        "System::{func}(): input port '{port_name}' (index {index}) is neither connected \
         nor fixed so cannot be evaluated. (System {pathname})"
    )]
    CantEvaluateInputPort {
        func: &'static str,
        port_name: String,
        index: usize,
        pathname: String,
    },

    #[error(
        "System::{func}(): output port '{port_name}' (index {index}) is not computed by a \
         cache entry of this system. (System {pathname})"
    )]
    OutputNotCacheBacked {
        func: &'static str,
        port_name: String,
        index: usize,
        pathname: String,
    },

    #[error(
        "A function call on a {system_type} system named '{pathname}' was passed the root \
         context instead of the appropriate subsystem context."
    )]
    RootContextPassedToSubsystem { system_type: String, pathname: String },

    #[error(
        "A function call on the root system was passed a subcontext associated with its \
         subsystem named '{subcontext_pathname}' instead of the root context."
    )]
    SubcontextPassedToRoot { subcontext_pathname: String },

    #[error(
        "A function call on a {system_type} system named '{pathname}' was passed the context \
         of a system named '{context_pathname}' instead of the appropriate subsystem context."
    )]
    ContextMismatch {
        system_type: String,
        pathname: String,
        context_pathname: String,
    },

    #[error(
        "{object} was not associated with any system but should have been created for \
         {system_type} system {pathname}"
    )]
    NotAssociatedWithSystem {
        object: &'static str,
        system_type: String,
        pathname: String,
    },

    #[error("Cache entry '{description}' must have at least one prerequisite. (System {pathname})")]
    EmptyPrerequisites { description: String, pathname: String },

    #[error(
        "Cache entry '{description}' names prerequisite ticket {ticket}, which is not a \
         known source for it. (System {pathname})"
    )]
    UnknownPrerequisite {
        description: String,
        ticket: DependencyTicket,
        pathname: String,
    },

    #[error("Context for system {pathname} has already been initialized")]
    ContextAlreadyInitialized { pathname: String },

    #[error("A tracker for ticket {ticket} already exists; cannot create '{description}'")]
    DuplicateTracker {
        ticket: DependencyTicket,
        description: String,
    },

    #[error("No tracker exists for ticket {ticket}")]
    UnknownTracker { ticket: DependencyTicket },

    #[error("Cache entry values must be created in index order: expected {expected}, got {actual}")]
    CacheEntryOutOfOrder {
        expected: CacheIndex,
        actual: CacheIndex,
    },

    #[error("Cache entry '{description}' was re-entered while computing its own value")]
    CacheEntryReentered { description: String },

    #[error("System {pathname} already has a parent coordinator")]
    ParentAlreadySet { pathname: String },

    #[error("No context with id {id} in this tree")]
    UnknownContext { id: usize },

    #[error("Computing '{description}' failed: {message}")]
    ComputationFailed { description: String, message: String },
}

pub type Result<T> = std::result::Result<T, FrameworkError>;

impl FrameworkError {
    /// Returns true for the three context-identity diagnoses
    pub fn is_context_mismatch(&self) -> bool {
        matches!(
            self,
            FrameworkError::RootContextPassedToSubsystem { .. }
                | FrameworkError::SubcontextPassedToRoot { .. }
                | FrameworkError::ContextMismatch { .. }
                | FrameworkError::NotAssociatedWithSystem { .. }
        )
    }
}
